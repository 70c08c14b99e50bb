// End-to-end builds over files on disk: boundary split, manifest, and cache reuse.
use std::path::Path;
use std::sync::Arc;

use envsplit::core::error::ErrorKind;
use envsplit::core::module_id::{self, Environment};
use envsplit::engine::Engine;
use envsplit::manifest::ClientManifest;
use envsplit::plugin::compose::{ExtensionDescriptor, Pipeline};
use envsplit::plugin::resolve::RelativeResolver;
use envsplit::plugin::splitter::SplitterConfig;
use envsplit::plugin::{Plugin, PluginOption};

const INDEX: &str = "import { Counter } from './a.js';\nexport default function Page() { return Counter; }\n";
const COUNTER: &str = "'use client';\nimport { step } from './util.js';\nexport function Counter() { return step; }\nexport default Counter;\n";
const UTIL: &str = "export const step = 1;\n";

fn write_fixture(root: &Path) {
    std::fs::write(root.join("index.js"), INDEX).expect("write index");
    std::fs::write(root.join("a.js"), COUNTER).expect("write a");
    std::fs::write(root.join("util.js"), UTIL).expect("write util");
}

fn pipeline(root: &Path) -> Pipeline {
    let resolver: Arc<dyn Plugin> = Arc::new(RelativeResolver::with_root(root));
    Pipeline::builder()
        .extension(ExtensionDescriptor::common(PluginOption::Plugin(resolver)))
        .build()
        .expect("pipeline")
}

fn entry(root: &Path, file: &str, environment: Environment) -> String {
    let path = root.join(file);
    module_id::encode(&path.to_string_lossy(), environment).expect("encode")
}

#[tokio::test]
async fn boundary_module_is_split_into_proxy_and_client_unit() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_fixture(dir.path());
    let pipeline = pipeline(dir.path());
    let input = [("index".to_string(), entry(dir.path(), "index.js", Environment::Server))].into();

    let mut engine = Engine::new();
    let output = engine
        .build(pipeline.input_options(input))
        .await
        .expect("build");

    assert_eq!(output.units.len(), 2);
    let server = &output.units[0];
    let client = &output.units[1];
    assert!(server.is_entry);
    assert!(server.file_name.starts_with("server/index-"));
    assert!(client.file_name.starts_with("client/a-"));
    assert!(!client.is_entry);

    assert!(server.code.contains("createProxy"));
    assert!(server.code.contains(&format!("'{}'", client.file_name)));
    assert!(server.code.contains("var e0 = proxy[\"Counter\"];"));
    assert!(!server.code.contains("return step"));

    assert!(!client.code.contains("use client"));
    assert!(client.code.contains("export function Counter() { return step; }"));
    assert!(client.code.contains("export const step = 1;"));
    assert_eq!(client.exports, ["Counter", "default"]);

    let references = pipeline.splitter().client_references();
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].export_names, ["Counter", "default"]);
    assert_eq!(client.reference_id.as_deref(), Some(references[0].asset_id.as_str()));
    assert_eq!(references[0].file_name.as_deref(), Some(client.file_name.as_str()));

    let manifest = ClientManifest::from_references(&references, &output.units).expect("manifest");
    assert_eq!(manifest.len(), 2);
    let counter = manifest
        .get(&format!("{}#Counter", client.file_name))
        .expect("manifest entry");
    assert_eq!(counter.chunks, [client.file_name.clone()]);
}

#[tokio::test]
async fn client_entry_keeps_directive_free_body() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_fixture(dir.path());
    let pipeline = pipeline(dir.path());
    let input = [("boot".to_string(), entry(dir.path(), "a.js", Environment::Client))].into();

    let output = Engine::new()
        .build(pipeline.input_options(input))
        .await
        .expect("build");

    assert_eq!(output.units.len(), 1);
    let unit = &output.units[0];
    assert_eq!(unit.environment().expect("environment"), Environment::Client);
    assert!(unit.code.starts_with("export const step = 1;"));
    assert!(unit.code.ends_with("\nimport { step } from './util.js';\nexport function Counter() { return step; }\nexport default Counter;\n"));
    assert!(pipeline.splitter().client_references().is_empty());

    let manifest = ClientManifest::from_units(&output.units).expect("manifest");
    assert!(manifest.get(&format!("{}#Counter", unit.file_name)).is_some());
}

#[tokio::test]
async fn custom_directive_replaces_default() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("index.js"), "import './b.js';\n").expect("write");
    std::fs::write(dir.path().join("b.js"), "\"use browser\";\nexport const b = 2;\n").expect("write");
    let resolver: Arc<dyn Plugin> = Arc::new(RelativeResolver::new());
    let pipeline = Pipeline::builder()
        .splitter_config(SplitterConfig {
            directive: "use browser".to_string(),
            ..SplitterConfig::default()
        })
        .extension(ExtensionDescriptor::common(PluginOption::Plugin(resolver)))
        .build()
        .expect("pipeline");
    let input = [("index".to_string(), entry(dir.path(), "index.js", Environment::Server))].into();

    let output = Engine::new()
        .build(pipeline.input_options(input))
        .await
        .expect("build");
    assert_eq!(output.units.len(), 2);
    assert_eq!(pipeline.splitter().client_references()[0].export_names, ["b"]);
}

#[tokio::test]
async fn missing_import_reports_specifier_and_importer() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("index.js"), "import './gone.js';\n").expect("write");
    let pipeline = pipeline(dir.path());
    let input = [("index".to_string(), entry(dir.path(), "index.js", Environment::Server))].into();

    let err = Engine::new()
        .build(pipeline.input_options(input))
        .await
        .expect_err("unresolved");
    assert_eq!(err.kind(), ErrorKind::UnresolvedImport);
    assert_eq!(err.specifier(), Some("./gone.js"));
    let importer = dir.path().join("index.js");
    assert_eq!(err.id(), Some(importer.to_string_lossy().as_ref()));
}

#[tokio::test]
async fn rebuild_reuses_cache_and_watches_sources() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_fixture(dir.path());
    let pipeline = pipeline(dir.path());
    let input: std::collections::BTreeMap<String, String> =
        [("index".to_string(), entry(dir.path(), "index.js", Environment::Server))].into();

    let mut engine = Engine::new();
    let first = engine
        .build(pipeline.input_options(input.clone()))
        .await
        .expect("first build");
    assert_eq!(engine.cache().generation(), 1);
    let index = dir.path().join("index.js").to_string_lossy().to_string();
    assert!(first.watch_files.contains(&index));

    let second = engine
        .build(pipeline.input_options(input))
        .await
        .expect("second build");
    assert_eq!(engine.cache().generation(), 2);
    let names = |units: &[envsplit::plugin::types::OutputUnit]| {
        units.iter().map(|unit| unit.file_name.clone()).collect::<Vec<_>>()
    };
    assert_eq!(names(&first.units), names(&second.units));
}
