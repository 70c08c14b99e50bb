//! Purpose: Drive the extension hooks over one module graph and produce output units.
//! Exports: `Engine`, `BuildOutput`, `BuildWarning`, plus `cache`, `graph`, `syntax`.
//! Role: Minimal reference engine behind the plugin contract; not a bundler.
//! Invariants: Each module id is fetched at most once per build; concurrent requests share the fetch.
//! Invariants: `build_end` runs exactly once per build, with the failure when one occurred.
//! Notes: Hook futures never run while a graph or bookkeeping mutex is held.
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, try_join_all};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub mod cache;
mod context;
pub mod graph;
mod output;
pub mod syntax;

use self::cache::{BuildCache, ModuleCache};
use self::context::EngineContext;
use self::graph::{ModuleGraph, ModuleRecord};
use crate::core::error::{Error, ErrorKind};
use crate::core::module_id;
use crate::plugin::types::{
    CachedModule, Meta, ModuleInfo, OutputUnit, ResolveOptions, ResolvedId, SourceDescription,
};
use crate::plugin::{ContextRef, InputOptions, Plugin, flatten_plugins};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// First 8 hex digits of the SHA-256 of `data`.
pub(crate) fn short_hash(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut hex = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BuildWarning {
    pub plugin: String,
    pub message: String,
}

#[derive(Clone, Debug, Default)]
pub struct BuildOutput {
    pub units: Vec<OutputUnit>,
    pub modules: BTreeMap<String, ModuleInfo>,
    pub watch_files: Vec<String>,
    pub warnings: Vec<BuildWarning>,
}

impl BuildOutput {
    pub fn module(&self, id: &str) -> Option<&ModuleInfo> {
        self.modules.get(id)
    }
}

#[derive(Debug, Default)]
pub struct Engine {
    cache: BuildCache,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    /// Run one full build; the whole graph is reprocessed on every call.
    pub async fn build(&mut self, options: InputOptions) -> Result<BuildOutput, Error> {
        let previous = self.cache.begin();
        info!(generation = self.cache.generation(), cached = previous.len(), "build started");

        let options = run_options_hooks(options).await?;
        let InputOptions { input, plugins } = options;
        let plugins = flatten_plugins(plugins).await?;
        debug!(plugins = plugins.len(), "extensions flattened");
        let shared = EngineShared::new(plugins, previous);

        let result = shared.run_graph_phase(&input).await;
        let end = shared.run_build_end(result.as_ref().err()).await;
        let entries = result?;
        end?;

        let units = output::generate(&shared, &entries).await?;
        let (modules, module_cache) = {
            let graph = lock(&shared.graph);
            let mut modules = BTreeMap::new();
            let mut module_cache = ModuleCache::default();
            for id in graph.ids() {
                if let Some(info) = graph.module_info(&id) {
                    modules.insert(id.clone(), info);
                }
                if let Some(record) = graph.get(&id) {
                    module_cache.insert(record.to_cached());
                }
            }
            (modules, module_cache)
        };
        let watch_files = lock(&shared.watch_files).iter().cloned().collect();
        let warnings = lock(&shared.warnings).clone();
        self.cache.store(module_cache, units.clone());
        info!(units = units.len(), modules = modules.len(), "build finished");
        Ok(BuildOutput {
            units,
            modules,
            watch_files,
            warnings,
        })
    }
}

async fn run_options_hooks(options: InputOptions) -> Result<InputOptions, Error> {
    let initial = flatten_plugins(options.plugins.clone()).await?;
    let mut current = options;
    for plugin in &initial {
        if let Some(next) = plugin.options(current.clone()).await? {
            debug!(plugin = plugin.name(), "options replaced");
            current = next;
        }
    }
    Ok(current)
}

type FetchCell = Arc<OnceCell<Result<(), Error>>>;

pub(crate) struct EngineShared {
    plugins: Vec<Arc<dyn Plugin>>,
    contexts: Vec<ContextRef>,
    previous: ModuleCache,
    graph: Mutex<ModuleGraph>,
    fetches: Mutex<HashMap<String, FetchCell>>,
    file_names: Mutex<HashMap<String, String>>,
    watch_files: Mutex<BTreeSet<String>>,
    warnings: Mutex<Vec<BuildWarning>>,
}

impl EngineShared {
    fn new(plugins: Vec<Arc<dyn Plugin>>, previous: ModuleCache) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let contexts = (0..plugins.len())
                .map(|index| Arc::new(EngineContext::new(weak.clone(), index)) as ContextRef)
                .collect();
            Self {
                plugins,
                contexts,
                previous,
                graph: Mutex::new(ModuleGraph::default()),
                fetches: Mutex::new(HashMap::new()),
                file_names: Mutex::new(HashMap::new()),
                watch_files: Mutex::new(BTreeSet::new()),
                warnings: Mutex::new(Vec::new()),
            }
        })
    }

    fn hooks(&self) -> impl Iterator<Item = (&Arc<dyn Plugin>, &ContextRef)> {
        self.plugins.iter().zip(&self.contexts)
    }

    // build_start, entry resolution, and breadth-first fetching; returns (name, entry id) pairs.
    async fn run_graph_phase(
        self: &Arc<Self>,
        input: &BTreeMap<String, String>,
    ) -> Result<Vec<(String, String)>, Error> {
        for (plugin, ctx) in self.hooks() {
            plugin.build_start(ctx).await?;
        }

        let mut entries = Vec::with_capacity(input.len());
        for (name, id) in input {
            let options = ResolveOptions {
                is_entry: true,
                ..ResolveOptions::default()
            };
            let resolved = self.run_resolve(id, None, options).await?.ok_or_else(|| {
                Error::new(ErrorKind::UnresolvedImport)
                    .with_message(format!("could not resolve entry {name:?}"))
                    .with_specifier(id.clone())
            })?;
            lock(&self.graph).add_entry(&resolved.id);
            entries.push((name.clone(), resolved.id));
        }

        let mut seen = HashSet::new();
        loop {
            let pending = lock(&self.graph).pending(&seen);
            if pending.is_empty() {
                break;
            }
            debug!(modules = pending.len(), "fetching wave");
            seen.extend(pending.iter().cloned());
            try_join_all(pending.iter().map(|id| self.ensure_fetched(id))).await?;
        }
        Ok(entries)
    }

    async fn run_build_end(&self, error: Option<&Error>) -> Result<(), Error> {
        for (plugin, ctx) in self.hooks() {
            plugin.build_end(ctx, error).await?;
        }
        Ok(())
    }

    pub(crate) async fn run_resolve(
        &self,
        source: &str,
        importer: Option<&str>,
        options: ResolveOptions,
    ) -> Result<Option<ResolvedId>, Error> {
        for (index, (plugin, ctx)) in self.hooks().enumerate() {
            let skipped = options.skipped.iter().any(|(skipped_index, skipped_source, skipped_importer)| {
                *skipped_index == index
                    && skipped_source == source
                    && skipped_importer.as_deref() == importer
            });
            if skipped {
                continue;
            }
            if let Some(mut resolved) = plugin.resolve_id(ctx, source, importer, &options).await? {
                if resolved.resolved_by.is_empty() {
                    resolved.resolved_by = plugin.name().to_string();
                }
                return Ok(Some(resolved));
            }
        }
        Ok(None)
    }

    /// Fetch `id` once; concurrent and repeated callers await the same fetch.
    pub(crate) fn ensure_fetched(self: &Arc<Self>, id: &str) -> BoxFuture<'static, Result<(), Error>> {
        let cell = lock(&self.fetches).entry(id.to_string()).or_default().clone();
        let shared = self.clone();
        let id = id.to_string();
        Box::pin(async move {
            cell.get_or_init(|| shared.fetch_module(id))
                .await
                .clone()
        })
    }

    /// Fetch `id` and every module it statically imports, transitively, wave by wave.
    pub(crate) async fn ensure_fetched_with_dependencies(self: &Arc<Self>, id: &str) -> Result<(), Error> {
        let mut seen = HashSet::from([id.to_string()]);
        let mut wave = vec![id.to_string()];
        while !wave.is_empty() {
            try_join_all(wave.iter().map(|id| self.ensure_fetched(id))).await?;
            wave = {
                let graph = lock(&self.graph);
                let mut next = Vec::new();
                for id in &wave {
                    let Some(record) = graph.get(id) else {
                        continue;
                    };
                    for (_, resolved) in &record.static_imports {
                        if !resolved.external && seen.insert(resolved.id.clone()) {
                            next.push(resolved.id.clone());
                        }
                    }
                }
                next
            };
        }
        Ok(())
    }

    async fn fetch_module(self: Arc<Self>, id: String) -> Result<(), Error> {
        debug!(%id, "fetching module");
        let loaded = self.run_load(&id).await?;
        let cached = self
            .previous
            .get(&id)
            .filter(|cached| cached.code == loaded.code)
            .cloned();
        let reusable = match &cached {
            Some(cached) => !self.should_transform(cached).await?,
            None => false,
        };

        let mut meta = loaded.meta.clone();
        let (code, cached_sources) = match cached {
            Some(cached) if reusable => {
                debug!(%id, "reusing cached transform");
                meta.extend(cached.meta);
                (cached.transformed_code, Some(cached.resolved_sources))
            }
            _ => (self.run_transform(&id, loaded.code.clone(), &mut meta).await?, None),
        };

        let syntax = syntax::scan_module(&code);
        let static_imports = self
            .resolve_imports(&id, &syntax.imports, cached_sources.as_ref())
            .await?;
        let dynamic_imports = self
            .resolve_imports(&id, &syntax.dynamic_imports, cached_sources.as_ref())
            .await?;

        lock(&self.graph).insert(ModuleRecord {
            id,
            original_code: loaded.code,
            code,
            meta,
            static_imports,
            dynamic_imports,
            exported_bindings: syntax.exported_bindings,
        });
        Ok(())
    }

    async fn run_load(&self, id: &str) -> Result<SourceDescription, Error> {
        for (plugin, ctx) in self.hooks() {
            if let Some(loaded) = plugin.load(ctx, id).await? {
                debug!(%id, plugin = plugin.name(), "loaded");
                return Ok(loaded);
            }
        }
        Err(Error::new(ErrorKind::NotFound)
            .with_message("no extension could load module")
            .with_id(id))
    }

    async fn should_transform(&self, cached: &CachedModule) -> Result<bool, Error> {
        for (plugin, ctx) in self.hooks() {
            if let Some(answer) = plugin.should_transform_cached_module(ctx, cached).await? {
                return Ok(answer);
            }
        }
        Ok(false)
    }

    async fn run_transform(&self, id: &str, mut code: String, meta: &mut Meta) -> Result<String, Error> {
        for (plugin, ctx) in self.hooks() {
            if let Some(transformed) = plugin.transform(ctx, &code, id).await? {
                debug!(%id, plugin = plugin.name(), "transformed");
                meta.extend(transformed.meta);
                code = transformed.code;
            }
        }
        Ok(code)
    }

    async fn resolve_imports(
        &self,
        importer: &str,
        sources: &[String],
        cached: Option<&BTreeMap<String, ResolvedId>>,
    ) -> Result<Vec<(String, ResolvedId)>, Error> {
        let resolutions = sources.iter().map(|source| async move {
            if let Some(resolved) = cached.and_then(|cached| cached.get(source)) {
                return Ok((source.clone(), resolved.clone()));
            }
            let resolved = self
                .run_resolve(source, Some(importer), ResolveOptions::default())
                .await?
                .ok_or_else(|| unresolved_import(source, importer))?;
            Ok::<_, Error>((source.clone(), resolved))
        });
        try_join_all(resolutions).await
    }
}

fn unresolved_import(source: &str, importer: &str) -> Error {
    let raw_importer = module_id::decode(importer)
        .map(|parsed| parsed.raw_id)
        .unwrap_or_else(|_| importer.to_string());
    Error::new(ErrorKind::UnresolvedImport)
        .with_message(format!("could not resolve {source:?} from {raw_importer:?}"))
        .with_specifier(source)
        .with_id(raw_importer)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::{Engine, short_hash};
    use crate::core::error::ErrorKind;
    use crate::plugin::types::{CachedModule, LoadRequest, ResolveOptions, ResolvedId, SourceDescription};
    use crate::plugin::{ContextRef, HookFuture, HookKind, InputOptions, Plugin, PluginOption};

    /// Serves an in-memory file table and resolves specifiers by name.
    struct MemoryFiles {
        files: BTreeMap<String, String>,
        transforms: AtomicUsize,
        rebuild: bool,
    }

    impl MemoryFiles {
        fn new(files: &[(&str, &str)]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(id, code)| (id.to_string(), code.to_string()))
                    .collect(),
                transforms: AtomicUsize::new(0),
                rebuild: false,
            }
        }
    }

    impl Plugin for MemoryFiles {
        fn name(&self) -> &str {
            "memory"
        }

        fn hooks(&self) -> &[HookKind] {
            &[HookKind::ResolveId, HookKind::Load, HookKind::Transform, HookKind::ShouldTransformCachedModule]
        }

        fn resolve_id<'a>(
            &'a self,
            _ctx: &'a ContextRef,
            source: &'a str,
            importer: Option<&'a str>,
            _options: &'a ResolveOptions,
        ) -> HookFuture<'a, Option<ResolvedId>> {
            Box::pin(async move {
                if importer.is_none() {
                    return Ok(Some(ResolvedId::new(source)));
                }
                let id = format!("\0server:{}", source.trim_start_matches('.'));
                Ok(self.files.contains_key(&id).then(|| ResolvedId::new(id)))
            })
        }

        fn load<'a>(&'a self, _ctx: &'a ContextRef, id: &'a str) -> HookFuture<'a, Option<SourceDescription>> {
            Box::pin(async move { Ok(self.files.get(id).cloned().map(SourceDescription::new)) })
        }

        fn transform<'a>(
            &'a self,
            _ctx: &'a ContextRef,
            code: &'a str,
            _id: &'a str,
        ) -> HookFuture<'a, Option<SourceDescription>> {
            Box::pin(async move {
                self.transforms.fetch_add(1, Ordering::SeqCst);
                Ok(Some(SourceDescription::new(code.replace("__VERSION__", "1"))))
            })
        }

        fn should_transform_cached_module<'a>(
            &'a self,
            _ctx: &'a ContextRef,
            _module: &'a CachedModule,
        ) -> HookFuture<'a, Option<bool>> {
            Box::pin(async move { Ok(self.rebuild.then_some(true)) })
        }
    }

    /// Loads `/dep.js` while transforming the entry and records whether `/leaf.js` was fetched by then.
    struct EagerLoader {
        with_dependencies: bool,
        leaf_fetched: Mutex<Option<bool>>,
    }

    impl EagerLoader {
        fn new(with_dependencies: bool) -> Self {
            Self {
                with_dependencies,
                leaf_fetched: Mutex::new(None),
            }
        }
    }

    impl Plugin for EagerLoader {
        fn name(&self) -> &str {
            "eager-loader"
        }

        fn hooks(&self) -> &[HookKind] {
            &[HookKind::Transform]
        }

        fn transform<'a>(
            &'a self,
            ctx: &'a ContextRef,
            _code: &'a str,
            id: &'a str,
        ) -> HookFuture<'a, Option<SourceDescription>> {
            Box::pin(async move {
                if id != "\0server:/main.js" {
                    return Ok(None);
                }
                let mut request = LoadRequest::new("\0server:/dep.js");
                if self.with_dependencies {
                    request = request.with_dependencies();
                }
                let dep = ctx.load(request).await?;
                assert_eq!(dep.imported_ids, ["\0server:/leaf.js"]);
                let leaf = ctx.get_module_info("\0server:/leaf.js")?;
                *self.leaf_fetched.lock().expect("leaf lock") = Some(leaf.is_some());
                Ok(None)
            })
        }
    }

    fn input(plugin: Arc<MemoryFiles>) -> InputOptions {
        InputOptions {
            input: BTreeMap::from([("main".to_string(), "\0server:/main.js".to_string())]),
            plugins: vec![PluginOption::Plugin(plugin)],
        }
    }

    #[tokio::test]
    async fn builds_one_unit_in_dependency_order() {
        let files = Arc::new(MemoryFiles::new(&[
            ("\0server:/main.js", "import { v } from './dep.js';\nexport default v;"),
            ("\0server:/dep.js", "export const v = __VERSION__;"),
        ]));
        let mut engine = Engine::new();
        let output = engine.build(input(files)).await.expect("build");
        assert_eq!(output.units.len(), 1);
        let unit = &output.units[0];
        assert!(unit.is_entry);
        assert!(unit.file_name.starts_with("server/main-"));
        assert_eq!(unit.module_ids, ["\0server:/dep.js", "\0server:/main.js"]);
        assert_eq!(unit.exports, ["default"]);
        assert_eq!(
            unit.code,
            "export const v = 1;\nimport { v } from './dep.js';\nexport default v;"
        );
        let dep = output.module("\0server:/dep.js").expect("dep");
        assert_eq!(dep.importers, ["\0server:/main.js"]);
    }

    #[tokio::test]
    async fn load_with_dependencies_fetches_the_transitive_graph() {
        let files = || {
            Arc::new(MemoryFiles::new(&[
                ("\0server:/main.js", "export default 1;"),
                ("\0server:/dep.js", "import './leaf.js';\nexport const d = 2;"),
                ("\0server:/leaf.js", "export const l = 3;"),
            ]))
        };
        for (with_dependencies, expected) in [(true, true), (false, false)] {
            let loader = Arc::new(EagerLoader::new(with_dependencies));
            let mut options = input(files());
            options.plugins.push(PluginOption::Plugin(loader.clone()));
            let output = Engine::new().build(options).await.expect("build");
            assert_eq!(*loader.leaf_fetched.lock().expect("leaf lock"), Some(expected));
            assert!(output.module("\0server:/leaf.js").is_some());
        }
    }

    #[tokio::test]
    async fn unresolved_import_names_specifier_and_importer() {
        let files = Arc::new(MemoryFiles::new(&[("\0server:/main.js", "import './missing.js';")]));
        let err = Engine::new().build(input(files)).await.expect_err("unresolved");
        assert_eq!(err.kind(), ErrorKind::UnresolvedImport);
        assert_eq!(err.specifier(), Some("./missing.js"));
        assert_eq!(err.id(), Some("/main.js"));
    }

    #[tokio::test]
    async fn rebuild_reuses_cached_transforms_unless_asked() {
        let files = Arc::new(MemoryFiles::new(&[("\0server:/main.js", "export const v = __VERSION__;")]));
        let mut engine = Engine::new();
        engine.build(input(files.clone())).await.expect("first build");
        assert_eq!(files.transforms.load(Ordering::SeqCst), 1);
        assert_eq!(engine.cache().modules().len(), 1);

        let output = engine.build(input(files.clone())).await.expect("second build");
        assert_eq!(files.transforms.load(Ordering::SeqCst), 1);
        assert_eq!(output.units[0].code, "export const v = 1;");

        let mut eager = MemoryFiles::new(&[("\0server:/main.js", "export const v = __VERSION__;")]);
        eager.rebuild = true;
        let eager = Arc::new(eager);
        engine.build(input(eager.clone())).await.expect("third build");
        assert_eq!(eager.transforms.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn short_hash_is_eight_hex_digits() {
        let hash = short_hash(b"\0client:/a.js");
        assert_eq!(hash.len(), 8);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, short_hash(b"\0client:/a.js"));
    }
}
