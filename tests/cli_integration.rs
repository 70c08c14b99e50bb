// CLI integration tests for build, scan, and id flows.
use std::path::Path;
use std::process::Command;

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_envsplit");
    let mut command = Command::new(exe);
    command.env("RUST_LOG", "warn");
    command
}

fn parse_json(value: &str) -> Value {
    serde_json::from_str(value).expect("valid json")
}

fn parse_json_line(output: &[u8]) -> Value {
    let text = String::from_utf8_lossy(output);
    let line = text
        .lines()
        .find(|line| line.starts_with('{'))
        .expect("json line");
    parse_json(line)
}

fn write_app(root: &Path) {
    std::fs::create_dir_all(root.join("src")).expect("mkdir");
    std::fs::write(
        root.join("src/index.js"),
        "import { Button } from './button';\nexport default function Page() { return Button; }\n",
    )
    .expect("write index");
    std::fs::write(
        root.join("src/button.js"),
        "'use client';\nexport function Button() {}\n",
    )
    .expect("write button");
}

#[test]
fn build_writes_units_and_manifest() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_app(temp.path());

    let build = cmd()
        .args([
            "build",
            "--root",
            temp.path().to_str().expect("utf8 path"),
            "--server",
            "src/index.js",
        ])
        .output()
        .expect("build");
    assert!(build.status.success(), "stderr: {}", String::from_utf8_lossy(&build.stderr));
    let summary = parse_json(std::str::from_utf8(&build.stdout).expect("utf8"));
    let units = summary["units"].as_array().expect("units array");
    assert_eq!(units.len(), 2);
    assert_eq!(units[0]["environment"], "server");
    assert_eq!(units[0]["entry"], true);
    assert_eq!(units[1]["environment"], "client");
    assert_eq!(summary["client_references"], 1);

    let out_dir = temp.path().join("dist");
    let client_file = units[1]["file"].as_str().expect("client file");
    let client_code = std::fs::read_to_string(out_dir.join(client_file)).expect("client unit");
    assert!(client_code.contains("export function Button() {}"));
    assert!(!client_code.contains("use client"));

    let server_file = units[0]["file"].as_str().expect("server file");
    let server_code = std::fs::read_to_string(out_dir.join(server_file)).expect("server unit");
    assert!(server_code.contains(&format!("'{client_file}'")));

    let manifest_path = summary["manifest"].as_str().expect("manifest path");
    let manifest = parse_json(&std::fs::read_to_string(manifest_path).expect("manifest"));
    let entry = &manifest[format!("{client_file}#Button")];
    assert_eq!(entry["name"], "Button");
    assert_eq!(entry["async"], false);
    assert_eq!(entry["chunks"][0], client_file);
}

#[test]
fn build_reads_config_file_and_honors_no_manifest() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_app(temp.path());
    std::fs::write(
        temp.path().join("envsplit.json"),
        r#"{"entries": {"app": {"environment": "server", "path": "src/index.js"}}, "out_dir": "out"}"#,
    )
    .expect("write config");

    let build = cmd()
        .args([
            "build",
            "--root",
            temp.path().to_str().expect("utf8 path"),
            "--no-manifest",
        ])
        .output()
        .expect("build");
    assert!(build.status.success(), "stderr: {}", String::from_utf8_lossy(&build.stderr));
    let summary = parse_json(std::str::from_utf8(&build.stdout).expect("utf8"));
    assert!(summary["manifest"].is_null());
    let units = summary["units"].as_array().expect("units array");
    assert!(units[0]["file"].as_str().expect("file").starts_with("server/app-"));
    assert!(temp.path().join("out").is_dir());
    assert!(!temp.path().join("out/client-manifest.json").exists());
}

#[test]
fn build_reports_boundary_without_exports_as_notice() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("index.js"), "import './effects.js';\n").expect("write index");
    std::fs::write(
        temp.path().join("effects.js"),
        "'use client' // side effects only\nconsole.log('ready');\n",
    )
    .expect("write effects");

    let build = cmd()
        .args([
            "build",
            "--root",
            temp.path().to_str().expect("utf8 path"),
            "--server",
            "index.js",
        ])
        .output()
        .expect("build");
    assert!(build.status.success(), "stderr: {}", String::from_utf8_lossy(&build.stderr));
    let summary = parse_json(std::str::from_utf8(&build.stdout).expect("utf8"));
    assert_eq!(summary["client_references"], 1);
    assert_eq!(summary["units"].as_array().expect("units array").len(), 2);

    let notice = parse_json_line(&build.stderr);
    assert_eq!(notice["notice"]["kind"], "empty_boundary");
    assert_eq!(notice["notice"]["cmd"], "build");
    assert_eq!(notice["notice"]["environment"], "client");
    let module = notice["notice"]["module"].as_str().expect("module");
    assert!(module.ends_with("effects.js"));
}

#[test]
fn build_without_entries_is_usage_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let build = cmd()
        .args(["build", "--root", temp.path().to_str().expect("utf8 path")])
        .output()
        .expect("build");
    assert_eq!(build.status.code(), Some(2));
    let err = parse_json_line(&build.stderr);
    assert_eq!(err["error"]["kind"], "Usage");
    assert!(err["error"]["hint"].as_str().expect("hint").contains("--server"));
}

#[test]
fn build_with_missing_import_exits_with_unresolved_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("index.js"), "import './nope.js';\n").expect("write");
    let build = cmd()
        .args([
            "build",
            "--root",
            temp.path().to_str().expect("utf8 path"),
            "--server",
            "index.js",
        ])
        .output()
        .expect("build");
    assert_eq!(build.status.code(), Some(5));
    let err = parse_json_line(&build.stderr);
    assert_eq!(err["error"]["kind"], "UnresolvedImport");
    assert_eq!(err["error"]["specifier"], "./nope.js");
}

#[test]
fn scan_prints_directive_prologue() {
    let temp = tempfile::tempdir().expect("tempdir");
    let file = temp.path().join("a.js");
    std::fs::write(&file, "\"use strict\";\n'use client';\nexport const a = 1;\n").expect("write");

    let scan = cmd()
        .args(["scan", file.to_str().expect("utf8 path")])
        .output()
        .expect("scan");
    assert!(scan.status.success());
    let value = parse_json(std::str::from_utf8(&scan.stdout).expect("utf8"));
    assert_eq!(value["boundary"], true);
    let directives = value["directives"].as_array().expect("directives");
    assert_eq!(directives.len(), 2);
    assert_eq!(directives[0]["value"], "use strict");
    assert_eq!(directives[1]["value"], "use client");
    assert_eq!(directives[1]["start"], 14);
}

#[test]
fn scan_missing_file_is_not_found() {
    let scan = cmd()
        .args(["scan", "/definitely/not/here.js"])
        .output()
        .expect("scan");
    assert_eq!(scan.status.code(), Some(3));
    let err = parse_json_line(&scan.stderr);
    assert_eq!(err["error"]["kind"], "NotFound");
}

#[test]
fn id_encode_decode_flow() {
    let encode = cmd()
        .args(["id", "encode", "--env", "client", "/src/a.js"])
        .output()
        .expect("encode");
    assert!(encode.status.success());
    let encoded = parse_json(std::str::from_utf8(&encode.stdout).expect("utf8"));
    assert_eq!(encoded["id"], "\0client:/src/a.js");

    let decode = cmd()
        .args(["id", "decode", "\\0server:/src/b.js"])
        .output()
        .expect("decode");
    assert!(decode.status.success());
    let decoded = parse_json(std::str::from_utf8(&decode.stdout).expect("utf8"));
    assert_eq!(decoded["environment"], "server");
    assert_eq!(decoded["raw_id"], "/src/b.js");

    let invalid = cmd()
        .args(["id", "decode", "/src/b.js"])
        .output()
        .expect("decode");
    assert_eq!(invalid.status.code(), Some(70));
    let err = parse_json_line(&invalid.stderr);
    assert_eq!(err["error"]["kind"], "Invariant");
}

#[test]
fn unknown_flag_is_usage_error_with_hint() {
    let output = cmd().args(["scan", "--bogus"]).output().expect("scan");
    assert_eq!(output.status.code(), Some(2));
    let err = parse_json_line(&output.stderr);
    assert_eq!(err["error"]["kind"], "Usage");
    assert!(err["error"]["hint"].as_str().expect("hint").contains("envsplit scan --help"));
}
