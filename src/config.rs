//! Purpose: Build configuration loaded from `envsplit.json` and overridden by CLI flags.
//! Exports: `BuildConfig`, `EntryConfig`, `CONFIG_FILE_NAME`.
//! Role: Turns user-facing paths into the namespaced entry map the engine consumes.
//! Invariants: Entry paths are resolved against `root`; every produced entry id is namespaced.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};
use crate::core::module_id::{self, Environment};
use crate::plugin::resolve::normalize;
use crate::plugin::splitter::DEFAULT_DIRECTIVE;

pub const CONFIG_FILE_NAME: &str = "envsplit.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryConfig {
    pub environment: Environment,
    pub path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub root: PathBuf,
    pub entries: BTreeMap<String, EntryConfig>,
    pub out_dir: PathBuf,
    pub directive: String,
    pub manifest: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            entries: BTreeMap::new(),
            out_dir: PathBuf::from("dist"),
            directive: DEFAULT_DIRECTIVE.to_string(),
            manifest: true,
        }
    }
}

impl BuildConfig {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            let kind = if err.kind() == std::io::ErrorKind::NotFound {
                ErrorKind::NotFound
            } else {
                ErrorKind::Io
            };
            Error::new(kind)
                .with_message("failed to read build config")
                .with_id(path.display().to_string())
                .with_source(err)
        })?;
        Self::parse(&text).map_err(|err| err.with_id(path.display().to_string()))
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid build config: {err}"))
                .with_hint("Expected keys: root, entries, out_dir, directive, manifest.")
                .with_source(err)
        })
    }

    /// Load `envsplit.json` from `dir` when present, otherwise the defaults.
    pub fn discover(dir: &Path) -> Result<Self, Error> {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Self::load(&candidate);
        }
        Ok(Self::default())
    }

    /// Entry name derived from a path: its file stem.
    pub fn add_entry(&mut self, environment: Environment, path: impl Into<PathBuf>) {
        let path = path.into();
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "index".to_string());
        let name = if self.entries.contains_key(&stem) {
            format!("{stem}-{environment}")
        } else {
            stem
        };
        self.entries.insert(name, EntryConfig { environment, path });
    }

    pub fn root_dir(&self) -> Result<PathBuf, Error> {
        let root = if self.root.is_absolute() {
            self.root.clone()
        } else {
            let cwd = std::env::current_dir().map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read current directory")
                    .with_source(err)
            })?;
            cwd.join(&self.root)
        };
        Ok(normalize(&root))
    }

    /// Engine input: entry name to namespaced absolute path.
    pub fn input_map(&self) -> Result<BTreeMap<String, String>, Error> {
        if self.entries.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("no entries configured")
                .with_hint("Pass --server or --client, or list entries in envsplit.json."));
        }
        let root = self.root_dir()?;
        let mut input = BTreeMap::new();
        for (name, entry) in &self.entries {
            let path = normalize(&root.join(&entry.path));
            let id = module_id::encode(&path.to_string_lossy(), entry.environment)?;
            input.insert(name.clone(), id);
        }
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{BuildConfig, CONFIG_FILE_NAME};
    use crate::core::error::ErrorKind;
    use crate::core::module_id::{Environment, decode};

    #[test]
    fn parses_partial_config_with_defaults() {
        let config = BuildConfig::parse(
            r#"{"root": "/app", "entries": {"index": {"environment": "server", "path": "src/index.js"}}}"#,
        )
        .expect("config");
        assert_eq!(config.out_dir, PathBuf::from("dist"));
        assert_eq!(config.directive, "use client");
        assert!(config.manifest);
        let input = config.input_map().expect("input");
        let parsed = decode(&input["index"]).expect("namespaced");
        assert_eq!(parsed.environment, Environment::Server);
        assert_eq!(PathBuf::from(parsed.raw_id), PathBuf::from("/app/src/index.js"));
    }

    #[test]
    fn unknown_keys_are_usage_errors() {
        let err = BuildConfig::parse(r#"{"entrys": {}}"#).expect_err("typo");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn empty_entries_are_rejected() {
        let err = BuildConfig::default().input_map().expect_err("no entries");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn add_entry_disambiguates_names() {
        let mut config = BuildConfig::default();
        config.add_entry(Environment::Server, "src/index.js");
        config.add_entry(Environment::Client, "src/index.js");
        let names: Vec<&str> = config.entries.keys().map(String::as_str).collect();
        assert_eq!(names, ["index", "index-client"]);
    }

    #[test]
    fn discover_reads_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), r#"{"manifest": false}"#).expect("write");
        let config = BuildConfig::discover(dir.path()).expect("config");
        assert!(!config.manifest);
        let missing = tempfile::tempdir().expect("tempdir");
        assert_eq!(BuildConfig::discover(missing.path()).expect("defaults"), BuildConfig::default());
    }
}
