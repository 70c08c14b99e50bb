//! Purpose: Data exchanged between the engine and pipeline extensions across the hook contract.
//! Exports: `ModuleInfo`, `ResolvedId`, `ResolveOptions`, `LoadRequest`, `SourceDescription`,
//! `CachedModule`, `EmittedChunk`, `FileUrlRequest`, `OutputUnit`, `RenderedChunk`, `Bundle`.
//! Role: Plain records; identifiers inside are namespaced on the engine side and raw inside wrapped hooks.
//! Invariants: Restricted views (`RenderedChunk::restricted`, `Bundle::restricted`) reject detail access.
use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::error::Error;
use crate::core::module_id::{self, Environment};

pub type Meta = Map<String, Value>;

/// Key under `exported_bindings` holding a module's own declarations.
pub const LOCAL_EXPORTS: &str = ".";
/// Export-name marker for `export * from "..."`.
pub const STAR_REEXPORT: &str = "*";

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ResolvedId {
    pub id: String,
    pub external: bool,
    pub resolved_by: String,
    pub meta: Meta,
}

impl ResolvedId {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResolveOptions {
    pub is_entry: bool,
    pub skip_self: bool,
    pub custom: Meta,
    // (plugin index, source, importer) triples skipped by enclosing `skip_self` resolutions.
    pub(crate) skipped: Vec<(usize, String, Option<String>)>,
}

#[derive(Clone, Debug)]
pub struct LoadRequest {
    pub id: String,
    pub resolve_dependencies: bool,
}

impl LoadRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resolve_dependencies: false,
        }
    }

    pub fn with_dependencies(mut self) -> Self {
        self.resolve_dependencies = true;
        self
    }
}

/// Result of a `load` or `transform` hook.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceDescription {
    pub code: String,
    pub map: Option<String>,
    pub meta: Meta,
}

impl SourceDescription {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }
}

impl From<String> for SourceDescription {
    fn from(code: String) -> Self {
        Self::new(code)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ModuleInfo {
    pub id: String,
    pub code: Option<String>,
    pub is_entry: bool,
    pub is_external: bool,
    pub importers: Vec<String>,
    pub imported_ids: Vec<String>,
    pub dynamically_imported_ids: Vec<String>,
    pub dynamic_importers: Vec<String>,
    pub implicitly_loaded_before: Vec<String>,
    pub implicitly_loaded_after_one_of: Vec<String>,
    pub imported_id_resolutions: Vec<ResolvedId>,
    pub dynamically_imported_id_resolutions: Vec<ResolvedId>,
    pub exported_bindings: Option<BTreeMap<String, Vec<String>>>,
    pub exports: Option<Vec<String>>,
    pub has_default_export: Option<bool>,
    pub meta: Meta,
}

/// Previously built module offered to `should_transform_cached_module`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CachedModule {
    pub id: String,
    pub code: String,
    pub transformed_code: String,
    pub resolved_sources: BTreeMap<String, ResolvedId>,
    pub meta: Meta,
}

#[derive(Clone, Debug, Default)]
pub struct EmittedChunk {
    pub id: String,
    pub name: Option<String>,
    pub implicitly_loaded_after_one_of: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct FileUrlRequest {
    pub module_id: String,
    pub reference_id: String,
    pub file_name: String,
}

/// One physical artifact produced for one environment's sub-graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OutputUnit {
    pub file_name: String,
    pub name: String,
    pub is_entry: bool,
    pub facade_module_id: Option<String>,
    pub reference_id: Option<String>,
    pub module_ids: Vec<String>,
    pub exports: Vec<String>,
    pub imports: Vec<String>,
    pub code: String,
}

impl OutputUnit {
    pub fn environment(&self) -> Result<Environment, Error> {
        let id = self
            .facade_module_id
            .as_deref()
            .or_else(|| self.module_ids.first().map(String::as_str))
            .ok_or_else(|| {
                Error::invariant("output unit has no modules").with_id(self.file_name.clone())
            })?;
        Ok(module_id::decode(id)?.environment)
    }
}

#[derive(Clone, Debug)]
pub struct RenderedChunk {
    file_name: String,
    sourcemap: bool,
    unit: Option<OutputUnit>,
}

impl RenderedChunk {
    pub fn new(unit: OutputUnit, sourcemap: bool) -> Self {
        Self {
            file_name: unit.file_name.clone(),
            sourcemap,
            unit: Some(unit),
        }
    }

    /// View that keeps only the output file name and the sourcemap flag.
    pub fn restricted(&self) -> Self {
        Self {
            file_name: self.file_name.clone(),
            sourcemap: self.sourcemap,
            unit: None,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn sourcemap(&self) -> bool {
        self.sourcemap
    }

    pub fn unit(&self) -> Result<&OutputUnit, Error> {
        self.unit.as_ref().ok_or_else(|| {
            Error::invariant("unsupported chunk field access from a wrapped extension")
                .with_id(self.file_name.clone())
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct Bundle {
    units: Option<Vec<OutputUnit>>,
}

impl Bundle {
    pub fn new(units: Vec<OutputUnit>) -> Self {
        Self { units: Some(units) }
    }

    pub fn restricted() -> Self {
        Self { units: None }
    }

    pub fn units(&self) -> Result<&[OutputUnit], Error> {
        self.units
            .as_deref()
            .ok_or_else(|| Error::invariant("unsupported bundle access from a wrapped extension"))
    }
}

#[cfg(test)]
mod tests {
    use super::{Bundle, OutputUnit, RenderedChunk};
    use crate::core::error::ErrorKind;
    use crate::core::module_id::Environment;

    fn unit() -> OutputUnit {
        OutputUnit {
            file_name: "client/a-0011aabb.js".to_string(),
            facade_module_id: Some("\0client:/src/a.js".to_string()),
            ..OutputUnit::default()
        }
    }

    #[test]
    fn unit_environment_comes_from_facade() {
        assert_eq!(unit().environment().expect("env"), Environment::Client);
    }

    #[test]
    fn unit_without_modules_is_an_invariant_error() {
        let err = OutputUnit::default().environment().expect_err("no modules");
        assert_eq!(err.kind(), ErrorKind::Invariant);
    }

    #[test]
    fn restricted_chunk_keeps_file_name_only() {
        let chunk = RenderedChunk::new(unit(), false);
        assert!(chunk.unit().is_ok());
        let view = chunk.restricted();
        assert_eq!(view.file_name(), "client/a-0011aabb.js");
        assert!(!view.sourcemap());
        let err = view.unit().expect_err("restricted");
        assert_eq!(err.kind(), ErrorKind::Invariant);
    }

    #[test]
    fn restricted_bundle_rejects_access() {
        assert_eq!(Bundle::new(vec![unit()]).units().expect("units").len(), 1);
        let err = Bundle::restricted().units().expect_err("restricted");
        assert_eq!(err.kind(), ErrorKind::Invariant);
    }
}
