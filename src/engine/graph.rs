//! Purpose: Module table for one build pass and the `ModuleInfo` views derived from it.
//! Exports: `ModuleRecord`, `ModuleGraph`.
//! Role: Owned by the engine behind a mutex; records are inserted once per module id.
//! Invariants: Edges are stored on the importing side only; reverse edges are computed on demand.
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::core::error::Error;
use crate::plugin::types::{
    CachedModule, EmittedChunk, LOCAL_EXPORTS, Meta, ModuleInfo, ResolvedId, STAR_REEXPORT,
};

#[derive(Clone, Debug, Default)]
pub struct ModuleRecord {
    pub id: String,
    /// Source as returned by `load`.
    pub original_code: String,
    /// Source after the transform chain.
    pub code: String,
    pub meta: Meta,
    pub static_imports: Vec<(String, ResolvedId)>,
    pub dynamic_imports: Vec<(String, ResolvedId)>,
    pub exported_bindings: BTreeMap<String, Vec<String>>,
}

impl ModuleRecord {
    pub fn static_ids(&self) -> impl Iterator<Item = &str> {
        self.static_imports.iter().map(|(_, resolved)| resolved.id.as_str())
    }

    pub fn dynamic_ids(&self) -> impl Iterator<Item = &str> {
        self.dynamic_imports.iter().map(|(_, resolved)| resolved.id.as_str())
    }

    pub fn to_cached(&self) -> CachedModule {
        let resolved_sources = self
            .static_imports
            .iter()
            .chain(&self.dynamic_imports)
            .map(|(source, resolved)| (source.clone(), resolved.clone()))
            .collect();
        CachedModule {
            id: self.id.clone(),
            code: self.original_code.clone(),
            transformed_code: self.code.clone(),
            resolved_sources,
            meta: self.meta.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: BTreeMap<String, ModuleRecord>,
    externals: BTreeSet<String>,
    entries: Vec<String>,
    emitted: Vec<(String, EmittedChunk)>,
}

impl ModuleGraph {
    pub fn insert(&mut self, record: ModuleRecord) {
        for (_, resolved) in record.static_imports.iter().chain(&record.dynamic_imports) {
            if resolved.external {
                self.externals.insert(resolved.id.clone());
            }
        }
        self.modules.insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<&ModuleRecord> {
        self.modules.get(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.modules.keys().chain(&self.externals).cloned().collect()
    }

    pub fn add_entry(&mut self, id: &str) {
        if !self.entries.iter().any(|entry| entry == id) {
            self.entries.push(id.to_string());
        }
    }

    /// Record an emitted chunk; emitting the same id twice returns the first reference.
    pub fn add_emitted(&mut self, reference_id: String, chunk: EmittedChunk) -> Result<String, Error> {
        if let Some((existing, _)) = self.emitted.iter().find(|(_, emitted)| emitted.id == chunk.id) {
            return Ok(existing.clone());
        }
        if let Some((_, other)) = self.emitted.iter().find(|(existing, _)| *existing == reference_id) {
            return Err(Error::invariant(format!(
                "chunk reference {reference_id} already names {:?}",
                other.id
            ))
            .with_id(chunk.id));
        }
        self.emitted.push((reference_id.clone(), chunk));
        Ok(reference_id)
    }

    pub fn emitted(&self) -> &[(String, EmittedChunk)] {
        &self.emitted
    }

    /// Module ids referenced from the graph, entries, or emitted chunks that have no record yet.
    pub fn pending(&self, seen: &HashSet<String>) -> Vec<String> {
        let mut pending = Vec::new();
        let mut push = |id: &str| {
            if !seen.contains(id)
                && !self.externals.contains(id)
                && !pending.iter().any(|existing: &String| existing == id)
            {
                pending.push(id.to_string());
            }
        };
        for id in &self.entries {
            push(id);
        }
        for (_, chunk) in &self.emitted {
            push(&chunk.id);
        }
        for record in self.modules.values() {
            for (_, resolved) in record.static_imports.iter().chain(&record.dynamic_imports) {
                if !resolved.external {
                    push(&resolved.id);
                }
            }
        }
        pending
    }

    pub fn module_info(&self, id: &str) -> Option<ModuleInfo> {
        if self.externals.contains(id) && !self.modules.contains_key(id) {
            return Some(ModuleInfo {
                id: id.to_string(),
                is_external: true,
                importers: self.importers(id, false),
                dynamic_importers: self.importers(id, true),
                ..ModuleInfo::default()
            });
        }
        let record = self.modules.get(id)?;
        let implicitly_loaded_after_one_of = self
            .emitted
            .iter()
            .filter(|(_, chunk)| chunk.id == id)
            .flat_map(|(_, chunk)| chunk.implicitly_loaded_after_one_of.iter().cloned())
            .collect();
        let implicitly_loaded_before = self
            .emitted
            .iter()
            .filter(|(_, chunk)| chunk.implicitly_loaded_after_one_of.iter().any(|after| after == id))
            .map(|(_, chunk)| chunk.id.clone())
            .collect();
        let exports = self.export_names(id);
        Some(ModuleInfo {
            id: record.id.clone(),
            code: Some(record.code.clone()),
            is_entry: self.entries.iter().any(|entry| entry == id),
            is_external: false,
            importers: self.importers(id, false),
            imported_ids: record.static_ids().map(str::to_string).collect(),
            dynamically_imported_ids: record.dynamic_ids().map(str::to_string).collect(),
            dynamic_importers: self.importers(id, true),
            implicitly_loaded_before,
            implicitly_loaded_after_one_of,
            imported_id_resolutions: record.static_imports.iter().map(|(_, r)| r.clone()).collect(),
            dynamically_imported_id_resolutions: record
                .dynamic_imports
                .iter()
                .map(|(_, r)| r.clone())
                .collect(),
            has_default_export: Some(exports.iter().any(|name| name == "default")),
            exports: Some(exports),
            exported_bindings: Some(record.exported_bindings.clone()),
            meta: record.meta.clone(),
        })
    }

    fn importers(&self, id: &str, dynamic: bool) -> Vec<String> {
        self.modules
            .values()
            .filter(|record| {
                if dynamic {
                    record.dynamic_ids().any(|imported| imported == id)
                } else {
                    record.static_ids().any(|imported| imported == id)
                }
            })
            .map(|record| record.id.clone())
            .collect()
    }

    /// Export names of `id` with `export *` targets flattened; unknown targets contribute nothing.
    pub fn export_names(&self, id: &str) -> Vec<String> {
        let mut names = BTreeSet::new();
        let mut visited = HashSet::new();
        self.collect_export_names(id, &mut names, &mut visited);
        names.into_iter().collect()
    }

    fn collect_export_names(&self, id: &str, names: &mut BTreeSet<String>, visited: &mut HashSet<String>) {
        if !visited.insert(id.to_string()) {
            return;
        }
        let Some(record) = self.modules.get(id) else {
            return;
        };
        for (source, exported) in &record.exported_bindings {
            for name in exported {
                if name != STAR_REEXPORT {
                    names.insert(name.clone());
                    continue;
                }
                if source == LOCAL_EXPORTS {
                    continue;
                }
                let target = record
                    .static_imports
                    .iter()
                    .find(|(specifier, _)| specifier == source)
                    .map(|(_, resolved)| resolved.id.clone());
                if let Some(target) = target {
                    self.collect_export_names(&target, names, visited);
                }
            }
        }
    }
}
