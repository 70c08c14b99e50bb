//! Purpose: Build-scoped cache service for loaded modules and assembled output units.
//! Exports: `BuildCache`, `ModuleCache`.
//! Role: Owned by `Engine`; initialized at build start, refilled at build end, cleared on demand.
//! Invariants: A failed build leaves the cache empty rather than half-filled.
use std::collections::BTreeMap;

use crate::plugin::types::{CachedModule, OutputUnit};

/// Transformed modules from a finished build, keyed by namespaced id.
#[derive(Clone, Debug, Default)]
pub struct ModuleCache {
    modules: BTreeMap<String, CachedModule>,
}

impl ModuleCache {
    pub fn get(&self, id: &str) -> Option<&CachedModule> {
        self.modules.get(id)
    }

    pub fn insert(&mut self, module: CachedModule) {
        self.modules.insert(module.id.clone(), module);
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CachedModule> {
        self.modules.values()
    }
}

impl FromIterator<CachedModule> for ModuleCache {
    fn from_iter<I: IntoIterator<Item = CachedModule>>(iter: I) -> Self {
        let mut cache = ModuleCache::default();
        for module in iter {
            cache.insert(module);
        }
        cache
    }
}

#[derive(Debug, Default)]
pub struct BuildCache {
    modules: ModuleCache,
    units: Vec<OutputUnit>,
    generation: u64,
}

impl BuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a build: hand out the previous module snapshot and reset everything else.
    pub fn begin(&mut self) -> ModuleCache {
        self.generation += 1;
        self.units.clear();
        std::mem::take(&mut self.modules)
    }

    pub fn store(&mut self, modules: ModuleCache, units: Vec<OutputUnit>) {
        self.modules = modules;
        self.units = units;
    }

    pub fn clear(&mut self) {
        self.modules = ModuleCache::default();
        self.units.clear();
    }

    pub fn modules(&self) -> &ModuleCache {
        &self.modules
    }

    pub fn units(&self) -> &[OutputUnit] {
        &self.units
    }

    /// Number of builds started with this cache.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::{BuildCache, ModuleCache};
    use crate::plugin::types::{CachedModule, OutputUnit};

    #[test]
    fn begin_hands_out_previous_snapshot() {
        let mut cache = BuildCache::new();
        let modules: ModuleCache = [CachedModule {
            id: "\0server:/a.js".to_string(),
            ..CachedModule::default()
        }]
        .into_iter()
        .collect();
        cache.store(modules, vec![OutputUnit::default()]);
        assert_eq!(cache.units().len(), 1);

        let previous = cache.begin();
        assert_eq!(previous.len(), 1);
        assert!(previous.get("\0server:/a.js").is_some());
        assert!(cache.modules().is_empty());
        assert!(cache.units().is_empty());
        assert_eq!(cache.generation(), 1);
    }

    #[test]
    fn clear_drops_everything() {
        let mut cache = BuildCache::new();
        cache.store(ModuleCache::default(), vec![OutputUnit::default()]);
        cache.clear();
        assert!(cache.units().is_empty());
    }
}
