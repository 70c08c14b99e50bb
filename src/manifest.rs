//! Purpose: Build the client manifest that maps `<file>#<export>` keys to loadable client units.
//! Exports: `ClientManifest`, `ManifestEntry`.
//! Role: Consumed by the serving layer; produced from output units and splitter references.
//! Invariants: Only client-environment units appear; `chunks` starts with the unit's own file.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::module_id::Environment;
use crate::plugin::splitter::ClientReference;
use crate::plugin::types::OutputUnit;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub chunks: Vec<String>,
    pub name: String,
    #[serde(rename = "async")]
    pub is_async: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientManifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl ClientManifest {
    /// One entry per export of every client unit.
    pub fn from_units(units: &[OutputUnit]) -> Result<Self, Error> {
        let mut manifest = ClientManifest::default();
        for unit in units {
            if unit.environment()? != Environment::Client {
                continue;
            }
            let mut chunks = vec![unit.file_name.clone()];
            chunks.extend(unit.imports.iter().cloned());
            for export in &unit.exports {
                manifest.insert(unit, export, chunks.clone());
            }
        }
        Ok(manifest)
    }

    /// One entry per export name of each boundary module, with transitive unit dependencies.
    pub fn from_references(references: &[ClientReference], units: &[OutputUnit]) -> Result<Self, Error> {
        let mut manifest = ClientManifest::default();
        for reference in references {
            let unit = units
                .iter()
                .find(|unit| match &reference.file_name {
                    Some(file_name) => unit.file_name == *file_name,
                    None => unit.reference_id.as_deref() == Some(reference.asset_id.as_str()),
                })
                .ok_or_else(|| {
                    Error::invariant("client reference has no output unit")
                        .with_id(reference.module_id.clone())
                        .with_specifier(reference.asset_id.clone())
                })?;
            let chunks = transitive_chunks(unit, units);
            for export in &reference.export_names {
                manifest.insert(unit, export, chunks.clone());
            }
        }
        Ok(manifest)
    }

    fn insert(&mut self, unit: &OutputUnit, export: &str, chunks: Vec<String>) {
        self.entries.insert(
            format!("{}#{export}", unit.file_name),
            ManifestEntry {
                id: unit.file_name.clone(),
                chunks,
                name: export.to_string(),
                is_async: false,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<&ManifestEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.entries.iter()
    }
}

fn transitive_chunks(unit: &OutputUnit, units: &[OutputUnit]) -> Vec<String> {
    let mut chunks = vec![unit.file_name.clone()];
    let mut seen: BTreeSet<String> = BTreeSet::from([unit.file_name.clone()]);
    let mut index = 0;
    while index < chunks.len() {
        let current = chunks[index].clone();
        index += 1;
        let Some(current) = units.iter().find(|candidate| candidate.file_name == current) else {
            continue;
        };
        for import in &current.imports {
            if seen.insert(import.clone()) {
                chunks.push(import.clone());
            }
        }
    }
    chunks
}
