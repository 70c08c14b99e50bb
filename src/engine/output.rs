// Output unit assembly: facades, file names, file-url substitution, render hooks.
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use super::graph::ModuleGraph;
use super::{EngineShared, lock, short_hash};
use crate::core::error::Error;
use crate::core::module_id;
use crate::plugin::types::{Bundle, FileUrlRequest, OutputUnit, RenderedChunk};

const FILE_URL_MARKER: &str = "import.meta.FILE_URL_";

struct UnitPlan {
    name: String,
    facade: String,
    reference_id: Option<String>,
    is_entry: bool,
    modules: Vec<(String, String)>,
    facade_imports: Vec<String>,
    exports: Vec<String>,
}

pub(super) async fn generate(
    shared: &Arc<EngineShared>,
    entries: &[(String, String)],
) -> Result<Vec<OutputUnit>, Error> {
    let plans = {
        let graph = lock(&shared.graph);
        plan_units(&graph, entries)
    };

    let mut file_names = Vec::with_capacity(plans.len());
    for plan in &plans {
        let environment = module_id::decode(&plan.facade)?.environment;
        let body: Vec<&str> = plan.modules.iter().map(|(_, code)| code.as_str()).collect();
        let hash = short_hash(body.join("\n").as_bytes());
        let file_name = format!("{environment}/{}-{hash}.js", sanitize(&plan.name));
        if let Some(reference_id) = &plan.reference_id {
            lock(&shared.file_names).insert(reference_id.clone(), file_name.clone());
        }
        file_names.push((plan.facade.clone(), file_name));
    }

    let mut units = Vec::with_capacity(plans.len());
    for (plan, (_, file_name)) in plans.into_iter().zip(&file_names) {
        let mut bodies = Vec::with_capacity(plan.modules.len());
        for (id, code) in &plan.modules {
            bodies.push(substitute_file_urls(shared, id, code)?);
        }
        let imports = plan
            .facade_imports
            .iter()
            .filter_map(|facade| {
                file_names
                    .iter()
                    .find(|(candidate, _)| candidate == facade)
                    .map(|(_, name)| name.clone())
            })
            .collect();
        units.push(OutputUnit {
            file_name: file_name.clone(),
            name: plan.name,
            is_entry: plan.is_entry,
            facade_module_id: Some(plan.facade),
            reference_id: plan.reference_id,
            module_ids: plan.modules.into_iter().map(|(id, _)| id).collect(),
            exports: plan.exports,
            imports,
            code: bodies.join("\n"),
        });
    }

    for unit in &mut units {
        let chunk = RenderedChunk::new(unit.clone(), false);
        for (plugin, ctx) in shared.hooks() {
            let rendered = plugin.render_chunk(ctx, &unit.code, &chunk).await?;
            if let Some(code) = rendered {
                debug!(file = %unit.file_name, plugin = plugin.name(), "chunk rendered");
                unit.code = code;
            }
        }
    }

    let bundle = Bundle::new(units.clone());
    for (plugin, ctx) in shared.hooks() {
        plugin.generate_bundle(ctx, &bundle).await?;
    }
    Ok(units)
}

fn plan_units(graph: &ModuleGraph, entries: &[(String, String)]) -> Vec<UnitPlan> {
    let mut facades: Vec<(String, String, Option<String>, bool)> = entries
        .iter()
        .map(|(name, id)| (name.clone(), id.clone(), None, true))
        .collect();
    for (reference_id, chunk) in graph.emitted() {
        if facades.iter().any(|(_, id, _, _)| *id == chunk.id) {
            continue;
        }
        let name = chunk.name.clone().unwrap_or_else(|| default_chunk_name(&chunk.id));
        facades.push((name, chunk.id.clone(), Some(reference_id.clone()), false));
    }
    let facade_ids: HashSet<&str> = facades.iter().map(|(_, id, _, _)| id.as_str()).collect();

    facades
        .iter()
        .map(|(name, facade, reference_id, is_entry)| {
            let mut walk = Walk {
                graph,
                facade,
                facade_ids: &facade_ids,
                visited: HashSet::new(),
                modules: Vec::new(),
                facade_imports: Vec::new(),
            };
            walk.visit(facade);
            UnitPlan {
                name: name.clone(),
                facade: facade.clone(),
                reference_id: reference_id.clone(),
                is_entry: *is_entry,
                modules: walk.modules,
                facade_imports: walk.facade_imports,
                exports: graph.export_names(facade),
            }
        })
        .collect()
}

// Post-order walk over static imports, stopping at other units' facades.
struct Walk<'a> {
    graph: &'a ModuleGraph,
    facade: &'a str,
    facade_ids: &'a HashSet<&'a str>,
    visited: HashSet<String>,
    modules: Vec<(String, String)>,
    facade_imports: Vec<String>,
}

impl Walk<'_> {
    fn visit(&mut self, id: &str) {
        if id != self.facade && self.facade_ids.contains(id) {
            if !self.facade_imports.iter().any(|existing| existing == id) {
                self.facade_imports.push(id.to_string());
            }
            return;
        }
        if !self.visited.insert(id.to_string()) {
            return;
        }
        let Some(record) = self.graph.get(id) else {
            return;
        };
        let imports: Vec<String> = record.static_ids().map(str::to_string).collect();
        for imported in &imports {
            self.visit(imported);
        }
        self.modules.push((record.id.clone(), record.code.clone()));
    }
}

fn default_chunk_name(id: &str) -> String {
    let raw = module_id::decode(id)
        .map(|parsed| parsed.raw_id)
        .unwrap_or_else(|_| id.to_string());
    Path::new(&raw)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or(raw)
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "chunk".to_string() } else { cleaned }
}

fn substitute_file_urls(shared: &EngineShared, module_id: &str, code: &str) -> Result<String, Error> {
    if !code.contains(FILE_URL_MARKER) {
        return Ok(code.to_string());
    }
    let mut out = String::with_capacity(code.len());
    let mut rest = code;
    while let Some(start) = rest.find(FILE_URL_MARKER) {
        out.push_str(&rest[..start]);
        let after = &rest[start + FILE_URL_MARKER.len()..];
        let len = after
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
            .unwrap_or(after.len());
        let reference_id = &after[..len];
        out.push_str(&resolve_file_url(shared, module_id, reference_id)?);
        rest = &after[len..];
    }
    out.push_str(rest);
    Ok(out)
}

fn resolve_file_url(shared: &EngineShared, module_id: &str, reference_id: &str) -> Result<String, Error> {
    let file_name = lock(&shared.file_names).get(reference_id).cloned().ok_or_else(|| {
        Error::invariant("file url refers to an unknown chunk reference")
            .with_id(module_id)
            .with_specifier(reference_id)
    })?;
    let request = FileUrlRequest {
        module_id: module_id.to_string(),
        reference_id: reference_id.to_string(),
        file_name: file_name.clone(),
    };
    for (plugin, ctx) in shared.hooks() {
        if let Some(url) = plugin.resolve_file_url(ctx, &request)? {
            return Ok(url);
        }
    }
    Ok(serde_json::Value::String(file_name).to_string())
}

#[cfg(test)]
mod tests {
    use super::{default_chunk_name, sanitize};

    #[test]
    fn chunk_names_come_from_the_raw_file_stem() {
        assert_eq!(default_chunk_name("\0client:/src/app/counter.tsx"), "counter");
        assert_eq!(sanitize("my page!"), "my_page_");
        assert_eq!(sanitize(""), "chunk");
    }
}
