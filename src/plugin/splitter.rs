//! Purpose: Split directive-marked modules into a client output unit plus a server proxy module.
//! Exports: `BoundarySplitter`, `SplitterConfig`, `ClientReference`, `proxy_module`, constants.
//! Role: Privileged raw extension, always first in the pipeline and never wrapped.
//! Invariants: Every resolution result it hands back is namespaced and carries `meta.source`.
//! Invariants: The export-surface walk visits each module id at most once per boundary module.
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use futures::future::{BoxFuture, try_join_all};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::types::{
    Bundle, CachedModule, EmittedChunk, FileUrlRequest, LoadRequest, ModuleInfo, ResolveOptions, ResolvedId,
    STAR_REEXPORT, SourceDescription,
};
use super::{ContextRef, HookFuture, HookKind, Plugin};
use crate::core::directives::{module_directives, remove_directive};
use crate::core::error::{Error, ErrorKind};
use crate::core::module_id::{self, Environment};

pub const BOUNDARY_SPLITTER_NAME: &str = "boundary-splitter";
pub const CLIENT_REF_HELPER_ID: &str = "\0client-ref-helper";
pub const DEFAULT_DIRECTIVE: &str = "use client";
/// Custom resolve flag telling the splitter to stay out of a resolution.
pub const EXTERNAL_RESOLVE_FLAG: &str = "boundary_splitter_external";
/// Resolution meta key holding the specifier that produced the resolution.
pub const SOURCE_META_KEY: &str = "source";

const DEFAULT_HELPER_SOURCE: &str = r##"export function createProxy(file) {
  return new Proxy({}, {
    get(_target, name) {
      return { $$typeof: Symbol.for("react.client.reference"), $$id: file + "#" + String(name), $$async: false };
    },
  });
}
"##;

#[derive(Clone, Debug)]
pub struct SplitterConfig {
    pub directive: String,
    pub helper_source: String,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            directive: DEFAULT_DIRECTIVE.to_string(),
            helper_source: DEFAULT_HELPER_SOURCE.to_string(),
        }
    }
}

/// One boundary module as seen by the manifest builder.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClientReference {
    /// Reference id of the emitted client unit.
    pub asset_id: String,
    /// Namespaced client id of the boundary module.
    pub module_id: String,
    pub export_names: Vec<String>,
    /// Output file of the client unit, known once the bundle is generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Default)]
pub struct BoundarySplitter {
    config: SplitterConfig,
    references: Mutex<BTreeMap<String, ClientReference>>,
}

impl BoundarySplitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self {
            config,
            references: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    /// References recorded so far, ordered by client module id.
    pub fn client_references(&self) -> Vec<ClientReference> {
        let references = self.references.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        references.values().cloned().collect()
    }

    async fn split_server_module(&self, ctx: &ContextRef, id: &str, raw_id: &str) -> Result<String, Error> {
        let client_id = module_id::encode(raw_id, Environment::Client)?;
        let build = ctx.privileged().ok_or_else(|| {
            Error::invariant("boundary splitter needs the physical build context").with_id(id)
        })?;
        let loaded = ctx
            .load(LoadRequest::new(client_id.clone()).with_dependencies())
            .await?;
        let reference_id = build.emit_chunk(EmittedChunk {
            id: client_id.clone(),
            name: None,
            implicitly_loaded_after_one_of: vec![id.to_string()],
        })?;
        let surface = export_surface(ctx, loaded).await?;
        let export_names: Vec<String> = surface.into_iter().collect();
        info!(module = %raw_id, reference = %reference_id, exports = export_names.len(), "split boundary module");
        let proxy = proxy_module(&reference_id, &export_names);
        let mut references = self.references.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        references.insert(
            client_id.clone(),
            ClientReference {
                asset_id: reference_id,
                module_id: client_id,
                export_names,
                file_name: None,
            },
        );
        Ok(proxy)
    }
}

impl Plugin for BoundarySplitter {
    fn name(&self) -> &str {
        BOUNDARY_SPLITTER_NAME
    }

    fn hooks(&self) -> &[HookKind] {
        &[
            HookKind::BuildStart,
            HookKind::ResolveId,
            HookKind::Load,
            HookKind::Transform,
            HookKind::ShouldTransformCachedModule,
            HookKind::ResolveFileUrl,
            HookKind::GenerateBundle,
        ]
    }

    // Boundary modules re-split on every build, so references start empty each pass.
    fn build_start<'a>(&'a self, _ctx: &'a ContextRef) -> HookFuture<'a, ()> {
        Box::pin(async move {
            let mut references = self.references.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            references.clear();
            Ok(())
        })
    }

    fn resolve_id<'a>(
        &'a self,
        ctx: &'a ContextRef,
        source: &'a str,
        importer: Option<&'a str>,
        options: &'a ResolveOptions,
    ) -> HookFuture<'a, Option<ResolvedId>> {
        Box::pin(async move {
            if options
                .custom
                .get(EXTERNAL_RESOLVE_FLAG)
                .is_some_and(|flag| flag.as_bool().unwrap_or(true))
            {
                return Ok(None);
            }
            let Some(importer) = importer else {
                module_id::decode(source)?;
                return Ok(Some(ResolvedId {
                    resolved_by: BOUNDARY_SPLITTER_NAME.to_string(),
                    ..ResolvedId::new(source)
                }));
            };
            let parsed_importer = module_id::decode(importer).map_err(|err| {
                err.with_message(format!(
                    "importers must start with \\0server: or \\0client: (resolving {source:?})"
                ))
                .with_specifier(source)
            })?;
            if source == CLIENT_REF_HELPER_ID {
                let id = module_id::encode(CLIENT_REF_HELPER_ID, parsed_importer.environment)?;
                return Ok(Some(ResolvedId {
                    resolved_by: BOUNDARY_SPLITTER_NAME.to_string(),
                    ..ResolvedId::new(id)
                }));
            }
            let delegated = ResolveOptions {
                skip_self: true,
                ..options.clone()
            };
            let resolved = ctx.resolve(source, Some(importer), delegated).await?;
            let Some(resolved) = resolved else {
                return Err(Error::new(ErrorKind::UnresolvedImport)
                    .with_message(format!(
                        "could not resolve {source:?} from {:?}",
                        parsed_importer.raw_id
                    ))
                    .with_specifier(source)
                    .with_id(parsed_importer.raw_id));
            };
            if !module_id::is_namespaced(&resolved.id) {
                return Err(Error::invariant(format!(
                    "bad resolved import {:?} for {source:?} (resolved by {})",
                    resolved.id, resolved.resolved_by
                ))
                .with_id(parsed_importer.raw_id)
                .with_specifier(source));
            }
            debug!(%source, id = %resolved.id, by = %resolved.resolved_by, "resolved import");
            Ok(Some(resolved.with_meta(SOURCE_META_KEY, Value::String(source.to_string()))))
        })
    }

    fn load<'a>(&'a self, _ctx: &'a ContextRef, id: &'a str) -> HookFuture<'a, Option<SourceDescription>> {
        Box::pin(async move {
            let parsed = module_id::decode(id)?;
            if parsed.raw_id != CLIENT_REF_HELPER_ID {
                return Ok(None);
            }
            Ok(Some(SourceDescription::new(self.config.helper_source.clone())))
        })
    }

    fn transform<'a>(
        &'a self,
        ctx: &'a ContextRef,
        code: &'a str,
        id: &'a str,
    ) -> HookFuture<'a, Option<SourceDescription>> {
        Box::pin(async move {
            let parsed = module_id::decode(id)?;
            let directives = module_directives(code);
            let Some(directive) = directives
                .iter()
                .find(|directive| directive.value == self.config.directive)
            else {
                return Ok(None);
            };
            match parsed.environment {
                Environment::Client => {
                    debug!(module = %parsed.raw_id, "stripping boundary directive");
                    Ok(Some(SourceDescription::new(remove_directive(code, directive))))
                }
                Environment::Server => {
                    let proxy = self.split_server_module(ctx, id, &parsed.raw_id).await?;
                    Ok(Some(SourceDescription::new(proxy)))
                }
            }
        })
    }

    // A cached proxy would skip the client chunk emission, so boundary modules re-split every build.
    fn should_transform_cached_module<'a>(
        &'a self,
        _ctx: &'a ContextRef,
        module: &'a CachedModule,
    ) -> HookFuture<'a, Option<bool>> {
        Box::pin(async move {
            let parsed = module_id::decode(&module.id)?;
            if parsed.environment != Environment::Server {
                return Ok(None);
            }
            let boundary = module_directives(&module.code)
                .iter()
                .any(|directive| directive.value == self.config.directive);
            Ok(boundary.then_some(true))
        })
    }

    fn resolve_file_url(&self, ctx: &ContextRef, request: &FileUrlRequest) -> Result<Option<String>, Error> {
        let parsed = module_id::decode(&request.module_id)?;
        if parsed.environment != Environment::Server {
            return Ok(None);
        }
        let info = ctx.get_module_info(&request.module_id)?.ok_or_else(|| {
            Error::invariant("file url requested for an unknown module").with_id(request.module_id.clone())
        })?;
        let helper = module_id::encode(CLIENT_REF_HELPER_ID, Environment::Server)?;
        if info.imported_ids.len() == 1 && info.imported_ids[0] == helper {
            return Ok(Some(format!("'{}'", request.file_name)));
        }
        Ok(None)
    }

    fn generate_bundle<'a>(&'a self, ctx: &'a ContextRef, _bundle: &'a Bundle) -> HookFuture<'a, ()> {
        Box::pin(async move {
            let build = ctx.privileged().ok_or_else(|| {
                Error::invariant("boundary splitter needs the physical build context")
            })?;
            let mut references = self.references.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            for reference in references.values_mut() {
                reference.file_name = Some(build.get_file_name(&reference.asset_id)?);
            }
            Ok(())
        })
    }
}

/// Full export surface of `module`, flattening `export *` chains.
pub async fn export_surface(ctx: &ContextRef, module: ModuleInfo) -> Result<BTreeSet<String>, Error> {
    let visited = Mutex::new(HashSet::from([module.id.clone()]));
    collect_exports(ctx, module, &visited).await
}

fn collect_exports<'a>(
    ctx: &'a ContextRef,
    module: ModuleInfo,
    visited: &'a Mutex<HashSet<String>>,
) -> BoxFuture<'a, Result<BTreeSet<String>, Error>> {
    Box::pin(async move {
        let bindings = module.exported_bindings.as_ref().ok_or_else(|| {
            Error::invariant("module has no export information").with_id(module.id.clone())
        })?;
        let mut names = BTreeSet::new();
        let mut star_sources = Vec::new();
        for (source, exports) in bindings {
            for name in exports {
                if name == STAR_REEXPORT {
                    star_sources.push(source.clone());
                } else {
                    names.insert(name.clone());
                }
            }
        }
        if star_sources.is_empty() {
            return Ok(names);
        }

        let mut source_to_id = HashMap::new();
        for resolved in &module.imported_id_resolutions {
            let source = resolved
                .meta
                .get(SOURCE_META_KEY)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    Error::invariant(format!("missing source in resolution for {:?}", resolved.id))
                        .with_id(module.id.clone())
                })?;
            source_to_id.insert(source.to_string(), resolved.id.clone());
        }

        let source_to_id = &source_to_id;
        let module_id = module.id.as_str();
        let targets = star_sources.into_iter().map(|source| async move {
            let id = source_to_id.get(&source).ok_or_else(|| {
                Error::invariant(format!("missing id for star re-export {source:?}")).with_id(module_id)
            })?;
            let first_visit = visited
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(id.clone());
            if !first_visit {
                return Ok(BTreeSet::new());
            }
            let result = async {
                let target = ctx.load(LoadRequest::new(id.clone())).await?;
                collect_exports(ctx, target, visited).await
            }
            .await;
            result.map_err(|err| export_resolution_error(err, &source, module_id))
        });
        for inner in try_join_all(targets).await? {
            names.extend(inner);
        }
        Ok(names)
    })
}

fn export_resolution_error(err: Error, source: &str, module_id: &str) -> Error {
    if err.is_fatal_invariant() {
        return err;
    }
    Error::new(ErrorKind::ExportResolution)
        .with_message(format!("star re-export {source:?} of {module_id:?}: {err}"))
        .with_specifier(source)
        .with_id(module_id)
        .with_source(err)
}

/// Server-side stand-in for a boundary module.
pub fn proxy_module(reference_id: &str, export_names: &[String]) -> String {
    let helper = Value::String(CLIENT_REF_HELPER_ID.to_string()).to_string();
    let mut out = format!(
        "import {{ createProxy }} from {helper};\nvar proxy = createProxy(import.meta.FILE_URL_{reference_id});\n"
    );
    let mut specifiers = Vec::with_capacity(export_names.len());
    for (index, name) in export_names.iter().enumerate() {
        let key = Value::String(name.clone()).to_string();
        out.push_str(&format!("var e{index} = proxy[{key}];\n"));
        if is_identifier(name) {
            specifiers.push(format!("e{index} as {name}"));
        } else {
            specifiers.push(format!("e{index} as {key}"));
        }
    }
    if specifiers.is_empty() {
        out.push_str("export {};\n");
    } else {
        out.push_str(&format!("export {{ {} }};\n", specifiers.join(", ")));
    }
    out
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
