//! Purpose: Present a physical build context to a wrapped extension as one environment's sub-graph.
//! Exports: `PluginContext`, `BuildContext`, `ScopedContext`, `ContextCache`.
//! Role: Context virtualization layer used by `wrap`; the engine implements the physical side.
//! Invariants: Raw ids go in, raw ids come out; namespaced ids never reach a wrapped extension.
//! Invariants: Chunk emission and file-name lookup exist only on `BuildContext`; ids are never enumerated.
//! Invariants: The cache is pure memoization keyed by physical context identity, evicted per build.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::{ContextRef, HookFuture};
use super::types::{EmittedChunk, LoadRequest, ModuleInfo, ResolveOptions, ResolvedId};
use crate::core::error::Error;
use crate::core::module_id::{self, Environment};

/// Operations every extension may perform.
pub trait PluginContext: Send + Sync {
    fn load<'a>(&'a self, request: LoadRequest) -> HookFuture<'a, ModuleInfo>;

    fn get_module_info(&self, id: &str) -> Result<Option<ModuleInfo>, Error>;

    fn resolve<'a>(
        &'a self,
        source: &'a str,
        importer: Option<&'a str>,
        options: ResolveOptions,
    ) -> HookFuture<'a, Option<ResolvedId>>;

    fn add_watch_file(&self, id: &str);

    fn warn(&self, message: &str);

    /// Environment this view is scoped to; `None` for the physical context.
    fn environment(&self) -> Option<Environment> {
        None
    }

    /// Privileged operations, only reachable from unwrapped extensions.
    fn privileged(&self) -> Option<&dyn BuildContext> {
        None
    }
}

/// Graph-wide operations with no environment-scoped meaning.
pub trait BuildContext: Send + Sync {
    /// Emit `chunk.id` as a standalone output unit; returns its reference id.
    fn emit_chunk(&self, chunk: EmittedChunk) -> Result<String, Error>;

    /// Output file name of an emitted chunk; available from `generate_bundle` on.
    fn get_file_name(&self, reference_id: &str) -> Result<String, Error>;
}

pub struct ScopedContext {
    inner: ContextRef,
    environment: Environment,
}

impl ScopedContext {
    pub fn new(inner: ContextRef, environment: Environment) -> Self {
        Self { inner, environment }
    }

    fn to_raw(&self, id: &str) -> Result<String, Error> {
        Ok(module_id::decode(id)?.raw_id)
    }

    fn to_raw_all(&self, ids: Vec<String>) -> Result<Vec<String>, Error> {
        ids.iter().map(|id| self.to_raw(id)).collect()
    }

    fn to_raw_resolutions(&self, resolutions: Vec<ResolvedId>) -> Result<Vec<ResolvedId>, Error> {
        resolutions
            .into_iter()
            .map(|resolved| {
                Ok(ResolvedId {
                    id: self.to_raw(&resolved.id)?,
                    ..resolved
                })
            })
            .collect()
    }

    fn to_raw_module_info(&self, info: ModuleInfo) -> Result<ModuleInfo, Error> {
        Ok(ModuleInfo {
            id: self.to_raw(&info.id)?,
            importers: self.to_raw_all(info.importers)?,
            imported_ids: self.to_raw_all(info.imported_ids)?,
            dynamically_imported_ids: self.to_raw_all(info.dynamically_imported_ids)?,
            dynamic_importers: self.to_raw_all(info.dynamic_importers)?,
            implicitly_loaded_before: self.to_raw_all(info.implicitly_loaded_before)?,
            implicitly_loaded_after_one_of: self.to_raw_all(info.implicitly_loaded_after_one_of)?,
            imported_id_resolutions: self.to_raw_resolutions(info.imported_id_resolutions)?,
            dynamically_imported_id_resolutions: self
                .to_raw_resolutions(info.dynamically_imported_id_resolutions)?,
            ..info
        })
    }
}

impl PluginContext for ScopedContext {
    fn load<'a>(&'a self, request: LoadRequest) -> HookFuture<'a, ModuleInfo> {
        Box::pin(async move {
            let id = module_id::encode(&request.id, self.environment)?;
            let loaded = self.inner.load(LoadRequest { id, ..request }).await?;
            self.to_raw_module_info(loaded)
        })
    }

    fn get_module_info(&self, id: &str) -> Result<Option<ModuleInfo>, Error> {
        let id = module_id::encode(id, self.environment)?;
        match self.inner.get_module_info(&id)? {
            Some(info) => Ok(Some(self.to_raw_module_info(info)?)),
            None => Ok(None),
        }
    }

    fn resolve<'a>(
        &'a self,
        source: &'a str,
        importer: Option<&'a str>,
        options: ResolveOptions,
    ) -> HookFuture<'a, Option<ResolvedId>> {
        Box::pin(async move {
            let resolved = match importer {
                None => {
                    let source = module_id::encode(source, self.environment)?;
                    self.inner.resolve(&source, None, options).await?
                }
                Some(importer) => {
                    let importer = module_id::encode(importer, self.environment)?;
                    self.inner.resolve(source, Some(&importer), options).await?
                }
            };
            let Some(resolved) = resolved else {
                return Ok(None);
            };
            let parsed = module_id::decode(&resolved.id)?;
            if parsed.environment != self.environment {
                return Err(Error::invariant(format!(
                    "resolved module is in the {} environment, expected {}",
                    parsed.environment, self.environment
                ))
                .with_id(resolved.id.clone())
                .with_specifier(source));
            }
            Ok(Some(ResolvedId {
                id: parsed.raw_id,
                ..resolved
            }))
        })
    }

    fn add_watch_file(&self, id: &str) {
        self.inner.add_watch_file(id);
    }

    fn warn(&self, message: &str) {
        self.inner.warn(message);
    }

    fn environment(&self) -> Option<Environment> {
        Some(self.environment)
    }
}

/// Scoped views keyed by the identity of the physical context they wrap.
#[derive(Default)]
pub struct ContextCache {
    views: Mutex<HashMap<usize, (ContextRef, ContextRef)>>,
}

impl ContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scoped(&self, physical: &ContextRef, environment: Environment) -> ContextRef {
        let key = Arc::as_ptr(physical) as *const () as usize;
        let mut views = self.views.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (_, view) = views.entry(key).or_insert_with(|| {
            debug!(%environment, "wrapping physical context");
            let view: ContextRef = Arc::new(ScopedContext::new(physical.clone(), environment));
            // The physical context is retained so its address cannot be reused while cached.
            (physical.clone(), view)
        });
        view.clone()
    }

    pub fn len(&self) -> usize {
        self.views.lock().map(|views| views.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut views = self.views.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        views.clear();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::{BuildContext, PluginContext};
    use crate::core::error::{Error, ErrorKind};
    use crate::plugin::HookFuture;
    use crate::plugin::types::{EmittedChunk, LoadRequest, ModuleInfo, ResolveOptions, ResolvedId};

    /// In-memory physical context keyed by namespaced ids.
    #[derive(Default)]
    pub struct FakeContext {
        pub modules: BTreeMap<String, ModuleInfo>,
        pub resolutions: BTreeMap<(String, Option<String>), String>,
        pub loads: Mutex<Vec<String>>,
        pub emitted: Mutex<Vec<EmittedChunk>>,
        pub watched: Mutex<Vec<String>>,
    }

    impl FakeContext {
        pub fn with_module(mut self, info: ModuleInfo) -> Self {
            self.modules.insert(info.id.clone(), info);
            self
        }

        pub fn with_resolution(mut self, source: &str, importer: Option<&str>, id: &str) -> Self {
            self.resolutions.insert(
                (source.to_string(), importer.map(str::to_string)),
                id.to_string(),
            );
            self
        }
    }

    impl PluginContext for FakeContext {
        fn load<'a>(&'a self, request: LoadRequest) -> HookFuture<'a, ModuleInfo> {
            Box::pin(async move {
                self.loads.lock().expect("loads").push(request.id.clone());
                self.modules.get(&request.id).cloned().ok_or_else(|| {
                    Error::new(ErrorKind::NotFound)
                        .with_message("no such module")
                        .with_id(request.id)
                })
            })
        }

        fn get_module_info(&self, id: &str) -> Result<Option<ModuleInfo>, Error> {
            Ok(self.modules.get(id).cloned())
        }

        fn resolve<'a>(
            &'a self,
            source: &'a str,
            importer: Option<&'a str>,
            _options: ResolveOptions,
        ) -> HookFuture<'a, Option<ResolvedId>> {
            Box::pin(async move {
                let key = (source.to_string(), importer.map(str::to_string));
                Ok(self.resolutions.get(&key).map(ResolvedId::new))
            })
        }

        fn add_watch_file(&self, id: &str) {
            self.watched.lock().expect("watched").push(id.to_string());
        }

        fn warn(&self, _message: &str) {}

        fn privileged(&self) -> Option<&dyn BuildContext> {
            Some(self)
        }
    }

    impl BuildContext for FakeContext {
        fn emit_chunk(&self, chunk: EmittedChunk) -> Result<String, Error> {
            let mut emitted = self.emitted.lock().expect("emitted");
            emitted.push(chunk);
            Ok(format!("ref{}", emitted.len()))
        }

        fn get_file_name(&self, reference_id: &str) -> Result<String, Error> {
            Ok(format!("{reference_id}.js"))
        }
    }
}
