// Physical per-extension context handed to hooks by the engine.
use std::sync::{Arc, Weak};

use tracing::warn;

use super::{BuildWarning, EngineShared, lock, short_hash};
use crate::core::error::{Error, ErrorKind};
use crate::plugin::types::{EmittedChunk, LoadRequest, ModuleInfo, ResolveOptions, ResolvedId};
use crate::plugin::{BuildContext, HookFuture, PluginContext};

pub(crate) struct EngineContext {
    shared: Weak<EngineShared>,
    plugin_index: usize,
}

impl EngineContext {
    pub(crate) fn new(shared: Weak<EngineShared>, plugin_index: usize) -> Self {
        Self {
            shared,
            plugin_index,
        }
    }

    fn shared(&self) -> Result<Arc<EngineShared>, Error> {
        self.shared
            .upgrade()
            .ok_or_else(|| Error::invariant("build context used after its build finished"))
    }

    fn plugin_name(&self) -> String {
        let Some(shared) = self.shared.upgrade() else {
            return String::new();
        };
        let name = shared
            .plugins
            .get(self.plugin_index)
            .map(|plugin| plugin.name().to_string())
            .unwrap_or_default();
        name
    }
}

impl PluginContext for EngineContext {
    fn load<'a>(&'a self, request: LoadRequest) -> HookFuture<'a, ModuleInfo> {
        Box::pin(async move {
            let shared = self.shared()?;
            if request.resolve_dependencies {
                shared.ensure_fetched_with_dependencies(&request.id).await?;
            } else {
                shared.ensure_fetched(&request.id).await?;
            }
            let info = lock(&shared.graph).module_info(&request.id);
            info.ok_or_else(|| {
                Error::new(ErrorKind::NotFound)
                    .with_message("module was fetched but has no record")
                    .with_id(request.id)
            })
        })
    }

    fn get_module_info(&self, id: &str) -> Result<Option<ModuleInfo>, Error> {
        let shared = self.shared()?;
        let info = lock(&shared.graph).module_info(id);
        Ok(info)
    }

    fn resolve<'a>(
        &'a self,
        source: &'a str,
        importer: Option<&'a str>,
        mut options: ResolveOptions,
    ) -> HookFuture<'a, Option<ResolvedId>> {
        Box::pin(async move {
            let shared = self.shared()?;
            if options.skip_self {
                options
                    .skipped
                    .push((self.plugin_index, source.to_string(), importer.map(str::to_string)));
            }
            shared.run_resolve(source, importer, options).await
        })
    }

    fn add_watch_file(&self, id: &str) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.watch_files).insert(id.to_string());
        }
    }

    fn warn(&self, message: &str) {
        let plugin = self.plugin_name();
        warn!(%plugin, "{message}");
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.warnings).push(BuildWarning {
                plugin,
                message: message.to_string(),
            });
        }
    }

    fn privileged(&self) -> Option<&dyn BuildContext> {
        Some(self)
    }
}

impl BuildContext for EngineContext {
    fn emit_chunk(&self, chunk: EmittedChunk) -> Result<String, Error> {
        let shared = self.shared()?;
        let reference_id = short_hash(chunk.id.as_bytes());
        let reference_id = lock(&shared.graph).add_emitted(reference_id, chunk)?;
        Ok(reference_id)
    }

    fn get_file_name(&self, reference_id: &str) -> Result<String, Error> {
        let shared = self.shared()?;
        let file_names = lock(&shared.file_names);
        file_names.get(reference_id).cloned().ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message("no file name for reference; file names exist once output generation starts")
                .with_id(reference_id)
        })
    }
}
