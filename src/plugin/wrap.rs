//! Purpose: Replay one extension's hooks inside a single environment of the doubled pipeline.
//! Exports: `WrappedPlugin`, `wrap_plugin`, `anchor_boundary_splitter`.
//! Role: Hook interception layer; decodes ids, filters by environment, re-encodes results.
//! Invariants: A hook whose acting environment differs from the wrapper's is skipped, never invoked.
//! Invariants: Wrapping fails up front when an extension declares a hook outside the allow-list.
//! Invariants: After any `options` mutation the boundary splitter is present exactly once, first.
use std::sync::Arc;

use tracing::debug;

use super::context::ContextCache;
use super::splitter::BOUNDARY_SPLITTER_NAME;
use super::types::{
    Bundle, CachedModule, FileUrlRequest, RenderedChunk, ResolveOptions, ResolvedId, SourceDescription,
};
use super::{ContextRef, HookFuture, HookKind, InputOptions, Plugin, PluginOption, flatten_plugins, same_plugin};
use crate::core::error::{Error, ErrorKind};
use crate::core::module_id::{self, Environment};

pub struct WrappedPlugin {
    inner: Arc<dyn Plugin>,
    environment: Environment,
    name: String,
    contexts: ContextCache,
}

pub fn wrap_plugin(plugin: Arc<dyn Plugin>, environment: Environment) -> Result<Arc<dyn Plugin>, Error> {
    let unsupported: Vec<&str> = plugin
        .hooks()
        .iter()
        .filter(|hook| !hook.is_wrappable())
        .map(|hook| hook.as_str())
        .collect();
    if !unsupported.is_empty() {
        return Err(unsupported_hooks(plugin.name(), &unsupported));
    }
    let name = format!("{}:{environment}", plugin.name());
    Ok(Arc::new(WrappedPlugin {
        inner: plugin,
        environment,
        name,
        contexts: ContextCache::new(),
    }))
}

fn unsupported_hooks(plugin: &str, hooks: &[&str]) -> Error {
    Error::new(ErrorKind::UnsupportedHook)
        .with_message(format!("extension {plugin} has unsupported hooks: {}", hooks.join(", ")))
        .with_hint("Only build_start, build_end, options, resolve_id, load, transform, should_transform_cached_module, render_chunk and generate_bundle can be replayed per environment.")
}

impl WrappedPlugin {
    fn scoped(&self, ctx: &ContextRef) -> ContextRef {
        self.contexts.scoped(ctx, self.environment)
    }

    // Decodes `id` and returns its raw form when it belongs to this wrapper's environment.
    fn own_raw_id(&self, id: &str) -> Result<Option<String>, Error> {
        let parsed = module_id::decode(id)?;
        if parsed.environment != self.environment {
            return Ok(None);
        }
        Ok(Some(parsed.raw_id))
    }
}

impl Plugin for WrappedPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> &[HookKind] {
        self.inner.hooks()
    }

    fn options<'a>(&'a self, options: InputOptions) -> HookFuture<'a, Option<InputOptions>> {
        Box::pin(async move {
            let InputOptions { input, plugins } = options;
            let before = flatten_plugins(plugins).await?;
            let forwarded = InputOptions {
                input,
                plugins: before.iter().cloned().map(PluginOption::Plugin).collect(),
            };
            let Some(updated) = self.inner.options(forwarded).await? else {
                return Ok(None);
            };
            let InputOptions { input, plugins } = updated;
            let after = flatten_plugins(plugins).await?;
            let mut plugins = Vec::with_capacity(after.len());
            for plugin in after {
                if before.iter().any(|existing| same_plugin(existing, &plugin)) {
                    plugins.push(plugin);
                } else {
                    debug!(plugin = plugin.name(), environment = %self.environment, "wrapping injected extension");
                    plugins.push(wrap_plugin(plugin, self.environment)?);
                }
            }
            let plugins = anchor_boundary_splitter(plugins)?;
            Ok(Some(InputOptions {
                input,
                plugins: plugins.into_iter().map(PluginOption::Plugin).collect(),
            }))
        })
    }

    fn build_start<'a>(&'a self, ctx: &'a ContextRef) -> HookFuture<'a, ()> {
        Box::pin(async move {
            let scoped = self.scoped(ctx);
            self.inner.build_start(&scoped).await
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
            let (acting, source, importer) = match importer {
                None => {
                    let parsed = module_id::decode(source)?;
                    (parsed.environment, parsed.raw_id, None)
                }
                Some(importer) => {
                    let parsed = module_id::decode(importer)?;
                    (parsed.environment, source.to_string(), Some(parsed.raw_id))
                }
            };
            if acting != self.environment {
                return Ok(None);
            }
            let scoped = self.scoped(ctx);
            let resolved = self
                .inner
                .resolve_id(&scoped, &source, importer.as_deref(), options)
                .await?;
            let Some(resolved) = resolved else {
                return Ok(None);
            };
            debug!(plugin = %self.name, %source, id = %resolved.id, "resolved");
            let id = module_id::encode(&resolved.id, self.environment)?;
            Ok(Some(ResolvedId { id, ..resolved }))
        })
    }

    fn load<'a>(&'a self, ctx: &'a ContextRef, id: &'a str) -> HookFuture<'a, Option<SourceDescription>> {
        Box::pin(async move {
            let Some(raw_id) = self.own_raw_id(id)? else {
                return Ok(None);
            };
            let scoped = self.scoped(ctx);
            self.inner.load(&scoped, &raw_id).await
        })
    }

    fn transform<'a>(
        &'a self,
        ctx: &'a ContextRef,
        code: &'a str,
        id: &'a str,
    ) -> HookFuture<'a, Option<SourceDescription>> {
        Box::pin(async move {
            let Some(raw_id) = self.own_raw_id(id)? else {
                return Ok(None);
            };
            let scoped = self.scoped(ctx);
            self.inner.transform(&scoped, code, &raw_id).await
        })
    }

    fn should_transform_cached_module<'a>(
        &'a self,
        ctx: &'a ContextRef,
        module: &'a CachedModule,
    ) -> HookFuture<'a, Option<bool>> {
        Box::pin(async move {
            let Some(raw_id) = self.own_raw_id(&module.id)? else {
                return Ok(None);
            };
            let mut resolved_sources = std::collections::BTreeMap::new();
            for (source, resolved) in &module.resolved_sources {
                let parsed = module_id::decode(&resolved.id)?;
                if parsed.environment != self.environment {
                    return Err(Error::invariant(format!(
                        "cached module resolved sources contain a {} module inside the {} environment",
                        parsed.environment, self.environment
                    ))
                    .with_id(resolved.id.clone())
                    .with_specifier(source.clone()));
                }
                resolved_sources.insert(
                    source.clone(),
                    ResolvedId {
                        id: parsed.raw_id,
                        ..resolved.clone()
                    },
                );
            }
            let translated = CachedModule {
                id: raw_id,
                resolved_sources,
                ..module.clone()
            };
            let scoped = self.scoped(ctx);
            self.inner.should_transform_cached_module(&scoped, &translated).await
        })
    }

    fn build_end<'a>(&'a self, ctx: &'a ContextRef, error: Option<&'a Error>) -> HookFuture<'a, ()> {
        Box::pin(async move {
            let scoped = self.scoped(ctx);
            let result = self.inner.build_end(&scoped, error).await;
            self.contexts.clear();
            result
        })
    }

    // Declared overrides are rejected at wrap time; an answer here comes from an undeclared one.
    fn resolve_file_url(&self, ctx: &ContextRef, request: &FileUrlRequest) -> Result<Option<String>, Error> {
        let Some(raw_id) = self.own_raw_id(&request.module_id)? else {
            return Ok(None);
        };
        let scoped = self.scoped(ctx);
        let translated = FileUrlRequest {
            module_id: raw_id,
            reference_id: request.reference_id.clone(),
            file_name: request.file_name.clone(),
        };
        match self.inner.resolve_file_url(&scoped, &translated)? {
            Some(_) => Err(unsupported_hooks(self.inner.name(), &[HookKind::ResolveFileUrl.as_str()])
                .with_id(request.module_id.clone())),
            None => Ok(None),
        }
    }

    fn render_chunk<'a>(
        &'a self,
        ctx: &'a ContextRef,
        code: &'a str,
        chunk: &'a RenderedChunk,
    ) -> HookFuture<'a, Option<String>> {
        Box::pin(async move {
            let scoped = self.scoped(ctx);
            let view = chunk.restricted();
            self.inner.render_chunk(&scoped, code, &view).await
        })
    }

    fn generate_bundle<'a>(&'a self, ctx: &'a ContextRef, _bundle: &'a Bundle) -> HookFuture<'a, ()> {
        Box::pin(async move {
            let scoped = self.scoped(ctx);
            let restricted = Bundle::restricted();
            let result = self.inner.generate_bundle(&scoped, &restricted).await;
            self.contexts.clear();
            result
        })
    }
}

/// Move the boundary splitter to the front; fatal when an extension dropped it.
pub fn anchor_boundary_splitter(plugins: Vec<Arc<dyn Plugin>>) -> Result<Vec<Arc<dyn Plugin>>, Error> {
    let mut splitter: Option<Arc<dyn Plugin>> = None;
    let mut rest = Vec::with_capacity(plugins.len());
    for plugin in plugins {
        if plugin.name() != BOUNDARY_SPLITTER_NAME {
            rest.push(plugin);
            continue;
        }
        match &splitter {
            None => splitter = Some(plugin),
            Some(existing) if same_plugin(existing, &plugin) => {}
            Some(_) => {
                return Err(Error::invariant("more than one boundary splitter in the pipeline"));
            }
        }
    }
    let splitter = splitter.ok_or_else(|| {
        Error::invariant("boundary splitter not found in the pipeline")
            .with_hint("An options hook removed the boundary splitter from the extension list.")
    })?;
    let mut anchored = Vec::with_capacity(rest.len() + 1);
    anchored.push(splitter);
    anchored.extend(rest);
    Ok(anchored)
}
