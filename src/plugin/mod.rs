//! Purpose: Define the pipeline-extension contract and the layers that replay it per environment.
//! Exports: `Plugin`, `HookKind`, `HookFuture`, `ContextRef`, `PluginOption`, `flatten_plugins`,
//! `map_plugins`, plus the context, wrap, compose, splitter, loader, and resolve submodules.
//! Role: Boundary between the engine and third-party extensions.
//! Invariants: Extensions list every hook they override in `Plugin::hooks`; wrapping rejects the rest.
//! Invariants: Plugin identity is `Arc` pointer identity, never name equality (except the splitter anchor).
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::core::error::Error;

pub mod compose;
pub mod context;
pub mod loader;
pub mod resolve;
pub mod splitter;
pub mod types;
pub mod wrap;

pub use context::{BuildContext, ContextCache, PluginContext, ScopedContext};
pub use types::{
    Bundle, CachedModule, EmittedChunk, FileUrlRequest, LoadRequest, Meta, ModuleInfo,
    OutputUnit, RenderedChunk, ResolveOptions, ResolvedId, SourceDescription,
};

/// Boxed async result for hooks and context operations.
pub type HookFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send + 'a>>;

pub type ContextRef = Arc<dyn PluginContext>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum HookKind {
    BuildStart,
    BuildEnd,
    Options,
    ResolveId,
    Load,
    Transform,
    ShouldTransformCachedModule,
    RenderChunk,
    GenerateBundle,
    ResolveFileUrl,
    ModuleParsed,
    ResolveDynamicImport,
    ResolveImportMeta,
    RenderStart,
    RenderError,
    RenderDynamicImport,
    Banner,
    Footer,
    Intro,
    Outro,
    AugmentChunkHash,
    OutputOptions,
    WriteBundle,
    CloseBundle,
    WatchChange,
    CloseWatcher,
}

impl HookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HookKind::BuildStart => "build_start",
            HookKind::BuildEnd => "build_end",
            HookKind::Options => "options",
            HookKind::ResolveId => "resolve_id",
            HookKind::Load => "load",
            HookKind::Transform => "transform",
            HookKind::ShouldTransformCachedModule => "should_transform_cached_module",
            HookKind::RenderChunk => "render_chunk",
            HookKind::GenerateBundle => "generate_bundle",
            HookKind::ResolveFileUrl => "resolve_file_url",
            HookKind::ModuleParsed => "module_parsed",
            HookKind::ResolveDynamicImport => "resolve_dynamic_import",
            HookKind::ResolveImportMeta => "resolve_import_meta",
            HookKind::RenderStart => "render_start",
            HookKind::RenderError => "render_error",
            HookKind::RenderDynamicImport => "render_dynamic_import",
            HookKind::Banner => "banner",
            HookKind::Footer => "footer",
            HookKind::Intro => "intro",
            HookKind::Outro => "outro",
            HookKind::AugmentChunkHash => "augment_chunk_hash",
            HookKind::OutputOptions => "output_options",
            HookKind::WriteBundle => "write_bundle",
            HookKind::CloseBundle => "close_bundle",
            HookKind::WatchChange => "watch_change",
            HookKind::CloseWatcher => "close_watcher",
        }
    }

    /// Hooks the environment wrapper knows how to replay.
    pub fn is_wrappable(self) -> bool {
        matches!(
            self,
            HookKind::BuildStart
                | HookKind::BuildEnd
                | HookKind::Options
                | HookKind::ResolveId
                | HookKind::Load
                | HookKind::Transform
                | HookKind::ShouldTransformCachedModule
                | HookKind::RenderChunk
                | HookKind::GenerateBundle
        )
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hook-based unit of build behavior.
///
/// Every hook has a no-op default. Hooks returning `Option` answer `None` for "no result",
/// letting the engine ask the next extension.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Every hook this extension overrides.
    ///
    /// Wrapping checks this list up front. An undeclared `resolve_file_url` override that answers
    /// inside a wrapper fails with `UnsupportedHook` at output time instead.
    fn hooks(&self) -> &[HookKind] {
        &[]
    }

    fn options<'a>(&'a self, options: InputOptions) -> HookFuture<'a, Option<InputOptions>> {
        let _ = options;
        Box::pin(async { Ok(None) })
    }

    fn build_start<'a>(&'a self, ctx: &'a ContextRef) -> HookFuture<'a, ()> {
        let _ = ctx;
        Box::pin(async { Ok(()) })
    }

    fn resolve_id<'a>(
        &'a self,
        ctx: &'a ContextRef,
        source: &'a str,
        importer: Option<&'a str>,
        options: &'a ResolveOptions,
    ) -> HookFuture<'a, Option<ResolvedId>> {
        let _ = (ctx, source, importer, options);
        Box::pin(async { Ok(None) })
    }

    fn load<'a>(&'a self, ctx: &'a ContextRef, id: &'a str) -> HookFuture<'a, Option<SourceDescription>> {
        let _ = (ctx, id);
        Box::pin(async { Ok(None) })
    }

    fn transform<'a>(
        &'a self,
        ctx: &'a ContextRef,
        code: &'a str,
        id: &'a str,
    ) -> HookFuture<'a, Option<SourceDescription>> {
        let _ = (ctx, code, id);
        Box::pin(async { Ok(None) })
    }

    fn should_transform_cached_module<'a>(
        &'a self,
        ctx: &'a ContextRef,
        module: &'a CachedModule,
    ) -> HookFuture<'a, Option<bool>> {
        let _ = (ctx, module);
        Box::pin(async { Ok(None) })
    }

    fn build_end<'a>(&'a self, ctx: &'a ContextRef, error: Option<&'a Error>) -> HookFuture<'a, ()> {
        let _ = (ctx, error);
        Box::pin(async { Ok(()) })
    }

    fn resolve_file_url(&self, ctx: &ContextRef, request: &FileUrlRequest) -> Result<Option<String>, Error> {
        let _ = (ctx, request);
        Ok(None)
    }

    fn render_chunk<'a>(
        &'a self,
        ctx: &'a ContextRef,
        code: &'a str,
        chunk: &'a RenderedChunk,
    ) -> HookFuture<'a, Option<String>> {
        let _ = (ctx, code, chunk);
        Box::pin(async { Ok(None) })
    }

    fn generate_bundle<'a>(&'a self, ctx: &'a ContextRef, bundle: &'a Bundle) -> HookFuture<'a, ()> {
        let _ = (ctx, bundle);
        Box::pin(async { Ok(()) })
    }
}

pub type SharedPluginFuture = Shared<BoxFuture<'static, Result<PluginOption, Error>>>;

/// Possibly nested, deferred, or disabled extension entries as supplied by callers.
#[derive(Clone)]
pub enum PluginOption {
    Plugin(Arc<dyn Plugin>),
    List(Vec<PluginOption>),
    Deferred(SharedPluginFuture),
    Disabled,
}

impl PluginOption {
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<PluginOption, Error>> + Send + 'static,
    {
        PluginOption::Deferred(future.boxed().shared())
    }
}

impl<P: Plugin + 'static> From<Arc<P>> for PluginOption {
    fn from(plugin: Arc<P>) -> Self {
        PluginOption::Plugin(plugin)
    }
}

impl From<Vec<PluginOption>> for PluginOption {
    fn from(list: Vec<PluginOption>) -> Self {
        PluginOption::List(list)
    }
}

impl fmt::Debug for PluginOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginOption::Plugin(plugin) => f.debug_tuple("Plugin").field(&plugin.name()).finish(),
            PluginOption::List(list) => f.debug_tuple("List").field(list).finish(),
            PluginOption::Deferred(_) => f.write_str("Deferred"),
            PluginOption::Disabled => f.write_str("Disabled"),
        }
    }
}

/// Build inputs visible to `options` hooks: named entries (namespaced ids) and extensions.
#[derive(Clone, Debug, Default)]
pub struct InputOptions {
    pub input: std::collections::BTreeMap<String, String>,
    pub plugins: Vec<PluginOption>,
}

pub fn same_plugin(a: &Arc<dyn Plugin>, b: &Arc<dyn Plugin>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Resolve nested lists and deferred entries into the ordered list of extensions.
pub async fn flatten_plugins(options: Vec<PluginOption>) -> Result<Vec<Arc<dyn Plugin>>, Error> {
    let mut plugins = Vec::new();
    let mut stack: Vec<PluginOption> = options.into_iter().rev().collect();
    while let Some(option) = stack.pop() {
        match option {
            PluginOption::Plugin(plugin) => plugins.push(plugin),
            PluginOption::List(list) => stack.extend(list.into_iter().rev()),
            PluginOption::Deferred(future) => stack.push(future.await?),
            PluginOption::Disabled => {}
        }
    }
    Ok(plugins)
}

pub type PluginMapper = Arc<dyn Fn(Arc<dyn Plugin>) -> Result<Arc<dyn Plugin>, Error> + Send + Sync>;

/// Apply `mapper` to every extension in `option`, lazily for deferred entries.
pub fn map_plugins(option: PluginOption, mapper: PluginMapper) -> Result<PluginOption, Error> {
    match option {
        PluginOption::Plugin(plugin) => Ok(PluginOption::Plugin(mapper(plugin)?)),
        PluginOption::List(list) => list
            .into_iter()
            .map(|option| map_plugins(option, mapper.clone()))
            .collect::<Result<Vec<_>, _>>()
            .map(PluginOption::List),
        PluginOption::Deferred(future) => Ok(PluginOption::deferred(async move {
            let resolved = future.await?;
            map_plugins(resolved, mapper)
        })),
        PluginOption::Disabled => Ok(PluginOption::Disabled),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::NamedPlugin;
    use super::{HookKind, Plugin, PluginMapper, PluginOption, flatten_plugins, map_plugins, same_plugin};
    use crate::core::error::{Error, ErrorKind};
    use std::sync::Arc;

    fn named(name: &str) -> Arc<dyn Plugin> {
        Arc::new(NamedPlugin::new(name))
    }

    fn names(plugins: &[Arc<dyn Plugin>]) -> Vec<String> {
        plugins.iter().map(|p| p.name().to_string()).collect()
    }

    #[tokio::test]
    async fn flatten_resolves_nesting_in_order() {
        let deferred = PluginOption::deferred(async {
            Ok(PluginOption::List(vec![
                PluginOption::Plugin(named("c")),
                PluginOption::Disabled,
                PluginOption::Plugin(named("d")),
            ]))
        });
        let options = vec![
            PluginOption::Plugin(named("a")),
            PluginOption::List(vec![PluginOption::Plugin(named("b")), deferred]),
            PluginOption::Plugin(named("e")),
        ];
        let flat = flatten_plugins(options).await.expect("flatten");
        assert_eq!(names(&flat), ["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn deferred_failure_surfaces_on_flatten() {
        let deferred = PluginOption::deferred(async {
            Err(Error::new(ErrorKind::Usage).with_message("plugin factory failed"))
        });
        let Err(err) = flatten_plugins(vec![deferred]).await else {
            panic!("deferred failure should surface");
        };
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[tokio::test]
    async fn map_applies_lazily_to_deferred_entries() {
        let mapper: PluginMapper = Arc::new(|plugin: Arc<dyn Plugin>| {
            Ok(Arc::new(NamedPlugin::new(&format!("{}!", plugin.name()))) as Arc<dyn Plugin>)
        });
        let option = PluginOption::List(vec![
            PluginOption::Plugin(named("a")),
            PluginOption::deferred(async { Ok(PluginOption::Plugin(Arc::new(NamedPlugin::new("b")) as Arc<dyn Plugin>)) }),
        ]);
        let mapped = map_plugins(option, mapper).expect("map");
        let flat = flatten_plugins(vec![mapped]).await.expect("flatten");
        assert_eq!(names(&flat), ["a!", "b!"]);
    }

    #[test]
    fn identity_is_pointer_based() {
        let a = named("same");
        let b = named("same");
        assert!(same_plugin(&a, &a.clone()));
        assert!(!same_plugin(&a, &b));
    }

    #[test]
    fn allow_list_covers_replayable_hooks_only() {
        assert!(HookKind::Transform.is_wrappable());
        assert!(HookKind::Options.is_wrappable());
        assert!(!HookKind::ResolveFileUrl.is_wrappable());
        assert!(!HookKind::ModuleParsed.is_wrappable());
        assert_eq!(HookKind::ShouldTransformCachedModule.to_string(), "should_transform_cached_module");
    }
}
