//! Purpose: Assemble the doubled extension list for one build invocation.
//! Exports: `Affinity`, `ExtensionDescriptor`, `compose`, `Pipeline`, `PipelineBuilder`.
//! Role: Entry point for callers; the engine only ever sees the composed list.
//! Invariants: Relative order is preserved, except the boundary splitter which is anchored at index 0.
//! Invariants: Common extensions become two independently wrapped siblings (server, then client).
use std::collections::BTreeMap;
use std::sync::Arc;

use super::loader::SourceLoader;
use super::splitter::{BOUNDARY_SPLITTER_NAME, BoundarySplitter, SplitterConfig};
use super::wrap::wrap_plugin;
use super::{InputOptions, Plugin, PluginMapper, PluginOption, map_plugins};
use crate::core::error::Error;
use crate::core::module_id::Environment;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Affinity {
    Server,
    Client,
    Common,
    /// Passed through unwrapped; sees namespaced ids.
    Raw,
}

#[derive(Clone, Debug)]
pub struct ExtensionDescriptor {
    pub affinity: Affinity,
    pub plugins: PluginOption,
}

impl ExtensionDescriptor {
    pub fn new(affinity: Affinity, plugins: impl Into<PluginOption>) -> Self {
        Self {
            affinity,
            plugins: plugins.into(),
        }
    }

    pub fn server(plugins: impl Into<PluginOption>) -> Self {
        Self::new(Affinity::Server, plugins)
    }

    pub fn client(plugins: impl Into<PluginOption>) -> Self {
        Self::new(Affinity::Client, plugins)
    }

    pub fn common(plugins: impl Into<PluginOption>) -> Self {
        Self::new(Affinity::Common, plugins)
    }

    pub fn raw(plugins: impl Into<PluginOption>) -> Self {
        Self::new(Affinity::Raw, plugins)
    }
}

fn wrapper_for(environment: Environment) -> PluginMapper {
    Arc::new(move |plugin: Arc<dyn Plugin>| wrap_plugin(plugin, environment))
}

pub fn compose(descriptors: Vec<ExtensionDescriptor>) -> Result<Vec<PluginOption>, Error> {
    let mut splitter = None;
    let mut composed = Vec::with_capacity(descriptors.len() + 1);
    for descriptor in descriptors {
        match descriptor.affinity {
            Affinity::Raw => match descriptor.plugins {
                PluginOption::Plugin(plugin) if plugin.name() == BOUNDARY_SPLITTER_NAME => {
                    if splitter.is_none() {
                        splitter = Some(PluginOption::Plugin(plugin));
                    }
                }
                other => composed.push(other),
            },
            Affinity::Server => {
                composed.push(map_plugins(descriptor.plugins, wrapper_for(Environment::Server))?);
            }
            Affinity::Client => {
                composed.push(map_plugins(descriptor.plugins, wrapper_for(Environment::Client))?);
            }
            Affinity::Common => {
                composed.push(map_plugins(
                    descriptor.plugins.clone(),
                    wrapper_for(Environment::Server),
                )?);
                composed.push(map_plugins(descriptor.plugins, wrapper_for(Environment::Client))?);
            }
        }
    }
    let splitter = splitter.ok_or_else(|| {
        Error::invariant("boundary splitter missing from the extension descriptors")
            .with_hint("Pass the splitter as a raw descriptor, or build the pipeline with `Pipeline::builder()`.")
    })?;
    composed.insert(0, splitter);
    Ok(composed)
}

/// Composed extension list plus the splitter instance whose references it will record.
pub struct Pipeline {
    plugins: Vec<PluginOption>,
    splitter: Arc<BoundarySplitter>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn plugins(&self) -> &[PluginOption] {
        &self.plugins
    }

    pub fn splitter(&self) -> &Arc<BoundarySplitter> {
        &self.splitter
    }

    /// Build inputs for the engine; `input` maps entry names to namespaced ids.
    pub fn input_options(&self, input: BTreeMap<String, String>) -> InputOptions {
        InputOptions {
            input,
            plugins: self.plugins.clone(),
        }
    }
}

pub struct PipelineBuilder {
    config: SplitterConfig,
    extensions: Vec<ExtensionDescriptor>,
    source_loader: bool,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            config: SplitterConfig::default(),
            extensions: Vec::new(),
            source_loader: true,
        }
    }
}

impl PipelineBuilder {
    pub fn splitter_config(mut self, config: SplitterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn extension(mut self, descriptor: ExtensionDescriptor) -> Self {
        self.extensions.push(descriptor);
        self
    }

    /// Skip the trailing file-system loader, e.g. when another extension serves every module.
    pub fn without_source_loader(mut self) -> Self {
        self.source_loader = false;
        self
    }

    pub fn build(self) -> Result<Pipeline, Error> {
        let splitter = Arc::new(BoundarySplitter::new(self.config));
        let mut descriptors = Vec::with_capacity(self.extensions.len() + 2);
        descriptors.push(ExtensionDescriptor::raw(PluginOption::Plugin(splitter.clone())));
        descriptors.extend(self.extensions);
        if self.source_loader {
            let loader: Arc<dyn Plugin> = Arc::new(SourceLoader::new());
            descriptors.push(ExtensionDescriptor::raw(PluginOption::Plugin(loader)));
        }
        let plugins = compose(descriptors)?;
        Ok(Pipeline { plugins, splitter })
    }
}
