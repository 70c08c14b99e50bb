//! Purpose: Structured stderr notices for non-fatal build events.
//! Exports: `Notice`, `NoticeKind`, `notice_json`.
//! Role: Turns extension warnings and suspicious split results into one JSON line each on stderr.
//! Invariants: Notices never alter stdout payloads or the exit code.
//! Invariants: Optional fields are omitted, never null; new fields are additive.
use serde::Serialize;
use serde_json::{Value, json};

use crate::core::module_id::{self, Environment};
use crate::engine::BuildWarning;
use crate::plugin::splitter::ClientReference;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Reported by an extension through `PluginContext::warn`.
    ExtensionWarning,
    /// A boundary module whose client unit has no exports to reference.
    EmptyBoundary,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub time: String,
    pub cmd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    /// Raw module id the notice is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub message: String,
}

impl Notice {
    pub fn extension_warning(warning: &BuildWarning, cmd: &str, time: String) -> Self {
        // Wrapped extensions are named `<name>:<environment>`.
        let environment = warning
            .plugin
            .rsplit_once(':')
            .and_then(|(_, tag)| Environment::parse(tag));
        Self {
            kind: NoticeKind::ExtensionWarning,
            time,
            cmd: cmd.to_string(),
            plugin: Some(warning.plugin.clone()),
            environment,
            module: None,
            message: warning.message.clone(),
        }
    }

    pub fn empty_boundary(reference: &ClientReference, cmd: &str, time: String) -> Self {
        let module = module_id::decode(&reference.module_id)
            .map(|parsed| parsed.raw_id)
            .unwrap_or_else(|_| reference.module_id.clone());
        Self {
            kind: NoticeKind::EmptyBoundary,
            time,
            cmd: cmd.to_string(),
            plugin: None,
            environment: Some(Environment::Client),
            module: Some(module),
            message: "boundary module exports nothing; its client unit is never referenced".to_string(),
        }
    }

    /// Short origin label for terminal output.
    pub fn origin(&self) -> &str {
        self.plugin
            .as_deref()
            .or(self.module.as_deref())
            .unwrap_or(self.cmd.as_str())
    }
}

pub fn notice_json(notice: &Notice) -> Value {
    json!({ "notice": notice })
}
