//! Purpose: Encode and decode environment-namespaced module identifiers.
//! Exports: `Environment`, `ParsedModuleId`, `encode`, `decode`, `is_namespaced`.
//! Role: The only place that knows the `\0<env>:<raw>` text format.
//! Invariants: Every id the engine sees is namespaced; decoding anything else is an invariant violation.
//! Invariants: Raw ids are opaque and never validated beyond the prefix check.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;

pub const ID_PREFIX: char = '\0';

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Server,
    Client,
}

impl Environment {
    pub const ALL: [Environment; 2] = [Environment::Server, Environment::Client];

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Server => "server",
            Environment::Client => "client",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "server" => Some(Environment::Server),
            "client" => Some(Environment::Client),
            _ => None,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedModuleId {
    pub raw_id: String,
    pub environment: Environment,
}

pub fn is_namespaced(id: &str) -> bool {
    split(id).is_some()
}

pub fn encode(raw_id: &str, environment: Environment) -> Result<String, Error> {
    if is_namespaced(raw_id) {
        return Err(Error::invariant("unexpected already namespaced id").with_id(raw_id));
    }
    Ok(format!("{ID_PREFIX}{environment}:{raw_id}"))
}

pub fn decode(id: &str) -> Result<ParsedModuleId, Error> {
    let (environment, raw_id) = split(id).ok_or_else(|| {
        Error::invariant("id is not namespaced")
            .with_id(id)
            .with_hint("Every id reaching the engine must carry a `\\0server:` or `\\0client:` prefix.")
    })?;
    Ok(ParsedModuleId {
        raw_id: raw_id.to_string(),
        environment,
    })
}

fn split(id: &str) -> Option<(Environment, &str)> {
    let rest = id.strip_prefix(ID_PREFIX)?;
    let (tag, raw_id) = rest.split_once(':')?;
    if raw_id.is_empty() {
        return None;
    }
    Some((Environment::parse(tag)?, raw_id))
}
