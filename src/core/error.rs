//! Purpose: Single error type for every build failure surfaced to callers.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: Shared by the codec, wrapper, splitter, engine, and CLI.
//! Invariants: `Invariant` marks defects in the wrapping layer or an extension's contract compliance.
//! Invariants: Errors are cheap to clone so shared plugin futures can carry them.
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Invariant,
    Usage,
    UnresolvedImport,
    UnsupportedHook,
    ExportResolution,
    NotFound,
    Io,
}

#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    id: Option<String>,
    specifier: Option<String>,
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            id: None,
            specifier: None,
            source: None,
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invariant).with_message(message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Module id the failure is attached to (the importer for unresolved imports).
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn specifier(&self) -> Option<&str> {
        self.specifier.as_deref()
    }

    pub fn is_fatal_invariant(&self) -> bool {
        self.kind == ErrorKind::Invariant
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_specifier(mut self, specifier: impl Into<String>) -> Self {
        self.specifier = Some(specifier.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(specifier) = &self.specifier {
            write!(f, " (specifier: {specifier:?})")?;
        }
        if let Some(id) = &self.id {
            write!(f, " (id: {id:?})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Io => 4,
        ErrorKind::UnresolvedImport => 5,
        ErrorKind::ExportResolution => 6,
        ErrorKind::UnsupportedHook => 7,
        ErrorKind::Invariant => 70,
    }
}
