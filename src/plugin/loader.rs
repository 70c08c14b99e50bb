//! Purpose: Read module sources from disk for both environments.
//! Exports: `SourceLoader`, `SOURCE_LOADER_NAME`.
//! Role: Raw extension ordered last; answers `load` for any namespaced file id nobody else served.
//! Invariants: Virtual raw ids (leading `\0`) are never read from disk.
use std::io::ErrorKind as IoErrorKind;

use tracing::debug;

use super::types::SourceDescription;
use super::{ContextRef, HookFuture, HookKind, Plugin};
use crate::core::error::{Error, ErrorKind};
use crate::core::module_id::{self, ID_PREFIX};

pub const SOURCE_LOADER_NAME: &str = "source-loader";

#[derive(Debug, Default)]
pub struct SourceLoader;

impl SourceLoader {
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for SourceLoader {
    fn name(&self) -> &str {
        SOURCE_LOADER_NAME
    }

    fn hooks(&self) -> &[HookKind] {
        &[HookKind::Load]
    }

    fn load<'a>(&'a self, ctx: &'a ContextRef, id: &'a str) -> HookFuture<'a, Option<SourceDescription>> {
        Box::pin(async move {
            let parsed = module_id::decode(id)?;
            if parsed.raw_id.starts_with(ID_PREFIX) {
                return Ok(None);
            }
            let code = tokio::fs::read_to_string(&parsed.raw_id).await.map_err(|err| {
                let kind = match err.kind() {
                    IoErrorKind::NotFound => ErrorKind::NotFound,
                    _ => ErrorKind::Io,
                };
                Error::new(kind)
                    .with_message("failed to read module source")
                    .with_id(parsed.raw_id.clone())
                    .with_source(err)
            })?;
            debug!(path = %parsed.raw_id, environment = %parsed.environment, bytes = code.len(), "loaded source");
            ctx.add_watch_file(&parsed.raw_id);
            Ok(Some(SourceDescription::new(code)))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::SourceLoader;
    use crate::core::error::ErrorKind;
    use crate::core::module_id::{Environment, encode};
    use crate::plugin::context::testing::FakeContext;
    use crate::plugin::{ContextRef, Plugin};

    #[tokio::test]
    async fn reads_file_and_registers_watch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.js");
        std::fs::write(&path, "export const a = 1;\n").expect("write");
        let raw = path.to_string_lossy().to_string();

        let fake = Arc::new(FakeContext::default());
        let ctx: ContextRef = fake.clone();
        let loaded = SourceLoader::new()
            .load(&ctx, &encode(&raw, Environment::Client).expect("encode"))
            .await
            .expect("load")
            .expect("source");
        assert_eq!(loaded.code, "export const a = 1;\n");
        assert_eq!(fake.watched.lock().expect("watched").as_slice(), [raw]);
    }

    #[tokio::test]
    async fn skips_virtual_modules() {
        let ctx: ContextRef = Arc::new(FakeContext::default());
        let id = encode("\0client-ref-helper", Environment::Server).expect("encode");
        let loaded = SourceLoader::new().load(&ctx, &id).await.expect("load");
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let raw = dir.path().join("missing.js").to_string_lossy().to_string();
        let ctx: ContextRef = Arc::new(FakeContext::default());
        let err = SourceLoader::new()
            .load(&ctx, &encode(&raw, Environment::Server).expect("encode"))
            .await
            .expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.id(), Some(raw.as_str()));
    }
}
