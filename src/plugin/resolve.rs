//! Purpose: Resolve relative and absolute file specifiers against the importer's directory.
//! Exports: `RelativeResolver`, `RESOLVE_EXTENSIONS`.
//! Role: Plain extension meant to be registered with common affinity; sees raw ids only.
//! Invariants: Bare specifiers are left to other extensions.
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use super::types::{ResolveOptions, ResolvedId};
use super::{ContextRef, HookFuture, HookKind, Plugin};

pub const RESOLVE_EXTENSIONS: &[&str] = &[".js", ".jsx", ".ts", ".tsx", ".mjs", ".cjs"];

#[derive(Debug, Default)]
pub struct RelativeResolver {
    root: Option<PathBuf>,
}

impl RelativeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve entry specifiers (no importer) relative to `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn base_dir(&self, importer: Option<&str>) -> Option<PathBuf> {
        match importer {
            Some(importer) => Path::new(importer).parent().map(Path::to_path_buf),
            None => self.root.clone(),
        }
    }
}

fn is_file_specifier(source: &str) -> bool {
    source.starts_with("./") || source.starts_with("../") || source.starts_with('/')
}

/// Lexically collapse `.` and `..` components.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn candidates(path: &Path) -> Vec<PathBuf> {
    let text = path.to_string_lossy();
    let mut out = vec![path.to_path_buf()];
    out.extend(RESOLVE_EXTENSIONS.iter().map(|ext| PathBuf::from(format!("{text}{ext}"))));
    out.extend(RESOLVE_EXTENSIONS.iter().map(|ext| path.join(format!("index{ext}"))));
    out
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

impl Plugin for RelativeResolver {
    fn name(&self) -> &str {
        "relative-resolver"
    }

    fn hooks(&self) -> &[HookKind] {
        &[HookKind::ResolveId]
    }

    fn resolve_id<'a>(
        &'a self,
        _ctx: &'a ContextRef,
        source: &'a str,
        importer: Option<&'a str>,
        _options: &'a ResolveOptions,
    ) -> HookFuture<'a, Option<ResolvedId>> {
        Box::pin(async move {
            if !is_file_specifier(source) {
                return Ok(None);
            }
            let joined = match (source.starts_with('/'), self.base_dir(importer)) {
                (true, _) => PathBuf::from(source),
                (false, Some(base)) => base.join(source),
                (false, None) => return Ok(None),
            };
            let target = normalize(&joined);
            for candidate in candidates(&target) {
                if is_file(&candidate).await {
                    let id = candidate.to_string_lossy().to_string();
                    debug!(%source, %id, "resolved relative specifier");
                    return Ok(Some(ResolvedId {
                        resolved_by: self.name().to_string(),
                        ..ResolvedId::new(id)
                    }));
                }
            }
            Ok(None)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::{RelativeResolver, normalize};
    use crate::plugin::context::testing::FakeContext;
    use crate::plugin::types::ResolveOptions;
    use crate::plugin::{ContextRef, Plugin};

    #[test]
    fn normalize_collapses_dots() {
        assert_eq!(normalize(Path::new("/src/app/../lib/./a.js")), Path::new("/src/lib/a.js"));
    }

    #[tokio::test]
    async fn tries_extensions_and_index_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("widgets")).expect("mkdir");
        std::fs::write(src.join("a.tsx"), "").expect("write");
        std::fs::write(src.join("widgets/index.js"), "").expect("write");
        let importer = src.join("index.js").to_string_lossy().to_string();

        let ctx: ContextRef = Arc::new(FakeContext::default());
        let resolver = RelativeResolver::new();
        let options = ResolveOptions::default();

        let a = resolver
            .resolve_id(&ctx, "./a", Some(&importer), &options)
            .await
            .expect("resolve")
            .expect("resolved");
        assert_eq!(Path::new(&a.id), src.join("a.tsx"));

        let widgets = resolver
            .resolve_id(&ctx, "./widgets", Some(&importer), &options)
            .await
            .expect("resolve")
            .expect("resolved");
        assert_eq!(Path::new(&widgets.id), src.join("widgets/index.js"));

        let missing = resolver
            .resolve_id(&ctx, "./nope", Some(&importer), &options)
            .await
            .expect("resolve");
        assert!(missing.is_none());

        let bare = resolver
            .resolve_id(&ctx, "react", Some(&importer), &options)
            .await
            .expect("resolve");
        assert!(bare.is_none());
    }

    #[tokio::test]
    async fn entries_resolve_against_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("main.js"), "").expect("write");
        let ctx: ContextRef = Arc::new(FakeContext::default());
        let resolver = RelativeResolver::with_root(dir.path());
        let resolved = resolver
            .resolve_id(&ctx, "./main", None, &ResolveOptions::default())
            .await
            .expect("resolve")
            .expect("resolved");
        assert_eq!(Path::new(&resolved.id), dir.path().join("main.js"));
    }
}
