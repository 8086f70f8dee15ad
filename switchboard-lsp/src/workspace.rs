//! Mapping a file to the workspace its language server should be rooted in.
//!
//! The generic rule walks upward from the file's directory looking for any
//! of the language's marker files. `Cargo.toml` gets an ecosystem-specific
//! resolver on top: the nearest manifest may belong to a sub-crate, so
//! `cargo metadata` is asked for the real workspace root and the answer is
//! memoized per manifest. Files under installed toolchains or dependency
//! caches never root a workspace at all.

use crate::lsp::Url;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use switchboard_stdx::path::{find_ancestor_with_markers, is_library_path};

/// Per-ecosystem resolvers are memoized; the cache is cleared wholesale
/// once it holds this many manifests.
const CARGO_CACHE_CAP: usize = 64;

#[derive(Debug, Default)]
pub struct WorkspaceResolver {
    cargo_roots: HashMap<PathBuf, Option<PathBuf>>,
}

impl WorkspaceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The workspace URI for `file`, or `None` when the file does not belong
    /// to any workspace (no marker found, or a library path).
    pub fn resolve(&mut self, file: &Path, markers: &[String]) -> Option<Url> {
        if is_library_path(file) {
            return None;
        }

        let dir = file.parent()?;
        let root = find_ancestor_with_markers(dir, markers)?;

        let root = if root.join("Cargo.toml").is_file() {
            self.cargo_workspace_root(&root.join("Cargo.toml"))
                .unwrap_or(root)
        } else {
            root
        };

        Url::from_file_path(root).ok()
    }

    fn cargo_workspace_root(&mut self, manifest: &Path) -> Option<PathBuf> {
        if let Some(cached) = self.cargo_roots.get(manifest) {
            return cached.clone();
        }

        let resolved = query_cargo_workspace_root(manifest);
        if self.cargo_roots.len() >= CARGO_CACHE_CAP {
            self.cargo_roots.clear();
        }
        self.cargo_roots
            .insert(manifest.to_path_buf(), resolved.clone());
        resolved
    }
}

/// Asks cargo for the workspace root of `manifest`. Intentionally a blocking
/// call: metadata for an already-resolved manifest is instant and the result
/// is cached.
fn query_cargo_workspace_root(manifest: &Path) -> Option<PathBuf> {
    let output = Command::new("cargo")
        .args(["metadata", "--no-deps", "--format-version", "1", "--manifest-path"])
        .arg(manifest)
        .output()
        .ok()?;
    if !output.status.success() {
        log::debug!(
            "cargo metadata failed for {}: {}",
            manifest.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return None;
    }

    let metadata: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;
    metadata
        .get("workspace_root")
        .and_then(|root| root.as_str())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_marker_wins_without_cargo() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("proj/pkg/src")).unwrap();
        std::fs::write(root.join("proj/go.mod"), "module m").unwrap();

        let mut resolver = WorkspaceResolver::new();
        let uri = resolver
            .resolve(&root.join("proj/pkg/src/main.go"), &["go.mod".to_string()])
            .unwrap();
        assert_eq!(uri, Url::from_file_path(root.join("proj")).unwrap());
    }

    #[test]
    fn cargo_workspace_unifies_member_crates() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(
            root.join("Cargo.toml"),
            "[workspace]\nmembers = [\"a\", \"b\"]\nresolver = \"2\"\n",
        )
        .unwrap();
        for member in ["a", "b"] {
            std::fs::create_dir_all(root.join(member).join("src")).unwrap();
            std::fs::write(
                root.join(member).join("Cargo.toml"),
                format!("[package]\nname = \"{member}\"\nversion = \"0.1.0\"\nedition = \"2021\"\n"),
            )
            .unwrap();
            std::fs::write(root.join(member).join("src/lib.rs"), "").unwrap();
        }

        let markers = vec!["Cargo.toml".to_string()];
        let mut resolver = WorkspaceResolver::new();
        let a = resolver.resolve(&root.join("a/src/lib.rs"), &markers);
        let b = resolver.resolve(&root.join("b/src/lib.rs"), &markers);
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn no_marker_means_no_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("scratch")).unwrap();

        let mut resolver = WorkspaceResolver::new();
        assert!(resolver
            .resolve(&dir.path().join("scratch/lone.zig"), &["build.zig".to_string()])
            .is_none());
    }
}
