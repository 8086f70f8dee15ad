//! Functions for working with [Path].

pub use etcetera::home_dir;

use std::{
    borrow::Cow,
    path::{Component, Path, PathBuf},
};

/// Expands tilde `~` into users home directory if available, otherwise returns the path
/// unchanged.
///
/// The tilde will only be expanded when present as the first component of the path
/// and only slash follows it.
pub fn expand_tilde<'a, P>(path: P) -> Cow<'a, Path>
where
    P: Into<Cow<'a, Path>>,
{
    let path = path.into();
    let mut components = path.components();
    if let Some(Component::Normal(c)) = components.next() {
        if c == "~" {
            if let Ok(mut buf) = home_dir() {
                buf.push(components);
                return Cow::Owned(buf);
            }
        }
    }

    path
}

/// Walks upward from `dir`, returning the first ancestor (including `dir`
/// itself) that contains any of `markers` as a direct child.
pub fn find_ancestor_with_markers(dir: &Path, markers: &[String]) -> Option<PathBuf> {
    for ancestor in dir.ancestors() {
        if markers.iter().any(|marker| ancestor.join(marker).exists()) {
            return Some(ancestor.to_path_buf());
        }
    }
    None
}

fn library_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    let home = home_dir().ok();

    match std::env::var_os("RUSTUP_HOME") {
        Some(rustup) => roots.push(PathBuf::from(rustup).join("toolchains")),
        None => {
            if let Some(home) = &home {
                roots.push(home.join(".rustup/toolchains"));
            }
        }
    }

    let cargo_home = std::env::var_os("CARGO_HOME")
        .map(PathBuf::from)
        .or_else(|| home.as_ref().map(|home| home.join(".cargo")));
    if let Some(cargo_home) = cargo_home {
        roots.push(cargo_home.join("registry/src"));
        roots.push(cargo_home.join("git/checkouts"));
    }

    roots
}

/// Whether `path` lives inside an installed toolchain or a cached dependency
/// checkout. Such files never define a workspace of their own.
pub fn is_library_path(path: &Path) -> bool {
    let roots = library_roots();
    roots.iter().any(|root| path.starts_with(root))
}

/// Splits an `scp://user@host//abs/path` style string into its host part and
/// the filesystem path after the double slash. Anything else passes through
/// with no host.
pub fn split_remote(path: &str) -> (Option<&str>, &str) {
    let Some(rest) = path.strip_prefix("scp://") else {
        return (None, path);
    };
    match rest.find('/') {
        Some(idx) => (Some(&rest[..idx]), &rest[idx..]),
        None => (Some(rest), "/"),
    }
}

/// Inverse of [`split_remote`]: prefixes an absolute path with its scp host.
pub fn join_remote(host: &str, path: &str) -> String {
    format!("scp://{}/{}", host, path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_split_and_join() {
        let (host, path) = split_remote("scp://me@devbox//home/me/src/main.rs");
        assert_eq!(host, Some("me@devbox"));
        assert_eq!(path, "/home/me/src/main.rs");
        assert_eq!(
            join_remote("me@devbox", "/home/me/src/main.rs"),
            "scp://me@devbox//home/me/src/main.rs"
        );

        assert_eq!(split_remote("/plain/path.rs"), (None, "/plain/path.rs"));
    }

    #[test]
    fn marker_walk_finds_nearest_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("pkg/src/deep")).unwrap();
        std::fs::write(root.join("pkg/Cargo.toml"), "[package]").unwrap();

        let found = find_ancestor_with_markers(
            &root.join("pkg/src/deep"),
            &["Cargo.toml".to_string()],
        );
        assert_eq!(found, Some(root.join("pkg")));

        let missing =
            find_ancestor_with_markers(&root.join("pkg/src/deep"), &["go.mod".to_string()]);
        assert_eq!(missing, None);
    }
}
