//! Functions for working with the host environment.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

/// Checks if the given environment variable is set.
pub fn env_var_is_set(env_var_name: &str) -> bool {
    std::env::var_os(env_var_name).is_some()
}

/// Checks if a binary with the given name exists.
pub fn binary_exists<T: AsRef<OsStr>>(binary_name: T) -> bool {
    which::which(binary_name).is_ok()
}

/// Attempts to find a binary of the given name. See [which](https://linux.die.net/man/1/which).
pub fn which<T: AsRef<OsStr>>(
    binary_name: T,
) -> Result<std::path::PathBuf, ExecutableNotFoundError> {
    let binary_name = binary_name.as_ref();
    which::which(binary_name).map_err(|err| ExecutableNotFoundError {
        command: binary_name.to_string_lossy().into_owned(),
        inner: err,
    })
}

/// A file living in the per-user runtime directory: `$XDG_RUNTIME_DIR` when
/// set, otherwise `/tmp` with the user name folded into the file name so two
/// users on one machine do not collide.
pub fn runtime_file(stem: &str, extension: &str) -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) => Path::new(&dir).join(format!("{stem}.{extension}")),
        None => {
            let user = std::env::var("USER").unwrap_or_else(|_| "nobody".to_string());
            PathBuf::from(format!("/tmp/{stem}-{user}.{extension}"))
        }
    }
}

#[derive(Debug)]
pub struct ExecutableNotFoundError {
    pub command: String,
    inner: which::Error,
}

impl std::fmt::Display for ExecutableNotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "command '{}' not found: {}", self.command, self.inner)
    }
}

impl std::error::Error for ExecutableNotFoundError {}
