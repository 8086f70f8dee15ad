//! The language table: which server to launch for a file, which markers
//! define its workspace, and where its tree-sitter grammar and queries live.
//!
//! A built-in table covers the common toolchains; a user `languages.json`
//! next to the rest of the daemon's configuration can override entries or
//! add new languages.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// Key used everywhere a "language" is referred to: client pooling,
    /// indexing counters, grammar lookup.
    pub language: String,
    pub command: String,
    pub args: Vec<String>,
    /// `languageId` sent in didOpen; usually equals `language`.
    pub language_id: String,
    /// Matched against file name suffixes, dot included.
    pub file_extensions: Vec<String>,
    /// File names that mark a workspace root when found in an ancestor
    /// directory.
    pub workspace_markers: Vec<String>,
    /// Shared object with a `tree_sitter_<language>` entry point; built-in
    /// languages carry their grammar in the binary instead.
    pub grammar: Option<PathBuf>,
    /// Directory holding `symbols.scm`, `folds.scm`, `textobjects.scm`,
    /// `highlights.scm` for this language.
    pub queries: Option<PathBuf>,
}

impl LanguageConfig {
    fn builtin(
        language: &str,
        command: &str,
        args: &[&str],
        extensions: &[&str],
        markers: &[&str],
    ) -> Self {
        Self {
            language: language.to_string(),
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            language_id: language.to_string(),
            file_extensions: extensions.iter().map(|s| s.to_string()).collect(),
            workspace_markers: markers.iter().map(|s| s.to_string()).collect(),
            grammar: None,
            queries: None,
        }
    }
}

pub fn builtin_configs() -> Vec<LanguageConfig> {
    vec![
        LanguageConfig::builtin("rust", "rust-analyzer", &[], &[".rs"], &["Cargo.toml"]),
        LanguageConfig::builtin(
            "python",
            "pyright-langserver",
            &["--stdio"],
            &[".py"],
            &["pyproject.toml", "setup.py"],
        ),
        LanguageConfig::builtin(
            "typescript",
            "typescript-language-server",
            &["--stdio"],
            &[".ts", ".tsx"],
            &["package.json", "tsconfig.json"],
        ),
        LanguageConfig::builtin(
            "javascript",
            "typescript-language-server",
            &["--stdio"],
            &[".js", ".jsx"],
            &["package.json", "tsconfig.json"],
        ),
        LanguageConfig::builtin("go", "gopls", &[], &[".go"], &["go.mod"]),
        LanguageConfig::builtin("zig", "zls", &[], &[".zig"], &["build.zig"]),
        LanguageConfig::builtin("c", "clangd", &[], &[".c", ".h"], &["compile_commands.json"]),
        LanguageConfig::builtin(
            "cpp",
            "clangd",
            &[],
            &[".cpp", ".cc", ".hpp"],
            &["compile_commands.json"],
        ),
    ]
}

/// One entry of the user `languages.json`, keyed by language name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserLanguageConfig {
    pub extensions: Vec<String>,
    pub grammar: Option<String>,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub workspace_markers: Option<Vec<String>>,
    pub language_id: Option<String>,
}

/// Daemon-wide knobs kept next to `languages.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Tell the editor when a deferred request is evicted from a full queue.
    pub notify_evictions: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            notify_evictions: true,
        }
    }
}

pub fn config_dir() -> Option<PathBuf> {
    use etcetera::base_strategy::{choose_base_strategy, BaseStrategy};
    let strategy = choose_base_strategy().ok()?;
    Some(strategy.config_dir().join("switchboard"))
}

pub fn user_lang_config_file() -> Option<PathBuf> {
    Some(config_dir()?.join("languages.json"))
}

pub fn settings_file() -> Option<PathBuf> {
    Some(config_dir()?.join("config.json"))
}

pub fn load_settings() -> Settings {
    let Some(path) = settings_file() else {
        return Settings::default();
    };
    match std::fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
            log::error!("invalid {}: {}", path.display(), err);
            Settings::default()
        }),
        Err(_) => Settings::default(),
    }
}

/// The built-in table with the user `languages.json` (if any) merged over
/// it. Grammar paths in the file resolve relative to its directory; queries
/// default to `queries/<language>` beside it.
pub fn load_configs() -> Vec<LanguageConfig> {
    let mut configs = builtin_configs();
    let Some(path) = user_lang_config_file() else {
        return configs;
    };
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return configs;
    };

    let user: HashMap<String, UserLanguageConfig> = match serde_json::from_str(&raw) {
        Ok(user) => user,
        Err(err) => {
            log::error!("invalid {}: {}", path.display(), err);
            return configs;
        }
    };

    let base = path.parent().unwrap_or(Path::new("."));
    for (language, entry) in user {
        merge_entry(&mut configs, base, language, entry);
    }
    configs
}

fn merge_entry(
    configs: &mut Vec<LanguageConfig>,
    base: &Path,
    language: String,
    entry: UserLanguageConfig,
) {
    let grammar = entry.grammar.as_ref().map(|rel| base.join(rel));
    let queries = Some(base.join("queries").join(&language)).filter(|dir| dir.is_dir());

    match configs.iter_mut().find(|config| config.language == language) {
        Some(config) => {
            if !entry.extensions.is_empty() {
                config.file_extensions = entry.extensions;
            }
            if let Some(command) = entry.command {
                config.command = command;
            }
            if let Some(args) = entry.args {
                config.args = args;
            }
            if let Some(markers) = entry.workspace_markers {
                config.workspace_markers = markers;
            }
            if let Some(language_id) = entry.language_id {
                config.language_id = language_id;
            }
            if grammar.is_some() {
                config.grammar = grammar;
            }
            if queries.is_some() {
                config.queries = queries;
            }
        }
        None => {
            let language_id = entry.language_id.clone().unwrap_or_else(|| language.clone());
            configs.push(LanguageConfig {
                language,
                // a language may carry only a grammar; an empty command means
                // "no server configured"
                command: entry.command.unwrap_or_default(),
                args: entry.args.unwrap_or_default(),
                language_id,
                file_extensions: entry.extensions,
                workspace_markers: entry.workspace_markers.unwrap_or_default(),
                grammar,
                queries,
            });
        }
    }
}

/// Suffix match against the table's extensions.
pub fn detect_language<'a>(
    configs: &'a [LanguageConfig],
    path: &str,
) -> Option<&'a LanguageConfig> {
    configs.iter().find(|config| {
        config
            .file_extensions
            .iter()
            .any(|extension| path.ends_with(extension.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_by_suffix() {
        let configs = builtin_configs();
        assert_eq!(
            detect_language(&configs, "/p/src/main.rs").map(|c| c.language.as_str()),
            Some("rust")
        );
        assert_eq!(
            detect_language(&configs, "/p/web/app.tsx").map(|c| c.language.as_str()),
            Some("typescript")
        );
        assert!(detect_language(&configs, "/p/notes.txt").is_none());
    }

    #[test]
    fn user_entries_override_and_extend() {
        let mut configs = builtin_configs();
        merge_entry(
            &mut configs,
            Path::new("/cfg"),
            "rust".into(),
            UserLanguageConfig {
                command: Some("ra-multiplex".into()),
                ..Default::default()
            },
        );
        merge_entry(
            &mut configs,
            Path::new("/cfg"),
            "lua".into(),
            UserLanguageConfig {
                extensions: vec![".lua".into()],
                grammar: Some("grammars/lua.so".into()),
                ..Default::default()
            },
        );

        let rust = configs.iter().find(|c| c.language == "rust").unwrap();
        assert_eq!(rust.command, "ra-multiplex");
        assert_eq!(rust.file_extensions, vec![".rs".to_string()]);

        let lua = configs.iter().find(|c| c.language == "lua").unwrap();
        assert_eq!(lua.grammar.as_deref(), Some(Path::new("/cfg/grammars/lua.so")));
        assert!(lua.command.is_empty());
    }
}
