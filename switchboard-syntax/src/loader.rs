//! Resolving a language name to a compiled grammar and its query set.
//!
//! Built-in languages link their grammar into the binary; anything else
//! comes from a user-configured shared object exposing the conventional
//! `tree_sitter_<name>` entry point. Queries always come from `.scm` files
//! on disk and are optional per language.

use crate::Error;
use log::{error, warn};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tree_sitter::{Language, Parser, Query};

/// Where one language's grammar and queries come from.
#[derive(Debug, Clone)]
pub struct LanguageSource {
    pub name: String,
    /// Matched against file name suffixes, dot included.
    pub extensions: Vec<String>,
    /// Shared object path; `None` for built-in grammars.
    pub grammar: Option<PathBuf>,
    /// Directory holding `symbols.scm`, `folds.scm`, `textobjects.scm`,
    /// `highlights.scm`.
    pub queries: Option<PathBuf>,
}

pub(crate) struct LangState {
    pub parser: Parser,
    pub symbols: Option<Query>,
    pub folds: Option<Query>,
    pub textobjects: Option<Query>,
    pub highlights: Option<Query>,
}

pub struct Loader {
    sources: Vec<LanguageSource>,
    states: HashMap<String, LangState>,
    /// Languages whose grammar failed to load; not retried.
    failed: HashSet<String>,
}

impl Loader {
    pub fn new(sources: Vec<LanguageSource>) -> Self {
        Self {
            sources,
            states: HashMap::new(),
            failed: HashSet::new(),
        }
    }

    pub fn language_name_for_path(&self, path: &str) -> Option<&str> {
        self.sources
            .iter()
            .find(|source| {
                source
                    .extensions
                    .iter()
                    .any(|extension| path.ends_with(extension.as_str()))
            })
            .map(|source| source.name.as_str())
    }

    pub(crate) fn get_or_init(&mut self, name: &str) -> Option<&mut LangState> {
        if self.failed.contains(name) {
            return None;
        }
        if !self.states.contains_key(name) {
            let source = self.sources.iter().find(|source| source.name == name)?;
            match init_state(source) {
                Ok(state) => {
                    self.states.insert(name.to_string(), state);
                }
                Err(err) => {
                    error!("cannot load grammar for '{}': {}", name, err);
                    self.failed.insert(name.to_string());
                    return None;
                }
            }
        }
        self.states.get_mut(name)
    }
}

fn init_state(source: &LanguageSource) -> Result<LangState, Error> {
    let language = match &source.grammar {
        Some(path) => load_shared_grammar(path, &source.name)?,
        None => builtin_grammar(&source.name)
            .ok_or_else(|| Error::UnknownLanguage(source.name.clone()))?,
    };

    let mut parser = Parser::new();
    parser.set_language(&language)?;

    let compile = |file: &str| compile_query_file(&language, source, file);

    Ok(LangState {
        parser,
        symbols: compile("symbols.scm"),
        folds: compile("folds.scm"),
        textobjects: compile("textobjects.scm"),
        highlights: compile("highlights.scm"),
    })
}

fn builtin_grammar(name: &str) -> Option<Language> {
    let language = match name {
        "rust" => tree_sitter_rust::LANGUAGE,
        "python" => tree_sitter_python::LANGUAGE,
        // the tsx grammar is a superset that also handles plain .ts sources
        "typescript" => tree_sitter_typescript::LANGUAGE_TSX,
        "javascript" => tree_sitter_javascript::LANGUAGE,
        "go" => tree_sitter_go::LANGUAGE,
        "c" => tree_sitter_c::LANGUAGE,
        "cpp" => tree_sitter_cpp::LANGUAGE,
        _ => return None,
    };
    Some(language.into())
}

/// Loads a grammar from a shared object the way tree-sitter distributes
/// them: a `tree_sitter_<name>` function returning the language.
fn load_shared_grammar(path: &Path, name: &str) -> Result<Language, Error> {
    use libloading::{Library, Symbol};

    let library =
        unsafe { Library::new(path) }.map_err(|err| Error::Grammar(name.to_string(), err))?;
    let symbol_name = format!("tree_sitter_{}", name.replace('-', "_"));
    let language = unsafe {
        let language_fn: Symbol<unsafe extern "C" fn() -> Language> = library
            .get(symbol_name.as_bytes())
            .map_err(|err| Error::Grammar(name.to_string(), err))?;
        language_fn()
    };
    // the library must stay resident for as long as the language is used
    std::mem::forget(library);
    Ok(language)
}

/// Compiles one query file; a missing or broken query only disables the
/// operations that need it.
fn compile_query_file(language: &Language, source: &LanguageSource, file: &str) -> Option<Query> {
    let dir = source.queries.as_ref()?;
    let text = std::fs::read_to_string(dir.join(file)).ok()?;
    match Query::new(language, &text) {
        Ok(query) => Some(query),
        Err(err) => {
            warn!("invalid query {}/{}: {}", dir.display(), file, err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources() -> Vec<LanguageSource> {
        vec![LanguageSource {
            name: "rust".into(),
            extensions: vec![".rs".into()],
            grammar: None,
            queries: None,
        }]
    }

    #[test]
    fn extension_lookup() {
        let loader = Loader::new(sources());
        assert_eq!(loader.language_name_for_path("/p/lib.rs"), Some("rust"));
        assert_eq!(loader.language_name_for_path("/p/notes.md"), None);
    }

    #[test]
    fn builtin_grammar_initializes_without_queries() {
        let mut loader = Loader::new(sources());
        let state = loader.get_or_init("rust").unwrap();
        assert!(state.symbols.is_none());
    }

    #[test]
    fn unknown_grammar_fails_once() {
        let mut loader = Loader::new(vec![LanguageSource {
            name: "fortran".into(),
            extensions: vec![".f90".into()],
            grammar: None,
            queries: None,
        }]);
        assert!(loader.get_or_init("fortran").is_none());
        assert!(loader.failed.contains("fortran"));
    }
}
