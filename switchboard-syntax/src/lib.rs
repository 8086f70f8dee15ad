//! Per-buffer tree-sitter state and the query operations served from it.
//!
//! Parsers, trees and queries are not safe to share across threads; a
//! [`Syntax`] instance must stay on the thread that drives the daemon's
//! event loop.

mod loader;
mod queries;

pub use loader::{LanguageSource, Loader};

use serde_json::Value;
use std::collections::HashMap;
use std::hash::BuildHasher;
use thiserror::Error;
use tree_sitter::Tree;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no grammar for language '{0}'")]
    UnknownLanguage(String),
    #[error("cannot load grammar for '{0}': {1}")]
    Grammar(String, libloading::Error),
    #[error(transparent)]
    Language(#[from] tree_sitter::LanguageError),
    #[error("failed to parse {0}")]
    Parse(String),
    #[error("no parsed buffer for {0}")]
    MissingBuffer(String),
    #[error("no {1} query for language '{0}'")]
    MissingQuery(String, &'static str),
}

/// The parse state of one open file.
struct BufferTree {
    language: String,
    tree: Tree,
    source: String,
    content_hash: u64,
}

pub struct Syntax {
    loader: Loader,
    buffers: HashMap<String, BufferTree>,
}

fn content_hash(source: &str) -> u64 {
    foldhash::fast::FixedState::default().hash_one(source.as_bytes())
}

impl Syntax {
    pub fn new(sources: Vec<LanguageSource>) -> Self {
        Self {
            loader: Loader::new(sources),
            buffers: HashMap::new(),
        }
    }

    /// (Re)parses `path` from `source`. A no-op returning `false` when the
    /// content hash matches the stored tree; otherwise a full parse —
    /// incremental parsing is not attempted because edit deltas are never
    /// tracked.
    pub fn parse_buffer(&mut self, path: &str, source: &str) -> Result<bool, Error> {
        let hash = content_hash(source);
        if let Some(buffer) = self.buffers.get(path) {
            if buffer.content_hash == hash {
                return Ok(false);
            }
        }

        let language = self
            .loader
            .language_name_for_path(path)
            .ok_or_else(|| Error::UnknownLanguage(path.to_string()))?
            .to_string();
        let state = self
            .loader
            .get_or_init(&language)
            .ok_or_else(|| Error::UnknownLanguage(language.clone()))?;

        let tree = state
            .parser
            .parse(source, None)
            .ok_or_else(|| Error::Parse(path.to_string()))?;

        self.buffers.insert(
            path.to_string(),
            BufferTree {
                language,
                tree,
                source: source.to_string(),
                content_hash: hash,
            },
        );
        Ok(true)
    }

    pub fn remove_buffer(&mut self, path: &str) {
        self.buffers.remove(path);
    }

    pub fn tree(&self, path: &str) -> Option<&Tree> {
        self.buffers.get(path).map(|buffer| &buffer.tree)
    }

    pub fn source(&self, path: &str) -> Option<&str> {
        self.buffers.get(path).map(|buffer| buffer.source.as_str())
    }

    pub fn symbols(&mut self, path: &str) -> Result<Value, Error> {
        let buffer = self
            .buffers
            .get(path)
            .ok_or_else(|| Error::MissingBuffer(path.to_string()))?;
        let state = self
            .loader
            .get_or_init(&buffer.language)
            .ok_or_else(|| Error::UnknownLanguage(buffer.language.clone()))?;
        let query = state
            .symbols
            .as_ref()
            .ok_or_else(|| Error::MissingQuery(buffer.language.clone(), "symbols"))?;
        Ok(queries::symbols(&buffer.tree, &buffer.source, query, path))
    }

    pub fn folds(&mut self, path: &str) -> Result<Value, Error> {
        let buffer = self
            .buffers
            .get(path)
            .ok_or_else(|| Error::MissingBuffer(path.to_string()))?;
        let state = self
            .loader
            .get_or_init(&buffer.language)
            .ok_or_else(|| Error::UnknownLanguage(buffer.language.clone()))?;
        let query = state
            .folds
            .as_ref()
            .ok_or_else(|| Error::MissingQuery(buffer.language.clone(), "folds"))?;
        Ok(queries::folds(&buffer.tree, &buffer.source, query))
    }

    pub fn textobjects(&mut self, path: &str) -> Result<Value, Error> {
        let buffer = self
            .buffers
            .get(path)
            .ok_or_else(|| Error::MissingBuffer(path.to_string()))?;
        let state = self
            .loader
            .get_or_init(&buffer.language)
            .ok_or_else(|| Error::UnknownLanguage(buffer.language.clone()))?;
        let query = state
            .textobjects
            .as_ref()
            .ok_or_else(|| Error::MissingQuery(buffer.language.clone(), "textobjects"))?;
        Ok(queries::textobjects(&buffer.tree, &buffer.source, query))
    }

    pub fn highlights(&mut self, path: &str) -> Result<Value, Error> {
        let buffer = self
            .buffers
            .get(path)
            .ok_or_else(|| Error::MissingBuffer(path.to_string()))?;
        let state = self
            .loader
            .get_or_init(&buffer.language)
            .ok_or_else(|| Error::UnknownLanguage(buffer.language.clone()))?;
        let query = state
            .highlights
            .as_ref()
            .ok_or_else(|| Error::MissingQuery(buffer.language.clone(), "highlights"))?;
        Ok(queries::highlights(&buffer.tree, &buffer.source, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rust_syntax() -> Syntax {
        Syntax::new(vec![LanguageSource {
            name: "rust".into(),
            extensions: vec![".rs".into()],
            grammar: None,
            queries: None,
        }])
    }

    #[test]
    fn reparse_skipped_while_content_unchanged() {
        let mut syntax = rust_syntax();
        assert!(syntax.parse_buffer("/p/a.rs", "fn a() {}").unwrap());
        assert!(!syntax.parse_buffer("/p/a.rs", "fn a() {}").unwrap());
        assert!(syntax.parse_buffer("/p/a.rs", "fn b() {}").unwrap());
    }

    #[test]
    fn removed_buffers_forget_their_tree() {
        let mut syntax = rust_syntax();
        syntax.parse_buffer("/p/a.rs", "fn a() {}").unwrap();
        assert!(syntax.tree("/p/a.rs").is_some());
        syntax.remove_buffer("/p/a.rs");
        assert!(syntax.tree("/p/a.rs").is_none());
        assert!(matches!(
            syntax.symbols("/p/a.rs"),
            Err(Error::MissingBuffer(_))
        ));
    }

    #[test]
    fn missing_query_is_reported_not_fatal() {
        let mut syntax = rust_syntax();
        syntax.parse_buffer("/p/a.rs", "fn a() {}").unwrap();
        assert!(matches!(
            syntax.symbols("/p/a.rs"),
            Err(Error::MissingQuery(_, "symbols"))
        ));
    }
}
