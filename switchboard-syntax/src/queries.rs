//! Running compiled queries over a buffer's tree and shaping the captures
//! for the editor.

use serde_json::{json, Value};
use streaming_iterator::StreamingIterator;
use tree_sitter::{Query, QueryCursor, Tree};

/// Fixed capture-name to LSP symbol-kind-name table for symbol queries.
/// Unknown capture names fall back to `Variable` rather than being dropped,
/// so user query files can invent capture names and still get entries.
fn symbol_kind(capture: &str) -> &'static str {
    match capture {
        "module" | "namespace" => "Module",
        "class" => "Class",
        "method" => "Method",
        "field" | "property" => "Field",
        "constructor" => "Constructor",
        "enum" => "Enum",
        "interface" | "trait" => "Interface",
        "function" => "Function",
        "constant" => "Constant",
        "struct" => "Struct",
        "enum-member" | "variant" => "EnumMember",
        "type" | "type-alias" => "TypeParameter",
        "macro" => "Function",
        _ => "Variable",
    }
}

fn node_text<'a>(node: tree_sitter::Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or_default()
}

/// One entry per capture: the captured node is the symbol's name.
pub fn symbols(tree: &Tree, source: &str, query: &Query, file: &str) -> Value {
    let names = query.capture_names();
    let mut out = Vec::new();

    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, tree.root_node(), source.as_bytes());
    while let Some(matched) = matches.next() {
        for capture in matched.captures {
            let node = capture.node;
            out.push(json!({
                "name": node_text(node, source),
                "kind": symbol_kind(names[capture.index as usize]),
                "file": file,
                "selection_line": node.start_position().row,
                "selection_column": node.start_position().column,
                "end_line": node.end_position().row,
            }));
        }
    }

    Value::Array(out)
}

/// Foldable ranges; single-line captures are not worth folding.
pub fn folds(tree: &Tree, source: &str, query: &Query) -> Value {
    let mut out = Vec::new();

    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, tree.root_node(), source.as_bytes());
    while let Some(matched) = matches.next() {
        for capture in matched.captures {
            let start = capture.node.start_position().row;
            let end = capture.node.end_position().row;
            if end > start {
                out.push(json!({ "start_line": start, "end_line": end }));
            }
        }
    }

    Value::Array(out)
}

/// Named ranges, capture name passed through (`function.inside` and
/// friends).
pub fn textobjects(tree: &Tree, source: &str, query: &Query) -> Value {
    ranges_with_name(tree, source, query, "capture")
}

/// Highlight spans, capture name passed through as the group.
pub fn highlights(tree: &Tree, source: &str, query: &Query) -> Value {
    ranges_with_name(tree, source, query, "group")
}

fn ranges_with_name(tree: &Tree, source: &str, query: &Query, name_key: &str) -> Value {
    let names = query.capture_names();
    let mut out = Vec::new();

    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, tree.root_node(), source.as_bytes());
    while let Some(matched) = matches.next() {
        for capture in matched.captures {
            let node = capture.node;
            out.push(json!({
                name_key: names[capture.index as usize],
                "start_line": node.start_position().row,
                "start_column": node.start_position().column,
                "end_line": node.end_position().row,
                "end_column": node.end_position().column,
            }));
        }
    }

    Value::Array(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::Parser;

    fn rust_tree(source: &str) -> (Tree, tree_sitter::Language) {
        let language: tree_sitter::Language = tree_sitter_rust::LANGUAGE.into();
        let mut parser = Parser::new();
        parser.set_language(&language).unwrap();
        (parser.parse(source, None).unwrap(), language)
    }

    #[test]
    fn symbols_carry_kind_and_position() {
        let source = "fn main() {}\nstruct Config { port: u16 }\n";
        let (tree, language) = rust_tree(source);
        let query = Query::new(
            &language,
            r#"
            (function_item name: (identifier) @function)
            (struct_item name: (type_identifier) @struct)
            "#,
        )
        .unwrap();

        let symbols = symbols(&tree, source, &query, "/p/main.rs");
        let symbols = symbols.as_array().unwrap();
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0]["name"], "main");
        assert_eq!(symbols[0]["kind"], "Function");
        assert_eq!(symbols[0]["file"], "/p/main.rs");
        assert_eq!(symbols[0]["selection_line"], 0);
        assert_eq!(symbols[1]["name"], "Config");
        assert_eq!(symbols[1]["kind"], "Struct");
        assert_eq!(symbols[1]["selection_line"], 1);
    }

    #[test]
    fn folds_skip_single_line_ranges() {
        let source = "fn a() {}\nfn b() {\n    let x = 1;\n}\n";
        let (tree, language) = rust_tree(source);
        let query = Query::new(&language, "(function_item body: (block) @fold)").unwrap();

        let folds = folds(&tree, source, &query);
        let folds = folds.as_array().unwrap();
        assert_eq!(folds.len(), 1);
        assert_eq!(folds[0]["start_line"], 1);
        assert_eq!(folds[0]["end_line"], 3);
    }

    #[test]
    fn highlights_name_the_capture_group() {
        let source = "fn main() {}\n";
        let (tree, language) = rust_tree(source);
        let query = Query::new(&language, "(function_item name: (identifier) @function.name)")
            .unwrap();

        let spans = highlights(&tree, source, &query);
        assert_eq!(spans.as_array().unwrap()[0]["group"], "function.name");
    }
}
