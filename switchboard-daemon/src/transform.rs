//! Shaping language server results into the editor's flat shapes.

use serde_json::{json, Value};
use switchboard_lsp::lsp::Url;
use switchboard_stdx::path::join_remote;

/// Converts a `file://` URI string back into an editor path, restoring the
/// scp prefix when the request came from a remote file.
fn uri_to_editor_path(uri: &str, ssh_host: Option<&str>) -> Option<String> {
    let path = Url::parse(uri)
        .ok()?
        .to_file_path()
        .ok()?
        .to_string_lossy()
        .into_owned();
    Some(match ssh_host {
        Some(host) => join_remote(host, &path),
        None => path,
    })
}

/// A goto result is `Location | Location[] | LocationLink[] | null`; the
/// editor wants one `{file, line, column}` or null.
pub fn goto_response(result: &Value, ssh_host: Option<&str>) -> Value {
    let location = match result {
        Value::Array(locations) => match locations.first() {
            Some(location) => location,
            None => return Value::Null,
        },
        Value::Object(_) => result,
        _ => return Value::Null,
    };

    let uri = location
        .get("uri")
        .or_else(|| location.get("targetUri"))
        .and_then(Value::as_str);
    let start = location
        .get("range")
        .or_else(|| location.get("targetSelectionRange"))
        .and_then(|range| range.get("start"));

    match (uri, start) {
        (Some(uri), Some(start)) => {
            let Some(file) = uri_to_editor_path(uri, ssh_host) else {
                return Value::Null;
            };
            json!({
                "file": file,
                "line": start.get("line").cloned().unwrap_or(json!(0)),
                "column": start.get("character").cloned().unwrap_or(json!(0)),
            })
        }
        _ => Value::Null,
    }
}

/// LSP SymbolKind integers, named.
pub fn symbol_kind_name(kind: u64) -> &'static str {
    match kind {
        1 => "File",
        2 => "Module",
        3 => "Namespace",
        4 => "Package",
        5 => "Class",
        6 => "Method",
        7 => "Property",
        8 => "Field",
        9 => "Constructor",
        10 => "Enum",
        11 => "Interface",
        12 => "Function",
        13 => "Variable",
        14 => "Constant",
        15 => "String",
        16 => "Number",
        17 => "Boolean",
        18 => "Array",
        19 => "Object",
        20 => "Key",
        21 => "Null",
        22 => "EnumMember",
        23 => "Struct",
        24 => "Event",
        25 => "Operator",
        26 => "TypeParameter",
        _ => "Symbol",
    }
}

/// Flattens a documentSymbol result (either flavor) into picker items.
pub fn symbol_items(result: &Value, file: &str, ssh_host: Option<&str>) -> Value {
    let mut items = Vec::new();
    if let Value::Array(symbols) = result {
        for symbol in symbols {
            flatten_symbol(symbol, file, ssh_host, &mut items);
        }
    }
    Value::Array(items)
}

fn flatten_symbol(symbol: &Value, file: &str, ssh_host: Option<&str>, items: &mut Vec<Value>) {
    let name = symbol.get("name").and_then(Value::as_str).unwrap_or("");
    let kind = symbol.get("kind").and_then(Value::as_u64).unwrap_or(0);

    // hierarchical DocumentSymbol carries selectionRange; the flat
    // SymbolInformation flavor nests a location instead
    let (target_file, start) = match symbol.get("location") {
        Some(location) => (
            location
                .get("uri")
                .and_then(Value::as_str)
                .and_then(|uri| uri_to_editor_path(uri, ssh_host))
                .unwrap_or_else(|| file.to_string()),
            location.get("range").and_then(|range| range.get("start")),
        ),
        None => (
            file.to_string(),
            symbol
                .get("selectionRange")
                .and_then(|range| range.get("start")),
        ),
    };

    items.push(json!({
        "name": name,
        "kind": symbol_kind_name(kind),
        "file": target_file,
        "line": start.and_then(|s| s.get("line")).cloned().unwrap_or(json!(0)),
        "column": start.and_then(|s| s.get("character")).cloned().unwrap_or(json!(0)),
    }));

    if let Some(Value::Array(children)) = symbol.get("children") {
        for child in children {
            flatten_symbol(child, file, ssh_host, items);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goto_single_location() {
        let result = json!({
            "uri": "file:///a",
            "range": { "start": { "line": 3, "character": 7 }, "end": { "line": 3, "character": 9 } }
        });
        assert_eq!(
            goto_response(&result, None),
            json!({ "file": "/a", "line": 3, "column": 7 })
        );
    }

    #[test]
    fn goto_array_takes_the_first() {
        let result = json!([
            {
                "uri": "file:///p/src/a.rs",
                "range": { "start": { "line": 3, "character": 4 }, "end": { "line": 3, "character": 8 } }
            },
            {
                "uri": "file:///p/src/b.rs",
                "range": { "start": { "line": 9, "character": 0 }, "end": { "line": 9, "character": 1 } }
            }
        ]);
        assert_eq!(
            goto_response(&result, None),
            json!({ "file": "/p/src/a.rs", "line": 3, "column": 4 })
        );
    }

    #[test]
    fn goto_location_link_uses_target_selection_range() {
        let result = json!([{
            "targetUri": "file:///lib.rs",
            "targetRange": { "start": { "line": 0, "character": 0 }, "end": { "line": 20, "character": 0 } },
            "targetSelectionRange": { "start": { "line": 2, "character": 11 }, "end": { "line": 2, "character": 15 } }
        }]);
        assert_eq!(
            goto_response(&result, None),
            json!({ "file": "/lib.rs", "line": 2, "column": 11 })
        );
    }

    #[test]
    fn goto_restores_the_remote_prefix() {
        let result = json!({
            "uri": "file:///a",
            "range": { "start": { "line": 3, "character": 7 }, "end": { "line": 3, "character": 7 } }
        });
        assert_eq!(
            goto_response(&result, Some("u@h")),
            json!({ "file": "scp://u@h//a", "line": 3, "column": 7 })
        );
    }

    #[test]
    fn goto_empty_and_null_yield_null() {
        assert_eq!(goto_response(&json!([]), None), Value::Null);
        assert_eq!(goto_response(&Value::Null, None), Value::Null);
    }

    #[test]
    fn symbols_flatten_with_kind_names() {
        let result = json!([{
            "name": "Config",
            "kind": 23,
            "range": { "start": { "line": 1, "character": 0 }, "end": { "line": 5, "character": 1 } },
            "selectionRange": { "start": { "line": 1, "character": 7 }, "end": { "line": 1, "character": 13 } },
            "children": [{
                "name": "port",
                "kind": 8,
                "range": { "start": { "line": 2, "character": 4 }, "end": { "line": 2, "character": 14 } },
                "selectionRange": { "start": { "line": 2, "character": 4 }, "end": { "line": 2, "character": 8 } }
            }]
        }]);

        let items = symbol_items(&result, "/p/a.rs", None);
        let items = items.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["kind"], "Struct");
        assert_eq!(items[0]["line"], 1);
        assert_eq!(items[1]["name"], "port");
        assert_eq!(items[1]["kind"], "Field");
    }

    #[test]
    fn unknown_symbol_kind_falls_back() {
        assert_eq!(symbol_kind_name(99), "Symbol");
    }
}
