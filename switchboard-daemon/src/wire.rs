//! The editor side of the wire: newline-delimited JSON arrays.
//!
//! Incoming lines are one of three shapes. A leading positive id with a
//! method object is a request; a leading negative id is a response; a bare
//! object is a notification. One wrinkle: an editor answering a
//! daemon-initiated expression call echoes the call's (positive) id back,
//! so outstanding expr ids are checked before request parsing is attempted.

use serde_json::{json, Value};

#[derive(Debug, PartialEq)]
pub enum EditorMessage {
    Request {
        id: i64,
        method: String,
        params: Value,
    },
    Response {
        id: i64,
        result: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("malformed editor line: {0}")]
pub struct WireError(String);

fn method_call(value: &Value) -> Option<(String, Value)> {
    let object = value.as_object()?;
    let method = object.get("method")?.as_str()?.to_string();
    let params = object.get("params").cloned().unwrap_or(Value::Null);
    Some((method, params))
}

pub fn parse_line(
    line: &str,
    is_outstanding_expr: impl Fn(i64) -> bool,
) -> Result<EditorMessage, WireError> {
    let value: Value =
        serde_json::from_str(line).map_err(|err| WireError(err.to_string()))?;
    let Some(array) = value.as_array() else {
        return Err(WireError("not an array".into()));
    };

    match array.as_slice() {
        [first] => match method_call(first) {
            Some((method, params)) => Ok(EditorMessage::Notification { method, params }),
            None => Err(WireError("notification without a method".into())),
        },
        [first, second] => {
            let Some(id) = first.as_i64() else {
                return Err(WireError("leading element is not an id".into()));
            };
            if id > 0 && is_outstanding_expr(id) {
                return Ok(EditorMessage::Response {
                    id,
                    result: second.clone(),
                });
            }
            if id > 0 {
                match method_call(second) {
                    Some((method, params)) => Ok(EditorMessage::Request { id, method, params }),
                    None => Err(WireError("request without a method".into())),
                }
            } else if id < 0 {
                Ok(EditorMessage::Response {
                    id,
                    result: second.clone(),
                })
            } else {
                Err(WireError("id 0 is reserved".into()))
            }
        }
        _ => Err(WireError("unexpected array length".into())),
    }
}

// -------------------------------------------------------------------------------------------
// Outgoing lines
// -------------------------------------------------------------------------------------------

/// Answer to an editor request: the request id, negated.
pub fn response(editor_id: i64, result: &Value) -> String {
    json!([-editor_id, result]).to_string()
}

pub fn notification(name: &str, payload: &Value) -> String {
    json!([name, payload]).to_string()
}

pub fn call(function: &str, args: &Value) -> String {
    json!(["call", function, args]).to_string()
}

pub fn expr(expression: &str, id: i64) -> String {
    json!(["expr", expression, id]).to_string()
}

pub fn ex(command: &str) -> String {
    json!(["ex", command]).to_string()
}

pub fn normal(keys: &str) -> String {
    json!(["normal", keys]).to_string()
}

pub fn redraw(force: bool) -> String {
    json!(["redraw", if force { "force" } else { "" }]).to_string()
}

fn quote_vim(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

pub fn echo(message: &str) -> String {
    ex(&format!("echomsg {}", quote_vim(message)))
}

pub fn echoerr(message: &str) -> String {
    ex(&format!("echoerr {}", quote_vim(message)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_expr(_: i64) -> bool {
        false
    }

    #[test]
    fn classifies_request_response_notification() {
        let request = parse_line(r#"[1,{"method":"hover","params":{"file":"/a.rs"}}]"#, no_expr)
            .unwrap();
        assert_eq!(
            request,
            EditorMessage::Request {
                id: 1,
                method: "hover".into(),
                params: json!({"file": "/a.rs"}),
            }
        );

        let response = parse_line(r#"[-7,{"ok":true}]"#, no_expr).unwrap();
        assert_eq!(
            response,
            EditorMessage::Response {
                id: -7,
                result: json!({"ok": true}),
            }
        );

        let notification = parse_line(r#"[{"method":"did_save","params":{}}]"#, no_expr).unwrap();
        assert_eq!(
            notification,
            EditorMessage::Notification {
                method: "did_save".into(),
                params: json!({}),
            }
        );
    }

    #[test]
    fn outstanding_expr_id_wins_over_request_parsing() {
        let line = r#"[3,["/old/a.rs","/old/b.rs"]]"#;
        let message = parse_line(line, |id| id == 3).unwrap();
        assert_eq!(
            message,
            EditorMessage::Response {
                id: 3,
                result: json!(["/old/a.rs", "/old/b.rs"]),
            }
        );

        // without the outstanding id this line is malformed
        assert!(parse_line(line, no_expr).is_err());
    }

    #[test]
    fn responses_negate_the_editor_id() {
        assert_eq!(
            response(1, &json!({"file": "/p/src/a.rs", "line": 3, "column": 4})),
            r#"[-1,{"column":4,"file":"/p/src/a.rs","line":3}]"#
        );
    }

    #[test]
    fn channel_commands_have_their_documented_shapes() {
        assert_eq!(
            call("popup#show", &json!(["hello"])),
            r#"["call","popup#show",["hello"]]"#
        );
        assert_eq!(expr("v:oldfiles", 4), r#"["expr","v:oldfiles",4]"#);
        assert_eq!(normal("gg"), r#"["normal","gg"]"#);
        assert_eq!(redraw(false), r#"["redraw",""]"#);
        assert_eq!(redraw(true), r#"["redraw","force"]"#);
        assert_eq!(
            notification("diagnostics", &json!({"uri": "file:///a"})),
            r#"["diagnostics",{"uri":"file:///a"}]"#
        );
    }

    #[test]
    fn echoerr_escapes_quotes() {
        assert_eq!(
            echoerr("can't spawn"),
            r#"["ex","echoerr 'can''t spawn'"]"#
        );
    }
}
