//! Drives a daemon instance over a real unix socket: editor lines in,
//! response lines out, no language servers involved.

use switchboard_daemon::application::Application;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

async fn start_daemon(socket: &std::path::Path) {
    let listener = UnixListener::bind(socket).unwrap();
    let mut app = Application::new(listener);
    tokio::spawn(async move {
        let _ = app.run().await;
    });
}

async fn request(reader: &mut BufReader<UnixStream>, line: &str) -> serde_json::Value {
    reader.get_mut().write_all(line.as_bytes()).await.unwrap();
    reader.get_mut().write_all(b"\n").await.unwrap();

    let mut response = String::new();
    reader.read_line(&mut response).await.unwrap();
    serde_json::from_str(response.trim()).unwrap()
}

#[tokio::test]
async fn syntax_status_and_unknown_methods_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("switchboard-test.sock");
    start_daemon(&socket).await;

    let stream = UnixStream::connect(&socket).await.unwrap();
    let mut reader = BufReader::new(stream);

    // a tree-sitter query for a buffer that was pushed along with the
    // request; no symbols.scm is configured, so the result is empty but
    // well-formed
    let response = request(
        &mut reader,
        r#"[1,{"method":"ts_symbols","params":{"file":"/p/main.rs","text":"fn main() {}"}}]"#,
    )
    .await;
    assert_eq!(response[0], -1);
    assert_eq!(response[1], serde_json::json!([]));

    // daemon state snapshot: one editor, no servers spawned
    let response = request(&mut reader, r#"[2,{"method":"status","params":{}}]"#).await;
    assert_eq!(response[0], -2);
    assert_eq!(response[1]["editors"], 1);
    assert_eq!(response[1]["servers"], serde_json::json!([]));
    assert_eq!(response[1]["deferred"], 0);

    // unknown methods still answer, with null
    let response = request(&mut reader, r#"[3,{"method":"frobnicate","params":{}}]"#).await;
    assert_eq!(response[0], -3);
    assert_eq!(response[1], serde_json::Value::Null);
}

#[tokio::test]
async fn second_editor_sees_broadcasts_of_nothing_but_still_connects() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("switchboard-test.sock");
    start_daemon(&socket).await;

    let first = UnixStream::connect(&socket).await.unwrap();
    let second = UnixStream::connect(&socket).await.unwrap();
    let mut reader = BufReader::new(second);

    let response = request(&mut reader, r#"[1,{"method":"status","params":{}}]"#).await;
    assert_eq!(response[1]["editors"], 2);

    drop(first);
}
