//! Client and transport behavior against real child processes. `cat`
//! reflects every frame we write straight back, which exercises framing in
//! both directions without a language server in the picture.

use std::sync::{atomic::AtomicU64, Arc};
use switchboard_lsp::{jsonrpc, lsp, Client, Event, LanguageServerId, ServerMessage};
use tokio::sync::mpsc::unbounded_channel;

#[tokio::test]
async fn frames_round_trip_through_a_child_process() {
    let (tx, mut rx) = unbounded_channel();
    let counter = Arc::new(AtomicU64::new(0));
    let client = Client::start(
        "cat",
        &[],
        None,
        LanguageServerId::default(),
        "echo".into(),
        counter,
        tx,
    )
    .unwrap();

    let id = client.request::<lsp::request::Shutdown>(()).unwrap();

    // cat echoes the request; it comes back classified as a server call
    let (_, event) = rx.recv().await.unwrap();
    match event {
        Event::Message(ServerMessage::Call(jsonrpc::Call::MethodCall(call))) => {
            assert_eq!(call.method, "shutdown");
            assert_eq!(call.id, jsonrpc::Id::Num(id));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    assert_eq!(client.take_inflight(id).as_deref(), Some("shutdown"));
}

#[tokio::test]
async fn request_ids_are_unique_across_clients() {
    let (tx, _rx) = unbounded_channel();
    let counter = Arc::new(AtomicU64::new(0));

    let first = Client::start(
        "cat",
        &[],
        None,
        LanguageServerId::default(),
        "first".into(),
        counter.clone(),
        tx.clone(),
    )
    .unwrap();
    let second = Client::start(
        "cat",
        &[],
        None,
        LanguageServerId::default(),
        "second".into(),
        counter,
        tx,
    )
    .unwrap();

    let mut seen = std::collections::HashSet::new();
    for _ in 0..4 {
        assert!(seen.insert(first.request::<lsp::request::Shutdown>(()).unwrap()));
        assert!(seen.insert(second.request::<lsp::request::Shutdown>(()).unwrap()));
    }
}

#[tokio::test]
async fn a_dying_child_reports_exited() {
    let (tx, mut rx) = unbounded_channel();
    let counter = Arc::new(AtomicU64::new(0));
    let _client = Client::start(
        "true",
        &[],
        None,
        LanguageServerId::default(),
        "doomed".into(),
        counter,
        tx,
    )
    .unwrap();

    let (_, event) = rx.recv().await.unwrap();
    assert!(matches!(event, Event::Exited));
}
