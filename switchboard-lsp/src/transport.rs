use crate::{jsonrpc, LanguageServerId, Result};
use anyhow::Context;
use log::{debug, error, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter},
    process::{ChildStderr, ChildStdin, ChildStdout},
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
};

/// A message body larger than this is treated as a protocol error and kills
/// the transport.
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// How much trailing stderr output is retained for the post-mortem log line
/// when a server dies.
const STDERR_TAIL_LEN: usize = 4096;

#[derive(Debug)]
pub enum Payload {
    Request(jsonrpc::MethodCall),
    Notification(jsonrpc::Notification),
    Response(jsonrpc::Output),
}

/// All possible messages a server sends over its stdout.
#[derive(Debug, PartialEq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
#[serde(untagged)]
pub enum ServerMessage {
    /// An answer to a request of ours.
    Output(jsonrpc::Output),
    /// A server-initiated request or notification.
    Call(jsonrpc::Call),
}

/// What the event loop sees from one server transport.
#[derive(Debug)]
pub enum Event {
    Message(ServerMessage),
    /// The stdout stream closed or broke; the server is gone.
    Exited,
}

/// Shared handle onto the trailing stderr output of one server.
#[derive(Debug, Clone, Default)]
pub struct StderrTail(Arc<Mutex<String>>);

impl StderrTail {
    fn push_line(&self, line: &str) {
        let mut tail = self.0.lock();
        tail.push_str(line);
        if !line.ends_with('\n') {
            tail.push('\n');
        }
        if tail.len() > STDERR_TAIL_LEN {
            let cut = tail.len() - STDERR_TAIL_LEN;
            // keep whole lines where possible
            let cut = tail[cut..].find('\n').map_or(cut, |nl| cut + nl + 1);
            tail.drain(..cut);
        }
    }

    pub fn snapshot(&self) -> String {
        self.0.lock().clone()
    }
}

#[derive(Debug)]
pub struct Transport {
    id: LanguageServerId,
    name: String,
}

impl Transport {
    /// Wires a spawned server's stdio to the event loop: a reader task
    /// decoding framed messages into `event_tx`, a writer task draining the
    /// returned payload sender, and a stderr task feeding the tail buffer.
    pub fn start(
        server_stdout: BufReader<ChildStdout>,
        server_stdin: BufWriter<ChildStdin>,
        server_stderr: BufReader<ChildStderr>,
        event_tx: UnboundedSender<(LanguageServerId, Event)>,
        id: LanguageServerId,
        name: String,
    ) -> (UnboundedSender<Payload>, StderrTail) {
        let (payload_tx, payload_rx) = unbounded_channel();
        let stderr_tail = StderrTail::default();

        let transport = Arc::new(Self { id, name });

        tokio::spawn(Self::recv(transport.clone(), server_stdout, event_tx));
        tokio::spawn(Self::err(
            transport.clone(),
            server_stderr,
            stderr_tail.clone(),
        ));
        tokio::spawn(Self::send(transport, server_stdin, payload_rx));

        (payload_tx, stderr_tail)
    }

    async fn recv_server_message(
        reader: &mut (impl AsyncBufRead + Unpin + Send),
        buffer: &mut String,
    ) -> Result<ServerMessage> {
        let mut content_length = None;
        loop {
            buffer.truncate(0);
            if reader.read_line(buffer).await? == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream closed",
                )
                .into());
            }
            let header = buffer.trim();

            if header.is_empty() {
                break;
            }

            let mut parts = header.split(": ");

            match (parts.next(), parts.next(), parts.next()) {
                (Some("Content-Length"), Some(value), None) => {
                    content_length = Some(value.parse().context("invalid content length")?);
                }
                (Some(_), Some(_), None) => {}
                _ => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "failed to parse header",
                    )
                    .into());
                }
            }
        }

        let content_length: usize = content_length.context("missing content length")?;
        if content_length > MAX_FRAME_LEN {
            return Err(anyhow::anyhow!("refusing {} byte frame", content_length).into());
        }

        let mut content = vec![0; content_length];
        reader.read_exact(&mut content).await?;
        let msg = std::str::from_utf8(&content).context("invalid utf8 from server")?;

        info!("<- {}", msg);

        Ok(serde_json::from_str(msg)?)
    }

    async fn recv(
        transport: Arc<Self>,
        mut server_stdout: BufReader<ChildStdout>,
        event_tx: UnboundedSender<(LanguageServerId, Event)>,
    ) {
        let mut recv_buffer = String::new();
        loop {
            match Self::recv_server_message(&mut server_stdout, &mut recv_buffer).await {
                Ok(msg) => {
                    if event_tx.send((transport.id, Event::Message(msg))).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!("{} stdout closed: {}", transport.name, err);
                    let _ = event_tx.send((transport.id, Event::Exited));
                    break;
                }
            }
        }
    }

    async fn err(
        transport: Arc<Self>,
        mut server_stderr: BufReader<ChildStderr>,
        tail: StderrTail,
    ) {
        let mut line = String::new();
        loop {
            line.clear();
            match server_stderr.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    error!("{} err <- {}", transport.name, line.trim_end());
                    tail.push_line(&line);
                }
            }
        }
    }

    async fn send_payload(
        &self,
        server_stdin: &mut BufWriter<ChildStdin>,
        payload: Payload,
    ) -> Result<()> {
        let json = match payload {
            Payload::Request(request) => serde_json::to_string(&request)?,
            Payload::Notification(notification) => serde_json::to_string(&notification)?,
            Payload::Response(response) => serde_json::to_string(&response)?,
        };

        info!("-> {}", json);

        server_stdin
            .write_all(format!("Content-Length: {}\r\n\r\n", json.len()).as_bytes())
            .await?;
        server_stdin.write_all(json.as_bytes()).await?;
        server_stdin.flush().await?;

        Ok(())
    }

    async fn send(
        transport: Arc<Self>,
        mut server_stdin: BufWriter<ChildStdin>,
        mut payload_rx: UnboundedReceiver<Payload>,
    ) {
        while let Some(payload) = payload_rx.recv().await {
            if let Err(err) = transport.send_payload(&mut server_stdin, payload).await {
                // the reader side notices the broken pipe and reports Exited
                error!("failed to write to {}: {}", transport.name, err);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn feed(bytes: &[u8]) -> Vec<ServerMessage> {
        let mut reader = tokio::io::BufReader::new(Cursor::new(bytes.to_vec()));
        let mut buffer = String::new();
        let mut out = Vec::new();
        while let Ok(msg) = Transport::recv_server_message(&mut reader, &mut buffer).await {
            out.push(msg);
        }
        out
    }

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    #[tokio::test]
    async fn framing_round_trip() {
        let body = r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#;
        let messages = feed(&frame(body)).await;
        assert_eq!(messages.len(), 1);
        assert!(matches!(
            &messages[0],
            ServerMessage::Call(jsonrpc::Call::Notification(n)) if n.method == "initialized"
        ));
    }

    #[tokio::test]
    async fn framing_concatenated_messages() {
        let first = r#"{"jsonrpc":"2.0","result":null,"id":1}"#;
        let second = r#"{"jsonrpc":"2.0","method":"$/progress","params":{}}"#;
        let mut bytes = frame(first);
        bytes.extend(frame(second));

        let messages = feed(&bytes).await;
        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[0], ServerMessage::Output(_)));
        assert!(matches!(&messages[1], ServerMessage::Call(_)));
    }

    #[tokio::test]
    async fn framing_tolerates_extra_headers() {
        let body = r#"{"jsonrpc":"2.0","result":null,"id":1}"#;
        let bytes = format!(
            "Content-Type: application/vscode-jsonrpc\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        assert_eq!(feed(bytes.as_bytes()).await.len(), 1);
    }

    #[tokio::test]
    async fn framing_rejects_garbage_header() {
        assert!(feed(b"not a header\r\n\r\n").await.is_empty());
    }

    #[tokio::test]
    async fn framing_rejects_oversized_frame() {
        let bytes = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_LEN + 1);
        assert!(feed(bytes.as_bytes()).await.is_empty());
    }
}
