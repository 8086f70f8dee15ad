//! Accepted editor connections.
//!
//! Each connection gets a reader task feeding complete lines into the shared
//! event channel and a writer task draining an outbound queue, so the event
//! loop never blocks on either side of the socket. Ids are assigned on
//! accept and never reused for the lifetime of the daemon.

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

pub type ClientId = usize;

#[derive(Debug)]
pub enum ConnectionEvent {
    Line(ClientId, String),
    Disconnected(ClientId),
}

struct Connection {
    outbound: UnboundedSender<String>,
}

pub struct Clients {
    next_id: ClientId,
    connections: std::collections::HashMap<ClientId, Connection>,
    event_tx: UnboundedSender<ConnectionEvent>,
}

impl Clients {
    pub fn new() -> (Self, UnboundedReceiver<ConnectionEvent>) {
        let (event_tx, event_rx) = unbounded_channel();
        (
            Self {
                next_id: 1,
                connections: std::collections::HashMap::new(),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn accept(&mut self, stream: UnixStream) -> ClientId {
        let id = self.next_id;
        self.next_id += 1;

        let (read_half, mut write_half) = stream.into_split();
        let (outbound_tx, mut outbound_rx) = unbounded_channel::<String>();

        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        if event_tx
                            .send(ConnectionEvent::Line(id, trimmed.to_string()))
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
            let _ = event_tx.send(ConnectionEvent::Disconnected(id));
        });

        tokio::spawn(async move {
            while let Some(line) = outbound_rx.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err()
                    || write_half.write_all(b"\n").await.is_err()
                {
                    // reader side reports the disconnect
                    debug!("editor {} went away mid-write", id);
                    break;
                }
            }
        });

        self.connections.insert(id, Connection { outbound: outbound_tx });
        id
    }

    /// Best-effort write of one line; failures are logged, the connection is
    /// reaped when its reader reports the hangup.
    pub fn send(&self, id: ClientId, line: String) {
        let Some(connection) = self.connections.get(&id) else {
            debug!("dropping line for unknown editor {}", id);
            return;
        };
        if connection.outbound.send(line).is_err() {
            warn!("editor {} outbound queue closed", id);
        }
    }

    pub fn broadcast(&self, line: &str) {
        for connection in self.connections.values() {
            let _ = connection.outbound.send(line.to_string());
        }
    }

    pub fn remove(&mut self, id: ClientId) {
        self.connections.remove(&id);
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }
}
