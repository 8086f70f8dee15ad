mod client;
pub mod config;
pub mod jsonrpc;
mod registry;
pub mod transport;
mod workspace;

pub use lsp_types as lsp;

pub use client::Client;
pub use registry::{ClientKey, PendingOpen, Registry};
pub use transport::{Event, ServerMessage};
pub use workspace::WorkspaceResolver;

pub type Result<T> = core::result::Result<T, Error>;

use thiserror::Error;

slotmap::new_key_type! {
    /// Identifies one spawned language server for the lifetime of the
    /// daemon.
    pub struct LanguageServerId;
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("protocol error: {0}")]
    Rpc(#[from] jsonrpc::Error),
    #[error("failed to parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("IO Error: {0}")]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    ExecutableNotFound(#[from] switchboard_stdx::env::ExecutableNotFoundError),
    #[error("stream closed")]
    StreamClosed,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
