use crate::{
    jsonrpc,
    transport::{Event, Payload, StderrTail, Transport},
    Error, LanguageServerId, Result,
};

use crate::lsp::{self, Url};
use log::error;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::{
    io::{BufReader, BufWriter},
    process::{Child, Command},
    sync::mpsc::UnboundedSender,
};

/// One running language server child and the daemon-side bookkeeping
/// around it.
#[derive(Debug)]
pub struct Client {
    id: LanguageServerId,
    name: String,
    _process: Child,
    server_tx: UnboundedSender<Payload>,
    /// Shared by every client so a response from one server can never be
    /// confused with an outstanding request to another.
    request_counter: Arc<AtomicU64>,
    /// In-flight request id -> method, for responses the daemon dispatches
    /// itself (initialize, shutdown) rather than on behalf of an editor.
    inflight: Mutex<HashMap<u64, String>>,
    root_uri: Option<Url>,
    stderr_tail: StderrTail,
}

impl Client {
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        cmd: &str,
        args: &[String],
        root_uri: Option<Url>,
        id: LanguageServerId,
        name: String,
        request_counter: Arc<AtomicU64>,
        event_tx: UnboundedSender<(LanguageServerId, Event)>,
    ) -> Result<Self> {
        // Resolve path to the binary
        let cmd = switchboard_stdx::env::which(cmd)?;

        let mut process = Command::new(cmd)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // make sure the process is reaped on drop
            .kill_on_drop(true)
            .spawn()?;

        let writer = BufWriter::new(process.stdin.take().expect("Failed to open stdin"));
        let reader = BufReader::new(process.stdout.take().expect("Failed to open stdout"));
        let stderr = BufReader::new(process.stderr.take().expect("Failed to open stderr"));

        let (server_tx, stderr_tail) =
            Transport::start(reader, writer, stderr, event_tx, id, name.clone());

        Ok(Self {
            id,
            name,
            _process: process,
            server_tx,
            request_counter,
            inflight: Mutex::new(HashMap::new()),
            root_uri,
            stderr_tail,
        })
    }

    pub fn id(&self) -> LanguageServerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stderr_tail(&self) -> String {
        self.stderr_tail.snapshot()
    }

    fn next_request_id(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Removes and returns the method recorded for an in-flight request id.
    pub fn take_inflight(&self, id: u64) -> Option<String> {
        self.inflight.lock().remove(&id)
    }

    /// Frames and writes a request, returning its id from the shared
    /// counter.
    pub fn request<R: lsp::request::Request>(&self, params: R::Params) -> Result<u64>
    where
        R::Params: serde::Serialize,
    {
        let id = self.next_request_id();
        let params = serde_json::to_value(params)?;
        let request = jsonrpc::MethodCall {
            jsonrpc: Some(jsonrpc::Version::V2),
            method: R::METHOD.to_string(),
            params: params.into(),
            id: jsonrpc::Id::Num(id),
        };

        self.inflight.lock().insert(id, R::METHOD.to_string());
        self.server_tx
            .send(Payload::Request(request))
            .map_err(|_| Error::StreamClosed)?;

        Ok(id)
    }

    /// Send a RPC notification to the language server.
    pub fn notify<N: lsp::notification::Notification>(&self, params: N::Params)
    where
        N::Params: serde::Serialize,
    {
        let params = match serde_json::to_value(params) {
            Ok(params) => params,
            Err(err) => {
                error!(
                    "Failed to serialize params for notification '{}' for server '{}': {err}",
                    N::METHOD,
                    self.name,
                );
                return;
            }
        };

        let notification = jsonrpc::Notification {
            jsonrpc: Some(jsonrpc::Version::V2),
            method: N::METHOD.to_string(),
            params: params.into(),
        };

        if let Err(err) = self.server_tx.send(Payload::Notification(notification)) {
            error!(
                "Failed to send notification '{}' to server '{}': {err}",
                N::METHOD,
                self.name
            );
        }
    }

    /// Reply to a language server RPC call.
    pub fn reply(
        &self,
        id: jsonrpc::Id,
        result: core::result::Result<Value, jsonrpc::Error>,
    ) -> Result<()> {
        use jsonrpc::{Failure, Output, Success, Version};

        let output = match result {
            Ok(result) => Output::Success(Success {
                jsonrpc: Some(Version::V2),
                id,
                result,
            }),
            Err(error) => Output::Failure(Failure {
                jsonrpc: Some(Version::V2),
                id,
                error,
            }),
        };

        self.server_tx
            .send(Payload::Response(output))
            .map_err(|_| Error::StreamClosed)?;

        Ok(())
    }

    // -------------------------------------------------------------------------------------------
    // General messages
    // -------------------------------------------------------------------------------------------

    /// Sends `initialize` with a deliberately conservative, fixed capability
    /// set that the servers in the built-in table all tolerate.
    pub fn initialize(&self) -> Result<u64> {
        #[allow(deprecated)]
        let params = lsp::InitializeParams {
            process_id: Some(std::process::id()),
            root_path: None,
            root_uri: self.root_uri.clone(),
            initialization_options: None,
            capabilities: lsp::ClientCapabilities {
                workspace: Some(lsp::WorkspaceClientCapabilities {
                    apply_edit: Some(true),
                    execute_command: Some(lsp::DynamicRegistrationClientCapabilities {
                        dynamic_registration: Some(false),
                    }),
                    ..Default::default()
                }),
                text_document: Some(lsp::TextDocumentClientCapabilities {
                    document_symbol: Some(lsp::DocumentSymbolClientCapabilities {
                        hierarchical_document_symbol_support: Some(true),
                        ..Default::default()
                    }),
                    rename: Some(lsp::RenameClientCapabilities {
                        dynamic_registration: Some(false),
                        prepare_support: Some(false),
                        prepare_support_default_behavior: None,
                        honors_change_annotations: Some(false),
                    }),
                    code_action: Some(lsp::CodeActionClientCapabilities {
                        code_action_literal_support: Some(lsp::CodeActionLiteralSupport {
                            code_action_kind: lsp::CodeActionKindLiteralSupport {
                                value_set: [
                                    lsp::CodeActionKind::EMPTY,
                                    lsp::CodeActionKind::QUICKFIX,
                                    lsp::CodeActionKind::REFACTOR,
                                    lsp::CodeActionKind::SOURCE,
                                ]
                                .iter()
                                .map(|kind| kind.as_str().to_string())
                                .collect(),
                            },
                        }),
                        ..Default::default()
                    }),
                    inlay_hint: Some(lsp::InlayHintClientCapabilities {
                        dynamic_registration: Some(false),
                        resolve_support: None,
                    }),
                    publish_diagnostics: Some(lsp::PublishDiagnosticsClientCapabilities {
                        version_support: Some(true),
                        ..Default::default()
                    }),
                    hover: Some(lsp::HoverClientCapabilities {
                        // if not specified, rust-analyzer returns plaintext marked as
                        // markdown but badly formatted
                        content_format: Some(vec![lsp::MarkupKind::Markdown]),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                window: Some(lsp::WindowClientCapabilities {
                    work_done_progress: Some(true),
                    ..Default::default()
                }),
                general: Some(lsp::GeneralClientCapabilities {
                    position_encodings: Some(vec![lsp::PositionEncodingKind::UTF16]),
                    ..Default::default()
                }),
                ..Default::default()
            },
            trace: None,
            workspace_folders: self.root_uri.as_ref().map(|uri| {
                vec![lsp::WorkspaceFolder {
                    name: uri
                        .path_segments()
                        .and_then(|mut segments| segments.next_back())
                        .map(|basename| basename.to_string())
                        .unwrap_or_default(),
                    uri: uri.clone(),
                }]
            }),
            client_info: Some(lsp::ClientInfo {
                name: String::from("switchboard"),
                version: Some(String::from(env!("CARGO_PKG_VERSION"))),
            }),
            locale: None,
            work_done_progress_params: lsp::WorkDoneProgressParams::default(),
        };

        self.request::<lsp::request::Initialize>(params)
    }

    pub fn notify_initialized(&self) {
        self.notify::<lsp::notification::Initialized>(lsp::InitializedParams {})
    }

    pub fn shutdown(&self) -> Result<u64> {
        self.request::<lsp::request::Shutdown>(())
    }

    pub fn exit(&self) {
        self.notify::<lsp::notification::Exit>(())
    }

    /// Orderly teardown; the daemon does not wait on the child.
    pub fn shutdown_and_exit(&self) {
        if let Err(err) = self.shutdown() {
            log::warn!("language server '{}' failed to shut down: {}", self.name, err);
        }
        self.exit();
    }

    // -------------------------------------------------------------------------------------------
    // Text document
    // -------------------------------------------------------------------------------------------

    pub fn text_document_did_open(
        &self,
        uri: Url,
        language_id: String,
        version: i32,
        text: String,
    ) {
        self.notify::<lsp::notification::DidOpenTextDocument>(lsp::DidOpenTextDocumentParams {
            text_document: lsp::TextDocumentItem {
                uri,
                language_id,
                version,
                text,
            },
        })
    }

    /// Whole-document change event; edit deltas are not tracked.
    pub fn text_document_did_change(&self, uri: Url, version: i32, text: String) {
        self.notify::<lsp::notification::DidChangeTextDocument>(lsp::DidChangeTextDocumentParams {
            text_document: lsp::VersionedTextDocumentIdentifier { uri, version },
            content_changes: vec![lsp::TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text,
            }],
        })
    }

    pub fn text_document_did_save(&self, uri: Url, text: Option<String>) {
        self.notify::<lsp::notification::DidSaveTextDocument>(lsp::DidSaveTextDocumentParams {
            text_document: lsp::TextDocumentIdentifier { uri },
            text,
        })
    }

    pub fn text_document_will_save(&self, uri: Url) {
        self.notify::<lsp::notification::WillSaveTextDocument>(lsp::WillSaveTextDocumentParams {
            text_document: lsp::TextDocumentIdentifier { uri },
            reason: lsp::TextDocumentSaveReason::MANUAL,
        })
    }

    pub fn text_document_did_close(&self, uri: Url) {
        self.notify::<lsp::notification::DidCloseTextDocument>(lsp::DidCloseTextDocumentParams {
            text_document: lsp::TextDocumentIdentifier { uri },
        })
    }

    fn text_document_position(
        uri: Url,
        position: lsp::Position,
    ) -> lsp::TextDocumentPositionParams {
        lsp::TextDocumentPositionParams {
            text_document: lsp::TextDocumentIdentifier { uri },
            position,
        }
    }

    pub fn goto_definition(&self, uri: Url, position: lsp::Position) -> Result<u64> {
        self.request::<lsp::request::GotoDefinition>(lsp::GotoDefinitionParams {
            text_document_position_params: Self::text_document_position(uri, position),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        })
    }

    pub fn goto_declaration(&self, uri: Url, position: lsp::Position) -> Result<u64> {
        self.request::<lsp::request::GotoDeclaration>(lsp::request::GotoDeclarationParams {
            text_document_position_params: Self::text_document_position(uri, position),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        })
    }

    pub fn goto_type_definition(&self, uri: Url, position: lsp::Position) -> Result<u64> {
        self.request::<lsp::request::GotoTypeDefinition>(lsp::request::GotoTypeDefinitionParams {
            text_document_position_params: Self::text_document_position(uri, position),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        })
    }

    pub fn goto_implementation(&self, uri: Url, position: lsp::Position) -> Result<u64> {
        self.request::<lsp::request::GotoImplementation>(lsp::request::GotoImplementationParams {
            text_document_position_params: Self::text_document_position(uri, position),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        })
    }

    pub fn hover(&self, uri: Url, position: lsp::Position) -> Result<u64> {
        self.request::<lsp::request::HoverRequest>(lsp::HoverParams {
            text_document_position_params: Self::text_document_position(uri, position),
            work_done_progress_params: Default::default(),
        })
    }

    pub fn completion(&self, uri: Url, position: lsp::Position) -> Result<u64> {
        self.request::<lsp::request::Completion>(lsp::CompletionParams {
            text_document_position: Self::text_document_position(uri, position),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
            context: None,
        })
    }

    pub fn references(&self, uri: Url, position: lsp::Position) -> Result<u64> {
        self.request::<lsp::request::References>(lsp::ReferenceParams {
            text_document_position: Self::text_document_position(uri, position),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
            context: lsp::ReferenceContext {
                include_declaration: true,
            },
        })
    }

    pub fn rename(&self, uri: Url, position: lsp::Position, new_name: String) -> Result<u64> {
        self.request::<lsp::request::Rename>(lsp::RenameParams {
            text_document_position: Self::text_document_position(uri, position),
            new_name,
            work_done_progress_params: Default::default(),
        })
    }

    /// Code actions for a zero-width range at the cursor.
    pub fn code_actions(&self, uri: Url, position: lsp::Position) -> Result<u64> {
        self.request::<lsp::request::CodeActionRequest>(lsp::CodeActionParams {
            text_document: lsp::TextDocumentIdentifier { uri },
            range: lsp::Range {
                start: position,
                end: position,
            },
            context: Default::default(),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        })
    }

    pub fn document_symbols(&self, uri: Url) -> Result<u64> {
        self.request::<lsp::request::DocumentSymbolRequest>(lsp::DocumentSymbolParams {
            text_document: lsp::TextDocumentIdentifier { uri },
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        })
    }

    pub fn inlay_hints(&self, uri: Url, start_line: u32, end_line: u32) -> Result<u64> {
        self.request::<lsp::request::InlayHintRequest>(lsp::InlayHintParams {
            text_document: lsp::TextDocumentIdentifier { uri },
            range: lsp::Range {
                start: lsp::Position::new(start_line, 0),
                end: lsp::Position::new(end_line, 0),
            },
            work_done_progress_params: Default::default(),
        })
    }

    pub fn folding_range(&self, uri: Url) -> Result<u64> {
        self.request::<lsp::request::FoldingRangeRequest>(lsp::FoldingRangeParams {
            text_document: lsp::TextDocumentIdentifier { uri },
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        })
    }

    pub fn prepare_call_hierarchy(&self, uri: Url, position: lsp::Position) -> Result<u64> {
        self.request::<lsp::request::CallHierarchyPrepare>(lsp::CallHierarchyPrepareParams {
            text_document_position_params: Self::text_document_position(uri, position),
            work_done_progress_params: Default::default(),
        })
    }

    pub fn execute_command(&self, command: String, arguments: Vec<Value>) -> Result<u64> {
        self.request::<lsp::request::ExecuteCommand>(lsp::ExecuteCommandParams {
            command,
            arguments,
            work_done_progress_params: Default::default(),
        })
    }
}
