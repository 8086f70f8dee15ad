//! The daemon's routing fabric: one loop owning every piece of mutable
//! state, fed by the listener, the editor connections, the language server
//! transports and the picker's file scanner.

use crate::connection::{ClientId, Clients, ConnectionEvent};
use crate::correlate::{Correlator, ExprTag, PendingLspRequest};
use crate::deferred::{DeferredQueue, DEFAULT_CAPACITY, DEFAULT_TTL};
use crate::dispatch::DispatchResult;
use crate::picker::Picker;
use crate::{transform, wire};

use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use switchboard_lsp::config::{self, LanguageConfig, Settings};
use switchboard_lsp::{
    jsonrpc, lsp, Event, LanguageServerId, Registry, ServerMessage,
};
use switchboard_syntax::{LanguageSource, Syntax};
use tokio::net::UnixListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Duration, Instant};

/// How long the daemon lingers after its last editor disconnects.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub struct Application {
    listener: UnixListener,
    conn_rx: UnboundedReceiver<ConnectionEvent>,
    lsp_rx: UnboundedReceiver<(LanguageServerId, Event)>,

    pub(crate) clients: Clients,
    pub(crate) registry: Registry,
    pub(crate) correlator: Correlator,
    pub(crate) deferred: DeferredQueue,
    /// language -> number of active `$/progress` sessions.
    pub(crate) indexing: HashMap<String, u32>,
    /// progress token -> title, so reports can echo a meaningful label.
    pub(crate) progress_titles: HashMap<String, String>,
    pub(crate) syntax: Syntax,
    pub(crate) picker: Picker,
    /// Monotonic didChange versions per document.
    pub(crate) versions: HashMap<lsp::Url, i32>,
    pub(crate) settings: Settings,

    idle_deadline: Option<Instant>,
}

fn syntax_sources(configs: &[LanguageConfig]) -> Vec<LanguageSource> {
    let default_queries = config::config_dir().map(|dir| dir.join("queries"));
    configs
        .iter()
        .map(|config| {
            let queries = config.queries.clone().or_else(|| {
                default_queries
                    .as_ref()
                    .map(|dir| dir.join(&config.language))
                    .filter(|dir| dir.is_dir())
            });
            LanguageSource {
                name: config.language.clone(),
                extensions: config.file_extensions.clone(),
                grammar: config.grammar.clone(),
                queries,
            }
        })
        .collect()
}

impl Application {
    pub fn new(listener: UnixListener) -> Self {
        let configs = config::load_configs();
        let settings = config::load_settings();
        let sources = syntax_sources(&configs);
        let (registry, lsp_rx) = Registry::new(configs);
        let (clients, conn_rx) = Clients::new();

        Self {
            listener,
            conn_rx,
            lsp_rx,
            clients,
            registry,
            correlator: Correlator::new(),
            deferred: DeferredQueue::new(DEFAULT_CAPACITY, DEFAULT_TTL),
            indexing: HashMap::new(),
            progress_titles: HashMap::new(),
            syntax: Syntax::new(sources),
            picker: Picker::new(),
            versions: HashMap::new(),
            settings,
            // nobody is connected yet
            idle_deadline: Some(Instant::now() + IDLE_TIMEOUT),
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                biased;

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let id = self.clients.accept(stream);
                            self.idle_deadline = None;
                            info!("editor {} connected", id);
                        }
                        Err(err) => warn!("accept failed: {}", err),
                    }
                }

                Some(event) = self.conn_rx.recv() => {
                    match event {
                        ConnectionEvent::Line(id, line) => self.handle_editor_line(id, &line),
                        ConnectionEvent::Disconnected(id) => self.disconnect(id),
                    }
                }

                Some((server, event)) = self.lsp_rx.recv() => {
                    self.handle_language_server_event(server, event);
                }

                path = self.picker.scan_recv(), if self.picker.is_scanning() => {
                    match path {
                        Some(path) => self.picker.push_path(path),
                        None => self.picker.scan_done(),
                    }
                }

                _ = tokio::time::sleep_until(self.idle_deadline.unwrap_or_else(Instant::now)),
                    if self.idle_deadline.is_some() =>
                {
                    info!("no editors for {:?}, exiting", IDLE_TIMEOUT);
                    break;
                }
            }
        }

        self.registry.shutdown_all();
        Ok(())
    }

    fn disconnect(&mut self, id: ClientId) {
        info!("editor {} disconnected", id);
        self.clients.remove(id);
        self.correlator.purge_editor(id);
        self.deferred.purge_client(id);
        if self.clients.is_empty() {
            self.idle_deadline = Some(Instant::now() + IDLE_TIMEOUT);
        }
    }

    // ---------------------------------------------------------------------------------------
    // Editor side
    // ---------------------------------------------------------------------------------------

    pub(crate) fn handle_editor_line(&mut self, client_id: ClientId, line: &str) {
        let message =
            match wire::parse_line(line, |id| self.correlator.is_outstanding_expr(id)) {
                Ok(message) => message,
                Err(err) => {
                    error!("editor {}: {}", client_id, err);
                    return;
                }
            };

        match message {
            wire::EditorMessage::Request { id, method, params } => {
                let result = self.dispatch(client_id, Some(id), &method, params);
                self.finish_dispatch(client_id, Some(id), line, result);
            }
            wire::EditorMessage::Notification { method, params } => {
                let result = self.dispatch(client_id, None, &method, params);
                self.finish_dispatch(client_id, None, line, result);
            }
            wire::EditorMessage::Response { id, result } => {
                self.handle_expr_response(id, result);
            }
        }
    }

    fn finish_dispatch(
        &mut self,
        client_id: ClientId,
        editor_id: Option<i64>,
        line: &str,
        result: DispatchResult,
    ) {
        match result {
            DispatchResult::Data(value) => {
                if let Some(id) = editor_id {
                    self.clients.send(client_id, wire::response(id, &value));
                }
            }
            DispatchResult::Empty => {
                if let Some(id) = editor_id {
                    self.clients.send(client_id, wire::response(id, &Value::Null));
                }
            }
            DispatchResult::Pending(lsp_id) => {
                debug!("editor {} waiting on lsp request {}", client_id, lsp_id);
            }
            DispatchResult::Initializing => {
                if let Some(evicted) = self.deferred.push(client_id, line.to_string()) {
                    debug!("deferred queue full, dropping a request");
                    if self.settings.notify_evictions {
                        self.clients.send(
                            evicted.client_id,
                            wire::echo("switchboard: dropped a queued request"),
                        );
                    }
                }
            }
        }
    }

    fn handle_expr_response(&mut self, id: i64, result: Value) {
        let Some(pending) = self.correlator.take_expr(id) else {
            debug!("response for unknown expr id {}", id);
            return;
        };
        match pending.tag {
            ExprTag::RecentFiles => {
                let recent: Vec<String> = result
                    .as_array()
                    .map(|entries| {
                        entries
                            .iter()
                            .filter_map(|entry| entry.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                self.picker.set_mru(recent);
            }
        }
    }

    // ---------------------------------------------------------------------------------------
    // Language server side
    // ---------------------------------------------------------------------------------------

    fn handle_language_server_event(&mut self, server: LanguageServerId, event: Event) {
        match event {
            Event::Message(ServerMessage::Output(output)) => {
                self.handle_server_response(server, output)
            }
            Event::Message(ServerMessage::Call(jsonrpc::Call::MethodCall(call))) => {
                self.handle_server_request(server, call)
            }
            Event::Message(ServerMessage::Call(jsonrpc::Call::Notification(notification))) => {
                self.handle_server_notification(server, notification)
            }
            Event::Message(ServerMessage::Call(jsonrpc::Call::Invalid { id })) => {
                error!("invalid message from language server, id {:?}", id);
            }
            Event::Exited => self.on_server_exit(server),
        }
    }

    fn handle_server_response(&mut self, server: LanguageServerId, output: jsonrpc::Output) {
        let (id, result) = match output {
            jsonrpc::Output::Success(jsonrpc::Success { id, result, .. }) => (id, Ok(result)),
            jsonrpc::Output::Failure(jsonrpc::Failure { id, error, .. }) => (id, Err(error)),
        };
        let jsonrpc::Id::Num(id) = id else {
            debug!("response with non-numeric id {:?}", id);
            return;
        };

        let method = self
            .registry
            .client(server)
            .and_then(|client| client.take_inflight(id));

        // initialize is answered to the registry, not an editor
        if let Some(key) = self.registry.key_of(server).cloned() {
            if self.registry.take_pending_init(&key, id) {
                match result {
                    Ok(_) => {
                        self.registry.handle_initialize_response(&key);
                        self.flush_deferred();
                    }
                    Err(err) => {
                        error!("initialize failed for {}: {}", key, err);
                        self.clients.broadcast(&wire::echoerr(&format!(
                            "switchboard: {} failed to initialize",
                            key.language()
                        )));
                        self.remove_server(server);
                    }
                }
                return;
            }
        }

        let Some(pending) = self.correlator.take_lsp(id) else {
            debug!("unmatched response {} ({:?})", id, method);
            return;
        };
        if !self.clients.contains(pending.client_id) {
            debug!("response {} for a disconnected editor", id);
            return;
        }

        let value = match result {
            Ok(value) => transform_result(&pending, value),
            Err(err) => {
                error!("{} failed: {}", pending.method, err);
                Value::Null
            }
        };
        if let Some(editor_id) = pending.editor_id {
            self.clients
                .send(pending.client_id, wire::response(editor_id, &value));
        }
    }

    fn handle_server_request(&mut self, server: LanguageServerId, call: jsonrpc::MethodCall) {
        let params = Value::from(call.params);
        let reply = match call.method.as_str() {
            "workspace/applyEdit" => {
                self.clients
                    .broadcast(&wire::notification("applyEdit", &params));
                json!({ "applied": true })
            }
            "window/workDoneProgress/create"
            | "client/registerCapability"
            | "client/unregisterCapability" => Value::Null,
            other => {
                debug!("acknowledging unhandled server request {}", other);
                Value::Null
            }
        };

        if let Some(client) = self.registry.client(server) {
            if let Err(err) = client.reply(call.id, Ok(reply)) {
                warn!("failed to answer server request: {}", err);
            }
        }
    }

    fn handle_server_notification(
        &mut self,
        server: LanguageServerId,
        notification: jsonrpc::Notification,
    ) {
        match notification.method.as_str() {
            "$/progress" => self.handle_progress(server, notification.params),
            "textDocument/publishDiagnostics" => {
                let params = Value::from(notification.params);
                self.clients
                    .broadcast(&wire::notification("diagnostics", &params));
            }
            "window/showMessage" => {
                let params = Value::from(notification.params);
                if let Some(message) = params.get("message").and_then(Value::as_str) {
                    self.clients.broadcast(&wire::echo(message));
                }
            }
            "window/logMessage" => {
                let params = Value::from(notification.params);
                info!(
                    "server log: {}",
                    params.get("message").and_then(Value::as_str).unwrap_or("")
                );
            }
            other => debug!("unhandled server notification {}", other),
        }
    }

    fn handle_progress(&mut self, server: LanguageServerId, params: jsonrpc::Params) {
        let params: lsp::ProgressParams = match params.parse() {
            Ok(params) => params,
            Err(err) => {
                error!("malformed $/progress: {}", err);
                return;
            }
        };
        let Some(language) = self
            .registry
            .key_of(server)
            .map(|key| key.language().to_string())
        else {
            return;
        };
        let token = match &params.token {
            lsp::NumberOrString::Number(n) => n.to_string(),
            lsp::NumberOrString::String(s) => s.clone(),
        };

        let lsp::ProgressParamsValue::WorkDone(work) = params.value;
        match work {
            lsp::WorkDoneProgress::Begin(begin) => {
                *self.indexing.entry(language).or_insert(0) += 1;
                self.progress_titles.insert(token, begin.title);
            }
            lsp::WorkDoneProgress::Report(report) => {
                let title = self
                    .progress_titles
                    .get(&token)
                    .map(String::as_str)
                    .unwrap_or("working");
                let mut status = format!("[{}] {}", language, title);
                if let Some(message) = &report.message {
                    status.push_str(": ");
                    status.push_str(message);
                }
                if let Some(percentage) = report.percentage {
                    status.push_str(&format!(" ({}%)", percentage));
                }
                self.clients.broadcast(&wire::echo(&status));
            }
            lsp::WorkDoneProgress::End(_) => {
                self.progress_titles.remove(&token);
                if let Some(count) = self.indexing.get_mut(&language) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        self.indexing.remove(&language);
                    }
                }
                self.flush_deferred();
            }
        }
    }

    /// Replays parked requests once nothing is initializing the editor's
    /// way and no language is indexing. Stale entries are dropped; entries
    /// for editors that have since disconnected are skipped.
    fn flush_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        if self.indexing.values().any(|&count| count > 0) {
            return;
        }

        let entries = self.deferred.drain_fresh();
        debug!("replaying {} deferred requests", entries.len());
        for entry in entries {
            if self.clients.contains(entry.client_id) {
                self.handle_editor_line(entry.client_id, &entry.line);
            }
        }
    }

    fn on_server_exit(&mut self, server: LanguageServerId) {
        let Some(client) = self.registry.client(server) else {
            return;
        };
        let name = client.name().to_string();
        let tail = client.stderr_tail();
        if tail.is_empty() {
            error!("language server '{}' exited", name);
        } else {
            error!("language server '{}' exited, stderr tail:\n{}", name, tail);
        }

        self.clients.broadcast(&wire::echoerr(&format!(
            "switchboard: {} language server exited",
            name
        )));
        self.remove_server(server);
    }

    fn remove_server(&mut self, server: LanguageServerId) {
        self.correlator.purge_server(server);
        if let Some(key) = self.registry.remove(server) {
            debug!("removed language server for {}", key);
        }
    }
}

fn transform_result(pending: &PendingLspRequest, value: Value) -> Value {
    let ssh_host = pending.ssh_host.as_deref();
    match pending.method.as_str() {
        "goto_definition" | "goto_declaration" | "goto_type_definition" | "goto_implementation" => {
            transform::goto_response(&value, ssh_host)
        }
        "picker_symbol_query" => {
            transform::symbol_items(&value, pending.file.as_deref().unwrap_or(""), ssh_host)
        }
        _ => value,
    }
}
