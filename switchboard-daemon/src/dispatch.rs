//! Editor method dispatch.
//!
//! Every editor request or notification lands here; a handler either
//! answers directly, fires a language server request and leaves the rest to
//! the correlator, or signals that the line must be parked until the
//! relevant server is ready.

use crate::application::Application;
use crate::connection::ClientId;
use crate::correlate::{ExprTag, PendingEditorExpr, PendingLspRequest};
use crate::wire;

use log::{debug, error, warn};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use switchboard_lsp::{lsp, ClientKey, LanguageServerId, PendingOpen};
use switchboard_stdx::path::split_remote;

#[derive(Debug)]
pub enum DispatchResult {
    /// An immediate answer.
    Data(Value),
    /// Nothing to send back (notifications, or "no result").
    Empty,
    /// A language server request is in flight under this id.
    Pending(u64),
    /// The responsible server is initializing or its language is indexing;
    /// the raw line must be parked and replayed.
    Initializing,
}

/// Everything the language-server-backed handlers need about a request's
/// target file.
struct LspContext {
    server: LanguageServerId,
    key: ClientKey,
    language_id: String,
    uri: lsp::Url,
    ssh_host: Option<String>,
}

fn param_str<'v>(params: &'v Value, key: &str) -> Option<&'v str> {
    params.get(key).and_then(Value::as_str)
}

fn param_u32(params: &Value, key: &str) -> u32 {
    params.get(key).and_then(Value::as_u64).unwrap_or(0) as u32
}

fn position(params: &Value) -> lsp::Position {
    lsp::Position::new(param_u32(params, "line"), param_u32(params, "column"))
}

impl Application {
    pub(crate) fn dispatch(
        &mut self,
        client_id: ClientId,
        editor_id: Option<i64>,
        method: &str,
        params: Value,
    ) -> DispatchResult {
        match method {
            "file_open" => self.handle_file_open(client_id, &params),

            "goto_definition" | "goto_declaration" | "goto_type_definition"
            | "goto_implementation" | "hover" | "completion" | "references" | "rename"
            | "code_action" | "document_symbols" | "picker_symbol_query" | "inlay_hints"
            | "folding_range" | "call_hierarchy" | "execute_command" => {
                self.handle_lsp_query(client_id, editor_id, method, &params)
            }

            "did_change" => self.handle_did_change(client_id, &params),
            "did_save" => self.handle_did_save(client_id, &params),
            "will_save" => self.handle_will_save(client_id, &params),
            "did_close" => self.handle_did_close(client_id, &params),

            "ts_symbols" | "ts_folds" | "ts_textobjects" | "ts_highlights" => {
                self.handle_syntax_query(method, &params)
            }

            "picker_init" => self.handle_picker_init(client_id, &params),
            "picker_file_query" => {
                DispatchResult::Data(self.picker.file_query(param_str(&params, "query").unwrap_or("")))
            }
            "picker_grep_query" => {
                DispatchResult::Data(self.picker.grep_query(param_str(&params, "query").unwrap_or("")))
            }
            "picker_close" => {
                self.picker.close();
                DispatchResult::Empty
            }

            "status" => self.handle_status(),

            other => {
                warn!("unknown editor method '{}'", other);
                DispatchResult::Empty
            }
        }
    }

    /// Shared preamble: validate the file parameter, split off an scp host,
    /// detect the language and get or create its client. With `defer` set,
    /// signals [`DispatchResult::Initializing`] while the server is not yet
    /// able to answer queries.
    fn get_lsp_context(
        &mut self,
        client_id: ClientId,
        params: &Value,
        defer: bool,
    ) -> Result<LspContext, DispatchResult> {
        let Some(file) = param_str(params, "file") else {
            debug!("request without a file parameter");
            return Err(DispatchResult::Empty);
        };
        let (ssh_host, path) = split_remote(file);

        let Some(config) = self.registry.language_for_path(path) else {
            debug!("no language configured for {}", path);
            return Err(DispatchResult::Empty);
        };
        let language = config.language.clone();
        let language_id = config.language_id.clone();

        if config.command.is_empty() {
            // grammar-only language, nothing to route
            debug!("no server configured for {}", language);
            return Err(DispatchResult::Empty);
        }
        if self.registry.has_spawn_failed(&language) {
            return Err(DispatchResult::Empty);
        }
        if defer && self.indexing.get(&language).copied().unwrap_or(0) > 0 {
            return Err(DispatchResult::Initializing);
        }

        let (server, key) = match self.registry.get_or_create(&language, Path::new(path)) {
            Ok(found) => found,
            Err(err) => {
                error!("cannot start {} server: {}", language, err);
                self.registry.mark_spawn_failed(&language);
                self.clients.send(
                    client_id,
                    wire::echoerr(&format!("switchboard: cannot start {} server: {}", language, err)),
                );
                return Err(DispatchResult::Empty);
            }
        };

        if defer && self.registry.is_initializing(&key) {
            return Err(DispatchResult::Initializing);
        }

        let Ok(uri) = lsp::Url::from_file_path(path) else {
            debug!("{} is not an absolute path", path);
            return Err(DispatchResult::Empty);
        };

        Ok(LspContext {
            server,
            key,
            language_id,
            uri,
            ssh_host: ssh_host.map(str::to_string),
        })
    }

    fn handle_file_open(&mut self, client_id: ClientId, params: &Value) -> DispatchResult {
        let text = param_str(params, "text").unwrap_or("").to_string();

        if let Some(file) = param_str(params, "file") {
            self.picker.note_open(file);
            let (_, path) = split_remote(file);
            if let Err(err) = self.syntax.parse_buffer(path, &text) {
                debug!("not parsing {}: {}", path, err);
            }
        }

        let ctx = match self.get_lsp_context(client_id, params, false) {
            Ok(ctx) => ctx,
            Err(result) => return result,
        };

        self.versions.insert(ctx.uri.clone(), 0);
        if self.registry.is_initializing(&ctx.key) {
            self.registry.queue_pending_open(
                &ctx.key,
                PendingOpen {
                    uri: ctx.uri,
                    language_id: ctx.language_id,
                    version: 0,
                    text,
                },
            );
        } else if let Some(client) = self.registry.client(ctx.server) {
            client.text_document_did_open(ctx.uri, ctx.language_id, 0, text);
        }

        DispatchResult::Data(json!({ "action": "none" }))
    }

    fn handle_lsp_query(
        &mut self,
        client_id: ClientId,
        editor_id: Option<i64>,
        method: &str,
        params: &Value,
    ) -> DispatchResult {
        let ctx = match self.get_lsp_context(client_id, params, true) {
            Ok(ctx) => ctx,
            Err(result) => return result,
        };
        let Some(client) = self.registry.client(ctx.server).cloned() else {
            return DispatchResult::Empty;
        };

        let position = position(params);
        let uri = ctx.uri.clone();
        let sent = match method {
            "goto_definition" => client.goto_definition(uri, position),
            "goto_declaration" => client.goto_declaration(uri, position),
            "goto_type_definition" => client.goto_type_definition(uri, position),
            "goto_implementation" => client.goto_implementation(uri, position),
            "hover" => client.hover(uri, position),
            "completion" => client.completion(uri, position),
            "references" => client.references(uri, position),
            "rename" => {
                let Some(new_name) = param_str(params, "new_name") else {
                    debug!("rename without new_name");
                    return DispatchResult::Empty;
                };
                client.rename(uri, position, new_name.to_string())
            }
            "code_action" => client.code_actions(uri, position),
            "document_symbols" | "picker_symbol_query" => client.document_symbols(uri),
            "inlay_hints" => client.inlay_hints(
                uri,
                param_u32(params, "start_line"),
                param_u32(params, "end_line"),
            ),
            "folding_range" => client.folding_range(uri),
            "call_hierarchy" => client.prepare_call_hierarchy(uri, position),
            "execute_command" => {
                let Some(command) = param_str(params, "command") else {
                    debug!("execute_command without a command");
                    return DispatchResult::Empty;
                };
                let arguments = params
                    .get("arguments")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                client.execute_command(command.to_string(), arguments)
            }
            _ => unreachable!("not an lsp query method: {method}"),
        };

        match sent {
            Ok(lsp_id) => {
                self.correlator.record_lsp(
                    lsp_id,
                    PendingLspRequest {
                        client_id,
                        editor_id,
                        method: method.to_string(),
                        ssh_host: ctx.ssh_host,
                        file: param_str(params, "file").map(str::to_string),
                        server: ctx.server,
                    },
                );
                DispatchResult::Pending(lsp_id)
            }
            Err(err) => {
                error!("failed to send {}: {}", method, err);
                DispatchResult::Empty
            }
        }
    }

    fn handle_did_change(&mut self, client_id: ClientId, params: &Value) -> DispatchResult {
        let text = param_str(params, "text").unwrap_or("").to_string();

        if let Some(file) = param_str(params, "file") {
            let (_, path) = split_remote(file);
            if let Err(err) = self.syntax.parse_buffer(path, &text) {
                debug!("not parsing {}: {}", path, err);
            }
        }

        let ctx = match self.get_lsp_context(client_id, params, false) {
            Ok(ctx) => ctx,
            Err(result) => return result,
        };
        if self.registry.is_initializing(&ctx.key) {
            return DispatchResult::Empty;
        }

        let version = self
            .versions
            .entry(ctx.uri.clone())
            .and_modify(|version| *version += 1)
            .or_insert(1);
        if let Some(client) = self.registry.client(ctx.server) {
            client.text_document_did_change(ctx.uri.clone(), *version, text);
        }
        DispatchResult::Empty
    }

    fn handle_did_save(&mut self, client_id: ClientId, params: &Value) -> DispatchResult {
        let ctx = match self.get_lsp_context(client_id, params, false) {
            Ok(ctx) => ctx,
            Err(result) => return result,
        };
        if let Some(client) = self.registry.client(ctx.server) {
            let text = param_str(params, "text").map(str::to_string);
            client.text_document_did_save(ctx.uri, text);
        }
        DispatchResult::Empty
    }

    fn handle_will_save(&mut self, client_id: ClientId, params: &Value) -> DispatchResult {
        let ctx = match self.get_lsp_context(client_id, params, false) {
            Ok(ctx) => ctx,
            Err(result) => return result,
        };
        if let Some(client) = self.registry.client(ctx.server) {
            client.text_document_will_save(ctx.uri);
        }
        DispatchResult::Empty
    }

    fn handle_did_close(&mut self, client_id: ClientId, params: &Value) -> DispatchResult {
        if let Some(file) = param_str(params, "file") {
            let (_, path) = split_remote(file);
            self.syntax.remove_buffer(path);
        }

        let ctx = match self.get_lsp_context(client_id, params, false) {
            Ok(ctx) => ctx,
            Err(result) => return result,
        };
        self.versions.remove(&ctx.uri);
        if let Some(client) = self.registry.client(ctx.server) {
            client.text_document_did_close(ctx.uri);
        }
        DispatchResult::Empty
    }

    fn handle_syntax_query(&mut self, method: &str, params: &Value) -> DispatchResult {
        let Some(file) = param_str(params, "file") else {
            return DispatchResult::Empty;
        };
        let (_, path) = split_remote(file);

        // callers may push fresh content along with the query
        if let Some(text) = param_str(params, "text") {
            if let Err(err) = self.syntax.parse_buffer(path, text) {
                debug!("not parsing {}: {}", path, err);
            }
        }

        let result = match method {
            "ts_symbols" => self.syntax.symbols(path),
            "ts_folds" => self.syntax.folds(path),
            "ts_textobjects" => self.syntax.textobjects(path),
            "ts_highlights" => self.syntax.highlights(path),
            _ => unreachable!("not a syntax query method: {method}"),
        };

        match result {
            Ok(value) => DispatchResult::Data(value),
            Err(err) => {
                debug!("{} on {}: {}", method, path, err);
                DispatchResult::Data(json!([]))
            }
        }
    }

    fn handle_picker_init(&mut self, client_id: ClientId, params: &Value) -> DispatchResult {
        let Some(cwd) = param_str(params, "cwd") else {
            debug!("picker_init without a cwd");
            return DispatchResult::Empty;
        };

        let recent = params.get("recent_files").and_then(Value::as_array).map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.as_str().map(str::to_string))
                .collect::<Vec<_>>()
        });
        let fetch_recent = recent.is_none();

        self.picker.init(PathBuf::from(cwd), recent);

        if fetch_recent {
            let expr_id = self.correlator.record_expr(PendingEditorExpr {
                client_id,
                editor_id: None,
                tag: ExprTag::RecentFiles,
            });
            self.clients
                .send(client_id, wire::expr("v:oldfiles", expr_id));
        }

        DispatchResult::Data(json!({ "action": "none" }))
    }

    fn handle_status(&mut self) -> DispatchResult {
        let servers: Vec<Value> = self
            .registry
            .iter()
            .map(|(key, client)| {
                json!({
                    "language": key.language(),
                    "workspace": key.workspace(),
                    "name": client.name(),
                    "initializing": self.registry.is_initializing(key),
                })
            })
            .collect();

        DispatchResult::Data(json!({
            "editors": self.clients.len(),
            "servers": servers,
            "indexing": self.indexing,
            "deferred": self.deferred.len(),
            "pending_requests": self.correlator.pending_lsp_count(),
        }))
    }
}
