//! Correlation tables: which editor asked for what.
//!
//! Every request sent to a language server on behalf of an editor gets an
//! entry keyed by the (globally unique) LSP request id; every expression
//! call sent to an editor gets one keyed by the expr id. Entries die with
//! the editor connection or the server they point at.

use crate::connection::ClientId;
use switchboard_lsp::LanguageServerId;

#[derive(Debug)]
pub struct PendingLspRequest {
    pub client_id: ClientId,
    /// Absent for fire-and-forget requests issued without an editor id.
    pub editor_id: Option<i64>,
    /// The editor-facing method name; picks the result transformation.
    pub method: String,
    pub ssh_host: Option<String>,
    pub file: Option<String>,
    pub server: LanguageServerId,
}

/// Why the daemon asked the editor to evaluate an expression.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ExprTag {
    RecentFiles,
}

#[derive(Debug)]
pub struct PendingEditorExpr {
    pub client_id: ClientId,
    pub editor_id: Option<i64>,
    pub tag: ExprTag,
}

#[derive(Default)]
pub struct Correlator {
    lsp: std::collections::HashMap<u64, PendingLspRequest>,
    expr: std::collections::HashMap<i64, PendingEditorExpr>,
    next_expr_id: i64,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_lsp(&mut self, request_id: u64, pending: PendingLspRequest) {
        self.lsp.insert(request_id, pending);
    }

    pub fn take_lsp(&mut self, request_id: u64) -> Option<PendingLspRequest> {
        self.lsp.remove(&request_id)
    }

    /// Allocates a fresh (positive) expr id and records the pending call.
    pub fn record_expr(&mut self, pending: PendingEditorExpr) -> i64 {
        self.next_expr_id += 1;
        self.expr.insert(self.next_expr_id, pending);
        self.next_expr_id
    }

    pub fn is_outstanding_expr(&self, id: i64) -> bool {
        self.expr.contains_key(&id)
    }

    pub fn take_expr(&mut self, id: i64) -> Option<PendingEditorExpr> {
        self.expr.remove(&id)
    }

    /// An editor went away: its in-flight requests will never be answered.
    pub fn purge_editor(&mut self, client_id: ClientId) {
        self.lsp.retain(|_, pending| pending.client_id != client_id);
        self.expr.retain(|_, pending| pending.client_id != client_id);
    }

    /// A server died: responses for its requests will never arrive.
    pub fn purge_server(&mut self, server: LanguageServerId) {
        self.lsp.retain(|_, pending| pending.server != server);
    }

    pub fn pending_lsp_count(&self) -> usize {
        self.lsp.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(client_id: ClientId, server: LanguageServerId) -> PendingLspRequest {
        PendingLspRequest {
            client_id,
            editor_id: Some(1),
            method: "goto_definition".into(),
            ssh_host: None,
            file: Some("/p/a.rs".into()),
            server,
        }
    }

    #[test]
    fn take_removes_the_entry() {
        let server = LanguageServerId::default();
        let mut correlator = Correlator::new();
        correlator.record_lsp(7, pending(1, server));

        assert!(correlator.take_lsp(7).is_some());
        assert!(correlator.take_lsp(7).is_none());
    }

    #[test]
    fn purging_an_editor_leaves_other_editors_alone() {
        let server = LanguageServerId::default();
        let mut correlator = Correlator::new();
        correlator.record_lsp(1, pending(1, server));
        correlator.record_lsp(2, pending(2, server));

        correlator.purge_editor(1);
        assert!(correlator.take_lsp(1).is_none());
        assert!(correlator.take_lsp(2).is_some());
    }

    #[test]
    fn expr_ids_are_outstanding_until_taken() {
        let mut correlator = Correlator::new();
        let id = correlator.record_expr(PendingEditorExpr {
            client_id: 1,
            editor_id: None,
            tag: ExprTag::RecentFiles,
        });

        assert!(id > 0);
        assert!(correlator.is_outstanding_expr(id));
        assert_eq!(correlator.take_expr(id).unwrap().tag, ExprTag::RecentFiles);
        assert!(!correlator.is_outstanding_expr(id));
    }
}
