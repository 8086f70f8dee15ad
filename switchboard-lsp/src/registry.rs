use crate::{
    client::Client,
    config::{detect_language, LanguageConfig},
    lsp::Url,
    transport::Event,
    workspace::WorkspaceResolver,
    Error, LanguageServerId, Result,
};

use log::info;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{atomic::AtomicU64, Arc};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Identity under which language server clients are pooled: the language
/// name plus the workspace URI, NUL-separated, or the bare language when the
/// file has no workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn new(language: &str, workspace: Option<&Url>) -> Self {
        match workspace {
            Some(uri) => Self(format!("{}\0{}", language, uri)),
            None => Self(language.to_string()),
        }
    }

    pub fn language(&self) -> &str {
        self.0.split('\0').next().unwrap_or(&self.0)
    }

    pub fn workspace(&self) -> Option<&str> {
        self.0.split_once('\0').map(|(_, uri)| uri)
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.workspace() {
            Some(uri) => write!(f, "{} in {}", self.language(), uri),
            None => f.write_str(self.language()),
        }
    }
}

/// A didOpen that arrived while the server was still initializing; replayed
/// in arrival order once it is ready.
#[derive(Debug)]
pub struct PendingOpen {
    pub uri: Url,
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

/// Owns every live language server client, keyed by [`ClientKey`], and the
/// per-client initialization state.
pub struct Registry {
    configs: Vec<LanguageConfig>,
    clients: slotmap::SlotMap<LanguageServerId, Arc<Client>>,
    by_key: HashMap<ClientKey, LanguageServerId>,
    keys: slotmap::SecondaryMap<LanguageServerId, ClientKey>,
    /// key -> id of the outstanding `initialize` request.
    pending_init: HashMap<ClientKey, u64>,
    pending_opens: HashMap<ClientKey, Vec<PendingOpen>>,
    failed_spawns: HashSet<String>,
    resolver: WorkspaceResolver,
    request_counter: Arc<AtomicU64>,
    event_tx: UnboundedSender<(LanguageServerId, Event)>,
}

impl Registry {
    pub fn new(
        configs: Vec<LanguageConfig>,
    ) -> (Self, UnboundedReceiver<(LanguageServerId, Event)>) {
        let (event_tx, event_rx) = unbounded_channel();
        (
            Self {
                configs,
                clients: slotmap::SlotMap::with_key(),
                by_key: HashMap::new(),
                keys: slotmap::SecondaryMap::new(),
                pending_init: HashMap::new(),
                pending_opens: HashMap::new(),
                failed_spawns: HashSet::new(),
                resolver: WorkspaceResolver::new(),
                request_counter: Arc::new(AtomicU64::new(0)),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn language_for_path(&self, path: &str) -> Option<&LanguageConfig> {
        detect_language(&self.configs, path)
    }

    pub fn config_for_language(&self, language: &str) -> Option<&LanguageConfig> {
        self.configs.iter().find(|c| c.language == language)
    }

    pub fn configs(&self) -> &[LanguageConfig] {
        &self.configs
    }

    pub fn client(&self, id: LanguageServerId) -> Option<&Arc<Client>> {
        self.clients.get(id)
    }

    pub fn client_by_key(&self, key: &ClientKey) -> Option<&Arc<Client>> {
        self.by_key.get(key).and_then(|&id| self.clients.get(id))
    }

    pub fn key_of(&self, id: LanguageServerId) -> Option<&ClientKey> {
        self.keys.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientKey, &Arc<Client>)> {
        self.by_key
            .iter()
            .filter_map(|(key, &id)| Some((key, self.clients.get(id)?)))
    }

    /// The pooling key `file` resolves to for `language`: a workspace-scoped
    /// key when a marker is found, the bare language otherwise.
    pub fn client_key_for(&mut self, language: &str, file: &Path) -> Result<ClientKey> {
        let markers = self
            .config_for_language(language)
            .map(|config| config.workspace_markers.clone())
            .ok_or_else(|| Error::Other(anyhow::anyhow!("unknown language '{}'", language)))?;
        let workspace = self.resolver.resolve(file, &markers);
        Ok(ClientKey::new(language, workspace.as_ref()))
    }

    /// Looks up or spawns the client responsible for `file`. Files without a
    /// workspace of their own reuse any existing client for the language, so
    /// toolchain and dependency sources do not breed servers.
    pub fn get_or_create(
        &mut self,
        language: &str,
        file: &Path,
    ) -> Result<(LanguageServerId, ClientKey)> {
        let config = self
            .config_for_language(language)
            .cloned()
            .ok_or_else(|| Error::Other(anyhow::anyhow!("unknown language '{}'", language)))?;
        let config = &config;
        let key = self.client_key_for(language, file)?;

        if let Some(&id) = self.by_key.get(&key) {
            return Ok((id, key));
        }

        if key.workspace().is_none() {
            if let Some((existing, &id)) = self
                .by_key
                .iter()
                .find(|(existing, _)| existing.language() == config.language)
            {
                return Ok((id, existing.clone()));
            }
        }

        if config.command.is_empty() {
            return Err(Error::Other(anyhow::anyhow!(
                "no server configured for language '{}'",
                config.language
            )));
        }

        let workspace = key.workspace().and_then(|uri| Url::parse(uri).ok());
        let id = self.clients.try_insert_with_key(|id| {
            Client::start(
                &config.command,
                &config.args,
                workspace.clone(),
                id,
                config.language.clone(),
                self.request_counter.clone(),
                self.event_tx.clone(),
            )
            .map(Arc::new)
        })?;

        let init_id = match self.clients[id].initialize() {
            Ok(init_id) => init_id,
            Err(err) => {
                self.clients.remove(id);
                return Err(err);
            }
        };
        self.by_key.insert(key.clone(), id);
        self.keys.insert(id, key.clone());
        self.pending_init.insert(key.clone(), init_id);
        info!("spawned language server for {}", key);

        Ok((id, key))
    }

    pub fn is_initializing(&self, key: &ClientKey) -> bool {
        self.pending_init.contains_key(key)
    }

    /// True when `id` belongs to `key`'s outstanding `initialize` request.
    pub fn take_pending_init(&mut self, key: &ClientKey, id: u64) -> bool {
        if self.pending_init.get(key) == Some(&id) {
            self.pending_init.remove(key);
            true
        } else {
            false
        }
    }

    pub fn queue_pending_open(&mut self, key: &ClientKey, open: PendingOpen) {
        self.pending_opens.entry(key.clone()).or_default().push(open);
    }

    /// Completes initialization: acknowledge with `initialized` and replay
    /// queued opens in arrival order.
    pub fn handle_initialize_response(&mut self, key: &ClientKey) {
        let Some(client) = self.client_by_key(key).cloned() else {
            return;
        };
        client.notify_initialized();
        info!("language server for {} ready", key);

        if let Some(opens) = self.pending_opens.remove(key) {
            for open in opens {
                client.text_document_did_open(open.uri, open.language_id, open.version, open.text);
            }
        }
    }

    /// Drops a client and everything queued against it.
    pub fn remove(&mut self, id: LanguageServerId) -> Option<ClientKey> {
        let key = self.keys.remove(id)?;
        self.clients.remove(id);
        self.by_key.remove(&key);
        self.pending_init.remove(&key);
        self.pending_opens.remove(&key);
        Some(key)
    }

    pub fn has_spawn_failed(&self, language: &str) -> bool {
        self.failed_spawns.contains(language)
    }

    pub fn mark_spawn_failed(&mut self, language: &str) {
        self.failed_spawns.insert(language.to_string());
    }

    /// Orderly shutdown of every live server.
    pub fn shutdown_all(&self) {
        for (_, client) in self.iter() {
            client.shutdown_and_exit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::builtin_configs;

    #[test]
    fn client_key_shape() {
        let uri = Url::parse("file:///repo").unwrap();
        let scoped = ClientKey::new("rust", Some(&uri));
        assert_eq!(scoped.language(), "rust");
        assert_eq!(scoped.workspace(), Some("file:///repo"));

        let bare = ClientKey::new("rust", None);
        assert_eq!(bare.language(), "rust");
        assert_eq!(bare.workspace(), None);
        assert_ne!(scoped, bare);
    }

    #[test]
    fn files_in_one_workspace_share_a_key() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("proj/cmd")).unwrap();
        std::fs::create_dir_all(root.join("proj/internal")).unwrap();
        std::fs::write(root.join("proj/go.mod"), "module m").unwrap();

        let (mut registry, _events) = Registry::new(builtin_configs());
        let a = registry
            .client_key_for("go", &root.join("proj/cmd/main.go"))
            .unwrap();
        let b = registry
            .client_key_for("go", &root.join("proj/internal/util.go"))
            .unwrap();
        assert_eq!(a, b);
        assert!(a.workspace().is_some());
    }

    #[test]
    fn dependency_cache_files_resolve_to_the_bare_language_key() {
        let dir = tempfile::tempdir().unwrap();
        let cargo_home = dir.path().join("cargo");
        let vendored = cargo_home.join("registry/src/index-0000/serde-1.0.0/src");
        std::fs::create_dir_all(&vendored).unwrap();
        // the vendored crate ships its own manifest, which must not win
        std::fs::write(
            cargo_home.join("registry/src/index-0000/serde-1.0.0/Cargo.toml"),
            "[package]",
        )
        .unwrap();
        std::env::set_var("CARGO_HOME", &cargo_home);

        let (mut registry, _events) = Registry::new(builtin_configs());
        let key = registry
            .client_key_for("rust", &vendored.join("lib.rs"))
            .unwrap();
        assert_eq!(key, ClientKey::new("rust", None));
    }
}
