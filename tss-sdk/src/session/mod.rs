//! Sessions over an open secrets file.
//!
//! A [`Session`] owns the engine handle for one secrets file. Engine calls
//! made through the same session are serialized by the handle lock; the wait
//! for an asynchronous reply happens outside of it.

mod status;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use uuid::Uuid;

pub use status::{ConnCode, ConnFailure, ConnState, ConnectionStatus, StatusListener};
pub(crate) use status::StatusSlot;

use crate::codec;
use crate::config::SdkConfig;
use crate::engine::TssEngine;
use crate::error::{LocalError, Result};
use crate::keystore::{KeyShare, SecretsVault};
use crate::ledger::Ledger;
use crate::types::{KeyShareGroup, Transaction, TssRequest};

/// What a session may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Node id and group listing only
    Public,
    /// Everything, including approvals and exports
    Full,
}

#[derive(serde::Deserialize)]
struct HandlerResult {
    handler: String,
}

/// Channel through which the engine reports back into a session.
///
/// Handed to [`TssEngine::open`]; clones may be moved to engine threads.
#[derive(Clone)]
pub struct SessionChannel {
    status: Arc<StatusSlot>,
    vault: Weak<SecretsVault>,
}

impl SessionChannel {
    /// Records the latest connection status.
    pub fn report_status(&self, code: i32, message: Option<String>) {
        self.status.set(code, message);
    }

    /// A channel bound to no session; stored key shares go nowhere.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            status: Arc::new(StatusSlot::new(None)),
            vault: Weak::new(),
        }
    }

    /// Persists a key share the engine produced for this node.
    pub fn store_key_share(&self, share: KeyShare) -> Result<()> {
        let vault = self.vault.upgrade().ok_or(LocalError::SessionClosed)?;
        vault.store_key_share(share)
    }
}

enum SessionView {
    Public {
        node_id: String,
        groups: Vec<KeyShareGroup>,
    },
    Full(Arc<SecretsVault>),
}

pub struct Session {
    engine: Arc<dyn TssEngine>,
    config: SdkConfig,
    /// Engine handle; `None` once closed
    handle: Mutex<Option<String>>,
    status: Arc<StatusSlot>,
    view: SessionView,
}

impl Session {
    pub(crate) fn full(
        engine: Arc<dyn TssEngine>,
        config: SdkConfig,
        vault: SecretsVault,
        listener: Option<StatusListener>,
    ) -> Result<Self> {
        let vault = Arc::new(vault);
        let status = Arc::new(StatusSlot::new(listener));
        let channel = SessionChannel {
            status: status.clone(),
            vault: Arc::downgrade(&vault),
        };

        // The engine gets a copy so it may call back into the vault while opening.
        let snapshot = vault.snapshot();
        let data = engine.open(&config, &snapshot, channel).into_data()?;
        let opened: HandlerResult = codec::decode("session handle", data.as_deref())?;

        Ok(Self {
            engine,
            config,
            handle: Mutex::new(Some(opened.handler)),
            status,
            view: SessionView::Full(vault),
        })
    }

    pub(crate) fn public(
        engine: Arc<dyn TssEngine>,
        config: SdkConfig,
        node_id: String,
        groups: Vec<KeyShareGroup>,
    ) -> Self {
        Self {
            engine,
            config,
            handle: Mutex::new(Some(format!("public-{}", Uuid::new_v4()))),
            status: Arc::new(StatusSlot::new(None)),
            view: SessionView::Public { node_id, groups },
        }
    }

    fn lock_handle(&self) -> MutexGuard<'_, Option<String>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn access(&self) -> Access {
        match self.view {
            SessionView::Public { .. } => Access::Public,
            SessionView::Full(_) => Access::Full,
        }
    }

    /// Whether `passphrase` is the one this session was opened with.
    pub(crate) fn unlocks(&self, passphrase: &str) -> bool {
        match &self.view {
            SessionView::Full(vault) => vault.passphrase_matches(passphrase),
            SessionView::Public { .. } => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock_handle().is_some()
    }

    /// Engine handle, if the session is still open.
    pub fn handle(&self) -> Option<String> {
        self.lock_handle().clone()
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    /// Default wait bound for asynchronous calls.
    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    pub(crate) fn engine(&self) -> &dyn TssEngine {
        self.engine.as_ref()
    }

    /// Runs `f` with the engine handle held, serializing it against every
    /// other engine call on this session.
    pub(crate) fn with_handle<T>(&self, f: impl FnOnce(&str) -> T) -> Result<T> {
        if self.access() != Access::Full {
            return Err(LocalError::ReadOnlySession.into());
        }
        let guard = self.lock_handle();
        let handle = guard.as_deref().ok_or(LocalError::SessionClosed)?;
        Ok(f(handle))
    }

    fn vault(&self) -> Result<&SecretsVault> {
        match &self.view {
            SessionView::Full(vault) => Ok(vault),
            SessionView::Public { .. } => Err(LocalError::ReadOnlySession.into()),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(LocalError::SessionClosed.into())
        }
    }

    pub fn node_id(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(match &self.view {
            SessionView::Public { node_id, .. } => node_id.clone(),
            SessionView::Full(vault) => vault.node_id(),
        })
    }

    pub fn list_key_share_groups(&self) -> Result<Vec<KeyShareGroup>> {
        self.ensure_open()?;
        Ok(match &self.view {
            SessionView::Public { groups, .. } => groups.clone(),
            SessionView::Full(vault) => vault.groups(),
        })
    }

    /// Groups matching `group_ids`, in request order; unknown ids are omitted.
    pub fn get_key_share_groups(&self, group_ids: &[String]) -> Result<Vec<KeyShareGroup>> {
        let groups = self.list_key_share_groups()?;
        Ok(group_ids
            .iter()
            .filter_map(|id| groups.iter().find(|g| &g.group_id == id).cloned())
            .collect())
    }

    pub fn conn_status(&self) -> ConnectionStatus {
        self.status.get()
    }

    pub fn tss_requests(&self) -> Ledger<'_, TssRequest> {
        Ledger::new(self)
    }

    pub fn transactions(&self) -> Ledger<'_, Transaction> {
        Ledger::new(self)
    }

    /// Re-encrypts this node's secrets under `export_passphrase`.
    pub fn export_secrets(&self, export_passphrase: &str) -> Result<String> {
        self.ensure_open()?;
        self.vault()?.export_secrets(export_passphrase)
    }

    /// Exports this node's shares of `group_ids` as one recovery bundle.
    pub fn export_recovery_key_shares(
        &self,
        group_ids: &[String],
        export_passphrase: &str,
    ) -> Result<String> {
        self.ensure_open()?;
        self.vault()?
            .export_recovery_shares(group_ids, export_passphrase)
    }

    /// Releases the engine handle. Idempotent.
    pub fn close(&self) -> Result<()> {
        let Some(handle) = self.lock_handle().take() else {
            return Ok(());
        };
        self.status.reset();
        if self.access() == Access::Public {
            return Ok(());
        }

        log::debug!("closing session {}", handle);
        self.engine.close(&handle).into_data().map(|_| ())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access", &self.access())
            .field("handle", &self.handle())
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("error while tearing down session: {}", e);
        }
    }
}
