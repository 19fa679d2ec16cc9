//! Capability interface to the threshold-signature engine.
//!
//! The engine owns the multi-party cryptography: node creation, signing,
//! resharing and key reconstruction. This crate only talks to it through
//! [`TssEngine`]. Payloads are UTF-8 JSON strings, replies carry a status code
//! where zero means success.
//!
//! Asynchronous calls return a [`Pending`] reply. The engine resolves it from
//! whichever thread it likes through the matching [`Completion`], which can be
//! used at most once. A reply that arrives after the caller stopped waiting is
//! discarded.

pub mod memory;

use std::time::Duration;

use tokio::sync::oneshot;

pub use memory::MemoryEngine;

use crate::config::SdkConfig;
use crate::error::{LocalError, Result, SUCCESS, SdkError};
use crate::keystore::{RecoveryShare, SecretsPayload};
use crate::session::SessionChannel;
use crate::types::{EntryKind, KeyShareGroup};

/// Raw engine reply: status code, human-readable message and JSON data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineReply {
    pub code: i32,
    pub message: Option<String>,
    pub data: Option<String>,
}

impl EngineReply {
    pub fn ok(data: impl Into<String>) -> Self {
        Self {
            code: SUCCESS,
            message: None,
            data: Some(data.into()),
        }
    }

    /// Success without a payload.
    pub fn empty() -> Self {
        Self {
            code: SUCCESS,
            message: None,
            data: None,
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS
    }

    /// Turns a non-zero code into [`SdkError::Api`] and yields the payload otherwise.
    pub fn into_data(self) -> Result<Option<String>> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(SdkError::api(self.code, self.message))
        }
    }
}

/// Engine side of an asynchronous call.
pub struct Completion {
    tx: oneshot::Sender<EngineReply>,
}

impl Completion {
    /// Delivers the reply. If the caller already gave up, the reply is dropped.
    pub fn complete(self, reply: EngineReply) {
        if let Err(late) = self.tx.send(reply) {
            log::debug!(
                "discarding engine reply (code {}) for a caller that stopped waiting",
                late.code
            );
        }
    }
}

/// Caller side of an asynchronous call.
pub struct Pending {
    rx: oneshot::Receiver<EngineReply>,
}

impl Pending {
    /// An already-resolved reply.
    pub fn ready(reply: EngineReply) -> Self {
        let (completion, pending) = completion();
        completion.complete(reply);
        pending
    }

    /// Waits at most `timeout` for the reply and returns its payload.
    pub(crate) async fn wait(self, timeout: Duration) -> Result<Option<String>> {
        match tokio::time::timeout(timeout, self.rx).await {
            Err(_) => Err(LocalError::Timeout(timeout).into()),
            Ok(Err(_)) => Err(LocalError::EngineDropped.into()),
            Ok(Ok(reply)) => reply.into_data(),
        }
    }
}

/// Creates a linked completion/pending pair for one asynchronous call.
pub fn completion() -> (Completion, Pending) {
    let (tx, rx) = oneshot::channel();
    (Completion { tx }, Pending { rx })
}

/// Opaque threshold-signature backend.
///
/// Methods taking a `handle` operate on a session previously returned by
/// [`open`](TssEngine::open). Id lists are JSON arrays of strings; list
/// replies are `{"data": [...]}` envelopes.
pub trait TssEngine: Send + Sync {
    /// `{"version": ...}`
    fn version(&self) -> EngineReply;

    /// Creates a node identity: `{"tss_node_id": ..., "node_secret": <hex>}`.
    fn create_node(&self, config: &SdkConfig) -> Pending;

    /// Opens a session over decrypted secrets: `{"handler": ...}`.
    ///
    /// `channel` stays valid for the life of the session.
    fn open(
        &self,
        config: &SdkConfig,
        secrets: &SecretsPayload,
        channel: SessionChannel,
    ) -> EngineReply;

    fn close(&self, handle: &str) -> EngineReply;

    /// Entries awaiting this node's decision. May reply without data when
    /// nothing is pending.
    fn list_pending(&self, handle: &str, kind: EntryKind) -> Pending;

    /// Entries with the given ids; unknown ids are left out.
    fn get_entries(&self, handle: &str, kind: EntryKind, ids: &str) -> Pending;

    /// Approves every listed entry or none of them.
    fn approve(&self, handle: &str, kind: EntryKind, ids: &str) -> EngineReply;

    /// Declines every listed entry, recording `reason`.
    fn reject(&self, handle: &str, kind: EntryKind, ids: &str, reason: &str) -> EngineReply;

    /// Reconstructs private keys for `address_infos` (a JSON array of
    /// `{"bip32Path", "pubKey"}`) from recovery shares of `group`.
    fn recover_private_keys(
        &self,
        group: &KeyShareGroup,
        shares: &[RecoveryShare],
        address_infos: &str,
    ) -> EngineReply;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reply_is_delivered() {
        let (completion, pending) = completion();
        std::thread::spawn(move || completion.complete(EngineReply::ok("{}")));
        let data = pending.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(data.as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_error_code_becomes_api_error() {
        let pending = Pending::ready(EngineReply::error(1234, "nope"));
        let err = pending.wait(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.code(), 1234);
    }

    #[tokio::test]
    async fn test_dropped_completion() {
        let (completion, pending) = completion();
        drop(completion);
        let err = pending.wait(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SdkError::Local(LocalError::EngineDropped)));
    }

    #[tokio::test]
    async fn test_late_reply_is_discarded() {
        let (completion, pending) = completion();
        let err = pending.wait(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, SdkError::Local(LocalError::Timeout(_))));

        // The caller is gone; completing must neither panic nor block.
        completion.complete(EngineReply::ok("late"));
    }
}
