//! TSS requests and transactions awaiting approval.
//!
//! Both families share one lifecycle and one set of engine endpoints, so a
//! single [`Ledger`] serves either, picked by the entry type.

use std::marker::PhantomData;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::codec;
use crate::error::Result;
use crate::session::Session;
use crate::types::{EntryKind, Status, Transaction, TssRequest};

/// A record the engine keeps in one of its ledgers.
pub trait LedgerEntry: DeserializeOwned + Send + 'static {
    const KIND: EntryKind;
    /// Label used in decode errors
    const LABEL: &'static str;

    fn id(&self) -> &str;
    fn status(&self) -> Status;
}

impl LedgerEntry for TssRequest {
    const KIND: EntryKind = EntryKind::TssRequest;
    const LABEL: &'static str = "TSS requests";

    fn id(&self) -> &str {
        &self.request_id
    }

    fn status(&self) -> Status {
        self.status
    }
}

impl LedgerEntry for Transaction {
    const KIND: EntryKind = EntryKind::Transaction;
    const LABEL: &'static str = "transactions";

    fn id(&self) -> &str {
        &self.transaction_id
    }

    fn status(&self) -> Status {
        self.status
    }
}

/// `id:status` pairs for log lines.
fn summarize<E: LedgerEntry>(entries: &[E]) -> String {
    entries
        .iter()
        .map(|e| format!("{}:{:?}", e.id(), e.status()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Typed view of one engine ledger through a session.
pub struct Ledger<'a, E> {
    session: &'a Session,
    _entry: PhantomData<fn() -> E>,
}

impl<'a, E: LedgerEntry> Ledger<'a, E> {
    pub(crate) fn new(session: &'a Session) -> Self {
        Self {
            session,
            _entry: PhantomData,
        }
    }

    /// Entries waiting for this node's decision. Nothing pending is an empty list.
    pub async fn list_pending(&self, timeout: Duration) -> Result<Vec<E>> {
        let pending = self
            .session
            .with_handle(|handle| self.session.engine().list_pending(handle, E::KIND))?;
        let data = pending.wait(timeout).await?;
        let entries: Vec<E> = codec::decode_optional_list(E::LABEL, data.as_deref())?;
        log::debug!("pending {}: [{}]", E::LABEL, summarize(&entries));
        Ok(entries)
    }

    /// Entries with the given ids. Ids the engine does not know are omitted.
    pub async fn get_by_ids(&self, ids: &[String], timeout: Duration) -> Result<Vec<E>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let encoded = codec::encode_ids(ids)?;
        let pending = self
            .session
            .with_handle(|handle| self.session.engine().get_entries(handle, E::KIND, &encoded))?;
        let data = pending.wait(timeout).await?;
        let entries: Vec<E> = codec::decode_list(E::LABEL, data.as_deref())?;
        if entries.len() < ids.len() {
            log::debug!(
                "engine knows {} of {} requested {}",
                entries.len(),
                ids.len(),
                E::LABEL
            );
        }
        log::debug!("fetched {}: [{}]", E::LABEL, summarize(&entries));
        Ok(entries)
    }

    /// Approves all of `ids`, or none if the engine refuses any of them.
    pub fn approve(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let encoded = codec::encode_ids(ids)?;
        self.session
            .with_handle(|handle| self.session.engine().approve(handle, E::KIND, &encoded))?
            .into_data()?;
        log::info!("approved {} {}(s)", ids.len(), E::KIND);
        Ok(())
    }

    pub fn reject(&self, ids: &[String], reason: &str) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let encoded = codec::encode_ids(ids)?;
        self.session
            .with_handle(|handle| {
                self.session
                    .engine()
                    .reject(handle, E::KIND, &encoded, reason)
            })?
            .into_data()?;
        log::info!("rejected {} {}(s): {}", ids.len(), E::KIND, reason);
        Ok(())
    }
}
