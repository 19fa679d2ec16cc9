//! In-process engine.
//!
//! `MemoryEngine` keeps every node, session and ledger entry in memory and
//! fakes the cryptography with SHA-256. It lets the SDK be driven end to end
//! without a network: several sessions (one per node) can share one engine,
//! approve the same entries and receive the key shares a completed request
//! produces. Asynchronous replies are delivered from a separate thread after
//! the configured latency.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::{EngineReply, Pending, TssEngine, completion};
use crate::config::SdkConfig;
use crate::keystore::{KeyShare, RecoveryShare, SecretsPayload, ShareSecret};
use crate::session::{ConnCode, SessionChannel};
use crate::types::{
    AddressInfo, EntryKind, GroupType, KeyShareGroup, SharePublicData, SignDetail, Signature,
    Signatures, Status, Transaction, TssRequest,
};

pub const ENTRY_NOT_FOUND: i32 = 2001;
pub const INVALID_STATE: i32 = 2002;
pub const UNKNOWN_HANDLE: i32 = 2003;
pub const NOT_ENOUGH_SHARES: i32 = 2004;
pub const MALFORMED_REQUEST: i32 = 2005;
pub const UNKNOWN_GROUP: i32 = 2006;
pub const INTERNAL_ERROR: i32 = 2099;

const SECRET_LEN: usize = 32;

fn digest_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

fn share_pub_key(secret: &ShareSecret) -> String {
    digest_hex(&[secret.expose()])
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    data: &'a [T],
}

fn reply_list<T: Serialize>(items: &[T]) -> EngineReply {
    match serde_json::to_string(&Envelope { data: items }) {
        Ok(data) => EngineReply::ok(data),
        Err(e) => EngineReply::error(INTERNAL_ERROR, e.to_string()),
    }
}

fn parse_ids(ids: &str) -> Result<Vec<String>, EngineReply> {
    serde_json::from_str(ids)
        .map_err(|e| EngineReply::error(MALFORMED_REQUEST, format!("bad id list: {}", e)))
}

struct OpenSession {
    node_id: String,
    channel: SessionChannel,
}

enum Work {
    Reshare {
        group_type: GroupType,
        threshold: u32,
        results: Option<Vec<KeyShareGroup>>,
    },
    Sign {
        group_id: String,
        sign_details: Vec<SignDetail>,
        results: Option<Vec<Signatures>>,
    },
}

struct Entry {
    id: String,
    status: Status,
    participants: Vec<String>,
    /// node id -> handle of the session that approved
    approvals: BTreeMap<String, String>,
    failed_reasons: Vec<String>,
    work: Work,
}

#[derive(Serialize)]
#[serde(untagged)]
enum EntryView {
    Request(TssRequest),
    Transaction(Transaction),
}

impl Entry {
    fn new(participants: Vec<String>, work: Work) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: Status::Approving,
            participants,
            approvals: BTreeMap::new(),
            failed_reasons: Vec::new(),
            work,
        }
    }

    fn awaits(&self, node_id: &str) -> bool {
        self.status == Status::Approving
            && self.participants.iter().any(|p| p == node_id)
            && !self.approvals.contains_key(node_id)
    }

    fn move_to(&mut self, next: Status) {
        if self.status.can_transition_to(next) {
            self.status = next;
        } else {
            log::warn!(
                "ignoring transition of {} from {:?} to {:?}",
                self.id,
                self.status,
                next
            );
        }
    }

    fn fail(&mut self, reason: String) {
        self.failed_reasons.push(reason);
        self.move_to(Status::Failed);
    }

    fn view(&self) -> EntryView {
        let failed_reasons = if self.failed_reasons.is_empty() {
            None
        } else {
            Some(self.failed_reasons.clone())
        };
        match &self.work {
            Work::Reshare { results, .. } => EntryView::Request(TssRequest {
                request_id: self.id.clone(),
                status: self.status,
                results: results.clone(),
                failed_reasons,
            }),
            Work::Sign {
                sign_details,
                results,
                ..
            } => EntryView::Transaction(Transaction {
                transaction_id: self.id.clone(),
                status: self.status,
                sign_details: Some(sign_details.clone()),
                results: results.clone(),
                failed_reasons,
            }),
        }
    }
}

#[derive(Default)]
struct State {
    sessions: HashMap<String, OpenSession>,
    requests: BTreeMap<String, Entry>,
    transactions: BTreeMap<String, Entry>,
    /// Root secret of every group this engine created
    group_secrets: HashMap<String, Zeroizing<Vec<u8>>>,
}

impl State {
    fn table(&mut self, kind: EntryKind) -> &mut BTreeMap<String, Entry> {
        match kind {
            EntryKind::TssRequest => &mut self.requests,
            EntryKind::Transaction => &mut self.transactions,
        }
    }

    fn node_of(&self, handle: &str) -> Result<String, EngineReply> {
        self.sessions
            .get(handle)
            .map(|s| s.node_id.clone())
            .ok_or_else(|| EngineReply::error(UNKNOWN_HANDLE, format!("unknown handle {}", handle)))
    }
}

/// Key share on its way to a node, or the reason it cannot get there.
struct Delivery {
    entry_id: String,
    node_id: String,
    target: Option<(SessionChannel, KeyShare)>,
}

/// Engine that runs entirely in memory.
#[derive(Clone)]
pub struct MemoryEngine {
    state: Arc<Mutex<State>>,
    latency: Duration,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Delays every asynchronous reply by `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            latency,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deferred(&self, reply: EngineReply) -> Pending {
        if self.latency.is_zero() {
            return Pending::ready(reply);
        }
        let (completion, pending) = completion();
        let latency = self.latency;
        thread::spawn(move || {
            thread::sleep(latency);
            completion.complete(reply);
        });
        pending
    }

    /// Queues a reshare creating a new key share group among `participants`.
    pub fn submit_tss_request(
        &self,
        group_type: GroupType,
        threshold: u32,
        participants: Vec<String>,
    ) -> String {
        let entry = Entry::new(
            participants,
            Work::Reshare {
                group_type,
                threshold,
                results: None,
            },
        );
        let id = entry.id.clone();
        self.lock().requests.insert(id.clone(), entry);
        log::debug!("queued TSS request {}", id);
        id
    }

    /// Queues a signing request against `group_id`.
    pub fn submit_transaction(
        &self,
        group_id: &str,
        sign_details: Vec<SignDetail>,
        participants: Vec<String>,
    ) -> String {
        let entry = Entry::new(
            participants,
            Work::Sign {
                group_id: group_id.to_string(),
                sign_details,
                results: None,
            },
        );
        let id = entry.id.clone();
        self.lock().transactions.insert(id.clone(), entry);
        log::debug!("queued transaction {}", id);
        id
    }

    /// Current status of an entry.
    pub fn status_of(&self, kind: EntryKind, id: &str) -> Option<Status> {
        self.lock().table(kind).get(id).map(|e| e.status)
    }

    /// Broadcasts a connection status to every open session.
    pub fn report_connection(&self, code: ConnCode, message: &str) {
        let channels: Vec<SessionChannel> = self
            .lock()
            .sessions
            .values()
            .map(|s| s.channel.clone())
            .collect();
        for channel in channels {
            channel.report_status(code.code(), Some(message.to_string()));
        }
    }

    /// Runs every fully approved entry to completion. Returns how many ran.
    pub fn process(&self) -> usize {
        let (ran, deliveries) = {
            let mut state = self.lock();
            let mut deliveries = Vec::new();
            let ids: Vec<String> = state
                .requests
                .values()
                .filter(|e| e.status == Status::Processing)
                .map(|e| e.id.clone())
                .collect();
            for id in &ids {
                deliveries.extend(plan_reshare(&mut state, id));
            }

            let tx_ids: Vec<String> = state
                .transactions
                .values()
                .filter(|e| e.status == Status::Processing)
                .map(|e| e.id.clone())
                .collect();
            for id in &tx_ids {
                run_sign(&mut state, id);
            }
            (ids.len() + tx_ids.len(), deliveries)
        };

        // Shares are written to disk by the sessions, so the lock is released.
        let mut failures: HashMap<String, Vec<String>> = HashMap::new();
        let mut touched: Vec<String> = Vec::new();
        for delivery in deliveries {
            if !touched.contains(&delivery.entry_id) {
                touched.push(delivery.entry_id.clone());
            }
            let outcome = match delivery.target {
                Some((channel, share)) => channel
                    .store_key_share(share)
                    .map_err(|e| format!("node {}: {}", delivery.node_id, e)),
                None => Err(format!("node {} is offline", delivery.node_id)),
            };
            if let Err(reason) = outcome {
                log::warn!("key share delivery for {} failed: {}", delivery.entry_id, reason);
                failures.entry(delivery.entry_id).or_default().push(reason);
            }
        }

        let mut state = self.lock();
        for id in touched {
            let Some(entry) = state.requests.get_mut(&id) else {
                continue;
            };
            match failures.remove(&id) {
                Some(reasons) => {
                    if let Work::Reshare { results, .. } = &mut entry.work {
                        *results = None;
                    }
                    entry.failed_reasons.extend(reasons);
                    entry.move_to(Status::Failed);
                }
                None => entry.move_to(Status::Completed),
            }
        }
        ran
    }

    fn lookup(&self, handle: &str, kind: EntryKind, ids: &str) -> Result<EngineReply, EngineReply> {
        let ids = parse_ids(ids)?;
        let mut state = self.lock();
        state.node_of(handle)?;
        let table = state.table(kind);
        let found: Vec<EntryView> = ids
            .iter()
            .filter_map(|id| table.get(id))
            .map(Entry::view)
            .collect();
        Ok(reply_list(&found))
    }

    fn approve_entries(&self, handle: &str, kind: EntryKind, ids: &str) -> Result<(), EngineReply> {
        let ids = parse_ids(ids)?;
        let mut state = self.lock();
        let node_id = state.node_of(handle)?;
        let table = state.table(kind);

        for id in &ids {
            let entry = table
                .get(id)
                .ok_or_else(|| EngineReply::error(ENTRY_NOT_FOUND, format!("{} {} not found", kind, id)))?;
            if !entry.awaits(&node_id) {
                return Err(EngineReply::error(
                    INVALID_STATE,
                    format!("{} {} is not awaiting approval from {}", kind, id, node_id),
                ));
            }
        }

        for id in &ids {
            if let Some(entry) = table.get_mut(id) {
                entry.approvals.insert(node_id.clone(), handle.to_string());
                if entry.approvals.len() == entry.participants.len() {
                    entry.move_to(Status::Processing);
                }
            }
        }
        log::info!("node {} approved {} {}(s)", node_id, ids.len(), kind);
        Ok(())
    }

    fn reject_entries(
        &self,
        handle: &str,
        kind: EntryKind,
        ids: &str,
        reason: &str,
    ) -> Result<(), EngineReply> {
        let ids = parse_ids(ids)?;
        let mut state = self.lock();
        let node_id = state.node_of(handle)?;
        let table = state.table(kind);

        for id in &ids {
            let entry = table
                .get(id)
                .ok_or_else(|| EngineReply::error(ENTRY_NOT_FOUND, format!("{} {} not found", kind, id)))?;
            if entry.status != Status::Approving {
                return Err(EngineReply::error(
                    INVALID_STATE,
                    format!("{} {} is {:?}", kind, id, entry.status),
                ));
            }
        }

        for id in &ids {
            if let Some(entry) = table.get_mut(id) {
                entry
                    .failed_reasons
                    .push(format!("declined by {}: {}", node_id, reason));
                entry.move_to(Status::Declined);
            }
        }
        log::info!("node {} declined {} {}(s)", node_id, ids.len(), kind);
        Ok(())
    }

    fn recover(
        &self,
        group: &KeyShareGroup,
        shares: &[RecoveryShare],
        address_infos: &str,
    ) -> Result<Vec<serde_json::Value>, EngineReply> {
        let addresses: Vec<AddressInfo> = serde_json::from_str(address_infos).map_err(|e| {
            EngineReply::error(MALFORMED_REQUEST, format!("bad address list: {}", e))
        })?;

        let state = self.lock();
        let root = state.group_secrets.get(&group.group_id).ok_or_else(|| {
            EngineReply::error(UNKNOWN_GROUP, format!("group {} unknown", group.group_id))
        })?;

        let mut valid: Vec<&str> = Vec::new();
        for share in shares {
            let matches = share.group.group_id == group.group_id
                && group.participants.iter().any(|p| {
                    p.node_id == share.node_id && p.share_pub_key == share_pub_key(&share.secret)
                });
            if matches && !valid.contains(&share.node_id.as_str()) {
                valid.push(&share.node_id);
            }
        }
        if valid.len() < group.threshold as usize {
            return Err(EngineReply::error(
                NOT_ENOUGH_SHARES,
                format!(
                    "group {} needs {} valid shares, got {}",
                    group.group_id,
                    group.threshold,
                    valid.len()
                ),
            ));
        }

        Ok(addresses
            .iter()
            .map(|address| {
                let key = Zeroizing::new(digest_hex(&[root.as_slice(), address.bip32_path.as_bytes()]));
                serde_json::json!({
                    "bip32_path": address.bip32_path,
                    "extended_public_key": address.pub_key,
                    "private_key": {
                        "extended_private_key": format!("xprv{}", key.as_str()),
                        "hex_private_key": key.as_str(),
                    },
                })
            })
            .collect())
    }
}

/// Mints the group and one share per participant; delivery happens later.
fn plan_reshare(state: &mut State, id: &str) -> Vec<Delivery> {
    let Some(entry) = state.requests.get(id) else {
        return Vec::new();
    };
    let Work::Reshare {
        group_type,
        threshold,
        ..
    } = entry.work
    else {
        return Vec::new();
    };

    let root = ShareSecret::generate(SECRET_LEN);
    let group_id = Uuid::new_v4().to_string();
    let shares: Vec<(String, String, ShareSecret)> = entry
        .participants
        .iter()
        .map(|node| (node.clone(), Uuid::new_v4().to_string(), ShareSecret::generate(SECRET_LEN)))
        .collect();

    let group = KeyShareGroup {
        group_id: group_id.clone(),
        created_timestamp: chrono::Utc::now().timestamp(),
        group_type,
        root_pub_key: digest_hex(&[b"pub".as_slice(), root.expose()]),
        chain_code: digest_hex(&[b"chain".as_slice(), root.expose()]),
        curve: group_type.curve().to_string(),
        threshold,
        participants: shares
            .iter()
            .map(|(node_id, share_id, secret)| SharePublicData {
                node_id: node_id.clone(),
                share_id: share_id.clone(),
                share_pub_key: share_pub_key(secret),
            })
            .collect(),
    };

    let deliveries = shares
        .into_iter()
        .map(|(node_id, share_id, secret)| {
            let target = entry
                .approvals
                .get(&node_id)
                .and_then(|handle| state.sessions.get(handle))
                .map(|s| {
                    (
                        s.channel.clone(),
                        KeyShare::new(group.clone(), share_id, secret),
                    )
                });
            Delivery {
                entry_id: id.to_string(),
                node_id,
                target,
            }
        })
        .collect();

    state
        .group_secrets
        .insert(group_id, Zeroizing::new(root.expose().to_vec()));
    if let Some(entry) = state.requests.get_mut(id) {
        if let Work::Reshare { results, .. } = &mut entry.work {
            *results = Some(vec![group]);
        }
    }
    deliveries
}

fn run_sign(state: &mut State, id: &str) {
    let State {
        transactions,
        group_secrets,
        ..
    } = state;
    let Some(entry) = transactions.get_mut(id) else {
        return;
    };
    let Work::Sign {
        group_id,
        sign_details,
        results,
    } = &mut entry.work
    else {
        return;
    };

    let Some(root) = group_secrets.get(group_id.as_str()) else {
        let reason = format!("unknown key share group {}", group_id);
        entry.fail(reason);
        return;
    };

    let signed = sign_details
        .iter()
        .map(|detail| Signatures {
            signatures: detail
                .bip32_paths
                .iter()
                .zip(&detail.msg_hashes)
                .map(|(path, hash)| Signature {
                    bip32_path: path.clone(),
                    msg_hash: hash.clone(),
                    tweak: None,
                    signature: Some(digest_hex(&[root.as_slice(), path.as_bytes(), hash.as_bytes()])),
                    signature_recovery: None,
                })
                .collect(),
            signature_type: Some(detail.signature_type),
            tss_protocol: Some(detail.tss_protocol),
        })
        .collect();
    *results = Some(signed);
    entry.move_to(Status::Completed);
}

impl TssEngine for MemoryEngine {
    fn version(&self) -> EngineReply {
        EngineReply::ok(
            serde_json::json!({ "version": format!("{}-memory", env!("CARGO_PKG_VERSION")) })
                .to_string(),
        )
    }

    fn create_node(&self, config: &SdkConfig) -> Pending {
        let node_id = format!("node-{}", Uuid::new_v4().simple());
        let secret = ShareSecret::generate(SECRET_LEN);
        let body = serde_json::json!({
            "tss_node_id": node_id,
            "node_secret": hex::encode(secret.expose()),
        });
        log::debug!("created node {} ({:?})", node_id, config.env);
        self.deferred(EngineReply::ok(body.to_string()))
    }

    fn open(
        &self,
        _config: &SdkConfig,
        secrets: &SecretsPayload,
        channel: SessionChannel,
    ) -> EngineReply {
        if secrets.node_id().is_empty() {
            return EngineReply::error(MALFORMED_REQUEST, "secrets carry no node id");
        }
        let handle = Uuid::new_v4().to_string();
        self.lock().sessions.insert(
            handle.clone(),
            OpenSession {
                node_id: secrets.node_id().to_string(),
                channel: channel.clone(),
            },
        );
        channel.report_status(ConnCode::Connected.code(), Some("connected".to_string()));
        EngineReply::ok(serde_json::json!({ "handler": handle }).to_string())
    }

    fn close(&self, handle: &str) -> EngineReply {
        match self.lock().sessions.remove(handle) {
            Some(_) => EngineReply::empty(),
            None => EngineReply::error(UNKNOWN_HANDLE, format!("unknown handle {}", handle)),
        }
    }

    fn list_pending(&self, handle: &str, kind: EntryKind) -> Pending {
        let reply = {
            let mut state = self.lock();
            match state.node_of(handle) {
                Err(reply) => reply,
                Ok(node_id) => {
                    let pending: Vec<EntryView> = state
                        .table(kind)
                        .values()
                        .filter(|e| e.awaits(&node_id))
                        .map(Entry::view)
                        .collect();
                    if pending.is_empty() {
                        EngineReply::empty()
                    } else {
                        reply_list(&pending)
                    }
                }
            }
        };
        self.deferred(reply)
    }

    fn get_entries(&self, handle: &str, kind: EntryKind, ids: &str) -> Pending {
        let reply = self.lookup(handle, kind, ids).unwrap_or_else(|reply| reply);
        self.deferred(reply)
    }

    fn approve(&self, handle: &str, kind: EntryKind, ids: &str) -> EngineReply {
        match self.approve_entries(handle, kind, ids) {
            Ok(()) => EngineReply::empty(),
            Err(reply) => reply,
        }
    }

    fn reject(&self, handle: &str, kind: EntryKind, ids: &str, reason: &str) -> EngineReply {
        match self.reject_entries(handle, kind, ids, reason) {
            Ok(()) => EngineReply::empty(),
            Err(reply) => reply,
        }
    }

    fn recover_private_keys(
        &self,
        group: &KeyShareGroup,
        shares: &[RecoveryShare],
        address_infos: &str,
    ) -> EngineReply {
        match self.recover(group, shares, address_infos) {
            Ok(keys) => reply_list(&keys),
            Err(reply) => reply,
        }
    }
}
