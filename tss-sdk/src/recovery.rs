//! Offline reconstruction of private keys from exported recovery shares.
//!
//! Each key share group is recovered independently and moves through
//! `Collecting -> Ready -> Reconstructed`. Shares are keyed by the node that
//! exported them, so importing the same node twice replaces its share. Once a
//! group has been reconstructed its shares are wiped and the group refuses any
//! further work; a new coordinator is needed for another attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use zeroize::Zeroizing;

use crate::codec;
use crate::engine::TssEngine;
use crate::error::{LocalError, Result};
use crate::keystore::{RecoveryShare, open_recovery_bundle};
use crate::types::{AddressInfo, KeyShareGroup, PrivateKeyInfo};

/// Where a group's recovery stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// Fewer distinct participant shares than the group threshold
    Collecting,
    /// Enough shares to reconstruct
    Ready,
    /// Keys were handed out; shares are gone
    Reconstructed,
}

struct GroupRecovery {
    group: KeyShareGroup,
    /// node id -> share
    shares: HashMap<String, RecoveryShare>,
    reconstructed: bool,
}

impl GroupRecovery {
    fn state(&self) -> RecoveryState {
        if self.reconstructed {
            RecoveryState::Reconstructed
        } else if self.shares.len() >= self.need() {
            RecoveryState::Ready
        } else {
            RecoveryState::Collecting
        }
    }

    fn need(&self) -> usize {
        self.group.threshold as usize
    }
}

pub struct RecoveryCoordinator {
    engine: Arc<dyn TssEngine>,
    groups: Mutex<HashMap<String, Arc<Mutex<GroupRecovery>>>>,
}

fn lock_group(group: &Mutex<GroupRecovery>) -> MutexGuard<'_, GroupRecovery> {
    group.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RecoveryCoordinator {
    pub fn new(engine: Arc<dyn TssEngine>) -> Self {
        Self {
            engine,
            groups: Mutex::new(HashMap::new()),
        }
    }

    fn lock_groups(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<GroupRecovery>>>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn group(&self, group_id: &str) -> Option<Arc<Mutex<GroupRecovery>>> {
        self.lock_groups().get(group_id).cloned()
    }

    /// Decrypts `bundle` and adds its share of `group_id`.
    pub fn import_recovery_key_share(
        &self,
        group_id: &str,
        bundle: &str,
        passphrase: &str,
    ) -> Result<RecoveryState> {
        let mut payload = open_recovery_bundle(bundle, passphrase)?;
        let idx = payload
            .shares
            .iter()
            .position(|s| s.group.group_id == group_id)
            .ok_or_else(|| LocalError::GroupNotInBundle(group_id.to_string()))?;
        let share = payload.shares.swap_remove(idx);

        let slot = self
            .lock_groups()
            .entry(group_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(GroupRecovery {
                    group: share.group.clone(),
                    shares: HashMap::new(),
                    reconstructed: false,
                }))
            })
            .clone();

        let mut recovery = lock_group(&slot);
        if recovery.reconstructed {
            return Err(LocalError::RecoveryConsumed(group_id.to_string()).into());
        }
        if recovery.group != share.group {
            return Err(LocalError::GroupMismatch {
                group_id: group_id.to_string(),
            }
            .into());
        }

        let node_id = share.node_id.clone();
        if recovery.shares.insert(node_id.clone(), share).is_some() {
            log::debug!("replaced recovery share of {} for group {}", node_id, group_id);
        }
        let state = recovery.state();
        log::info!(
            "group {}: {}/{} recovery shares imported ({:?})",
            group_id,
            recovery.shares.len(),
            recovery.need(),
            state
        );
        Ok(state)
    }

    /// State of `group_id`, or `None` before its first import.
    pub fn state(&self, group_id: &str) -> Option<RecoveryState> {
        self.group(group_id).map(|g| lock_group(&g).state())
    }

    /// Number of distinct participants whose shares are held for `group_id`.
    pub fn imported(&self, group_id: &str) -> usize {
        self.group(group_id)
            .map(|g| lock_group(&g).shares.len())
            .unwrap_or(0)
    }

    /// Reconstructs the private keys of `addresses` in group `group_id`.
    ///
    /// Only valid once the group is ready. On success the group is
    /// reconstructed and its shares are wiped; if the engine refuses, the
    /// shares are kept and the call may be retried.
    pub fn recover_private_keys(
        &self,
        group_id: &str,
        addresses: &[AddressInfo],
    ) -> Result<Vec<PrivateKeyInfo>> {
        let slot = self
            .group(group_id)
            .ok_or_else(|| LocalError::UnknownGroup(group_id.to_string()))?;
        let mut recovery = lock_group(&slot);
        match recovery.state() {
            RecoveryState::Reconstructed => {
                return Err(LocalError::RecoveryConsumed(group_id.to_string()).into());
            }
            RecoveryState::Collecting => {
                return Err(LocalError::InsufficientShares {
                    group_id: group_id.to_string(),
                    have: recovery.shares.len(),
                    need: recovery.need(),
                }
                .into());
            }
            RecoveryState::Ready => {}
        }

        let address_infos = codec::encode("address infos", addresses)?;
        let shares: Vec<RecoveryShare> = recovery.shares.values().cloned().collect();
        let data = self
            .engine
            .recover_private_keys(&recovery.group, &shares, &address_infos)
            .into_data()?
            .map(Zeroizing::new);
        let keys = codec::decode_list("private keys", data.as_ref().map(|d| d.as_str()))?;

        recovery.shares.clear();
        recovery.reconstructed = true;
        log::info!("group {}: reconstructed {} key(s)", group_id, addresses.len());
        Ok(keys)
    }
}

impl Drop for RecoveryCoordinator {
    fn drop(&mut self) {
        let mut groups = self.lock_groups();
        for (_, slot) in groups.drain() {
            lock_group(&slot).shares.clear();
        }
    }
}
