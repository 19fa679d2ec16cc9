//! Storage functionality for the keystore module.
//!
//! This module reads and writes secrets files and hands out sessions over
//! them. At most one session per secrets file is live in the process, no
//! matter how many stores point at it.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use lazy_static::lazy_static;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::{
    RECOVERY_BUNDLE_AAD, SECRETS_BUNDLE_AAD, SECRETS_VERSION,
    encryption::{seal, unseal},
    models::{KeyShare, RecoveryPayload, RecoveryShare, SecretsFile, SecretsPayload},
};
use crate::config::SdkConfig;
use crate::engine::TssEngine;
use crate::error::{LocalError, Result};
use crate::session::{Access, ConnectionStatus, Session, StatusListener};
use crate::types::KeyShareGroup;

lazy_static! {
    /// Sessions handed out, keyed by canonical secrets file path.
    static ref LIVE_SESSIONS: Mutex<HashMap<PathBuf, Weak<Session>>> = Mutex::new(HashMap::new());
}

fn live_sessions() -> MutexGuard<'static, HashMap<PathBuf, Weak<Session>>> {
    LIVE_SESSIONS.lock().unwrap_or_else(PoisonError::into_inner)
}

fn file_aad(version: u8, node_id: &str) -> Vec<u8> {
    format!("tss-sdk/secrets-file/v{}/{}", version, node_id).into_bytes()
}

fn render_secrets_file(payload: &SecretsPayload, passphrase: &str) -> Result<Vec<u8>> {
    let sealed = seal(
        "secrets",
        payload,
        passphrase,
        &file_aad(SECRETS_VERSION, payload.node_id()),
    )?;
    let file = SecretsFile {
        version: SECRETS_VERSION,
        node_id: payload.node_id().to_string(),
        groups: payload.groups(),
        sealed,
    };
    serde_json::to_vec_pretty(&file).map_err(|cause| {
        LocalError::Encode {
            what: "secrets file",
            cause,
        }
        .into()
    })
}

/// Writes a brand-new secrets file, refusing to touch an existing path.
pub(crate) fn create_secrets_file(
    path: &Path,
    payload: &SecretsPayload,
    passphrase: &str,
) -> Result<()> {
    let contents = render_secrets_file(payload, passphrase)?;
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(LocalError::AlreadyExists(path.to_path_buf()).into());
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(&contents)?;
    file.sync_all()?;
    Ok(())
}

/// Rewrites an existing secrets file through a sibling temp file.
fn replace_secrets_file(path: &Path, payload: &SecretsPayload, passphrase: &str) -> Result<()> {
    let contents = render_secrets_file(payload, passphrase)?;
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);

    let written = write_then_rename(&tmp_path, path, &contents);
    if written.is_err() {
        if let Err(e) = fs::remove_file(&tmp_path) {
            log::debug!("no temp file to clean up at {}: {}", tmp_path.display(), e);
        }
    }
    written
}

fn write_then_rename(tmp_path: &Path, path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = fs::File::create(tmp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    fs::rename(tmp_path, path)?;
    Ok(())
}

/// Reads the plaintext header of a secrets file.
pub(crate) fn read_secrets_file(path: &Path) -> Result<SecretsFile> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(LocalError::NotFound(path.to_path_buf()).into());
        }
        Err(e) => return Err(e.into()),
    };
    let file: SecretsFile =
        serde_json::from_slice(&bytes).map_err(|cause| LocalError::Corrupt {
            path: path.to_path_buf(),
            cause,
        })?;
    if file.version != SECRETS_VERSION {
        return Err(LocalError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: file.version,
        }
        .into());
    }
    Ok(file)
}

/// Reads and decrypts a secrets file.
pub(crate) fn load_secrets(path: &Path, passphrase: &str) -> Result<SecretsPayload> {
    let file = read_secrets_file(path)?;
    let payload = unseal(
        "secrets",
        &file.sealed,
        passphrase,
        &file_aad(file.version, &file.node_id),
    )?;
    Ok(payload)
}

/// Decrypted secrets of an open session, written back on every change.
pub(crate) struct SecretsVault {
    path: PathBuf,
    passphrase: Zeroizing<String>,
    payload: Mutex<SecretsPayload>,
}

impl SecretsVault {
    pub(crate) fn new(path: PathBuf, passphrase: &str, payload: SecretsPayload) -> Self {
        Self {
            path,
            passphrase: Zeroizing::new(passphrase.to_string()),
            payload: Mutex::new(payload),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SecretsPayload> {
        self.payload.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Constant-time check of `candidate` against the unlocking passphrase.
    pub(crate) fn passphrase_matches(&self, candidate: &str) -> bool {
        let expected = Sha256::digest(self.passphrase.as_bytes());
        let given = Sha256::digest(candidate.as_bytes());
        expected.as_slice().ct_eq(given.as_slice()).into()
    }

    pub(crate) fn snapshot(&self) -> SecretsPayload {
        self.lock().clone()
    }

    pub(crate) fn node_id(&self) -> String {
        self.lock().node_id().to_string()
    }

    pub(crate) fn groups(&self) -> Vec<KeyShareGroup> {
        self.lock().groups()
    }

    /// Persists a key share produced by the engine. Memory is only updated
    /// once the file write succeeded.
    pub(crate) fn store_key_share(&self, share: KeyShare) -> Result<()> {
        let group_id = share.group.group_id.clone();
        let mut payload = self.lock();
        let mut updated = payload.clone();
        updated.upsert_key_share(share);
        replace_secrets_file(&self.path, &updated, self.passphrase.as_str())?;
        *payload = updated;
        log::info!(
            "stored key share for group {} in {}",
            group_id,
            self.path.display()
        );
        Ok(())
    }

    pub(crate) fn export_secrets(&self, export_passphrase: &str) -> Result<String> {
        let payload = self.lock();
        Ok(seal(
            "secrets",
            &*payload,
            export_passphrase,
            SECRETS_BUNDLE_AAD,
        )?)
    }

    pub(crate) fn export_recovery_shares(
        &self,
        group_ids: &[String],
        export_passphrase: &str,
    ) -> Result<String> {
        let payload = self.lock();
        let shares = group_ids
            .iter()
            .map(|group_id| {
                payload
                    .key_share(group_id)
                    .map(|share| RecoveryShare {
                        node_id: payload.node_id().to_string(),
                        share_id: share.share_id.clone(),
                        group: share.group.clone(),
                        secret: share.secret.clone(),
                    })
                    .ok_or_else(|| LocalError::UnknownGroup(group_id.clone()))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let bundle = RecoveryPayload {
            version: SECRETS_VERSION,
            node_id: payload.node_id().to_string(),
            shares,
        };
        Ok(seal(
            "recovery bundle",
            &bundle,
            export_passphrase,
            RECOVERY_BUNDLE_AAD,
        )?)
    }
}

/// Decrypts an exported secrets bundle.
pub(crate) fn open_secrets_bundle(bundle: &str, passphrase: &str) -> Result<SecretsPayload> {
    Ok(unseal("secrets bundle", bundle, passphrase, SECRETS_BUNDLE_AAD)?)
}

/// Decrypts a recovery bundle.
pub(crate) fn open_recovery_bundle(bundle: &str, passphrase: &str) -> Result<RecoveryPayload> {
    Ok(unseal("recovery bundle", bundle, passphrase, RECOVERY_BUNDLE_AAD)?)
}

/// Main keystore interface: one secrets file and the session open on it.
///
/// Stores are cheap handles. Every store on the same file shares the one
/// live session.
pub struct SecretsStore {
    /// Location of the secrets file
    path: PathBuf,

    engine: Arc<dyn TssEngine>,

    config: SdkConfig,
}

impl SecretsStore {
    pub fn new(path: impl AsRef<Path>, engine: Arc<dyn TssEngine>, config: SdkConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            engine,
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registry key for this store's file.
    fn canonical_path(&self) -> Result<PathBuf> {
        match fs::canonicalize(&self.path) {
            Ok(path) => Ok(path),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(LocalError::NotFound(self.path.clone()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the live session if there is one, failing when it was opened
    /// with a different access level.
    fn existing(slot: Option<&Weak<Session>>, access: Access) -> Result<Option<Arc<Session>>> {
        let Some(existing) = slot.and_then(Weak::upgrade).filter(|s| s.is_open()) else {
            return Ok(None);
        };
        if existing.access() == access {
            Ok(Some(existing))
        } else {
            Err(LocalError::SessionConflict.into())
        }
    }

    /// Opens the store with full signing capability.
    ///
    /// Opening an already-open file returns the live session, provided the
    /// passphrase matches the one it was opened with.
    pub fn open(&self, passphrase: &str) -> Result<Arc<Session>> {
        self.acquire(passphrase, None).map(|(session, _)| session)
    }

    /// Like [`open`](Self::open), additionally invoking `listener` on every
    /// connection status report.
    pub fn open_with_listener<F>(&self, passphrase: &str, listener: F) -> Result<Arc<Session>>
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.acquire(passphrase, Some(Box::new(listener)))
            .map(|(session, _)| session)
    }

    /// Full session for this file and whether this call created it.
    fn acquire(
        &self,
        passphrase: &str,
        listener: Option<StatusListener>,
    ) -> Result<(Arc<Session>, bool)> {
        let key = self.canonical_path()?;
        let mut live = live_sessions();
        if let Some(existing) = Self::existing(live.get(&key), Access::Full)? {
            if !existing.unlocks(passphrase) {
                log::warn!(
                    "wrong passphrase for already open secrets file {}",
                    self.path.display()
                );
                return Err(LocalError::Decryption.into());
            }
            return Ok((existing, false));
        }

        let payload = load_secrets(&self.path, passphrase)?;
        let node_id = payload.node_id().to_string();
        let vault = SecretsVault::new(self.path.clone(), passphrase, payload);
        let session = Arc::new(Session::full(
            self.engine.clone(),
            self.config.clone(),
            vault,
            listener,
        )?);
        live.retain(|_, slot| slot.strong_count() > 0);
        live.insert(key, Arc::downgrade(&session));

        log::info!(
            "opened secrets file {} for node {}",
            self.path.display(),
            node_id
        );
        Ok((session, true))
    }

    /// Opens the store read-only: node id and group listing, no signing.
    pub fn open_public(&self) -> Result<Arc<Session>> {
        let key = self.canonical_path()?;
        let mut live = live_sessions();
        if let Some(existing) = Self::existing(live.get(&key), Access::Public)? {
            return Ok(existing);
        }

        let file = read_secrets_file(&self.path)?;
        let session = Arc::new(Session::public(
            self.engine.clone(),
            self.config.clone(),
            file.node_id,
            file.groups,
        ));
        live.retain(|_, slot| slot.strong_count() > 0);
        live.insert(key, Arc::downgrade(&session));

        log::debug!("opened secrets file {} read-only", self.path.display());
        Ok(session)
    }

    /// Closes `session`. Closing an already-closed session succeeds.
    pub fn close(&self, session: &Session) -> Result<()> {
        let result = session.close();
        live_sessions().retain(|_, slot| !std::ptr::eq(slot.as_ptr(), session));
        result
    }

    /// Runs `f` with a full session. A session this call opened is closed
    /// again whatever `f` returned; one that was already live stays open.
    /// A failure to close is logged, not returned.
    pub async fn scoped<F, Fut, T>(&self, passphrase: &str, f: F) -> Result<T>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (session, created) = self.acquire(passphrase, None)?;
        let outcome = f(session.clone()).await;
        if created {
            if let Err(e) = self.close(&session) {
                log::warn!(
                    "failed to close session on {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
        outcome
    }
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
