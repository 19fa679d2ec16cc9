//! Local encrypted store for a node's secrets.
//!
//! A secrets file holds the node identity and every key share the node owns,
//! sealed under a user passphrase with AES-256-GCM and an Argon2id-derived
//! key. The node id and the public part of each key share group stay readable
//! without the passphrase so a store can be opened read-only.

mod encryption;
mod models;
mod storage;

pub use models::{KeyShare, RecoveryShare, SecretsPayload, ShareSecret};
pub use storage::SecretsStore;

pub(crate) use storage::{
    SecretsVault, create_secrets_file, open_recovery_bundle, open_secrets_bundle,
};

/// Current secrets file format version
pub const SECRETS_VERSION: u8 = 1;

/// Associated data binding exported secrets bundles.
pub(crate) const SECRETS_BUNDLE_AAD: &[u8] = b"tss-sdk/secrets-bundle/v1";

/// Associated data binding recovery bundles.
pub(crate) const RECOVERY_BUNDLE_AAD: &[u8] = b"tss-sdk/recovery-bundle/v1";
