//! Data models for the keystore module.
//!
//! This module defines the plaintext layout of a secrets file, the sealed
//! payload inside it, and the content of exported recovery bundles.

use std::fmt;

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

use crate::keystore::SECRETS_VERSION;
use crate::types::KeyShareGroup;

/// Secret bytes that are wiped from memory on drop. Serialized as hex.
#[derive(Clone, PartialEq, Eq)]
pub struct ShareSecret(Zeroizing<Vec<u8>>);

impl ShareSecret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Fresh random secret of `len` bytes.
    pub fn generate(len: usize) -> Self {
        let mut bytes = Zeroizing::new(vec![0u8; len]);
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ShareSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShareSecret(<{} bytes>)", self.0.len())
    }
}

impl Serialize for ShareSecret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = Zeroizing::new(hex::encode(&*self.0));
        serializer.serialize_str(&encoded)
    }
}

impl<'de> Deserialize<'de> for ShareSecret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = Zeroizing::new(String::deserialize(deserializer)?);
        hex::decode(encoded.as_str())
            .map(ShareSecret::new)
            .map_err(serde::de::Error::custom)
    }
}

/// One key share owned by this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyShare {
    pub group: KeyShareGroup,
    pub share_id: String,
    pub secret: ShareSecret,
}

impl KeyShare {
    pub fn new(group: KeyShareGroup, share_id: impl Into<String>, secret: ShareSecret) -> Self {
        Self {
            group,
            share_id: share_id.into(),
            secret,
        }
    }
}

/// Everything sealed inside a secrets file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsPayload {
    version: u8,
    node_id: String,
    node_secret: ShareSecret,
    #[serde(default)]
    key_shares: Vec<KeyShare>,
}

impl SecretsPayload {
    pub fn new(node_id: impl Into<String>, node_secret: ShareSecret) -> Self {
        Self {
            version: SECRETS_VERSION,
            node_id: node_id.into(),
            node_secret,
            key_shares: Vec::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn node_secret(&self) -> &ShareSecret {
        &self.node_secret
    }

    pub fn key_shares(&self) -> &[KeyShare] {
        &self.key_shares
    }

    pub fn key_share(&self, group_id: &str) -> Option<&KeyShare> {
        self.key_shares.iter().find(|s| s.group.group_id == group_id)
    }

    pub fn groups(&self) -> Vec<KeyShareGroup> {
        self.key_shares.iter().map(|s| s.group.clone()).collect()
    }

    /// Adds or replaces the share for its group
    pub(crate) fn upsert_key_share(&mut self, share: KeyShare) {
        if let Some(idx) = self
            .key_shares
            .iter()
            .position(|s| s.group.group_id == share.group.group_id)
        {
            self.key_shares[idx] = share;
        } else {
            self.key_shares.push(share);
        }
    }
}

/// On-disk layout of a secrets file.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SecretsFile {
    pub version: u8,
    pub node_id: String,
    #[serde(default)]
    pub groups: Vec<KeyShareGroup>,
    /// base64 of `salt | nonce | ciphertext` over a [`SecretsPayload`]
    pub sealed: String,
}

/// A participant's share as carried in a recovery bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryShare {
    pub node_id: String,
    pub share_id: String,
    pub group: KeyShareGroup,
    pub secret: ShareSecret,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RecoveryPayload {
    pub version: u8,
    pub node_id: String,
    pub shares: Vec<RecoveryShare>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GroupType;

    fn group(id: &str) -> KeyShareGroup {
        KeyShareGroup {
            group_id: id.to_string(),
            created_timestamp: 1_700_000_000,
            group_type: GroupType::EcdsaTss,
            root_pub_key: "xpub".to_string(),
            chain_code: "00".to_string(),
            curve: "secp256k1".to_string(),
            threshold: 2,
            participants: Vec::new(),
        }
    }

    #[test]
    fn test_share_secret_hex() {
        let secret = ShareSecret::new(vec![0xde, 0xad]);
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"dead\"");
        let back: ShareSecret = serde_json::from_str("\"dead\"").unwrap();
        assert_eq!(back, secret);
        assert_eq!(format!("{:?}", secret), "ShareSecret(<2 bytes>)");
        assert!(serde_json::from_str::<ShareSecret>("\"zz\"").is_err());
    }

    #[test]
    fn test_upsert_replaces_by_group() {
        let mut payload = SecretsPayload::new("node", ShareSecret::generate(32));
        payload.upsert_key_share(KeyShare::new(group("g1"), "s1", ShareSecret::generate(32)));
        payload.upsert_key_share(KeyShare::new(group("g2"), "s2", ShareSecret::generate(32)));
        payload.upsert_key_share(KeyShare::new(group("g1"), "s3", ShareSecret::generate(32)));

        assert_eq!(payload.key_shares().len(), 2);
        assert_eq!(payload.key_share("g1").unwrap().share_id, "s3");
        assert_eq!(payload.groups().len(), 2);
        assert!(payload.key_share("g9").is_none());
    }
}
