//! Data model shared with the engine.
//!
//! Field names follow the JSON the engine emits; enums travel as their
//! numeric wire codes.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} code {code}")]
pub struct UnknownCode {
    kind: &'static str,
    code: i32,
}

/// Lifecycle shared by TSS requests and transactions.
///
/// `Unknown` is the not-yet-observed sentinel. The four outcomes after
/// `Processing` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Status {
    Unknown,
    Scheduling,
    Initializing,
    Approving,
    Processing,
    Declined,
    Failed,
    Canceled,
    Completed,
}

impl Status {
    pub fn code(self) -> i32 {
        match self {
            Status::Unknown => 100,
            Status::Scheduling => 110,
            Status::Initializing => 120,
            Status::Approving => 130,
            Status::Processing => 140,
            Status::Declined => 160,
            Status::Failed => 170,
            Status::Canceled => 180,
            Status::Completed => 190,
        }
    }

    fn rank(self) -> u8 {
        match self {
            Status::Unknown => 0,
            Status::Scheduling => 1,
            Status::Initializing => 2,
            Status::Approving => 3,
            Status::Processing => 4,
            Status::Declined | Status::Failed | Status::Canceled | Status::Completed => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 5
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(self, next: Status) -> bool {
        !self.is_terminal() && next != Status::Unknown && next.rank() > self.rank()
    }
}

impl TryFrom<i32> for Status {
    type Error = UnknownCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Ok(match code {
            100 => Status::Unknown,
            110 => Status::Scheduling,
            120 => Status::Initializing,
            130 => Status::Approving,
            140 => Status::Processing,
            160 => Status::Declined,
            170 => Status::Failed,
            180 => Status::Canceled,
            190 => Status::Completed,
            _ => return Err(UnknownCode { kind: "status", code }),
        })
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> i32 {
        status.code()
    }
}

/// Signature scheme of a key share group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum GroupType {
    EcdsaTss,
    EddsaTss,
}

impl GroupType {
    /// Curve name the engine reports for groups of this type.
    pub fn curve(self) -> &'static str {
        match self {
            GroupType::EcdsaTss => "secp256k1",
            GroupType::EddsaTss => "ed25519",
        }
    }
}

impl TryFrom<i32> for GroupType {
    type Error = UnknownCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(GroupType::EcdsaTss),
            2 => Ok(GroupType::EddsaTss),
            _ => Err(UnknownCode {
                kind: "group type",
                code,
            }),
        }
    }
}

impl From<GroupType> for i32 {
    fn from(group_type: GroupType) -> i32 {
        match group_type {
            GroupType::EcdsaTss => 1,
            GroupType::EddsaTss => 2,
        }
    }
}

/// A TSS keyset. Immutable once the engine has created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyShareGroup {
    #[serde(rename = "id")]
    pub group_id: String,

    pub created_timestamp: i64,

    #[serde(rename = "type")]
    pub group_type: GroupType,

    #[serde(rename = "root_extended_public_key")]
    pub root_pub_key: String,

    #[serde(rename = "chaincode")]
    pub chain_code: String,

    pub curve: String,

    /// Number of distinct shares needed to sign or recover
    pub threshold: u32,

    #[serde(default)]
    pub participants: Vec<SharePublicData>,
}

/// Public view of one participant's share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharePublicData {
    pub node_id: String,
    pub share_id: String,
    #[serde(rename = "share_public_key")]
    pub share_pub_key: String,
}

/// Administrative operation against key share groups, e.g. a reshare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TssRequest {
    #[serde(rename = "tss_request_id")]
    pub request_id: String,
    pub status: Status,
    /// Groups produced by the request; present only on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<KeyShareGroup>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reasons: Option<Vec<String>>,
}

/// Signing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_details: Option<Vec<SignDetail>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<Signatures>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reasons: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignDetail {
    pub signature_type: i32,
    pub tss_protocol: i32,
    #[serde(default, rename = "bip32_path_list")]
    pub bip32_paths: Vec<String>,
    #[serde(default, rename = "msg_hash_list")]
    pub msg_hashes: Vec<String>,
    #[serde(default, rename = "tweak_list", skip_serializing_if = "Option::is_none")]
    pub tweaks: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signatures {
    #[serde(default)]
    pub signatures: Vec<Signature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_type: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tss_protocol: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub bip32_path: String,
    pub msg_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tweak: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_recovery: Option<String>,
}

/// Derivation path and public key of an address to recover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInfo {
    pub bip32_path: String,
    pub pub_key: String,
}

impl AddressInfo {
    pub fn new(bip32_path: impl Into<String>, pub_key: impl Into<String>) -> Self {
        Self {
            bip32_path: bip32_path.into(),
            pub_key: pub_key.into(),
        }
    }
}

/// Key material reconstructed by recovery.
///
/// The private half is wiped from memory when the value is dropped.
#[derive(Debug, Serialize, Deserialize)]
pub struct PrivateKeyInfo {
    pub bip32_path: String,
    #[serde(rename = "extended_public_key")]
    pub public_key: String,
    #[serde(default)]
    pub private_key: Option<PrivateKey>,
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    #[serde(rename = "extended_private_key")]
    pub ext_private_key: String,
    pub hex_private_key: String,
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Engine build information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkInfo {
    pub version: String,
}

/// Which ledger family an engine call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    TssRequest,
    Transaction,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::TssRequest => f.write_str("TSS request"),
            EntryKind::Transaction => f.write_str("transaction"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_monotonic() {
        assert!(Status::Approving.can_transition_to(Status::Processing));
        assert!(Status::Processing.can_transition_to(Status::Completed));
        assert!(Status::Approving.can_transition_to(Status::Declined));
        assert!(!Status::Processing.can_transition_to(Status::Approving));
        assert!(!Status::Completed.can_transition_to(Status::Failed));
        assert!(!Status::Scheduling.can_transition_to(Status::Unknown));
        assert!(!Status::Unknown.is_terminal());
    }

    #[test]
    fn test_transaction_wire_names() {
        let json = r#"{
            "transaction_id": "tx-1",
            "status": 190,
            "sign_details": [{
                "signature_type": 1,
                "tss_protocol": 2,
                "bip32_path_list": ["m/44/60/0/0/0"],
                "msg_hash_list": ["abcd"]
            }],
            "results": [{
                "signatures": [{"bip32_path": "m/44/60/0/0/0", "msg_hash": "abcd", "signature": "ff"}]
            }]
        }"#;
        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.status, Status::Completed);
        let detail = &tx.sign_details.as_ref().unwrap()[0];
        assert_eq!(detail.bip32_paths, vec!["m/44/60/0/0/0".to_string()]);
        assert!(detail.tweaks.is_none());
        assert_eq!(
            tx.results.unwrap()[0].signatures[0].signature.as_deref(),
            Some("ff")
        );
        assert!(tx.failed_reasons.is_none());
    }

    #[test]
    fn test_unknown_status_code_is_rejected() {
        let err = serde_json::from_str::<TssRequest>(r#"{"tss_request_id":"r","status":150}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_address_info_uses_camel_case() {
        let json = serde_json::to_string(&AddressInfo::new("m/0", "xpub")).unwrap();
        assert_eq!(json, r#"{"bip32Path":"m/0","pubKey":"xpub"}"#);
    }

    #[test]
    fn test_private_key_debug_is_redacted() {
        let info: PrivateKeyInfo = serde_json::from_str(
            r#"{"bip32_path":"m/0","extended_public_key":"xpub","private_key":{"extended_private_key":"xprv-secret","hex_private_key":"deadbeef"}}"#,
        )
        .unwrap();
        let rendered = format!("{:?}", info);
        assert!(!rendered.contains("deadbeef"));
        assert_eq!(info.private_key.as_ref().unwrap().hex_private_key, "deadbeef");
    }
}
