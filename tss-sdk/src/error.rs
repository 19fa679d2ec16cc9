//! Error taxonomy for the SDK.
//!
//! Failures are split in two tiers: [`LocalError`] for everything that goes
//! wrong inside this crate (marshalling, file handling, handle misuse,
//! timeouts, recovery bookkeeping) and [`SdkError::Api`] for non-zero codes
//! reported verbatim by the engine.

use std::path::PathBuf;
use std::time::Duration;

/// Status code for a successful engine call.
pub const SUCCESS: i32 = 0;

/// Status code reported for every error raised by this crate.
pub const COMMON_ERROR: i32 = 9000;

/// Errors that originate in this crate and never reached the engine.
#[derive(Debug, thiserror::Error)]
pub enum LocalError {
    #[error("secrets file not found: {0}")]
    NotFound(PathBuf),

    #[error("secrets file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("secrets file {path} is corrupt: {cause}")]
    Corrupt {
        path: PathBuf,
        #[source]
        cause: serde_json::Error,
    },

    #[error("secrets file {path} has unsupported version {found}")]
    UnsupportedVersion { path: PathBuf, found: u8 },

    #[error("sealed data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("sealed data too short: {len} bytes")]
    TruncatedCiphertext { len: usize },

    #[error("decryption failed: wrong passphrase or tampered data")]
    Decryption,

    #[error("encryption failed")]
    Encryption,

    #[error("key derivation failed: {0}")]
    KeyDerivation(argon2::Error),

    #[error("failed to encode {what}: {cause}")]
    Encode {
        what: &'static str,
        #[source]
        cause: serde_json::Error,
    },

    #[error("failed to decode {what}: {cause}")]
    Decode {
        what: &'static str,
        #[source]
        cause: serde_json::Error,
    },

    #[error("engine reply carried no {0}")]
    MissingData(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),

    #[error("engine dropped the call without answering")]
    EngineDropped,

    #[error("session is closed")]
    SessionClosed,

    #[error("session was opened read-only")]
    ReadOnlySession,

    #[error("secrets file is already open with different access")]
    SessionConflict,

    #[error("key share group not found: {0}")]
    UnknownGroup(String),

    #[error("group {group_id} needs {need} recovery shares, {have} imported")]
    InsufficientShares {
        group_id: String,
        have: usize,
        need: usize,
    },

    #[error("recovery for group {0} already consumed its shares")]
    RecoveryConsumed(String),

    #[error("recovery bundle holds no share for group {0}")]
    GroupNotInBundle(String),

    #[error("recovery share for group {group_id} does not match previously imported shares")]
    GroupMismatch { group_id: String },

    #[error("another logger already owns the log facade")]
    LoggerInstalled,
}

/// Top-level error returned by every fallible SDK operation.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error(transparent)]
    Local(#[from] LocalError),

    #[error("engine error {code}: {message}")]
    Api { code: i32, message: String },
}

impl SdkError {
    /// Builds an API error from an engine status code and optional message.
    pub fn api(code: i32, message: Option<String>) -> Self {
        SdkError::Api {
            code,
            message: message.unwrap_or_default(),
        }
    }

    /// Numeric code: the engine's code for API errors, [`COMMON_ERROR`] otherwise.
    pub fn code(&self) -> i32 {
        match self {
            SdkError::Local(_) => COMMON_ERROR,
            SdkError::Api { code, .. } => *code,
        }
    }

    pub fn as_local(&self) -> Option<&LocalError> {
        match self {
            SdkError::Local(e) => Some(e),
            SdkError::Api { .. } => None,
        }
    }
}

impl From<std::io::Error> for SdkError {
    fn from(e: std::io::Error) -> Self {
        SdkError::Local(LocalError::Io(e))
    }
}

/// Result type for SDK operations
pub type Result<T> = std::result::Result<T, SdkError>;
