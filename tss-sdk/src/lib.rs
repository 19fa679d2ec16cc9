// Library exports for tss-sdk

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod keystore;
pub mod ledger;
pub mod logging;
pub mod recovery;
pub mod sdk;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use config::{Env, SdkConfig};
pub use engine::{EngineReply, MemoryEngine, TssEngine};
pub use error::{LocalError, Result, SdkError};
pub use keystore::{KeyShare, SecretsStore};
pub use ledger::{Ledger, LedgerEntry};
pub use logging::{LogSink, clear_logger, set_logger};
pub use recovery::{RecoveryCoordinator, RecoveryState};
pub use sdk::Sdk;
pub use session::{Access, ConnCode, ConnState, ConnectionStatus, Session};
pub use types::{
    AddressInfo, EntryKind, GroupType, KeyShareGroup, PrivateKeyInfo, SdkInfo, SignDetail, Status,
    Transaction, TssRequest,
};
