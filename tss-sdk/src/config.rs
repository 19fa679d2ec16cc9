//! SDK configuration.
//!
//! The configuration is handed to the engine whenever a node is created or a
//! session is opened. It can be built in code or deserialized from JSON of the
//! form `{"env": "production", "timeoutMillis": 5000, "debug": false}`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LocalError, Result};

/// Deployment environment the engine should talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    Development,
    Production,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkConfig {
    /// Target environment
    pub env: Env,

    /// Upper bound on how long asynchronous engine calls may take
    pub timeout_millis: u64,

    /// Ask the engine for verbose diagnostics
    #[serde(default)]
    pub debug: bool,
}

impl SdkConfig {
    pub const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;

    pub fn new(env: Env, timeout_millis: u64, debug: bool) -> Self {
        Self {
            env,
            timeout_millis,
            debug,
        }
    }

    /// Deserializes a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|cause| {
            LocalError::Decode {
                what: "SDK config",
                cause,
            }
            .into()
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self::new(Env::Production, Self::DEFAULT_TIMEOUT_MILLIS, false)
    }
}
