//! Process-wide entry points.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::codec;
use crate::config::SdkConfig;
use crate::engine::{MemoryEngine, TssEngine};
use crate::error::{LocalError, Result};
use crate::keystore::{
    SecretsPayload, SecretsStore, ShareSecret, create_secrets_file, open_secrets_bundle,
};
use crate::recovery::RecoveryCoordinator;
use crate::types::SdkInfo;

#[derive(Deserialize)]
struct NodeCreated {
    tss_node_id: String,
    node_secret: ShareSecret,
}

/// Entry point binding an engine to a configuration.
#[derive(Clone)]
pub struct Sdk {
    engine: Arc<dyn TssEngine>,
    config: SdkConfig,
}

impl Sdk {
    pub fn new(engine: Arc<dyn TssEngine>, config: SdkConfig) -> Self {
        Self { engine, config }
    }

    /// An SDK backed by a fresh [`MemoryEngine`].
    pub fn in_memory(config: SdkConfig) -> Self {
        Self::new(Arc::new(MemoryEngine::new()), config)
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn sdk_info(&self) -> Result<SdkInfo> {
        let data = self.engine.version().into_data()?;
        codec::decode("SDK info", data.as_deref())
    }

    /// Asks the engine for a new node identity and stores it in a new secrets
    /// file at `path`. Returns the node id.
    pub async fn initialize_secrets(&self, path: impl AsRef<Path>, passphrase: &str) -> Result<String> {
        let path = path.as_ref();
        if path.exists() {
            return Err(LocalError::AlreadyExists(path.to_path_buf()).into());
        }

        let data = self
            .engine
            .create_node(&self.config)
            .wait(self.config.timeout())
            .await?;
        let created: NodeCreated = codec::decode("node identity", data.as_deref())?;

        let payload = SecretsPayload::new(created.tss_node_id, created.node_secret);
        create_secrets_file(path, &payload, passphrase)?;
        log::info!(
            "initialized secrets for node {} at {}",
            payload.node_id(),
            path.display()
        );
        Ok(payload.node_id().to_string())
    }

    /// Writes the secrets from an exported bundle to a new file at `new_path`,
    /// sealed under `new_passphrase`. Returns the node id.
    pub fn import_secrets(
        &self,
        bundle: &str,
        bundle_passphrase: &str,
        new_path: impl AsRef<Path>,
        new_passphrase: &str,
    ) -> Result<String> {
        let new_path = new_path.as_ref();
        let payload = open_secrets_bundle(bundle, bundle_passphrase)?;
        create_secrets_file(new_path, &payload, new_passphrase)?;
        log::info!(
            "imported secrets for node {} into {}",
            payload.node_id(),
            new_path.display()
        );
        Ok(payload.node_id().to_string())
    }

    /// Store over the secrets file at `path`. Nothing is read until it is opened.
    pub fn secrets_store(&self, path: impl AsRef<Path>) -> SecretsStore {
        SecretsStore::new(path, self.engine.clone(), self.config.clone())
    }

    /// Fresh recovery context.
    pub fn recovery(&self) -> RecoveryCoordinator {
        RecoveryCoordinator::new(self.engine.clone())
    }
}
