#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tss_sdk::{
    GroupType, KeyShareGroup, MemoryEngine, SdkConfig, Sdk, SecretsStore, Session, SdkError,
    LocalError,
};

pub const PASSPHRASE: &str = "node passphrase";
pub const TIMEOUT: Duration = Duration::from_secs(5);

pub struct Node {
    pub node_id: String,
    pub path: PathBuf,
    pub store: SecretsStore,
    pub session: Arc<Session>,
}

pub fn sdk() -> (Arc<MemoryEngine>, Sdk) {
    let engine = Arc::new(MemoryEngine::new());
    let sdk = Sdk::new(engine.clone(), SdkConfig::default());
    (engine, sdk)
}

/// Initializes a secrets file named `name` under `dir` and opens it.
pub async fn node(sdk: &Sdk, dir: &Path, name: &str) -> Node {
    let path = dir.join(format!("{}.json", name));
    let node_id = sdk.initialize_secrets(&path, PASSPHRASE).await.unwrap();
    let store = sdk.secrets_store(&path);
    let session = store.open(PASSPHRASE).unwrap();
    Node {
        node_id,
        path,
        store,
        session,
    }
}

/// Runs a reshare among `nodes` and returns the new group.
pub async fn reshare(engine: &MemoryEngine, nodes: &[&Node], threshold: u32) -> KeyShareGroup {
    let participants = nodes.iter().map(|n| n.node_id.clone()).collect();
    let id = engine.submit_tss_request(GroupType::EcdsaTss, threshold, participants);
    for node in nodes {
        node.session.tss_requests().approve(&[id.clone()]).unwrap();
    }
    assert_eq!(engine.process(), 1);

    let requests = nodes[0]
        .session
        .tss_requests()
        .get_by_ids(&[id], TIMEOUT)
        .await
        .unwrap();
    requests[0].results.as_ref().unwrap()[0].clone()
}

pub fn local(err: SdkError) -> LocalError {
    match err {
        SdkError::Local(e) => e,
        other => panic!("expected a local error, got {:?}", other),
    }
}
