use super::*;
use crate::engine::MemoryEngine;
use crate::error::SdkError;
use crate::keystore::ShareSecret;
use crate::types::GroupType;
use tempfile::TempDir;

const PASSPHRASE: &str = "correct horse";

fn group(id: &str) -> KeyShareGroup {
    KeyShareGroup {
        group_id: id.to_string(),
        created_timestamp: 1_700_000_000,
        group_type: GroupType::EddsaTss,
        root_pub_key: "root".to_string(),
        chain_code: "00".to_string(),
        curve: "ed25519".to_string(),
        threshold: 1,
        participants: Vec::new(),
    }
}

fn setup() -> (TempDir, PathBuf, SecretsStore) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("node.json");
    let mut payload = SecretsPayload::new("node-1", ShareSecret::generate(32));
    payload.upsert_key_share(KeyShare::new(group("g1"), "s1", ShareSecret::generate(32)));
    create_secrets_file(&path, &payload, PASSPHRASE).unwrap();

    let store = SecretsStore::new(&path, Arc::new(MemoryEngine::new()), SdkConfig::default());
    (dir, path, store)
}

fn local(err: SdkError) -> LocalError {
    match err {
        SdkError::Local(e) => e,
        other => panic!("expected a local error, got {:?}", other),
    }
}

#[test]
fn test_create_refuses_existing_file() {
    let (_dir, path, _store) = setup();
    let payload = SecretsPayload::new("node-2", ShareSecret::generate(32));
    let err = create_secrets_file(&path, &payload, PASSPHRASE).unwrap_err();
    assert!(matches!(local(err), LocalError::AlreadyExists(_)));
}

#[test]
fn test_header_is_readable_without_passphrase() {
    let (_dir, path, _store) = setup();
    let file = read_secrets_file(&path).unwrap();
    assert_eq!(file.node_id, "node-1");
    assert_eq!(file.groups.len(), 1);
    assert!(!file.sealed.contains("node-1"));
}

#[test]
fn test_open_close_open() {
    let (_dir, _path, store) = setup();
    let session = store.open(PASSPHRASE).unwrap();
    assert_eq!(session.access(), Access::Full);
    assert_eq!(session.node_id().unwrap(), "node-1");
    assert!(session.handle().is_some());

    store.close(&session).unwrap();
    assert!(!session.is_open());
    assert!(matches!(
        local(session.node_id().unwrap_err()),
        LocalError::SessionClosed
    ));

    // Closing twice is fine.
    store.close(&session).unwrap();

    let reopened = store.open(PASSPHRASE).unwrap();
    assert!(!Arc::ptr_eq(&session, &reopened));
    assert!(reopened.is_open());
}

#[test]
fn test_second_open_returns_live_session() {
    let (_dir, _path, store) = setup();
    let first = store.open(PASSPHRASE).unwrap();
    let second = store.open(PASSPHRASE).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_wrong_passphrase() {
    let (_dir, _path, store) = setup();
    let err = store.open("wrong").unwrap_err();
    assert!(matches!(local(err), LocalError::Decryption));
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let store = SecretsStore::new(
        dir.path().join("absent.json"),
        Arc::new(MemoryEngine::new()),
        SdkConfig::default(),
    );
    assert!(matches!(local(store.open(PASSPHRASE).unwrap_err()), LocalError::NotFound(_)));
    assert!(matches!(local(store.open_public().unwrap_err()), LocalError::NotFound(_)));
}

#[test]
fn test_corrupt_file() {
    let (_dir, path, store) = setup();
    fs::write(&path, b"{ not json").unwrap();
    assert!(matches!(local(store.open(PASSPHRASE).unwrap_err()), LocalError::Corrupt { .. }));
}

#[test]
fn test_unsupported_version() {
    let (_dir, path, store) = setup();
    let mut doc: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    doc["version"] = serde_json::json!(9);
    fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

    assert!(matches!(
        local(store.open_public().unwrap_err()),
        LocalError::UnsupportedVersion { found: 9, .. }
    ));
}

#[test]
fn test_swapped_header_fails_decryption() {
    let (_dir, path, store) = setup();
    let mut doc: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    doc["node_id"] = serde_json::json!("node-evil");
    fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

    assert!(matches!(local(store.open(PASSPHRASE).unwrap_err()), LocalError::Decryption));
}

#[test]
fn test_public_session_is_read_only() {
    let (_dir, _path, store) = setup();
    let session = store.open_public().unwrap();
    assert_eq!(session.access(), Access::Public);
    assert_eq!(session.node_id().unwrap(), "node-1");
    assert_eq!(session.list_key_share_groups().unwrap().len(), 1);
    assert!(matches!(
        local(session.export_secrets("pw").unwrap_err()),
        LocalError::ReadOnlySession
    ));
    assert!(matches!(
        local(session.tss_requests().approve(&["r1".to_string()]).unwrap_err()),
        LocalError::ReadOnlySession
    ));
}

#[test]
fn test_access_conflict() {
    let (_dir, _path, store) = setup();
    let public = store.open_public().unwrap();
    assert!(matches!(
        local(store.open(PASSPHRASE).unwrap_err()),
        LocalError::SessionConflict
    ));

    store.close(&public).unwrap();
    let full = store.open(PASSPHRASE).unwrap();
    assert!(matches!(
        local(store.open_public().unwrap_err()),
        LocalError::SessionConflict
    ));
    drop(full);

    // Dropping the last handle releases the store as well.
    assert!(store.open_public().is_ok());
}

#[test]
fn test_store_key_share_persists() {
    let (_dir, path, store) = setup();
    let session = store.open(PASSPHRASE).unwrap();
    let vault = SecretsVault::new(path.clone(), PASSPHRASE, load_secrets(&path, PASSPHRASE).unwrap());
    vault
        .store_key_share(KeyShare::new(group("g2"), "s2", ShareSecret::generate(32)))
        .unwrap();
    store.close(&session).unwrap();

    let reloaded = load_secrets(&path, PASSPHRASE).unwrap();
    assert!(reloaded.key_share("g2").is_some());
    assert_eq!(read_secrets_file(&path).unwrap().groups.len(), 2);
    assert!(!path.with_extension("json.tmp").exists());
}

#[test]
fn test_export_recovery_unknown_group() {
    let (_dir, _path, store) = setup();
    let session = store.open(PASSPHRASE).unwrap();
    let err = session
        .export_recovery_key_shares(&["g1".to_string(), "nope".to_string()], "pw")
        .unwrap_err();
    assert!(matches!(local(err), LocalError::UnknownGroup(id) if id == "nope"));

    let bundle = session
        .export_recovery_key_shares(&["g1".to_string()], "pw")
        .unwrap();
    let payload = open_recovery_bundle(&bundle, "pw").unwrap();
    assert_eq!(payload.node_id, "node-1");
    assert_eq!(payload.shares.len(), 1);
    assert!(open_secrets_bundle(&bundle, "pw").is_err());
}

#[tokio::test]
async fn test_scoped_closes_on_error() {
    let (_dir, _path, store) = setup();
    let mut seen = None;
    let result: Result<()> = store
        .scoped(PASSPHRASE, |session| {
            seen = Some(session.clone());
            async move { Err::<(), _>(SdkError::from(LocalError::SessionConflict)) }
        })
        .await;
    assert!(result.is_err());
    assert!(!seen.unwrap().is_open());
}

#[test]
fn test_wrong_passphrase_while_open() {
    let (_dir, path, store) = setup();
    let live = store.open(PASSPHRASE).unwrap();

    let err = store.open("wrong").unwrap_err();
    assert!(matches!(local(err), LocalError::Decryption));
    let other = SecretsStore::new(&path, Arc::new(MemoryEngine::new()), SdkConfig::default());
    assert!(matches!(local(other.open("wrong").unwrap_err()), LocalError::Decryption));

    // The live session is untouched and still reachable with the right passphrase.
    assert!(live.is_open());
    assert_eq!(live.node_id().unwrap(), "node-1");
    assert!(Arc::ptr_eq(&live, &store.open(PASSPHRASE).unwrap()));
}

#[test]
fn test_stores_share_one_session_per_file() {
    let (dir, path, store) = setup();
    let other = SecretsStore::new(
        dir.path().join(".").join("node.json"),
        Arc::new(MemoryEngine::new()),
        SdkConfig::default(),
    );

    let first = store.open(PASSPHRASE).unwrap();
    let second = other.open(PASSPHRASE).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(matches!(local(other.open_public().unwrap_err()), LocalError::SessionConflict));

    // Closing through either store releases the file for both.
    other.close(&second).unwrap();
    let public = store.open_public().unwrap();
    assert_eq!(public.access(), Access::Public);
    assert!(matches!(local(other.open(PASSPHRASE).unwrap_err()), LocalError::SessionConflict));
    store.close(&public).unwrap();

    let fresh = SecretsStore::new(&path, Arc::new(MemoryEngine::new()), SdkConfig::default());
    assert!(fresh.open(PASSPHRASE).unwrap().is_open());
}

#[tokio::test]
async fn test_scoped_leaves_live_session_open() {
    let (_dir, _path, store) = setup();
    let live = store.open(PASSPHRASE).unwrap();

    let same = store
        .scoped(PASSPHRASE, |session| async move { Ok::<_, SdkError>(session) })
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&live, &same));
    assert!(live.is_open());
    assert!(live.tss_requests().list_pending(live.timeout()).await.unwrap().is_empty());

    let err = store
        .scoped("wrong", |_| async { Ok::<_, SdkError>(()) })
        .await
        .unwrap_err();
    assert!(matches!(local(err), LocalError::Decryption));
    assert!(live.is_open());
}

#[test]
fn test_failed_replace_removes_temp_file() {
    let (dir, path, _store) = setup();
    let occupied = dir.path().join("occupied");
    fs::create_dir(&occupied).unwrap();
    let vault = SecretsVault::new(occupied.clone(), PASSPHRASE, load_secrets(&path, PASSPHRASE).unwrap());

    let share = KeyShare::new(group("g2"), "s2", ShareSecret::generate(32));
    assert!(vault.store_key_share(share).is_err());
    assert!(!dir.path().join("occupied.tmp").exists());
    assert_eq!(vault.groups().len(), 1);
}

#[test]
fn test_session_debug_hides_secrets() {
    let (_dir, _path, store) = setup();
    let session = store.open(PASSPHRASE).unwrap();
    let text = format!("{:?}", session);
    assert!(text.contains("Full"));
    assert!(!text.contains(PASSPHRASE));
}
