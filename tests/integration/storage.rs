// tests/integration/storage.rs - Storage backends behind the factory

use std::sync::Arc;

use pretty_assertions::assert_eq;
use sharekeeper::{
    create_storage, Config, MemoryRelayNetwork, RecoveryRequest, RecoveryStatus, Storage,
    VaultService,
};

use super::print_test_header;
use crate::helpers::assertions::assert_shares_equivalent;
use crate::helpers::test_data::{create_test_group, create_test_shares, test_config};

fn file_config(dir: &tempfile::TempDir) -> Config {
    let mut config = test_config();
    config.storage.backend = "file".to_string();
    config.storage.data_directory = Some(dir.path().to_string_lossy().into_owned());
    config
}

/// Exercises every storage operation against one backend
async fn run_common_storage_tests(storage: &dyn Storage) {
    let group = create_test_group("Common", 2, 3);
    storage.put_group(&group).await.unwrap();
    assert_eq!(storage.get_group(&group.group_id).await.unwrap(), Some(group.clone()));
    assert!(storage.get_group("missing").await.unwrap().is_none());
    assert_eq!(storage.list_groups().await.unwrap().len(), 1);

    let mut older = RecoveryRequest::new(
        &group.group_id,
        "owner",
        &group.identities(),
        2,
        chrono::Duration::hours(1),
    );
    older.requested_at -= chrono::Duration::minutes(5);
    let newer = RecoveryRequest::new(
        &group.group_id,
        "owner",
        &group.identities(),
        2,
        chrono::Duration::hours(1),
    );
    storage.put_request(&newer).await.unwrap();
    storage.put_request(&older).await.unwrap();

    let listed = storage.list_requests(&group.group_id).await.unwrap();
    assert_eq!(
        listed.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
        vec![older.id.as_str(), newer.id.as_str()]
    );
    assert!(storage.list_requests("other-group").await.unwrap().is_empty());

    let mut updated = newer.clone();
    updated.status = RecoveryStatus::Expired;
    storage.put_request(&updated).await.unwrap();
    assert_eq!(
        storage.get_request(&newer.id).await.unwrap().unwrap().status,
        RecoveryStatus::Expired
    );

    let mut share = create_test_shares(b"stored", 2, 3).remove(1);
    share.group_id = group.group_id.clone();
    share.recipient_identity = Some("holder-2".to_string());
    share.received = true;
    storage.put_received_share(&share).await.unwrap();

    let stored = storage
        .get_received_share(&group.group_id, "holder-2")
        .await
        .unwrap()
        .unwrap();
    assert_shares_equivalent(&stored, &share);
    assert!(storage
        .get_received_share(&group.group_id, "holder-1")
        .await
        .unwrap()
        .is_none());
    assert_eq!(storage.list_received_shares("holder-2").await.unwrap().len(), 1);

    // A share with no recipient has no key to live under
    share.recipient_identity = None;
    assert!(storage.put_received_share(&share).await.is_err());
}

#[tokio::test]
async fn test_memory_backend() {
    print_test_header("memory storage");
    let storage = create_storage(&test_config()).await.unwrap();
    assert_eq!(storage.backend_name(), "memory");
    run_common_storage_tests(storage.as_ref()).await;
}

#[tokio::test]
async fn test_file_backend() {
    print_test_header("file storage");
    let dir = tempfile::tempdir().unwrap();
    let storage = create_storage(&file_config(&dir)).await.unwrap();
    assert_eq!(storage.backend_name(), "file");
    run_common_storage_tests(storage.as_ref()).await;
}

#[tokio::test]
async fn test_file_backend_requires_directory() {
    let mut config = test_config();
    config.storage.backend = "file".to_string();
    assert!(create_storage(&config).await.is_err());

    config.storage.backend = "postgres".to_string();
    assert!(create_storage(&config).await.is_err());
}

#[tokio::test]
async fn test_vault_state_survives_restart() {
    print_test_header("file storage restart");

    let dir = tempfile::tempdir().unwrap();
    let network = MemoryRelayNetwork::new();
    let group = create_test_group("Durable", 2, 2);

    let request_id = {
        let owner = VaultService::new(file_config(&dir), Arc::new(network.endpoint("owner")))
            .await
            .unwrap();
        owner.backup_secret(&group, b"durable").await.unwrap();
        owner
            .initiate_recovery(&group.group_id, None)
            .await
            .unwrap()
            .id
    };

    let reopened = VaultService::new(file_config(&dir), Arc::new(network.endpoint("owner")))
        .await
        .unwrap();
    assert_eq!(
        reopened.storage().get_group(&group.group_id).await.unwrap(),
        Some(group.clone())
    );

    let status = reopened.recovery_status(&group.group_id).await.unwrap();
    assert!(status.has_active_recovery);
    assert_eq!(
        status.active_recovery_request.map(|r| r.id),
        Some(request_id)
    );
}
