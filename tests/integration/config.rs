// tests/integration/config.rs - Environment configuration driving a service

use std::sync::Arc;

use serial_test::serial;
use sharekeeper::{Config, KeeperError, MemoryRelayNetwork, VaultService};

use super::print_test_header;
use crate::helpers::test_data::{create_test_group, test_config};

const VARS: &[&str] = &[
    "SHAREKEEPER_RELAYS",
    "SHAREKEEPER_STORAGE_BACKEND",
    "SHAREKEEPER_DATA_DIRECTORY",
    "SHAREKEEPER_METRICS_ENABLED",
    "SHAREKEEPER_MAX_ATTEMPTS",
];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[tokio::test]
#[serial]
async fn test_service_from_environment() {
    print_test_header("environment configuration");
    clear_env();

    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("SHAREKEEPER_RELAYS", "wss://one.example,wss://two.example");
    std::env::set_var("SHAREKEEPER_STORAGE_BACKEND", "file");
    std::env::set_var("SHAREKEEPER_DATA_DIRECTORY", dir.path());
    std::env::set_var("SHAREKEEPER_METRICS_ENABLED", "false");

    let config = Config::from_env().unwrap();
    clear_env();

    let summary = config.summary();
    assert_eq!(summary.relay_count, 2);
    assert_eq!(summary.storage_backend, "file");
    assert!(!summary.metrics_enabled);

    let network = MemoryRelayNetwork::new();
    let service = VaultService::new(config, Arc::new(network.endpoint("owner")))
        .await
        .unwrap();
    assert_eq!(service.storage().backend_name(), "file");

    // Groups without relays of their own use the configured defaults
    let mut group = create_test_group("Defaults", 2, 2);
    group.relays.clear();
    service.backup_secret(&group, b"env").await.unwrap();
    assert!(network
        .published()
        .iter()
        .all(|d| d.relays == vec!["wss://one.example", "wss://two.example"]));

    // Counting is off, so nothing is exported
    assert!(service.metrics().gather_text().is_empty());
}

#[tokio::test]
#[serial]
async fn test_invalid_environment_is_reported() {
    clear_env();
    std::env::set_var("SHAREKEEPER_MAX_ATTEMPTS", "0");
    let result = Config::from_env();
    clear_env();

    let err = result.unwrap_err();
    assert!(err.to_string().contains("distribution.max_attempts"));
}

#[tokio::test]
async fn test_service_rejects_invalid_config() {
    let mut config = test_config();
    config.distribution.default_relays = vec!["https://not-a-relay".to_string()];

    let network = MemoryRelayNetwork::new();
    let result = VaultService::new(config, Arc::new(network.endpoint("owner"))).await;
    assert!(matches!(result, Err(KeeperError::Configuration(_))));
}

#[tokio::test]
async fn test_metrics_exported_when_enabled() {
    let network = MemoryRelayNetwork::new();
    let service = VaultService::new(test_config(), Arc::new(network.endpoint("owner")))
        .await
        .unwrap();
    let group = create_test_group("Metrics", 2, 2);
    service.backup_secret(&group, b"counted").await.unwrap();

    let text = service.metrics().gather_text();
    assert!(text.contains("sharekeeper_splits_total"));
    assert!(text.contains("sharekeeper_shares_distributed_total"));
}
