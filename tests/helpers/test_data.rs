// tests/helpers/test_data.rs - Test data generators

use std::sync::Arc;

use sharekeeper::{
    BackupGroup, Config, KeyHolder, MemoryRelayNetwork, MemoryStorage, SecretSharingEngine, Share,
    ShareMetadata, VaultService,
};

pub const TEST_RELAY: &str = "wss://relay.test";

/// Config with a default relay and fast retries
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.distribution.default_relays = vec![TEST_RELAY.to_string()];
    config.distribution.max_attempts = 2;
    config.distribution.retry_delay_ms = 1;
    config
}

/// Identities `holder-1` through `holder-{count}`
pub fn holder_identities(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("holder-{}", i)).collect()
}

pub fn create_test_group(label: &str, threshold: usize, holders: usize) -> BackupGroup {
    let key_holders = holder_identities(holders)
        .into_iter()
        .map(|identity| KeyHolder::new(identity.clone(), identity))
        .collect();
    BackupGroup::new(label, threshold, key_holders, vec![TEST_RELAY.to_string()])
}

pub fn create_test_metadata(group_id: &str) -> ShareMetadata {
    ShareMetadata {
        creator_identity: "owner".to_string(),
        group_id: group_id.to_string(),
        group_label: "Test group".to_string(),
        peers: Vec::new(),
    }
}

/// Split `secret` with the default engine
pub fn create_test_shares(secret: &[u8], threshold: usize, count: usize) -> Vec<Share> {
    SecretSharingEngine::default()
        .split(secret, threshold, count, &create_test_metadata("g1"))
        .expect("split should succeed")
}

/// One owner and `holders` key-holder services on a shared in-memory relay network
pub struct TestCluster {
    pub network: MemoryRelayNetwork,
    pub owner: VaultService,
    pub holders: Vec<VaultService>,
}

impl TestCluster {
    pub async fn new(holders: usize) -> Self {
        Self::with_config(holders, test_config()).await
    }

    pub async fn with_config(holders: usize, config: Config) -> Self {
        let network = MemoryRelayNetwork::new();
        let owner = service(&network, "owner", config.clone());
        owner.start_inbound().await.expect("owner inbound");

        let mut services = Vec::new();
        for identity in holder_identities(holders) {
            let service = service(&network, &identity, config.clone());
            service.start_inbound().await.expect("holder inbound");
            services.push(service);
        }

        Self {
            network,
            owner,
            holders: services,
        }
    }

    pub fn holder(&self, identity: &str) -> &VaultService {
        self.holders
            .iter()
            .find(|s| s.identity() == identity)
            .expect("unknown holder")
    }
}

fn service(network: &MemoryRelayNetwork, identity: &str, config: Config) -> VaultService {
    VaultService::with_storage(
        config,
        Arc::new(MemoryStorage::new()),
        Arc::new(network.endpoint(identity)),
    )
    .expect("service should build")
}
