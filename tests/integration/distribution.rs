// tests/integration/distribution.rs - Backing up secrets to key holders

use pretty_assertions::assert_eq;
use sharekeeper::messaging::{MessageKind, Tag};
use sharekeeper::{DistributionStatus, KeeperError};

use super::print_test_header;
use crate::helpers::assertions::assert_shares_equivalent;
use crate::helpers::test_data::{create_test_group, TestCluster};
use crate::helpers::wait_until;

#[tokio::test]
async fn test_backup_delivers_one_share_per_holder() {
    print_test_header("share delivery");

    let cluster = TestCluster::new(3).await;
    let group = create_test_group("Family", 2, 3);

    let receipt = cluster
        .owner
        .backup_secret(&group, b"wallet seed")
        .await
        .unwrap();
    assert!(receipt.is_complete());
    assert_eq!(receipt.records.len(), 3);

    for (record, share) in receipt.records.iter().zip(&receipt.shares) {
        assert_eq!(record.share_index, share.index);
        assert_eq!(record.status, DistributionStatus::Published);
        assert_eq!(record.group_id, group.group_id);
    }

    for holder in &cluster.holders {
        let storage = holder.storage();
        let group_id = group.group_id.as_str();
        let identity = holder.identity();
        let delivered = wait_until(1000, move || async move {
            matches!(storage.get_received_share(group_id, identity).await, Ok(Some(_)))
        })
        .await;
        assert!(delivered, "{} never received a share", identity);

        let stored = storage
            .get_received_share(group_id, identity)
            .await
            .unwrap()
            .unwrap();
        let record = receipt
            .records
            .iter()
            .find(|r| r.recipient_identity == identity)
            .unwrap();
        let original = &receipt.shares[record.share_index];

        assert_shares_equivalent(&stored, original);
        assert!(stored.received);
        assert_eq!(stored.recipient_identity.as_deref(), Some(identity));
        assert_eq!(stored.distribution_event_id.as_ref(), Some(&record.event_id));
    }

    // The owner keeps the group so recovery can be started later
    let saved = cluster
        .owner
        .storage()
        .get_group(&group.group_id)
        .await
        .unwrap();
    assert_eq!(saved, Some(group));
}

#[tokio::test]
async fn test_share_events_are_tagged_with_group() {
    let cluster = TestCluster::new(2).await;
    let group = create_test_group("Tags", 2, 2);
    cluster.owner.backup_secret(&group, b"tagged").await.unwrap();

    let deliveries = cluster.network.published_to("holder-1", MessageKind::Share);
    assert_eq!(deliveries.len(), 1);
    assert!(deliveries[0]
        .tags
        .contains(&Tag::Group(group.group_id.clone())));
    assert_eq!(deliveries[0].sender, "owner");
}

#[tokio::test]
async fn test_unreachable_holder_fails_alone_and_can_be_retried() {
    print_test_header("failed delivery retry");

    let cluster = TestCluster::new(3).await;
    let group = create_test_group("Partial", 2, 3);
    cluster.network.set_recipient_reachable("holder-2", false);

    let receipt = cluster
        .owner
        .backup_secret(&group, b"partial delivery")
        .await
        .unwrap();
    assert!(!receipt.is_complete());

    let failed: Vec<_> = receipt.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].recipient_identity, "holder-2");
    assert_eq!(failed[0].status, DistributionStatus::Failed);
    assert_eq!(failed[0].attempts, 2);
    assert!(failed[0].error.is_some());
    let failed_event_id = failed[0].event_id.clone();

    cluster.network.set_recipient_reachable("holder-2", true);
    let retried = cluster.owner.retry_failed(&receipt).await.unwrap();
    assert!(retried.is_complete());

    let record = retried
        .records
        .iter()
        .find(|r| r.recipient_identity == "holder-2")
        .unwrap();
    assert_eq!(record.event_id, failed_event_id);

    // Holders that already had their share were not sent another
    assert_eq!(
        cluster.network.published_to("holder-1", MessageKind::Share).len(),
        1
    );
}

#[tokio::test]
async fn test_invalid_group_sends_nothing() {
    let cluster = TestCluster::new(2).await;
    let mut group = create_test_group("Broken", 2, 2);
    group.total_keys = 3;

    let err = cluster
        .owner
        .backup_secret(&group, b"never sent")
        .await
        .unwrap_err();
    assert!(matches!(err, KeeperError::ShareCountMismatch { .. }));
    assert_eq!(cluster.network.published_count(), 0);
}
