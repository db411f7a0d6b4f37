// tests/integration/recovery.rs - Recovery between owner and key holders

use std::time::Duration;

use pretty_assertions::assert_eq;
use sharekeeper::messaging::{MessageKind, OutboundMessage, RecoveryResponseMessage};
use sharekeeper::{BackupGroup, KeeperError, Messenger, RecoveryStatus, VaultService};

use super::print_test_header;
use crate::helpers::assertions::{assert_request_status, assert_tallies};
use crate::helpers::test_data::{create_test_group, TestCluster, TEST_RELAY};
use crate::helpers::wait_until;

/// Backs up `secret` and waits until every holder has stored its share.
async fn backed_up(cluster: &TestCluster, threshold: usize, secret: &[u8]) -> BackupGroup {
    let group = create_test_group("Recovery", threshold, cluster.holders.len());
    let receipt = cluster.owner.backup_secret(&group, secret).await.unwrap();
    assert!(receipt.is_complete());

    for holder in &cluster.holders {
        let storage = holder.storage();
        let group_id = group.group_id.as_str();
        let identity = holder.identity();
        assert!(
            wait_until(1000, move || async move {
                matches!(storage.get_received_share(group_id, identity).await, Ok(Some(_)))
            })
            .await
        );
    }
    group
}

/// Waits until `service` has imported the request announced by the owner.
async fn request_arrives(service: &VaultService, request_id: &str) {
    let coordinator = service.coordinator();
    assert!(
        wait_until(1000, move || async move {
            matches!(coordinator.get_request(request_id).await, Ok(Some(_)))
        })
        .await,
        "{} never received request {}",
        service.identity(),
        request_id
    );
}

/// Waits until the owner's copy of a request matches `predicate`.
async fn owner_sees<P>(cluster: &TestCluster, request_id: &str, predicate: P) -> bool
where
    P: Fn(&sharekeeper::RecoveryRequest) -> bool + Copy,
{
    let coordinator = cluster.owner.coordinator();
    wait_until(1000, move || async move {
        match coordinator.get_request(request_id).await {
            Ok(Some(request)) => predicate(&request),
            _ => false,
        }
    })
    .await
}

#[tokio::test]
async fn test_backup_then_recover_end_to_end() {
    print_test_header("end-to-end recovery");

    let cluster = TestCluster::new(3).await;
    let group = backed_up(&cluster, 2, b"correct horse battery staple").await;

    let request = cluster
        .owner
        .initiate_recovery(&group.group_id, None)
        .await
        .unwrap();
    assert_request_status(&request, RecoveryStatus::Pending);
    assert_eq!(request.pending_count(), 3);

    let status = cluster.owner.recovery_status(&group.group_id).await.unwrap();
    assert!(status.has_active_recovery);
    assert!(status.is_initiator);
    assert!(!status.can_recover);

    for identity in ["holder-1", "holder-3"] {
        let holder = cluster.holder(identity);
        request_arrives(holder, &request.id).await;
        tokio_test::assert_ok!(holder.answer_recovery(&request.id, true).await);
    }

    assert!(owner_sees(&cluster, &request.id, |r| r.status == RecoveryStatus::Completed).await);

    let completed = cluster
        .owner
        .coordinator()
        .get_request(&request.id)
        .await
        .unwrap()
        .unwrap();
    assert_tallies(&completed, 2, 0);
    assert_eq!(completed.pending_count(), 1);

    let status = cluster.owner.recovery_status(&group.group_id).await.unwrap();
    assert!(status.can_recover);
    assert!(!status.has_active_recovery);

    let secret = cluster.owner.reconstruct(&request.id).await.unwrap();
    assert_eq!(secret.as_slice(), b"correct horse battery staple");
}

#[tokio::test]
async fn test_progress_and_late_denial() {
    print_test_header("recovery progression");

    let cluster = TestCluster::new(3).await;
    let group = backed_up(&cluster, 2, b"progress").await;
    let request = cluster
        .owner
        .initiate_recovery(&group.group_id, None)
        .await
        .unwrap();

    let first = cluster.holder("holder-1");
    request_arrives(first, &request.id).await;
    first.answer_recovery(&request.id, true).await.unwrap();
    assert!(owner_sees(&cluster, &request.id, |r| r.status == RecoveryStatus::InProgress).await);

    let err = cluster.owner.reconstruct(&request.id).await.unwrap_err();
    assert!(matches!(err, KeeperError::RequestNotCompleted { .. }));

    let second = cluster.holder("holder-2");
    request_arrives(second, &request.id).await;
    second.answer_recovery(&request.id, true).await.unwrap();
    assert!(owner_sees(&cluster, &request.id, |r| r.status == RecoveryStatus::Completed).await);

    // A denial after completion is recorded without reopening the request
    let third = cluster.holder("holder-3");
    request_arrives(third, &request.id).await;
    third.answer_recovery(&request.id, false).await.unwrap();
    assert!(owner_sees(&cluster, &request.id, |r| r.denied_count() == 1).await);

    let request = cluster
        .owner
        .coordinator()
        .get_request(&request.id)
        .await
        .unwrap()
        .unwrap();
    assert_request_status(&request, RecoveryStatus::Completed);
    assert_tallies(&request, 2, 1);
    assert_eq!(
        cluster.owner.reconstruct(&request.id).await.unwrap().as_slice(),
        b"progress"
    );
}

#[tokio::test]
async fn test_holder_without_share_cannot_approve() {
    let cluster = TestCluster::new(2).await;
    let group = create_test_group("Unshared", 2, 2);
    cluster.owner.storage().put_group(&group).await.unwrap();

    let request = cluster
        .owner
        .initiate_recovery(&group.group_id, None)
        .await
        .unwrap();
    let holder = cluster.holder("holder-1");
    request_arrives(holder, &request.id).await;

    let err = holder.answer_recovery(&request.id, true).await.unwrap_err();
    assert!(matches!(err, KeeperError::ShareNotHeld { .. }));

    // Denying needs no share
    let updated = holder.answer_recovery(&request.id, false).await.unwrap();
    assert_tallies(&updated, 0, 1);
}

#[tokio::test]
async fn test_recovery_for_unknown_group_fails() {
    let cluster = TestCluster::new(2).await;
    let err = cluster
        .owner
        .initiate_recovery("no-such-group", None)
        .await
        .unwrap_err();
    assert!(matches!(err, KeeperError::GroupNotFound { .. }));
    assert_eq!(cluster.network.published_count(), 0);
}

#[tokio::test]
async fn test_expired_request_rejects_answers() {
    print_test_header("recovery expiry");

    let cluster = TestCluster::new(2).await;
    let group = backed_up(&cluster, 2, b"too late").await;
    let request = cluster
        .owner
        .initiate_recovery(&group.group_id, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    let holder = cluster.holder("holder-1");
    request_arrives(holder, &request.id).await;

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let err = holder.answer_recovery(&request.id, true).await.unwrap_err();
    assert!(matches!(err, KeeperError::RequestExpired { .. }));

    let expired = cluster
        .owner
        .coordinator()
        .get_request(&request.id)
        .await
        .unwrap()
        .unwrap();
    assert_request_status(&expired, RecoveryStatus::Expired);

    let status = cluster.owner.recovery_status(&group.group_id).await.unwrap();
    assert!(!status.has_active_recovery);
    assert!(!status.can_recover);
}

#[tokio::test]
async fn test_response_published_before_request_is_applied_after_import() {
    print_test_header("out-of-order delivery");

    let cluster = TestCluster::new(2).await;
    let group = backed_up(&cluster, 2, b"reordered").await;

    // Holder 2 will not see the announcement until it is redelivered
    cluster.network.set_recipient_reachable("holder-2", false);
    let request = cluster
        .owner
        .initiate_recovery(&group.group_id, None)
        .await
        .unwrap();
    cluster.network.set_recipient_reachable("holder-2", true);

    let first = cluster.holder("holder-1");
    request_arrives(first, &request.id).await;

    // A response reaching holder 2 ahead of the request is parked
    let second = cluster.holder("holder-2");
    let response = RecoveryResponseMessage {
        request_id: request.id.clone(),
        group_id: group.group_id.clone(),
        responder_identity: "holder-1".to_string(),
        approved: false,
        responded_at: chrono::Utc::now(),
        share: None,
    };
    let holder_one = cluster.network.endpoint("holder-1");
    holder_one
        .encrypt_and_send(
            &OutboundMessage::new(response),
            "holder-2",
            &[TEST_RELAY.to_string()],
            &[],
        )
        .await
        .unwrap();

    let handler = second.inbound_handler();
    assert!(wait_until(1000, move || async move { handler.parked_count() == 1 }).await);

    // Replay the announcement to holder 2
    let announcement = cluster
        .network
        .published_to("holder-1", MessageKind::RecoveryRequest)
        .pop()
        .unwrap();
    let owner = cluster.network.endpoint("owner");
    let relayed = OutboundMessage::new(announcement.envelope().unwrap());
    owner
        .encrypt_and_send(&relayed, "holder-2", &[TEST_RELAY.to_string()], &[])
        .await
        .unwrap();

    request_arrives(second, &request.id).await;
    let coordinator = second.coordinator();
    let request_id = request.id.as_str();
    assert!(
        wait_until(1000, move || async move {
            matches!(
                coordinator.get_request(request_id).await,
                Ok(Some(r)) if r.denied_count() == 1
            )
        })
        .await
    );
    assert_eq!(handler.parked_count(), 0);
}

#[tokio::test]
async fn test_concurrent_answers_all_counted() {
    let cluster = TestCluster::new(4).await;
    let group = backed_up(&cluster, 3, b"concurrent").await;
    let request = cluster
        .owner
        .initiate_recovery(&group.group_id, None)
        .await
        .unwrap();

    for holder in &cluster.holders {
        request_arrives(holder, &request.id).await;
    }

    let answers = cluster
        .holders
        .iter()
        .map(|holder| holder.answer_recovery(&request.id, true));
    for result in futures::future::join_all(answers).await {
        tokio_test::assert_ok!(result);
    }

    assert!(owner_sees(&cluster, &request.id, |r| r.approved_count() == 4).await);
    let request = cluster
        .owner
        .coordinator()
        .get_request(&request.id)
        .await
        .unwrap()
        .unwrap();
    assert_request_status(&request, RecoveryStatus::Completed);
    assert_eq!(
        cluster.owner.reconstruct(&request.id).await.unwrap().as_slice(),
        b"concurrent"
    );
}

#[tokio::test]
async fn test_completed_approvals_survive_withdrawal_and_redelivery() {
    print_test_header("frozen approvals");

    let cluster = TestCluster::new(3).await;
    let group = backed_up(&cluster, 2, b"frozen").await;
    let request = cluster
        .owner
        .initiate_recovery(&group.group_id, None)
        .await
        .unwrap();

    for identity in ["holder-1", "holder-2"] {
        let holder = cluster.holder(identity);
        request_arrives(holder, &request.id).await;
        holder.answer_recovery(&request.id, true).await.unwrap();
    }
    assert!(owner_sees(&cluster, &request.id, |r| r.status == RecoveryStatus::Completed).await);

    // Relays replaying holder 1's approval change nothing
    let approvals = cluster.owner.metrics().clone();
    let event = cluster
        .network
        .published_to("owner", MessageKind::RecoveryResponse)
        .into_iter()
        .find(|delivery| delivery.sender == "holder-1")
        .unwrap();
    assert!(cluster.network.redeliver(&event.event_id));
    assert!(
        wait_until(1000, || {
            let approvals = approvals.clone();
            async move {
                approvals
                    .recovery_responses_total
                    .with_label_values(&["approved"])
                    .get()
                    == 3
            }
        })
        .await
    );

    // A withdrawal after completion is refused
    let err = cluster
        .owner
        .coordinator()
        .respond(&request.id, "holder-1", false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, KeeperError::ApprovalLocked { .. }));

    let request = cluster
        .owner
        .coordinator()
        .get_request(&request.id)
        .await
        .unwrap()
        .unwrap();
    assert_request_status(&request, RecoveryStatus::Completed);
    assert_tallies(&request, 2, 0);
    assert!(cluster.owner.recovery_status(&group.group_id).await.unwrap().can_recover);
    assert_eq!(
        cluster.owner.reconstruct(&request.id).await.unwrap().as_slice(),
        b"frozen"
    );
}
