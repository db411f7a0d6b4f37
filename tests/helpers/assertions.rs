// tests/helpers/assertions.rs - Custom test assertions

use sharekeeper::{RecoveryRequest, RecoveryStatus, Share};

/// Assert that two shares carry the same point and parameters (ignoring receipt fields)
pub fn assert_shares_equivalent(actual: &Share, expected: &Share) {
    assert_eq!(actual.value, expected.value);
    assert_eq!(actual.index, expected.index);
    assert_eq!(actual.threshold, expected.threshold);
    assert_eq!(actual.total_shares, expected.total_shares);
    assert_eq!(actual.field_modulus, expected.field_modulus);
    assert_eq!(actual.group_id, expected.group_id);
    assert_eq!(actual.creator_identity, expected.creator_identity);
}

/// Assert that a recovery request is in the expected status
pub fn assert_request_status(request: &RecoveryRequest, expected: RecoveryStatus) {
    assert_eq!(
        request.status, expected,
        "Request {} should be {:?}, but was {:?}",
        request.id, expected, request.status
    );
}

/// Assert the approval and denial tallies of a request
pub fn assert_tallies(request: &RecoveryRequest, approved: usize, denied: usize) {
    assert_eq!(
        (request.approved_count(), request.denied_count()),
        (approved, denied),
        "Request {} tallies (approved, denied)",
        request.id
    );
}
