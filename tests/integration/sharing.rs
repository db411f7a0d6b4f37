// tests/integration/sharing.rs - Split and combine through the public API

use pretty_assertions::assert_eq;
use sharekeeper::{KeeperError, SecretSharingEngine};

use super::print_test_header;
use crate::helpers::test_data::create_test_shares;

#[test]
fn test_any_threshold_subset_recovers_secret() {
    print_test_header("threshold subsets");

    let shares = create_test_shares(b"hello world", 3, 5);
    let engine = SecretSharingEngine::default();

    let picked = vec![shares[0].clone(), shares[2].clone(), shares[4].clone()];
    assert_eq!(engine.combine(&picked).unwrap().as_slice(), b"hello world");

    let picked = vec![shares[3].clone(), shares[1].clone(), shares[0].clone()];
    assert_eq!(engine.combine(&picked).unwrap().as_slice(), b"hello world");

    assert_eq!(engine.combine(&shares).unwrap().as_slice(), b"hello world");
}

#[test]
fn test_below_threshold_is_insufficient() {
    let shares = create_test_shares(b"hello world", 3, 5);
    let engine = SecretSharingEngine::default();

    let err = engine
        .combine(&[shares[0].clone(), shares[1].clone()])
        .unwrap_err();
    assert!(matches!(
        err,
        KeeperError::InsufficientShares {
            required: 3,
            provided: 2
        }
    ));

    // A repeated share does not count twice
    let err = engine
        .combine(&[shares[0].clone(), shares[0].clone(), shares[1].clone()])
        .unwrap_err();
    assert!(matches!(err, KeeperError::InsufficientShares { provided: 2, .. }));
}

#[test]
fn test_shares_from_different_splits_are_rejected() {
    let first = create_test_shares(b"first secret", 2, 3);
    let second = create_test_shares(b"second secret", 2, 3);
    let engine = SecretSharingEngine::default();

    let err = engine
        .combine(&[first[0].clone(), second[1].clone()])
        .unwrap_err();
    assert!(matches!(err, KeeperError::MismatchedShares { .. }));
}

#[test]
fn test_share_json_survives_transport() {
    let shares = create_test_shares(&[0u8, 0, 7, 255], 2, 2);
    let engine = SecretSharingEngine::default();

    let decoded: Vec<_> = shares
        .iter()
        .map(|s| serde_json::to_string(s).unwrap())
        .map(|json| serde_json::from_str(&json).unwrap())
        .collect();
    assert_eq!(decoded, shares);
    assert_eq!(engine.combine(&decoded).unwrap().as_slice(), &[0u8, 0, 7, 255]);
}

#[test]
fn test_invalid_parameters_rejected_before_splitting() {
    let engine = SecretSharingEngine::default();
    let metadata = crate::helpers::test_data::create_test_metadata("g1");

    assert!(matches!(
        engine.split(b"x", 1, 3, &metadata),
        Err(KeeperError::InvalidThreshold { .. })
    ));
    assert!(matches!(
        engine.split(b"x", 4, 3, &metadata),
        Err(KeeperError::InvalidThreshold { .. })
    ));
    assert!(matches!(
        engine.split(b"x", 2, 256, &metadata),
        Err(KeeperError::InvalidShareCount { .. })
    ));
}
