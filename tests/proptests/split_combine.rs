//! Property tests for split/combine workflows

use std::collections::HashSet;

use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;
use sharekeeper::{KeeperError, SecretSharingEngine, ShareMetadata};

/// Secrets of 0 to 32 bytes, leading zeros included
#[derive(Clone, Debug)]
struct Secret(Vec<u8>);

impl Arbitrary for Secret {
    fn arbitrary(g: &mut Gen) -> Self {
        let len = usize::arbitrary(g) % 33;
        Secret((0..len).map(|_| u8::arbitrary(g)).collect())
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        Box::new(self.0.shrink().map(Secret))
    }
}

/// Threshold and share count pairs with 2 <= threshold <= count <= 10
#[derive(Clone, Copy, Debug)]
struct Params {
    threshold: usize,
    count: usize,
}

impl Arbitrary for Params {
    fn arbitrary(g: &mut Gen) -> Self {
        let count = usize::arbitrary(g) % 9 + 2;
        let threshold = usize::arbitrary(g) % (count - 1) + 2;
        Params { threshold, count }
    }
}

fn metadata() -> ShareMetadata {
    ShareMetadata {
        creator_identity: "owner".to_string(),
        group_id: "prop".to_string(),
        group_label: "Property".to_string(),
        peers: Vec::new(),
    }
}

/// Picks `take` distinct positions out of `0..count`, driven by `seed`
fn select(count: usize, take: usize, mut seed: u64) -> Vec<usize> {
    let mut positions: Vec<usize> = (0..count).collect();
    for i in (1..positions.len()).rev() {
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let j = (seed >> 33) as usize % (i + 1);
        positions.swap(i, j);
    }
    positions.truncate(take);
    positions
}

#[quickcheck]
fn prop_threshold_subset_recovers_secret(secret: Secret, params: Params, seed: u64) -> bool {
    let engine = SecretSharingEngine::default();
    let Ok(shares) = engine.split(&secret.0, params.threshold, params.count, &metadata()) else {
        return false;
    };

    let extra = (seed % (params.count - params.threshold + 1) as u64) as usize;
    let picked: Vec<_> = select(params.count, params.threshold + extra, seed)
        .into_iter()
        .map(|i| shares[i].clone())
        .collect();

    matches!(engine.combine(&picked), Ok(recovered) if recovered.as_slice() == secret.0.as_slice())
}

#[quickcheck]
fn prop_fewer_than_threshold_is_insufficient(secret: Secret, params: Params, seed: u64) -> bool {
    let engine = SecretSharingEngine::default();
    let Ok(shares) = engine.split(&secret.0, params.threshold, params.count, &metadata()) else {
        return false;
    };

    let picked: Vec<_> = select(params.count, params.threshold - 1, seed)
        .into_iter()
        .map(|i| shares[i].clone())
        .collect();

    matches!(
        engine.combine(&picked),
        Err(KeeperError::InsufficientShares { required, provided })
            if required == params.threshold && provided == params.threshold - 1
    )
}

#[quickcheck]
fn prop_shares_are_distinct_and_consistent(secret: Secret, params: Params) -> bool {
    let engine = SecretSharingEngine::default();
    let Ok(shares) = engine.split(&secret.0, params.threshold, params.count, &metadata()) else {
        return false;
    };

    let values: HashSet<&str> = shares.iter().map(|s| s.value.as_str()).collect();
    let indices: Vec<usize> = shares.iter().map(|s| s.index).collect();

    values.len() == params.count
        && indices == (0..params.count).collect::<Vec<_>>()
        && shares
            .iter()
            .all(|s| s.parameters() == shares[0].parameters())
}
