//! Threshold secret sharing over a prime field
//!
//! A secret is encoded as an integer `S`, a fresh prime `p > S` is drawn and
//! a random polynomial `f` of degree `t - 1` with `f(0) = S` is evaluated at
//! `x = 1..=n`. Any `t` of the resulting points recover `S` by Lagrange
//! interpolation at zero; fewer reveal nothing about it.
//!
//! Every share carries the threshold, share count and modulus of its split,
//! and [`SecretSharingEngine::combine`] only ever reads those parameters from
//! the shares themselves.
//!
//! ```rust
//! use sharekeeper::share::ShareMetadata;
//! use sharekeeper::sharing::SecretSharingEngine;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SecretSharingEngine::default();
//! let shares = engine.split(b"hello world", 3, 5, &ShareMetadata::default())?;
//!
//! let subset = [shares[0].clone(), shares[2].clone(), shares[4].clone()];
//! let secret = engine.combine(&subset)?;
//! assert_eq!(&secret[..], b"hello world");
//!
//! assert!(engine.combine(&shares[..2]).is_err());
//! # Ok(())
//! # }
//! ```

mod field;
mod params;

pub use field::{decode_element, encode_element, is_probable_prime, FieldModulus};
pub use params::{ShareCount, SplitConfig, Threshold};

use chrono::Utc;
use num_bigint::{BigUint, RandBigInt};
use num_traits::Zero;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::debug;
use zeroize::Zeroizing;

use crate::config::SharingConfig;
use crate::error::{KeeperError, Result};
use crate::share::{Share, ShareMetadata};

/// Prefix byte that keeps leading zero bytes (and the empty secret) representable.
const SECRET_MARKER: u8 = 0x01;

/// Stateless split/combine engine; the configuration only bounds sizes.
#[derive(Debug, Clone)]
pub struct SecretSharingEngine {
    min_field_bits: u64,
    max_secret_bytes: usize,
}

impl Default for SecretSharingEngine {
    fn default() -> Self {
        Self::new(&SharingConfig::default())
    }
}

impl SecretSharingEngine {
    pub fn new(config: &SharingConfig) -> Self {
        Self {
            min_field_bits: config.min_field_bits,
            max_secret_bytes: config.max_secret_bytes,
        }
    }

    /// Widest modulus this engine could have produced; anything wider is refused at combine.
    pub fn max_modulus_bits(&self) -> u64 {
        let secret_bits = (self.max_secret_bytes as u64 + 1) * 8 + 1;
        std::cmp::max(self.min_field_bits, secret_bits)
    }

    /// Splits `secret` into `total_shares` shares, any `threshold` of which recover it.
    ///
    /// # Errors
    /// Returns an error if the parameters are out of range or the secret is too large
    pub fn split(
        &self,
        secret: &[u8],
        threshold: usize,
        total_shares: usize,
        metadata: &ShareMetadata,
    ) -> Result<Vec<Share>> {
        let config = SplitConfig::from_counts(threshold, total_shares)?;
        self.split_with(secret, config, metadata)
    }

    /// # Errors
    /// Returns [`KeeperError::SecretTooLarge`] if the secret exceeds the configured size
    pub fn split_with(
        &self,
        secret: &[u8],
        config: SplitConfig,
        metadata: &ShareMetadata,
    ) -> Result<Vec<Share>> {
        if secret.len() > self.max_secret_bytes {
            return Err(KeeperError::SecretTooLarge {
                size: secret.len(),
                max: self.max_secret_bytes,
            });
        }

        let threshold = *config.threshold();
        let total_shares = *config.share_count();

        let encoded = encode_secret(secret);
        let mut rng = rand::thread_rng();
        let modulus = FieldModulus::generate_above(&encoded, self.min_field_bits, &mut rng);
        let p = modulus.value();

        // f(x) = S + c1 x + ... + c(t-1) x^(t-1)
        let mut coefficients = Vec::with_capacity(threshold);
        coefficients.push(encoded);
        for _ in 1..threshold {
            coefficients.push(rng.gen_biguint_below(p));
        }

        let field_modulus = modulus.to_hex();
        let created_at = Utc::now();
        let shares: Vec<Share> = (0..total_shares)
            .map(|index| {
                let x = BigUint::from(index as u64 + 1);
                Share {
                    value: encode_element(&evaluate(&coefficients, &x, p)),
                    threshold,
                    total_shares,
                    index,
                    field_modulus: field_modulus.clone(),
                    creator_identity: metadata.creator_identity.clone(),
                    created_at,
                    group_id: metadata.group_id.clone(),
                    group_label: metadata.group_label.clone(),
                    peers: metadata.peers.clone(),
                    recipient_identity: None,
                    received: false,
                    received_at: None,
                    distribution_event_id: None,
                }
            })
            .collect();

        debug!(
            group_id = %metadata.group_id,
            threshold = threshold,
            total_shares = total_shares,
            modulus_bits = modulus.bits(),
            "Split secret into shares"
        );

        Ok(shares)
    }

    /// Reconstructs the secret from at least `threshold` shares of one split.
    ///
    /// # Errors
    /// - [`KeeperError::MismatchedShares`] if the shares disagree on threshold,
    ///   share count or modulus, or two shares claim the same index
    /// - [`KeeperError::InsufficientShares`] if fewer distinct shares than the
    ///   carried threshold are supplied
    /// - [`KeeperError::InvalidModulus`] if the modulus is not prime or does
    ///   not exceed every share value
    pub fn combine(&self, shares: &[Share]) -> Result<Zeroizing<Vec<u8>>> {
        let first = shares.first().ok_or(KeeperError::InsufficientShares {
            required: Threshold::MIN,
            provided: 0,
        })?;

        let threshold = first.threshold;
        let total_shares = first.total_shares;
        let modulus = FieldModulus::from_hex(&first.field_modulus)?;

        for (position, share) in shares.iter().enumerate().skip(1) {
            if share.threshold != threshold {
                return Err(mismatch(format!(
                    "share #{} has threshold {}, expected {}",
                    position + 1,
                    share.threshold,
                    threshold
                )));
            }
            if share.total_shares != total_shares {
                return Err(mismatch(format!(
                    "share #{} has total share count {}, expected {}",
                    position + 1,
                    share.total_shares,
                    total_shares
                )));
            }
            if FieldModulus::from_hex(&share.field_modulus)? != modulus {
                return Err(mismatch(format!(
                    "share #{} was produced over a different field modulus",
                    position + 1
                )));
            }
        }

        SplitConfig::from_counts(threshold, total_shares)?;

        let mut points: BTreeMap<usize, BigUint> = BTreeMap::new();
        for share in shares {
            if share.index >= total_shares {
                return Err(mismatch(format!(
                    "share index {} is out of range for {} shares",
                    share.index, total_shares
                )));
            }
            let value = decode_element(&share.value)?;
            match points.entry(share.index) {
                Entry::Occupied(existing) => {
                    if *existing.get() != value {
                        return Err(mismatch(format!(
                            "two different shares claim index {}",
                            share.index
                        )));
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(value);
                }
            }
        }

        if points.len() < threshold {
            return Err(KeeperError::InsufficientShares {
                required: threshold,
                provided: points.len(),
            });
        }

        modulus.check_exceeds(points.values())?;
        modulus.verify(self.max_modulus_bits())?;

        let secret = interpolate_at_zero(&points, modulus.value());
        decode_secret(&secret)
    }
}

fn mismatch(reason: String) -> KeeperError {
    KeeperError::MismatchedShares { reason }
}

fn encode_secret(secret: &[u8]) -> BigUint {
    let mut buffer = Zeroizing::new(Vec::with_capacity(secret.len() + 1));
    buffer.push(SECRET_MARKER);
    buffer.extend_from_slice(secret);
    BigUint::from_bytes_be(&buffer)
}

fn decode_secret(value: &BigUint) -> Result<Zeroizing<Vec<u8>>> {
    let bytes = Zeroizing::new(value.to_bytes_be());
    match bytes.split_first() {
        Some((&SECRET_MARKER, rest)) => Ok(Zeroizing::new(rest.to_vec())),
        _ => Err(KeeperError::Encoding(
            "reconstructed value is not an encoded secret".to_string(),
        )),
    }
}

/// Horner evaluation of the polynomial at `x` mod `p`.
fn evaluate(coefficients: &[BigUint], x: &BigUint, p: &BigUint) -> BigUint {
    coefficients
        .iter()
        .rev()
        .fold(BigUint::zero(), |acc, coefficient| (acc * x + coefficient) % p)
}

/// Lagrange interpolation of f(0) from points keyed by share index (x = index + 1).
fn interpolate_at_zero(points: &BTreeMap<usize, BigUint>, p: &BigUint) -> BigUint {
    let exponent = p - 2u32;
    let xs: Vec<BigUint> = points.keys().map(|i| BigUint::from(*i as u64 + 1)).collect();

    let mut sum = BigUint::zero();
    for (j, y) in points.values().enumerate() {
        let mut numerator = BigUint::from(1u32);
        let mut denominator = BigUint::from(1u32);
        for (m, x_m) in xs.iter().enumerate() {
            if m == j {
                continue;
            }
            numerator = (numerator * x_m) % p;
            // x_m - x_j, lifted into [0, p)
            let difference = (x_m + p - &xs[j]) % p;
            denominator = (denominator * difference) % p;
        }
        let inverse = denominator.modpow(&exponent, p);
        sum = (sum + y * numerator % p * inverse) % p;
    }
    sum
}
