//! Prime field moduli: generation, verification and hex encoding

use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::Rng;

use crate::error::{KeeperError, Result};

/// Miller-Rabin rounds used when generating and verifying moduli.
/// Error probability per composite is at most 4^-rounds.
const MILLER_RABIN_ROUNDS: usize = 40;

/// Odd primes below 256, used for trial division before Miller-Rabin.
const SMALL_PRIMES: [u32; 53] = [
    3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
    101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191, 193,
    197, 199, 211, 223, 227, 229, 233, 239, 241, 251,
];

/// Prime p defining GF(p) for one split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldModulus(BigUint);

impl FieldModulus {
    /// Draws a fresh random prime strictly greater than `floor` and at least `min_bits` wide.
    ///
    /// A new prime per split keeps shares from different splits from ever sharing a field.
    pub fn generate_above<R: Rng + ?Sized>(floor: &BigUint, min_bits: u64, rng: &mut R) -> Self {
        let bits = std::cmp::max(min_bits.max(8), floor.bits() + 1);
        let top = BigUint::one() << (bits - 1);

        loop {
            let mut candidate = rng.gen_biguint(bits);
            candidate |= &top;
            candidate |= BigUint::one();

            if candidate > *floor && is_probable_prime(&candidate, MILLER_RABIN_ROUNDS, rng) {
                return Self(candidate);
            }
        }
    }

    /// # Errors
    /// Returns [`KeeperError::Encoding`] if `encoded` is not a hex string
    pub fn from_hex(encoded: &str) -> Result<Self> {
        decode_element(encoded).map(Self)
    }

    pub fn to_hex(&self) -> String {
        encode_element(&self.0)
    }

    pub fn value(&self) -> &BigUint {
        &self.0
    }

    pub fn bits(&self) -> u64 {
        self.0.bits()
    }

    /// Rejects moduli that are composite or wider than `max_bits`.
    ///
    /// # Errors
    /// Returns [`KeeperError::InvalidModulus`] naming the failed check
    pub fn verify(&self, max_bits: u64) -> Result<()> {
        if self.bits() > max_bits {
            return Err(KeeperError::InvalidModulus {
                reason: format!(
                    "modulus is {} bits wide, larger than the {} bit limit",
                    self.bits(),
                    max_bits
                ),
            });
        }

        let mut rng = rand::thread_rng();
        if !is_probable_prime(&self.0, MILLER_RABIN_ROUNDS, &mut rng) {
            return Err(KeeperError::InvalidModulus {
                reason: "modulus is not prime".to_string(),
            });
        }

        Ok(())
    }

    /// Fails unless every value lies strictly below the modulus.
    pub fn check_exceeds<'a>(&self, values: impl IntoIterator<Item = &'a BigUint>) -> Result<()> {
        if let Some(largest) = values.into_iter().max() {
            if *largest >= self.0 {
                return Err(KeeperError::InvalidModulus {
                    reason: "modulus does not exceed the largest share value".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Encodes a field element as lowercase hex.
pub fn encode_element(value: &BigUint) -> String {
    value.to_str_radix(16)
}

/// # Errors
/// Returns [`KeeperError::Encoding`] if `encoded` is empty or not hex
pub fn decode_element(encoded: &str) -> Result<BigUint> {
    let trimmed = encoded.trim();
    if trimmed.is_empty() {
        return Err(KeeperError::Encoding("empty field element".to_string()));
    }
    BigUint::parse_bytes(trimmed.as_bytes(), 16)
        .ok_or_else(|| KeeperError::Encoding(format!("'{trimmed}' is not a hex field element")))
}

/// Probabilistic primality test: trial division then Miller-Rabin with random bases.
pub fn is_probable_prime<R: Rng + ?Sized>(n: &BigUint, rounds: usize, rng: &mut R) -> bool {
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }
    if *n == two {
        return true;
    }
    if (n % 2u32).is_zero() {
        return false;
    }

    for p in SMALL_PRIMES {
        let p = BigUint::from(p);
        if *n == p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = (&x * &x) % n;
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }

    true
}
