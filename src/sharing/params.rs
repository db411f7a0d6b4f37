//! Validated split parameters

use crate::error::{KeeperError, Result};

/// Minimum shares required for reconstruction (2..=255)
///
/// A threshold of 1 would let any single key holder recover the secret alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Threshold(usize);

impl Threshold {
    pub const MIN: usize = 2;

    /// # Errors
    /// Returns [`KeeperError::InvalidThreshold`] if `value` is outside `2..=255`
    pub fn new(value: usize) -> Result<Self> {
        if !(Self::MIN..=ShareCount::MAX).contains(&value) {
            return Err(KeeperError::InvalidThreshold {
                threshold: value,
                min: Self::MIN,
                max: ShareCount::MAX,
            });
        }
        Ok(Self(value))
    }
}

impl std::ops::Deref for Threshold {
    type Target = usize;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Number of shares to create (2..=255)
///
/// Evaluation points run from 1 to the share count, so the count also bounds
/// the largest x coordinate used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ShareCount(usize);

impl ShareCount {
    pub const MIN: usize = 2;
    pub const MAX: usize = 255;

    /// # Errors
    /// Returns [`KeeperError::InvalidShareCount`] if `value` is outside `2..=255`
    pub fn new(value: usize) -> Result<Self> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(KeeperError::InvalidShareCount {
                count: value,
                min: Self::MIN,
                max: Self::MAX,
            });
        }
        Ok(Self(value))
    }
}

impl std::ops::Deref for ShareCount {
    type Target = usize;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Validated pair of threshold and share count
///
/// Enforces `threshold <= share_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitConfig {
    threshold: Threshold,
    share_count: ShareCount,
}

impl SplitConfig {
    /// # Errors
    /// Returns an error if threshold exceeds share count
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sharekeeper::sharing::{ShareCount, SplitConfig, Threshold};
    ///
    /// let config = SplitConfig::new(
    ///     Threshold::new(3).unwrap(),
    ///     ShareCount::new(5).unwrap(),
    /// ).unwrap();
    /// assert_eq!(*config.threshold(), 3);
    ///
    /// assert!(SplitConfig::new(Threshold::new(5).unwrap(), ShareCount::new(3).unwrap()).is_err());
    /// ```
    pub fn new(threshold: Threshold, share_count: ShareCount) -> Result<Self> {
        if *threshold > *share_count {
            return Err(KeeperError::InvalidThreshold {
                threshold: *threshold,
                min: Threshold::MIN,
                max: *share_count,
            });
        }
        Ok(Self {
            threshold,
            share_count,
        })
    }

    pub fn from_counts(threshold: usize, share_count: usize) -> Result<Self> {
        let share_count = ShareCount::new(share_count)?;
        let threshold = Threshold::new(threshold).map_err(|_| KeeperError::InvalidThreshold {
            threshold,
            min: Threshold::MIN,
            max: *share_count,
        })?;
        Self::new(threshold, share_count)
    }

    #[must_use]
    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    #[must_use]
    pub fn share_count(&self) -> ShareCount {
        self.share_count
    }
}
