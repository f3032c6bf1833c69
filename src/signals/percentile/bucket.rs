use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Slack applied at bucket edges so that values produced by accumulated
/// rounding still land in the bucket they were predicted for.
pub const FP_TOLERANCE: f64 = 1e-13;

/// One histogram bin: an interval, how many samples fell into it, and when
/// it last received one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    lower: f64,
    upper: f64,
    count: u64,
    last_update: DateTime<Utc>,
}

impl Bucket {
    /// The `index`-th bucket of width `width` counted from `domain_start`.
    pub fn new(domain_start: f64, width: f64, index: usize, now: DateTime<Utc>) -> Self {
        let i = index as f64;
        Self::with_bounds(
            domain_start + width * i,
            domain_start + width * (i + 1.0),
            now,
        )
    }

    pub(crate) fn with_bounds(lower: f64, upper: f64, now: DateTime<Utc>) -> Self {
        Self {
            lower,
            upper,
            count: 0,
            last_update: now,
        }
    }

    #[inline]
    pub fn lower(&self) -> f64 {
        self.lower
    }

    #[inline]
    pub fn upper(&self) -> f64 {
        self.upper
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[inline]
    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    #[inline]
    pub fn mid_value(&self) -> f64 {
        (self.lower + self.upper) / 2.0
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower - FP_TOLERANCE && value <= self.upper + FP_TOLERANCE
    }

    /// Counts `value` if it falls inside this bucket.
    pub fn try_add(&mut self, value: f64, now: DateTime<Utc>) -> bool {
        if !self.contains(value) {
            return false;
        }
        self.count += 1;
        self.last_update = now;
        true
    }

    #[inline]
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.last_update
    }

    pub(crate) fn set_upper(&mut self, upper: f64) {
        self.upper = upper;
    }
}
