use crate::error::SignalError;
use crate::signals::percentile::bucket::Bucket;
use crate::signals::percentile::params::PercentileParams;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Checkpoint layout of a histogram estimator. Field order is the wire
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct EstimatorState {
    pub buy_below: f64,
    pub sell_above: f64,
    pub min_data: usize,
    pub target_num_bins: usize,
    pub prune_above_count: usize,
    pub target_age: Duration,
    pub bucket_count: usize,
    pub buckets: Vec<Bucket>,
}

impl EstimatorState {
    pub fn new(params: &PercentileParams, buckets: &[Bucket]) -> Self {
        Self {
            buy_below: params.buy_below,
            sell_above: params.sell_above,
            min_data: params.min_data,
            target_num_bins: params.target_num_bins,
            prune_above_count: params.prune_above_count,
            target_age: params.target_age,
            bucket_count: buckets.len(),
            buckets: buckets.to_vec(),
        }
    }

    pub fn params(&self) -> PercentileParams {
        PercentileParams {
            buy_below: self.buy_below,
            sell_above: self.sell_above,
            min_data: self.min_data,
            target_num_bins: self.target_num_bins,
            prune_above_count: self.prune_above_count,
            target_age: self.target_age,
        }
    }

    /// Checks that the stored buckets still describe one contiguous,
    /// ascending domain.
    pub fn check_buckets(&self) -> Result<(), SignalError> {
        if self.bucket_count != self.buckets.len() {
            return Err(SignalError::InvariantViolation(format!(
                "checkpoint declares {} buckets but holds {}",
                self.bucket_count,
                self.buckets.len()
            )));
        }
        for (i, b) in self.buckets.iter().enumerate() {
            if !(b.lower() < b.upper()) {
                return Err(SignalError::InvariantViolation(format!(
                    "checkpoint bucket {i} is empty: [{}, {}]",
                    b.lower(),
                    b.upper()
                )));
            }
        }
        for (i, pair) in self.buckets.windows(2).enumerate() {
            if pair[0].upper() != pair[1].lower() {
                return Err(SignalError::InvariantViolation(format!(
                    "checkpoint buckets {i} and {} are not contiguous: {} != {}",
                    i + 1,
                    pair[0].upper(),
                    pair[1].lower()
                )));
            }
        }
        Ok(())
    }
}
