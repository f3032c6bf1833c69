use crate::error::SignalError;
use schemars::{JsonSchema, Schema, schema_for};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_buy_below() -> f64 {
    0.25
}
fn default_sell_above() -> f64 {
    0.75
}
fn default_min_data() -> usize {
    1000
}
fn default_target_num_bins() -> usize {
    1000
}
fn default_prune_above_count() -> usize {
    2000
}
fn default_target_age() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PercentileParams {
    #[serde(default = "default_buy_below")]
    #[schemars(
        title = "Buy below",
        description = "Raise the buy signal when the percentile rank is below this (0–1).",
        range(min = 0.0, max = 1.0),
        default = "default_buy_below"
    )]
    pub buy_below: f64,

    #[serde(default = "default_sell_above")]
    #[schemars(
        title = "Sell above",
        description = "Raise the sell signal when the percentile rank is above this (0–1).",
        range(min = 0.0, max = 1.0),
        default = "default_sell_above"
    )]
    pub sell_above: f64,

    #[serde(default = "default_min_data")]
    #[schemars(
        title = "Minimum data",
        description = "Samples buffered before the histogram is built.",
        default = "default_min_data"
    )]
    pub min_data: usize,

    #[serde(default = "default_target_num_bins")]
    #[schemars(
        title = "Target number of bins",
        description = "Buckets allocated when the histogram is first built.",
        default = "default_target_num_bins"
    )]
    pub target_num_bins: usize,

    #[serde(default = "default_prune_above_count")]
    #[schemars(
        title = "Prune above count",
        description = "Stale edge buckets are pruned once the histogram grows past this many buckets.",
        default = "default_prune_above_count"
    )]
    pub prune_above_count: usize,

    #[serde(default = "default_target_age")]
    #[schemars(
        title = "Target age",
        description = "Buckets untouched for longer than this are considered stale.",
        default = "default_target_age"
    )]
    pub target_age: Duration,
}

impl Default for PercentileParams {
    fn default() -> Self {
        Self {
            buy_below: default_buy_below(),
            sell_above: default_sell_above(),
            min_data: default_min_data(),
            target_num_bins: default_target_num_bins(),
            prune_above_count: default_prune_above_count(),
            target_age: default_target_age(),
        }
    }
}

impl PercentileParams {
    /// `buy_below` and `sell_above` are deliberately left unchecked against
    /// each other.
    pub fn validate(&self) -> Result<(), SignalError> {
        if self.target_age.is_zero() {
            return Err(SignalError::Config("target age is zero".into()));
        }
        if chrono::TimeDelta::from_std(self.target_age).is_err() {
            return Err(SignalError::Config(format!(
                "target age {:?} is out of range",
                self.target_age
            )));
        }
        if self.min_data == 0 {
            return Err(SignalError::Config("min_data must be >= 1".into()));
        }
        if self.target_num_bins == 0 {
            return Err(SignalError::Config("target_num_bins must be >= 1".into()));
        }
        Ok(())
    }

    pub fn schema() -> Schema {
        schema_for!(PercentileParams)
    }
}
