pub mod percentile;
mod signal;

pub use percentile::{Bucket, HistogramEstimator, PercentileParams, Phase};
pub use signal::Signal;
