mod bucket;
mod histogram_estimator;
mod params;
mod state;

pub use bucket::{Bucket, FP_TOLERANCE};
pub use histogram_estimator::{HistogramEstimator, Phase};
pub use params::PercentileParams;
