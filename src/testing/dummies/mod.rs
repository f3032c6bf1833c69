pub mod samples;

pub use samples::{normal_samples, uniform_samples};
