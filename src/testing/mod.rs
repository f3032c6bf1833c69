pub mod dummies;
pub mod stubs;

pub use dummies::{normal_samples, uniform_samples};
pub use stubs::{ManualClock, MemoryStore};
