pub mod buffers;
pub mod error;
pub mod signals;
pub mod store;
pub mod utils;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::SignalError;
