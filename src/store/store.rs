use std::time::Duration;

/// Key/value blob storage used for checkpointing.
///
/// Implementations decide where and how blobs are kept. `store` is
/// fire-and-forget: it must not block the caller on I/O and reports no
/// errors back. `retrieve` is age gated.
pub trait Store: Send + Sync {
    fn store(&self, name: &str, data: Vec<u8>);

    /// Returns the blob saved under `name`, or `None` when nothing was saved
    /// or the saved copy is older than `max_age`.
    fn retrieve(&self, name: &str, max_age: Duration) -> Option<Vec<u8>>;
}
