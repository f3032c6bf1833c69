use crate::error::SignalError;

/// A model fed one observation at a time that raises buy/sell flags.
///
/// Flags reflect the most recent observation only; they are recomputed on
/// every call to [`observe`](Signal::observe).
pub trait Signal {
    fn observe(&mut self, value: f64) -> Result<(), SignalError>;

    fn sig_buy(&self) -> bool;

    fn sig_sell(&self) -> bool;
}
