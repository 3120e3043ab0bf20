//! The monotonic clock collaborator.
//!
//! Every blocking operation in this crate (`connect`, `accept`, `read`,
//! `write`, `ping`, `get_addr_list`) measures its time budget against a
//! `Clock`. The crate never reads the wall clock itself so it stays usable
//! on targets that only have a millisecond tick counter.

/// A monotonic millisecond clock with a blocking sleep.
pub trait Clock {
    /// Returns a monotonically non-decreasing millisecond timestamp.
    fn millis(&self) -> u64;

    /// Blocks the calling thread for approximately `ms` milliseconds.
    ///
    /// Polling loops in this crate call this with small values (a handful of
    /// milliseconds) between drains of the byte link; implementations are
    /// free to treat `delay(0)` as a no-op yield.
    fn delay(&self, ms: u32);
}
