//! Error types shared by every blocking operation in the crate.
//!
//! These map 1:1 onto the negative integer codes from the original protocol
//! (`NONE`, `TIMEOUT`, `BAD_STATE`, `ACK_OUT_OF_SEQUENCE`) so callers that
//! want the legacy numeric codes can still get them via `From<Error> for i32`,
//! while call sites in this crate use `Result` and `?` throughout.

use failure::Fail;

/// Failure modes of a blocking PicoLAN operation.
///
/// Wire-level failures (bad checksum, unknown packet id, oversized body) are
/// never surfaced here — the codec drops those silently and logs them, per
/// the protocol's error model. `Error` only covers local precondition
/// failures and protocol-level disagreements with a peer.
#[derive(Debug, Fail, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No response arrived within the operation's time budget.
    #[fail(display = "operation timed out")]
    Timeout,

    /// The socket/connection was not in a state that allows this operation.
    #[fail(display = "socket is in an incompatible state for this operation")]
    BadState,

    /// A peer's cumulative ACK named a sequence number outside the
    /// outstanding burst window. Unrecoverable at the application layer.
    #[fail(display = "peer acknowledged a sequence number outside the outstanding window")]
    AckOutOfSequence,
}

/// Maps an `Error` back onto the legacy negative integer codes
/// (`TIMEOUT=-1, BAD_STATE=-2, ACK_OUT_OF_SEQUENCE=-3`).
impl From<Error> for i32 {
    fn from(err: Error) -> i32 {
        match err {
            Error::Timeout => -1,
            Error::BadState => -2,
            Error::AckOutOfSequence => -3,
        }
    }
}

/// The success code of the legacy numeric error model.
pub const NONE: i32 = 0;
