//! The byte transport collaborator.
//!
//! `ByteLink` is the only thing the codec and interface layer know about the
//! underlying UART. It is intentionally minimal: FIFO byte ordering is the
//! only guarantee the parser relies on, independent of baud rate or framing
//! at the hardware level.

/// A full-duplex byte-oriented transport, such as a UART.
pub trait ByteLink {
    /// Returns true if at least one byte can be read with `get()`.
    ///
    /// There is no requirement to call this before `get()` — it exists so
    /// callers can drain without blocking.
    fn available(&mut self) -> bool;

    /// Reads the next byte from the input stream.
    ///
    /// Only called when `available()` has returned true.
    fn get(&mut self) -> u8;

    /// Writes one byte to the output stream.
    fn put(&mut self, byte: u8);

    /// Flushes any buffered output bytes.
    fn flush(&mut self);
}
