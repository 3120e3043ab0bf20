//! The listening half of the reliable stream protocol.
//!
//! Grounded on `examples/original_source/server.h`/`server.cpp`:
//! `Server::listen`/`accept` drive
//! `CLOSED -> LISTENING -> SYN_RECVED -> PENDING -> OPEN`; everything else
//! is the shared `SocketStream` machinery in [`crate::stream::StreamHandle`].

use crate::clock::Clock;
use crate::error::Error;
use crate::interface::Shared;
use crate::link::ByteLink;
use crate::stream::{StreamHandle, StreamRole};

/// The listening half of a reliable stream.
pub struct Server<L: ByteLink, C: Clock> {
    stream: StreamHandle<L, C>,
}

impl<L: ByteLink, C: Clock> Server<L, C> {
    /// Binds a new `Server` socket on `port`. Returns `None` if the port is
    /// already bound or the interface is at its socket capacity.
    pub fn bind(iface: Shared<L, C>, port: u8) -> Option<Self> {
        StreamHandle::bind(iface, port, StreamRole::Server).map(|stream| Server { stream })
    }

    /// Transitions `CLOSED -> LISTENING`, ready to observe an incoming SYN.
    pub fn listen(&self) {
        let idx = self.stream.handle.idx();
        self.stream.handle.iface.borrow_mut().server_listen(idx);
    }

    /// True once a SYN has arrived and `accept` may be called.
    pub fn connection_pending(&self) -> bool {
        let idx = self.stream.handle.idx();
        self.stream.handle.iface.borrow().server_connection_pending(idx)
    }

    /// Completes the handshake: sends ACK+SYN and waits for the peer's final
    /// ACK. `BAD_STATE` if no SYN is pending; `TIMEOUT` if the final ACK
    /// doesn't arrive in time (the connection reverts to `CLOSED`).
    pub fn accept(&self, timeout_ms: u16) -> Result<(), Error> {
        let idx = self.stream.handle.idx();
        self.stream.handle.iface.borrow_mut().server_accept(idx, timeout_ms)
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        self.stream.read(buf)
    }

    pub fn write(&self, bytes: &[u8]) -> Result<usize, Error> {
        self.stream.write(bytes)
    }

    pub fn connected(&self) -> bool {
        self.stream.connected()
    }

    pub fn closed(&self) -> bool {
        self.stream.closed()
    }

    pub fn disconnect(&self) {
        self.stream.disconnect()
    }

    pub fn get_remote_port(&self) -> u8 {
        self.stream.get_remote_port()
    }

    pub fn get_port(&self) -> u8 {
        self.stream.get_port()
    }
}
