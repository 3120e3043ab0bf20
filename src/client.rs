//! The connecting half of the reliable stream protocol.
//!
//! Grounded on `examples/original_source/client.h`/`client.cpp`:
//! `Client::connect` drives `CLOSED -> SYN_SENT -> SYN_RECVED -> OPEN`, then
//! every other operation (`read`/`write`/`connected`/`disconnect`) is the
//! shared `SocketStream` machinery in [`crate::stream::StreamHandle`].

use crate::clock::Clock;
use crate::error::Error;
use crate::interface::Shared;
use crate::link::ByteLink;
use crate::stream::{StreamHandle, StreamRole};

/// The connecting half of a reliable stream.
pub struct Client<L: ByteLink, C: Clock> {
    stream: StreamHandle<L, C>,
}

impl<L: ByteLink, C: Clock> Client<L, C> {
    /// Binds a new `Client` socket on `port`. Returns `None` if the port is
    /// already bound or the interface is at its socket capacity.
    pub fn bind(iface: Shared<L, C>, port: u8) -> Option<Self> {
        StreamHandle::bind(iface, port, StreamRole::Client).map(|stream| Client { stream })
    }

    /// Connects to `port` on node `dst`. `BAD_STATE` if already connecting
    /// or connected; `TIMEOUT` if the peer's SYN doesn't arrive in time.
    pub fn connect(&self, dst: u8, port: u8, timeout_ms: u16) -> Result<(), Error> {
        let idx = self.stream.handle.idx();
        self.stream
            .handle
            .iface
            .borrow_mut()
            .client_connect(idx, dst, port, timeout_ms)
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
