//! The reliable-stream sub-protocol shared by `Client` and `Server`.
//!
//! Grounded on `examples/original_source/socket_stream.cpp`,
//! `client.cpp` and `server.cpp`: the SYN/ACK/DATA/CLOSE state machine,
//! burst-based sending with cumulative ACKs, and sequence arithmetic. The
//! burst sender here tracks each outstanding frame's sequence number
//! alongside its byte position in the write buffer, so a partial ACK resumes
//! from exactly the right offset, and resets its dead-burst counter on any
//! burst that makes progress, so disconnection only follows three
//! *consecutive* dead bursts rather than three over the lifetime of one
//! `write` call; see `DESIGN.md` for why this departs from the original.

use crate::clock::Clock;
use crate::codec::MAX_PACKET_LENGTH;
use crate::error::Error;
use crate::interface::Shared;
use crate::link::ByteLink;
use crate::socket::SocketHandle;

/// Bytes of application data carried per DATA frame.
///
/// `MAX_PACKET_LENGTH - 12`: 6 bytes of frame overhead (start/id/size/check1/
/// check2/end) + 4 bytes of datagram header (ttl/src/dst/port) + 1 length
/// byte + 1 stream message-type byte, leaving room for the sequence byte and
/// the data itself within the 54-byte datagram payload cap.
pub const BYTES_PER_FRAME: usize = MAX_PACKET_LENGTH - 12;

/// Number of DATA frames sent back-to-back before waiting for a cumulative ACK.
pub const BURST: usize = 4;

/// The SYN/ACK/DATA/CLOSE message types, carried as the first byte or two of
/// a Datagram payload when that datagram belongs to a stream connection.
pub mod message {
    pub const ACK: u8 = 0;
    pub const SYN: u8 = 1;
    pub const DATA: u8 = 2;
    pub const CLOSE: u8 = 3;
}

/// Connection states for both halves of the handshake.
///
/// Client path: `Closed -> SynSent -> SynRecved -> Open -> Closed`.
/// Server path: `Closed -> Listening -> SynRecved -> Pending -> Open -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    SynSent,
    Listening,
    SynRecved,
    Pending,
    Open,
}

/// Which half of the handshake a stream socket plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    Client,
    Server,
}

/// Per-connection state layered on top of the base `Socket` fields.
#[derive(Debug, Clone)]
pub struct StreamState {
    pub role: StreamRole,
    pub state: ConnectionState,
    pub sequence_number: u8,
    pub remote_sequence: u8,
    pub remote_port: u8,
    pub last_recved_ack: u8,
    pub zero_read_count: u8,
}

impl StreamState {
    pub fn new(role: StreamRole) -> Self {
        let state = match role {
            StreamRole::Client => ConnectionState::Closed,
            StreamRole::Server => ConnectionState::Closed,
        };
        StreamState {
            role,
            state,
            sequence_number: 1,
            remote_sequence: 0,
            remote_port: 0,
            last_recved_ack: 0,
            zero_read_count: 0,
        }
    }
}

/// One outstanding DATA frame's sequence number and the byte position in the
/// write buffer immediately after it, used to resume from a partial ACK.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FramePosition {
    pub seq: Option<u8>,
    pub pos: usize,
}

impl FramePosition {
    pub const EMPTY: FramePosition = FramePosition { seq: None, pos: 0 };
}

/// Translates an `Error` into the legacy result shape used by
/// `SocketStream::write`/`read` (a positive byte count or a negative code).
pub fn result_to_legacy(result: &Result<usize, Error>) -> i32 {
    match result {
        Ok(n) => *n as i32,
        Err(err) => (*err).into(),
    }
}

/// The operations shared by `Client` and `Server` once a connection exists:
/// reading, writing, querying connection state, and disconnecting.
///
/// Mirrors `examples/original_source/socket_stream.h`'s `SocketStream` base
/// class, expressed as composition (a field both `Client` and `Server` hold)
/// rather than inheritance.
pub(crate) struct StreamHandle<L: ByteLink, C: Clock> {
    pub(crate) handle: SocketHandle<L, C>,
}

impl<L: ByteLink, C: Clock> StreamHandle<L, C> {
    pub(crate) fn bind(iface: Shared<L, C>, port: u8, role: StreamRole) -> Option<Self> {
        let kind = crate::interface::SocketKind::Stream(StreamState::new(role));
        SocketHandle::bind(iface, port, kind).map(|handle| StreamHandle { handle })
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let idx = self.handle.idx();
        self.handle.iface.borrow_mut().stream_read(idx, buf)
    }

    pub fn write(&self, bytes: &[u8]) -> Result<usize, Error> {
        let idx = self.handle.idx();
        self.handle.iface.borrow_mut().stream_write(idx, bytes)
    }

    pub fn connected(&self) -> bool {
        let idx = self.handle.idx();
        self.handle.iface.borrow().connection_state(idx) == ConnectionState::Open
    }

    pub fn closed(&self) -> bool {
        let idx = self.handle.idx();
        self.handle.iface.borrow().connection_state(idx) == ConnectionState::Closed
    }

    pub fn disconnect(&self) {
        let idx = self.handle.idx();
        self.handle.iface.borrow_mut().stream_disconnect(idx);
    }

    pub fn get_remote_port(&self) -> u8 {
        let idx = self.handle.idx();
        self.handle.iface.borrow().stream_remote_port(idx)
    }

    pub fn get_port(&self) -> u8 {
        self.handle.get_port()
    }
}
