//! The Interface layer: socket binding, inbound dispatch, address discovery
//! and ping.
//!
//! Grounded on `examples/original_source/socket.cpp`/`picolan.h`'s
//! `Interface` class (`bind`/`unbind`/`datagram_pack_handler`/`get_addr_list`/
//! `ping`), reshaped to own every bound socket's state directly in a `Vec`
//! keyed by port rather than by raw back-pointer — `Socket`/`Datagram`/
//! `Client`/`Server` hold a shared handle back to this struct (see
//! `socket.rs`) instead of the reverse.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, trace};

use crate::addr::{AddressField, BROADCAST_ADDR, MULTICAST_ADDR};
use crate::clock::Clock;
use crate::codec::{self, Packet};
use crate::containers::{BoundedList, RingBuffer};
use crate::error::Error;
use crate::link::ByteLink;
use crate::stream::{message, ConnectionState, FramePosition, StreamRole, StreamState, BURST, BYTES_PER_FRAME};

/// Default TTL stamped on every packet this crate originates.
pub const DEFAULT_TTL: u8 = 6;

/// Maximum number of sockets an Interface may have bound at once.
pub const MAX_SOCKETS: usize = 16;

/// Default per-socket read/write timeout, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u16 = 1000;

/// Default inbound ring buffer capacity for a bound socket.
const DEFAULT_RING_CAPACITY: usize = 256;

pub(crate) enum SocketKind {
    Datagram,
    Stream(StreamState),
}

pub(crate) struct SocketSlot {
    pub port: u8,
    pub remote: u8,
    pub timeout_ms: u16,
    pub ring: RingBuffer<u8>,
    pub kind: SocketKind,
}

/// Builds an [`Interface`] before it starts driving a [`ByteLink`].
///
/// A configure-then-construct builder: the node address is fixed up front
/// and validated to be neither the multicast nor the broadcast reserved
/// value, and the default per-socket timeout newly bound sockets inherit is
/// set, before an `Interface` can be built.
pub struct InterfaceBuilder {
    address: u8,
    default_timeout_ms: u16,
}

impl InterfaceBuilder {
    pub fn new(address: u8) -> Self {
        InterfaceBuilder {
            address,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Sets the timeout newly bound sockets start with; callers can still
    /// override it per-socket afterwards via `set_timeout`.
    pub fn default_timeout_ms(mut self, timeout_ms: u16) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    pub fn build<L: ByteLink, C: Clock>(self, link: L, clock: C) -> Result<Interface<L, C>, Error> {
        if self.address == MULTICAST_ADDR || self.address == BROADCAST_ADDR {
            return Err(Error::BadState);
        }
        Ok(Interface {
            link,
            clock,
            address: self.address,
            addr_field: AddressField::new(),
            addr_list_recved: false,
            ping_echo_payload: 0,
            parser: codec::Parser::new(),
            sockets: Vec::new(),
            default_timeout_ms: self.default_timeout_ms,
        })
    }
}

/// Owns the byte link, the frame parser, and every bound socket's routing
/// and connection state for one node on the bus.
pub struct Interface<L: ByteLink, C: Clock> {
    link: L,
    clock: C,
    address: u8,
    addr_field: AddressField,
    addr_list_recved: bool,
    ping_echo_payload: u16,
    parser: codec::Parser,
    pub(crate) sockets: Vec<SocketSlot>,
    default_timeout_ms: u16,
}

impl<L: ByteLink, C: Clock> Interface<L, C> {
    pub fn get_address(&self) -> u8 {
        self.address
    }

    pub fn set_address(&mut self, address: u8) {
        self.address = address;
    }

    pub fn lookup_addr(&self, addr: u8) -> bool {
        self.addr_field.test(addr)
    }

    fn send_packet(&mut self, pkt: &Packet) {
        let bytes = codec::encode(pkt);
        for b in bytes {
            self.link.put(b);
        }
        self.link.flush();
    }

    /// Drains every byte currently available on the link, dispatching each
    /// completed frame as it is parsed.
    pub fn read(&mut self) {
        while self.link.available() {
            let byte = self.link.get();
            if let Some(pkt) = self.parser.feed(byte) {
                self.dispatch(pkt);
            }
        }
    }

    pub fn flush(&mut self) {
        self.link.flush();
    }

    fn dispatch(&mut self, pkt: Packet) {
        trace!("picolan: dispatching {:?}", pkt);
        match pkt {
            Packet::GetAddrList { .. } => {
                let mut af = AddressField::new();
                af.set(self.address, true);
                self.send_packet(&Packet::AddrField { af });
            }
            Packet::AddrField { af } => {
                self.addr_field = af;
                self.addr_list_recved = true;
            }
            Packet::Ping { src, dst: _, payload, .. } => {
                self.send_packet(&Packet::PingEcho {
                    ttl: DEFAULT_TTL,
                    src: self.address,
                    dst: src,
                    payload,
                });
            }
            Packet::PingEcho { payload, .. } => {
                self.ping_echo_payload = payload;
            }
            Packet::Datagram { src, dst, port, payload, .. } => {
                if dst == self.address || dst == BROADCAST_ADDR || dst == MULTICAST_ADDR {
                    self.dispatch_datagram(src, port, payload.as_slice());
                }
            }
            Packet::Subscribe { .. } => {
                // endpoints ignore Subscribe; only switches act on it.
            }
        }
    }

    fn dispatch_datagram(&mut self, src: u8, port: u8, payload: &[u8]) {
        let idxs: Vec<usize> = self
            .sockets
            .iter()
            .enumerate()
            .filter(|(_, s)| s.port == port)
            .map(|(i, _)| i)
            .collect();

        for idx in idxs {
            let is_stream = matches!(self.sockets[idx].kind, SocketKind::Stream(_));
            if is_stream {
                self.stream_on_data(idx, src, payload);
            } else {
                self.sockets[idx].remote = src;
                for &b in payload {
                    self.sockets[idx].ring.push(b);
                }
            }
        }
    }

    pub fn get_addr_list(&mut self, timeout_ms: u16) -> Result<(), Error> {
        self.addr_list_recved = false;
        self.send_packet(&Packet::GetAddrList { ttl: DEFAULT_TTL });

        let start = self.clock.millis();
        loop {
            self.read();
            if self.addr_list_recved {
                return Ok(());
            }
            if self.clock.millis().saturating_sub(start) >= timeout_ms as u64 {
                return Err(Error::Timeout);
            }
        }
    }

    pub fn ping(&mut self, dst: u8, timeout_ms: u16) -> Result<u64, Error> {
        let payload = (self.clock.millis() & 0xFFFF) as u16;
        self.send_packet(&Packet::Ping {
            ttl: DEFAULT_TTL,
            src: self.address,
            dst,
            payload,
        });

        let start = self.clock.millis();
        loop {
            self.read();
            if self.ping_echo_payload == payload {
                return Ok(self.clock.millis().saturating_sub(start));
            }
            if self.clock.millis().saturating_sub(start) >= timeout_ms as u64 {
                return Err(Error::Timeout);
            }
        }
    }

    pub(crate) fn bind(&mut self, port: u8, kind: SocketKind) -> bool {
        if self.sockets.len() >= MAX_SOCKETS {
            return false;
        }
        if self.sockets.iter().any(|s| s.port == port) {
            return false;
        }
        self.sockets.push(SocketSlot {
            port,
            remote: 0,
            timeout_ms: self.default_timeout_ms,
            ring: RingBuffer::new(DEFAULT_RING_CAPACITY),
            kind,
        });
        true
    }

    pub(crate) fn unbind(&mut self, port: u8) {
        self.sockets.retain(|s| s.port != port);
    }

    pub(crate) fn find(&self, port: u8) -> Option<usize> {
        self.sockets.iter().position(|s| s.port == port)
    }

    pub(crate) fn set_timeout(&mut self, idx: usize, timeout_ms: u16) {
        self.sockets[idx].timeout_ms = timeout_ms;
    }

    pub(crate) fn get_remote(&self, idx: usize) -> u8 {
        self.sockets[idx].remote
    }

    /// Reads up to `n` bytes into `buf` from a socket's ring buffer,
    /// draining the link while waiting, per `Socket.read`.
    pub(crate) fn socket_read(&mut self, idx: usize, buf: &mut [u8]) -> usize {
        let timeout_ms = self.sockets[idx].timeout_ms as u64;
        let start = self.clock.millis();
        let mut n = 0;
        while n < buf.len() {
            if let Some(b) = self.sockets[idx].ring.pop() {
                buf[n] = b;
                n += 1;
                continue;
            }
            self.read();
            if !self.sockets[idx].ring.is_empty() {
                continue;
            }
            if self.clock.millis().saturating_sub(start) >= timeout_ms {
                break;
            }
        }
        n
    }

    // ---- Datagram -------------------------------------------------------

    /// Chunk size used by `Datagram::write`.
    ///
    /// Chunks at exactly the payload capacity so every chunk is delivered
    /// intact and fits the parser's own body-size ceiling; see `DESIGN.md`
    /// for the reasoning behind picking this number.
    pub(crate) const DATAGRAM_CHUNK_SZ: usize = codec::DATAGRAM_PAYLOAD_CAP;

    pub(crate) fn datagram_write(&mut self, dst: u8, dst_port: u8, bytes: &[u8]) {
        for chunk in bytes.chunks(Self::DATAGRAM_CHUNK_SZ) {
            self.send_packet(&Packet::Datagram {
                ttl: DEFAULT_TTL,
                src: self.address,
                dst,
                port: dst_port,
                payload: BoundedList::from_slice(chunk),
            });
        }
        self.link.flush();
    }

    pub(crate) fn datagram_subscribe(&mut self, port: u8, addr: u8, subscribe: bool) {
        self.send_packet(&Packet::Subscribe {
            ttl: DEFAULT_TTL,
            port,
            addr,
            subscribe: subscribe as u8,
        });
    }

    // ---- Stream sub-protocol ---------------------------------------------

    fn stream_state(&self, idx: usize) -> &StreamState {
        match &self.sockets[idx].kind {
            SocketKind::Stream(ss) => ss,
            SocketKind::Datagram => unreachable!("socket {} is not a stream", idx),
        }
    }

    fn stream_state_mut(&mut self, idx: usize) -> &mut StreamState {
        match &mut self.sockets[idx].kind {
            SocketKind::Stream(ss) => ss,
            SocketKind::Datagram => unreachable!("socket {} is not a stream", idx),
        }
    }

    pub(crate) fn connection_state(&self, idx: usize) -> ConnectionState {
        self.stream_state(idx).state
    }

    pub(crate) fn stream_remote_port(&self, idx: usize) -> u8 {
        self.stream_state(idx).remote_port
    }

    fn send_stream_message(&mut self, idx: usize, msg_type: u8, extra: &[u8]) {
        let remote = self.sockets[idx].remote;
        let remote_port = self.stream_state(idx).remote_port;
        let mut payload = vec![msg_type];
        payload.extend_from_slice(extra);
        self.send_packet(&Packet::Datagram {
            ttl: DEFAULT_TTL,
            src: self.address,
            dst: remote,
            port: remote_port,
            payload: BoundedList::from_slice(&payload),
        });
    }

    fn send_ack(&mut self, idx: usize) {
        let seq = self.stream_state(idx).remote_sequence;
        self.send_stream_message(idx, message::ACK, &[seq]);
    }

    fn send_close(&mut self, idx: usize) {
        let seq = self.stream_state(idx).sequence_number;
        self.send_stream_message(idx, message::CLOSE, &[seq]);
    }

    fn stream_on_data(&mut self, idx: usize, src: u8, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let role = self.stream_state(idx).role;
        match role {
            StreamRole::Client => self.client_on_data(idx, src, data),
            StreamRole::Server => self.server_on_data(idx, src, data),
        }
    }

    fn client_on_data(&mut self, idx: usize, src: u8, data: &[u8]) {
        if self.sockets[idx].remote != src {
            return;
        }
        let state = self.stream_state(idx).state;
        match state {
            ConnectionState::Closed => {}
            ConnectionState::SynSent => {
                if data[0] == message::SYN && data.len() >= 2 {
                    self.stream_state_mut(idx).remote_sequence = data[1];
                    self.stream_state_mut(idx).state = ConnectionState::SynRecved;
                    debug!("picolan: client socket {} SYN_SENT -> SYN_RECVED", idx);
                } else if data[0] == message::CLOSE {
                    self.stream_state_mut(idx).state = ConnectionState::Closed;
                }
            }
            ConnectionState::Open => {
                if data[0] == message::CLOSE {
                    self.stream_state_mut(idx).state = ConnectionState::Closed;
                    debug!("picolan: client socket {} closed by peer", idx);
                } else if data[0] == message::ACK && data.len() >= 2 {
                    self.stream_state_mut(idx).last_recved_ack = data[1];
                } else if data[0] == message::DATA && data.len() >= 2 {
                    self.accept_data(idx, data);
                    self.send_ack(idx);
                }
            }
            _ => {}
        }
    }

    fn server_on_data(&mut self, idx: usize, src: u8, data: &[u8]) {
        let state = self.stream_state(idx).state;
        match state {
            ConnectionState::Closed => {}
            ConnectionState::Listening => {
                if data[0] == message::SYN && data.len() >= 3 {
                    self.sockets[idx].remote = src;
                    let ss = self.stream_state_mut(idx);
                    ss.remote_sequence = data[1];
                    ss.remote_port = data[2];
                    ss.state = ConnectionState::SynRecved;
                    debug!("picolan: server socket {} LISTENING -> SYN_RECVED", idx);
                }
            }
            ConnectionState::SynRecved => {
                if self.sockets[idx].remote != src || data.len() != 2 {
                    return;
                }
                if data[0] == message::CLOSE {
                    self.stream_state_mut(idx).state = ConnectionState::Closed;
                }
            }
            ConnectionState::Pending => {
                if self.sockets[idx].remote != src {
                    return;
                }
                if data[0] == message::ACK {
                    self.stream_state_mut(idx).state = ConnectionState::Open;
                    debug!("picolan: server socket {} PENDING -> OPEN", idx);
                } else if data[0] == message::CLOSE {
                    self.stream_state_mut(idx).state = ConnectionState::Closed;
                }
            }
            ConnectionState::Open => {
                if self.sockets[idx].remote != src {
                    return;
                }
                if data[0] == message::CLOSE {
                    self.stream_state_mut(idx).state = ConnectionState::Closed;
                    debug!("picolan: server socket {} closed by peer", idx);
                } else if data[0] == message::ACK && data.len() >= 2 {
                    self.stream_state_mut(idx).last_recved_ack = data[1];
                } else if data[0] == message::DATA && data.len() >= 2 {
                    self.accept_data(idx, data);
                    self.send_ack(idx);
                }
            }
            _ => {}
        }
    }

    fn accept_data(&mut self, idx: usize, data: &[u8]) {
        let seq = data[1];
        let expected = self.stream_state(idx).remote_sequence.wrapping_add(1);
        if seq == expected {
            self.stream_state_mut(idx).remote_sequence = seq;
            for &b in &data[2..] {
                self.sockets[idx].ring.push(b);
            }
        }
    }

    // ---- Client connect / Server accept -----------------------------------

    pub(crate) fn client_connect(&mut self, idx: usize, dst: u8, port: u8, timeout_ms: u16) -> Result<(), Error> {
        if self.stream_state(idx).state != ConnectionState::Closed {
            return Err(Error::BadState);
        }
        self.sockets[idx].remote = dst;
        let local_port = self.sockets[idx].port;
        {
            let ss = self.stream_state_mut(idx);
            ss.remote_port = port;
            ss.sequence_number = ss.sequence_number.wrapping_add(1);
        }
        let seq = self.stream_state(idx).sequence_number;
        self.stream_state_mut(idx).state = ConnectionState::SynSent;
        self.send_stream_message(idx, message::SYN, &[seq, local_port]);

        let start = self.clock.millis();
        while self.stream_state(idx).state == ConnectionState::SynSent {
            self.read();
            if self.stream_state(idx).state != ConnectionState::SynSent {
                break;
            }
            if self.clock.millis().saturating_sub(start) >= timeout_ms as u64 {
                self.stream_state_mut(idx).state = ConnectionState::Closed;
                return Err(Error::Timeout);
            }
        }

        if self.stream_state(idx).state == ConnectionState::SynRecved {
            let remote_seq = self.stream_state(idx).remote_sequence;
            self.send_stream_message(idx, message::ACK, &[remote_seq]);
            self.stream_state_mut(idx).state = ConnectionState::Open;
            return Ok(());
        }

        Err(Error::Timeout)
    }

    pub(crate) fn server_listen(&mut self, idx: usize) {
        self.stream_state_mut(idx).state = ConnectionState::Listening;
    }

    pub(crate) fn server_connection_pending(&self, idx: usize) -> bool {
        self.stream_state(idx).state == ConnectionState::SynRecved
    }

    pub(crate) fn server_accept(&mut self, idx: usize, timeout_ms: u16) -> Result<(), Error> {
        if self.stream_state(idx).state != ConnectionState::SynRecved {
            return Err(Error::BadState);
        }
        let seq = self.stream_state(idx).sequence_number;
        let remote_seq = self.stream_state(idx).remote_sequence;
        self.send_stream_message(idx, message::ACK, &[remote_seq]);
        self.send_stream_message(idx, message::SYN, &[seq, self.sockets[idx].port]);
        self.stream_state_mut(idx).state = ConnectionState::Pending;
        // the SYN just sent consumes `seq`, same as the client's
        // `sequence_number++` before sending its own SYN.
        self.stream_state_mut(idx).sequence_number = seq.wrapping_add(1);

        let start = self.clock.millis();
        loop {
            self.read();
            match self.stream_state(idx).state {
                ConnectionState::Open => return Ok(()),
                ConnectionState::Closed => return Err(Error::Timeout),
                _ => {}
            }
            if self.clock.millis().saturating_sub(start) >= timeout_ms as u64 {
                self.stream_state_mut(idx).state = ConnectionState::Closed;
                return Err(Error::Timeout);
            }
        }
    }

    pub(crate) fn stream_disconnect(&mut self, idx: usize) {
        let state = self.stream_state(idx).state;
        if state == ConnectionState::Closed {
            return;
        }
        self.stream_state_mut(idx).state = ConnectionState::Closed;
        if state != ConnectionState::Listening {
            self.send_close(idx);
        }
        debug!("picolan: socket {} disconnected", idx);
    }

    pub(crate) fn stream_read(&mut self, idx: usize, buf: &mut [u8]) -> Result<usize, Error> {
        if self.stream_state(idx).state != ConnectionState::Open {
            return Err(Error::BadState);
        }
        let n = self.socket_read(idx, buf);
        if n == 0 {
            let zrc = self.stream_state(idx).zero_read_count + 1;
            self.stream_state_mut(idx).zero_read_count = zrc;
            if zrc >= 3 {
                self.stream_disconnect(idx);
                self.stream_state_mut(idx).zero_read_count = 0;
            }
        } else {
            self.stream_state_mut(idx).zero_read_count = 0;
        }
        Ok(n)
    }

    pub(crate) fn stream_write(&mut self, idx: usize, bytes: &[u8]) -> Result<usize, Error> {
        if self.stream_state(idx).state != ConnectionState::Open {
            return Err(Error::BadState);
        }
        if bytes.is_empty() {
            return Ok(0);
        }

        let mut cursor = 0usize;
        let mut dead_bursts = 0u8;

        while cursor < bytes.len() {
            let base_seq = self.stream_state(idx).sequence_number;
            let remaining_frames = (bytes.len() - cursor + BYTES_PER_FRAME - 1) / BYTES_PER_FRAME;
            let frames_to_send = remaining_frames.min(BURST);

            let mut frame_positions = [FramePosition::EMPTY; BURST];
            let burst_start = cursor;
            let mut final_seq = base_seq;

            for i in 0..frames_to_send {
                let seq = base_seq.wrapping_add(i as u8 + 1);
                final_seq = seq;
                let take = BYTES_PER_FRAME.min(bytes.len() - cursor);
                let frame_bytes = &bytes[cursor..cursor + take];

                self.read();
                let mut payload = vec![message::DATA, seq];
                payload.extend_from_slice(frame_bytes);
                let remote = self.sockets[idx].remote;
                let remote_port = self.stream_state(idx).remote_port;
                self.send_packet(&Packet::Datagram {
                    ttl: DEFAULT_TTL,
                    src: self.address,
                    dst: remote,
                    port: remote_port,
                    payload: BoundedList::from_slice(&payload),
                });

                cursor += take;
                frame_positions[i] = FramePosition {
                    seq: Some(seq),
                    pos: cursor,
                };
            }

            let timeout_ms = self.sockets[idx].timeout_ms as u64;
            let start = self.clock.millis();
            loop {
                self.read();
                if self.stream_state(idx).last_recved_ack == final_seq {
                    break;
                }
                if self.clock.millis().saturating_sub(start) >= timeout_ms {
                    break;
                }
            }

            let last_ack = self.stream_state(idx).last_recved_ack;
            if last_ack == base_seq {
                dead_bursts += 1;
                if dead_bursts == 3 {
                    return Err(Error::Timeout);
                }
                cursor = burst_start;
                continue;
            }

            let confirmed = frame_positions[..frames_to_send]
                .iter()
                .enumerate()
                .find(|(_, fp)| fp.seq == Some(last_ack));

            match confirmed {
                Some((i, fp)) => {
                    cursor = fp.pos;
                    self.stream_state_mut(idx).sequence_number = base_seq.wrapping_add(i as u8 + 1);
                    dead_bursts = 0;
                }
                None => return Err(Error::AckOutOfSequence),
            }
        }

        Ok(cursor)
    }
}

/// Shared handle to an `Interface`, held by every bound socket.
pub type Shared<L, C> = Rc<RefCell<Interface<L, C>>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{init_logging, ManualLink, ScriptedPeerLink, TestClock, XorShift32};
    use std::cell::Cell;

    #[test]
    fn loopback_ping_reports_zero_elapsed_and_addr_list_sees_self() {
        init_logging();
        let mut iface = InterfaceBuilder::new(7)
            .build(crate::test_support::LoopbackLink::new(), TestClock::new())
            .unwrap();

        assert_eq!(iface.ping(7, 50), Ok(1));
        assert_eq!(iface.get_addr_list(50), Ok(()));
        assert!(iface.lookup_addr(7));
        assert!(!iface.lookup_addr(8));
    }

    #[test]
    fn binding_rejects_a_port_already_in_use() {
        let iface_builder = InterfaceBuilder::new(1);
        let mut iface = iface_builder.build(ManualLink::new(), TestClock::new()).unwrap();

        assert!(iface.bind(10, SocketKind::Datagram));
        assert!(!iface.bind(10, SocketKind::Stream(StreamState::new(StreamRole::Client))));
        iface.unbind(10);
        assert!(iface.bind(10, SocketKind::Datagram));
    }

    #[test]
    fn newly_bound_sockets_inherit_the_builders_default_timeout() {
        let mut iface = InterfaceBuilder::new(1)
            .default_timeout_ms(250)
            .build(ManualLink::new(), TestClock::new())
            .unwrap();

        iface.bind(10, SocketKind::Datagram);
        let idx = iface.find(10).unwrap();
        assert_eq!(iface.sockets[idx].timeout_ms, 250);

        iface.set_timeout(idx, 10);
        assert_eq!(iface.sockets[idx].timeout_ms, 10);
    }

    #[test]
    fn binding_is_capped_at_max_sockets() {
        let mut iface = InterfaceBuilder::new(1)
            .build(ManualLink::new(), TestClock::new())
            .unwrap();
        for port in 0..MAX_SOCKETS as u8 {
            assert!(iface.bind(port, SocketKind::Datagram));
        }
        assert!(!iface.bind(MAX_SOCKETS as u8, SocketKind::Datagram));
    }

    #[test]
    fn datagram_addressed_to_broadcast_is_delivered_even_though_dst_differs() {
        let mut link = ManualLink::new();
        let pkt = codec::encode(&Packet::Datagram {
            ttl: 6,
            src: 5,
            dst: BROADCAST_ADDR,
            port: 20,
            payload: BoundedList::from_slice(b"hi"),
        });
        link.feed(&pkt);
        let mut iface = InterfaceBuilder::new(1).build(link, TestClock::new()).unwrap();
        iface.bind(20, SocketKind::Datagram);
        let idx = iface.find(20).unwrap();

        iface.read();

        let mut buf = [0u8; 2];
        assert_eq!(iface.socket_read(idx, &mut buf), 2);
        assert_eq!(&buf, b"hi");
        assert_eq!(iface.get_remote(idx), 5);
    }

    /// A frame carrying an unknown packet id (one past the last real one) is
    /// dropped by the parser, so an otherwise-valid follow-up frame still
    /// decodes; framing recovers at the next start marker rather than
    /// wedging on the bad byte.
    #[test]
    fn parser_recovers_after_a_malformed_frame() {
        let mut link = ManualLink::new();
        let mut junk = codec::encode(&Packet::Datagram {
            ttl: 6,
            src: 5,
            dst: 1,
            port: 20,
            payload: BoundedList::from_slice(b"x"),
        });
        // corrupt the id byte (first byte after the start marker) so the
        // parser rejects this frame outright.
        junk[1] = 0xEE;
        link.feed(&junk);
        let good = codec::encode(&Packet::Datagram {
            ttl: 6,
            src: 5,
            dst: 1,
            port: 20,
            payload: BoundedList::from_slice(b"ok"),
        });
        link.feed(&good);

        let mut iface = InterfaceBuilder::new(1).build(link, TestClock::new()).unwrap();
        iface.bind(20, SocketKind::Datagram);
        let idx = iface.find(20).unwrap();
        iface.read();

        let mut buf = [0u8; 2];
        assert_eq!(iface.socket_read(idx, &mut buf), 2);
        assert_eq!(&buf, b"ok");
    }

    fn open_client_stream<C: Clock>(iface: &mut Interface<ScriptedPeerLink, C>, local_port: u8, remote: u8, remote_port: u8, seq: u8) -> usize {
        iface.bind(local_port, SocketKind::Stream(StreamState::new(StreamRole::Client)));
        let idx = iface.find(local_port).unwrap();
        iface.sockets[idx].remote = remote;
        iface.sockets[idx].timeout_ms = 40;
        let ss = iface.stream_state_mut(idx);
        ss.state = ConnectionState::Open;
        ss.sequence_number = seq;
        ss.remote_port = remote_port;
        idx
    }

    /// Simulates a peer that accepts in-sequence DATA frames, acks whatever
    /// its current `remote_sequence` is (even re-acking the same value when a
    /// frame arrives out of order), and silently drops every frame whose
    /// 0-based arrival index is in `drop_indices`.
    fn peer_link(local_port: u8, drop_indices: Vec<u32>, start_seq: u8) -> ScriptedPeerLink {
        let remote_seq = Rc::new(Cell::new(start_seq));
        let seen = Rc::new(Cell::new(0u32));
        let drop_indices = Rc::new(drop_indices);
        ScriptedPeerLink::new(move |pkt| {
            if let Packet::Datagram { payload, .. } = pkt {
                let data = payload.as_slice();
                if data.first() == Some(&message::DATA) && data.len() >= 2 {
                    let n = seen.get();
                    seen.set(n + 1);
                    if drop_indices.contains(&n) {
                        return Vec::new();
                    }
                    let seq = data[1];
                    let expected = remote_seq.get().wrapping_add(1);
                    if seq == expected {
                        remote_seq.set(seq);
                    }
                    return vec![Packet::Datagram {
                        ttl: 6,
                        src: 9,
                        dst: 1,
                        port: local_port,
                        payload: BoundedList::from_slice(&[message::ACK, remote_seq.get()]),
                    }];
                }
            }
            Vec::new()
        })
    }

    #[test]
    fn stream_write_retransmits_after_a_dropped_frame_and_advances_sequence() {
        let link = peer_link(50, vec![1], 10);
        let mut iface = InterfaceBuilder::new(1).build(link, TestClock::new()).unwrap();
        let idx = open_client_stream(&mut iface, 50, 9, 41, 10);

        let written = iface.stream_write(idx, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        assert_eq!(written, 8);
        assert_eq!(iface.stream_state(idx).sequence_number, 18);
    }

    #[test]
    fn stream_write_sequence_number_wraps_around_past_255() {
        let link = peer_link(50, vec![], 254);
        let mut iface = InterfaceBuilder::new(1).build(link, TestClock::new()).unwrap();
        let idx = open_client_stream(&mut iface, 50, 9, 41, 254);

        let written = iface.stream_write(idx, &[1, 2, 3, 4, 5, 6]).unwrap();

        assert_eq!(written, 6);
        assert_eq!(iface.stream_state(idx).sequence_number, 4);
    }

    #[test]
    fn stream_write_sequence_number_wraps_around_for_many_random_start_points() {
        // Driven by a manual PRNG over many random starting sequence numbers
        // and payload lengths, so wraparound is checked as a property rather
        // than only at the single hand-picked boundary (254 -> 4) above.
        let mut rng = XorShift32::new(0x5EED_5EED);
        for _ in 0..50 {
            let start_seq = rng.next_u8();
            let len = 1 + (rng.next_u8() as usize % 20);
            let payload: Vec<u8> = (0..len).map(|_| rng.next_u8()).collect();

            let link = peer_link(50, vec![], start_seq);
            let mut iface = InterfaceBuilder::new(1).build(link, TestClock::new()).unwrap();
            let idx = open_client_stream(&mut iface, 50, 9, 41, start_seq);

            let written = iface.stream_write(idx, &payload).unwrap();

            assert_eq!(written, len);
            let expected_frames = (len + BYTES_PER_FRAME - 1) / BYTES_PER_FRAME;
            assert_eq!(
                iface.stream_state(idx).sequence_number,
                start_seq.wrapping_add(expected_frames as u8)
            );
        }
    }

    #[test]
    fn stream_write_gives_up_after_three_dead_bursts() {
        let link = ScriptedPeerLink::new(|_pkt| Vec::new());
        let mut iface = InterfaceBuilder::new(1).build(link, TestClock::new()).unwrap();
        let idx = open_client_stream(&mut iface, 50, 9, 41, 5);
        iface.stream_state_mut(idx).last_recved_ack = 5;

        let err = iface.stream_write(idx, &[1, 2, 3]).unwrap_err();

        assert_eq!(err, Error::Timeout);
    }

    #[test]
    fn stream_write_reports_ack_out_of_sequence() {
        let link = ScriptedPeerLink::new(move |pkt| {
            if let Packet::Datagram { payload, .. } = pkt {
                let data = payload.as_slice();
                if data.first() == Some(&message::DATA) {
                    return vec![Packet::Datagram {
                        ttl: 6,
                        src: 9,
                        dst: 1,
                        port: 50,
                        payload: BoundedList::from_slice(&[message::ACK, 200]),
                    }];
                }
            }
            Vec::new()
        });
        let mut iface = InterfaceBuilder::new(1).build(link, TestClock::new()).unwrap();
        let idx = open_client_stream(&mut iface, 50, 9, 41, 5);

        let err = iface.stream_write(idx, &[1, 2, 3]).unwrap_err();

        assert_eq!(err, Error::AckOutOfSequence);
    }
}
