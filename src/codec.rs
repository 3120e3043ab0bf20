//! Wire framing, checksum and typed packet marshalling.
//!
//! Grounded on `examples/original_source/serialiser.h` (packet field layout
//! and the parser's state machine shape). Implements the byte-stuffed,
//! Fletcher-checksummed wire format only — an older `0xAB 0xCD`-start,
//! rotating-sum-checksum, non-stuffed format also present in that source
//! is a deliberately dropped legacy path, not an oversight (see `DESIGN.md`).

use log::{trace, warn};

use crate::addr::AddressField;
use crate::containers::BoundedList;

/// Unescaped frame start marker.
pub const START: u8 = 0xAB;
/// Unescaped frame end marker.
pub const END: u8 = 0xAC;
/// Escape byte: the following byte is literal, regardless of its value.
pub const ESCAPE: u8 = 0xAA;

/// Maximum framed packet length including header and checksum bytes.
pub const MAX_PACKET_LENGTH: usize = 64;
/// Maximum body length the parser will accept (`size` field ceiling).
pub const MAX_BODY: usize = 62;

/// Maximum datagram payload, mirroring `datagram_pack` in the original
/// protocol (10 bytes of header/checksum leave 54 bytes of payload room).
pub const DATAGRAM_PAYLOAD_CAP: usize = 54;

const ID_GET_ADDR_LIST: u8 = 1;
const ID_ADDR_FIELD: u8 = 2;
const ID_PING: u8 = 3;
const ID_PING_ECHO: u8 = 4;
const ID_DATAGRAM: u8 = 5;
const ID_SUBSCRIBE: u8 = 6;
/// Sentinel id; not a wire value. Any `id >= NULL_ID` is rejected by the parser.
const NULL_ID: u8 = 7;

/// A decoded (or to-be-encoded) PicoLAN packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    GetAddrList {
        ttl: u8,
    },
    AddrField {
        af: AddressField,
    },
    Ping {
        ttl: u8,
        src: u8,
        dst: u8,
        payload: u16,
    },
    PingEcho {
        ttl: u8,
        src: u8,
        dst: u8,
        payload: u16,
    },
    Datagram {
        ttl: u8,
        src: u8,
        dst: u8,
        port: u8,
        payload: BoundedList<u8, DATAGRAM_PAYLOAD_CAP>,
    },
    Subscribe {
        ttl: u8,
        port: u8,
        addr: u8,
        subscribe: u8,
    },
}

impl Packet {
    fn id(&self) -> u8 {
        match self {
            Packet::GetAddrList { .. } => ID_GET_ADDR_LIST,
            Packet::AddrField { .. } => ID_ADDR_FIELD,
            Packet::Ping { .. } => ID_PING,
            Packet::PingEcho { .. } => ID_PING_ECHO,
            Packet::Datagram { .. } => ID_DATAGRAM,
            Packet::Subscribe { .. } => ID_SUBSCRIBE,
        }
    }

    fn body(&self) -> Vec<u8> {
        match self {
            Packet::GetAddrList { ttl } => vec![*ttl],
            Packet::AddrField { af } => af.bytes().to_vec(),
            Packet::Ping {
                ttl,
                src,
                dst,
                payload,
            }
            | Packet::PingEcho {
                ttl,
                src,
                dst,
                payload,
            } => {
                let [lo, hi] = payload.to_le_bytes();
                vec![*ttl, *src, *dst, lo, hi]
            }
            Packet::Datagram {
                ttl,
                src,
                dst,
                port,
                payload,
            } => {
                let mut body = vec![*ttl, *src, *dst, *port, payload.len() as u8];
                body.extend_from_slice(payload.as_slice());
                body
            }
            Packet::Subscribe {
                ttl,
                port,
                addr,
                subscribe,
            } => vec![*ttl, *port, *addr, *subscribe],
        }
    }
}

/// Computes the Fletcher-16-mod-255 checksum over `data`, returning `(s1, s2)`.
///
/// The wire checksum value is `(s2 << 8) | s1`, transmitted low byte first.
pub fn fletcher16(data: &[u8]) -> (u8, u8) {
    let mut s1: u32 = 0;
    let mut s2: u32 = 0;
    for &b in data {
        s1 = (s1 + b as u32) % 255;
        s2 = (s2 + s1) % 255;
    }
    (s1 as u8, s2 as u8)
}

/// Encodes `pkt` into a fully framed, byte-stuffed wire sequence.
pub fn encode(pkt: &Packet) -> Vec<u8> {
    let id = pkt.id();
    let body = pkt.body();
    let size = body.len() as u8;

    let mut checksum_region = Vec::with_capacity(2 + body.len());
    checksum_region.push(id);
    checksum_region.push(size);
    checksum_region.extend_from_slice(&body);

    let (s1, s2) = fletcher16(&checksum_region);
    checksum_region.push(s1);
    checksum_region.push(s2);

    let mut out = Vec::with_capacity(checksum_region.len() * 2 + 2);
    out.push(START);
    for &b in &checksum_region {
        if b == ESCAPE || b == START || b == END {
            out.push(ESCAPE);
        }
        out.push(b);
    }
    out.push(END);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Id,
    Size,
    Data,
    Check1,
    Check2,
    End,
}

/// The byte-stuffed frame parser.
///
/// Feed it bytes one at a time with `feed`; it returns a decoded `Packet`
/// whenever a complete, checksum-valid frame has been consumed. Malformed
/// frames (bad checksum, unknown id, oversized body) are dropped silently
/// (and logged at `warn!`) with recovery happening at the next start marker
/// rather than aborting the whole stream.
pub struct Parser {
    state: State,
    escaped: bool,
    id: u8,
    size: u8,
    data: BoundedList<u8, MAX_BODY>,
    check1: u8,
    check2: u8,
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            state: State::Start,
            escaped: false,
            id: 0,
            size: 0,
            data: BoundedList::new(),
            check1: 0,
            check2: 0,
        }
    }

    /// Feeds one byte from the link into the parser.
    ///
    /// Returns `Some(packet)` exactly when `byte` completed a valid frame.
    pub fn feed(&mut self, byte: u8) -> Option<Packet> {
        if self.escaped {
            self.escaped = false;
            self.advance(byte);
            return None;
        }

        match byte {
            ESCAPE => {
                self.escaped = true;
                None
            }
            START => {
                self.begin_frame();
                None
            }
            END if self.state == State::End => {
                self.state = State::Start;
                self.finish()
            }
            other => {
                self.advance(other);
                None
            }
        }
    }

    fn begin_frame(&mut self) {
        self.state = State::Id;
        self.data.clear();
    }

    fn advance(&mut self, byte: u8) {
        match self.state {
            State::Start => {}
            State::Id => {
                self.id = byte;
                if byte == 0 || byte >= NULL_ID {
                    self.state = State::Start;
                } else {
                    self.state = State::Size;
                }
            }
            State::Size => {
                self.size = byte;
                if byte as usize > MAX_BODY {
                    warn!("picolan: oversized body ({} > {}), dropping frame", byte, MAX_BODY);
                    self.state = State::Start;
                } else if byte == 0 {
                    self.state = State::Check1;
                } else {
                    self.state = State::Data;
                }
            }
            State::Data => {
                self.data.push(byte);
                if self.data.len() == self.size as usize {
                    self.state = State::Check1;
                }
            }
            State::Check1 => {
                self.check1 = byte;
                self.state = State::Check2;
            }
            State::Check2 => {
                self.check2 = byte;
                self.state = State::End;
            }
            State::End => {
                // a non-terminator byte while awaiting the end marker means
                // the frame was malformed; resync at the next start marker.
                self.state = State::Start;
            }
        }
    }

    fn finish(&mut self) -> Option<Packet> {
        let body = self.data.as_slice();

        let mut checksum_region = Vec::with_capacity(2 + body.len());
        checksum_region.push(self.id);
        checksum_region.push(self.size);
        checksum_region.extend_from_slice(body);

        let (s1, s2) = fletcher16(&checksum_region);
        if s1 != self.check1 || s2 != self.check2 {
            warn!("picolan: checksum mismatch on id {}, dropping frame", self.id);
            return None;
        }

        let pkt = decode_body(self.id, body);
        if pkt.is_none() {
            warn!("picolan: malformed body for id {}, dropping frame", self.id);
        } else {
            trace!("picolan: parsed packet id {}", self.id);
        }
        pkt
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_body(id: u8, body: &[u8]) -> Option<Packet> {
    match id {
        ID_GET_ADDR_LIST => {
            if body.len() != 1 {
                return None;
            }
            Some(Packet::GetAddrList { ttl: body[0] })
        }
        ID_ADDR_FIELD => AddressField::from_bytes(body).map(|af| Packet::AddrField { af }),
        ID_PING | ID_PING_ECHO => {
            if body.len() != 5 {
                return None;
            }
            let payload = u16::from_le_bytes([body[3], body[4]]);
            let fields = (body[0], body[1], body[2], payload);
            Some(if id == ID_PING {
                Packet::Ping {
                    ttl: fields.0,
                    src: fields.1,
                    dst: fields.2,
                    payload: fields.3,
                }
            } else {
                Packet::PingEcho {
                    ttl: fields.0,
                    src: fields.1,
                    dst: fields.2,
                    payload: fields.3,
                }
            })
        }
        ID_DATAGRAM => {
            if body.len() < 5 {
                return None;
            }
            let len = body[4] as usize;
            if body.len() != 5 + len {
                return None;
            }
            Some(Packet::Datagram {
                ttl: body[0],
                src: body[1],
                dst: body[2],
                port: body[3],
                payload: BoundedList::from_slice(&body[5..]),
            })
        }
        ID_SUBSCRIBE => {
            if body.len() != 4 {
                return None;
            }
            Some(Packet::Subscribe {
                ttl: body[0],
                port: body[1],
                addr: body[2],
                subscribe: body[3],
            })
        }
        _ => None,
    }
}
