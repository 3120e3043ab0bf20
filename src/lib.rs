//! PicoLAN: a small link/transport stack for sharing one byte-oriented
//! serial line as a miniature local network.
//!
//! An [`Interface`] owns a [`ByteLink`] and a [`Clock`](crate::clock::Clock)
//! and multiplexes inbound frames to bound sockets: unreliable [`Datagram`]
//! sockets, and reliable [`Client`]/[`Server`] streams built on a
//! SYN/ACK/DATA/CLOSE sub-protocol with burst-based cumulative
//! acknowledgement. See each module for the grounding of its design.

mod addr;
mod client;
mod clock;
mod codec;
mod containers;
mod error;
mod interface;
mod link;
mod server;
mod socket;
mod stream;

#[cfg(test)]
mod test_support;

pub use addr::{AddressField, BROADCAST_ADDR, MULTICAST_ADDR};
pub use client::Client;
pub use clock::Clock;
pub use codec::{Packet, MAX_PACKET_LENGTH};
pub use error::{Error, NONE};
pub use interface::{Interface, InterfaceBuilder, Shared};
pub use link::ByteLink;
pub use server::Server;
pub use socket::Datagram;
pub use stream::ConnectionState;
