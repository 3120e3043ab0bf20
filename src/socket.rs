//! The common socket handle and the unreliable `Datagram` socket kind.
//!
//! Grounded on `examples/original_source/socket.h`/`socket.cpp` (the base
//! `Socket` class: port, remote, timeout, ring buffer, bind/destroy) and
//! `datagram.h`/`datagram.cpp` (chunked `write`, unbounded `on_data`,
//! `subscribe`). The original's virtual-`on_data` polymorphism and raw
//! back-pointer to its owning interface are replaced here: every socket
//! kind is a thin handle wrapping a shared `Rc<RefCell<Interface>>` plus the
//! bound port, with `Drop` performing the unbind the original does via an
//! explicit virtual destructor.

use crate::clock::Clock;
use crate::error::NONE;
use crate::interface::{Shared, SocketKind};
use crate::link::ByteLink;

/// A socket bound to one port of an `Interface`.
///
/// Shared by [`Datagram`] and (via [`crate::stream::StreamHandle`]) by
/// `Client`/`Server`. Dropping it unbinds the port automatically.
pub(crate) struct SocketHandle<L: ByteLink, C: Clock> {
    pub(crate) iface: Shared<L, C>,
    pub(crate) port: u8,
}

impl<L: ByteLink, C: Clock> SocketHandle<L, C> {
    pub(crate) fn bind(iface: Shared<L, C>, port: u8, kind: SocketKind) -> Option<Self> {
        if iface.borrow_mut().bind(port, kind) {
            Some(SocketHandle { iface, port })
        } else {
            None
        }
    }

    /// Finds this handle's slot index. Only panics if something else on the
    /// same `Interface` unbound this port out from under a live handle,
    /// which can't happen through the public API (only this handle's `Drop`
    /// unbinds it).
    pub(crate) fn idx(&self) -> usize {
        self.iface
            .borrow()
            .find(self.port)
            .expect("socket handle outlived its Interface binding")
    }

    pub fn read(&self, buf: &mut [u8]) -> usize {
        let idx = self.idx();
        self.iface.borrow_mut().socket_read(idx, buf)
    }

    pub fn get_port(&self) -> u8 {
        self.port
    }

    pub fn get_remote(&self) -> u8 {
        let idx = self.idx();
        self.iface.borrow().get_remote(idx)
    }

    pub fn set_timeout(&self, timeout_ms: u16) {
        let idx = self.idx();
        self.iface.borrow_mut().set_timeout(idx, timeout_ms);
    }
}

impl<L: ByteLink, C: Clock> Drop for SocketHandle<L, C> {
    fn drop(&mut self) {
        self.iface.borrow_mut().unbind(self.port);
    }
}

/// An unreliable, chunked, fire-and-forget socket.
pub struct Datagram<L: ByteLink, C: Clock> {
    handle: SocketHandle<L, C>,
}

impl<L: ByteLink, C: Clock> Datagram<L, C> {
    /// Binds a new `Datagram` socket on `port`. Returns `None` if the port
    /// is already bound or the interface is at its socket capacity.
    pub fn bind(iface: Shared<L, C>, port: u8) -> Option<Self> {
        SocketHandle::bind(iface, port, SocketKind::Datagram).map(|handle| Datagram { handle })
    }

    /// Splits `bytes` into chunks and emits one `Datagram` packet per chunk
    /// to `dst`/`dst_port`. Always succeeds at the protocol level (there is
    /// no ACK for datagrams); always returns `NONE`.
    pub fn write(&self, dst: u8, dst_port: u8, bytes: &[u8]) -> i32 {
        self.iface_mut().datagram_write(dst, dst_port, bytes);
        NONE
    }

    /// Emits a `Subscribe` packet for multicast-aware switches, carrying
    /// this node's own address.
    pub fn subscribe(&self, sub: bool) {
        let port = self.handle.port;
        let mut iface = self.iface_mut();
        let addr = iface.get_address();
        iface.datagram_subscribe(port, addr, sub);
    }

    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.handle.read(buf)
    }

    pub fn get_port(&self) -> u8 {
        self.handle.get_port()
    }

    pub fn get_remote(&self) -> u8 {
        self.handle.get_remote()
    }

    pub fn set_timeout(&self, timeout_ms: u16) {
        self.handle.set_timeout(timeout_ms);
    }

    fn iface_mut(&self) -> std::cell::RefMut<crate::interface::Interface<L, C>> {
        self.handle.iface.borrow_mut()
    }
}
