//! In-memory test doubles for `ByteLink` and `Clock`.
//!
//! Used only by `#[cfg(test)]` code across the crate; a real serial/UART
//! binding is left to callers and isn't shipped here.

#![cfg(test)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::clock::Clock;
use crate::link::ByteLink;

/// Installs a logger for tests that want to see `log` output; safe to call
/// from more than one test since a second `try_init` just fails quietly.
pub fn init_logging() {
    let _ = env_logger::try_init();
}

/// A manual xorshift PRNG, used by property-style tests that need many
/// pseudo-random iterations without pulling in an external RNG crate.
pub struct XorShift32(u32);

impl XorShift32 {
    pub fn new(seed: u32) -> Self {
        XorShift32(if seed == 0 { 0xDEAD_BEEF } else { seed })
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    pub fn next_u8(&mut self) -> u8 {
        (self.next_u32() & 0xFF) as u8
    }
}

#[derive(Default)]
struct Pipe {
    buf: VecDeque<u8>,
}

/// A `ByteLink` whose output feeds directly back into its own input.
pub struct LoopbackLink {
    inner: Rc<RefCell<Pipe>>,
}

impl LoopbackLink {
    pub fn new() -> Self {
        LoopbackLink {
            inner: Rc::new(RefCell::new(Pipe::default())),
        }
    }
}

impl ByteLink for LoopbackLink {
    fn available(&mut self) -> bool {
        !self.inner.borrow().buf.is_empty()
    }

    fn get(&mut self) -> u8 {
        self.inner.borrow_mut().buf.pop_front().unwrap_or(0)
    }

    fn put(&mut self, byte: u8) {
        self.inner.borrow_mut().buf.push_back(byte);
    }

    fn flush(&mut self) {}
}

/// A fully test-scripted link: the test feeds bytes to be read and inspects
/// whatever the socket under test wrote, with nothing automatically echoed
/// back. Used to play a synthetic, possibly misbehaving peer.
///
/// The queues are shared (`Rc<RefCell<..>>`) so a [`ManualLinkHandle`]
/// cloned off before the link is handed to an `Interface` can keep feeding
/// it bytes mid-test, after the link itself has been moved.
pub struct ManualLink {
    inbound: Rc<RefCell<VecDeque<u8>>>,
    outbound: Rc<RefCell<Vec<u8>>>,
}

impl ManualLink {
    pub fn new() -> Self {
        ManualLink {
            inbound: Rc::new(RefCell::new(VecDeque::new())),
            outbound: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.inbound.borrow_mut().extend(bytes.iter().copied());
    }

    pub fn handle(&self) -> ManualLinkHandle {
        ManualLinkHandle {
            inbound: self.inbound.clone(),
            outbound: self.outbound.clone(),
        }
    }
}

impl ByteLink for ManualLink {
    fn available(&mut self) -> bool {
        !self.inbound.borrow().is_empty()
    }

    fn get(&mut self) -> u8 {
        self.inbound.borrow_mut().pop_front().unwrap_or(0)
    }

    fn put(&mut self, byte: u8) {
        self.outbound.borrow_mut().push(byte);
    }

    fn flush(&mut self) {}
}

/// A handle to a [`ManualLink`]'s shared queues, usable after the link
/// itself has been moved into an `Interface`.
#[derive(Clone)]
pub struct ManualLinkHandle {
    inbound: Rc<RefCell<VecDeque<u8>>>,
    outbound: Rc<RefCell<Vec<u8>>>,
}

impl ManualLinkHandle {
    pub fn feed(&self, bytes: &[u8]) {
        self.inbound.borrow_mut().extend(bytes.iter().copied());
    }

    pub fn take_outbound(&self) -> Vec<u8> {
        std::mem::take(&mut *self.outbound.borrow_mut())
    }
}

/// A link that decodes every frame the socket under test sends and hands it
/// to a responder closure, which may synthesize reply packets to queue back
/// as the next bytes the socket reads — a synchronous stand-in for a live
/// peer on the other end of the wire, without needing a second `Interface`
/// or real concurrency to drive it.
pub struct ScriptedPeerLink {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    parser: crate::codec::Parser,
    responder: Box<dyn FnMut(crate::codec::Packet) -> Vec<crate::codec::Packet>>,
}

impl ScriptedPeerLink {
    pub fn new(
        responder: impl FnMut(crate::codec::Packet) -> Vec<crate::codec::Packet> + 'static,
    ) -> Self {
        ScriptedPeerLink {
            inbound: VecDeque::new(),
            outbound: Vec::new(),
            parser: crate::codec::Parser::new(),
            responder: Box::new(responder),
        }
    }

    pub fn sent_bytes(&self) -> &[u8] {
        &self.outbound
    }
}

impl ByteLink for ScriptedPeerLink {
    fn available(&mut self) -> bool {
        !self.inbound.is_empty()
    }

    fn get(&mut self) -> u8 {
        self.inbound.pop_front().unwrap_or(0)
    }

    fn put(&mut self, byte: u8) {
        self.outbound.push(byte);
        if let Some(pkt) = self.parser.feed(byte) {
            for reply in (self.responder)(pkt) {
                self.inbound.extend(crate::codec::encode(&reply));
            }
        }
    }

    fn flush(&mut self) {}
}

/// A millisecond clock for tests: every `millis()` call ticks the clock
/// forward by one millisecond on its own, so busy-wait loops under test
/// always make progress toward their timeout instead of spinning forever
/// against a frozen clock. `advance`/`delay` additionally jump the clock by
/// a specific amount, for simulating a peer's response latency.
pub struct TestClock {
    now: Rc<RefCell<u64>>,
}

impl TestClock {
    pub fn new() -> Self {
        TestClock {
            now: Rc::new(RefCell::new(0)),
        }
    }

    pub fn handle(&self) -> TestClockHandle {
        TestClockHandle {
            now: self.now.clone(),
        }
    }

    pub fn advance(&self, ms: u64) {
        *self.now.borrow_mut() += ms;
    }
}

impl Clock for TestClock {
    fn millis(&self) -> u64 {
        let mut now = self.now.borrow_mut();
        *now += 1;
        *now
    }

    fn delay(&self, ms: u32) {
        self.advance(ms as u64);
    }
}

/// A shared handle to a `TestClock`'s counter, for advancing time from
/// outside the `Interface` that owns the clock.
#[derive(Clone)]
pub struct TestClockHandle {
    now: Rc<RefCell<u64>>,
}

impl TestClockHandle {
    pub fn advance(&self, ms: u64) {
        *self.now.borrow_mut() += ms;
    }
}

impl Clock for TestClockHandle {
    fn millis(&self) -> u64 {
        let mut now = self.now.borrow_mut();
        *now += 1;
        *now
    }

    fn delay(&self, ms: u32) {
        self.advance(ms as u64);
    }
}
