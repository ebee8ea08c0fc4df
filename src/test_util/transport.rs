use std::cell::{Cell, RefCell};

use rustc_hash::FxHashMap;
use tokio::time::Instant;

use crate::messaging::node_addr::NodeAddr;
use crate::messaging::packet::Packet;
use crate::messaging::transport::{MeshTransport, Role};

/// A [MeshTransport] that records sent datagrams instead of sending them. Tests move the
///  recorded datagrams to other engines (or drop them) explicitly.
#[derive(Debug)]
pub struct RecordingTransport {
    myself: NodeAddr,
    role: Role,
    leader: Option<NodeAddr>,
    accepting: Cell<bool>,
    sent: RefCell<Vec<(NodeAddr, Vec<u8>)>>,
    last_contact: RefCell<FxHashMap<NodeAddr, Instant>>,
    num_pumped: Cell<usize>,
}

impl RecordingTransport {
    pub fn new(myself: NodeAddr, role: Role, leader: Option<NodeAddr>) -> RecordingTransport {
        RecordingTransport {
            myself,
            role,
            leader,
            accepting: Cell::new(true),
            sent: Default::default(),
            last_contact: Default::default(),
            num_pumped: Cell::new(0),
        }
    }

    pub fn leader(myself: NodeAddr) -> RecordingTransport {
        Self::new(myself, Role::Leader, None)
    }

    pub fn joiner(myself: NodeAddr, leader: NodeAddr) -> RecordingTransport {
        Self::new(myself, Role::Joiner, Some(leader))
    }

    /// makes subsequent `send_datagram` calls return `false` without recording anything
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.set(accepting);
    }

    /// returns sent datagrams, clearing the internal buffer
    pub fn sent_datagrams(&self) -> Vec<(NodeAddr, Vec<u8>)> {
        std::mem::take(&mut *self.sent.borrow_mut())
    }

    /// returns sent datagrams parsed as packets, clearing the internal buffer
    pub fn sent_packets(&self) -> Vec<(NodeAddr, Packet)> {
        self.sent_datagrams()
            .into_iter()
            .map(|(to, raw)| (to, Packet::deser(&raw).expect("engine sent a malformed packet")))
            .collect()
    }

    pub fn record_contact(&self, addr: NodeAddr, at: Instant) {
        self.last_contact.borrow_mut().insert(addr, at);
    }

    pub fn num_pumped(&self) -> usize {
        self.num_pumped.get()
    }
}

impl MeshTransport for RecordingTransport {
    fn send_datagram(&self, to: NodeAddr, buf: &[u8]) -> bool {
        if !self.accepting.get() {
            return false;
        }
        self.sent.borrow_mut().push((to, buf.to_vec()));
        true
    }

    fn role(&self) -> Role {
        self.role
    }

    fn own_addr(&self) -> NodeAddr {
        self.myself
    }

    fn leader_addr(&self) -> Option<NodeAddr> {
        self.leader
    }

    fn last_contact(&self, addr: NodeAddr) -> Option<Instant> {
        self.last_contact.borrow().get(&addr).copied()
    }

    fn pump(&self) {
        self.num_pumped.set(self.num_pumped.get() + 1);
    }
}
