pub mod udp;

#[cfg(test)] use mockall::automock;
use tokio::time::Instant;

use crate::messaging::node_addr::NodeAddr;

/// A node's role in the mesh, as decided by the mesh's own join protocol
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Role {
    /// routing coordinator, owns the address book
    Leader,
    Joiner,
    /// not (yet) part of a mesh - nothing can be sent
    Detached,
}

/// This trait decouples the protocol engine from the mesh transport that actually moves
///  datagrams. The transport is best-effort: datagrams may be lost, duplicated or reordered,
///  and the engine never uses any delivery guarantees a transport may offer on its own.
///
/// Inbound traffic flows the other way: the host feeds received datagrams and join
///  notifications into [crate::messaging::engine::ProtocolEngine::on_datagram] and
///  [crate::messaging::engine::ProtocolEngine::on_peer_joined], from the same thread that
///  calls `tick()`.
#[cfg_attr(test, automock)]
pub trait MeshTransport {
    /// returns `true` if the transport accepted the datagram for sending, which says nothing
    ///  about delivery
    fn send_datagram(&self, to: NodeAddr, buf: &[u8]) -> bool;

    fn role(&self) -> Role;

    fn own_addr(&self) -> NodeAddr;

    /// the leader's address, known only on a joiner
    fn leader_addr(&self) -> Option<NodeAddr>;

    /// the most recent time a datagram was received from a given node, if ever
    fn last_contact(&self, addr: NodeAddr) -> Option<Instant>;

    /// gives the transport a chance to do its own periodic work; called from every `tick()`
    fn pump(&self);
}
