use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::messaging::address_book::AddressBook;
use crate::messaging::handler::MessageHandler;
use crate::messaging::logical_addr::LogicalAddr;
use crate::messaging::node_addr::NodeAddr;
use crate::messaging::packet::Packet;
use crate::messaging::reliability::ReliabilityEngine;
use crate::messaging::transport::{MeshTransport, Role};

/// What an inbound packet is, in order of precedence. This depends only on the packet, the
///  node's role and (on the leader) the address book.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InboundKind {
    Announcement,
    /// an announcement received by a node that is not the leader
    IgnoredAnnouncement,
    /// leader only: the logical address is owned by a node other than the packet's origin
    Forward { owner: NodeAddr },
    Ack,
    ReliableRequest,
    Plain,
}

pub fn classify(role: Role, packet: &Packet, address_book: &AddressBook) -> InboundKind {
    if packet.is_announcement() {
        return if role == Role::Leader {
            InboundKind::Announcement
        }
        else {
            InboundKind::IgnoredAnnouncement
        };
    }

    if role == Role::Leader {
        if let Some(owner) = address_book.lookup(packet.logical_addr) {
            if owner != packet.origin {
                return InboundKind::Forward { owner };
            }
        }
    }

    if packet.is_ack() {
        InboundKind::Ack
    }
    else if packet.is_reliable() {
        InboundKind::ReliableRequest
    }
    else {
        InboundKind::Plain
    }
}

/// The observable result of dispatching one inbound packet
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DispatchOutcome {
    Announced { registered: Vec<LogicalAddr> },
    IgnoredAnnouncement,
    Forwarded { owner: NodeAddr, accepted: bool },
    Acknowledged { sequence: u16 },
    UnknownAck { sequence: u16 },
    DuplicateSuppressed { sequence: u16 },
    /// handed to the application; `ack_sent` is `Some` for reliable requests, with the
    ///  transport's verdict on the acknowledgement
    Delivered { ack_sent: Option<bool> },
}

/// The engine state a dispatch works on. It is assembled per inbound packet from the
///  [crate::messaging::engine::ProtocolEngine]'s fields.
pub struct DispatchContext<'a, T: MeshTransport + ?Sized> {
    pub transport: &'a T,
    pub address_book: &'a mut AddressBook,
    pub reliability: &'a mut ReliabilityEngine,
    pub handler: &'a mut dyn MessageHandler,
    pub now: Instant,
}

/// Processes a parsed inbound packet. `raw` are the packet's original bytes, which are relayed
///  unchanged when the packet is forwarded.
///
/// Side effects are limited to address book updates for announcements, at most one outbound
///  datagram (a relay or an acknowledgement), and at most one application callback. A duplicate
///  reliable packet is acknowledged again but not delivered again.
pub fn dispatch<T: MeshTransport + ?Sized>(ctx: &mut DispatchContext<T>, raw: &[u8], packet: &Packet) -> DispatchOutcome {
    let role = ctx.transport.role();
    let kind = classify(role, packet, ctx.address_book);
    trace!(?kind, origin = ?packet.origin, logical_addr = ?packet.logical_addr, action = packet.action, seq = packet.sequence, "dispatching packet");

    match kind {
        InboundKind::Announcement => {
            let registered = LogicalAddr::deser_announcement(&packet.payload);
            debug!(origin = ?packet.origin, "announcement of {} logical addresses", registered.len());
            for &logical_addr in &registered {
                ctx.address_book.register(logical_addr, packet.origin);
            }
            DispatchOutcome::Announced { registered }
        }
        InboundKind::IgnoredAnnouncement => {
            trace!(origin = ?packet.origin, "ignoring announcement - not the leader");
            DispatchOutcome::IgnoredAnnouncement
        }
        InboundKind::Forward { owner } => {
            debug!(logical_addr = ?packet.logical_addr, ?owner, "forwarding packet");
            let accepted = ctx.transport.send_datagram(owner, raw);
            if !accepted {
                warn!(logical_addr = ?packet.logical_addr, ?owner, "transport rejected forwarded packet");
            }
            DispatchOutcome::Forwarded { owner, accepted }
        }
        InboundKind::Ack => {
            match ctx.reliability.on_acknowledged(packet.sequence) {
                Some(resolved) => {
                    trace!(seq = packet.sequence, "acknowledged");
                    if !resolved.logical_addr.is_reserved() {
                        ctx.handler.on_ack_success(resolved.logical_addr, resolved.action, resolved.sequence);
                    }
                    DispatchOutcome::Acknowledged { sequence: packet.sequence }
                }
                None => DispatchOutcome::UnknownAck { sequence: packet.sequence },
            }
        }
        InboundKind::ReliableRequest => {
            // every copy is acknowledged: the sender retransmits because it did not see an ACK
            let ack = packet.ack_for(ctx.transport.own_addr());
            let ack_sent = ctx.transport.send_datagram(packet.origin, &ack.to_bytes());
            if !ack_sent {
                warn!(to = ?packet.origin, seq = packet.sequence, "transport rejected acknowledgement");
            }

            if ctx.reliability.was_seen_and_mark(packet.origin, packet.sequence, ctx.now) {
                debug!(origin = ?packet.origin, seq = packet.sequence, "duplicate reliable packet - suppressed");
                return DispatchOutcome::DuplicateSuppressed { sequence: packet.sequence };
            }

            ctx.handler.on_message(packet.logical_addr, packet.action, &packet.payload);
            DispatchOutcome::Delivered { ack_sent: Some(ack_sent) }
        }
        InboundKind::Plain => {
            ctx.handler.on_message(packet.logical_addr, packet.action, &packet.payload);
            DispatchOutcome::Delivered { ack_sent: None }
        }
    }
}
