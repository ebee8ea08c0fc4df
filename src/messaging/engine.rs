use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::EngineConfig;
use crate::messaging::address_book::AddressBook;
use crate::messaging::dispatcher::{dispatch, DispatchContext, DispatchOutcome};
use crate::messaging::handler::{Callbacks, MessageHandler};
use crate::messaging::logical_addr::LogicalAddr;
use crate::messaging::node_addr::NodeAddr;
use crate::messaging::packet::{Packet, PacketFlags};
use crate::messaging::reliability::ReliabilityEngine;
use crate::messaging::transport::{MeshTransport, Role};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum SendError {
    #[error("the announcement address is reserved")]
    ReservedAddress,
    #[error("no owner is known for the logical address")]
    UnknownAddress,
    #[error("the leader's address is not known")]
    NoLeader,
    #[error("not connected to a mesh")]
    NotConnected,
    #[error("too many reliable sends are awaiting acknowledgement")]
    TooManyPending,
    #[error("the transport rejected the datagram")]
    TransportRejected,
}

/// The protocol engine for a single node. It owns the address book (used on the leader), the
///  reliability state and the application's [MessageHandler], and it talks to the mesh
///  through a [MeshTransport].
///
/// The engine does no locking and never blocks: the host must call [ProtocolEngine::on_datagram],
///  [ProtocolEngine::on_peer_joined] and [ProtocolEngine::tick] from a single run loop. Retries
///  happen only inside `tick()`.
pub struct ProtocolEngine<T: MeshTransport> {
    config: EngineConfig,
    transport: T,
    address_book: AddressBook,
    reliability: ReliabilityEngine,
    local_identities: Vec<LogicalAddr>,
    handler: Box<dyn MessageHandler>,
}

impl<T: MeshTransport> ProtocolEngine<T> {
    pub fn new(transport: T, config: EngineConfig) -> anyhow::Result<ProtocolEngine<T>> {
        config.validate()?;

        Ok(ProtocolEngine {
            reliability: ReliabilityEngine::new(&config),
            config,
            transport,
            address_book: AddressBook::new(),
            local_identities: Vec::new(),
            handler: Box::new(Callbacks::new()),
        })
    }

    pub fn set_handler(&mut self, handler: impl MessageHandler + 'static) {
        self.handler = Box::new(handler);
    }

    /// The logical addresses this node owns. They are advertised to the leader when this node
    ///  joins the mesh.
    pub fn define_local_identities(&mut self, identities: impl IntoIterator<Item = LogicalAddr>) {
        self.local_identities = identities.into_iter()
            .filter(|a| {
                if a.is_reserved() {
                    warn!("the announcement address can not be a local identity - skipping");
                    false
                }
                else {
                    true
                }
            })
            .collect();
        debug!("local identities: {:?}", self.local_identities);
    }

    pub fn local_identities(&self) -> &[LogicalAddr] {
        &self.local_identities
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn address_book(&self) -> &AddressBook {
        &self.address_book
    }

    pub fn num_pending(&self) -> usize {
        self.reliability.num_pending()
    }

    /// Sends a message to a logical address, returning `true` if the transport accepted it.
    ///  For reliable sends that return `true`, the outcome is reported later through the
    ///  handler's `on_ack_success` or `on_ack_fail`.
    pub fn send(&mut self, reliable: bool, logical_addr: LogicalAddr, action: u8, payload: &[u8]) -> bool {
        match self.try_send(reliable, logical_addr, action, payload) {
            Ok(_) => true,
            Err(e) => {
                warn!(?logical_addr, action, "error sending message: {}", e);
                false
            }
        }
    }

    /// Like [ProtocolEngine::send], but returns the allocated sequence number (0 for unreliable
    ///  sends) or the reason for not sending.
    pub fn try_send(&mut self, reliable: bool, logical_addr: LogicalAddr, action: u8, payload: &[u8]) -> Result<u16, SendError> {
        if logical_addr.is_reserved() {
            return Err(SendError::ReservedAddress);
        }

        let destination = self.resolve_destination(logical_addr)?;
        self.send_to(destination, reliable, logical_addr, action, Bytes::copy_from_slice(payload))
    }

    fn resolve_destination(&self, logical_addr: LogicalAddr) -> Result<NodeAddr, SendError> {
        match self.transport.role() {
            Role::Leader => self.address_book.lookup(logical_addr)
                .ok_or(SendError::UnknownAddress),
            // the leader forwards to the owner
            Role::Joiner => self.transport.leader_addr()
                .ok_or(SendError::NoLeader),
            Role::Detached => Err(SendError::NotConnected),
        }
    }

    fn send_to(&mut self, destination: NodeAddr, reliable: bool, logical_addr: LogicalAddr, action: u8, payload: Bytes) -> Result<u16, SendError> {
        let myself = self.transport.own_addr();

        let (flags, sequence) = if reliable {
            let sequence = self.reliability.allocate_sequence()
                .ok_or(SendError::TooManyPending)?;
            (PacketFlags::RELIABLE, sequence)
        }
        else {
            (PacketFlags::empty(), ReliabilityEngine::NO_SEQUENCE)
        };

        let packet = Packet::new(myself, flags, sequence, logical_addr, action, payload);
        trace!(to = ?destination, ?logical_addr, action, seq = sequence, reliable, "sending packet");
        if !self.transport.send_datagram(destination, &packet.to_bytes()) {
            return Err(SendError::TransportRejected);
        }

        if reliable {
            if let Err(e) = self.reliability.register_pending(destination, myself, logical_addr, action, packet.payload, sequence, Instant::now()) {
                // the sequence number was allocated as free, so this is a bug
                error!("error tracking reliable send: {}", e);
            }
        }
        Ok(sequence)
    }

    /// Processes a datagram received from the mesh. `from` is the transport-level sender,
    ///  which differs from the packet's origin for packets relayed by the leader. Malformed
    ///  packets are logged and dropped.
    pub fn on_datagram(&mut self, from: NodeAddr, raw: &[u8]) -> Option<DispatchOutcome> {
        let packet = match Packet::deser(raw) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(?from, "dropping malformed packet: {}", e);
                return None;
            }
        };
        trace!(?from, origin = ?packet.origin, flags = ?packet.flags, seq = packet.sequence, "received packet");

        let mut ctx = DispatchContext {
            transport: &self.transport,
            address_book: &mut self.address_book,
            reliability: &mut self.reliability,
            handler: self.handler.as_mut(),
            now: Instant::now(),
        };
        Some(dispatch(&mut ctx, raw, &packet))
    }

    /// Join notification from the transport. On a joiner, this announces all local identities
    ///  to the peer, reliably. The credential hash is for transport-level authentication and
    ///  only logged here.
    ///
    /// Returns the announcement's sequence number if one was sent.
    pub fn on_peer_joined(&mut self, peer: NodeAddr, credential_hash: &[u8]) -> Option<u16> {
        if self.transport.role() != Role::Joiner {
            trace!(?peer, "peer joined - not announcing since this node is not a joiner");
            return None;
        }
        debug!(?peer, credential_hash_len = credential_hash.len(), "joined mesh - announcing local identities");

        let mut payload = BytesMut::with_capacity(self.local_identities.len() * LogicalAddr::TUPLE_LEN);
        LogicalAddr::ser_announcement(&self.local_identities, &mut payload);

        match self.send_to(peer, true, LogicalAddr::ANNOUNCEMENT, LogicalAddr::ANNOUNCEMENT_ACTION, payload.freeze()) {
            Ok(sequence) => {
                info!(?peer, seq = sequence, "announced {} local identities", self.local_identities.len());
                Some(sequence)
            }
            Err(e) => {
                warn!(?peer, "error sending announcement: {}", e);
                None
            }
        }
    }

    /// Drives the transport and retransmits due reliable sends, reporting the sends that
    ///  exhausted their retries to the handler.
    pub fn tick(&mut self) {
        self.transport.pump();

        for failed in self.reliability.tick(Instant::now(), &self.transport) {
            if failed.logical_addr.is_reserved() {
                // announcements are never acknowledged, their retries just repeat them
                debug!(seq = failed.sequence, to = ?failed.destination, "announcement retries done");
                continue;
            }
            self.handler.on_ack_fail(failed.logical_addr, failed.action, failed.sequence);
        }
    }
}
