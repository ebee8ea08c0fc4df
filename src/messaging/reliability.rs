use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::messaging::logical_addr::LogicalAddr;
use crate::messaging::node_addr::NodeAddr;
use crate::messaging::packet::{Packet, PacketFlags};
use crate::messaging::transport::MeshTransport;

/// A reliable send awaiting acknowledgement. It keeps everything needed to rebuild the
///  identical packet for retransmission.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingSend {
    pub destination: NodeAddr,
    pub origin: NodeAddr,
    pub logical_addr: LogicalAddr,
    pub action: u8,
    pub payload: Bytes,
    pub sequence: u16,
    pub next_due: Instant,
    pub timeout: Duration,
    pub retries_left: u8,
}

impl PendingSend {
    pub fn packet(&self) -> Packet {
        Packet::new(self.origin, PacketFlags::RELIABLE, self.sequence, self.logical_addr, self.action, self.payload.clone())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
struct SeenKey {
    origin: NodeAddr,
    sequence: u16,
}

/// Sequence allocation, pending acknowledgements with retries, and duplicate detection for
///  received reliable packets.
///
/// Everything here is driven by the caller: there is no timer, retries happen only when
///  [ReliabilityEngine::tick] is called, so their precision depends on how often that is.
pub struct ReliabilityEngine {
    retry_timeout: Duration,
    max_retries: u8,
    seen_retention: Duration,
    max_pending: usize,

    /// next candidate for allocation, never 0
    next_sequence: u16,
    pending: BTreeMap<u16, PendingSend>,

    seen: FxHashMap<SeenKey, Instant>,
    last_seen_sweep: Instant,
}

impl ReliabilityEngine {
    /// sequence number 0 means 'no sequence', it is used for unreliable packets
    pub const NO_SEQUENCE: u16 = 0;

    pub fn new(config: &EngineConfig) -> ReliabilityEngine {
        ReliabilityEngine {
            retry_timeout: config.retry_timeout,
            max_retries: config.max_retries,
            seen_retention: config.seen_retention,
            max_pending: config.max_pending,
            next_sequence: 1,
            pending: BTreeMap::default(),
            seen: FxHashMap::default(),
            last_seen_sweep: Instant::now(),
        }
    }

    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    pub fn num_seen(&self) -> usize {
        self.seen.len()
    }

    pub fn get_pending(&self, sequence: u16) -> Option<&PendingSend> {
        self.pending.get(&sequence)
    }

    /// Returns the next sequence number that has no pending send, skipping 0 on wrap-around, or
    ///  `None` if the configured maximum number of sends is pending.
    pub fn allocate_sequence(&mut self) -> Option<u16> {
        if self.pending.len() >= self.max_pending {
            debug!("{} reliable sends pending - refusing to allocate a sequence number", self.pending.len());
            return None;
        }

        // terminates because max_pending is below the number of usable sequence numbers
        loop {
            let candidate = self.next_sequence;
            self.next_sequence = match self.next_sequence.wrapping_add(1) {
                Self::NO_SEQUENCE => 1,
                n => n,
            };

            if self.pending.contains_key(&candidate) {
                trace!(seq = candidate, "sequence number still pending - skipping");
                continue;
            }
            return Some(candidate);
        }
    }

    pub fn register_pending(
        &mut self,
        destination: NodeAddr,
        origin: NodeAddr,
        logical_addr: LogicalAddr,
        action: u8,
        payload: Bytes,
        sequence: u16,
        now: Instant,
    ) -> anyhow::Result<()> {
        match self.pending.entry(sequence) {
            Entry::Occupied(_) => {
                Err(anyhow!("sequence number {} is already pending", sequence))
            }
            Entry::Vacant(e) => {
                trace!(seq = sequence, ?destination, ?logical_addr, "registering pending send");
                e.insert(PendingSend {
                    destination,
                    origin,
                    logical_addr,
                    action,
                    payload,
                    sequence,
                    next_due: now + self.retry_timeout,
                    timeout: self.retry_timeout,
                    retries_left: self.max_retries,
                });
                Ok(())
            }
        }
    }

    /// Resolves a pending send. Unknown or already resolved sequence numbers (late or
    ///  duplicate acknowledgements) return `None`.
    pub fn on_acknowledged(&mut self, sequence: u16) -> Option<PendingSend> {
        let resolved = self.pending.remove(&sequence);
        if resolved.is_none() {
            debug!(seq = sequence, "acknowledgement for unknown or resolved sequence number");
        }
        resolved
    }

    /// Retransmits all pending sends that are due, returning those that have exhausted their
    ///  retries. An entry fails in the same sweep that sends its last retry, so a send that is
    ///  never acknowledged is transmitted `1 + max_retries` times.
    pub fn tick<T: MeshTransport + ?Sized>(&mut self, now: Instant, transport: &T) -> Vec<PendingSend> {
        let mut failed = Vec::new();

        for p in self.pending.values_mut() {
            if p.next_due > now {
                continue;
            }

            if p.retries_left > 0 {
                trace!(seq = p.sequence, to = ?p.destination, retries_left = p.retries_left, "retransmitting");
                if !transport.send_datagram(p.destination, &p.packet().to_bytes()) {
                    warn!(seq = p.sequence, to = ?p.destination, "transport rejected retransmission");
                }
                p.retries_left -= 1;
                p.next_due = now + p.timeout;
            }

            if p.retries_left == 0 {
                failed.push(p.sequence);
            }
        }

        let failed = failed.into_iter()
            .filter_map(|seq| self.pending.remove(&seq))
            .collect::<Vec<_>>();
        for p in &failed {
            info!(seq = p.sequence, to = ?p.destination, logical_addr = ?p.logical_addr, "no acknowledgement - giving up");
        }

        if now.saturating_duration_since(self.last_seen_sweep) >= self.retry_timeout {
            self.evict_seen(now);
            self.last_seen_sweep = now;
        }

        failed
    }

    /// Returns `true` if a reliable packet was already received within the retention window,
    ///  refreshing its timestamp. Otherwise the packet is recorded and `false` is returned.
    pub fn was_seen_and_mark(&mut self, origin: NodeAddr, sequence: u16, now: Instant) -> bool {
        let key = SeenKey { origin, sequence };
        let retention = self.seen_retention;

        match self.seen.insert(key, now) {
            Some(prev) => now.saturating_duration_since(prev) < retention,
            None => false,
        }
    }

    /// drops all seen entries older than the retention window, returning their number
    pub fn evict_seen(&mut self, now: Instant) -> usize {
        let retention = self.seen_retention;
        let before = self.seen.len();
        self.seen.retain(|_, &mut seen_at| now.saturating_duration_since(seen_at) < retention);

        let evicted = before - self.seen.len();
        if evicted > 0 {
            trace!("evicted {} expired entries from the seen window", evicted);
        }
        evicted
    }
}
