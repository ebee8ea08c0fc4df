//! Wire format of a packet - all numbers in network byte order (BE):
//!
//! ```ascii
//!  0: version (u8) - 1 for this revision
//!  1: origin node address (16 bytes) - the original sender, not necessarily the
//!      immediate transport-level hop
//! 17: flags (u8): bit 0 ACK, bit 1 RELIABLE
//! 18: sequence (u16) - 0 for 'no sequence', i.e. unreliable
//! 20: thing (u16)
//! 22: instance id (u8)
//! 23: action (u8)
//! 24: payload (opaque, length implied by the datagram length)
//! ```

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::messaging::logical_addr::LogicalAddr;
use crate::messaging::node_addr::NodeAddr;

bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
    pub struct PacketFlags: u8 {
        const ACK = 0x01;
        const RELIABLE = 0x02;
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum FormatError {
    #[error("packet too short: {actual} bytes, header requires {}", Packet::HEADER_LEN)]
    TooShort { actual: usize },
    #[error("unsupported protocol version {found}")]
    UnsupportedVersion { found: u8 },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    pub version: u8,
    pub origin: NodeAddr,
    pub flags: PacketFlags,
    pub sequence: u16,
    pub logical_addr: LogicalAddr,
    pub action: u8,
    pub payload: Bytes,
}

impl Packet {
    pub const PROTOCOL_VERSION_1: u8 = 1;
    pub const HEADER_LEN: usize = 24;

    pub fn new(origin: NodeAddr, flags: PacketFlags, sequence: u16, logical_addr: LogicalAddr, action: u8, payload: Bytes) -> Packet {
        Packet {
            version: Self::PROTOCOL_VERSION_1,
            origin,
            flags,
            sequence,
            logical_addr,
            action,
            payload,
        }
    }

    /// The acknowledgement for this packet: same sequence, logical address and action, empty
    ///  payload, originating from the acknowledging node.
    pub fn ack_for(&self, myself: NodeAddr) -> Packet {
        Packet::new(myself, PacketFlags::ACK, self.sequence, self.logical_addr, self.action, Bytes::new())
    }

    pub fn is_announcement(&self) -> bool {
        self.logical_addr.is_reserved() && self.action == LogicalAddr::ANNOUNCEMENT_ACTION
    }

    pub fn is_ack(&self) -> bool {
        self.flags.contains(PacketFlags::ACK)
    }

    pub fn is_reliable(&self) -> bool {
        self.flags.contains(PacketFlags::RELIABLE)
    }

    pub fn serialized_len(&self) -> usize {
        Self::HEADER_LEN + self.payload.len()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.version);
        self.origin.ser(buf);
        buf.put_u8(self.flags.bits());
        buf.put_u16(self.sequence);
        buf.put_u16(self.logical_addr.thing);
        buf.put_u8(self.logical_addr.instance_id);
        buf.put_u8(self.action);
        buf.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        self.ser(&mut buf);
        buf.freeze()
    }

    /// Parses a complete datagram. Unknown flag bits are retained rather than rejected, but
    ///  an unknown version is rejected since later revisions may change the header layout.
    pub fn deser(raw: &[u8]) -> Result<Packet, FormatError> {
        if raw.len() < Self::HEADER_LEN {
            return Err(FormatError::TooShort { actual: raw.len() });
        }

        let mut buf = raw;
        let version = buf.get_u8();
        if version != Self::PROTOCOL_VERSION_1 {
            return Err(FormatError::UnsupportedVersion { found: version });
        }

        let mut origin = [0u8; NodeAddr::SERIALIZED_LEN];
        buf.copy_to_slice(&mut origin);
        let flags = PacketFlags::from_bits_retain(buf.get_u8());
        let sequence = buf.get_u16();
        let thing = buf.get_u16();
        let instance_id = buf.get_u8();
        let action = buf.get_u8();

        Ok(Packet {
            version,
            origin: NodeAddr::from(origin),
            flags,
            sequence,
            logical_addr: LogicalAddr::new(thing, instance_id),
            action,
            payload: Bytes::copy_from_slice(buf),
        })
    }
}

/// Convenience for building a version 1 packet's wire representation in one call.
pub fn encode(flags: PacketFlags, sequence: u16, logical_addr: LogicalAddr, action: u8, payload: &[u8], myself: NodeAddr) -> Bytes {
    Packet::new(myself, flags, sequence, logical_addr, action, Bytes::copy_from_slice(payload))
        .to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    fn origin() -> NodeAddr {
        NodeAddr::from_str("fd00::abcd").unwrap()
    }

    #[test]
    fn test_ser_layout() {
        let raw = encode(PacketFlags::RELIABLE, 0x1234, LogicalAddr::new(0x0010, 2), 5, &[9, 8], origin());
        assert_eq!(raw.as_ref(), &[
            1,
            0xfd,0,0,0, 0,0,0,0, 0,0,0,0, 0,0,0xab,0xcd,
            2,
            0x12,0x34,
            0x00,0x10,
            2,
            5,
            9,8,
        ]);
    }

    #[rstest]
    #[case::plain(PacketFlags::empty(), 0, LogicalAddr::new(0x0010, 2), 5, vec![9])]
    #[case::reliable(PacketFlags::RELIABLE, 1, LogicalAddr::new(0x0010, 2), 5, vec![])]
    #[case::ack(PacketFlags::ACK, 0xFFFF, LogicalAddr::new(0xABCD, 0), 0, vec![])]
    #[case::announcement(PacketFlags::RELIABLE, 7, LogicalAddr::ANNOUNCEMENT, 0xFF, vec![0x00,0x10,0x02, 0x00,0x10,0x05])]
    #[case::unknown_flag_bits(PacketFlags::from_bits_retain(0x83), 42, LogicalAddr::new(1, 1), 1, vec![1,2,3])]
    #[case::big_payload(PacketFlags::RELIABLE, 300, LogicalAddr::new(0x7777, 0x77), 0x77, vec![0xAA; 1000])]
    fn test_ser_deser(#[case] flags: PacketFlags, #[case] sequence: u16, #[case] logical_addr: LogicalAddr, #[case] action: u8, #[case] payload: Vec<u8>) {
        let raw = encode(flags, sequence, logical_addr, action, &payload, origin());
        assert_eq!(raw.len(), Packet::HEADER_LEN + payload.len());

        let packet = Packet::deser(&raw).unwrap();
        assert_eq!(packet, Packet::new(origin(), flags, sequence, logical_addr, action, Bytes::from(payload)));
        assert_eq!(packet.origin.octets(), origin().octets());
        assert_eq!(packet.to_bytes(), raw);
    }

    #[rstest]
    #[case::empty(0)]
    #[case::one(1)]
    #[case::origin_only(17)]
    #[case::one_short(23)]
    fn test_deser_too_short(#[case] len: usize) {
        let mut raw = vec![0u8; len];
        if len > 0 {
            raw[0] = 1;
        }
        assert_eq!(Packet::deser(&raw), Err(FormatError::TooShort { actual: len }));
    }

    #[rstest]
    #[case::zero(0)]
    #[case::two(2)]
    #[case::max(255)]
    fn test_deser_unsupported_version(#[case] version: u8) {
        let mut raw = encode(PacketFlags::empty(), 0, LogicalAddr::new(1, 1), 1, &[], origin()).to_vec();
        raw[0] = version;
        assert_eq!(Packet::deser(&raw), Err(FormatError::UnsupportedVersion { found: version }));
    }

    #[test]
    fn test_header_only() {
        let raw = encode(PacketFlags::ACK, 3, LogicalAddr::new(1, 2), 3, &[], origin());
        assert_eq!(raw.len(), Packet::HEADER_LEN);
        assert!(Packet::deser(&raw).unwrap().payload.is_empty());
    }

    #[test]
    fn test_ack_for() {
        let request = Packet::new(origin(), PacketFlags::RELIABLE, 17, LogicalAddr::new(0x10, 2), 5, Bytes::from_static(&[1, 2, 3]));
        let me = NodeAddr::from_str("fd00::1").unwrap();

        let ack = request.ack_for(me);
        assert_eq!(ack, Packet::new(me, PacketFlags::ACK, 17, LogicalAddr::new(0x10, 2), 5, Bytes::new()));
        assert!(ack.is_ack());
        assert!(!ack.is_reliable());
    }

    #[rstest]
    #[case::announcement(LogicalAddr::ANNOUNCEMENT, 0xFF, true)]
    #[case::reserved_other_action(LogicalAddr::ANNOUNCEMENT, 0xFE, false)]
    #[case::regular_ff_action(LogicalAddr::new(0x10, 2), 0xFF, false)]
    fn test_is_announcement(#[case] logical_addr: LogicalAddr, #[case] action: u8, #[case] expected: bool) {
        let packet = Packet::new(origin(), PacketFlags::empty(), 0, logical_addr, action, Bytes::new());
        assert_eq!(packet.is_announcement(), expected);
    }
}
