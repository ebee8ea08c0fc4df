use std::fmt::{Debug, Display, Formatter};

use bytes::{Buf, BufMut};

/// A logical device address: the kind of device (`thing`) plus the specific instance of it.
///  Nodes address each other through logical addresses; which node owns a given logical
///  address is resolved by the leader's [crate::messaging::address_book::AddressBook].
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LogicalAddr {
    pub thing: u16,
    pub instance_id: u8,
}

impl LogicalAddr {
    /// Reserved for announcements (WHO_AM_I), never used for routing.
    pub const ANNOUNCEMENT: LogicalAddr = LogicalAddr { thing: 0xFFFF, instance_id: 0xFF };
    /// The action code that, combined with [LogicalAddr::ANNOUNCEMENT], marks an announcement.
    pub const ANNOUNCEMENT_ACTION: u8 = 0xFF;

    /// size of a (thing, instance id) tuple in an announcement payload
    pub const TUPLE_LEN: usize = 3;

    pub const fn new(thing: u16, instance_id: u8) -> LogicalAddr {
        LogicalAddr { thing, instance_id }
    }

    pub fn is_reserved(&self) -> bool {
        *self == Self::ANNOUNCEMENT
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.thing);
        buf.put_u8(self.instance_id);
    }

    /// NB: callers check for [LogicalAddr::TUPLE_LEN] remaining bytes
    fn deser(buf: &mut impl Buf) -> LogicalAddr {
        let thing = buf.get_u16();
        let instance_id = buf.get_u8();
        LogicalAddr { thing, instance_id }
    }

    /// Builds an announcement payload: one 3-byte tuple per address, in the given order.
    pub fn ser_announcement<'a>(addrs: impl IntoIterator<Item = &'a LogicalAddr>, buf: &mut impl BufMut) {
        for addr in addrs {
            addr.ser(buf);
        }
    }

    /// Parses an announcement payload into its tuples, in payload order. Trailing bytes that do
    ///  not form a complete tuple are ignored.
    pub fn deser_announcement(mut payload: &[u8]) -> Vec<LogicalAddr> {
        let mut result = Vec::with_capacity(payload.len() / Self::TUPLE_LEN);
        while payload.remaining() >= Self::TUPLE_LEN {
            result.push(Self::deser(&mut payload));
        }
        result
    }
}

impl Debug for LogicalAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04X}:{}", self.thing, self.instance_id)
    }
}

impl Display for LogicalAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}
