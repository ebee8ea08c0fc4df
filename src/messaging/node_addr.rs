use std::fmt::{Debug, Display, Formatter};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use anyhow::anyhow;
use bytes::{Buf, BufMut};

/// The network address of a mesh node. Mesh-local addresses are IPv6, and they are usually
///  handed out and logged in compressed notation (`fd00::abcd`), so parsing and formatting go
///  through [Ipv6Addr] which handles `::` zero-run elision in both directions.
///
/// On the wire, this is always the 16-byte expanded form.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeAddr(pub Ipv6Addr);

impl NodeAddr {
    pub const SERIALIZED_LEN: usize = 16;

    pub const UNSPECIFIED: NodeAddr = NodeAddr(Ipv6Addr::UNSPECIFIED);

    pub fn octets(&self) -> [u8; 16] {
        self.0.octets()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.0.octets());
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<NodeAddr> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            return Err(anyhow!("buffer underflow: node address needs {} bytes, {} remaining", Self::SERIALIZED_LEN, buf.remaining()));
        }
        let mut octets = [0u8; 16];
        buf.copy_to_slice(&mut octets);
        Ok(NodeAddr(Ipv6Addr::from(octets)))
    }

    /// the UDP endpoint for this node on a mesh where all nodes listen on the same port.
    ///  IPv4-mapped addresses (`::ffff:a.b.c.d`) are reached over IPv4.
    pub fn socket_addr(&self, port: u16) -> SocketAddr {
        match self.0.to_ipv4_mapped() {
            Some(v4) => SocketAddr::from((v4, port)),
            None => SocketAddr::from((self.0, port)),
        }
    }
}

impl Debug for NodeAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

impl Display for NodeAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for NodeAddr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(v6) = Ipv6Addr::from_str(s) {
            return Ok(NodeAddr(v6));
        }
        match Ipv4Addr::from_str(s) {
            Ok(v4) => Ok(NodeAddr(v4.to_ipv6_mapped())),
            Err(_) => Err(anyhow!("not a valid node address: {:?}", s)),
        }
    }
}

impl From<Ipv6Addr> for NodeAddr {
    fn from(value: Ipv6Addr) -> Self {
        NodeAddr(value)
    }
}

impl From<Ipv4Addr> for NodeAddr {
    fn from(value: Ipv4Addr) -> Self {
        NodeAddr(value.to_ipv6_mapped())
    }
}

impl From<SocketAddr> for NodeAddr {
    fn from(value: SocketAddr) -> Self {
        match value {
            SocketAddr::V4(s) => NodeAddr::from(*s.ip()),
            SocketAddr::V6(s) => NodeAddr(*s.ip()),
        }
    }
}

impl From<[u8; 16]> for NodeAddr {
    fn from(value: [u8; 16]) -> Self {
        NodeAddr(Ipv6Addr::from(value))
    }
}
