use std::net::Ipv6Addr;
use crate::messaging::node_addr::NodeAddr;

/// convenience method for unit test code: create a [NodeAddr] based on a number, the same number
///  generating the same address and different numbers different addresses
pub fn test_node_addr_from_number(number: u16) -> NodeAddr {
    NodeAddr(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, number))
}
