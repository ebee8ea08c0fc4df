use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::messaging::logical_addr::LogicalAddr;
use crate::messaging::node_addr::NodeAddr;

/// The leader's routing table from logical addresses to the nodes that own them. It is populated
///  exclusively from announcements, and the most recent announcement wins - node departure is
///  not modelled, so entries are never removed.
#[derive(Debug, Default)]
pub struct AddressBook {
    owners: FxHashMap<LogicalAddr, NodeAddr>,
}

impl AddressBook {
    pub fn new() -> AddressBook {
        Default::default()
    }

    /// returns the previous owner, if any
    pub fn register(&mut self, logical_addr: LogicalAddr, owner: NodeAddr) -> Option<NodeAddr> {
        if logical_addr.is_reserved() {
            debug!(?owner, "ignoring registration of the reserved announcement address");
            return None;
        }

        let prev = self.owners.insert(logical_addr, owner);
        match prev {
            Some(prev) if prev != owner => debug!(?logical_addr, ?prev, ?owner, "logical address changed owner"),
            Some(_) => trace!(?logical_addr, ?owner, "logical address re-registered"),
            None => debug!(?logical_addr, ?owner, "logical address registered"),
        }
        prev
    }

    pub fn lookup(&self, logical_addr: LogicalAddr) -> Option<NodeAddr> {
        self.owners.get(&logical_addr).copied()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// all entries, sorted by logical address
    pub fn entries(&self) -> Vec<(LogicalAddr, NodeAddr)> {
        let mut result = self.owners.iter()
            .map(|(&l, &n)| (l, n))
            .collect::<Vec<_>>();
        result.sort();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::node::test_node_addr_from_number;

    #[test]
    fn test_lookup_unknown() {
        let book = AddressBook::new();
        assert_eq!(book.lookup(LogicalAddr::new(1, 1)), None);
        assert!(book.is_empty());
    }

    #[test]
    fn test_register_last_write_wins() {
        let mut book = AddressBook::new();
        let addr = LogicalAddr::new(0x0010, 2);

        assert_eq!(book.register(addr, test_node_addr_from_number(1)), None);
        assert_eq!(book.lookup(addr), Some(test_node_addr_from_number(1)));

        assert_eq!(book.register(addr, test_node_addr_from_number(2)), Some(test_node_addr_from_number(1)));
        assert_eq!(book.lookup(addr), Some(test_node_addr_from_number(2)));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_instances_are_distinct() {
        let mut book = AddressBook::new();
        book.register(LogicalAddr::new(0x0010, 2), test_node_addr_from_number(1));
        book.register(LogicalAddr::new(0x0010, 5), test_node_addr_from_number(2));

        assert_eq!(book.lookup(LogicalAddr::new(0x0010, 2)), Some(test_node_addr_from_number(1)));
        assert_eq!(book.lookup(LogicalAddr::new(0x0010, 5)), Some(test_node_addr_from_number(2)));
        assert_eq!(book.lookup(LogicalAddr::new(0x0010, 3)), None);
    }

    #[test]
    fn test_reserved_address_is_not_registered() {
        let mut book = AddressBook::new();
        assert_eq!(book.register(LogicalAddr::ANNOUNCEMENT, test_node_addr_from_number(1)), None);
        assert_eq!(book.lookup(LogicalAddr::ANNOUNCEMENT), None);
        assert!(book.is_empty());
    }

    #[test]
    fn test_entries_sorted() {
        let mut book = AddressBook::new();
        book.register(LogicalAddr::new(0x0020, 1), test_node_addr_from_number(3));
        book.register(LogicalAddr::new(0x0010, 5), test_node_addr_from_number(2));
        book.register(LogicalAddr::new(0x0010, 2), test_node_addr_from_number(1));

        assert_eq!(book.entries(), vec![
            (LogicalAddr::new(0x0010, 2), test_node_addr_from_number(1)),
            (LogicalAddr::new(0x0010, 5), test_node_addr_from_number(2)),
            (LogicalAddr::new(0x0020, 1), test_node_addr_from_number(3)),
        ]);
    }
}
