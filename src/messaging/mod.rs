pub mod node_addr;
pub mod logical_addr;
pub mod packet;
pub mod address_book;
pub mod reliability;
pub mod dispatcher;
pub mod engine;
pub mod handler;
pub mod transport;
