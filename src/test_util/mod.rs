//! Utilities for testing code that uses the protocol engine. They are used for the crate's own
//!  tests, and they are exported for application testing as well, which is why they are part
//!  of the crate's regular (non-#[cfg(test)]) code.

pub mod node;
pub mod transport;
pub mod handler;
