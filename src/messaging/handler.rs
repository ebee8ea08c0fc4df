#[cfg(test)] use mockall::automock;

use crate::messaging::logical_addr::LogicalAddr;

/// Application callbacks. They are invoked synchronously from within
///  [crate::messaging::engine::ProtocolEngine::on_datagram] and
///  [crate::messaging::engine::ProtocolEngine::tick].
///
/// For every reliable send that was accepted, exactly one of `on_ack_success` and `on_ack_fail`
///  is called exactly once, unless the engine is dropped first.
#[cfg_attr(test, automock)]
pub trait MessageHandler {
    /// a message was received for a logical address owned by this node (or, on the leader, for
    ///  an address that is not owned by some other node)
    fn on_message(&mut self, logical_addr: LogicalAddr, action: u8, payload: &[u8]);

    fn on_ack_success(&mut self, logical_addr: LogicalAddr, action: u8, sequence: u16);

    /// all retries for a reliable send are exhausted without an acknowledgement
    fn on_ack_fail(&mut self, logical_addr: LogicalAddr, action: u8, sequence: u16);
}

type MessageCallback = Box<dyn FnMut(LogicalAddr, u8, &[u8])>;
type AckCallback = Box<dyn FnMut(LogicalAddr, u8, u16)>;

/// A [MessageHandler] built from closures, for applications that prefer registering callbacks
///  one at a time. Callbacks that were not registered are no-ops.
#[derive(Default)]
pub struct Callbacks {
    message: Option<MessageCallback>,
    ack_success: Option<AckCallback>,
    ack_fail: Option<AckCallback>,
}

impl Callbacks {
    pub fn new() -> Callbacks {
        Default::default()
    }

    pub fn with_message(mut self, cb: impl FnMut(LogicalAddr, u8, &[u8]) + 'static) -> Self {
        self.message = Some(Box::new(cb));
        self
    }

    pub fn with_ack_success(mut self, cb: impl FnMut(LogicalAddr, u8, u16) + 'static) -> Self {
        self.ack_success = Some(Box::new(cb));
        self
    }

    pub fn with_ack_fail(mut self, cb: impl FnMut(LogicalAddr, u8, u16) + 'static) -> Self {
        self.ack_fail = Some(Box::new(cb));
        self
    }
}

impl MessageHandler for Callbacks {
    fn on_message(&mut self, logical_addr: LogicalAddr, action: u8, payload: &[u8]) {
        if let Some(cb) = &mut self.message {
            cb(logical_addr, action, payload);
        }
    }

    fn on_ack_success(&mut self, logical_addr: LogicalAddr, action: u8, sequence: u16) {
        if let Some(cb) = &mut self.ack_success {
            cb(logical_addr, action, sequence);
        }
    }

    fn on_ack_fail(&mut self, logical_addr: LogicalAddr, action: u8, sequence: u16) {
        if let Some(cb) = &mut self.ack_fail {
            cb(logical_addr, action, sequence);
        }
    }
}
