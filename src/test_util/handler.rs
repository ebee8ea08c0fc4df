use std::cell::RefCell;
use std::rc::Rc;

use crate::messaging::handler::MessageHandler;
use crate::messaging::logical_addr::LogicalAddr;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HandlerEvent {
    Message { logical_addr: LogicalAddr, action: u8, payload: Vec<u8> },
    AckSuccess { logical_addr: LogicalAddr, action: u8, sequence: u16 },
    AckFail { logical_addr: LogicalAddr, action: u8, sequence: u16 },
}

/// A [MessageHandler] that records all callbacks. Clones share their recordings, so a test
///  can hand one clone to an engine and inspect events through another.
#[derive(Clone, Debug, Default)]
pub struct RecordingHandler {
    events: Rc<RefCell<Vec<HandlerEvent>>>,
}

impl RecordingHandler {
    pub fn new() -> RecordingHandler {
        Default::default()
    }

    /// returns recorded events, clearing the internal buffer
    pub fn take_events(&self) -> Vec<HandlerEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    pub fn num_events(&self) -> usize {
        self.events.borrow().len()
    }
}

impl MessageHandler for RecordingHandler {
    fn on_message(&mut self, logical_addr: LogicalAddr, action: u8, payload: &[u8]) {
        self.events.borrow_mut().push(HandlerEvent::Message { logical_addr, action, payload: payload.to_vec() });
    }

    fn on_ack_success(&mut self, logical_addr: LogicalAddr, action: u8, sequence: u16) {
        self.events.borrow_mut().push(HandlerEvent::AckSuccess { logical_addr, action, sequence });
    }

    fn on_ack_fail(&mut self, logical_addr: LogicalAddr, action: u8, sequence: u16) {
        self.events.borrow_mut().push(HandlerEvent::AckFail { logical_addr, action, sequence });
    }
}
