use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

use tracing::trace;

use crate::error::{Result, TransportError};
use crate::message::{InboundMessage, PROTOCOL_ERROR_ID};

/// What a waiter eventually receives: the matching reply or the failure
/// that ended it.
pub(crate) type Delivery = std::result::Result<InboundMessage, TransportError>;

/// Identifies one registration, independent of its correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WaiterToken(u64);

struct Waiter {
    token: WaiterToken,
    id: u32,
    slot: SyncSender<Delivery>,
}

impl Waiter {
    fn deliver(self, delivery: Delivery) {
        // The caller may have given up (timeout); nothing left to wake.
        let _ = self.slot.try_send(delivery);
    }
}

/// Outstanding requests, in registration order.
///
/// Always accessed under the transport's dispatch lock. Each waiter is
/// removed the moment it is delivered to, so it sees exactly one delivery.
#[derive(Default)]
pub(crate) struct Registry {
    waiters: Vec<Waiter>,
    next_token: u64,
    closed: bool,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a waiter for `id` and return the receiving end of its slot.
    pub(crate) fn register(&mut self, id: u32) -> Result<(WaiterToken, Receiver<Delivery>)> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if id == PROTOCOL_ERROR_ID {
            return Err(TransportError::ReservedId(id));
        }
        if self.waiters.iter().any(|waiter| waiter.id == id) {
            return Err(TransportError::DuplicateId(id));
        }

        let token = WaiterToken(self.next_token);
        self.next_token += 1;
        let (slot, receiver) = sync_channel(1);
        self.waiters.push(Waiter { token, id, slot });
        Ok((token, receiver))
    }

    /// Remove a waiter without delivering to it. Returns false if it was
    /// already gone.
    pub(crate) fn unregister(&mut self, token: WaiterToken) -> bool {
        match self.waiters.iter().position(|waiter| waiter.token == token) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    /// Offer an inbound message to every pending waiter.
    ///
    /// A sentinel-id protocol error fails all of them. Otherwise only waiters
    /// whose id equals the message's correlation id are resolved; the rest
    /// stay pending. Returns the number of waiters delivered to.
    pub(crate) fn dispatch(&mut self, message: &InboundMessage) -> usize {
        if let Some(failure) = message.protocol_failure() {
            return self.broadcast(&TransportError::Protocol(failure.message));
        }

        let Some(id) = message.correlation_id() else {
            return 0;
        };

        let mut delivered = 0;
        let mut index = 0;
        while index < self.waiters.len() {
            if self.waiters[index].id == id {
                let waiter = self.waiters.remove(index);
                trace!(id, kind = %message.kind, "delivering reply");
                waiter.deliver(Ok(message.clone()));
                delivered += 1;
            } else {
                index += 1;
            }
        }
        delivered
    }

    /// Fail every pending waiter with `error`.
    pub(crate) fn broadcast(&mut self, error: &TransportError) -> usize {
        let count = self.waiters.len();
        for waiter in self.waiters.drain(..) {
            waiter.deliver(Err(error.clone()));
        }
        count
    }

    /// Refuse further registrations and drop pending waiters undelivered.
    ///
    /// Dropped waiters observe a disconnected slot.
    pub(crate) fn close(&mut self) -> usize {
        self.closed = true;
        let count = self.waiters.len();
        self.waiters.clear();
        count
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    #[cfg(test)]
    pub(crate) fn pending_ids(&self) -> Vec<u32> {
        self.waiters.iter().map(|waiter| waiter.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::TryRecvError;
    use std::sync::Arc;

    use serde_json::json;
    use workerpipe_frame::FrameError;

    use super::*;

    fn reply(id: u32) -> InboundMessage {
        InboundMessage::new("compile_response", json!({ "compilation_id": id }))
    }

    #[test]
    fn matching_reply_resolves_only_its_waiter() {
        let mut registry = Registry::new();
        let (_, first) = registry.register(1).unwrap();
        let (_, second) = registry.register(2).unwrap();

        assert_eq!(registry.dispatch(&reply(2)), 1);

        let delivered = second.try_recv().unwrap().unwrap();
        assert_eq!(delivered.correlation_id(), Some(2));
        assert!(matches!(first.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(registry.pending_ids(), vec![1]);
    }

    #[test]
    fn unmatched_reply_leaves_registry_unchanged() {
        let mut registry = Registry::new();
        let (_, first) = registry.register(1).unwrap();
        let (_, second) = registry.register(2).unwrap();

        assert_eq!(registry.dispatch(&reply(99)), 0);
        assert_eq!(
            registry.dispatch(&InboundMessage::new("log_event", json!({}))),
            0
        );

        assert_eq!(registry.pending_ids(), vec![1, 2]);
        assert!(matches!(first.try_recv(), Err(TryRecvError::Empty)));
        assert!(matches!(second.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn protocol_error_fails_every_waiter() {
        let mut registry = Registry::new();
        let receivers: Vec<_> = (1..=3)
            .map(|id| registry.register(id).unwrap().1)
            .collect();

        let failure = InboundMessage::protocol_error(PROTOCOL_ERROR_ID, "unknown message type");
        assert_eq!(registry.dispatch(&failure), 3);
        assert_eq!(registry.len(), 0);
        assert!(!registry.is_closed());

        for receiver in receivers {
            match receiver.try_recv().unwrap() {
                Err(TransportError::Protocol(message)) => {
                    assert_eq!(message, "unknown message type")
                }
                other => panic!("expected protocol error, got {other:?}"),
            }
        }

        // Still open for new work.
        assert!(registry.register(4).is_ok());
    }

    #[test]
    fn scoped_error_is_ordinary_reply() {
        let mut registry = Registry::new();
        let (_, other) = registry.register(3).unwrap();
        let (_, target) = registry.register(8).unwrap();

        assert_eq!(
            registry.dispatch(&InboundMessage::protocol_error(8, "bad params")),
            1
        );

        let delivered = target.try_recv().unwrap().unwrap();
        assert_eq!(delivered.error().unwrap().message, "bad params");
        assert!(matches!(other.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn broadcast_delivers_same_failure_to_all() {
        let mut registry = Registry::new();
        let (_, a) = registry.register(1).unwrap();
        let (_, b) = registry.register(2).unwrap();

        let failure = TransportError::from(FrameError::ConnectionClosed);
        assert_eq!(registry.broadcast(&failure), 2);

        for receiver in [a, b] {
            match receiver.try_recv().unwrap() {
                Err(TransportError::Stream(err)) => {
                    assert!(matches!(*err, FrameError::ConnectionClosed))
                }
                other => panic!("expected stream failure, got {other:?}"),
            }
        }
    }

    #[test]
    fn each_waiter_sees_exactly_one_delivery() {
        let mut registry = Registry::new();
        let (_, receiver) = registry.register(5).unwrap();

        assert_eq!(registry.dispatch(&reply(5)), 1);
        assert_eq!(registry.dispatch(&reply(5)), 0);
        assert_eq!(
            registry.broadcast(&TransportError::Protocol("late".to_string())),
            0
        );

        assert!(receiver.try_recv().unwrap().is_ok());
        assert!(matches!(
            receiver.try_recv(),
            Err(TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn register_rejects_reserved_and_duplicate_ids() {
        let mut registry = Registry::new();
        let (token, _rx) = registry.register(7).unwrap();

        assert!(matches!(
            registry.register(7),
            Err(TransportError::DuplicateId(7))
        ));
        assert!(matches!(
            registry.register(PROTOCOL_ERROR_ID),
            Err(TransportError::ReservedId(_))
        ));

        assert!(registry.unregister(token));
        assert!(registry.register(7).is_ok());
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut registry = Registry::new();
        let (token, _rx) = registry.register(1).unwrap();

        assert!(registry.unregister(token));
        assert!(!registry.unregister(token));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn close_drops_waiters_without_delivery() {
        let mut registry = Registry::new();
        let (_, receiver) = registry.register(1).unwrap();

        assert_eq!(registry.close(), 1);
        assert!(registry.is_closed());
        assert!(matches!(
            receiver.try_recv(),
            Err(TryRecvError::Disconnected)
        ));
        assert!(matches!(registry.register(2), Err(TransportError::Closed)));
    }

    #[test]
    fn delivery_to_abandoned_waiter_is_ignored() {
        let mut registry = Registry::new();
        let (_, receiver) = registry.register(1).unwrap();
        drop(receiver);

        assert_eq!(registry.dispatch(&reply(1)), 1);
        assert_eq!(registry.len(), 0);

        let shared = Arc::new(FrameError::ConnectionClosed);
        assert_eq!(
            registry.broadcast(&TransportError::Stream(shared)),
            0
        );
    }
}
