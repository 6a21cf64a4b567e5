//! Endpoint and notification state
//!
//! An endpoint is a synchronous rendezvous point. At any time it is idle,
//! or holds a queue of blocked senders, or a queue of blocked receivers;
//! never both.
//!
//! A notification accumulates signals into one word by bitwise OR. While
//! threads wait on it the word is zero; while the word is non-zero nobody
//! waits.

use crate::slot::ObjectRef;

/// FIFO of blocked threads, linked through the TCBs themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TcbQueue {
    /// First thread, or null.
    pub head: ObjectRef,
    /// Last thread, or null.
    pub tail: ObjectRef,
}

impl TcbQueue {
    /// An empty queue.
    pub const EMPTY: Self = Self {
        head: ObjectRef::NULL,
        tail: ObjectRef::NULL,
    };

    /// Check if no thread is queued.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head.is_null()
    }
}

/// Endpoint state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EndpointState {
    /// No threads waiting.
    #[default]
    Idle = 0,
    /// Threads waiting to send.
    Send = 1,
    /// Threads waiting to receive.
    Recv = 2,
}

/// Endpoint object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct EndpointObject {
    /// Current state.
    pub state: EndpointState,
    /// Blocked threads; empty iff `state` is `Idle`.
    pub queue: TcbQueue,
}

impl EndpointObject {
    /// Create an idle endpoint.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: EndpointState::Idle,
            queue: TcbQueue::EMPTY,
        }
    }

    /// Set the queue, deriving `Idle` when it becomes empty.
    #[inline]
    pub fn set_queue(&mut self, queue: TcbQueue, state: EndpointState) {
        self.queue = queue;
        self.state = if queue.is_empty() {
            EndpointState::Idle
        } else {
            state
        };
    }
}

/// Notification state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum NotificationState {
    /// No pending signal and no waiter.
    #[default]
    Idle = 0,
    /// Threads waiting for a signal.
    Waiting = 1,
    /// Signal word pending.
    Active = 2,
}

/// Notification object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct NotificationObject {
    /// Current state.
    pub state: NotificationState,
    /// Waiting threads (only in `Waiting`).
    pub queue: TcbQueue,
    /// Accumulated badge bits (only in `Active`).
    pub msg_identifier: u64,
    /// Thread this notification is bound to, or null.
    pub bound_tcb: ObjectRef,
}

impl NotificationObject {
    /// Create an idle, unbound notification.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: NotificationState::Idle,
            queue: TcbQueue::EMPTY,
            msg_identifier: 0,
            bound_tcb: ObjectRef::NULL,
        }
    }

    /// Check if a signal is pending.
    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, NotificationState::Active)
    }

    /// Accumulate `badge` into the pending word.
    #[inline]
    pub fn accumulate(&mut self, badge: u64) {
        self.msg_identifier = if self.is_active() {
            self.msg_identifier | badge
        } else {
            badge
        };
        self.state = NotificationState::Active;
    }

    /// Set the waiter queue, deriving `Idle` when it becomes empty.
    #[inline]
    pub fn set_waiters(&mut self, queue: TcbQueue) {
        self.queue = queue;
        self.state = if queue.is_empty() {
            NotificationState::Idle
        } else {
            NotificationState::Waiting
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_idle_when_queue_empties() {
        let mut ep = EndpointObject::new();
        let one = ObjectRef::from_index(4);
        ep.set_queue(TcbQueue { head: one, tail: one }, EndpointState::Send);
        assert_eq!(ep.state, EndpointState::Send);
        ep.set_queue(TcbQueue::EMPTY, EndpointState::Send);
        assert_eq!(ep.state, EndpointState::Idle);
    }

    #[test]
    fn test_notification_accumulates() {
        let mut ntfn = NotificationObject::new();
        ntfn.accumulate(0b01);
        ntfn.accumulate(0b10);
        assert!(ntfn.is_active());
        assert_eq!(ntfn.msg_identifier, 0b11);
    }

    #[test]
    fn test_notification_fresh_signal_replaces_stale_word() {
        let mut ntfn = NotificationObject::new();
        ntfn.msg_identifier = 0xdead;
        ntfn.accumulate(0b100);
        assert_eq!(ntfn.msg_identifier, 0b100);
    }
}
