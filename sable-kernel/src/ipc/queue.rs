//! IPC wait queue operations.
//!
//! Intrusive doubly-linked queues of threads blocked on an endpoint or
//! notification, linked through the `ep_next` and `ep_prev` fields of
//! [`Tcb`](crate::object::Tcb). The queue head and tail live in the object.
//!
//! # Queue Invariants
//!
//! - Empty queue: `head.is_null() && tail.is_null()`
//! - Single element: `head == tail` and its links are null
//! - FIFO ordering: waiters are appended at the tail and woken from the head

use sable_cap::{ObjectRef, TcbQueue};

use crate::object::ObjectTable;

/// Append `t` at the tail of `queue`, returning the new queue.
pub fn ep_append(objects: &mut ObjectTable, mut queue: TcbQueue, t: ObjectRef) -> TcbQueue {
    debug_assert!(t.is_valid(), "cannot enqueue null TCB");
    if queue.head.is_null() {
        queue.head = t;
    } else {
        objects.tcb_mut(queue.tail).ep_next = t;
    }
    let tcb = objects.tcb_mut(t);
    tcb.ep_prev = queue.tail;
    tcb.ep_next = ObjectRef::NULL;
    queue.tail = t;
    queue
}

/// Remove `t` from anywhere in `queue`, returning the new queue.
pub fn ep_dequeue(objects: &mut ObjectTable, mut queue: TcbQueue, t: ObjectRef) -> TcbQueue {
    let tcb = objects.tcb(t);
    let (prev, next) = (tcb.ep_prev, tcb.ep_next);
    if prev.is_null() {
        queue.head = next;
    } else {
        objects.tcb_mut(prev).ep_next = next;
    }
    if next.is_null() {
        queue.tail = prev;
    } else {
        objects.tcb_mut(next).ep_prev = prev;
    }
    let tcb = objects.tcb_mut(t);
    tcb.ep_prev = ObjectRef::NULL;
    tcb.ep_next = ObjectRef::NULL;
    queue
}

/// Thread queued behind `t`. Read it before unlinking `t`.
pub fn next_in_queue(objects: &ObjectTable, t: ObjectRef) -> ObjectRef {
    objects.tcb(t).ep_next
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;

    use crate::object::{KernelObject, Tcb};

    fn table_with(n: usize) -> (ObjectTable, alloc::vec::Vec<ObjectRef>) {
        let mut objects = ObjectTable::new(n + 2);
        let refs = (0..n)
            .map(|_| {
                objects
                    .insert(None, KernelObject::Tcb(Box::new(Tcb::new(0, 1, 0))))
                    .unwrap()
            })
            .collect();
        (objects, refs)
    }

    #[test]
    fn test_fifo_order() {
        let (mut objects, t) = table_with(3);
        let mut q = TcbQueue::EMPTY;
        for &r in &t {
            q = ep_append(&mut objects, q, r);
        }
        assert_eq!((q.head, q.tail), (t[0], t[2]));
        assert_eq!(next_in_queue(&objects, t[0]), t[1]);
    }

    #[test]
    fn test_dequeue_middle_and_ends() {
        let (mut objects, t) = table_with(3);
        let mut q = TcbQueue::EMPTY;
        for &r in &t {
            q = ep_append(&mut objects, q, r);
        }
        q = ep_dequeue(&mut objects, q, t[1]);
        assert_eq!(objects.tcb(t[0]).ep_next, t[2]);
        assert_eq!(objects.tcb(t[2]).ep_prev, t[0]);
        q = ep_dequeue(&mut objects, q, t[0]);
        assert_eq!((q.head, q.tail), (t[2], t[2]));
        q = ep_dequeue(&mut objects, q, t[2]);
        assert!(q.is_empty());
        assert!(q.tail.is_null());
    }
}
