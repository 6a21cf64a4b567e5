//! Inter-Process Communication (IPC)
//!
//! Synchronous message passing through endpoints, asynchronous signals
//! through notifications, and the reply protocol that pairs a Call with
//! its answer.
//!
//! # Operations
//!
//! - **Send/NBSend**: deliver to a waiting receiver, or block (Send) or
//!   drop the message (NBSend)
//! - **Call**: send, then wait for the reply in the same operation
//! - **Recv/NBRecv**: take a message from a waiting sender, or block
//! - **Reply**: answer the thread in the caller slot
//! - **Signal/Wait**: OR a badge into a notification, or consume it
//!
//! # Fast Path
//!
//! [`fastpath`] short-circuits Call and ReplyRecv when the message fits in
//! registers and nothing unusual is going on. It produces the same state
//! as the general path.

pub mod endpoint;
pub mod fastpath;
pub mod notification;
pub mod queue;
pub mod reply;
pub mod transfer;
