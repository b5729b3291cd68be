//! # lora-comms-core
//!
//! Platform-agnostic queue fabric for the in-process LoRa packet
//! forwarder bridge.
//!
//! The bridge replaces the forwarder's two UDP sockets with pairs of
//! blocking byte-message queues. This crate holds the queues themselves
//! and the link abstraction that groups them; everything that touches the
//! operating system (the syscall shim, threads, signals, the lifecycle)
//! lives in `lora-comms-runtime`.

pub mod error;
pub mod link;
pub mod logq;
pub mod queue;
pub mod wait;

// Re-exports
pub use error::{CommsError, CommsResult};
pub use link::{CommLink, Link, RECV_FROM_BUFLEN, SEND_TO_BUFLEN};
pub use logq::{LogQueue, DEFAULT_LOG_MSG_LEN};
pub use queue::WaitQueue;
pub use wait::Hwm;
