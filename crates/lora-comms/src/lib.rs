//! # lora-comms - in-process LoRa packet forwarder bridge
//!
//! Runs a ported LoRa packet forwarder inside the host process and
//! replaces its two UDP sockets with in-process byte queues. The host
//! plays the network server without opening a socket: it reads uplink
//! data packets and writes uplink acknowledgements, writes downlink
//! command packets and reads downlink acknowledgements. The forwarder
//! believes it is still talking to the network.
//!
//! ## Data flow
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!                 │      ported forwarder        │
//!                 │  (socket/send/recv calls)    │
//!                 └──────────────┬───────────────┘
//!                                │ Shim
//!             ┌──────────────────┼──────────────────┐
//!             ▼                  ▼                  ▼
//!      uplink Link         downlink Link       stop protocol
//!      from_fwd │ to_fwd   from_fwd │ to_fwd   (SIGTERM handler,
//!         ▲     │  ▲          ▲     │  ▲        wait/read shims)
//!         │     ▼  │          │     ▼  │
//!       recv_from  send_to  recv_from  send_to
//!             ┌──────────────────────────┐
//!             │        host threads      │
//!             └──────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use lora_comms::{CommLink, Comms, Hwm, stdio_logger};
//!
//! let comms = Comms::new();
//! comms.set_logger(Some(stdio_logger));
//!
//! // Acknowledge uplink data from another thread.
//! let acker = {
//!     let comms = comms.clone();
//!     std::thread::spawn(move || {
//!         let mut buf = [0u8; lora_comms::RECV_FROM_BUFLEN];
//!         while let Ok(n) = comms.recv_from(CommLink::Uplink, &mut buf, None) {
//!             // parse the datagram, then acknowledge it
//!             let ack = [buf[0], buf[1], buf[2], 0x01];
//!             let _ = comms.send_to(CommLink::Uplink, &ack, Hwm::Unbounded, None);
//!         }
//!     })
//! };
//!
//! // Runs the forwarder on this thread until `comms.stop()` is called.
//! let status = comms.start(&my_ported_forwarder, None);
//! acker.join().unwrap();
//! ```

// Re-export the queue fabric
pub use lora_comms_core::{
    CommLink, CommsError, CommsResult, Hwm, Link, LogQueue, WaitQueue, DEFAULT_LOG_MSG_LEN,
    RECV_FROM_BUFLEN, SEND_TO_BUFLEN,
};

// Re-export the runtime surface
pub use lora_comms_runtime::{
    errno_of, log_to_queues, stdio_logger, Comms, Forwarder, FwdThread, LogStream, Logger,
    Shim, SigHandler, Signal, DOWNLINK_FD, UPLINK_FD,
};
