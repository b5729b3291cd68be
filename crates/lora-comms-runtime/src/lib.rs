//! # lora-comms-runtime
//!
//! Platform runtime for the bridge: the syscall-shaped shim handed to the
//! ported packet forwarder, the cooperative stop protocol, and the
//! start/stop/reset lifecycle around the forwarder's main loop.

pub mod comms;
pub mod shim;
pub mod stop;

// Re-exports
pub use comms::{log_to_queues, stdio_logger, Comms, Forwarder, LogStream, Logger};
pub use shim::{errno_of, FwdThread, Shim, Signal, DOWNLINK_FD, UPLINK_FD};
pub use stop::SigHandler;

cfg_if::cfg_if! {
    if #[cfg(not(unix))] {
        compile_error!("lora-comms-runtime needs a Unix platform for the descriptor polling shim");
    }
}
