//! Host-facing bridge handle and lifecycle
//!
//! One [`Comms`] value owns everything the bridge needs: the two links,
//! the stop protocol, the configuration-directory prefix, the installed
//! logger and the optional log queues. Clones share state, so the host
//! can hand the handle to as many threads as it likes.

use std::fmt;
use std::io::Write as _;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lora_comms_core::{CommLink, CommsResult, Hwm, Link, LogQueue};

use crate::shim::{Shim, UPLINK_FD};
use crate::stop::StopCoordinator;

/// Entry points of the ported packet forwarder.
pub trait Forwarder: Sync {
    /// The forwarder's main loop. Runs on the thread that called
    /// [`Comms::start`] and performs all of its I/O through the
    /// [`Shim`].
    fn run(&self, shim: Shim);

    /// Clear any internal exit/quit flags so the forwarder can be
    /// started again after [`Comms::reset`].
    fn reset(&self) {}
}

/// Stream tag handed to the installed logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Log callback: receives the bridge handle, the stream the forwarder
/// printed to, and the formatted record. Returns the bytes consumed, or
/// -1 on failure.
///
/// A plain `fn` so that installing a new logger is a single atomic store
/// and reading it is lock-free.
pub type Logger = fn(&Comms, LogStream, fmt::Arguments<'_>) -> isize;

/// Sentinel unwound by [`Shim::exit`]; caught in [`Comms::start`] and in
/// the worker wrapper of [`Shim::spawn`], never anywhere else.
pub(crate) struct ForwarderExit {
    pub(crate) status: i32,
}

pub(crate) struct Inner {
    pub(crate) links: [Link; 2],
    pub(crate) next_socket: AtomicI32,
    pub(crate) stop: StopCoordinator,
    cfg_prefix: Mutex<PathBuf>,

    /// Installed logger as a raw fn-pointer value; 0 means no logging
    logger: AtomicUsize,

    log_info: LogQueue,
    log_error: LogQueue,
}

impl Inner {
    pub(crate) fn prefixed(&self, path: &str) -> PathBuf {
        self.cfg_prefix.lock().unwrap().join(path)
    }

    pub(crate) fn load_logger(&self) -> Option<Logger> {
        let raw = self.logger.load(Ordering::Acquire);
        if raw == 0 {
            None
        } else {
            // Safety: the cell only ever holds values produced by
            // `Logger as usize` in `store_logger`; fn pointers are
            // non-null and pointer-sized.
            Some(unsafe { std::mem::transmute::<usize, Logger>(raw) })
        }
    }

    fn store_logger(&self, logger: Option<Logger>) {
        self.logger
            .store(logger.map_or(0, |f| f as usize), Ordering::Release);
    }
}

/// Handle on the in-process bridge between the host and the forwarder.
#[derive(Clone)]
pub struct Comms {
    pub(crate) inner: Arc<Inner>,
}

impl Comms {
    pub fn new() -> Self {
        Comms {
            inner: Arc::new(Inner {
                links: [Link::new(), Link::new()],
                next_socket: AtomicI32::new(UPLINK_FD),
                stop: StopCoordinator::default(),
                cfg_prefix: Mutex::new(PathBuf::new()),
                logger: AtomicUsize::new(0),
                log_info: LogQueue::new(),
                log_error: LogQueue::new(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Comms { inner }
    }

    fn link(&self, link: CommLink) -> &Link {
        &self.inner.links[link.index()]
    }

    /// Run the forwarder on the calling thread until it stops.
    ///
    /// `cfg_dir` is prepended to every path the forwarder opens; `None`
    /// means the current directory. Returns the forwarder's exit status
    /// (0 when its main loop returned normally). Both links are closed on
    /// the way out, so host threads blocked in [`recv_from`] or
    /// [`send_to`] are released with [`CommsError::Closed`].
    ///
    /// [`recv_from`]: Self::recv_from
    /// [`send_to`]: Self::send_to
    /// [`CommsError::Closed`]: lora_comms_core::CommsError::Closed
    pub fn start(&self, forwarder: &dyn Forwarder, cfg_dir: Option<&Path>) -> i32 {
        {
            let mut prefix = self.inner.cfg_prefix.lock().unwrap();
            *prefix = cfg_dir.map_or_else(PathBuf::new, Path::to_path_buf);
        }

        log::info!("starting packet forwarder");
        let shim = Shim {
            inner: Arc::clone(&self.inner),
        };

        let status = match panic::catch_unwind(AssertUnwindSafe(|| forwarder.run(shim))) {
            Ok(()) => self.inner.stop.exit_status().unwrap_or(0),
            Err(payload) => match payload.downcast::<ForwarderExit>() {
                Ok(exit) => exit.status,
                Err(payload) => panic::resume_unwind(payload),
            },
        };

        self.link(CommLink::Uplink).close();
        self.link(CommLink::Downlink).close();
        log::info!("packet forwarder stopped with status {status}");

        status
    }

    /// Ask the forwarder to stop. Callable from any thread, idempotent
    /// and non-blocking. A request made before the forwarder installs
    /// its termination handler is remembered and honoured on
    /// installation.
    pub fn stop(&self) {
        self.inner.stop.check_stop(None, true);
    }

    /// Return the bridge to its pre-start state after a completed run,
    /// including the forwarder's own flags. The caller must make sure no
    /// other thread is using the bridge.
    pub fn reset(&self, forwarder: &dyn Forwarder) {
        self.inner.next_socket.store(UPLINK_FD, Ordering::SeqCst);
        self.link(CommLink::Uplink).reset();
        self.link(CommLink::Downlink).reset();
        self.inner.stop.reset();
        forwarder.reset();
    }

    /// Read the next datagram the forwarder sent on `link`: data packets
    /// on the uplink, acknowledgements on the downlink.
    pub fn recv_from(
        &self,
        link: CommLink,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> CommsResult<usize> {
        self.link(link).host_recv(buf, timeout)
    }

    /// Queue a datagram for the forwarder on `link`: acknowledgements on
    /// the uplink, command packets on the downlink.
    pub fn send_to(
        &self,
        link: CommLink,
        buf: &[u8],
        hwm: Hwm,
        timeout: Option<Duration>,
    ) -> CommsResult<usize> {
        self.link(link).host_send(buf, hwm, timeout)
    }

    /// High-water mark applied when the forwarder sends on `link`.
    pub fn set_gw_send_hwm(&self, link: CommLink, hwm: Hwm) {
        self.link(link).set_fwd_send_hwm(hwm);
    }

    /// Timeout applied when the forwarder sends on `link`.
    pub fn set_gw_send_timeout(&self, link: CommLink, timeout: Option<Duration>) {
        self.link(link).set_fwd_send_timeout(timeout);
    }

    /// Timeout applied when the forwarder receives on `link`. The
    /// forwarder normally sets this itself through the intercepted
    /// receive-timeout socket option.
    pub fn set_gw_recv_timeout(&self, link: CommLink, timeout: Option<Duration>) {
        self.link(link).set_fwd_recv_timeout(timeout);
    }

    /// Install (or, with `None`, remove) the log callback. Replacement
    /// is atomic: every log call uses either the old or the new logger,
    /// never a torn mix.
    pub fn set_logger(&self, logger: Option<Logger>) {
        self.inner.store_logger(logger);
    }

    /// Close both log queues, immediately or once they have drained.
    pub fn close_log_queues(&self, immediately: bool) {
        self.inner.log_info.close(immediately);
        self.inner.log_error.close(immediately);
    }

    /// Re-open both log queues.
    pub fn reset_log_queues(&self) {
        self.inner.log_info.reset();
        self.inner.log_error.reset();
    }

    /// Read the next informational log message (stdout stream).
    pub fn get_log_info_message(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> CommsResult<usize> {
        self.inner.log_info.read(buf, timeout)
    }

    /// Read the next error log message (stderr stream).
    pub fn get_log_error_message(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> CommsResult<usize> {
        self.inner.log_error.read(buf, timeout)
    }

    pub fn set_log_write_hwm(&self, hwm: Hwm) {
        self.inner.log_info.set_write_hwm(hwm);
        self.inner.log_error.set_write_hwm(hwm);
    }

    pub fn set_log_write_timeout(&self, timeout: Option<Duration>) {
        self.inner.log_info.set_write_timeout(timeout);
        self.inner.log_error.set_write_timeout(timeout);
    }

    pub fn set_log_max_msg_size(&self, len: usize) {
        self.inner.log_info.set_max_msg_len(len);
        self.inner.log_error.set_max_msg_len(len);
    }

    pub fn get_log_max_msg_size(&self) -> usize {
        self.inner
            .log_info
            .max_msg_len()
            .max(self.inner.log_error.max_msg_len())
    }

    pub(crate) fn log_queue(&self, stream: LogStream) -> &LogQueue {
        match stream {
            LogStream::Stdout => &self.inner.log_info,
            LogStream::Stderr => &self.inner.log_error,
        }
    }
}

impl Default for Comms {
    fn default() -> Self {
        Self::new()
    }
}

/// Logger that prints forwarder output to the host's real stdout and
/// stderr.
pub fn stdio_logger(_comms: &Comms, stream: LogStream, args: fmt::Arguments<'_>) -> isize {
    let line = args.to_string();
    let ok = match stream {
        LogStream::Stdout => std::io::stdout().write_all(line.as_bytes()).is_ok(),
        LogStream::Stderr => std::io::stderr().write_all(line.as_bytes()).is_ok(),
    };
    if ok {
        line.len() as isize
    } else {
        -1
    }
}

/// Logger that captures forwarder output in the in-process log queues:
/// stdout records on the info queue, stderr records on the error queue.
/// Drain them with [`Comms::get_log_info_message`] and
/// [`Comms::get_log_error_message`].
pub fn log_to_queues(comms: &Comms, stream: LogStream, args: fmt::Arguments<'_>) -> isize {
    match comms.log_queue(stream).write(args) {
        Ok(n) => n as isize,
        Err(_) => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lora_comms_core::CommsError;

    #[test]
    fn test_send_to_and_recv_from_roundtrip() {
        let comms = Comms::new();
        comms
            .send_to(CommLink::Downlink, b"resp", Hwm::Unbounded, None)
            .unwrap();

        // The forwarder side of the same queue sees the datagram.
        let shim = Shim {
            inner: Arc::clone(&comms.inner),
        };
        let mut buf = [0u8; 16];
        let n = shim.recv(crate::shim::DOWNLINK_FD, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"resp");
    }

    #[test]
    fn test_socket_allocation_order_and_exhaustion() {
        let comms = Comms::new();
        let shim = Shim {
            inner: Arc::clone(&comms.inner),
        };

        assert_eq!(shim.socket().unwrap(), crate::shim::UPLINK_FD);
        assert_eq!(shim.socket().unwrap(), crate::shim::DOWNLINK_FD);
        assert_eq!(shim.socket().unwrap_err(), CommsError::TooManySockets);
    }

    #[test]
    fn test_logger_install_and_remove() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        fn counting(_c: &Comms, _s: LogStream, _a: fmt::Arguments<'_>) -> isize {
            CALLS.fetch_add(1, Ordering::SeqCst);
            0
        }

        let comms = Comms::new();
        let shim = Shim {
            inner: Arc::clone(&comms.inner),
        };

        // No logger installed: records are dropped.
        assert_eq!(shim.printf(format_args!("dropped")), 0);
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);

        comms.set_logger(Some(counting));
        shim.printf(format_args!("counted"));
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);

        comms.set_logger(None);
        shim.printf(format_args!("dropped again"));
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_log_to_queues_splits_streams() {
        let comms = Comms::new();
        comms.set_logger(Some(log_to_queues));
        let shim = Shim {
            inner: Arc::clone(&comms.inner),
        };

        shim.printf(format_args!("INFO: up\n"));
        shim.fprintf(LogStream::Stderr, format_args!("ERROR: down\n"));

        let mut buf = [0u8; 64];
        let n = comms.get_log_info_message(&mut buf, None).unwrap();
        assert_eq!(&buf[..n], b"INFO: up\n");
        let n = comms.get_log_error_message(&mut buf, None).unwrap();
        assert_eq!(&buf[..n], b"ERROR: down\n");
    }

    #[test]
    fn test_config_prefix_applies_to_paths() {
        let comms = Comms::new();
        {
            let mut prefix = comms.inner.cfg_prefix.lock().unwrap();
            *prefix = PathBuf::from("/etc/lora");
        }
        assert_eq!(
            comms.inner.prefixed("global_conf.json"),
            PathBuf::from("/etc/lora/global_conf.json")
        );
    }
}
