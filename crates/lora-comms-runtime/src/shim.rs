//! Syscall shim presented to the ported packet forwarder
//!
//! The forwarder keeps its socket-shaped call sites; this layer routes
//! them onto the in-process links and into the stop protocol. Errors come
//! back by value and never unwind across this boundary. The one deliberate
//! exception is [`Shim::exit`], whose sentinel is caught at the two known
//! sites (the start call and the worker wrapper).

use std::fmt;
use std::fs::File;
use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use lora_comms_core::{CommsError, CommsResult, Link};

use crate::comms::{Comms, ForwarderExit, Inner, LogStream};
use crate::stop::SigHandler;

pub use nix::sys::signal::Signal;

/// Virtual descriptor the forwarder gets for its uplink socket
pub const UPLINK_FD: RawFd = 0;
/// Virtual descriptor the forwarder gets for its downlink socket
pub const DOWNLINK_FD: RawFd = 1;

/// Forwarder-facing handle onto the bridge.
///
/// Handed to [`Forwarder::run`](crate::comms::Forwarder::run); clone it
/// into every worker thread the forwarder spawns.
#[derive(Clone)]
pub struct Shim {
    pub(crate) inner: Arc<Inner>,
}

impl Shim {
    fn link(&self, sockfd: RawFd) -> CommsResult<&Link> {
        match sockfd {
            UPLINK_FD | DOWNLINK_FD => Ok(&self.inner.links[sockfd as usize]),
            _ => Err(CommsError::Closed),
        }
    }

    /// Allocate the next link socket: the uplink first, then the
    /// downlink. A third call fails with [`CommsError::TooManySockets`].
    pub fn socket(&self) -> CommsResult<RawFd> {
        let fd = self.inner.next_socket.fetch_add(1, Ordering::SeqCst);
        if fd > DOWNLINK_FD {
            return Err(CommsError::TooManySockets);
        }
        self.link(fd)?.reset();
        log::debug!("allocated link socket {fd}");
        Ok(fd)
    }

    /// The links are always "connected"; this only validates `sockfd`.
    pub fn connect(&self, sockfd: RawFd) -> CommsResult<()> {
        self.link(sockfd).map(|_| ())
    }

    /// Store the receive timeout for a link socket.
    ///
    /// Only `SO_RCVTIMEO` at `SOL_SOCKET` is supported. A zeroed timeval
    /// means "block forever", matching the socket option's convention.
    pub fn setsockopt(
        &self,
        sockfd: RawFd,
        level: libc::c_int,
        optname: libc::c_int,
        optval: Option<&libc::timeval>,
    ) -> CommsResult<()> {
        let link = self.link(sockfd)?;

        if optname != libc::SO_RCVTIMEO {
            return Err(CommsError::UnsupportedOption);
        }
        let tv = optval.ok_or(CommsError::NullValue)?;
        if level != libc::SOL_SOCKET {
            return Err(CommsError::InvalidArgument);
        }

        link.set_fwd_recv_timeout(timeval_to_timeout(tv));
        Ok(())
    }

    /// Queue a datagram for the host, using the link's configured send
    /// high-water mark and timeout.
    pub fn send(&self, sockfd: RawFd, buf: &[u8]) -> CommsResult<usize> {
        self.link(sockfd)?.fwd_send(buf)
    }

    /// Read the next datagram the host queued, honouring the receive
    /// timeout set through [`setsockopt`](Self::setsockopt).
    pub fn recv(&self, sockfd: RawFd, buf: &mut [u8]) -> CommsResult<usize> {
        self.link(sockfd)?.fwd_recv(buf)
    }

    /// No-op beyond validating `sockfd`; teardown happens in the
    /// lifecycle layer.
    pub fn shutdown(&self, sockfd: RawFd) -> CommsResult<()> {
        self.link(sockfd).map(|_| ())
    }

    /// Leave the forwarder immediately with `status`.
    ///
    /// On the start thread this becomes the return value of
    /// [`Comms::start`]; in a worker thread the spawn wrapper turns it
    /// into a stop request for the rest of the forwarder.
    pub fn exit(&self, status: i32) -> ! {
        panic::panic_any(ForwarderExit { status })
    }

    /// Adopt the forwarder's termination handler. Signals other than
    /// SIGTERM are ignored. If the host already requested a stop, the
    /// handler fires before this returns.
    pub fn sigaction(&self, signal: Signal, handler: SigHandler) {
        if signal == Signal::SIGTERM {
            self.inner.stop.check_stop(Some(handler), false);
        }
    }

    /// Spawn a forwarder worker thread.
    ///
    /// [`Shim::exit`] inside the worker stops the whole forwarder instead
    /// of silently killing one thread; any other panic propagates.
    pub fn spawn<F>(&self, f: F) -> io::Result<FwdThread>
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("lora-fwd-worker".to_string())
            .spawn(move || {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
                    match payload.downcast::<ForwarderExit>() {
                        Ok(exit) => inner.stop.worker_exit(exit.status),
                        Err(payload) => panic::resume_unwind(payload),
                    }
                }
            })?;
        Ok(FwdThread { handle })
    }

    /// Sleep for `ms` milliseconds in chunks of at most one second,
    /// returning early once the stop handler has run.
    pub fn wait_ms(&self, ms: u64) {
        let mut remaining = Duration::from_millis(ms);
        while remaining > Duration::from_micros(100) {
            if self.inner.stop.handler_called() {
                break;
            }
            let chunk = remaining.min(Duration::from_secs(1));
            thread::sleep(chunk);
            remaining -= chunk;
        }
    }

    /// Read from a real descriptor (the radio concentrator, a GPS tty),
    /// polling so the stop flag is observed at least once a second.
    /// Returns `Ok(0)` once a stop is in progress.
    pub fn read(&self, fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
        // Safety: the forwarder owns `fd` for the duration of the call.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };

        loop {
            if self.inner.stop.handler_called() {
                return Ok(0);
            }

            let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(1000u16)) {
                Ok(ready) if ready > 0 => {
                    // Safety: `buf` is a valid writable region of its own length.
                    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
                    if n < 0 {
                        return Err(io::Error::last_os_error());
                    }
                    return Ok(n as usize);
                }
                // Timeout or interruption: go round and re-check the stop flag.
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => return Err(io::Error::from(e)),
            }
        }
    }

    /// Check for a configuration file, relative to the directory the
    /// bridge was started with.
    pub fn access(&self, path: &str) -> bool {
        self.inner.prefixed(path).exists()
    }

    /// Open a configuration file, relative to the directory the bridge
    /// was started with.
    pub fn fopen(&self, path: &str) -> io::Result<File> {
        File::open(self.inner.prefixed(path))
    }

    /// stdout print from the forwarder, routed to the installed logger.
    pub fn printf(&self, args: fmt::Arguments<'_>) -> isize {
        self.dispatch_log(LogStream::Stdout, args)
    }

    /// stdout/stderr print from the forwarder, routed to the installed
    /// logger.
    pub fn fprintf(&self, stream: LogStream, args: fmt::Arguments<'_>) -> isize {
        self.dispatch_log(stream, args)
    }

    /// Print to a stream that is neither stdout nor stderr: bypasses the
    /// logger and writes through directly.
    pub fn fprintf_to(&self, writer: &mut dyn io::Write, args: fmt::Arguments<'_>) -> isize {
        let line = args.to_string();
        match writer.write_all(line.as_bytes()) {
            Ok(()) => line.len() as isize,
            Err(_) => -1,
        }
    }

    fn dispatch_log(&self, stream: LogStream, args: fmt::Arguments<'_>) -> isize {
        match self.inner.load_logger() {
            Some(logger) => logger(&Comms::from_inner(Arc::clone(&self.inner)), stream, args),
            None => 0,
        }
    }
}

/// Handle for a thread spawned through [`Shim::spawn`].
pub struct FwdThread {
    handle: thread::JoinHandle<()>,
}

impl FwdThread {
    /// Wait for the worker to finish.
    pub fn join(self) {
        let _ = self.handle.join();
    }

    /// Cancellation is cooperative: the worker is expected to notice the
    /// stop flag on its own, so cancelling just joins.
    pub fn cancel(self) {
        self.join();
    }
}

/// The errno a real socket layer would have produced, for ported code
/// that still switches on errno values.
pub fn errno_of(err: &CommsError) -> libc::c_int {
    match err {
        CommsError::Closed => libc::EBADF,
        CommsError::TimedOut => libc::EAGAIN,
        CommsError::TooManySockets => libc::EMFILE,
        CommsError::UnsupportedOption => libc::ENOPROTOOPT,
        CommsError::InvalidArgument => libc::EINVAL,
        CommsError::NullValue => libc::EFAULT,
    }
}

fn timeval_to_timeout(tv: &libc::timeval) -> Option<Duration> {
    let micros = (tv.tv_sec as i64) * 1_000_000 + tv.tv_usec as i64;
    if micros <= 0 {
        None
    } else {
        Some(Duration::from_micros(micros as u64))
    }
}
