//! Links: one logical socket endpoint per direction pair
//!
//! A link is what the forwarder believes is a UDP socket: everything it
//! sends lands on the `from_fwd` queue for the host to read, everything
//! the host writes lands on the `to_fwd` queue for the forwarder to read.

use std::sync::Mutex;
use std::time::Duration;

use crate::error::CommsResult;
use crate::queue::WaitQueue;
use crate::wait::Hwm;

/// Selector for the two gateway links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommLink {
    /// Data packets out of the forwarder, acknowledgements back in
    Uplink = 0,
    /// Command packets into the forwarder, acknowledgements back out
    Downlink = 1,
}

impl CommLink {
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Largest datagram the forwarder sends upstream: eight 540-byte packet
/// records plus framing plus the status report.
pub const RECV_FROM_BUFLEN: usize = (540 * 8) + 30 + 200;

/// Largest downlink command datagram the forwarder accepts.
pub const SEND_TO_BUFLEN: usize = 1000;

/// A pair of queues plus the per-direction tunables the forwarder side
/// uses implicitly.
pub struct Link {
    from_fwd: WaitQueue,
    to_fwd: WaitQueue,
    cfg: Mutex<LinkConfig>,
}

#[derive(Clone, Copy)]
struct LinkConfig {
    /// Applied when the forwarder sends (host reads the result)
    send_hwm: Hwm,
    send_timeout: Option<Duration>,
    /// Applied when the forwarder receives; set through the intercepted
    /// receive-timeout socket option
    recv_timeout: Option<Duration>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            send_hwm: Hwm::Unbounded,
            send_timeout: None,
            recv_timeout: None,
        }
    }
}

impl Link {
    pub fn new() -> Self {
        Self {
            from_fwd: WaitQueue::new(RECV_FROM_BUFLEN),
            to_fwd: WaitQueue::new(SEND_TO_BUFLEN),
            cfg: Mutex::new(LinkConfig::default()),
        }
    }

    /// Restore default configuration and re-open both queues. Callers
    /// must ensure no concurrent users.
    pub fn reset(&self) {
        *self.cfg.lock().unwrap() = LinkConfig::default();
        self.from_fwd.reset();
        self.to_fwd.reset();
    }

    /// Close both queues, releasing all blocked parties.
    pub fn close(&self) {
        self.from_fwd.close();
        self.to_fwd.close();
    }

    pub fn set_fwd_send_hwm(&self, hwm: Hwm) {
        self.cfg.lock().unwrap().send_hwm = hwm;
    }

    pub fn set_fwd_send_timeout(&self, timeout: Option<Duration>) {
        self.cfg.lock().unwrap().send_timeout = timeout;
    }

    pub fn set_fwd_recv_timeout(&self, timeout: Option<Duration>) {
        self.cfg.lock().unwrap().recv_timeout = timeout;
    }

    /// Forwarder-side transmit: the datagram it would have pushed to the
    /// network server.
    pub fn fwd_send(&self, buf: &[u8]) -> CommsResult<usize> {
        let cfg = *self.cfg.lock().unwrap();
        self.from_fwd.send(buf, cfg.send_hwm, cfg.send_timeout)
    }

    /// Forwarder-side receive, honouring the configured receive timeout.
    pub fn fwd_recv(&self, buf: &mut [u8]) -> CommsResult<usize> {
        let timeout = self.cfg.lock().unwrap().recv_timeout;
        self.to_fwd.recv(buf, timeout)
    }

    /// Host-side read of the forwarder's traffic.
    pub fn host_recv(&self, buf: &mut [u8], timeout: Option<Duration>) -> CommsResult<usize> {
        self.from_fwd.recv(buf, timeout)
    }

    /// Host-side write of traffic for the forwarder.
    pub fn host_send(
        &self,
        buf: &[u8],
        hwm: Hwm,
        timeout: Option<Duration>,
    ) -> CommsResult<usize> {
        self.to_fwd.send(buf, hwm, timeout)
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}
