//! Bounded blocking byte-message queue
//!
//! Messages are opaque byte buffers, delivered strictly in FIFO order and
//! never split across reads. Senders are gated by a byte-count high-water
//! mark, receivers by queue emptiness; both support bounded waits and fail
//! fast once the queue has been closed.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{CommsError, CommsResult};
use crate::wait::Hwm;

/// Closable blocking FIFO of byte messages.
///
/// One mutex guards the message sequence; two condition variables wake
/// senders (space below the mark) and receivers (message available)
/// independently.
pub struct WaitQueue {
    state: Mutex<State>,
    send_cv: Condvar,
    recv_cv: Condvar,
}

struct State {
    q: VecDeque<Vec<u8>>,

    /// Sum of the lengths of all queued messages
    size: usize,

    /// Per-message cap; longer sends are truncated silently
    max_msg_len: usize,

    closed: bool,

    /// Close once the remaining messages have been drained
    close_pending: bool,
}

impl State {
    fn close(&mut self) {
        self.q.clear();
        self.size = 0;
        self.closed = true;
    }
}

impl WaitQueue {
    pub fn new(max_msg_len: usize) -> Self {
        Self {
            state: Mutex::new(State {
                q: VecDeque::new(),
                size: 0,
                max_msg_len,
                closed: false,
                close_pending: false,
            }),
            send_cv: Condvar::new(),
            recv_cv: Condvar::new(),
        }
    }

    /// Append up to `max_msg_len` bytes of `buf` as one message.
    ///
    /// With [`Hwm::Limit`] the call blocks while the queue already holds
    /// at least that many bytes. Returns the number of bytes accepted.
    pub fn send(&self, buf: &[u8], hwm: Hwm, timeout: Option<Duration>) -> CommsResult<usize> {
        let mut s = self.state.lock().unwrap();

        if s.closed {
            return Err(CommsError::Closed);
        }

        match hwm {
            Hwm::Disabled => return Ok(0),
            Hwm::Limit(limit) if s.size >= limit => {
                s = self.wait_until(s, &self.send_cv, timeout, move |s| s.size < limit)?;
            }
            _ => {}
        }

        let take = buf.len().min(s.max_msg_len);
        s.q.push_back(buf[..take].to_vec());
        s.size += take;
        self.recv_cv.notify_all();

        Ok(take)
    }

    /// Remove the head message, copying as much as fits into `buf`.
    ///
    /// The message leaves the queue whole even when `buf` is shorter; the
    /// remainder is dropped, preserving datagram boundaries. Returns the
    /// number of bytes copied.
    pub fn recv(&self, buf: &mut [u8], timeout: Option<Duration>) -> CommsResult<usize> {
        let mut s = self.state.lock().unwrap();

        if s.closed {
            return Err(CommsError::Closed);
        }

        if s.q.is_empty() {
            if s.close_pending {
                // Drained; this receive performs the deferred close.
                s.close();
                self.send_cv.notify_all();
                self.recv_cv.notify_all();
                return Err(CommsError::Closed);
            }
            s = self.wait_until(s, &self.recv_cv, timeout, |s| !s.q.is_empty())?;
        }

        let msg = s.q.pop_front().unwrap();
        let n = msg.len().min(buf.len());
        buf[..n].copy_from_slice(&msg[..n]);
        s.size -= msg.len();
        self.send_cv.notify_all();

        Ok(n)
    }

    /// Drop all queued messages and fail every current and future
    /// operation with [`CommsError::Closed`]. Idempotent.
    pub fn close(&self) {
        let mut s = self.state.lock().unwrap();
        s.close();
        self.send_cv.notify_all();
        self.recv_cv.notify_all();
    }

    /// Close the queue, but only once the queued messages have been read.
    ///
    /// An empty queue closes immediately. Otherwise receivers keep
    /// draining in order and the receive that finds the queue empty
    /// completes the close.
    pub fn close_when_drained(&self) {
        let mut s = self.state.lock().unwrap();
        s.close_pending = true;
        if s.q.is_empty() {
            s.close();
            self.send_cv.notify_all();
            self.recv_cv.notify_all();
        }
    }

    /// Re-open a closed queue.
    ///
    /// The caller must make sure no other thread is using the queue.
    pub fn reset(&self) {
        let mut s = self.state.lock().unwrap();
        s.closed = false;
        s.close_pending = false;
    }

    /// Bytes currently buffered across all queued messages.
    pub fn buffered(&self) -> usize {
        self.state.lock().unwrap().size
    }

    pub fn max_msg_len(&self) -> usize {
        self.state.lock().unwrap().max_msg_len
    }

    pub fn set_max_msg_len(&self, len: usize) {
        self.state.lock().unwrap().max_msg_len = len;
    }

    /// Wait on `cv` until the queue closes or `ready` holds.
    ///
    /// Closing always wins over the timeout: a wakeup that finds the
    /// queue closed reports [`CommsError::Closed`], never `TimedOut`.
    fn wait_until<'a>(
        &self,
        guard: MutexGuard<'a, State>,
        cv: &Condvar,
        timeout: Option<Duration>,
        ready: impl Fn(&State) -> bool,
    ) -> CommsResult<MutexGuard<'a, State>> {
        let parked = |s: &mut State| !s.closed && !ready(s);

        let guard = match timeout {
            None => cv.wait_while(guard, parked).unwrap(),
            Some(timeout) => {
                if timeout.is_zero() {
                    return Err(CommsError::TimedOut);
                }
                let (guard, result) = cv.wait_timeout_while(guard, timeout, parked).unwrap();
                if result.timed_out() && !guard.closed && !ready(&guard) {
                    return Err(CommsError::TimedOut);
                }
                guard
            }
        };

        if guard.closed {
            return Err(CommsError::Closed);
        }

        Ok(guard)
    }
}
