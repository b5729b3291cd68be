//! Log message queues
//!
//! Captures the forwarder's formatted log lines so the host can drain
//! them on its own schedule. One message is one log line, truncated to the
//! queue's per-message cap.

use std::fmt::{self, Write as _};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::CommsResult;
use crate::queue::WaitQueue;
use crate::wait::Hwm;

/// Default cap on a single log message, in bytes
pub const DEFAULT_LOG_MSG_LEN: usize = 1024;

/// Queue of formatted log lines with drain-then-close semantics.
pub struct LogQueue {
    queue: WaitQueue,
    write_cfg: Mutex<WriteConfig>,
}

#[derive(Clone, Copy)]
struct WriteConfig {
    hwm: Hwm,
    timeout: Option<Duration>,
}

impl LogQueue {
    pub fn new() -> Self {
        Self {
            queue: WaitQueue::new(DEFAULT_LOG_MSG_LEN),
            write_cfg: Mutex::new(WriteConfig {
                hwm: Hwm::Unbounded,
                timeout: None,
            }),
        }
    }

    /// Format one log record and enqueue it with the configured write
    /// high-water mark and timeout. Returns the bytes enqueued.
    pub fn write(&self, args: fmt::Arguments<'_>) -> CommsResult<usize> {
        let mut line = String::new();
        // Formatting into a String cannot fail.
        let _ = line.write_fmt(args);

        let mut end = line.len().min(self.queue.max_msg_len());
        while !line.is_char_boundary(end) {
            end -= 1;
        }

        let cfg = *self.write_cfg.lock().unwrap();
        self.queue.send(&line.as_bytes()[..end], cfg.hwm, cfg.timeout)
    }

    /// Copy the next log line into `buf`; lines longer than `buf` are
    /// truncated, like any other queue message.
    pub fn read(&self, buf: &mut [u8], timeout: Option<Duration>) -> CommsResult<usize> {
        self.queue.recv(buf, timeout)
    }

    /// Close now, or once the buffered lines have been drained.
    pub fn close(&self, immediately: bool) {
        if immediately {
            self.queue.close();
        } else {
            self.queue.close_when_drained();
        }
    }

    /// Re-open after a close. Callers must ensure no concurrent users.
    pub fn reset(&self) {
        self.queue.reset();
    }

    pub fn set_write_hwm(&self, hwm: Hwm) {
        self.write_cfg.lock().unwrap().hwm = hwm;
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) {
        self.write_cfg.lock().unwrap().timeout = timeout;
    }

    pub fn set_max_msg_len(&self, len: usize) {
        self.queue.set_max_msg_len(len);
    }

    pub fn max_msg_len(&self) -> usize {
        self.queue.max_msg_len()
    }
}

impl Default for LogQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommsError;

    #[test]
    fn test_write_then_read() {
        let q = LogQueue::new();
        let n = q.write(format_args!("INFO: tick {}\n", 7)).unwrap();
        assert_eq!(n, 13);

        let mut buf = [0u8; 64];
        let n = q.read(&mut buf, None).unwrap();
        assert_eq!(&buf[..n], b"INFO: tick 7\n");
    }

    #[test]
    fn test_write_truncates_to_max_msg_len() {
        let q = LogQueue::new();
        q.set_max_msg_len(8);
        let n = q.write(format_args!("0123456789")).unwrap();
        assert_eq!(n, 8);

        let mut buf = [0u8; 64];
        let n = q.read(&mut buf, None).unwrap();
        assert_eq!(&buf[..n], b"01234567");
    }

    #[test]
    fn test_truncation_respects_utf8_boundaries() {
        let q = LogQueue::new();
        q.set_max_msg_len(5);
        // Four bytes fit; the fifth would split the third é.
        let n = q.write(format_args!("ééé")).unwrap();
        assert_eq!(n, 4);
    }

    #[test]
    fn test_close_when_drained() {
        let q = LogQueue::new();
        q.write(format_args!("first")).unwrap();
        q.write(format_args!("second")).unwrap();
        q.close(false);

        let mut buf = [0u8; 64];
        let n = q.read(&mut buf, None).unwrap();
        assert_eq!(&buf[..n], b"first");
        let n = q.read(&mut buf, None).unwrap();
        assert_eq!(&buf[..n], b"second");
        assert_eq!(q.read(&mut buf, None).unwrap_err(), CommsError::Closed);
    }

    #[test]
    fn test_immediate_close_discards_backlog() {
        let q = LogQueue::new();
        q.write(format_args!("lost")).unwrap();
        q.close(true);

        let mut buf = [0u8; 64];
        assert_eq!(q.read(&mut buf, None).unwrap_err(), CommsError::Closed);

        q.reset();
        q.write(format_args!("fresh")).unwrap();
        let n = q.read(&mut buf, None).unwrap();
        assert_eq!(&buf[..n], b"fresh");
    }

    #[test]
    fn test_write_honours_hwm() {
        let q = LogQueue::new();
        q.set_write_hwm(Hwm::Limit(4));
        q.set_write_timeout(Some(Duration::ZERO));

        q.write(format_args!("full")).unwrap();
        let err = q.write(format_args!("more")).unwrap_err();
        assert_eq!(err, CommsError::TimedOut);
    }
}
