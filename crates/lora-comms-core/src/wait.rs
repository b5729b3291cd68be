//! Send-side backpressure and the timeout convention
//!
//! Timeouts are `Option<Duration>` throughout the fabric: `None` blocks
//! until the operation can proceed, `Some(Duration::ZERO)` fails straight
//! away with `TimedOut`, and any other value bounds the wait.

/// High-water mark applied to the send side of a queue.
///
/// The mark is measured in buffered bytes, not messages, because the
/// datagrams the forwarder produces vary from a 12-byte keepalive to a
/// multi-kilobyte status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hwm {
    /// Never wait; always enqueue. Used on the uplink by default, where
    /// dropping gateway data is worse than letting the queue grow.
    Unbounded,

    /// Writing is disabled; sends return 0 without touching the queue.
    Disabled,

    /// Block the sender while the queue already holds at least this many
    /// bytes; wake once the reader drains below the mark.
    Limit(usize),
}
