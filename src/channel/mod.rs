// src/channel/mod.rs

//! The duplex, line-buffered channel between the parent and one child
//! process.
//!
//! A channel is created by spawning a child with all three standard streams
//! piped and then binding the parent end via [`DuplexChannel::from_child`].
//! The child-end binding (remapping the pipe ends onto the child's standard
//! streams and closing the unused ends) is performed by the standard
//! library's spawn path.
//!
//! The unit of transfer is a text line split on `'\n'`. Lines are yielded
//! verbatim, terminator included; a trailing line without a terminator is
//! delivered exactly once when the stream ends, after which the reader
//! reports not-good. This is not a binary-safe channel.

mod duplex;
mod line_buffer;

pub use duplex::{ChannelWriter, DuplexChannel, LineReader, OutputStream};

use std::time::Duration;

use tokio::time::Instant;

/// How long a read or readiness probe may wait for data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Return immediately with whatever is already available.
    Poll,
    /// Wait up to the given duration.
    For(Duration),
    /// Wait until data arrives or the stream ends.
    Forever,
}

/// A `Wait` pinned to a concrete deadline, so it can be consulted repeatedly
/// across a multi-step operation without extending the budget.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Budget {
    Poll,
    Until(Instant),
    Forever,
}

impl Wait {
    pub(crate) fn budget(self) -> Budget {
        match self {
            Wait::Poll => Budget::Poll,
            Wait::For(d) => Budget::Until(Instant::now() + d),
            Wait::Forever => Budget::Forever,
        }
    }
}
