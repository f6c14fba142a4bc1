//! Handler traits and stream identification.
//!
//! A [`ProcessHandler`] is the capability interface a subprocess transport
//! reports into: pipe data, stream closure, process exit, and final teardown
//! arrive as calls on this trait, always on the loop thread, in FIFO
//! scheduling order. All methods have default no-op implementations so a
//! handler only implements what it cares about.
//!
//! [`PipeHandler`] is the narrower seam between a single pipe endpoint and
//! its owner. The transport installs internal adapters implementing it; tests
//! drive endpoints directly through it.

use std::io;
use std::rc::Rc;

use crate::transport::ProcessTransport;

/// Identifies one of the three standard streams of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamIndex {
    /// The child's standard input (written by the parent).
    Stdin,
    /// The child's standard output (read by the parent).
    Stdout,
    /// The child's standard error (read by the parent).
    Stderr,
}

impl StreamIndex {
    /// All streams, in wiring order.
    pub const ALL: [Self; 3] = [Self::Stdin, Self::Stdout, Self::Stderr];

    /// Returns the conventional file descriptor number (0, 1, or 2).
    #[must_use]
    pub const fn as_raw(self) -> usize {
        match self {
            Self::Stdin => 0,
            Self::Stdout => 1,
            Self::Stderr => 2,
        }
    }

    /// Converts a conventional descriptor number back to a stream.
    #[must_use]
    pub const fn from_raw(raw: usize) -> Option<Self> {
        match raw {
            0 => Some(Self::Stdin),
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }

    /// Human-readable stream name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl std::fmt::Display for StreamIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle callbacks delivered by a [`ProcessTransport`].
///
/// Ordering guarantees:
///
/// - `connection_made` is delivered once, after every piped stream has been
///   wired, and before any queued data or closure events.
/// - `pipe_connection_lost` is delivered once per piped stream.
/// - `process_exited` is delivered exactly once.
/// - `connection_lost` is delivered exactly once, after `process_exited` and
///   after every piped stream has reported closure.
pub trait ProcessHandler {
    /// The transport is fully wired and ready for use.
    fn connection_made(&mut self, transport: &Rc<ProcessTransport>) {
        let _ = transport;
    }

    /// Data arrived on the child's stdout or stderr.
    fn data_received(&mut self, stream: StreamIndex, data: &[u8]) {
        let _ = (stream, data);
    }

    /// A read stream reached end-of-file.
    ///
    /// The return value is advisory: a pipe that hit EOF has nothing further
    /// to deliver, so the stream tears down regardless.
    fn eof_received(&mut self) -> bool {
        false
    }

    /// The stdin write buffer crossed its high-water mark; stop writing.
    fn pause_writing(&mut self) {}

    /// The stdin write buffer drained below its low-water mark.
    fn resume_writing(&mut self) {}

    /// One piped stream closed. `err` is `None` for a clean closure.
    fn pipe_connection_lost(&mut self, stream: StreamIndex, err: Option<io::Error>) {
        let _ = (stream, err);
    }

    /// The child process terminated; its exit code is now available.
    fn process_exited(&mut self) {}

    /// Final teardown: the process exited and every piped stream closed.
    fn connection_lost(&mut self, err: Option<io::Error>) {
        let _ = err;
    }
}

/// Callbacks delivered by a single pipe endpoint to its owner.
pub trait PipeHandler {
    /// Data read from the descriptor (read endpoints only).
    fn data_received(&mut self, data: &[u8]) {
        let _ = data;
    }

    /// The peer closed its end (read endpoints only). See
    /// [`ProcessHandler::eof_received`] for the return value.
    fn eof_received(&mut self) -> bool {
        false
    }

    /// The write buffer crossed the high-water mark (write endpoints only).
    fn pause_writing(&mut self) {}

    /// The write buffer drained to the low-water mark (write endpoints only).
    fn resume_writing(&mut self) {}

    /// The endpoint finished tearing down; its descriptor closes after this
    /// call returns.
    fn connection_lost(&mut self, err: Option<io::Error>) {
        let _ = err;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_index_round_trip() {
        for stream in StreamIndex::ALL {
            assert_eq!(StreamIndex::from_raw(stream.as_raw()), Some(stream));
        }
        assert_eq!(StreamIndex::from_raw(3), None);
    }

    #[test]
    fn stream_index_names() {
        assert_eq!(StreamIndex::Stdin.to_string(), "stdin");
        assert_eq!(StreamIndex::Stdout.to_string(), "stdout");
        assert_eq!(StreamIndex::Stderr.to_string(), "stderr");
    }
}
