//! Error types and error classification.
//!
//! Errors fall into two delivery classes. I/O failures observed on a pipe
//! descriptor and child-reaping races are absorbed at the component boundary
//! and surface as lifecycle callbacks (`connection_lost` with an error), since
//! no caller is blocked waiting for them. Misuse and process-lookup failures
//! are returned synchronously to the direct caller.
//!
//! Transient conditions (`WouldBlock`, `Interrupted`) are never surfaced at
//! all; readiness-driven retry handles them.

use std::io;

use crate::watcher::Pid;

/// Error type for transport, watcher, and signal operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation on a transport that has already been closed.
    #[error("operation on closed transport")]
    ClosedTransport,

    /// The target process no longer exists (ESRCH, or already torn down).
    #[error("process {0} not found")]
    ProcessLookup(Pid),

    /// The program to spawn was not found (ENOENT).
    #[error("program not found: {0}")]
    ProgramNotFound(String),

    /// Permission to execute the program was denied (EACCES).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Spawning the child process failed for another reason.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// The program that could not be started.
        program: String,
        /// The underlying OS error.
        source: io::Error,
    },

    /// Signal number outside the valid range.
    #[error("signal {0} out of range")]
    InvalidSignal(i32),

    /// The signal exists but cannot be caught (EINVAL from sigaction).
    #[error("signal {0} cannot be caught")]
    UncatchableSignal(i32),

    /// Signal handlers may only be managed from the thread that owns the
    /// bridge.
    #[error("signal handlers must be managed from the loop thread")]
    WrongThread,
}

/// Returns true for errors that readiness-driven retry absorbs silently.
#[must_use]
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::Other)));
    }

    #[test]
    fn error_display() {
        assert_eq!(
            Error::ClosedTransport.to_string(),
            "operation on closed transport"
        );
        assert_eq!(Error::ProcessLookup(42).to_string(), "process 42 not found");
        assert_eq!(
            Error::InvalidSignal(99).to_string(),
            "signal 99 out of range"
        );
        let err = Error::Spawn {
            program: "frobnicate".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(err.to_string().contains("frobnicate"));
    }
}
