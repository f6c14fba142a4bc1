//! Asynchronous Unix subprocess transports for callback-driven event loops.
//!
//! `procwire` spawns child processes, wires their standard streams to
//! non-blocking pipe endpoints, reaps terminated children through SIGCHLD,
//! and delivers ordered lifecycle callbacks to a protocol handler — all on a
//! single-threaded cooperative event loop consumed through the narrow
//! [`Reactor`] interface.
//!
//! # Components
//!
//! - [`pipe::ReadPipeEndpoint`] / [`pipe::WritePipeEndpoint`]: one
//!   non-blocking descriptor each, readiness-driven, with partial-write
//!   buffering on the write side.
//! - [`watcher::SafeChildWatcher`] / [`watcher::FastChildWatcher`]: map
//!   child termination to registered callbacks, with two reaping strategies.
//! - [`transport::ProcessTransport`]: owns a spawned process and its pipe
//!   endpoints; the orchestration layer callers talk to.
//! - [`signal::SignalBridge`]: converts raw signal delivery into
//!   loop-scheduled callbacks through a self-pipe.
//!
//! # Example
//!
//! ```ignore
//! use procwire::{Command, Config, ProcessTransport, SafeChildWatcher, Stdio};
//! use procwire::reactor::PollReactor;
//! use procwire::signal::SignalBridge;
//! use std::rc::Rc;
//!
//! let reactor = PollReactor::new()?;
//! let bridge = SignalBridge::new(reactor.clone())?;
//! let watcher: Rc<dyn procwire::ChildWatcher> = SafeChildWatcher::new();
//! watcher.clone().attach(&bridge)?;
//!
//! let mut command = Command::new("cat");
//! command.stdin(Stdio::piped()).stdout(Stdio::piped());
//! let transport = ProcessTransport::spawn(
//!     reactor.clone(),
//!     &watcher,
//!     &command,
//!     handler,
//!     Config::default(),
//!     None,
//! )?;
//! loop {
//!     reactor.run_once(None)?;
//! }
//! ```
//!
//! # Concurrency model
//!
//! Everything runs on the loop thread; components are `Rc`-shared and not
//! `Send`. The two exceptions are signal-adjacent: the raw signal handler
//! only writes to a wakeup pipe, and the fast watcher's zombie cache and
//! spawn-scope counter sit behind a mutex because raw signal delivery is
//! asynchronous. No operation blocks; retries are driven purely by reactor
//! readiness callbacks.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handler;
pub mod pipe;
pub mod reactor;
pub mod signal;
pub mod test_logging;
pub mod transport;
pub mod watcher;

pub use config::Config;
pub use error::Error;
pub use handler::{PipeHandler, ProcessHandler, StreamIndex};
pub use reactor::Reactor;
pub use signal::{SignalBridge, SignalKind};
pub use transport::{Command, ExitWaiter, PipeRef, ProcessHandle, ProcessTransport, Stdio};
pub use watcher::{ChildWatcher, FastChildWatcher, Pid, SafeChildWatcher, SpawnScope};

#[cfg(test)]
pub(crate) mod test_util {
    //! Serialization for tests touching process-global state.
    //!
    //! `waitpid(-1)`, `sigaction`, and the signal wakeup descriptor are
    //! process-wide; tests that exercise them must not interleave.

    use parking_lot::{Mutex, MutexGuard};

    static PROCESS_STATE: Mutex<()> = Mutex::new(());

    pub(crate) fn process_lock() -> MutexGuard<'static, ()> {
        PROCESS_STATE.lock()
    }
}
