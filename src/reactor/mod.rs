//! Reactor abstraction for readiness notification and deferred callbacks.
//!
//! The transports in this crate do not own an event loop; they consume one
//! through the narrow [`Reactor`] interface: per-descriptor readiness
//! registration plus FIFO deferred-callback scheduling. Two implementations
//! ship with the crate:
//!
//! - [`LabReactor`]: deterministic, for tests. Readiness is injected
//!   explicitly; nothing touches the OS.
//! - [`PollReactor`]: a minimal `poll(2)` reference loop for end-to-end use.
//!
//! # Contract
//!
//! - At most one reader and one writer registration per descriptor;
//!   re-registering replaces the previous callback.
//! - `schedule` runs callbacks on the next loop iteration, in FIFO order.
//! - `schedule_threadsafe` is identical but callable from any thread; the
//!   loop must wake up if it is blocked in its poller.

pub mod lab;
pub mod poll;

pub use lab::LabReactor;
pub use poll::{PollReactor, RemoteHandle};

use std::os::fd::RawFd;
use std::rc::Rc;

/// A readiness callback, invoked each time the descriptor becomes ready.
pub type ReadyCallback = Rc<dyn Fn()>;

/// A deferred callback, invoked once on a later loop iteration.
pub type Callback = Box<dyn FnOnce()>;

/// A deferred callback enqueued from an arbitrary thread.
pub type SendCallback = Box<dyn FnOnce() + Send>;

/// The event-loop interface consumed by transports, watchers, and the
/// signal bridge.
pub trait Reactor {
    /// Registers `callback` to run whenever `fd` is read-ready.
    ///
    /// Replaces any previous reader registration for `fd`.
    fn register_reader(&self, fd: RawFd, callback: ReadyCallback);

    /// Registers `callback` to run whenever `fd` is write-ready.
    ///
    /// Replaces any previous writer registration for `fd`.
    fn register_writer(&self, fd: RawFd, callback: ReadyCallback);

    /// Removes the reader registration for `fd`. Returns true if one existed.
    fn unregister_reader(&self, fd: RawFd) -> bool;

    /// Removes the writer registration for `fd`. Returns true if one existed.
    fn unregister_writer(&self, fd: RawFd) -> bool;

    /// Enqueues `callback` to run on the next loop iteration, FIFO.
    fn schedule(&self, callback: Callback);

    /// Enqueues `callback` from any thread, waking the loop if needed.
    fn schedule_threadsafe(&self, callback: SendCallback);
}
