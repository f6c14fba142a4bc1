#![allow(unsafe_code)]
//! Child-process reaping.
//!
//! This module uses unsafe code for `waitpid`.
//!
//! A [`ChildWatcher`] maps OS child-termination notifications (SIGCHLD,
//! delivered through a [`SignalBridge`]) to registered per-pid callbacks.
//! It is a shared per-loop service: transports are handed a watcher, they
//! never own one. Two strategies ship:
//!
//! - [`SafeChildWatcher`]: polls each tracked pid individually on every
//!   notification. Never reaps a child it was not told about, at O(n) cost
//!   per SIGCHLD.
//! - [`FastChildWatcher`]: reaps any ready child with `waitpid(-1)` at O(1)
//!   cost per SIGCHLD, caching exit codes that arrive before registration.
//!   Requires every spawn to be bracketed by a [`SpawnScope`].
//!
//! Both strategies deliver a given pid's exit exactly once, compute exit
//! codes identically (`-signal` for signaled children, the exit status
//! otherwise), and tolerate registration racing termination.

pub mod fast;
pub mod safe;

pub use fast::FastChildWatcher;
pub use safe::SafeChildWatcher;

use crate::error::Error;
use crate::signal::{SignalBridge, SignalKind};
use std::io;
use std::rc::Rc;

/// OS process identifier.
pub type Pid = libc::pid_t;

/// Callback invoked exactly once with `(pid, exit_code)` when a registered
/// child terminates.
pub type ExitCallback = Box<dyn FnOnce(Pid, i32)>;

/// Exit code reported when a registered pid turns out to have been reaped
/// elsewhere and its real status is unrecoverable.
pub const UNTRACEABLE_EXIT_CODE: i32 = 255;

/// Child-reaping policy attached to one event loop.
pub trait ChildWatcher {
    /// Hooks the watcher up to SIGCHLD delivery and performs one immediate
    /// reap pass to close the race with children that died before attach.
    ///
    /// # Errors
    ///
    /// Returns an error if the SIGCHLD handler cannot be installed.
    fn attach(self: Rc<Self>, bridge: &SignalBridge) -> Result<(), Error>;

    /// Unhooks the watcher from SIGCHLD delivery.
    fn detach(&self, bridge: &SignalBridge);

    /// Arranges for `callback(pid, exit_code)` to run when `pid` terminates.
    ///
    /// Registering a pid that already terminated still fires the callback
    /// exactly once. Registering a pid twice replaces the previous callback.
    fn add_child_handler(&self, pid: Pid, callback: ExitCallback);

    /// Removes the handler for `pid`. Returns false if none was registered.
    fn remove_child_handler(&self, pid: Pid) -> bool;

    /// Opens a spawn scope. Prefer the RAII guard from `spawn_scope()`.
    fn open_spawn_scope(&self);

    /// Closes a spawn scope opened with [`ChildWatcher::open_spawn_scope`].
    fn close_spawn_scope(&self);

    /// Runs the strategy's reap pass. Invoked on the loop thread each time
    /// SIGCHLD is observed.
    fn sigchld_received(&self);

    /// Drops all registered handlers and cached state.
    fn shutdown(&self);
}

impl dyn ChildWatcher {
    /// Opens a spawn scope, closed when the returned guard drops.
    ///
    /// Every fork must happen inside a scope so a reap racing the fork
    /// cannot be misattributed.
    #[must_use]
    pub fn spawn_scope(&self) -> SpawnScope<'_> {
        self.open_spawn_scope();
        SpawnScope { watcher: self }
    }
}

/// RAII guard bracketing one process spawn.
pub struct SpawnScope<'a> {
    watcher: &'a dyn ChildWatcher,
}

impl Drop for SpawnScope<'_> {
    fn drop(&mut self) {
        self.watcher.close_spawn_scope();
    }
}

/// Registers SIGCHLD dispatch for `watcher` and runs one reap pass.
pub(crate) fn attach_watcher(
    watcher: Rc<dyn ChildWatcher>,
    bridge: &SignalBridge,
) -> Result<(), Error> {
    let hooked = Rc::clone(&watcher);
    bridge.add_handler(
        SignalKind::child(),
        Rc::new(move || hooked.sigchld_received()),
    )?;
    // A child may have terminated before the handler existed.
    watcher.sigchld_received();
    Ok(())
}

pub(crate) fn detach_watcher(bridge: &SignalBridge) {
    if let Err(err) = bridge.remove_handler(SignalKind::child()) {
        tracing::warn!(error = %err, "failed to remove SIGCHLD handler");
    }
}

/// Maps a raw `waitpid` status to the exit code reported to callbacks:
/// negative signal number if the child died to a signal, the exit status if
/// it exited, the raw status as a diagnostic fallback otherwise.
pub(crate) fn decode_wait_status(status: libc::c_int) -> i32 {
    if libc::WIFSIGNALED(status) {
        -libc::WTERMSIG(status)
    } else if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else {
        status
    }
}

/// Result of one non-blocking `waitpid` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// The queried child (or, for -1, every child) is still running.
    StillRunning,
    /// A child was reaped.
    Reaped { pid: Pid, code: i32 },
    /// No matching child exists (ECHILD).
    NoChildren,
}

/// Non-blocking `waitpid`. Pass -1 to reap any ready child.
pub(crate) fn wait_nohang(pid: Pid) -> io::Result<WaitOutcome> {
    let mut status: libc::c_int = 0;
    loop {
        let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ECHILD) => return Ok(WaitOutcome::NoChildren),
                _ => return Err(err),
            }
        }
        if ret == 0 {
            return Ok(WaitOutcome::StillRunning);
        }
        return Ok(WaitOutcome::Reaped {
            pid: ret,
            code: decode_wait_status(status),
        });
    }
}
