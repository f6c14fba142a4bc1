//! Polling child watcher.

use super::{
    attach_watcher, detach_watcher, wait_nohang, ChildWatcher, ExitCallback, Pid, WaitOutcome,
    UNTRACEABLE_EXIT_CODE,
};
use crate::error::Error;
use crate::signal::SignalBridge;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Watcher that polls each tracked pid individually.
///
/// On every SIGCHLD, each registered pid gets one non-blocking `waitpid`.
/// This never disturbs children spawned by other code, at O(n) cost per
/// notification. Registration immediately polls once, so a child that
/// terminated before its handler was registered still resolves.
#[derive(Default)]
pub struct SafeChildWatcher {
    callbacks: RefCell<HashMap<Pid, ExitCallback>>,
}

impl SafeChildWatcher {
    /// Creates a watcher with no tracked children.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Number of pids currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.callbacks.borrow().len()
    }

    fn poll_pid(&self, expected: Pid) {
        debug_assert!(expected > 0);
        match wait_nohang(expected) {
            Ok(WaitOutcome::StillRunning) => {}
            Ok(WaitOutcome::Reaped { pid, code }) => self.invoke(pid, code),
            Ok(WaitOutcome::NoChildren) => {
                // Already reaped elsewhere; the real status is gone.
                tracing::warn!(
                    pid = expected,
                    code = UNTRACEABLE_EXIT_CODE,
                    "unknown child process, reporting fallback exit code"
                );
                self.invoke(expected, UNTRACEABLE_EXIT_CODE);
            }
            Err(err) => {
                tracing::warn!(pid = expected, error = %err, "waitpid failed");
            }
        }
    }

    fn invoke(&self, pid: Pid, code: i32) {
        let callback = self.callbacks.borrow_mut().remove(&pid);
        if let Some(callback) = callback {
            callback(pid, code);
        }
    }
}

impl ChildWatcher for SafeChildWatcher {
    fn attach(self: Rc<Self>, bridge: &SignalBridge) -> Result<(), Error> {
        attach_watcher(self, bridge)
    }

    fn detach(&self, bridge: &SignalBridge) {
        detach_watcher(bridge);
    }

    fn add_child_handler(&self, pid: Pid, callback: ExitCallback) {
        self.callbacks.borrow_mut().insert(pid, callback);
        // The child may already have terminated before registration.
        self.poll_pid(pid);
    }

    fn remove_child_handler(&self, pid: Pid) -> bool {
        self.callbacks.borrow_mut().remove(&pid).is_some()
    }

    fn open_spawn_scope(&self) {}

    fn close_spawn_scope(&self) {}

    fn sigchld_received(&self) {
        let pids: Vec<Pid> = self.callbacks.borrow().keys().copied().collect();
        for pid in pids {
            self.poll_pid(pid);
        }
    }

    fn shutdown(&self) {
        self.callbacks.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::tests_support::{
        child_has_exited, kill_and_reap, recorded_exit, spawn_exiting, spawn_sleeping, wait_for,
    };

    #[test]
    fn reaps_registered_child() {
        let _guard = crate::test_util::process_lock();
        let watcher = SafeChildWatcher::new();
        let pid = spawn_exiting(5);
        let (callback, slot) = recorded_exit();
        watcher.add_child_handler(pid, callback);

        assert!(wait_for(|| {
            watcher.sigchld_received();
            slot.get().is_some()
        }));
        assert_eq!(slot.get(), Some((pid, 5)));
        assert_eq!(watcher.tracked(), 0);
    }

    #[test]
    fn registration_after_exit_still_fires_once() {
        let _guard = crate::test_util::process_lock();
        let watcher = SafeChildWatcher::new();
        let pid = spawn_exiting(3);
        // Let the child terminate before anything is registered.
        assert!(wait_for(|| child_has_exited(pid)));

        let (callback, slot) = recorded_exit();
        watcher.add_child_handler(pid, callback);
        // The registration-time poll already resolved it.
        assert_eq!(slot.get(), Some((pid, 3)));

        // Further notifications must not fire again.
        watcher.sigchld_received();
        assert_eq!(watcher.tracked(), 0);
    }

    #[test]
    fn untracked_pids_are_left_alone() {
        let _guard = crate::test_util::process_lock();
        let watcher = SafeChildWatcher::new();
        let stray = spawn_exiting(0);
        // Nothing registered: notifications never reap the stray child.
        watcher.sigchld_received();
        assert_eq!(watcher.tracked(), 0);

        let (callback, slot) = recorded_exit();
        watcher.add_child_handler(stray, callback);
        assert!(wait_for(|| {
            watcher.sigchld_received();
            slot.get().is_some()
        }));
        assert_eq!(slot.get(), Some((stray, 0)));
    }

    #[test]
    fn remove_child_handler_reports_presence() {
        let _guard = crate::test_util::process_lock();
        let watcher = SafeChildWatcher::new();
        let pid = spawn_sleeping();
        watcher.add_child_handler(pid, Box::new(|_, _| {}));
        assert!(watcher.remove_child_handler(pid));
        assert!(!watcher.remove_child_handler(pid));

        // The watcher no longer tracks the child; reap it here.
        kill_and_reap(pid);
    }
}
