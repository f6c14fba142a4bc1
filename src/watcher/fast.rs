//! Wildcard-reaping child watcher.

use super::{
    attach_watcher, detach_watcher, wait_nohang, ChildWatcher, ExitCallback, Pid, WaitOutcome,
};
use crate::error::Error;
use crate::signal::SignalBridge;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// State the reap path shares with spawn scopes.
///
/// Guarded by a mutex rather than loop-thread discipline: raw signal
/// delivery is asynchronous with respect to whichever thread holds the loop,
/// and scopes may be bracketed while a nested handler runs.
#[derive(Default)]
struct ScopedState {
    zombies: BTreeMap<Pid, i32>,
    open_scopes: u32,
}

/// Watcher that reaps any ready child with `waitpid(-1)`.
///
/// O(1) per SIGCHLD regardless of how many children are tracked, at the cost
/// of reaping children other code may have spawned. Every spawn must be
/// bracketed by a spawn scope: a reap that races registration is cached as a
/// zombie and claimed when the handler arrives. When the last scope closes,
/// leftover zombies are reported as untracked and dropped.
#[derive(Default)]
pub struct FastChildWatcher {
    callbacks: RefCell<HashMap<Pid, ExitCallback>>,
    scoped: Mutex<ScopedState>,
}

impl FastChildWatcher {
    /// Creates a watcher with no tracked children.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Number of exit codes cached for pids nobody registered yet.
    #[must_use]
    pub fn cached_zombies(&self) -> usize {
        self.scoped.lock().zombies.len()
    }

    /// Number of pids with registered handlers.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.callbacks.borrow().len()
    }
}

impl ChildWatcher for FastChildWatcher {
    fn attach(self: Rc<Self>, bridge: &SignalBridge) -> Result<(), Error> {
        attach_watcher(self, bridge)
    }

    fn detach(&self, bridge: &SignalBridge) {
        detach_watcher(bridge);
    }

    fn add_child_handler(&self, pid: Pid, callback: ExitCallback) {
        debug_assert!(
            self.scoped.lock().open_scopes > 0,
            "add_child_handler outside a spawn scope"
        );
        // The child may have been reaped before registration.
        let cached = self.scoped.lock().zombies.remove(&pid);
        match cached {
            Some(code) => callback(pid, code),
            None => {
                self.callbacks.borrow_mut().insert(pid, callback);
            }
        }
    }

    fn remove_child_handler(&self, pid: Pid) -> bool {
        self.callbacks.borrow_mut().remove(&pid).is_some()
    }

    fn open_spawn_scope(&self) {
        self.scoped.lock().open_scopes += 1;
    }

    fn close_spawn_scope(&self) {
        let leftovers = {
            let mut scoped = self.scoped.lock();
            scoped.open_scopes -= 1;
            if scoped.open_scopes > 0 || scoped.zombies.is_empty() {
                return;
            }
            std::mem::take(&mut scoped.zombies)
        };
        for (pid, code) in leftovers {
            tracing::warn!(pid, code, "caught termination from untracked pid");
        }
    }

    fn sigchld_received(&self) {
        // Signal coalescing: keep reaping until no child is ready.
        loop {
            match wait_nohang(-1) {
                Ok(WaitOutcome::StillRunning) | Ok(WaitOutcome::NoChildren) => return,
                Ok(WaitOutcome::Reaped { pid, code }) => {
                    let callback = self.callbacks.borrow_mut().remove(&pid);
                    match callback {
                        Some(callback) => callback(pid, code),
                        None => {
                            let mut scoped = self.scoped.lock();
                            if scoped.open_scopes > 0 {
                                // Registration may still be on its way.
                                scoped.zombies.insert(pid, code);
                                continue;
                            }
                            drop(scoped);
                            tracing::warn!(pid, code, "caught termination from untracked pid");
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "waitpid(-1) failed");
                    return;
                }
            }
        }
    }

    fn shutdown(&self) {
        self.callbacks.borrow_mut().clear();
        self.scoped.lock().zombies.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::tests_support::{child_has_exited, recorded_exit, spawn_exiting, wait_for};

    #[test]
    fn reaps_registered_child() {
        let _guard = crate::test_util::process_lock();
        let watcher = FastChildWatcher::new();
        let handle: Rc<dyn ChildWatcher> = watcher.clone();
        let scope = handle.spawn_scope();
        let pid = spawn_exiting(9);
        let (callback, slot) = recorded_exit();
        watcher.add_child_handler(pid, callback);
        drop(scope);

        assert!(wait_for(|| {
            watcher.sigchld_received();
            slot.get().is_some()
        }));
        assert_eq!(slot.get(), Some((pid, 9)));
    }

    #[test]
    fn zombie_cache_preserves_codes_reaped_before_registration() {
        let _guard = crate::test_util::process_lock();
        let watcher = FastChildWatcher::new();
        let handle: Rc<dyn ChildWatcher> = watcher.clone();
        let scope = handle.spawn_scope();

        let pid_a = spawn_exiting(4);
        let pid_b = spawn_exiting(6);
        assert!(wait_for(|| child_has_exited(pid_a) && child_has_exited(pid_b)));

        // Both reaps land before any registration; the scope is open, so the
        // codes go into the zombie cache.
        watcher.sigchld_received();
        assert_eq!(watcher.cached_zombies(), 2);

        let (callback_a, slot_a) = recorded_exit();
        let (callback_b, slot_b) = recorded_exit();
        watcher.add_child_handler(pid_a, callback_a);
        watcher.add_child_handler(pid_b, callback_b);
        assert_eq!(slot_a.get(), Some((pid_a, 4)));
        assert_eq!(slot_b.get(), Some((pid_b, 6)));
        assert_eq!(watcher.cached_zombies(), 0);
        assert_eq!(watcher.tracked(), 0);
        drop(scope);
    }

    #[test]
    fn last_scope_exit_drops_unclaimed_zombies() {
        let _guard = crate::test_util::process_lock();
        let watcher = FastChildWatcher::new();
        let handle: Rc<dyn ChildWatcher> = watcher.clone();
        let outer = handle.spawn_scope();
        let inner = handle.spawn_scope();

        let pid = spawn_exiting(2);
        assert!(wait_for(|| child_has_exited(pid)));
        watcher.sigchld_received();
        assert_eq!(watcher.cached_zombies(), 1);

        // Inner scope closing leaves the cache intact; only the last exit
        // reports and clears.
        drop(inner);
        assert_eq!(watcher.cached_zombies(), 1);
        drop(outer);
        assert_eq!(watcher.cached_zombies(), 0);
    }

    #[test]
    fn reap_with_no_scope_reports_untracked() {
        let _guard = crate::test_util::process_lock();
        let watcher = FastChildWatcher::new();
        let pid = spawn_exiting(0);
        assert!(wait_for(|| child_has_exited(pid)));
        // No scope open: the exit is logged as untracked, never cached.
        watcher.sigchld_received();
        assert_eq!(watcher.cached_zombies(), 0);
    }

    #[test]
    fn shutdown_clears_state() {
        let _guard = crate::test_util::process_lock();
        let watcher = FastChildWatcher::new();
        let handle: Rc<dyn ChildWatcher> = watcher.clone();
        let scope = handle.spawn_scope();
        let pid = spawn_exiting(1);
        assert!(wait_for(|| child_has_exited(pid)));
        watcher.sigchld_received();
        assert_eq!(watcher.cached_zombies(), 1);
        watcher.shutdown();
        assert_eq!(watcher.cached_zombies(), 0);
        assert_eq!(watcher.tracked(), 0);
        drop(scope);
    }
}
