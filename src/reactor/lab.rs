//! Deterministic lab reactor.
//!
//! The lab reactor provides a controllable, deterministic event source for
//! testing pipe and transport behavior without relying on OS-level readiness
//! notification. Readiness is injected explicitly with
//! [`LabReactor::inject_readable`] / [`LabReactor::inject_writable`], and
//! deferred callbacks run only when [`LabReactor::run_pending`] pumps them.

use super::{Callback, ReadyCallback, Reactor, SendCallback};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::os::fd::RawFd;
use std::rc::Rc;

/// Deterministic reactor implementation for tests.
#[derive(Default)]
pub struct LabReactor {
    state: RefCell<LabState>,
    threadsafe: Mutex<VecDeque<SendCallback>>,
}

#[derive(Default)]
struct LabState {
    readers: HashMap<RawFd, ReadyCallback>,
    writers: HashMap<RawFd, ReadyCallback>,
    scheduled: VecDeque<Callback>,
}

impl LabReactor {
    /// Creates a new lab reactor with no registrations and an empty queue.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Fires the reader callback registered for `fd`, if any.
    ///
    /// Returns true if a reader was registered.
    pub fn inject_readable(&self, fd: RawFd) -> bool {
        let callback = self.state.borrow().readers.get(&fd).cloned();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Fires the writer callback registered for `fd`, if any.
    ///
    /// Returns true if a writer was registered.
    pub fn inject_writable(&self, fd: RawFd) -> bool {
        let callback = self.state.borrow().writers.get(&fd).cloned();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Runs queued callbacks in FIFO order until the queue is empty.
    ///
    /// Callbacks scheduled while draining run in the same call. Returns the
    /// number of callbacks executed.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let threadsafe = self.threadsafe.lock().pop_front();
            if let Some(callback) = threadsafe {
                callback();
                ran += 1;
                continue;
            }
            let callback = self.state.borrow_mut().scheduled.pop_front();
            match callback {
                Some(callback) => {
                    callback();
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }

    /// Returns true if a reader callback is registered for `fd`.
    #[must_use]
    pub fn has_reader(&self, fd: RawFd) -> bool {
        self.state.borrow().readers.contains_key(&fd)
    }

    /// Returns true if a writer callback is registered for `fd`.
    #[must_use]
    pub fn has_writer(&self, fd: RawFd) -> bool {
        self.state.borrow().writers.contains_key(&fd)
    }

    /// Number of callbacks currently queued.
    #[must_use]
    pub fn scheduled_len(&self) -> usize {
        self.state.borrow().scheduled.len() + self.threadsafe.lock().len()
    }
}

impl Reactor for LabReactor {
    fn register_reader(&self, fd: RawFd, callback: ReadyCallback) {
        self.state.borrow_mut().readers.insert(fd, callback);
    }

    fn register_writer(&self, fd: RawFd, callback: ReadyCallback) {
        self.state.borrow_mut().writers.insert(fd, callback);
    }

    fn unregister_reader(&self, fd: RawFd) -> bool {
        self.state.borrow_mut().readers.remove(&fd).is_some()
    }

    fn unregister_writer(&self, fd: RawFd) -> bool {
        self.state.borrow_mut().writers.remove(&fd).is_some()
    }

    fn schedule(&self, callback: Callback) {
        self.state.borrow_mut().scheduled.push_back(callback);
    }

    fn schedule_threadsafe(&self, callback: SendCallback) {
        self.threadsafe.lock().push_back(callback);
    }
}
