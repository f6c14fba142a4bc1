#![allow(unsafe_code)]
//! Signal-to-loop bridge.
//!
//! This module uses unsafe code for `sigaction` installation and the raw
//! signal handler's `write(2)` into the wakeup pipe.
//!
//! The raw handler does no unsafe work beyond marking the self-pipe: it
//! loads the process-global wakeup descriptor (an atomic) and writes the
//! signal number into it as a single byte. The loop observes the pipe's
//! readiness on its next iteration, drains it, and schedules the registered
//! callback for each delivered signal. Registered callbacks therefore always
//! run on the loop thread, and no shared map is ever touched from signal
//! context.

use crate::error::Error;
use crate::reactor::Reactor;
use crate::signal::kind::{SignalKind, MAX_SIGNAL};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread::{self, ThreadId};

/// Write end of the active bridge's wakeup pipe, or -1 when no bridge has
/// handlers installed. The raw signal handler reads this; everything else
/// only swaps it from the loop thread.
static WAKEUP_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn wakeup_signal_handler(signum: libc::c_int) {
    let fd = WAKEUP_FD.load(Ordering::Acquire);
    if fd >= 0 {
        let byte = signum as u8;
        // Async-signal-safe: write(2) on an O_NONBLOCK pipe. A full pipe
        // means a wakeup is already pending, so a short write is fine.
        unsafe {
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

fn install_sigaction(signum: i32) -> io::Result<()> {
    let handler: extern "C" fn(libc::c_int) = wakeup_signal_handler;
    // SAFETY: zeroed sigaction is a valid initial value on all Unix targets.
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = handler as usize;
    action.sa_flags = libc::SA_RESTART;
    unsafe {
        libc::sigemptyset(&mut action.sa_mask);
    }
    let ret = unsafe { libc::sigaction(signum, &action, std::ptr::null_mut()) };
    if ret == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn restore_default_sigaction(signum: i32) -> io::Result<()> {
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = libc::SIG_DFL;
    unsafe {
        libc::sigemptyset(&mut action.sa_mask);
    }
    let ret = unsafe { libc::sigaction(signum, &action, std::ptr::null_mut()) };
    if ret == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Converts raw Unix signal delivery into loop-scheduled callbacks.
///
/// One bridge should be active per process: the wakeup descriptor the raw
/// handler writes into is process-global state.
///
/// Handlers may only be added or removed from the thread that created the
/// bridge.
pub struct SignalBridge {
    reactor: Rc<dyn Reactor>,
    handlers: RefCell<HashMap<i32, Rc<dyn Fn()>>>,
    pipe_read: OwnedFd,
    pipe_write: OwnedFd,
    owner: ThreadId,
    weak: Weak<Self>,
}

impl SignalBridge {
    /// Creates a bridge and registers its wakeup pipe with the reactor.
    ///
    /// # Errors
    ///
    /// Returns an error if the wakeup pipe cannot be created.
    pub fn new(reactor: Rc<dyn Reactor>) -> Result<Rc<Self>, Error> {
        let (pipe_read, pipe_write) = crate::reactor::poll::nonblocking_pipe()?;
        let bridge = Rc::new_cyclic(|weak| Self {
            reactor,
            handlers: RefCell::new(HashMap::new()),
            pipe_read,
            pipe_write,
            owner: thread::current().id(),
            weak: weak.clone(),
        });
        let weak = bridge.weak.clone();
        bridge.reactor.register_reader(
            bridge.pipe_read.as_raw_fd(),
            Rc::new(move || {
                if let Some(bridge) = weak.upgrade() {
                    bridge.wakeup_ready();
                }
            }),
        );
        Ok(bridge)
    }

    /// Registers `callback` to run (loop-scheduled) on each delivery of
    /// `kind`. Replaces any previous handler for the same signal.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSignal`] if the number is out of range.
    /// - [`Error::WrongThread`] if called off the owning thread.
    /// - [`Error::UncatchableSignal`] if the OS refuses the handler; the
    ///   bridge's previous state is restored.
    pub fn add_handler(&self, kind: SignalKind, callback: Rc<dyn Fn()>) -> Result<(), Error> {
        let signum = kind.as_raw();
        self.check_signal(signum)?;
        self.check_thread()?;

        // Publish the wakeup descriptor before touching the disposition so a
        // signal arriving mid-registration still lands in the pipe.
        WAKEUP_FD.store(self.pipe_write.as_raw_fd(), Ordering::Release);
        self.handlers.borrow_mut().insert(signum, callback);

        if let Err(err) = install_sigaction(signum) {
            self.handlers.borrow_mut().remove(&signum);
            if self.handlers.borrow().is_empty() {
                WAKEUP_FD.store(-1, Ordering::Release);
            }
            if err.raw_os_error() == Some(libc::EINVAL) {
                return Err(Error::UncatchableSignal(signum));
            }
            return Err(Error::Io(err));
        }
        tracing::debug!(signal = signum, "signal handler installed");
        Ok(())
    }

    /// Removes the handler for `kind`, restoring the default disposition.
    ///
    /// Returns false if no handler was registered.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::add_handler`].
    pub fn remove_handler(&self, kind: SignalKind) -> Result<bool, Error> {
        let signum = kind.as_raw();
        self.check_signal(signum)?;
        self.check_thread()?;

        if self.handlers.borrow_mut().remove(&signum).is_none() {
            return Ok(false);
        }
        if let Err(err) = restore_default_sigaction(signum) {
            if err.raw_os_error() == Some(libc::EINVAL) {
                return Err(Error::UncatchableSignal(signum));
            }
            return Err(Error::Io(err));
        }
        if self.handlers.borrow().is_empty() {
            WAKEUP_FD.store(-1, Ordering::Release);
        }
        tracing::debug!(signal = signum, "signal handler removed");
        Ok(true)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    /// Removes every handler and detaches the wakeup pipe from the reactor.
    pub fn shutdown(&self) {
        let signals: Vec<i32> = self.handlers.borrow().keys().copied().collect();
        for signum in signals {
            let _ = restore_default_sigaction(signum);
        }
        self.handlers.borrow_mut().clear();
        WAKEUP_FD.store(-1, Ordering::Release);
        self.reactor.unregister_reader(self.pipe_read.as_raw_fd());
    }

    fn wakeup_ready(&self) {
        let mut delivered: SmallVec<[u8; 16]> = SmallVec::new();
        let mut buf = [0u8; 64];
        loop {
            match crate::pipe::read_fd(self.pipe_read.as_raw_fd(), &mut buf) {
                Ok(0) => break,
                Ok(n) => delivered.extend_from_slice(&buf[..n]),
                Err(_) => break,
            }
        }
        for signum in delivered {
            let callback = self.handlers.borrow().get(&i32::from(signum)).cloned();
            match callback {
                Some(callback) => {
                    self.reactor.schedule(Box::new(move || callback()));
                }
                None => {
                    // A disposition raced removal; nothing to dispatch.
                    tracing::trace!(signal = signum, "signal with no registered handler");
                }
            }
        }
    }

    fn check_signal(&self, signum: i32) -> Result<(), Error> {
        if (1..=MAX_SIGNAL).contains(&signum) {
            Ok(())
        } else {
            Err(Error::InvalidSignal(signum))
        }
    }

    fn check_thread(&self) -> Result<(), Error> {
        if thread::current().id() == self.owner {
            Ok(())
        } else {
            Err(Error::WrongThread)
        }
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::LabReactor;

    #[test]
    fn rejects_out_of_range_signals() {
        let _guard = crate::test_util::process_lock();
        let reactor = LabReactor::new();
        let bridge = SignalBridge::new(reactor).expect("bridge");
        let err = bridge
            .add_handler(SignalKind::from_raw(0), Rc::new(|| {}))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSignal(0)));
        let err = bridge
            .add_handler(SignalKind::from_raw(4096), Rc::new(|| {}))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSignal(4096)));
    }

    #[test]
    fn rejects_uncatchable_signals() {
        let _guard = crate::test_util::process_lock();
        let reactor = LabReactor::new();
        let bridge = SignalBridge::new(reactor).expect("bridge");
        let err = bridge
            .add_handler(SignalKind::from_raw(libc::SIGKILL), Rc::new(|| {}))
            .unwrap_err();
        assert!(matches!(err, Error::UncatchableSignal(_)));
        assert_eq!(bridge.handler_count(), 0);
    }

    #[test]
    fn rejects_registration_from_other_threads() {
        let _guard = crate::test_util::process_lock();
        let reactor = LabReactor::new();
        let bridge = SignalBridge::new(reactor).expect("bridge");
        let bridge_ptr = &*bridge as *const SignalBridge as usize;
        let result = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    // SAFETY: the bridge outlives the scope; only the thread
                    // check runs before rejection.
                    let bridge = unsafe { &*(bridge_ptr as *const SignalBridge) };
                    bridge.add_handler(SignalKind::window_change(), Rc::new(|| {}))
                })
                .join()
                .expect("thread")
        });
        assert!(matches!(result, Err(Error::WrongThread)));
    }

    #[test]
    fn remove_without_handler_returns_false() {
        let _guard = crate::test_util::process_lock();
        let reactor = LabReactor::new();
        let bridge = SignalBridge::new(reactor).expect("bridge");
        let removed = bridge.remove_handler(SignalKind::window_change()).expect("remove");
        assert!(!removed);
    }

    #[test]
    fn delivery_schedules_registered_callback() {
        let _guard = crate::test_util::process_lock();
        let reactor = LabReactor::new();
        let bridge = SignalBridge::new(reactor.clone()).expect("bridge");
        let hits = Rc::new(std::cell::Cell::new(0));
        {
            let hits = hits.clone();
            bridge
                .add_handler(
                    SignalKind::window_change(),
                    Rc::new(move || hits.set(hits.get() + 1)),
                )
                .expect("add");
        }

        // Raise the signal; the raw handler marks the self-pipe.
        unsafe {
            libc::raise(libc::SIGWINCH);
        }
        reactor.inject_readable(bridge.pipe_read.as_raw_fd());
        assert_eq!(hits.get(), 0);
        reactor.run_pending();
        assert_eq!(hits.get(), 1);

        assert!(bridge.remove_handler(SignalKind::window_change()).expect("remove"));
        assert_eq!(bridge.handler_count(), 0);
    }
}
