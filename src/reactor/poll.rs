#![allow(unsafe_code)]
//! Reference event loop backed by `poll(2)`.
//!
//! This module uses unsafe code for the `poll`, `pipe2`, `read`, and `write`
//! syscalls.
//!
//! [`PollReactor`] is a minimal single-threaded loop that implements the
//! [`Reactor`] interface well enough to run transports end to end: readiness
//! dispatch for registered descriptors, a FIFO deferred-callback queue, and a
//! wakeup pipe so [`Reactor::schedule_threadsafe`] can interrupt a blocked
//! poll from another thread (or from a signal handler's self-pipe write).
//!
//! It is deliberately small: no timers, no priorities, no I/O submission.
//! Production embedders bring their own loop and implement [`Reactor`] on it.

use super::{Callback, ReadyCallback, Reactor, SendCallback};
use parking_lot::Mutex;
use slab::Slab;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// Creates a non-blocking close-on-exec pipe, returning (read, write) ends.
pub(crate) fn nonblocking_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe2 returned two freshly opened descriptors we now own.
    let read = unsafe { OwnedFd::from_raw_fd(fds[0]) };
    let write = unsafe { OwnedFd::from_raw_fd(fds[1]) };
    Ok((read, write))
}

struct Shared {
    queue: Mutex<Vec<SendCallback>>,
    wakeup_write: OwnedFd,
}

impl Shared {
    fn wake(&self) {
        let byte = 0u8;
        // A full pipe already guarantees a pending wakeup; EAGAIN is fine.
        let _ = unsafe {
            libc::write(
                self.wakeup_write.as_raw_fd(),
                &byte as *const u8 as *const libc::c_void,
                1,
            )
        };
    }
}

/// Handle for enqueueing callbacks onto a [`PollReactor`] from other threads.
#[derive(Clone)]
pub struct RemoteHandle {
    shared: Arc<Shared>,
}

impl RemoteHandle {
    /// Enqueues `callback` and wakes the loop.
    pub fn schedule(&self, callback: SendCallback) {
        self.shared.queue.lock().push(callback);
        self.shared.wake();
    }
}

#[derive(Default)]
struct PollState {
    registrations: Slab<ReadyCallback>,
    readers: HashMap<RawFd, usize>,
    writers: HashMap<RawFd, usize>,
    scheduled: VecDeque<Callback>,
}

/// Minimal `poll(2)`-driven event loop.
pub struct PollReactor {
    state: RefCell<PollState>,
    shared: Arc<Shared>,
    wakeup_read: OwnedFd,
}

impl PollReactor {
    /// Creates a new reactor with its wakeup pipe.
    ///
    /// # Errors
    ///
    /// Returns an error if the wakeup pipe cannot be created.
    pub fn new() -> io::Result<Rc<Self>> {
        let (wakeup_read, wakeup_write) = nonblocking_pipe()?;
        Ok(Rc::new(Self {
            state: RefCell::new(PollState::default()),
            shared: Arc::new(Shared {
                queue: Mutex::new(Vec::new()),
                wakeup_write,
            }),
            wakeup_read,
        }))
    }

    /// Returns a cloneable handle for cross-thread scheduling.
    #[must_use]
    pub fn remote(&self) -> RemoteHandle {
        RemoteHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Runs one loop iteration: poll for readiness (up to `timeout`, forever
    /// if `None`), dispatch ready callbacks, then drain the deferred queue.
    ///
    /// Returns the number of callbacks executed.
    ///
    /// # Errors
    ///
    /// Returns an error if `poll(2)` fails for a reason other than EINTR.
    pub fn run_once(&self, timeout: Option<Duration>) -> io::Result<usize> {
        let mut pollfds: Vec<libc::pollfd> = Vec::new();
        pollfds.push(libc::pollfd {
            fd: self.wakeup_read.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        });
        let have_pending = {
            let state = self.state.borrow();
            for (&fd, _) in &state.readers {
                pollfds.push(libc::pollfd {
                    fd,
                    events: libc::POLLIN,
                    revents: 0,
                });
            }
            for (&fd, _) in &state.writers {
                pollfds.push(libc::pollfd {
                    fd,
                    events: libc::POLLOUT,
                    revents: 0,
                });
            }
            !state.scheduled.is_empty()
        } || !self.shared.queue.lock().is_empty();

        let timeout_ms: libc::c_int = if have_pending {
            0
        } else {
            match timeout {
                Some(t) => libc::c_int::try_from(t.as_millis().min(i32::MAX as u128))
                    .unwrap_or(libc::c_int::MAX),
                None => -1,
            }
        };

        let ret = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err);
            }
        }

        if pollfds[0].revents != 0 {
            self.drain_wakeup_pipe();
        }

        // Collect callbacks first so dispatch never overlaps a state borrow;
        // callbacks are free to register and unregister.
        let mut ready: Vec<ReadyCallback> = Vec::new();
        {
            let state = self.state.borrow();
            for pollfd in &pollfds[1..] {
                if pollfd.revents == 0 {
                    continue;
                }
                let readable =
                    pollfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0;
                let writable =
                    pollfd.revents & (libc::POLLOUT | libc::POLLHUP | libc::POLLERR) != 0;
                if readable {
                    if let Some(&key) = state.readers.get(&pollfd.fd) {
                        ready.push(Rc::clone(&state.registrations[key]));
                    }
                }
                if writable {
                    if let Some(&key) = state.writers.get(&pollfd.fd) {
                        ready.push(Rc::clone(&state.registrations[key]));
                    }
                }
            }
        }

        let mut ran = 0;
        for callback in ready {
            callback();
            ran += 1;
        }

        // Cross-thread arrivals first, then the loop-local queue, FIFO.
        let remote: Vec<SendCallback> = std::mem::take(&mut *self.shared.queue.lock());
        for callback in remote {
            callback();
            ran += 1;
        }
        loop {
            let next = self.state.borrow_mut().scheduled.pop_front();
            match next {
                Some(callback) => {
                    callback();
                    ran += 1;
                }
                None => break,
            }
        }

        Ok(ran)
    }

    fn drain_wakeup_pipe(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(
                    self.wakeup_read.as_raw_fd(),
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                )
            };
            if n <= 0 {
                break;
            }
        }
    }

    fn insert(&self, fd: RawFd, callback: ReadyCallback, writer: bool) {
        let mut state = self.state.borrow_mut();
        let key = state.registrations.insert(callback);
        let map = if writer {
            &mut state.writers
        } else {
            &mut state.readers
        };
        if let Some(old) = map.insert(fd, key) {
            state.registrations.remove(old);
        }
    }

    fn remove(&self, fd: RawFd, writer: bool) -> bool {
        let mut state = self.state.borrow_mut();
        let map = if writer {
            &mut state.writers
        } else {
            &mut state.readers
        };
        match map.remove(&fd) {
            Some(key) => {
                state.registrations.remove(key);
                true
            }
            None => false,
        }
    }
}

impl Reactor for PollReactor {
    fn register_reader(&self, fd: RawFd, callback: ReadyCallback) {
        self.insert(fd, callback, false);
    }

    fn register_writer(&self, fd: RawFd, callback: ReadyCallback) {
        self.insert(fd, callback, true);
    }

    fn unregister_reader(&self, fd: RawFd) -> bool {
        self.remove(fd, false)
    }

    fn unregister_writer(&self, fd: RawFd) -> bool {
        self.remove(fd, true)
    }

    fn schedule(&self, callback: Callback) {
        self.state.borrow_mut().scheduled.push_back(callback);
    }

    fn schedule_threadsafe(&self, callback: SendCallback) {
        self.shared.queue.lock().push(callback);
        self.shared.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn scheduled_callbacks_run_in_order() {
        let reactor = PollReactor::new().expect("reactor");
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            reactor.schedule(Box::new(move || order.borrow_mut().push(i)));
        }
        let ran = reactor.run_once(Some(Duration::ZERO)).expect("run");
        assert_eq!(ran, 3);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn pipe_readiness_dispatches_reader() {
        let reactor = PollReactor::new().expect("reactor");
        let (read_end, write_end) = nonblocking_pipe().expect("pipe");
        let hits = Rc::new(Cell::new(0));
        {
            let hits = hits.clone();
            reactor.register_reader(read_end.as_raw_fd(), Rc::new(move || hits.set(hits.get() + 1)));
        }

        // Nothing to read yet: poll with zero timeout fires nothing.
        reactor.run_once(Some(Duration::ZERO)).expect("run");
        assert_eq!(hits.get(), 0);

        let byte = 1u8;
        let n = unsafe {
            libc::write(
                write_end.as_raw_fd(),
                &byte as *const u8 as *const libc::c_void,
                1,
            )
        };
        assert_eq!(n, 1);
        reactor.run_once(Some(Duration::from_millis(100))).expect("run");
        assert_eq!(hits.get(), 1);

        assert!(reactor.unregister_reader(read_end.as_raw_fd()));
        reactor.run_once(Some(Duration::ZERO)).expect("run");
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn remote_handle_wakes_blocked_loop() {
        let reactor = PollReactor::new().expect("reactor");
        let remote = reactor.remote();
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.schedule(Box::new(move || {
                fired2.store(true, std::sync::atomic::Ordering::SeqCst);
            }));
        });
        // Blocks until the remote wakeup arrives.
        reactor.run_once(Some(Duration::from_secs(5))).expect("run");
        handle.join().expect("thread");
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }
}
