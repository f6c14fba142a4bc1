//! Read-direction pipe endpoint.

use super::{read_fd, set_nonblocking};
use crate::config::Config;
use crate::error::is_transient;
use crate::handler::PipeHandler;
use crate::reactor::Reactor;
use std::cell::{Cell, RefCell};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::rc::{Rc, Weak};

/// Reads a child's stdout or stderr pipe and reports upward.
///
/// Construction registers the descriptor for read-readiness with the
/// reactor. On each readiness event a bounded chunk is read and forwarded to
/// the handler as `data_received`; an empty read means the peer closed, which
/// delivers `eof_received` followed by `connection_lost(None)`. Transient
/// errors are ignored; any other error tears the endpoint down with
/// `connection_lost(err)`.
pub struct ReadPipeEndpoint {
    reactor: Rc<dyn Reactor>,
    handler: Rc<RefCell<dyn PipeHandler>>,
    raw_fd: RawFd,
    fd: RefCell<Option<OwnedFd>>,
    closing: Cell<bool>,
    paused: Cell<bool>,
    lost: Cell<bool>,
    chunk_size: usize,
    weak: Weak<Self>,
}

impl ReadPipeEndpoint {
    /// Wraps an already-open descriptor, makes it non-blocking, and registers
    /// for read-readiness.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor cannot be switched to non-blocking
    /// mode.
    pub fn new(
        reactor: Rc<dyn Reactor>,
        fd: OwnedFd,
        handler: Rc<RefCell<dyn PipeHandler>>,
        config: &Config,
    ) -> io::Result<Rc<Self>> {
        let raw_fd = fd.as_raw_fd();
        set_nonblocking(raw_fd)?;
        let endpoint = Rc::new_cyclic(|weak| Self {
            reactor,
            handler,
            raw_fd,
            fd: RefCell::new(Some(fd)),
            closing: Cell::new(false),
            paused: Cell::new(false),
            lost: Cell::new(false),
            chunk_size: config.read_chunk_size,
            weak: weak.clone(),
        });
        endpoint.register();
        Ok(endpoint)
    }

    /// The wrapped descriptor.
    #[must_use]
    pub fn raw_fd(&self) -> RawFd {
        self.raw_fd
    }

    /// True once teardown has started.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing.get()
    }

    /// Stops read-readiness delivery without closing the descriptor.
    pub fn pause_reading(&self) {
        if self.closing.get() || self.paused.replace(true) {
            return;
        }
        self.reactor.unregister_reader(self.raw_fd);
    }

    /// Re-enables read-readiness delivery after [`Self::pause_reading`].
    pub fn resume_reading(&self) {
        if self.closing.get() || !self.paused.replace(false) {
            return;
        }
        self.register();
    }

    /// Starts teardown with no error. Idempotent.
    pub fn close(&self) {
        if !self.closing.get() {
            self.close_with(None);
        }
    }

    fn register(&self) {
        let weak = self.weak.clone();
        self.reactor.register_reader(
            self.raw_fd,
            Rc::new(move || {
                if let Some(endpoint) = weak.upgrade() {
                    endpoint.read_ready();
                }
            }),
        );
    }

    fn read_ready(&self) {
        if self.closing.get() {
            return;
        }
        let mut buf = vec![0u8; self.chunk_size];
        match read_fd(self.raw_fd, &mut buf) {
            Ok(0) => self.eof(),
            Ok(n) => {
                buf.truncate(n);
                self.handler.borrow_mut().data_received(&buf);
            }
            Err(err) if is_transient(&err) => {}
            Err(err) => self.fatal_error(err),
        }
    }

    fn eof(&self) {
        self.closing.set(true);
        self.reactor.unregister_reader(self.raw_fd);
        let handler = Rc::clone(&self.handler);
        let fd = self.raw_fd;
        self.reactor.schedule(Box::new(move || {
            let keep_open = handler.borrow_mut().eof_received();
            tracing::trace!(fd, keep_open, "read pipe eof");
        }));
        self.schedule_connection_lost(None);
    }

    fn fatal_error(&self, err: io::Error) {
        tracing::error!(fd = self.raw_fd, error = %err, "fatal error on read pipe");
        self.close_with(Some(err));
    }

    fn close_with(&self, err: Option<io::Error>) {
        self.closing.set(true);
        self.reactor.unregister_reader(self.raw_fd);
        self.schedule_connection_lost(err);
    }

    fn schedule_connection_lost(&self, err: Option<io::Error>) {
        let weak = self.weak.clone();
        self.reactor.schedule(Box::new(move || {
            if let Some(endpoint) = weak.upgrade() {
                endpoint.call_connection_lost(err);
            }
        }));
    }

    fn call_connection_lost(&self, err: Option<io::Error>) {
        if self.lost.replace(true) {
            return;
        }
        self.handler.borrow_mut().connection_lost(err);
        self.fd.borrow_mut().take();
    }
}
