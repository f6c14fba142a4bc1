//! Write-direction pipe endpoint.

use super::{set_nonblocking, write_fd};
use crate::config::Config;
use crate::error::is_transient;
use crate::handler::PipeHandler;
use crate::reactor::Reactor;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::rc::{Rc, Weak};

/// Writes to a child's stdin pipe with non-blocking partial-write buffering.
///
/// `write` attempts an immediate non-blocking write when the buffer is empty
/// and buffers any remainder, registering for write-readiness until the
/// buffer drains. Bytes reach the peer in exactly the order of `write` calls.
/// After a connection loss or once closing, further writes are counted and
/// dropped so the buffer cannot grow without bound.
pub struct WritePipeEndpoint {
    reactor: Rc<dyn Reactor>,
    handler: Rc<RefCell<dyn PipeHandler>>,
    raw_fd: RawFd,
    fd: RefCell<Option<OwnedFd>>,
    buffer: RefCell<VecDeque<Vec<u8>>>,
    buffered: Cell<usize>,
    closing: Cell<bool>,
    lost: Cell<bool>,
    lost_writes: Cell<u32>,
    writer_armed: Cell<bool>,
    protocol_paused: Cell<bool>,
    high_water: usize,
    low_water: usize,
    lost_write_log_threshold: u32,
    weak: Weak<Self>,
}

impl WritePipeEndpoint {
    /// Wraps an already-open descriptor and makes it non-blocking.
    ///
    /// No readiness registration happens until a write leaves a remainder.
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
        Ok(Rc::new_cyclic(|weak| Self {
            reactor,
            handler,
            raw_fd,
            fd: RefCell::new(Some(fd)),
            buffer: RefCell::new(VecDeque::new()),
            buffered: Cell::new(0),
            closing: Cell::new(false),
            lost: Cell::new(false),
            lost_writes: Cell::new(0),
            writer_armed: Cell::new(false),
            protocol_paused: Cell::new(false),
            high_water: config.write_high_water,
            low_water: config.write_low_water,
            lost_write_log_threshold: config.lost_write_log_threshold,
            weak: weak.clone(),
        }))
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

    /// Bytes currently buffered and not yet written.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffered.get()
    }

    /// Number of writes dropped after loss or closing.
    #[must_use]
    pub fn lost_writes(&self) -> u32 {
        self.lost_writes.get()
    }

    /// Queues `data` for delivery, attempting an immediate write first.
    ///
    /// Empty input is a no-op. Writes issued after the endpoint started
    /// closing (or after a fatal error) are dropped and counted.
    pub fn write(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        if self.lost_writes.get() > 0 || self.closing.get() {
            let dropped = self.lost_writes.get() + 1;
            self.lost_writes.set(dropped);
            if dropped == self.lost_write_log_threshold {
                tracing::warn!(
                    fd = self.raw_fd,
                    dropped,
                    "pipe closed by peer; dropping subsequent writes"
                );
            }
            return;
        }

        let mut remainder = data;
        if self.buffer.borrow().is_empty() {
            // Attempt to send it right away first.
            match write_fd(self.raw_fd, remainder) {
                Ok(n) if n == remainder.len() => return,
                Ok(n) => remainder = &remainder[n..],
                Err(err) if is_transient(&err) => {}
                Err(err) => {
                    self.lost_writes.set(self.lost_writes.get() + 1);
                    self.fatal_error(err);
                    return;
                }
            }
            self.arm_writer();
        }

        self.buffer.borrow_mut().push_back(remainder.to_vec());
        self.buffered.set(self.buffered.get() + remainder.len());
        self.maybe_pause_protocol();
    }

    /// Marks the write side as finished. Idempotent.
    ///
    /// Teardown completes immediately if the buffer is empty, otherwise once
    /// the buffer drains.
    pub fn write_eof(&self) {
        if self.closing.replace(true) {
            return;
        }
        if self.buffer.borrow().is_empty() {
            self.schedule_connection_lost(None);
        }
    }

    /// Starts teardown, letting buffered data drain first. Idempotent.
    pub fn close(&self) {
        if !self.closing.get() {
            self.write_eof();
        }
    }

    /// Tears down immediately, discarding any buffered data.
    pub fn abort(&self) {
        self.close_now(None);
    }

    fn arm_writer(&self) {
        if self.writer_armed.replace(true) {
            return;
        }
        let weak = self.weak.clone();
        self.reactor.register_writer(
            self.raw_fd,
            Rc::new(move || {
                if let Some(endpoint) = weak.upgrade() {
                    endpoint.write_ready();
                }
            }),
        );
    }

    fn disarm_writer(&self) {
        if self.writer_armed.replace(false) {
            self.reactor.unregister_writer(self.raw_fd);
        }
    }

    fn write_ready(&self) {
        let data: Vec<u8> = {
            let mut buffer = self.buffer.borrow_mut();
            let mut joined = Vec::with_capacity(self.buffered.get());
            for chunk in buffer.drain(..) {
                joined.extend_from_slice(&chunk);
            }
            joined
        };
        debug_assert!(!data.is_empty(), "writer armed with empty buffer");

        match write_fd(self.raw_fd, &data) {
            Ok(n) if n == data.len() => {
                self.buffered.set(0);
                self.disarm_writer();
                self.maybe_resume_protocol();
                if self.closing.get() {
                    self.call_connection_lost(None);
                }
            }
            Ok(n) => {
                self.buffer.borrow_mut().push_back(data[n..].to_vec());
                self.buffered.set(data.len() - n);
                self.maybe_resume_protocol();
            }
            Err(err) if is_transient(&err) => {
                let len = data.len();
                self.buffer.borrow_mut().push_back(data);
                self.buffered.set(len);
            }
            Err(err) => {
                self.buffered.set(0);
                self.disarm_writer();
                self.lost_writes.set(self.lost_writes.get() + 1);
                self.fatal_error(err);
            }
        }
    }

    fn maybe_pause_protocol(&self) {
        if !self.protocol_paused.get() && self.buffered.get() > self.high_water {
            self.protocol_paused.set(true);
            self.handler.borrow_mut().pause_writing();
        }
    }

    fn maybe_resume_protocol(&self) {
        if self.protocol_paused.get() && self.buffered.get() <= self.low_water {
            self.protocol_paused.set(false);
            self.handler.borrow_mut().resume_writing();
        }
    }

    fn fatal_error(&self, err: io::Error) {
        tracing::error!(fd = self.raw_fd, error = %err, "fatal error on write pipe");
        self.close_now(Some(err));
    }

    fn close_now(&self, err: Option<io::Error>) {
        self.closing.set(true);
        self.disarm_writer();
        self.buffer.borrow_mut().clear();
        self.buffered.set(0);
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
