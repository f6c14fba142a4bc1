#![allow(unsafe_code)]
//! Non-blocking pipe endpoints.
//!
//! This module uses unsafe code for raw descriptor syscalls (`fcntl`, `read`,
//! `write`).
//!
//! A pipe endpoint wraps exactly one half-duplex file descriptor and drives
//! it from reactor readiness callbacks:
//!
//! - [`ReadPipeEndpoint`]: reads bounded chunks on read-readiness and
//!   forwards them to a [`PipeHandler`](crate::handler::PipeHandler);
//!   an empty read is EOF.
//! - [`WritePipeEndpoint`]: attempts immediate non-blocking writes, buffers
//!   remainders in call order, and flushes on write-readiness.
//!
//! Each endpoint owns its descriptor exclusively and closes it exactly once,
//! after its handler's `connection_lost` has run. At most one readiness
//! registration (reader or writer) is active per descriptor at any time.

pub mod read;
pub mod write;

pub use read::ReadPipeEndpoint;
pub use write::WritePipeEndpoint;

use std::io;
use std::os::fd::RawFd;

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[allow(clippy::cast_sign_loss)]
pub(crate) fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

#[allow(clippy::cast_sign_loss)]
pub(crate) fn write_fd(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Shared helpers for endpoint unit tests.

    use crate::handler::PipeHandler;
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    /// Recorded handler events, in delivery order.
    #[derive(Debug)]
    pub enum PipeEvent {
        Data(Vec<u8>),
        Eof,
        PauseWriting,
        ResumeWriting,
        Lost(Option<io::ErrorKind>),
    }

    /// Handler that records every callback it receives.
    #[derive(Default)]
    pub struct RecordingPipeHandler {
        pub events: Rc<RefCell<Vec<PipeEvent>>>,
        pub eof_keep_open: bool,
    }

    impl RecordingPipeHandler {
        pub fn new() -> (Rc<RefCell<Self>>, Rc<RefCell<Vec<PipeEvent>>>) {
            let events = Rc::new(RefCell::new(Vec::new()));
            let handler = Rc::new(RefCell::new(Self {
                events: events.clone(),
                eof_keep_open: false,
            }));
            (handler, events)
        }
    }

    impl PipeHandler for RecordingPipeHandler {
        fn data_received(&mut self, data: &[u8]) {
            self.events.borrow_mut().push(PipeEvent::Data(data.to_vec()));
        }

        fn eof_received(&mut self) -> bool {
            self.events.borrow_mut().push(PipeEvent::Eof);
            self.eof_keep_open
        }

        fn pause_writing(&mut self) {
            self.events.borrow_mut().push(PipeEvent::PauseWriting);
        }

        fn resume_writing(&mut self) {
            self.events.borrow_mut().push(PipeEvent::ResumeWriting);
        }

        fn connection_lost(&mut self, err: Option<io::Error>) {
            self.events
                .borrow_mut()
                .push(PipeEvent::Lost(err.map(|e| e.kind())));
        }
    }
}
