#![allow(unsafe_code)]
//! Subprocess transport.
//!
//! This module uses unsafe code for `kill(2)`.
//!
//! A [`ProcessTransport`] owns one spawned child and up to three pipe
//! endpoints, and mediates between raw OS events and a
//! [`ProcessHandler`]: pipe data and closures arrive from the endpoints,
//! termination arrives from the injected [`ChildWatcher`], and everything is
//! forwarded to the handler in FIFO loop order. Until the asynchronous pipe
//! wiring completes, handler calls queue up and flush after
//! `connection_made`.
//!
//! Lifecycle: once the exit code is known *and* every piped stream has
//! reported closure, the handler receives a single `connection_lost` and the
//! transport releases its process, endpoint, and handler references.

mod command;
mod wiring;

pub use command::{Command, Stdio};
pub(crate) use command::SpawnedChild;

use crate::config::Config;
use crate::error::Error;
use crate::handler::{PipeHandler, ProcessHandler, StreamIndex};
use crate::pipe::{ReadPipeEndpoint, WritePipeEndpoint};
use crate::reactor::{Callback, Reactor};
use crate::watcher::{ChildWatcher, Pid};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io;
use std::rc::{Rc, Weak};

/// Callback resolved once pipe wiring finishes (or fails).
pub type ReadyWaiter = Box<dyn FnOnce(Result<(), Error>)>;

fn signal_pid(pid: Pid, signal: i32) -> Result<(), Error> {
    let ret = unsafe { libc::kill(pid, signal) };
    if ret == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Err(Error::ProcessLookup(pid)),
        Some(libc::EINVAL) => Err(Error::InvalidSignal(signal)),
        _ => Err(Error::Io(err)),
    }
}

/// Identity of a spawned OS process.
///
/// The exit status is set exactly once, when the watcher reports
/// termination, and never mutated afterward.
pub struct ProcessHandle {
    pid: Pid,
    program: OsString,
    args: Vec<OsString>,
    status: Cell<Option<i32>>,
}

impl ProcessHandle {
    /// The OS process id.
    #[must_use]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The spawned program.
    #[must_use]
    pub fn program(&self) -> &OsString {
        &self.program
    }

    /// The spawn arguments.
    #[must_use]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// The exit status, absent until the child has been reaped.
    #[must_use]
    pub fn status(&self) -> Option<i32> {
        self.status.get()
    }
}

/// A transport's view of one wired pipe endpoint.
#[derive(Clone)]
pub enum PipeRef {
    /// A read endpoint (child stdout or stderr).
    Read(Rc<ReadPipeEndpoint>),
    /// A write endpoint (child stdin).
    Write(Rc<WritePipeEndpoint>),
}

impl PipeRef {
    /// The read endpoint, if this is one.
    #[must_use]
    pub fn as_read(&self) -> Option<&Rc<ReadPipeEndpoint>> {
        match self {
            Self::Read(endpoint) => Some(endpoint),
            Self::Write(_) => None,
        }
    }

    /// The write endpoint, if this is one.
    #[must_use]
    pub fn as_write(&self) -> Option<&Rc<WritePipeEndpoint>> {
        match self {
            Self::Write(endpoint) => Some(endpoint),
            Self::Read(_) => None,
        }
    }

    /// Starts the endpoint's teardown.
    pub fn close(&self) {
        match self {
            Self::Read(endpoint) => endpoint.close(),
            Self::Write(endpoint) => endpoint.close(),
        }
    }
}

#[derive(Default)]
struct PipeSlot {
    endpoint: Option<PipeRef>,
    disconnected: bool,
}

#[derive(Default)]
struct WaiterState {
    result: Cell<Option<i32>>,
    cancelled: Cell<bool>,
    on_complete: RefCell<Option<Box<dyn FnOnce(i32)>>>,
}

impl WaiterState {
    fn resolve(&self, code: i32) {
        if self.cancelled.get() {
            return;
        }
        self.result.set(Some(code));
        if let Some(callback) = self.on_complete.borrow_mut().take() {
            callback(code);
        }
    }
}

/// Handle resolving to the child's exit code.
///
/// Returned by [`ProcessTransport::wait`]. A cancelled waiter is skipped
/// when the exit code arrives; it never resolves and never errors.
pub struct ExitWaiter {
    state: Rc<WaiterState>,
}

impl ExitWaiter {
    fn ready(code: i32) -> Self {
        let state = WaiterState::default();
        state.result.set(Some(code));
        Self {
            state: Rc::new(state),
        }
    }

    /// The exit code, if already known.
    #[must_use]
    pub fn result(&self) -> Option<i32> {
        self.state.result.get()
    }

    /// Cancels the waiter; a later exit will not resolve it.
    pub fn cancel(&self) {
        self.state.cancelled.set(true);
    }

    /// True if [`Self::cancel`] was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.get()
    }

    /// Registers a completion callback, invoked with the exit code.
    ///
    /// Fires immediately if the code is already known. Replaces any
    /// previously registered callback.
    pub fn on_complete(&self, callback: Box<dyn FnOnce(i32)>) {
        if let Some(code) = self.state.result.get() {
            callback(code);
            return;
        }
        *self.state.on_complete.borrow_mut() = Some(callback);
    }
}

/// Forwards one endpoint's events to the owning transport under its stream
/// index.
pub(crate) struct PipeAdapter {
    transport: Weak<ProcessTransport>,
    stream: StreamIndex,
}

impl PipeAdapter {
    pub(crate) fn new(transport: &Rc<ProcessTransport>, stream: StreamIndex) -> Self {
        Self {
            transport: Rc::downgrade(transport),
            stream,
        }
    }
}

impl PipeHandler for PipeAdapter {
    fn data_received(&mut self, data: &[u8]) {
        if let Some(transport) = self.transport.upgrade() {
            transport.pipe_data_received(self.stream, data);
        }
    }

    fn eof_received(&mut self) -> bool {
        self.transport
            .upgrade()
            .is_some_and(|transport| transport.pipe_eof_received(self.stream))
    }

    fn pause_writing(&mut self) {
        if let Some(transport) = self.transport.upgrade() {
            transport.pipe_pause_writing();
        }
    }

    fn resume_writing(&mut self) {
        if let Some(transport) = self.transport.upgrade() {
            transport.pipe_resume_writing();
        }
    }

    fn connection_lost(&mut self, err: Option<io::Error>) {
        if let Some(transport) = self.transport.upgrade() {
            transport.pipe_connection_lost(self.stream, err);
        }
    }
}

/// Transport for one spawned subprocess.
pub struct ProcessTransport {
    reactor: Rc<dyn Reactor>,
    handler: RefCell<Option<Rc<RefCell<dyn ProcessHandler>>>>,
    handle: ProcessHandle,
    pipes: RefCell<[Option<PipeSlot>; 3]>,
    closed: Cell<bool>,
    returncode: Cell<Option<i32>>,
    finished: Cell<bool>,
    pending: RefCell<Option<VecDeque<Callback>>>,
    waiters: RefCell<Vec<Rc<WaiterState>>>,
    weak: Weak<Self>,
}

impl ProcessTransport {
    /// Spawns `command` and begins wiring its piped streams.
    ///
    /// The spawn happens inside a watcher spawn scope and the exit callback
    /// is registered before the scope closes, so a child that dies
    /// immediately cannot be misattributed. Pipe wiring proceeds
    /// asynchronously; handler events that occur before it completes are
    /// queued and flushed after `connection_made`. `on_ready` (if given)
    /// resolves when wiring completes or fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned. Wiring failures
    /// are reported through `on_ready`, not here.
    pub fn spawn(
        reactor: Rc<dyn Reactor>,
        watcher: &Rc<dyn ChildWatcher>,
        command: &Command,
        handler: Rc<RefCell<dyn ProcessHandler>>,
        config: Config,
        on_ready: Option<ReadyWaiter>,
    ) -> Result<Rc<Self>, Error> {
        let scope = watcher.spawn_scope();
        let spawned = command.spawn_raw()?;

        let mut pipes: [Option<PipeSlot>; 3] = [None, None, None];
        if spawned.stdin.is_some() {
            pipes[StreamIndex::Stdin.as_raw()] = Some(PipeSlot::default());
        }
        if spawned.stdout.is_some() {
            pipes[StreamIndex::Stdout.as_raw()] = Some(PipeSlot::default());
        }
        if spawned.stderr.is_some() {
            pipes[StreamIndex::Stderr.as_raw()] = Some(PipeSlot::default());
        }

        let transport = Rc::new_cyclic(|weak| Self {
            reactor: Rc::clone(&reactor),
            handler: RefCell::new(Some(handler)),
            handle: ProcessHandle {
                pid: spawned.pid,
                program: spawned.program.clone(),
                args: spawned.args.clone(),
                status: Cell::new(None),
            },
            pipes: RefCell::new(pipes),
            closed: Cell::new(false),
            returncode: Cell::new(None),
            finished: Cell::new(false),
            pending: RefCell::new(Some(VecDeque::new())),
            waiters: RefCell::new(Vec::new()),
            weak: weak.clone(),
        });
        tracing::debug!(
            program = ?transport.handle.program,
            pid = transport.handle.pid,
            "process created"
        );

        {
            let weak = Rc::downgrade(&transport);
            let reactor = Rc::clone(&reactor);
            watcher.add_child_handler(
                spawned.pid,
                Box::new(move |_pid, code| {
                    if let Some(transport) = weak.upgrade() {
                        reactor.schedule(Box::new(move || transport.process_exited(code)));
                    }
                }),
            );
        }
        drop(scope);

        wiring::start(wiring::WiringTask::new(
            Rc::clone(&transport),
            spawned,
            config,
            on_ready,
        ));
        Ok(transport)
    }

    /// The child's process id.
    #[must_use]
    pub fn pid(&self) -> Pid {
        self.handle.pid
    }

    /// The child's exit code, absent until it has been reaped.
    #[must_use]
    pub fn returncode(&self) -> Option<i32> {
        self.returncode.get()
    }

    /// The process identity record.
    #[must_use]
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// The endpoint wired for `stream`, if that stream was piped and wiring
    /// has reached it.
    #[must_use]
    pub fn pipe(&self, stream: StreamIndex) -> Option<PipeRef> {
        self.pipes.borrow()[stream.as_raw()]
            .as_ref()
            .and_then(|slot| slot.endpoint.clone())
    }

    /// True once [`Self::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// True once the handler's `connection_lost` has been scheduled.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.get()
    }

    /// Sends `signal` to the child.
    ///
    /// # Errors
    ///
    /// [`Error::ClosedTransport`] after [`Self::close`];
    /// [`Error::ProcessLookup`] if the process is gone.
    pub fn send_signal(&self, signal: i32) -> Result<(), Error> {
        self.check_proc()?;
        signal_pid(self.handle.pid, signal)
    }

    /// Sends SIGTERM to the child.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::send_signal`].
    pub fn terminate(&self) -> Result<(), Error> {
        self.send_signal(libc::SIGTERM)
    }

    /// Sends SIGKILL to the child.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::send_signal`].
    pub fn kill(&self) -> Result<(), Error> {
        self.send_signal(libc::SIGKILL)
    }

    /// Closes every pipe endpoint and kills the child if it has not exited.
    /// Idempotent.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        for slot in self.pipes.borrow().iter().flatten() {
            if let Some(endpoint) = &slot.endpoint {
                endpoint.close();
            }
        }
        if self.returncode.get().is_none() {
            tracing::debug!(pid = self.handle.pid, "closing transport with running child");
            match signal_pid(self.handle.pid, libc::SIGKILL) {
                // It may have vanished on its own in the meantime.
                Ok(()) | Err(Error::ProcessLookup(_)) => {}
                Err(err) => {
                    tracing::warn!(pid = self.handle.pid, error = %err, "kill on close failed");
                }
            }
        }
    }

    /// Returns a waiter resolving to the child's exit code.
    ///
    /// Resolves immediately if the code is already known.
    #[must_use]
    pub fn wait(&self) -> ExitWaiter {
        if let Some(code) = self.returncode.get() {
            return ExitWaiter::ready(code);
        }
        let state = Rc::new(WaiterState::default());
        self.waiters.borrow_mut().push(Rc::clone(&state));
        ExitWaiter { state }
    }

    pub(crate) fn reactor(&self) -> Rc<dyn Reactor> {
        Rc::clone(&self.reactor)
    }

    pub(crate) fn store_endpoint(&self, stream: StreamIndex, endpoint: PipeRef) {
        if let Some(slot) = self.pipes.borrow_mut()[stream.as_raw()].as_mut() {
            slot.endpoint = Some(endpoint);
        }
    }

    /// Delivers `connection_made`, then flushes queued calls, all FIFO.
    pub(crate) fn wiring_complete(&self) {
        let weak = self.weak.clone();
        self.reactor.schedule(Box::new(move || {
            if let Some(transport) = weak.upgrade() {
                let handler = transport.handler_ref();
                if let Some(handler) = handler {
                    handler.borrow_mut().connection_made(&transport);
                }
            }
        }));
        let queued = self.pending.borrow_mut().take();
        if let Some(queued) = queued {
            for callback in queued {
                self.reactor.schedule(callback);
            }
        }
    }

    pub(crate) fn pipe_data_received(&self, stream: StreamIndex, data: &[u8]) {
        if let Some(handler) = self.handler_ref() {
            let data = data.to_vec();
            self.call(Box::new(move || {
                handler.borrow_mut().data_received(stream, &data);
            }));
        }
    }

    pub(crate) fn pipe_eof_received(&self, stream: StreamIndex) -> bool {
        tracing::trace!(pid = self.handle.pid, stream = %stream, "pipe eof");
        match self.handler_ref() {
            Some(handler) => handler.borrow_mut().eof_received(),
            None => false,
        }
    }

    // Pause/resume are queued like the other handler calls: the watermark
    // crossing often happens inside a handler callback (a write issued from
    // `data_received`), and the handler cell must not be re-entered.
    pub(crate) fn pipe_pause_writing(&self) {
        if let Some(handler) = self.handler_ref() {
            self.call(Box::new(move || handler.borrow_mut().pause_writing()));
        }
    }

    pub(crate) fn pipe_resume_writing(&self) {
        if let Some(handler) = self.handler_ref() {
            self.call(Box::new(move || handler.borrow_mut().resume_writing()));
        }
    }

    pub(crate) fn pipe_connection_lost(&self, stream: StreamIndex, err: Option<io::Error>) {
        if let Some(slot) = self.pipes.borrow_mut()[stream.as_raw()].as_mut() {
            slot.disconnected = true;
        }
        if let Some(handler) = self.handler_ref() {
            self.call(Box::new(move || {
                handler.borrow_mut().pipe_connection_lost(stream, err);
            }));
        }
        self.try_finish();
    }

    pub(crate) fn process_exited(&self, code: i32) {
        if self.returncode.get().is_some() {
            debug_assert!(false, "process exit delivered twice");
            return;
        }
        self.returncode.set(Some(code));
        self.handle.status.set(Some(code));
        tracing::debug!(pid = self.handle.pid, returncode = code, "process exited");
        if let Some(handler) = self.handler_ref() {
            self.call(Box::new(move || handler.borrow_mut().process_exited()));
        }
        self.try_finish();
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waiter in waiters {
            waiter.resolve(code);
        }
    }

    fn check_proc(&self) -> Result<(), Error> {
        if self.closed.get() {
            return Err(Error::ClosedTransport);
        }
        if self.finished.get() {
            return Err(Error::ProcessLookup(self.handle.pid));
        }
        Ok(())
    }

    fn handler_ref(&self) -> Option<Rc<RefCell<dyn ProcessHandler>>> {
        self.handler.borrow().clone()
    }

    /// Queues `callback` until wiring completes, then schedules directly.
    fn call(&self, callback: Callback) {
        let mut pending = self.pending.borrow_mut();
        match pending.as_mut() {
            Some(queue) => queue.push_back(callback),
            None => {
                drop(pending);
                self.reactor.schedule(callback);
            }
        }
    }

    fn try_finish(&self) {
        if self.finished.get() || self.returncode.get().is_none() {
            return;
        }
        let all_disconnected = self
            .pipes
            .borrow()
            .iter()
            .flatten()
            .all(|slot| slot.disconnected);
        if !all_disconnected {
            return;
        }
        self.finished.set(true);
        let weak = self.weak.clone();
        self.call(Box::new(move || {
            if let Some(transport) = weak.upgrade() {
                transport.call_connection_lost(None);
            }
        }));
    }

    fn call_connection_lost(&self, err: Option<io::Error>) {
        let handler = self.handler.borrow_mut().take();
        if let Some(handler) = handler {
            handler.borrow_mut().connection_lost(err);
        }
        // Release endpoint references; their descriptors are already closed.
        for slot in self.pipes.borrow_mut().iter_mut().flatten() {
            slot.endpoint = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::LabReactor;
    use crate::watcher::tests_support::wait_for;
    use crate::watcher::SafeChildWatcher;

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        ConnectionMade,
        ProcessExited,
        ConnectionLost,
    }

    #[derive(Default)]
    struct RecordingHandler {
        events: Rc<RefCell<Vec<Event>>>,
    }

    impl RecordingHandler {
        fn new() -> (Rc<RefCell<Self>>, Rc<RefCell<Vec<Event>>>) {
            let events = Rc::new(RefCell::new(Vec::new()));
            let handler = Rc::new(RefCell::new(Self {
                events: events.clone(),
            }));
            (handler, events)
        }
    }

    impl ProcessHandler for RecordingHandler {
        fn connection_made(&mut self, _transport: &Rc<ProcessTransport>) {
            self.events.borrow_mut().push(Event::ConnectionMade);
        }

        fn process_exited(&mut self) {
            self.events.borrow_mut().push(Event::ProcessExited);
        }

        fn connection_lost(&mut self, err: Option<io::Error>) {
            assert!(err.is_none());
            self.events.borrow_mut().push(Event::ConnectionLost);
        }
    }

    fn exit_command(code: i32) -> Command {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(format!("exit {code}"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
    }

    fn drive_until(
        reactor: &Rc<LabReactor>,
        watcher: &Rc<SafeChildWatcher>,
        mut done: impl FnMut() -> bool,
    ) -> bool {
        wait_for(|| {
            watcher.sigchld_received();
            reactor.run_pending();
            done()
        })
    }

    #[test]
    fn exit_without_pipes_delivers_full_lifecycle() {
        let _guard = crate::test_util::process_lock();
        let reactor = LabReactor::new();
        let watcher = SafeChildWatcher::new();
        let watcher_dyn: Rc<dyn ChildWatcher> = watcher.clone();
        let (handler, events) = RecordingHandler::new();

        let transport = ProcessTransport::spawn(
            reactor.clone(),
            &watcher_dyn,
            &exit_command(7),
            handler,
            Config::default(),
            None,
        )
        .expect("spawn");
        let waiter = transport.wait();

        assert!(drive_until(&reactor, &watcher, || {
            events.borrow().contains(&Event::ConnectionLost)
        }));

        let events = events.borrow();
        assert_eq!(
            *events,
            vec![
                Event::ConnectionMade,
                Event::ProcessExited,
                Event::ConnectionLost
            ]
        );
        assert_eq!(transport.returncode(), Some(7));
        assert_eq!(transport.handle().status(), Some(7));
        assert_eq!(waiter.result(), Some(7));
        assert!(transport.is_finished());

        // A waiter created after the exit resolves immediately.
        assert_eq!(transport.wait().result(), Some(7));
        // The process is gone; signalling it is a lookup error now.
        assert!(matches!(
            transport.terminate(),
            Err(Error::ProcessLookup(_))
        ));
    }

    #[test]
    fn ready_waiter_resolves_after_wiring() {
        let _guard = crate::test_util::process_lock();
        let reactor = LabReactor::new();
        let watcher = SafeChildWatcher::new();
        let watcher_dyn: Rc<dyn ChildWatcher> = watcher.clone();
        let (handler, events) = RecordingHandler::new();
        let ready = Rc::new(Cell::new(false));
        let ready2 = ready.clone();

        let transport = ProcessTransport::spawn(
            reactor.clone(),
            &watcher_dyn,
            &exit_command(0),
            handler,
            Config::default(),
            Some(Box::new(move |result| {
                assert!(result.is_ok());
                ready2.set(true);
            })),
        )
        .expect("spawn");

        reactor.run_pending();
        assert!(ready.get());

        assert!(drive_until(&reactor, &watcher, || {
            events.borrow().contains(&Event::ConnectionLost)
        }));
        assert_eq!(transport.returncode(), Some(0));
    }

    #[test]
    fn close_is_idempotent_and_kills_running_child() {
        let _guard = crate::test_util::process_lock();
        let reactor = LabReactor::new();
        let watcher = SafeChildWatcher::new();
        let watcher_dyn: Rc<dyn ChildWatcher> = watcher.clone();
        let (handler, events) = RecordingHandler::new();

        let mut command = Command::new("sleep");
        command
            .arg("30")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let transport = ProcessTransport::spawn(
            reactor.clone(),
            &watcher_dyn,
            &command,
            handler,
            Config::default(),
            None,
        )
        .expect("spawn");
        reactor.run_pending();

        transport.close();
        transport.close();
        assert!(transport.is_closed());
        assert!(matches!(
            transport.send_signal(libc::SIGTERM),
            Err(Error::ClosedTransport)
        ));

        assert!(drive_until(&reactor, &watcher, || {
            events.borrow().contains(&Event::ConnectionLost)
        }));

        let events = events.borrow();
        let lost = events
            .iter()
            .filter(|e| matches!(e, Event::ConnectionLost))
            .count();
        assert_eq!(lost, 1);
        assert_eq!(transport.returncode(), Some(-libc::SIGKILL));
    }

    #[test]
    fn terminate_resolves_with_signal_code() {
        let _guard = crate::test_util::process_lock();
        let reactor = LabReactor::new();
        let watcher = SafeChildWatcher::new();
        let watcher_dyn: Rc<dyn ChildWatcher> = watcher.clone();
        let (handler, events) = RecordingHandler::new();

        let mut command = Command::new("sleep");
        command
            .arg("30")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let transport = ProcessTransport::spawn(
            reactor.clone(),
            &watcher_dyn,
            &command,
            handler,
            Config::default(),
            None,
        )
        .expect("spawn");
        reactor.run_pending();

        transport.terminate().expect("terminate");
        assert!(drive_until(&reactor, &watcher, || {
            events.borrow().contains(&Event::ConnectionLost)
        }));
        assert_eq!(transport.returncode(), Some(-libc::SIGTERM));

        let waiter = transport.wait();
        assert_eq!(waiter.result(), Some(-libc::SIGTERM));
    }

    #[test]
    fn cancelled_waiter_is_skipped() {
        let _guard = crate::test_util::process_lock();
        let reactor = LabReactor::new();
        let watcher = SafeChildWatcher::new();
        let watcher_dyn: Rc<dyn ChildWatcher> = watcher.clone();
        let (handler, events) = RecordingHandler::new();

        let transport = ProcessTransport::spawn(
            reactor.clone(),
            &watcher_dyn,
            &exit_command(4),
            handler,
            Config::default(),
            None,
        )
        .expect("spawn");

        let cancelled = transport.wait();
        let kept = transport.wait();
        let fired = Rc::new(Cell::new(None));
        {
            let fired = fired.clone();
            kept.on_complete(Box::new(move |code| fired.set(Some(code))));
        }
        cancelled.cancel();

        assert!(drive_until(&reactor, &watcher, || {
            events.borrow().contains(&Event::ConnectionLost)
        }));

        assert_eq!(cancelled.result(), None);
        assert!(cancelled.is_cancelled());
        assert_eq!(kept.result(), Some(4));
        assert_eq!(fired.get(), Some(4));
    }
}
