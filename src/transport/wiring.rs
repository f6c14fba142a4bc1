//! Pipe-wiring state machine.
//!
//! After a spawn, each piped stream is wrapped in its endpoint one at a time,
//! in stdin, stdout, stderr order. The machine suspends after wiring each
//! pipe — it reschedules itself through the reactor — so other loop work
//! interleaves, and resumes strictly in registration order. Once every piped
//! stream is wired, the transport flushes its queued calls and delivers
//! `connection_made`.
//!
//! A wiring failure is surfaced to the optional ready waiter and otherwise
//! logged; the already-spawned process is left running.

use super::{PipeAdapter, PipeRef, ProcessTransport, ReadyWaiter, SpawnedChild};
use crate::config::Config;
use crate::error::Error;
use crate::handler::{PipeHandler, StreamIndex};
use crate::pipe::{ReadPipeEndpoint, WritePipeEndpoint};
use std::cell::RefCell;
use std::os::fd::OwnedFd;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WiringState {
    AwaitStdin,
    AwaitStdout,
    AwaitStderr,
    Ready,
    Failed,
}

pub(crate) struct WiringTask {
    transport: Rc<ProcessTransport>,
    stdin: Option<OwnedFd>,
    stdout: Option<OwnedFd>,
    stderr: Option<OwnedFd>,
    config: Config,
    on_ready: Option<ReadyWaiter>,
    state: WiringState,
}

impl WiringTask {
    pub(crate) fn new(
        transport: Rc<ProcessTransport>,
        spawned: SpawnedChild,
        config: Config,
        on_ready: Option<ReadyWaiter>,
    ) -> Self {
        Self {
            transport,
            stdin: spawned.stdin,
            stdout: spawned.stdout,
            stderr: spawned.stderr,
            config,
            on_ready,
            state: WiringState::AwaitStdin,
        }
    }
}

/// Schedules the first step of the wiring sequence.
pub(crate) fn start(task: WiringTask) {
    suspend(task);
}

fn suspend(task: WiringTask) {
    let reactor = task.transport.reactor();
    reactor.schedule(Box::new(move || advance(task)));
}

fn advance(mut task: WiringTask) {
    loop {
        match task.state {
            WiringState::AwaitStdin => {
                task.state = WiringState::AwaitStdout;
                if let Some(fd) = task.stdin.take() {
                    match wire_write(&task, fd, StreamIndex::Stdin) {
                        Ok(()) => return suspend(task),
                        Err(err) => return fail(task, err),
                    }
                }
            }
            WiringState::AwaitStdout => {
                task.state = WiringState::AwaitStderr;
                if let Some(fd) = task.stdout.take() {
                    match wire_read(&task, fd, StreamIndex::Stdout) {
                        Ok(()) => return suspend(task),
                        Err(err) => return fail(task, err),
                    }
                }
            }
            WiringState::AwaitStderr => {
                task.state = WiringState::Ready;
                if let Some(fd) = task.stderr.take() {
                    match wire_read(&task, fd, StreamIndex::Stderr) {
                        Ok(()) => return suspend(task),
                        Err(err) => return fail(task, err),
                    }
                }
            }
            WiringState::Ready => {
                task.transport.wiring_complete();
                if let Some(on_ready) = task.on_ready.take() {
                    on_ready(Ok(()));
                }
                return;
            }
            WiringState::Failed => return,
        }
    }
}

fn wire_write(task: &WiringTask, fd: OwnedFd, stream: StreamIndex) -> Result<(), Error> {
    let adapter: Rc<RefCell<dyn PipeHandler>> =
        Rc::new(RefCell::new(PipeAdapter::new(&task.transport, stream)));
    let endpoint = WritePipeEndpoint::new(task.transport.reactor(), fd, adapter, &task.config)?;
    task.transport
        .store_endpoint(stream, PipeRef::Write(endpoint));
    Ok(())
}

fn wire_read(task: &WiringTask, fd: OwnedFd, stream: StreamIndex) -> Result<(), Error> {
    let adapter: Rc<RefCell<dyn PipeHandler>> =
        Rc::new(RefCell::new(PipeAdapter::new(&task.transport, stream)));
    let endpoint = ReadPipeEndpoint::new(task.transport.reactor(), fd, adapter, &task.config)?;
    task.transport.store_endpoint(stream, PipeRef::Read(endpoint));
    Ok(())
}

fn fail(mut task: WiringTask, err: Error) {
    task.state = WiringState::Failed;
    tracing::warn!(pid = task.transport.pid(), error = %err, "pipe wiring failed");
    if let Some(on_ready) = task.on_ready.take() {
        on_ready(Err(err));
    }
}
