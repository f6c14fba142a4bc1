//! Spawn configuration.

use crate::error::Error;
use crate::watcher::Pid;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::io;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process as std_process;

/// Standard I/O configuration for child processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stdio {
    /// Inherit from the parent process.
    #[default]
    Inherit,

    /// Create a pipe to/from the child process, wired to a pipe endpoint.
    Pipe,

    /// Discard (redirect to /dev/null).
    Null,
}

impl Stdio {
    /// Creates an `Inherit` configuration.
    #[must_use]
    pub fn inherit() -> Self {
        Self::Inherit
    }

    /// Creates a `Pipe` configuration.
    #[must_use]
    pub fn piped() -> Self {
        Self::Pipe
    }

    /// Creates a `Null` configuration.
    #[must_use]
    pub fn null() -> Self {
        Self::Null
    }

    fn to_std(self) -> std_process::Stdio {
        match self {
            Self::Inherit => std_process::Stdio::inherit(),
            Self::Pipe => std_process::Stdio::piped(),
            Self::Null => std_process::Stdio::null(),
        }
    }
}

/// Raw parts of a freshly spawned child.
///
/// The pipe descriptors are still blocking; pipe endpoints switch them to
/// non-blocking when they take ownership. Nothing here reaps the child; a
/// watcher owns that.
#[derive(Debug)]
pub(crate) struct SpawnedChild {
    pub(crate) pid: Pid,
    pub(crate) program: OsString,
    pub(crate) args: Vec<OsString>,
    pub(crate) stdin: Option<OwnedFd>,
    pub(crate) stdout: Option<OwnedFd>,
    pub(crate) stderr: Option<OwnedFd>,
}

/// Builder describing the process to spawn.
///
/// # Example
///
/// ```ignore
/// let mut command = Command::new("cat");
/// command
///     .stdin(Stdio::piped())
///     .stdout(Stdio::piped())
///     .stderr(Stdio::null());
/// ```
#[derive(Debug, Clone)]
pub struct Command {
    program: OsString,
    args: Vec<OsString>,
    env: BTreeMap<OsString, OsString>,
    env_clear: bool,
    current_dir: Option<PathBuf>,
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
}

impl Command {
    /// Creates a new command for the given program.
    ///
    /// The program can be an absolute path, a relative path, or a name to be
    /// resolved through `PATH`.
    #[must_use]
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
            env_clear: false,
            current_dir: None,
            stdin: Stdio::default(),
            stdout: Stdio::default(),
            stderr: Stdio::default(),
        }
    }

    /// Adds an argument to the command.
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Adds multiple arguments to the command.
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_os_string());
        }
        self
    }

    /// Sets an environment variable for the child process.
    pub fn env<K, V>(&mut self, key: K, val: V) -> &mut Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.env
            .insert(key.as_ref().to_os_string(), val.as_ref().to_os_string());
        self
    }

    /// Clears the inherited environment; only `env()` values remain.
    pub fn env_clear(&mut self) -> &mut Self {
        self.env_clear = true;
        self
    }

    /// Sets the working directory for the child process.
    pub fn current_dir<P: AsRef<Path>>(&mut self, dir: P) -> &mut Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Configures stdin for the child process.
    pub fn stdin(&mut self, cfg: Stdio) -> &mut Self {
        self.stdin = cfg;
        self
    }

    /// Configures stdout for the child process.
    pub fn stdout(&mut self, cfg: Stdio) -> &mut Self {
        self.stdout = cfg;
        self
    }

    /// Configures stderr for the child process.
    pub fn stderr(&mut self, cfg: Stdio) -> &mut Self {
        self.stderr = cfg;
        self
    }

    /// Which streams are piped, in `(stdin, stdout, stderr)` order.
    #[must_use]
    pub fn piped_streams(&self) -> (bool, bool, bool) {
        (
            self.stdin == Stdio::Pipe,
            self.stdout == Stdio::Pipe,
            self.stderr == Stdio::Pipe,
        )
    }

    /// Forks and execs, returning the child's pid and pipe descriptors.
    pub(crate) fn spawn_raw(&self) -> Result<SpawnedChild, Error> {
        let mut command = std_process::Command::new(&self.program);
        command.args(&self.args);
        if self.env_clear {
            command.env_clear();
        }
        for (key, val) in &self.env {
            command.env(key, val);
        }
        if let Some(ref dir) = self.current_dir {
            command.current_dir(dir);
        }
        command.stdin(self.stdin.to_std());
        command.stdout(self.stdout.to_std());
        command.stderr(self.stderr.to_std());

        let mut child = command.spawn().map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => {
                Error::ProgramNotFound(self.program.to_string_lossy().into_owned())
            }
            io::ErrorKind::PermissionDenied => {
                Error::PermissionDenied(self.program.to_string_lossy().into_owned())
            }
            _ => Error::Spawn {
                program: self.program.to_string_lossy().into_owned(),
                source: err,
            },
        })?;

        #[allow(clippy::cast_possible_wrap)]
        let pid = child.id() as Pid;
        let stdin = child.stdin.take().map(OwnedFd::from);
        let stdout = child.stdout.take().map(OwnedFd::from);
        let stderr = child.stderr.take().map(OwnedFd::from);
        // Dropping the std handle neither kills nor reaps the child.
        drop(child);

        Ok(SpawnedChild {
            pid,
            program: self.program.clone(),
            args: self.args.clone(),
            stdin,
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::tests_support::kill_and_reap;

    #[test]
    fn unknown_program_maps_to_not_found() {
        let command = Command::new("definitely_not_a_real_program_1b2c3");
        let err = command.spawn_raw().unwrap_err();
        assert!(matches!(err, Error::ProgramNotFound(_)));
    }

    #[test]
    fn piped_streams_reflect_configuration() {
        let mut command = Command::new("cat");
        command.stdin(Stdio::piped()).stdout(Stdio::piped());
        assert_eq!(command.piped_streams(), (true, true, false));
    }

    #[test]
    fn spawn_returns_descriptors_for_piped_streams_only() {
        let _guard = crate::test_util::process_lock();
        let mut command = Command::new("cat");
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let spawned = command.spawn_raw().expect("spawn");
        assert!(spawned.stdin.is_some());
        assert!(spawned.stdout.is_some());
        assert!(spawned.stderr.is_none());
        assert!(spawned.pid > 0);
        kill_and_reap(spawned.pid);
    }

    #[test]
    fn builder_accumulates_args_and_env() {
        let mut command = Command::new("printenv");
        command.args(["A", "B"]).env("KEY", "VALUE").env_clear();
        assert_eq!(command.args.len(), 2);
        assert_eq!(command.env.len(), 1);
        assert!(command.env_clear);
    }
}
