//! Test logging infrastructure.
//!
//! Captures typed pipe, process, and signal events with timestamps so a
//! failing test can print exactly what the transports did, in order.
//!
//! # Overview
//!
//! - [`TestLogLevel`]: configurable verbosity levels
//! - [`TestEvent`]: typed events for transport operations
//! - [`TestLogger`]: captures and reports events with timestamps
//!
//! # Example
//!
//! ```ignore
//! use procwire::test_logging::{TestLogger, TestLogLevel, TestEvent};
//!
//! let logger = TestLogger::new(TestLogLevel::Debug);
//! logger.log(TestEvent::ProcessSpawned { pid: 4242 });
//!
//! // On test completion, print the report
//! println!("{}", logger.report());
//! ```

use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Instant;

/// Logging verbosity level for tests.
///
/// Levels are ordered from least to most verbose:
/// `Error < Warn < Info < Debug < Trace`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TestLogLevel {
    /// Only errors and failures.
    Error,
    /// Warnings and above.
    Warn,
    /// General test progress.
    #[default]
    Info,
    /// Detailed pipe and process operations.
    Debug,
    /// All events including scheduling and signal dispatch.
    Trace,
}

impl TestLogLevel {
    /// Returns a human-readable name for the level.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    /// Returns the level from the `TEST_LOG_LEVEL` environment variable.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var("TEST_LOG_LEVEL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

impl std::fmt::Display for TestLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for TestLogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

/// Typed events captured during a test.
#[derive(Debug, Clone)]
pub enum TestEvent {
    /// A process was spawned.
    ProcessSpawned {
        /// The child's pid.
        pid: i32,
    },
    /// A process was reaped with an exit code.
    ProcessReaped {
        /// The child's pid.
        pid: i32,
        /// The decoded exit code.
        code: i32,
    },
    /// Data crossed a pipe.
    PipeData {
        /// The descriptor involved.
        fd: i32,
        /// Number of bytes.
        bytes: usize,
    },
    /// A pipe reached end-of-file.
    PipeEof {
        /// The descriptor involved.
        fd: i32,
    },
    /// A pipe finished teardown.
    PipeClosed {
        /// The descriptor involved.
        fd: i32,
    },
    /// A signal was observed by the loop.
    SignalSeen {
        /// The raw signal number.
        signal: i32,
    },
    /// Free-form progress message.
    Custom {
        /// Short category tag.
        category: &'static str,
        /// Formatted message.
        message: String,
    },
    /// Warning-level message.
    Warn {
        /// Short category tag.
        category: &'static str,
        /// Formatted message.
        message: String,
    },
    /// Error-level message.
    Error {
        /// Short category tag.
        category: &'static str,
        /// Formatted message.
        message: String,
    },
}

impl TestEvent {
    /// The verbosity level at which this event is recorded.
    #[must_use]
    pub const fn level(&self) -> TestLogLevel {
        match self {
            Self::Error { .. } => TestLogLevel::Error,
            Self::Warn { .. } => TestLogLevel::Warn,
            Self::ProcessSpawned { .. } | Self::ProcessReaped { .. } | Self::Custom { .. } => {
                TestLogLevel::Info
            }
            Self::PipeData { .. } | Self::PipeEof { .. } | Self::PipeClosed { .. } => {
                TestLogLevel::Debug
            }
            Self::SignalSeen { .. } => TestLogLevel::Trace,
        }
    }
}

impl std::fmt::Display for TestEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcessSpawned { pid } => write!(f, "process spawned pid={pid}"),
            Self::ProcessReaped { pid, code } => {
                write!(f, "process reaped pid={pid} code={code}")
            }
            Self::PipeData { fd, bytes } => write!(f, "pipe data fd={fd} bytes={bytes}"),
            Self::PipeEof { fd } => write!(f, "pipe eof fd={fd}"),
            Self::PipeClosed { fd } => write!(f, "pipe closed fd={fd}"),
            Self::SignalSeen { signal } => write!(f, "signal seen {signal}"),
            Self::Custom { category, message }
            | Self::Warn { category, message }
            | Self::Error { category, message } => write!(f, "[{category}] {message}"),
        }
    }
}

struct Record {
    at: Instant,
    event: TestEvent,
}

/// Captures typed events with timestamps and renders a report.
pub struct TestLogger {
    level: TestLogLevel,
    started: Instant,
    events: Mutex<Vec<Record>>,
}

impl TestLogger {
    /// Creates a logger capturing events at or below `level`.
    #[must_use]
    pub fn new(level: TestLogLevel) -> Self {
        Self {
            level,
            started: Instant::now(),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Records `event` if it passes the level filter.
    pub fn log(&self, event: TestEvent) {
        if event.level() > self.level {
            return;
        }
        self.events.lock().expect("lock poisoned").push(Record {
            at: Instant::now(),
            event,
        });
    }

    /// Number of captured events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().expect("lock poisoned").len()
    }

    /// True if nothing has been captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counts events matching `pred`.
    pub fn count_matching(&self, pred: impl Fn(&TestEvent) -> bool) -> usize {
        self.events
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|r| pred(&r.event))
            .count()
    }

    /// Renders the full captured log, one timestamped line per event.
    #[must_use]
    pub fn report(&self) -> String {
        let events = self.events.lock().expect("lock poisoned");
        let mut out = String::new();
        let _ = writeln!(out, "=== test log ({} events) ===", events.len());
        for record in events.iter() {
            let elapsed = record.at.duration_since(self.started);
            let _ = writeln!(
                out,
                "[{:>8.3}ms] {:5} {}",
                elapsed.as_secs_f64() * 1000.0,
                record.event.level().name(),
                record.event
            );
        }
        out
    }

    /// Clears all captured events.
    pub fn clear(&self) {
        self.events.lock().expect("lock poisoned").clear();
    }
}

impl Default for TestLogger {
    fn default() -> Self {
        Self::new(TestLogLevel::Info)
    }
}

/// Log a custom event to a test logger.
///
/// # Example
///
/// ```ignore
/// test_log!(logger, "setup", "spawning {} children", count);
/// ```
#[macro_export]
macro_rules! test_log {
    ($logger:expr, $cat:literal, $($arg:tt)*) => {
        $logger.log($crate::test_logging::TestEvent::Custom {
            category: $cat,
            message: format!($($arg)*),
        });
    };
}

/// Log a warning event to a test logger.
#[macro_export]
macro_rules! test_warn {
    ($logger:expr, $cat:literal, $($arg:tt)*) => {
        $logger.log($crate::test_logging::TestEvent::Warn {
            category: $cat,
            message: format!($($arg)*),
        });
    };
}

/// Log an error event to a test logger.
#[macro_export]
macro_rules! test_error {
    ($logger:expr, $cat:literal, $($arg:tt)*) => {
        $logger.log($crate::test_logging::TestEvent::Error {
            category: $cat,
            message: format!($($arg)*),
        });
    };
}

/// Assert a condition, printing the full log on failure.
#[macro_export]
macro_rules! assert_log {
    ($logger:expr, $cond:expr) => {
        if !$cond {
            eprintln!("{}", $logger.report());
            panic!("assertion failed: {}", stringify!($cond));
        }
    };
    ($logger:expr, $cond:expr, $($arg:tt)*) => {
        if !$cond {
            eprintln!("{}", $logger.report());
            panic!($($arg)*);
        }
    };
}

/// Assert equality, printing the full log on failure.
#[macro_export]
macro_rules! assert_eq_log {
    ($logger:expr, $left:expr, $right:expr) => {
        if $left != $right {
            eprintln!("{}", $logger.report());
            panic!(
                "assertion failed: `(left == right)`\n  left: {:?}\n right: {:?}",
                $left, $right
            );
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering() {
        assert!(TestLogLevel::Error < TestLogLevel::Warn);
        assert!(TestLogLevel::Warn < TestLogLevel::Info);
        assert!(TestLogLevel::Info < TestLogLevel::Debug);
        assert!(TestLogLevel::Debug < TestLogLevel::Trace);
    }

    #[test]
    fn level_from_str() {
        assert_eq!("error".parse(), Ok(TestLogLevel::Error));
        assert_eq!("WARNING".parse(), Ok(TestLogLevel::Warn));
        assert_eq!("debug".parse(), Ok(TestLogLevel::Debug));
        assert_eq!("bogus".parse::<TestLogLevel>(), Err(()));
    }

    #[test]
    fn logger_filters_by_level() {
        let logger = TestLogger::new(TestLogLevel::Info);
        logger.log(TestEvent::ProcessSpawned { pid: 1 });
        logger.log(TestEvent::PipeData { fd: 3, bytes: 10 });
        logger.log(TestEvent::SignalSeen { signal: 17 });
        assert_eq!(logger.len(), 1);
    }

    #[test]
    fn report_contains_events() {
        let logger = TestLogger::new(TestLogLevel::Trace);
        logger.log(TestEvent::ProcessSpawned { pid: 42 });
        logger.log(TestEvent::ProcessReaped { pid: 42, code: 0 });
        let report = logger.report();
        assert!(report.contains("pid=42"));
        assert!(report.contains("code=0"));
        assert_eq!(
            logger.count_matching(|e| matches!(e, TestEvent::ProcessReaped { .. })),
            1
        );
    }

    #[test]
    fn clear_resets_state() {
        let logger = TestLogger::default();
        test_log!(logger, "setup", "hello {}", 1);
        assert!(!logger.is_empty());
        logger.clear();
        assert!(logger.is_empty());
    }
}
