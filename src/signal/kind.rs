//! Signal kind newtype for Unix signals.

/// Highest signal number accepted for handler registration.
///
/// Mirrors the kernel's NSIG bound; real-time signals above this are not
/// catchable through the bridge.
pub(crate) const MAX_SIGNAL: i32 = 64;

/// A Unix signal, identified by its raw number.
///
/// Constructors exist for the signals commonly handled by event loops; any
/// other signal can be built with [`SignalKind::from_raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalKind(i32);

impl SignalKind {
    /// Creates a `SignalKind` from a raw signal number.
    #[must_use]
    pub const fn from_raw(signum: i32) -> Self {
        Self(signum)
    }

    /// Returns the raw signal number.
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }

    /// SIGINT - interrupt from keyboard (Ctrl+C).
    #[must_use]
    pub const fn interrupt() -> Self {
        Self(libc::SIGINT)
    }

    /// SIGTERM - termination signal.
    #[must_use]
    pub const fn terminate() -> Self {
        Self(libc::SIGTERM)
    }

    /// SIGHUP - hangup detected on controlling terminal.
    #[must_use]
    pub const fn hangup() -> Self {
        Self(libc::SIGHUP)
    }

    /// SIGQUIT - quit from keyboard.
    #[must_use]
    pub const fn quit() -> Self {
        Self(libc::SIGQUIT)
    }

    /// SIGUSR1 - user-defined signal 1.
    #[must_use]
    pub const fn user_defined1() -> Self {
        Self(libc::SIGUSR1)
    }

    /// SIGUSR2 - user-defined signal 2.
    #[must_use]
    pub const fn user_defined2() -> Self {
        Self(libc::SIGUSR2)
    }

    /// SIGCHLD - child stopped or terminated.
    #[must_use]
    pub const fn child() -> Self {
        Self(libc::SIGCHLD)
    }

    /// SIGWINCH - window resize signal.
    #[must_use]
    pub const fn window_change() -> Self {
        Self(libc::SIGWINCH)
    }

    /// SIGALRM - timer signal.
    #[must_use]
    pub const fn alarm() -> Self {
        Self(libc::SIGALRM)
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "signal {}", self.0)
    }
}
