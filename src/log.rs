//! Leveled diagnostics hook.
//!
//! The client emits its diagnostics through an implementation of [`Log`]
//! supplied at construction time. The default is [`NullLog`], which compiles
//! to nothing; firmware can route the messages to a UART, RTT, syslog or
//! anything else without the library knowing. With the `std` feature enabled,
//! [`StdLog`] prints to stdout for host-side debugging.

/// Severity of a diagnostic message.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Level {
    /// Unrecoverable failures.
    Error,
    /// Unexpected but survivable conditions.
    Warn,
    /// Per-request milestones (status, transfer stats).
    Info,
    /// State machine transitions and codec progress.
    Debug,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Level {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Level::Error => defmt::write!(f, "Error"),
            Level::Warn => defmt::write!(f, "Warn"),
            Level::Info => defmt::write!(f, "Info"),
            Level::Debug => defmt::write!(f, "Debug"),
        }
    }
}

/// A sink for client diagnostics.
pub trait Log {
    /// Returns whether `level` is currently of interest. Formatting is skipped
    /// entirely when this returns `false`.
    fn enabled(&self, level: Level) -> bool;

    /// Consume one formatted message.
    fn log(&mut self, level: Level, args: core::fmt::Arguments<'_>);
}

/// A logger that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLog;

impl Log for NullLog {
    fn enabled(&self, _level: Level) -> bool {
        false
    }

    fn log(&mut self, _level: Level, _args: core::fmt::Arguments<'_>) {}
}

/// A logger that prints to stdout. Host-side debugging only.
#[cfg(feature = "std")]
#[derive(Debug, Default, Clone, Copy)]
pub struct StdLog {
    /// Most verbose level that will be printed.
    pub max_level: Option<Level>,
}

#[cfg(feature = "std")]
impl Log for StdLog {
    fn enabled(&self, level: Level) -> bool {
        level <= self.max_level.unwrap_or(Level::Debug)
    }

    fn log(&mut self, level: Level, args: core::fmt::Arguments<'_>) {
        println!("[{:?}] {}", level, args);
    }
}

macro_rules! log_at {
    ($log:expr, $level:expr, $($arg:tt)*) => {
        if $crate::log::Log::enabled(&$log, $level) {
            $crate::log::Log::log(&mut $log, $level, format_args!($($arg)*));
        }
    };
}

pub(crate) use log_at;
