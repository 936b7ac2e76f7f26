//! Minimal, zero-dependency leveled logging for the Basalt runtime.
//!
//! The runtime crates log through these macros; the process-wide minimum
//! level defaults to [`Level::Warn`] so embedding applications stay quiet
//! unless they opt in.
//!
//! # Example
//!
//! ```
//! use basalt_log::{info, debug, Level};
//!
//! basalt_log::set_level(Level::Debug);
//! info!("runtime started with {} arenas", 2);
//! debug!("ring capacity: {}", 64);
//! ```

use std::fmt::Arguments;
use std::sync::atomic::{AtomicU8, Ordering};

/// Message severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Unrecoverable failures.
    Error = 0,
    /// Suspicious but survivable conditions.
    Warn = 1,
    /// High-level lifecycle events.
    Info = 2,
    /// Detailed diagnostics.
    Debug = 3,
    /// Per-operation tracing.
    Trace = 4,
}

impl Level {
    /// Returns the fixed-width label used in output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    fn from_u8(raw: u8) -> Level {
        match raw {
            0 => Level::Error,
            1 => Level::Warn,
            2 => Level::Info,
            3 => Level::Debug,
            _ => Level::Trace,
        }
    }
}

/// Process-wide minimum level. Messages above this value are discarded.
static MIN_LEVEL: AtomicU8 = AtomicU8::new(Level::Warn as u8);

/// Sets the process-wide minimum log level.
pub fn set_level(level: Level) {
    MIN_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Returns the current minimum log level.
pub fn level() -> Level {
    Level::from_u8(MIN_LEVEL.load(Ordering::Relaxed))
}

/// Returns true if a message at `level` would currently be emitted.
pub fn enabled(level: Level) -> bool {
    level as u8 <= MIN_LEVEL.load(Ordering::Relaxed)
}

/// Emits one formatted record to stderr. Called by the macros after the
/// level check; not part of the stable API.
#[doc(hidden)]
pub fn __emit(level: Level, target: &str, args: Arguments) {
    eprintln!("[{}] {}: {}", level.as_str(), target, args);
}

/// Logs at an explicit level, capturing the caller's module path.
#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        if $crate::enabled($level) {
            $crate::__emit($level, module_path!(), format_args!($($arg)*));
        }
    };
}

/// Logs at [`Level::Error`].
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => { $crate::log!($crate::Level::Error, $($arg)*) };
}

/// Logs at [`Level::Warn`].
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { $crate::log!($crate::Level::Warn, $($arg)*) };
}

/// Logs at [`Level::Info`].
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { $crate::log!($crate::Level::Info, $($arg)*) };
}

/// Logs at [`Level::Debug`].
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => { $crate::log!($crate::Level::Debug, $($arg)*) };
}

/// Logs at [`Level::Trace`].
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => { $crate::log!($crate::Level::Trace, $($arg)*) };
}
