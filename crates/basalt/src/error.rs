//! Error chain for the Basalt runtime.
//!
//! Fallible runtime operations do not unwind. They return a "no result"
//! sentinel and, when the caller cares, record what went wrong through an
//! [`ErrorSink`]: a view onto a caller-owned [`ErrorStack`]. Reporting a new
//! failure pushes an [`ErrorRecord`] whose `cause` is the previous head, so
//! the stack preserves the full history, newest first.
//!
//! A sink obtained from [`ErrorSink::ignore`] is always legal and turns
//! every report into a no-op without allocating.
//!
//! # Example
//!
//! ```
//! use basalt::error::{ErrorStack, code};
//! use basalt::throw;
//!
//! let mut errors = ErrorStack::new();
//! let mut sink = errors.sink();
//! throw!(sink, code::ALLOCATION, "no space for {} bytes", 128);
//! throw!(sink, 7, "while loading widget cache");
//!
//! let head = errors.head().unwrap();
//! assert_eq!(head.code(), 7);
//! assert_eq!(head.cause().unwrap().code(), code::ALLOCATION);
//! ```

use std::fmt;

/// Well-known error codes used by the runtime itself.
///
/// Application codes are positive by convention; wrapped system errors carry
/// the raw OS status as their code.
pub mod code {
    /// Arena or memory exhaustion.
    pub const ALLOCATION: i32 = -1;
    /// Mutex setup or acquisition failure.
    pub const LOCK: i32 = -2;
}

/// One recorded failure, linking to the failure it superseded.
pub struct ErrorRecord {
    file: &'static str,
    line: u32,
    code: i32,
    description: Box<str>,
    cause: Option<Box<ErrorRecord>>,
}

impl ErrorRecord {
    /// Source file that reported the error.
    #[must_use]
    pub fn file(&self) -> &'static str {
        self.file
    }

    /// Line within [`ErrorRecord::file`].
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Numeric error code.
    #[must_use]
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The earlier error this one superseded, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&ErrorRecord> {
        self.cause.as_deref()
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {} (code {})",
            self.file, self.line, self.description, self.code
        )
    }
}

impl fmt::Debug for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for ErrorRecord {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// Caller-owned head of an error chain.
#[derive(Default)]
pub struct ErrorStack {
    head: Option<Box<ErrorRecord>>,
}

impl ErrorStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> ErrorStack {
        ErrorStack { head: None }
    }

    /// Returns a sink that records into this stack.
    pub fn sink(&mut self) -> ErrorSink<'_> {
        ErrorSink { slot: Some(self) }
    }

    /// True if nothing has been reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// The most recent record, if any.
    #[must_use]
    pub fn head(&self) -> Option<&ErrorRecord> {
        self.head.as_deref()
    }

    /// Removes and returns the whole chain, leaving the stack empty.
    pub fn take(&mut self) -> Option<Box<ErrorRecord>> {
        self.head.take()
    }

    /// Walks the chain from the newest record to the oldest cause.
    pub fn iter(&self) -> impl Iterator<Item = &ErrorRecord> {
        std::iter::successors(self.head(), |r| r.cause())
    }

    /// Number of records in the chain.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.iter().count()
    }
}

impl fmt::Debug for ErrorStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// An optional destination for failure reports.
///
/// Every fallible runtime operation takes a sink by value. Use
/// [`ErrorSink::reborrow`] to pass the same destination to several callees.
pub struct ErrorSink<'a> {
    slot: Option<&'a mut ErrorStack>,
}

impl ErrorSink<'_> {
    /// A sink that discards every report without allocating.
    #[must_use]
    pub fn ignore() -> ErrorSink<'static> {
        ErrorSink { slot: None }
    }

    /// Reborrows the sink for a nested call.
    pub fn reborrow(&mut self) -> ErrorSink<'_> {
        ErrorSink { slot: self.slot.as_deref_mut() }
    }

    /// True if this sink discards reports.
    #[must_use]
    pub fn is_ignoring(&self) -> bool {
        self.slot.is_none()
    }

    /// True if an error has been recorded in the underlying stack.
    ///
    /// Always false for an ignoring sink: a caller that opted out of error
    /// reporting also opted out of failure detection by this route.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.slot.as_ref().is_some_and(|s| !s.is_empty())
    }

    /// Records a failure, chaining any existing record as its cause.
    ///
    /// No-op on an ignoring sink. Prefer the [`throw!`](crate::throw) macro,
    /// which fills in `file` and `line`.
    pub fn throw(&mut self, file: &'static str, line: u32, code: i32, description: &str) {
        let Some(stack) = self.slot.as_deref_mut() else {
            return;
        };
        let cause = stack.head.take();
        stack.head = Some(Box::new(ErrorRecord {
            file,
            line,
            code,
            description: description.into(),
            cause,
        }));
    }

    /// Translates a non-zero OS status into a record and reports it.
    ///
    /// Returns whether a failure was detected; status 0 reports nothing.
    /// The record's code is the raw status and its description comes from
    /// the platform's error string.
    pub fn throw_os_status(&mut self, file: &'static str, line: u32, status: i32) -> bool {
        if status == 0 {
            return false;
        }
        if self.slot.is_some() {
            let description = std::io::Error::from_raw_os_error(status).to_string();
            self.throw(file, line, status, &description);
        }
        true
    }
}

impl<'a> From<&'a mut ErrorStack> for ErrorSink<'a> {
    fn from(stack: &'a mut ErrorStack) -> ErrorSink<'a> {
        stack.sink()
    }
}

/// Records a failure on a sink, capturing the call site.
///
/// ```
/// use basalt::error::ErrorStack;
/// use basalt::throw;
///
/// let mut errors = ErrorStack::new();
/// let mut sink = errors.sink();
/// throw!(sink, 3, "widget {} went missing", "alpha");
/// assert_eq!(errors.head().unwrap().code(), 3);
/// ```
#[macro_export]
macro_rules! throw {
    ($sink:expr, $code:expr, $($arg:tt)*) => {
        $sink.throw(file!(), line!(), $code, &format!($($arg)*))
    };
}
