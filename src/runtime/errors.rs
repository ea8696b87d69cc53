//! Runtime errors
//!
//! Every failure the runtime core can produce is a variant of [`RuntimeError`].
//! Callers never inspect messages: [`RuntimeError::class`] tells whether the
//! language's recovery construct may catch the error, [`RuntimeError::kind`]
//! gives the closed category.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::debugger::BreakpointId;
use crate::runtime::scheduler::TaskId;
use crate::runtime::value::Value;

/// Runtime result
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Whether an error may be caught by the evaluating program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Propagates as an ordinary value and may be recovered from.
    Recoverable,
    /// Aborts the current run and is reported to the front-end.
    Fatal,
}

/// Closed set of error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Thrown,
    Canceled,
    TaskFailed,
    Type,
    SendOnClosed,
    UnhandledTaskFailure,
    UnhandledFailures,
    TaskPanicked,
    SpawnFailed,
    UnknownBreakpoint,
    InvalidPolicy,
    NotPaused,
    SessionDone,
    FrameOutOfRange,
    EnvironmentReleased,
    Terminated,
}

/// A failed task that nobody observed.
#[derive(Debug, Clone)]
pub struct UnhandledFailure {
    /// The task that failed.
    pub task: TaskId,
    /// The task's name at spawn time.
    pub name: Arc<str>,
    /// The error the task failed with.
    pub error: RuntimeError,
}

impl fmt::Display for UnhandledFailure {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{} '{}': {}", self.task, self.name, self.error)
    }
}

/// Runtime errors
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// An error value raised by the program itself.
    #[error("{0}")]
    Thrown(Value),

    #[error("task canceled")]
    Canceled,

    /// A fatal error from inside a task, surfaced through `wait`.
    #[error("{task} failed: {source}")]
    TaskFailed {
        task: TaskId,
        #[source]
        source: Box<RuntimeError>,
    },

    #[error("type error: {0}")]
    Type(String),

    #[error("send on closed channel")]
    SendOnClosed,

    #[error("unhandled failure in {task}: {source}")]
    UnhandledTaskFailure {
        task: TaskId,
        #[source]
        source: Box<RuntimeError>,
    },

    #[error("{} unhandled task failure(s): {}", .0.len(), join_failures(.0))]
    UnhandledFailures(Vec<UnhandledFailure>),

    #[error("{task} panicked: {message}")]
    TaskPanicked { task: TaskId, message: String },

    #[error("failed to spawn {task}: {message}")]
    SpawnFailed { task: TaskId, message: String },

    #[error("unknown breakpoint: {0}")]
    UnknownBreakpoint(BreakpointId),

    #[error("invalid task failure policy '{0}' (expected 'fail-fast' or 'defer')")]
    InvalidPolicy(String),

    #[error("program is not paused")]
    NotPaused,

    #[error("debug session has finished")]
    SessionDone,

    #[error("frame index {index} out of range (stack depth {depth})")]
    FrameOutOfRange { index: usize, depth: usize },

    #[error("environment for frame {0} has been released")]
    EnvironmentReleased(usize),

    #[error("debug session terminated")]
    Terminated,
}

fn join_failures(failures: &[UnhandledFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl RuntimeError {
    /// Raise a program-level error carrying a message string.
    pub fn thrown(message: impl Into<String>) -> Self {
        RuntimeError::Thrown(Value::from(message.into()))
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::Thrown(_) => ErrorKind::Thrown,
            RuntimeError::Canceled => ErrorKind::Canceled,
            RuntimeError::TaskFailed { .. } => ErrorKind::TaskFailed,
            RuntimeError::Type(_) => ErrorKind::Type,
            RuntimeError::SendOnClosed => ErrorKind::SendOnClosed,
            RuntimeError::UnhandledTaskFailure { .. } => ErrorKind::UnhandledTaskFailure,
            RuntimeError::UnhandledFailures(_) => ErrorKind::UnhandledFailures,
            RuntimeError::TaskPanicked { .. } => ErrorKind::TaskPanicked,
            RuntimeError::SpawnFailed { .. } => ErrorKind::SpawnFailed,
            RuntimeError::UnknownBreakpoint(_) => ErrorKind::UnknownBreakpoint,
            RuntimeError::InvalidPolicy(_) => ErrorKind::InvalidPolicy,
            RuntimeError::NotPaused => ErrorKind::NotPaused,
            RuntimeError::SessionDone => ErrorKind::SessionDone,
            RuntimeError::FrameOutOfRange { .. } => ErrorKind::FrameOutOfRange,
            RuntimeError::EnvironmentReleased(_) => ErrorKind::EnvironmentReleased,
            RuntimeError::Terminated => ErrorKind::Terminated,
        }
    }

    /// Recoverable or fatal.
    pub fn class(&self) -> ErrorClass {
        match self.kind() {
            ErrorKind::Thrown | ErrorKind::Canceled | ErrorKind::TaskFailed | ErrorKind::Type => {
                ErrorClass::Recoverable
            }
            _ => ErrorClass::Fatal,
        }
    }

    #[inline]
    pub fn is_recoverable(&self) -> bool {
        self.class() == ErrorClass::Recoverable
    }

    #[inline]
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Re-raise an error received from a task as seen by a waiter.
    ///
    /// Recoverable errors pass through untouched; fatal ones are wrapped in
    /// [`RuntimeError::TaskFailed`] so the waiter can catch them.
    pub fn into_observed(
        self,
        task: TaskId,
    ) -> Self {
        if self.is_recoverable() {
            self
        } else {
            RuntimeError::TaskFailed {
                task,
                source: Box::new(self),
            }
        }
    }
}
