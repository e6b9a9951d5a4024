use crate::error::{ErrorKind, KernelError};
use core::fmt;

/// Errors raised by the process/thread lifecycle machinery: invalid state
/// transitions, suspend/resume nesting misuse, and lookups against
/// control blocks that no longer exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    InvalidTransition,
    NotFound,
    NotRunnable,
    WouldDeadlock,
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleError::InvalidTransition => "invalid lifecycle transition",
            LifecycleError::NotFound => "control block not found",
            LifecycleError::NotRunnable => "thread is not runnable",
            LifecycleError::WouldDeadlock => "operation would deadlock",
        };
        write!(f, "{}", s)
    }
}

impl KernelError for LifecycleError {
    fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::InvalidTransition => ErrorKind::InvalidTransition,
            LifecycleError::NotFound => ErrorKind::NotFound,
            LifecycleError::NotRunnable => ErrorKind::WouldBlock,
            LifecycleError::WouldDeadlock => ErrorKind::Fatal,
        }
    }
}

/// Errors raised by synchronization primitives (mutex, semaphore, event).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    NotFound,
    NotOwner,
    Recursive,
    WouldBlock,
    Cancelled,
    OverflowsMax,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncError::NotFound => "no such synchronization object",
            SyncError::NotOwner => "calling thread does not own this primitive",
            SyncError::Recursive => "thread already owns this mutex",
            SyncError::WouldBlock => "operation would block",
            SyncError::Cancelled => "wait was cancelled",
            SyncError::OverflowsMax => "signal would exceed the semaphore's maximum count",
        };
        write!(f, "{}", s)
    }
}

impl KernelError for SyncError {
    fn kind(&self) -> ErrorKind {
        match self {
            SyncError::NotFound => ErrorKind::NotFound,
            SyncError::NotOwner => ErrorKind::NotOwner,
            SyncError::Recursive => ErrorKind::InvalidTransition,
            SyncError::WouldBlock => ErrorKind::WouldBlock,
            SyncError::Cancelled => ErrorKind::Cancelled,
            SyncError::OverflowsMax => ErrorKind::OverflowsMax,
        }
    }
}

/// Errors raised by pipe I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeError {
    NotFound,
    WouldBlock,
    Cancelled,
}

impl fmt::Display for PipeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipeError::NotFound => "no such pipe",
            PipeError::WouldBlock => "operation would block",
            PipeError::Cancelled => "pipe was destroyed while a thread waited on it",
        };
        write!(f, "{}", s)
    }
}

impl KernelError for PipeError {
    fn kind(&self) -> ErrorKind {
        match self {
            PipeError::NotFound => ErrorKind::NotFound,
            PipeError::WouldBlock => ErrorKind::WouldBlock,
            PipeError::Cancelled => ErrorKind::Cancelled,
        }
    }
}
