//! Error types for dataporter operations.
//!
//! Defines the error taxonomy shared across subsystems:
//! - Task execution errors with transient/permanent classification
//! - Scheduler submission and lifecycle errors
//! - Checkpoint persistence errors
//! - Circuit breaker rejections
//!
//! Each subsystem that needs a narrower error type (configuration, stores)
//! defines it next to the code it covers; this module holds the types that
//! cross subsystem boundaries.

use thiserror::Error;

/// Classification of a task failure, driving the retry decision.
///
/// Retry/give-up decisions are made on explicit outcome values rather than
/// by matching on error source types, so task functions must classify their
/// own failures when constructing a [`TaskError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Recoverable failures: network faults, timeouts, 5xx responses,
    /// rate limits. Eligible for retry with backoff.
    Transient,
    /// Non-recoverable failures: authentication, validation, 4xx responses
    /// other than 429. Never retried.
    Permanent,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// A classified task execution failure.
///
/// Produced by task functions and worker backends; consumed by the retry
/// policy and recorded as `last_error` on failed work items.
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct TaskError {
    /// Whether the failure is worth retrying.
    pub kind: ErrorKind,
    /// Human-readable description, retained for reporting.
    pub message: String,
}

impl TaskError {
    /// Creates a transient (retryable) error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Creates a permanent (never retried) error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Returns whether this error is eligible for retry.
    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

/// Errors surfaced by the work queue at submission or control points.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// An item with this id has already been submitted.
    #[error("Work item '{0}' already submitted")]
    DuplicateId(String),

    /// Admitting the item would create a dependency cycle.
    #[error("Dependency cycle detected involving '{0}'")]
    DependencyCycle(String),

    /// The referenced item is not known to the queue.
    #[error("Work item '{0}' not found")]
    UnknownItem(String),

    /// The item is already in a terminal status and cannot transition.
    #[error("Work item '{id}' is terminal ({status}) and cannot be {action}")]
    AlreadyTerminal {
        id: String,
        status: String,
        action: String,
    },

    /// The queue has been closed and no longer accepts submissions.
    #[error("Queue is closed")]
    Closed,
}

/// Errors from checkpoint persistence.
///
/// Automatic checkpoints degrade these to a logged warning; explicitly
/// requested checkpoints surface them to the caller.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Filesystem-level failure in the file store.
    #[error("Checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database failure in the SQLite store.
    #[error("Checkpoint database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Checkpoint payload could not be encoded or decoded.
    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A loaded checkpoint is malformed (bad version, missing fields).
    #[error("Corrupt checkpoint for run '{run_id}': {reason}")]
    Corrupt { run_id: String, reason: String },
}

/// Errors from circuit-breaker-guarded calls.
#[derive(Debug, Error)]
pub enum BreakerError {
    /// The breaker is open; the call was rejected without invoking the
    /// wrapped operation.
    #[error("Circuit open for resource '{resource}', retry after {retry_after_ms}ms")]
    Open {
        resource: String,
        retry_after_ms: u64,
    },

    /// The wrapped operation itself failed.
    #[error(transparent)]
    Inner(#[from] TaskError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_classification() {
        let err = TaskError::transient("connection reset");
        assert!(err.is_transient());
        assert_eq!(err.kind, ErrorKind::Transient);

        let err = TaskError::permanent("401 unauthorized");
        assert!(!err.is_transient());
        assert_eq!(err.kind, ErrorKind::Permanent);
    }

    #[test]
    fn test_task_error_display() {
        let err = TaskError::transient("timeout after 30s");
        assert_eq!(err.to_string(), "transient error: timeout after 30s");

        let err = TaskError::permanent("schema mismatch");
        assert!(err.to_string().starts_with("permanent error"));
    }

    #[test]
    fn test_scheduler_error_display() {
        let err = SchedulerError::DuplicateId("item-1".to_string());
        assert!(err.to_string().contains("item-1"));

        let err = SchedulerError::DependencyCycle("item-2".to_string());
        assert!(err.to_string().contains("cycle"));

        let err = SchedulerError::AlreadyTerminal {
            id: "item-3".to_string(),
            status: "completed".to_string(),
            action: "cancelled".to_string(),
        };
        assert!(err.to_string().contains("terminal"));
    }

    #[test]
    fn test_breaker_error_display() {
        let err = BreakerError::Open {
            resource: "dest-db".to_string(),
            retry_after_ms: 5000,
        };
        assert!(err.to_string().contains("dest-db"));
        assert!(err.to_string().contains("5000"));
    }
}
