//! dataporter: Resumable concurrent work scheduling for data migration.
//!
//! This library provides a dependency-aware work queue with pluggable
//! worker backends, durable checkpoints for crash recovery, retry with
//! exponential backoff, circuit breakers for flaky shared resources, and
//! batching strategies for grouping raw migration items into work units.

// Core modules
pub mod batch;
pub mod breaker;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod retry;
pub mod scheduler;

// Re-export commonly used error types
pub use config::ConfigError;
pub use error::{BreakerError, CheckpointError, ErrorKind, SchedulerError, TaskError};
