//! Resumable concurrent work scheduling.
//!
//! This module provides the scheduling core of the migration engine:
//!
//! - **WorkItem**: a unit of work with priority and dependencies
//! - **WorkQueue**: dependency-aware priority queue with retry and
//!   failure propagation
//! - **WorkerBackend**: pluggable execution backends (threads, child
//!   processes, cooperative single-threaded)
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │   Producer   │
//!                      │ (extraction) │
//!                      └──────┬───────┘
//!                             │ submit
//!                      ┌──────▼───────┐
//!                      │  WorkQueue   │
//!                      │ ready heap + │
//!                      │  dep graph   │
//!                      └──────┬───────┘
//!                             │ dispatch
//!         ┌───────────────────┼───────────────────┐
//!         │                   │                   │
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌──────────────┐
//!    │ threads │         │processes│         │ cooperative  │
//!    └─────────┘         └─────────┘         └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use dataporter::scheduler::{CooperativeBackend, WorkItem, WorkQueue};
//! use std::sync::Arc;
//!
//! let queue = WorkQueue::new();
//! queue.submit(
//!     WorkItem::from_async(|_ctx| async { Ok(serde_json::json!({"rows": 100})) })
//!         .with_id("extract-accounts")
//!         .with_priority(5),
//! )?;
//! queue.submit(
//!     WorkItem::from_async(|_ctx| async { Ok(serde_json::Value::Null) })
//!         .with_id("load-accounts")
//!         .with_dependency("extract-accounts"),
//! )?;
//!
//! let report = queue.run(Arc::new(CooperativeBackend::new()), 4).await;
//! assert_eq!(report.completed, 2);
//! ```
//!
//! # Guarantees
//!
//! - An item never starts before all its dependencies have completed
//! - Among simultaneously ready items, higher priority dispatches first;
//!   equal priority is FIFO by submission order
//! - Duplicate ids and dependency cycles are rejected at submission
//! - Cancellation is cooperative; running tasks are never interrupted
//!   forcibly

pub mod backend;
pub mod item;
pub mod queue;

// Re-export main types for convenience
pub use backend::{CooperativeBackend, ProcessPoolBackend, ThreadPoolBackend, WorkerBackend};
pub use item::{
    CommandSpec, ItemSnapshot, TaskContext, TaskPayload, WorkItem, WorkStatus,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY,
};
pub use queue::{CompletionHook, RunReport, WorkQueue, DEFAULT_MAX_RETAINED_COMPLETED};
