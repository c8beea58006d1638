//! Work item definitions for the scheduler.
//!
//! This module defines the core types for schedulable work:
//!
//! - `WorkItem`: a unit of work with priority and dependencies
//! - `TaskPayload`: the executable part of an item (future, blocking closure,
//!   or child-process command)
//! - `WorkStatus`: lifecycle state of an item
//! - `ItemSnapshot`: point-in-time view of an item returned by status queries

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::TaskError;

/// Default maximum number of execution attempts for an item.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default priority (0 is normal; higher values are dispatched sooner).
pub const DEFAULT_PRIORITY: i32 = 0;

/// Boxed future returned by async task functions.
pub type TaskFuture = futures::future::BoxFuture<'static, Result<serde_json::Value, TaskError>>;

/// Async task function: invoked once per attempt with a fresh context.
pub type AsyncTaskFn = Arc<dyn Fn(TaskContext) -> TaskFuture + Send + Sync>;

/// Blocking task function, run on a dedicated blocking thread by backends
/// that support it.
pub type BlockingTaskFn =
    Arc<dyn Fn(TaskContext) -> Result<serde_json::Value, TaskError> + Send + Sync>;

/// Execution context handed to a task for each attempt.
///
/// Carries the cooperative cancellation token: a running task is never
/// interrupted forcibly, it is expected to check the token at its own safe
/// points and return early.
#[derive(Clone)]
pub struct TaskContext {
    /// Id of the work item being executed.
    pub item_id: String,
    /// 1-based attempt number for this execution.
    pub attempt: u32,
    /// Cooperative cancellation signal.
    cancel: CancellationToken,
}

impl TaskContext {
    /// Creates a context for one attempt of an item.
    pub fn new(item_id: impl Into<String>, attempt: u32, cancel: CancellationToken) -> Self {
        Self {
            item_id: item_id.into(),
            attempt,
            cancel,
        }
    }

    /// Returns whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when cancellation is requested. Intended for use in
    /// `tokio::select!` at a task's I/O await points.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Returns a clone of the underlying token, for tasks that hand
    /// cancellation down to sub-operations.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("item_id", &self.item_id)
            .field("attempt", &self.attempt)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Specification of a child process to run as a task.
///
/// Used with process-pool backends: exit code 0 is success, any other exit
/// is a transient failure carrying stderr, so the retry policy can decide.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Extra environment variables for the child.
    pub env: HashMap<String, String>,
    /// Working directory for the child, if any.
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Creates a command spec for the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            current_dir: None,
        }
    }

    /// Appends an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the working directory for the child.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

/// The executable part of a work item.
///
/// Backends differ in which payload forms they accept; see
/// [`crate::scheduler::WorkerBackend`] implementations.
#[derive(Clone)]
pub enum TaskPayload {
    /// An async task function.
    Future(AsyncTaskFn),
    /// A blocking task function.
    Blocking(BlockingTaskFn),
    /// A child process invocation.
    Command(CommandSpec),
}

impl std::fmt::Debug for TaskPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPayload::Future(_) => write!(f, "TaskPayload::Future"),
            TaskPayload::Blocking(_) => write!(f, "TaskPayload::Blocking"),
            TaskPayload::Command(spec) => write!(f, "TaskPayload::Command({})", spec.program),
        }
    }
}

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// Submitted, not yet classified against its dependencies.
    Pending,
    /// Waiting on one or more incomplete dependencies.
    Blocked,
    /// All dependencies satisfied, waiting for a worker.
    Ready,
    /// Currently executing on a backend.
    Running,
    /// Finished successfully. Terminal.
    Completed,
    /// Failed after exhausting retries, or failed permanently. Terminal.
    Failed,
    /// Cancelled before or during execution. Terminal.
    Cancelled,
    /// Never ran because a transitive dependency failed. Terminal.
    BlockedFailed,
}

impl WorkStatus {
    /// Returns whether this status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkStatus::Completed
                | WorkStatus::Failed
                | WorkStatus::Cancelled
                | WorkStatus::BlockedFailed
        )
    }

    /// Returns whether an item in this status can still be dispatched.
    pub fn is_schedulable(self) -> bool {
        matches!(
            self,
            WorkStatus::Pending | WorkStatus::Blocked | WorkStatus::Ready
        )
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkStatus::Pending => "pending",
            WorkStatus::Blocked => "blocked",
            WorkStatus::Ready => "ready",
            WorkStatus::Running => "running",
            WorkStatus::Completed => "completed",
            WorkStatus::Failed => "failed",
            WorkStatus::Cancelled => "cancelled",
            WorkStatus::BlockedFailed => "blocked_failed",
        };
        write!(f, "{s}")
    }
}

/// A unit of work submitted to the queue.
///
/// Created by the submitter; owned exclusively by the queue once submitted
/// until it reaches a terminal status.
#[derive(Clone)]
pub struct WorkItem {
    /// Unique identifier. Caller-assigned via [`WorkItem::with_id`], or a
    /// fresh UUID otherwise.
    pub id: String,
    /// Higher values are dispatched sooner; equal values are FIFO.
    pub priority: i32,
    /// Ids of items that must complete before this one becomes ready.
    pub dependencies: BTreeSet<String>,
    /// The executable payload.
    pub payload: TaskPayload,
    /// Maximum execution attempts before the item is marked failed.
    pub max_attempts: u32,
}

impl WorkItem {
    /// Creates a work item with a generated id and default settings.
    pub fn new(payload: TaskPayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            priority: DEFAULT_PRIORITY,
            dependencies: BTreeSet::new(),
            payload,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Creates a work item from an async task function.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, TaskError>> + Send + 'static,
    {
        Self::new(TaskPayload::Future(Arc::new(move |ctx| {
            Box::pin(f(ctx))
        })))
    }

    /// Creates a work item from a blocking closure.
    pub fn from_blocking<F>(f: F) -> Self
    where
        F: Fn(TaskContext) -> Result<serde_json::Value, TaskError> + Send + Sync + 'static,
    {
        Self::new(TaskPayload::Blocking(Arc::new(f)))
    }

    /// Creates a work item that runs a child process.
    pub fn from_command(spec: CommandSpec) -> Self {
        Self::new(TaskPayload::Command(spec))
    }

    /// Sets a caller-assigned id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Adds a single dependency.
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    /// Adds multiple dependencies.
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Sets the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("dependencies", &self.dependencies)
            .field("payload", &self.payload)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

/// Point-in-time view of a work item, returned by status queries.
#[derive(Debug, Clone, Serialize)]
pub struct ItemSnapshot {
    /// Item id.
    pub id: String,
    /// Item priority.
    pub priority: i32,
    /// Current status.
    pub status: WorkStatus,
    /// Attempts made so far.
    pub attempt: u32,
    /// Configured maximum attempts.
    pub max_attempts: u32,
    /// Declared dependencies.
    pub dependencies: Vec<String>,
    /// Last recorded error, if any.
    pub last_error: Option<String>,
    /// When the item was submitted.
    pub submitted_at: DateTime<Utc>,
    /// When the item reached a terminal status, if it has.
    pub completed_at: Option<DateTime<Utc>>,
}
