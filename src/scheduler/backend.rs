//! Worker backends for task execution.
//!
//! The queue dispatches work through the [`WorkerBackend`] trait and never
//! branches on the backend type. Three implementations are provided:
//!
//! - `ThreadPoolBackend`: runs async payloads on the multi-threaded runtime
//!   and blocking payloads on dedicated blocking threads. Best for blocking
//!   I/O-bound tasks sharing memory.
//! - `ProcessPoolBackend`: runs command payloads as child processes. Best
//!   for CPU-bound or fault-sensitive work at higher dispatch overhead.
//! - `CooperativeBackend`: drives async payloads inline on the dispatch
//!   task, so all in-flight work shares a single thread and suspends only
//!   at await points. Best for very large numbers of lightweight async
//!   operations.

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::task::AbortOnDropHandle;
use tracing::debug;

use crate::error::TaskError;

use super::item::{CommandSpec, TaskContext, TaskPayload};

/// Executes one attempt of a task payload.
///
/// Implementations control *where* the payload runs; scheduling order,
/// retries, and status tracking stay in the queue.
#[async_trait]
pub trait WorkerBackend: Send + Sync {
    /// Short name used in log fields.
    fn name(&self) -> &'static str;

    /// Runs a single attempt to completion and returns its outcome.
    async fn run_task(
        &self,
        payload: TaskPayload,
        ctx: TaskContext,
    ) -> Result<serde_json::Value, TaskError>;
}

/// Runs a [`CommandSpec`] as a child process.
///
/// A non-zero exit is reported as a transient failure carrying stderr, so
/// the retry policy decides whether to re-run it. Cancellation drops the
/// child (killed via `kill_on_drop`).
async fn run_command(spec: &CommandSpec, ctx: &TaskContext) -> Result<serde_json::Value, TaskError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args).envs(&spec.env).kill_on_drop(true);
    if let Some(dir) = &spec.current_dir {
        cmd.current_dir(dir);
    }

    let child = cmd
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| TaskError::permanent(format!("failed to spawn '{}': {e}", spec.program)))?;

    let output = tokio::select! {
        out = child.wait_with_output() => {
            out.map_err(|e| TaskError::transient(format!("wait for '{}' failed: {e}", spec.program)))?
        }
        _ = ctx.cancelled() => {
            return Err(TaskError::transient(format!(
                "command '{}' dropped after cancellation",
                spec.program
            )));
        }
    };

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(serde_json::Value::String(stdout))
    } else {
        let code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(TaskError::transient(format!(
            "'{}' exited with code {code}: {stderr}",
            spec.program
        )))
    }
}

/// Shared-memory worker backend on the tokio runtime.
///
/// Async payloads are spawned as runtime tasks; blocking payloads go to the
/// blocking thread pool; command payloads are supported since waiting on a
/// child is just blocking I/O.
///
/// Spawned attempts are tied to the dispatch future: if the queue drops it
/// (attempt timeout, cancellation) the runtime task is aborted, so a retry
/// never runs concurrently with a still-live earlier attempt. A blocking
/// closure that has already started cannot be interrupted and runs to
/// completion on the blocking pool with its result discarded.
#[derive(Debug, Default)]
pub struct ThreadPoolBackend;

impl ThreadPoolBackend {
    /// Creates a thread pool backend.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkerBackend for ThreadPoolBackend {
    fn name(&self) -> &'static str {
        "thread"
    }

    async fn run_task(
        &self,
        payload: TaskPayload,
        ctx: TaskContext,
    ) -> Result<serde_json::Value, TaskError> {
        match payload {
            TaskPayload::Future(f) => {
                let fut = f(ctx);
                AbortOnDropHandle::new(tokio::spawn(fut))
                    .await
                    .map_err(|e| TaskError::permanent(format!("task panicked: {e}")))?
            }
            TaskPayload::Blocking(f) => {
                AbortOnDropHandle::new(tokio::task::spawn_blocking(move || f(ctx)))
                    .await
                    .map_err(|e| TaskError::permanent(format!("task panicked: {e}")))?
            }
            TaskPayload::Command(spec) => run_command(&spec, &ctx).await,
        }
    }
}

/// Process-isolated worker backend.
///
/// Only command payloads can cross a process boundary; in-memory closures
/// are rejected with a permanent error rather than silently executed
/// in-process.
#[derive(Debug, Default)]
pub struct ProcessPoolBackend;

impl ProcessPoolBackend {
    /// Creates a process pool backend.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkerBackend for ProcessPoolBackend {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn run_task(
        &self,
        payload: TaskPayload,
        ctx: TaskContext,
    ) -> Result<serde_json::Value, TaskError> {
        match payload {
            TaskPayload::Command(spec) => {
                debug!(item_id = %ctx.item_id, program = %spec.program, "Spawning worker process");
                run_command(&spec, &ctx).await
            }
            other => Err(TaskError::permanent(format!(
                "process backend requires command payloads, got {other:?}"
            ))),
        }
    }
}

/// Single-threaded cooperative backend.
///
/// Futures are awaited inline, so every in-flight task is driven by the
/// queue's dispatch task and suspends only at its own await points.
/// Blocking payloads would stall all other in-flight work and are rejected.
#[derive(Debug, Default)]
pub struct CooperativeBackend;

impl CooperativeBackend {
    /// Creates a cooperative backend.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkerBackend for CooperativeBackend {
    fn name(&self) -> &'static str {
        "cooperative"
    }

    async fn run_task(
        &self,
        payload: TaskPayload,
        ctx: TaskContext,
    ) -> Result<serde_json::Value, TaskError> {
        match payload {
            TaskPayload::Future(f) => f(ctx).await,
            TaskPayload::Command(spec) => run_command(&spec, &ctx).await,
            TaskPayload::Blocking(_) => Err(TaskError::permanent(
                "blocking payloads are not supported by the cooperative backend",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx(id: &str) -> TaskContext {
        TaskContext::new(id, 1, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_thread_backend_runs_future_payload() {
        let backend = ThreadPoolBackend::new();
        let payload = TaskPayload::Future(std::sync::Arc::new(|_ctx| {
            Box::pin(async { Ok(serde_json::json!({"rows": 10})) })
        }));

        let value = backend.run_task(payload, ctx("a")).await.unwrap();
        assert_eq!(value["rows"], 10);
    }

    #[tokio::test]
    async fn test_thread_backend_runs_blocking_payload() {
        let backend = ThreadPoolBackend::new();
        let payload = TaskPayload::Blocking(std::sync::Arc::new(|ctx| {
            Ok(serde_json::Value::String(ctx.item_id))
        }));

        let value = backend.run_task(payload, ctx("b")).await.unwrap();
        assert_eq!(value, serde_json::Value::String("b".to_string()));
    }

    #[tokio::test]
    async fn test_process_backend_runs_command() {
        let backend = ProcessPoolBackend::new();
        let payload = TaskPayload::Command(CommandSpec::new("echo").arg("migrated"));

        let value = backend.run_task(payload, ctx("c")).await.unwrap();
        assert_eq!(value, serde_json::Value::String("migrated".to_string()));
    }

    #[tokio::test]
    async fn test_process_backend_nonzero_exit_is_transient() {
        let backend = ProcessPoolBackend::new();
        let payload = TaskPayload::Command(CommandSpec::new("false"));

        let err = backend.run_task(payload, ctx("d")).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_process_backend_rejects_closure_payloads() {
        let backend = ProcessPoolBackend::new();
        let payload = TaskPayload::Future(std::sync::Arc::new(|_ctx| {
            Box::pin(async { Ok(serde_json::Value::Null) })
        }));

        let err = backend.run_task(payload, ctx("e")).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_cooperative_backend_runs_inline() {
        let backend = CooperativeBackend::new();
        let payload = TaskPayload::Future(std::sync::Arc::new(|ctx| {
            Box::pin(async move { Ok(serde_json::json!({"attempt": ctx.attempt})) })
        }));

        let value = backend.run_task(payload, ctx("f")).await.unwrap();
        assert_eq!(value["attempt"], 1);
    }

    #[tokio::test]
    async fn test_cooperative_backend_rejects_blocking() {
        let backend = CooperativeBackend::new();
        let payload =
            TaskPayload::Blocking(std::sync::Arc::new(|_ctx| Ok(serde_json::Value::Null)));

        let err = backend.run_task(payload, ctx("g")).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_thread_backend_aborts_spawned_task_on_drop() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        use std::time::Duration;

        let backend = ThreadPoolBackend::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let payload = TaskPayload::Future(Arc::new(move |_ctx| {
            let flag = Arc::clone(&flag);
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(serde_json::Value::Null)
            })
        }));

        // Timing out drops the run_task future mid-attempt.
        let _ = tokio::time::timeout(
            Duration::from_millis(10),
            backend.run_task(payload, ctx("i")),
        )
        .await;

        // The spawned attempt must not keep running detached.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_missing_program_is_permanent() {
        let backend = ProcessPoolBackend::new();
        let payload = TaskPayload::Command(CommandSpec::new("definitely-not-a-real-binary-xyz"));

        let err = backend.run_task(payload, ctx("h")).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
