//! In-process work queue with priority and dependency scheduling.
//!
//! The queue owns all submitted work items and tracks their lifecycle:
//!
//! - Eager rejection of duplicate ids and dependency cycles at submission
//! - Ready items ordered by (priority desc, submission order asc)
//! - Dependents promoted when their last dependency completes
//! - Transient failures retried with backoff via [`RetryPolicy`]
//! - Terminal failures propagated to transitive dependents
//! - Bounded retention of terminal item detail
//!
//! # Reliability
//!
//! All shared state lives behind a single coarse lock; task execution
//! happens outside it, so lock hold times are short. The lock is never held
//! across an await point.

use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, TaskError};
use crate::retry::{RetryDecision, RetryPolicy};

use super::backend::WorkerBackend;
use super::item::{ItemSnapshot, TaskContext, TaskPayload, WorkItem, WorkStatus};

/// Default cap on retained terminal-item detail records.
pub const DEFAULT_MAX_RETAINED_COMPLETED: usize = 10_000;

/// Hook invoked (outside the queue lock) each time an item completes.
pub type CompletionHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Counts of items by terminal status, returned by [`WorkQueue::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Items that finished successfully.
    pub completed: u64,
    /// Items that failed after exhausting retries or permanently.
    pub failed: u64,
    /// Items cancelled before or during execution.
    pub cancelled: u64,
    /// Items that never ran because a transitive dependency failed.
    pub blocked_failed: u64,
    /// Non-terminal items left behind when the queue was closed.
    pub still_blocked: u64,
}

impl RunReport {
    /// Total number of items that reached a terminal status.
    pub fn total_terminal(&self) -> u64 {
        self.completed + self.failed + self.cancelled + self.blocked_failed
    }
}

/// Entry in the ready heap. Higher priority wins; ties go to the earlier
/// submission.
#[derive(Debug, PartialEq, Eq)]
struct ReadyEntry {
    priority: i32,
    seq: u64,
    id: String,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-item bookkeeping held while detail is retained.
struct ItemRecord {
    item: WorkItem,
    status: WorkStatus,
    attempt: u32,
    last_error: Option<String>,
    submitted_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    seq: u64,
    cancel: CancellationToken,
    cancel_requested: bool,
    /// Dependencies not yet satisfied.
    remaining_deps: HashSet<String>,
}

impl ItemRecord {
    fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            id: self.item.id.clone(),
            priority: self.item.priority,
            status: self.status,
            attempt: self.attempt,
            max_attempts: self.item.max_attempts,
            dependencies: self.item.dependencies.iter().cloned().collect(),
            last_error: self.last_error.clone(),
            submitted_at: self.submitted_at,
            completed_at: self.completed_at,
        }
    }
}

/// Mutable queue state behind the coarse lock.
struct QueueState {
    records: HashMap<String, ItemRecord>,
    /// dep id -> ids of items waiting on it.
    dependents: HashMap<String, Vec<String>>,
    ready: BinaryHeap<ReadyEntry>,
    /// Every id that ever completed. Survives detail eviction; feeds
    /// checkpointing and dependency satisfaction.
    completed_ids: HashSet<String>,
    /// Non-completed terminal ids whose detail was evicted.
    evicted_failed: HashSet<String>,
    /// Terminal ids in completion order, for eviction.
    terminal_log: VecDeque<String>,
    counts: HashMap<WorkStatus, u64>,
    next_seq: u64,
    closed: bool,
}

impl QueueState {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            dependents: HashMap::new(),
            ready: BinaryHeap::new(),
            completed_ids: HashSet::new(),
            evicted_failed: HashSet::new(),
            terminal_log: VecDeque::new(),
            counts: HashMap::new(),
            next_seq: 0,
            closed: false,
        }
    }

    fn is_known(&self, id: &str) -> bool {
        self.records.contains_key(id)
            || self.completed_ids.contains(id)
            || self.evicted_failed.contains(id)
    }

    fn count_of(&self, status: WorkStatus) -> u64 {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    fn bump(&mut self, status: WorkStatus, delta: i64) {
        let entry = self.counts.entry(status).or_insert(0);
        if delta < 0 {
            *entry = entry.saturating_sub(delta.unsigned_abs());
        } else {
            *entry += delta as u64;
        }
    }

    fn transition(&mut self, id: &str, to: WorkStatus) {
        if let Some(rec) = self.records.get_mut(id) {
            let from = rec.status;
            rec.status = to;
            self.bump(from, -1);
            self.bump(to, 1);
            if to.is_terminal() {
                if let Some(rec) = self.records.get_mut(id) {
                    rec.completed_at = Some(Utc::now());
                }
                self.terminal_log.push_back(id.to_string());
            }
        }
    }

    /// Returns whether `target` is reachable from `from` by following
    /// declared dependency edges.
    fn reaches(&self, from: &str, target: &str) -> bool {
        let mut stack = vec![from.to_string()];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(rec) = self.records.get(&id) {
                stack.extend(rec.item.dependencies.iter().cloned());
            }
        }
        false
    }

    fn has_nonterminal(&self) -> bool {
        self.count_of(WorkStatus::Pending) > 0
            || self.count_of(WorkStatus::Blocked) > 0
            || self.count_of(WorkStatus::Ready) > 0
            || self.count_of(WorkStatus::Running) > 0
    }
}

/// Work dispatched to a backend, extracted under the lock.
struct Dispatch {
    id: String,
    payload: TaskPayload,
    attempt: u32,
    cancel: CancellationToken,
}

/// Priority and dependency aware work queue.
///
/// Shareable via `Arc`; `submit` and `cancel` may be called concurrently
/// with a running [`WorkQueue::run`] loop.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    /// Wakes the dispatch loop on submissions, cancellations, and close.
    notify: Notify,
    /// Serializes `run` invocations.
    run_guard: tokio::sync::Mutex<()>,
    retry_policy: RetryPolicy,
    max_retained_completed: usize,
    /// When true, a failed dependency is treated as satisfied instead of
    /// poisoning its dependents.
    skip_failed_dependencies: bool,
    /// Per-attempt execution timeout, if configured.
    task_timeout: Option<Duration>,
    completion_hook: Mutex<Option<CompletionHook>>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    /// Creates a queue with default retry policy and retention.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::new()),
            notify: Notify::new(),
            run_guard: tokio::sync::Mutex::new(()),
            retry_policy: RetryPolicy::default(),
            max_retained_completed: DEFAULT_MAX_RETAINED_COMPLETED,
            skip_failed_dependencies: false,
            task_timeout: None,
            completion_hook: Mutex::new(None),
        }
    }

    /// Sets the retry policy applied to transient failures.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Caps how many terminal-item detail records are retained. Aggregate
    /// counts and completed-id membership are unaffected by eviction.
    pub fn with_max_retained_completed(mut self, max: usize) -> Self {
        self.max_retained_completed = max.max(1);
        self
    }

    /// Treats failed dependencies as satisfied instead of propagating the
    /// failure to dependents.
    pub fn with_skip_failed_dependencies(mut self, skip: bool) -> Self {
        self.skip_failed_dependencies = skip;
        self
    }

    /// Applies a per-attempt execution timeout; a timed-out attempt is a
    /// transient failure.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Registers a hook called with the item id on each successful
    /// completion. Used by the checkpoint manager's automatic trigger.
    pub fn set_completion_hook(&self, hook: CompletionHook) {
        *self.completion_hook.lock().unwrap() = Some(hook);
    }

    /// Submits a work item.
    ///
    /// Rejects duplicates and dependency cycles eagerly; on success the item
    /// enters `Ready` (no unsatisfied dependencies) or `Blocked`.
    pub fn submit(&self, item: WorkItem) -> Result<String, SchedulerError> {
        let id = item.id.clone();
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(SchedulerError::Closed);
            }
            if state.is_known(&id) {
                return Err(SchedulerError::DuplicateId(id));
            }

            // A cycle through the new item exists iff one of its declared
            // dependencies can already reach it.
            for dep in &item.dependencies {
                if dep == &id || state.reaches(dep, &id) {
                    return Err(SchedulerError::DependencyCycle(id));
                }
            }

            let seq = state.next_seq;
            state.next_seq += 1;

            let mut remaining = HashSet::new();
            let mut poisoned_by = None;
            for dep in &item.dependencies {
                if state.completed_ids.contains(dep) {
                    continue;
                }
                let dep_failed = state.evicted_failed.contains(dep)
                    || state
                        .records
                        .get(dep)
                        .is_some_and(|r| r.status.is_terminal() && r.status != WorkStatus::Completed);
                if dep_failed {
                    if self.skip_failed_dependencies {
                        continue;
                    }
                    poisoned_by = Some(dep.clone());
                    break;
                }
                remaining.insert(dep.clone());
            }

            let record = ItemRecord {
                status: WorkStatus::Pending,
                attempt: 0,
                last_error: None,
                submitted_at: Utc::now(),
                completed_at: None,
                seq,
                cancel: CancellationToken::new(),
                cancel_requested: false,
                remaining_deps: remaining.clone(),
                item,
            };
            let priority = record.item.priority;
            state.records.insert(id.clone(), record);
            state.bump(WorkStatus::Pending, 1);

            if let Some(dep) = poisoned_by {
                state.transition(&id, WorkStatus::BlockedFailed);
                if let Some(rec) = state.records.get_mut(&id) {
                    rec.last_error = Some(format!("dependency '{dep}' already failed"));
                }
            } else if remaining.is_empty() {
                state.transition(&id, WorkStatus::Ready);
                state.ready.push(ReadyEntry {
                    priority,
                    seq,
                    id: id.clone(),
                });
            } else {
                for dep in &remaining {
                    state
                        .dependents
                        .entry(dep.clone())
                        .or_default()
                        .push(id.clone());
                }
                state.transition(&id, WorkStatus::Blocked);
            }
            self.evict_terminal(&mut state);
        }
        debug!(item_id = %id, "Work item submitted");
        self.notify.notify_waiters();
        Ok(id)
    }

    /// Submits several items, stopping at the first rejection.
    pub fn submit_all(&self, items: Vec<WorkItem>) -> Result<Vec<String>, SchedulerError> {
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            ids.push(self.submit(item)?);
        }
        Ok(ids)
    }

    /// Cancels an item.
    ///
    /// Items not yet running transition directly to `Cancelled` and the
    /// failure is propagated to their dependents. Running items get their
    /// cooperative cancellation token set; the eventual outcome decides the
    /// recorded status.
    pub fn cancel(&self, id: &str) -> Result<(), SchedulerError> {
        {
            let mut state = self.state.lock().unwrap();
            let status = match state.records.get(id) {
                Some(rec) => rec.status,
                None if state.completed_ids.contains(id) || state.evicted_failed.contains(id) => {
                    return Err(SchedulerError::AlreadyTerminal {
                        id: id.to_string(),
                        status: "terminal".to_string(),
                        action: "cancelled".to_string(),
                    });
                }
                None => return Err(SchedulerError::UnknownItem(id.to_string())),
            };

            match status {
                s if s.is_terminal() => {
                    return Err(SchedulerError::AlreadyTerminal {
                        id: id.to_string(),
                        status: s.to_string(),
                        action: "cancelled".to_string(),
                    });
                }
                WorkStatus::Running => {
                    if let Some(rec) = state.records.get_mut(id) {
                        rec.cancel_requested = true;
                        rec.cancel.cancel();
                    }
                    info!(item_id = %id, "Cancellation requested for running item");
                }
                _ => {
                    if let Some(rec) = state.records.get_mut(id) {
                        rec.last_error = Some("cancelled before execution".to_string());
                    }
                    state.transition(id, WorkStatus::Cancelled);
                    self.propagate_unmet_dependency(&mut state, id, "cancelled");
                    self.evict_terminal(&mut state);
                    info!(item_id = %id, "Work item cancelled");
                }
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Returns a snapshot of an item.
    ///
    /// Items whose terminal detail was evicted report `UnknownItem`; their
    /// final status is still reflected in [`WorkQueue::counts`].
    pub fn status(&self, id: &str) -> Result<ItemSnapshot, SchedulerError> {
        let state = self.state.lock().unwrap();
        state
            .records
            .get(id)
            .map(ItemRecord::snapshot)
            .ok_or_else(|| SchedulerError::UnknownItem(id.to_string()))
    }

    /// Returns aggregate item counts by status.
    pub fn counts(&self) -> HashMap<WorkStatus, u64> {
        let state = self.state.lock().unwrap();
        state.counts.clone()
    }

    /// Returns every id that has ever completed, for checkpointing.
    pub fn completed_ids(&self) -> HashSet<String> {
        let state = self.state.lock().unwrap();
        state.completed_ids.clone()
    }

    /// Closes the queue: no further submissions are accepted and `run`
    /// returns once in-flight work drains.
    pub fn close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.closed = true;
        }
        self.notify.notify_waiters();
    }

    /// Returns whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Runs the dispatch loop until every submitted item is terminal or the
    /// queue is closed, then returns terminal counts.
    ///
    /// May be called with items already submitted or incrementally while
    /// other tasks keep submitting. Only one `run` executes at a time; a
    /// concurrent call waits for the first to finish.
    pub async fn run(&self, backend: Arc<dyn WorkerBackend>, concurrency: usize) -> RunReport {
        let _guard = self.run_guard.lock().await;
        let concurrency = concurrency.max(1);
        info!(backend = backend.name(), concurrency, "Work queue running");

        let mut in_flight: FuturesUnordered<
            BoxFuture<'static, (String, Result<serde_json::Value, TaskError>)>,
        > = FuturesUnordered::new();
        let mut retry_timers: FuturesUnordered<BoxFuture<'static, String>> =
            FuturesUnordered::new();

        loop {
            // Register for wakeups before checking state, so a submission
            // arriving between the check and the select is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // Fill capacity from the ready heap.
            while in_flight.len() < concurrency {
                match self.pop_ready() {
                    Some(dispatch) => {
                        let backend = Arc::clone(&backend);
                        let timeout = self.task_timeout;
                        let id = dispatch.id.clone();
                        let ctx =
                            TaskContext::new(dispatch.id.clone(), dispatch.attempt, dispatch.cancel);
                        in_flight.push(Box::pin(async move {
                            let result = match timeout {
                                Some(limit) => {
                                    match tokio::time::timeout(
                                        limit,
                                        backend.run_task(dispatch.payload, ctx),
                                    )
                                    .await
                                    {
                                        Ok(result) => result,
                                        Err(_) => Err(TaskError::transient(format!(
                                            "attempt timed out after {limit:?}"
                                        ))),
                                    }
                                }
                                None => backend.run_task(dispatch.payload, ctx).await,
                            };
                            (id, result)
                        }));
                    }
                    None => break,
                }
            }

            let (closed, nonterminal) = {
                let state = self.state.lock().unwrap();
                (state.closed, state.has_nonterminal())
            };
            if in_flight.is_empty() && retry_timers.is_empty() && (closed || !nonterminal) {
                break;
            }

            tokio::select! {
                Some((id, result)) = in_flight.next(), if !in_flight.is_empty() => {
                    if let Some((retry_id, after)) = self.handle_outcome(&id, result) {
                        retry_timers.push(Box::pin(async move {
                            tokio::time::sleep(after).await;
                            retry_id
                        }));
                    }
                }
                Some(id) = retry_timers.next(), if !retry_timers.is_empty() => {
                    self.requeue_after_backoff(&id);
                }
                _ = &mut notified => {}
            }
        }

        let report = self.report();
        info!(
            completed = report.completed,
            failed = report.failed,
            cancelled = report.cancelled,
            blocked_failed = report.blocked_failed,
            still_blocked = report.still_blocked,
            "Work queue drained"
        );
        report
    }

    fn report(&self) -> RunReport {
        let state = self.state.lock().unwrap();
        RunReport {
            completed: state.count_of(WorkStatus::Completed),
            failed: state.count_of(WorkStatus::Failed),
            cancelled: state.count_of(WorkStatus::Cancelled),
            blocked_failed: state.count_of(WorkStatus::BlockedFailed),
            still_blocked: state.count_of(WorkStatus::Blocked)
                + state.count_of(WorkStatus::Pending)
                + state.count_of(WorkStatus::Ready),
        }
    }

    /// Pops the highest-priority ready item and marks it running.
    fn pop_ready(&self) -> Option<Dispatch> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return None;
        }
        loop {
            let entry = state.ready.pop()?;
            // Entries are invalidated lazily: skip anything no longer Ready.
            let valid = state
                .records
                .get(&entry.id)
                .is_some_and(|r| r.status == WorkStatus::Ready);
            if !valid {
                continue;
            }
            state.transition(&entry.id, WorkStatus::Running);
            if let Some(rec) = state.records.get_mut(&entry.id) {
                rec.attempt += 1;
                let dispatch = Dispatch {
                    id: entry.id.clone(),
                    payload: rec.item.payload.clone(),
                    attempt: rec.attempt,
                    cancel: rec.cancel.clone(),
                };
                debug!(item_id = %dispatch.id, attempt = dispatch.attempt, "Dispatching work item");
                return Some(dispatch);
            }
        }
    }

    /// Applies a finished attempt. Returns `Some((id, delay))` when the item
    /// should re-enter the ready set after a backoff delay.
    fn handle_outcome(
        &self,
        id: &str,
        result: Result<serde_json::Value, TaskError>,
    ) -> Option<(String, Duration)> {
        let mut completed = false;
        let mut retry = None;
        {
            let mut state = self.state.lock().unwrap();
            let rec = state.records.get_mut(id)?;
            let attempt = rec.attempt;
            let max_attempts = rec.item.max_attempts;
            let cancel_requested = rec.cancel_requested;

            match result {
                Ok(_) => {
                    state.transition(id, WorkStatus::Completed);
                    state.completed_ids.insert(id.to_string());
                    self.satisfy_dependents(&mut state, id);
                    completed = true;
                    info!(item_id = %id, attempt, "Work item completed");
                }
                Err(err) if cancel_requested => {
                    if let Some(rec) = state.records.get_mut(id) {
                        rec.last_error = Some(format!("cancelled: {}", err.message));
                    }
                    state.transition(id, WorkStatus::Cancelled);
                    self.propagate_unmet_dependency(&mut state, id, "cancelled");
                    info!(item_id = %id, "Work item cancelled during execution");
                }
                Err(err) => {
                    if let Some(rec) = state.records.get_mut(id) {
                        rec.last_error = Some(err.to_string());
                    }
                    let decision = if attempt < max_attempts {
                        self.retry_policy.decide(attempt, &err)
                    } else {
                        RetryDecision::GiveUp
                    };
                    match decision {
                        RetryDecision::Retry { after } => {
                            // Parked until the backoff timer re-promotes it.
                            state.transition(id, WorkStatus::Pending);
                            retry = Some((id.to_string(), after));
                            warn!(
                                item_id = %id,
                                attempt,
                                max_attempts,
                                backoff_ms = after.as_millis() as u64,
                                error = %err,
                                "Work item failed, retry scheduled"
                            );
                        }
                        RetryDecision::GiveUp => {
                            state.transition(id, WorkStatus::Failed);
                            self.propagate_unmet_dependency(&mut state, id, "failed");
                            warn!(item_id = %id, attempt, error = %err, "Work item failed");
                        }
                    }
                }
            }
            self.evict_terminal(&mut state);
        }

        if completed {
            let hook = self.completion_hook.lock().unwrap().clone();
            if let Some(hook) = hook {
                hook(id);
            }
        }
        self.notify.notify_waiters();
        retry
    }

    /// Moves an item parked for backoff back into the ready set.
    fn requeue_after_backoff(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        let entry = match state.records.get(id) {
            // Cancellation during backoff wins; only a parked item returns.
            Some(rec) if rec.status == WorkStatus::Pending => ReadyEntry {
                priority: rec.item.priority,
                seq: rec.seq,
                id: id.to_string(),
            },
            _ => return,
        };
        state.transition(id, WorkStatus::Ready);
        state.ready.push(entry);
        debug!(item_id = %id, "Work item re-entered ready set after backoff");
    }

    /// Promotes dependents of a completed item whose dependencies are now
    /// all satisfied.
    fn satisfy_dependents(&self, state: &mut QueueState, dep_id: &str) {
        let waiting = state.dependents.remove(dep_id).unwrap_or_default();
        for waiter in waiting {
            let entry = match state.records.get_mut(&waiter) {
                Some(rec) if rec.status == WorkStatus::Blocked => {
                    rec.remaining_deps.remove(dep_id);
                    if rec.remaining_deps.is_empty() {
                        Some(ReadyEntry {
                            priority: rec.item.priority,
                            seq: rec.seq,
                            id: waiter.clone(),
                        })
                    } else {
                        None
                    }
                }
                _ => None,
            };
            if let Some(entry) = entry {
                state.transition(&waiter, WorkStatus::Ready);
                state.ready.push(entry);
                debug!(item_id = %waiter, "Work item promoted to ready");
            }
        }
    }

    /// Handles a dependency that will never complete (`failed` or
    /// `cancelled`): either poisons all transitive dependents or, in skip
    /// mode, treats it as satisfied.
    fn propagate_unmet_dependency(&self, state: &mut QueueState, dep_id: &str, reason: &str) {
        if self.skip_failed_dependencies {
            self.satisfy_dependents(state, dep_id);
            return;
        }

        let mut frontier = vec![(dep_id.to_string(), reason.to_string())];
        while let Some((dep, why)) = frontier.pop() {
            let waiting = state.dependents.remove(&dep).unwrap_or_default();
            for waiter in waiting {
                let poisoned = match state.records.get_mut(&waiter) {
                    Some(rec) if !rec.status.is_terminal() && rec.status != WorkStatus::Running => {
                        rec.last_error = Some(format!("dependency '{dep}' {why}"));
                        true
                    }
                    _ => false,
                };
                if poisoned {
                    state.transition(&waiter, WorkStatus::BlockedFailed);
                    frontier.push((waiter, "failed".to_string()));
                }
            }
        }
    }

    /// Evicts the oldest terminal detail records beyond the retention cap.
    fn evict_terminal(&self, state: &mut QueueState) {
        while state.terminal_log.len() > self.max_retained_completed {
            let Some(oldest) = state.terminal_log.pop_front() else {
                break;
            };
            if let Some(rec) = state.records.remove(&oldest) {
                if rec.status != WorkStatus::Completed {
                    state.evicted_failed.insert(oldest);
                }
                // Completed ids stay in completed_ids; counts are untouched.
            }
        }
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("WorkQueue")
            .field("items", &state.records.len())
            .field("ready", &state.ready.len())
            .field("closed", &state.closed)
            .finish()
    }
}
