//! Supervisor for concurrently running sub-agents.
//!
//! [`LifecycleManager`] is the single source of truth for every sub-agent it
//! started. It is an explicit, `Clone`-able handle (all state behind `Arc`),
//! so callers pass it around instead of reaching for a global registry.
//!
//! **Concurrency model:** a map-level `RwLock` guards insert and lookup of
//! entries; each entry carries its own `Mutex` around its result record and
//! cancel scope. Writers never hold the map lock while mutating an entry's
//! payload. Lock order is always map, then entry.
//!
//! **Status latch:** a record moves `Running -> <terminal>` exactly once. The
//! canceller and the background completion race for that transition; whoever
//! gets there second leaves the record untouched.
//!
//! **Hook order:** the hook always sees `(id, Running)` before `(id, <terminal>)`.
//! A terminal transition latched before `start` has announced Running is held
//! on the entry and fired by `start` right after the Running notification.
//!
//! **Cancellation model:** each run gets a child [`CancelScope`] of the
//! manager's root (or a caller-supplied parent) with a deadline of
//! `ResourceLimits::timeout`. Cancellation is observed by the executor at its
//! next loop boundary.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::executor::Executor;
use super::scope::CancelScope;
use super::types::{SubagentContext, SubagentId, SubagentResult, SubagentStatus};
use super::{lock, read, write};
use crate::error::SubagentError;

/// Fallback drain deadline for [`LifecycleManager::shutdown`].
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// How often `shutdown` and `wait` re-check status.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Callback fired with `(id, status)` on start and on every terminal transition.
///
/// Runs synchronously on the task that caused the transition, so it must be
/// cheap and must not block.
pub type MonitoringHook = Arc<dyn Fn(&str, SubagentStatus) + Send + Sync>;

/// Internal entry stored in the registry. Callers only ever see cloned
/// [`SubagentResult`] snapshots.
struct TrackedSubagent {
    started: Instant,
    state: Mutex<EntryState>,
}

struct EntryState {
    result: SubagentResult,
    scope: CancelScope,
    /// Set once the Running notification has fired.
    announced: bool,
    /// Terminal notification held back until Running is announced.
    held: Option<SubagentStatus>,
}

/// Outcome of an attempt to latch a terminal status.
#[derive(Debug, PartialEq, Eq)]
enum Latch {
    /// Already terminal; nothing changed.
    Refused,
    /// Latched; the caller fires the hook.
    Notify,
    /// Latched before Running was announced; `start` fires the hook.
    Held,
}

impl EntryState {
    fn latched(&mut self) -> Latch {
        if self.announced {
            Latch::Notify
        } else {
            self.held = Some(self.result.status);
            Latch::Held
        }
    }
}

impl TrackedSubagent {
    fn new(id: &SubagentId, scope: CancelScope) -> Self {
        Self {
            started: Instant::now(),
            state: Mutex::new(EntryState {
                result: SubagentResult::running(id.clone()),
                scope,
                announced: false,
                held: None,
            }),
        }
    }

    fn status(&self) -> SubagentStatus {
        lock(&self.state).result.status
    }

    /// Store the executor's final record unless a terminal status is already latched.
    fn complete(&self, result: SubagentResult) -> Latch {
        let mut state = lock(&self.state);
        if state.result.status.is_terminal() {
            return Latch::Refused;
        }
        state.result = result;
        state.latched()
    }

    /// Cancel the run's scope and latch Cancelled if it is still running.
    fn cancel(&self) -> Latch {
        let mut state = lock(&self.state);
        state.scope.cancel();
        if state.result.status != SubagentStatus::Running {
            return Latch::Refused;
        }
        state.result.status = SubagentStatus::Cancelled;
        state.result.error_message = "cancelled by supervisor".to_string();
        state.result.execution_time = self.started.elapsed();
        state.result.completed_at = Some(Utc::now());
        state.latched()
    }

    /// Mark Running as announced, returning any terminal status held meanwhile.
    fn announce(&self) -> Option<SubagentStatus> {
        let mut state = lock(&self.state);
        state.announced = true;
        state.held.take()
    }
}

/// Supervises concurrently running sub-agents.
///
/// # Example
///
/// ```ignore
/// let manager = LifecycleManager::new(Arc::new(executor));
/// manager.set_monitoring_hook(|id, status| tracing::info!(%id, %status, "transition"));
/// manager.start(context)?;
/// let snapshot = manager.get_status(&id)?;
/// manager.shutdown(None).await?;
/// ```
#[derive(Clone)]
pub struct LifecycleManager {
    entries: Arc<RwLock<HashMap<SubagentId, Arc<TrackedSubagent>>>>,
    executor: Arc<dyn Executor>,
    root: CancelScope,
    hook: Arc<RwLock<Option<MonitoringHook>>>,
    max_running: usize,
    shutdown_timeout: Duration,
}

impl LifecycleManager {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            executor,
            root: CancelScope::default(),
            hook: Arc::new(RwLock::new(None)),
            max_running: 0,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Parent every run started via [`LifecycleManager::start`] under `token`.
    pub fn with_root_token(mut self, token: CancellationToken) -> Self {
        self.root = CancelScope::new(token);
        self
    }

    /// Admission limit on concurrently running sub-agents. `0` = unbounded.
    pub fn with_max_running(mut self, max_running: usize) -> Self {
        self.max_running = max_running;
        self
    }

    /// Drain deadline used when [`LifecycleManager::shutdown`] gets `None`.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Install the monitoring hook, replacing any previous one.
    pub fn set_monitoring_hook<F>(&self, hook: F)
    where
        F: Fn(&str, SubagentStatus) + Send + Sync + 'static,
    {
        *write(&self.hook) = Some(Arc::new(hook));
    }

    /// Start `context` under the manager's root scope.
    pub fn start(&self, context: SubagentContext) -> Result<(), SubagentError> {
        let root = self.root.clone();
        self.start_within(&root, context)
    }

    /// Start `context` as a child of `parent`.
    ///
    /// Validates, registers the entry as Running, fires the hook, and spawns
    /// the run on the Tokio runtime. Returns without waiting for the run;
    /// must be called from within a runtime.
    pub fn start_within(
        &self,
        parent: &CancelScope,
        context: SubagentContext,
    ) -> Result<(), SubagentError> {
        context.validate()?;

        let id = context.id.clone();
        let scope = parent.child(context.resource_limits.timeout);
        let entry = Arc::new(TrackedSubagent::new(&id, scope.clone()));

        {
            let mut entries = write(&self.entries);

            if entries.contains_key(&id) {
                return Err(SubagentError::AlreadyTracked(id));
            }

            if self.max_running > 0 {
                let running = entries
                    .values()
                    .filter(|e| e.status() == SubagentStatus::Running)
                    .count();
                if running >= self.max_running {
                    return Err(SubagentError::CapacityExceeded {
                        running,
                        limit: self.max_running,
                    });
                }
            }

            entries.insert(id.clone(), Arc::clone(&entry));
        }

        tracing::info!(
            id = %id,
            skill = %context.skill_name,
            parent = %context.parent_context_id,
            timeout = ?context.resource_limits.timeout,
            "Sub-agent started"
        );
        self.notify(&id, SubagentStatus::Running);
        if let Some(status) = entry.announce() {
            self.notify(&id, status);
        }

        let manager = self.clone();
        tokio::spawn(async move {
            manager.run(id, entry, scope, context).await;
        });

        Ok(())
    }

    /// Background half of `start`: execute, then latch the terminal record.
    async fn run(
        &self,
        id: SubagentId,
        entry: Arc<TrackedSubagent>,
        scope: CancelScope,
        context: SubagentContext,
    ) {
        let outcome = AssertUnwindSafe(self.executor.execute(scope, context))
            .catch_unwind()
            .await;

        let mut result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => failure(&id, &entry, format!("executor rejected run: {e}")),
            Err(_) => failure(&id, &entry, "executor panicked".to_string()),
        };
        if !result.status.is_terminal() {
            let reported = result.status;
            result.status = SubagentStatus::Error;
            result.error_message = format!("executor returned non-terminal status '{reported}'");
        }

        let status = result.status;
        let tokens = result.tokens_used;
        let tool_calls = result.tool_calls_made;
        match entry.complete(result) {
            Latch::Refused => tracing::debug!(
                id = %id,
                status = %status,
                latched = %entry.status(),
                "Dropping late result; terminal status already latched"
            ),
            latch => {
                tracing::info!(id = %id, status = %status, tokens, tool_calls, "Sub-agent reached terminal state");
                if latch == Latch::Notify {
                    self.notify(&id, status);
                }
            }
        }
    }

    /// Cancel a tracked sub-agent.
    ///
    /// Always signals the run's scope. The record moves to Cancelled only if
    /// it is still Running; a terminal status is never overwritten.
    pub fn cancel(&self, id: &str) -> Result<(), SubagentError> {
        let entry = self.entry(id)?;
        match entry.cancel() {
            Latch::Refused => {
                tracing::debug!(id = %id, status = %entry.status(), "Cancel on finished sub-agent");
            }
            latch => {
                tracing::info!(id = %id, "Sub-agent cancelled");
                if latch == Latch::Notify {
                    self.notify(id, SubagentStatus::Cancelled);
                }
            }
        }
        Ok(())
    }

    /// Snapshot of a sub-agent's record.
    ///
    /// This is a clone; the live record may change after it is returned.
    pub fn get_status(&self, id: &str) -> Result<SubagentResult, SubagentError> {
        let entry = self.entry(id)?;
        let state = lock(&entry.state);
        Ok(state.result.clone())
    }

    /// IDs of every sub-agent currently Running.
    pub fn list_running(&self) -> Vec<SubagentId> {
        read(&self.entries)
            .iter()
            .filter(|(_, entry)| entry.status() == SubagentStatus::Running)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Poll until `id` reaches a terminal status and return its final record.
    pub async fn wait(&self, id: &str) -> Result<SubagentResult, SubagentError> {
        loop {
            let snapshot = self.get_status(id)?;
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Drop every terminal entry, returning how many were evicted.
    ///
    /// Eviction is left to the host; nothing calls this implicitly.
    pub fn prune_finished(&self) -> usize {
        let mut entries = write(&self.entries);
        let before = entries.len();
        entries.retain(|_, entry| !entry.status().is_terminal());
        before - entries.len()
    }

    /// Cancel every running sub-agent, then poll until none are Running.
    ///
    /// `timeout` defaults to the manager's shutdown timeout. Returns
    /// [`SubagentError::ShutdownTimeout`] if sub-agents are still Running
    /// when it elapses. Background tasks are not joined or aborted.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> Result<(), SubagentError> {
        let timeout = timeout.unwrap_or(self.shutdown_timeout);
        let running = self.list_running();
        tracing::info!(running = running.len(), timeout = ?timeout, "Shutting down sub-agents");

        for id in &running {
            if let Err(e) = self.cancel(id) {
                tracing::warn!(id = %id, error = %e, "Cancel during shutdown failed");
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = self.list_running().len();
            if remaining == 0 {
                tracing::info!("All sub-agents drained");
                return Ok(());
            }
            if Instant::now() >= deadline {
                tracing::warn!(remaining, timeout = ?timeout, "Shutdown drain timed out");
                return Err(SubagentError::ShutdownTimeout { timeout, remaining });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Number of tracked entries, terminal ones included.
    pub fn tracked_count(&self) -> usize {
        read(&self.entries).len()
    }

    fn entry(&self, id: &str) -> Result<Arc<TrackedSubagent>, SubagentError> {
        read(&self.entries)
            .get(id)
            .cloned()
            .ok_or_else(|| SubagentError::NotFound(id.to_string()))
    }

    /// Fire the monitoring hook outside of every lock.
    fn notify(&self, id: &str, status: SubagentStatus) {
        let hook = read(&self.hook).clone();
        if let Some(hook) = hook {
            hook(id, status);
        }
    }
}

/// Terminal Error record for a run the executor could not produce a result for.
fn failure(id: &SubagentId, entry: &TrackedSubagent, message: String) -> SubagentResult {
    tracing::warn!(id = %id, error = %message, "Sub-agent execution failed");
    SubagentResult {
        status: SubagentStatus::Error,
        error_message: message,
        execution_time: entry.started.elapsed(),
        completed_at: Some(Utc::now()),
        ..SubagentResult::running(id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::subagent::fork::ContextForker;
    use crate::subagent::types::ResourceLimits;

    /// Waits on its scope; finishes Complete after `delay` unless cancelled first.
    struct SleepyExecutor {
        delay: Duration,
    }

    #[async_trait]
    impl Executor for SleepyExecutor {
        async fn execute(
            &self,
            scope: CancelScope,
            context: SubagentContext,
        ) -> Result<SubagentResult, SubagentError> {
            let status = tokio::select! {
                _ = tokio::time::sleep(self.delay) => SubagentStatus::Complete,
                _ = scope.token().cancelled() => SubagentStatus::Cancelled,
            };
            Ok(SubagentResult {
                status,
                output: "slept".to_string(),
                completed_at: Some(Utc::now()),
                ..SubagentResult::running(context.id)
            })
        }

        fn cancel(&self, _id: &str) -> Result<(), SubagentError> {
            Ok(())
        }

        fn status(&self, id: &str) -> Result<SubagentStatus, SubagentError> {
            Err(SubagentError::NotFound(id.to_string()))
        }
    }

    struct PanickingExecutor;

    #[async_trait]
    impl Executor for PanickingExecutor {
        async fn execute(
            &self,
            _scope: CancelScope,
            _context: SubagentContext,
        ) -> Result<SubagentResult, SubagentError> {
            panic!("executor bug");
        }

        fn cancel(&self, _id: &str) -> Result<(), SubagentError> {
            Ok(())
        }

        fn status(&self, id: &str) -> Result<SubagentStatus, SubagentError> {
            Err(SubagentError::NotFound(id.to_string()))
        }
    }

    fn context() -> SubagentContext {
        ContextForker::new()
            .fork(
                "parent",
                &[],
                "skill",
                None,
                ResourceLimits::new(0, 0, Duration::from_secs(30)),
            )
            .unwrap()
    }

    fn manager(delay: Duration) -> LifecycleManager {
        LifecycleManager::new(Arc::new(SleepyExecutor { delay }))
    }

    #[tokio::test]
    async fn start_registers_running_entry() {
        let mgr = manager(Duration::from_secs(5));
        let ctx = context();
        let id = ctx.id.clone();

        mgr.start(ctx).unwrap();

        let snapshot = mgr.get_status(&id).unwrap();
        assert_eq!(snapshot.status, SubagentStatus::Running);
        assert_eq!(mgr.list_running(), vec![id]);
        assert_eq!(mgr.tracked_count(), 1);
    }

    #[tokio::test]
    async fn start_rejects_invalid_context() {
        let mgr = manager(Duration::ZERO);
        let mut ctx = context();
        ctx.resource_limits.timeout = Duration::ZERO;

        assert!(matches!(mgr.start(ctx), Err(SubagentError::Validation(_))));
        assert_eq!(mgr.tracked_count(), 0);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let mgr = manager(Duration::ZERO);
        assert!(matches!(mgr.cancel("ghost"), Err(SubagentError::NotFound(_))));
        assert!(matches!(mgr.get_status("ghost"), Err(SubagentError::NotFound(_))));
    }

    #[tokio::test]
    async fn snapshot_is_detached_from_live_record() {
        let mgr = manager(Duration::from_secs(5));
        let ctx = context();
        let id = ctx.id.clone();
        mgr.start(ctx).unwrap();

        let mut snapshot = mgr.get_status(&id).unwrap();
        snapshot.status = SubagentStatus::Complete;
        snapshot.output = "tampered".to_string();

        let fresh = mgr.get_status(&id).unwrap();
        assert_eq!(fresh.status, SubagentStatus::Running);
        assert!(fresh.output.is_empty());
    }

    #[tokio::test]
    async fn completion_is_recorded() {
        let mgr = manager(Duration::from_millis(10));
        let ctx = context();
        let id = ctx.id.clone();
        mgr.start(ctx).unwrap();

        let done = mgr.wait(&id).await.unwrap();
        assert_eq!(done.status, SubagentStatus::Complete);
        assert_eq!(done.output, "slept");
        assert!(mgr.list_running().is_empty());
    }

    #[tokio::test]
    async fn late_completion_does_not_overwrite_cancelled() {
        let mgr = manager(Duration::from_millis(10));
        let ctx = context();
        let id = ctx.id.clone();
        mgr.start(ctx).unwrap();

        mgr.cancel(&id).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = mgr.get_status(&id).unwrap();
        assert_eq!(snapshot.status, SubagentStatus::Cancelled);
        assert_eq!(snapshot.error_message, "cancelled by supervisor");
    }

    #[tokio::test]
    async fn panicking_executor_is_recorded_as_error() {
        let mgr = LifecycleManager::new(Arc::new(PanickingExecutor));
        let ctx = context();
        let id = ctx.id.clone();
        mgr.start(ctx).unwrap();

        let done = mgr.wait(&id).await.unwrap();
        assert_eq!(done.status, SubagentStatus::Error);
        assert!(done.error_message.contains("panicked"));
    }

    #[tokio::test]
    async fn admission_limit_rejects_excess_starts() {
        let mgr = manager(Duration::from_secs(5)).with_max_running(1);
        mgr.start(context()).unwrap();

        let err = mgr.start(context()).unwrap_err();
        assert_eq!(
            err,
            SubagentError::CapacityExceeded {
                running: 1,
                limit: 1
            }
        );
        assert_eq!(mgr.tracked_count(), 1);
    }

    #[tokio::test]
    async fn prune_finished_keeps_running_entries() {
        let mgr = manager(Duration::from_secs(5));
        let first = context();
        let first_id = first.id.clone();
        mgr.start(first).unwrap();
        mgr.start(context()).unwrap();

        mgr.cancel(&first_id).unwrap();
        assert_eq!(mgr.prune_finished(), 1);
        assert_eq!(mgr.tracked_count(), 1);
        assert!(matches!(mgr.get_status(&first_id), Err(SubagentError::NotFound(_))));
    }

    #[test]
    fn terminal_latched_before_announce_is_held() {
        let entry = TrackedSubagent::new(&"held".to_string(), CancelScope::default());

        assert_eq!(entry.cancel(), Latch::Held);
        assert_eq!(entry.cancel(), Latch::Refused);
        assert_eq!(entry.announce(), Some(SubagentStatus::Cancelled));
        assert_eq!(entry.announce(), None);

        let late = SubagentResult {
            status: SubagentStatus::Complete,
            ..SubagentResult::running("held")
        };
        assert_eq!(entry.complete(late), Latch::Refused);
    }

    #[test]
    fn terminal_after_announce_notifies_directly() {
        let entry = TrackedSubagent::new(&"live".to_string(), CancelScope::default());
        assert_eq!(entry.announce(), None);

        let done = SubagentResult {
            status: SubagentStatus::Complete,
            ..SubagentResult::running("live")
        };
        assert_eq!(entry.complete(done), Latch::Notify);
    }

    #[tokio::test]
    async fn cancel_before_running_announced_still_reports_running_first() {
        let mgr = manager(Duration::from_secs(5));
        let events: Arc<Mutex<Vec<SubagentStatus>>> = Arc::new(Mutex::new(Vec::new()));

        let handle = mgr.clone();
        let sink = Arc::clone(&events);
        mgr.set_monitoring_hook(move |id, status| {
            // Cancel lands while Running is still being announced.
            if status == SubagentStatus::Running {
                handle.cancel(id).unwrap();
            }
            sink.lock().unwrap().push(status);
        });

        let ctx = context();
        let id = ctx.id.clone();
        mgr.start(ctx).unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![SubagentStatus::Running, SubagentStatus::Cancelled]
        );
        assert_eq!(mgr.get_status(&id).unwrap().status, SubagentStatus::Cancelled);
    }

    #[tokio::test]
    async fn root_token_cascades_into_runs() {
        let root = CancellationToken::new();
        let mgr = manager(Duration::from_secs(5)).with_root_token(root.clone());
        let ctx = context();
        let id = ctx.id.clone();
        mgr.start(ctx).unwrap();

        root.cancel();
        let done = mgr.wait(&id).await.unwrap();
        assert_eq!(done.status, SubagentStatus::Cancelled);
    }
}
