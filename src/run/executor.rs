//! Bounded-parallel run execution.
//!
//! Tasks targeting different repositories run concurrently under a
//! semaphore; tasks sharing a target execute strictly in `task_order`. An
//! iteration-close task additionally waits for the tasks of the iteration's
//! member repositories. Hosting failures land on the owning task and its
//! audit step — they never propagate out of the engine. Cancellation and
//! fail-fast stop scheduling of not-yet-started tasks while in-flight tasks
//! finish and record their true outcome.

use crate::clock::Clock;
use crate::errors::{CoreError, Result};
use crate::hosting::{bounded, GitHostingPort, MergeOutcome};
use crate::run::context::ContextResolver;
use crate::run::plan::RunPlan;
use crate::run::task::{RunTask, TaskStatus, TaskTarget};
use crate::run::{Run, RunStep, RunSummary, StepResult, TaskKind};
use crate::settings::{NamingSettings, OrchestratorSettings};
use crate::store::RunStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cooperative cancellation flag for a running execution. Cancelling stops
/// scheduling; it does not abort in-flight hosting calls.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The persisted end state of one execution pass.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub run: Run,
    pub tasks: Vec<RunTask>,
    pub summary: RunSummary,
}

/// One execution attempt's result, reported back to the scheduler.
#[derive(Debug)]
struct Attempt {
    result: StepResult,
    message: String,
}

impl Attempt {
    fn success(message: impl Into<String>) -> Self {
        Self {
            result: StepResult::Success,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            result: StepResult::Failed,
            message: message.into(),
        }
    }
}

/// Mutable execution state shared between the scheduler loop and result
/// recording. Guarded by one mutex; worker tasks never touch it.
struct ExecState {
    run: Run,
    tasks: Vec<RunTask>,
    next_executed_order: u32,
}

impl ExecState {
    /// Repositories belonging to the iteration a task targets. Empty for
    /// repository targets.
    fn member_repos(&self, target: &TaskTarget) -> Vec<String> {
        match target {
            TaskTarget::Iteration(key) => self
                .run
                .items
                .iter()
                .filter(|i| i.iteration_key.as_deref() == Some(key.as_str()))
                .map(|i| i.repo.clone())
                .collect(),
            TaskTarget::Repository(_) => Vec::new(),
        }
    }

    /// Predecessors a task must wait for: earlier tasks on the same target,
    /// plus (for iteration targets) earlier tasks on the iteration's member
    /// repositories.
    fn predecessors<'a>(&'a self, task: &'a RunTask) -> Vec<&'a RunTask> {
        let member_repos = self.member_repos(&task.target);
        self.tasks
            .iter()
            .filter(|other| {
                other.task_order < task.task_order
                    && (other.target == task.target
                        || matches!(
                            &other.target,
                            TaskTarget::Repository(repo) if member_repos.contains(repo)
                        ))
            })
            .collect()
    }

    /// Pending tasks whose predecessors all completed.
    fn ready_ids(&self) -> Vec<Uuid> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| {
                self.predecessors(t)
                    .iter()
                    .all(|p| p.status == TaskStatus::Completed)
            })
            .map(|t| t.id)
            .collect()
    }

    /// Pending tasks that can never start: a predecessor failed or was
    /// skipped, or scheduling has been halted.
    fn dead_ids(&self, halted: bool) -> Vec<Uuid> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| {
                halted
                    || self.predecessors(t).iter().any(|p| {
                        matches!(p.status, TaskStatus::Failed | TaskStatus::Skipped)
                    })
            })
            .map(|t| t.id)
            .collect()
    }

    fn all_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    fn task_index(&self, task_id: Uuid) -> Result<usize> {
        self.tasks
            .iter()
            .position(|t| t.id == task_id)
            .ok_or_else(|| CoreError::not_found("run_task", &task_id.to_string()))
    }

    fn item_index(&self, target: &TaskTarget) -> Option<usize> {
        match target {
            TaskTarget::Repository(repo) => {
                self.run.items.iter().position(|i| &i.repo == repo)
            }
            TaskTarget::Iteration(key) => self
                .run
                .items
                .iter()
                .position(|i| i.iteration_key.as_deref() == Some(key.as_str())),
        }
    }

    /// Mark a task skipped. Skips are not execution attempts, so no step is
    /// recorded; the task status carries the audit.
    fn skip(&mut self, task_id: Uuid, clock: &dyn Clock) -> Result<()> {
        let idx = self.task_index(task_id)?;
        self.tasks[idx].mark_skipped(clock)?;
        debug!(task = %task_id, kind = %self.tasks[idx].kind, "task skipped");
        let target = self.tasks[idx].target.clone();
        self.settle_item(&target);
        Ok(())
    }

    /// Record a finished attempt: task status, audit step, item settlement.
    fn record_attempt(&mut self, task_id: Uuid, attempt: Attempt, clock: &dyn Clock) -> Result<()> {
        let idx = self.task_index(task_id)?;
        let started_at = self.tasks[idx].started_at.unwrap_or_else(|| clock.now());
        match attempt.result {
            StepResult::Success => self.tasks[idx].mark_completed(clock)?,
            _ => self.tasks[idx].mark_failed(&attempt.message, clock)?,
        }
        let finished_at = self.tasks[idx].finished_at.unwrap_or_else(|| clock.now());
        let action = self.tasks[idx].kind;
        let target = self.tasks[idx].target.clone();

        if let Some(item_idx) = self.item_index(&target) {
            self.run.items[item_idx].record_step(RunStep {
                action,
                result: attempt.result,
                started_at,
                finished_at,
                message: attempt.message,
            });
        }
        self.settle_item(&target);
        Ok(())
    }

    /// Once every task mapping to an item is terminal, stamp its completion
    /// order (only if it actually executed something) and conclude it.
    fn settle_item(&mut self, target: &TaskTarget) {
        let Some(item_idx) = self.item_index(target) else {
            return;
        };
        let repo = self.run.items[item_idx].repo.clone();
        let iteration_key = self.run.items[item_idx].iteration_key.clone();
        let done = self
            .tasks
            .iter()
            .filter(|t| match &t.target {
                TaskTarget::Repository(r) => *r == repo,
                TaskTarget::Iteration(key) => {
                    iteration_key.as_deref() == Some(key.as_str())
                        && self.item_index(&t.target) == Some(item_idx)
                }
            })
            .all(|t| t.status.is_terminal());
        if !done {
            return;
        }
        let item = &mut self.run.items[item_idx];
        if item.executed_order.is_none() && !item.steps.is_empty() {
            item.executed_order = Some(self.next_executed_order);
            self.next_executed_order += 1;
        }
        item.conclude();
    }
}

/// Executes a run's tasks against the Git hosting port.
pub struct RunExecutor {
    hosting: Arc<dyn GitHostingPort>,
    resolver: Arc<ContextResolver>,
    runs: Arc<dyn RunStore>,
    clock: Arc<dyn Clock>,
    naming: NamingSettings,
    orchestrator: OrchestratorSettings,
    call_timeout: Duration,
}

impl RunExecutor {
    pub fn new(
        hosting: Arc<dyn GitHostingPort>,
        resolver: Arc<ContextResolver>,
        runs: Arc<dyn RunStore>,
        clock: Arc<dyn Clock>,
        naming: NamingSettings,
        orchestrator: OrchestratorSettings,
        call_timeout: Duration,
    ) -> Self {
        Self {
            hosting,
            resolver,
            runs,
            clock,
            naming,
            orchestrator,
            call_timeout,
        }
    }

    /// Execute a freshly planned run.
    pub async fn execute(
        &self,
        plan: RunPlan,
        fail_fast: bool,
        cancel: &CancelToken,
    ) -> Result<ExecutionOutcome> {
        // Persist up front so context resolution sees the run
        self.runs.save_run(&plan.run).await?;
        self.runs.save_tasks(&plan.tasks).await?;
        info!(
            run = %plan.run.id,
            window = %plan.run.window_key,
            tasks = plan.tasks.len(),
            fail_fast,
            "starting run"
        );
        self.drive(plan.run, plan.tasks, fail_fast, cancel).await
    }

    /// Re-execute a subset of an existing run's tasks (the retry path).
    /// Tasks outside the subset keep their state; new steps append to the
    /// run's audit trail and item results are re-concluded.
    pub async fn resume(
        &self,
        run: Run,
        tasks: Vec<RunTask>,
        fail_fast: bool,
        cancel: &CancelToken,
    ) -> Result<ExecutionOutcome> {
        info!(run = %run.id, tasks = tasks.len(), "resuming run");
        self.drive(run, tasks, fail_fast, cancel).await
    }

    async fn drive(
        &self,
        run: Run,
        tasks: Vec<RunTask>,
        fail_fast: bool,
        cancel: &CancelToken,
    ) -> Result<ExecutionOutcome> {
        let state = Arc::new(Mutex::new(ExecState {
            run,
            tasks,
            next_executed_order: 0,
        }));
        let semaphore = Arc::new(Semaphore::new(self.orchestrator.max_parallel.max(1)));
        let (result_tx, mut result_rx) = mpsc::channel::<(Uuid, Attempt)>(64);
        let mut active: HashMap<Uuid, JoinHandle<()>> = HashMap::new();
        let mut halted = false;

        loop {
            if cancel.is_cancelled() && !halted {
                info!("cancellation requested, halting scheduling");
                halted = true;
            }

            // Scheduling pass: settle dead tasks, then start ready ones.
            let mut to_spawn = Vec::new();
            {
                let mut st = state.lock().await;
                loop {
                    // Skips cascade: a skipped predecessor kills its dependents
                    let dead = st.dead_ids(halted);
                    if dead.is_empty() {
                        break;
                    }
                    for id in dead {
                        st.skip(id, self.clock.as_ref())?;
                    }
                }
                if !halted {
                    for id in st.ready_ids() {
                        if active.len() + to_spawn.len() >= self.orchestrator.max_parallel.max(1) {
                            break;
                        }
                        let idx = st.task_index(id)?;
                        st.tasks[idx].start(self.clock.as_ref())?;
                        let repos = st.member_repos(&st.tasks[idx].target);
                        to_spawn.push((st.tasks[idx].clone(), repos));
                    }
                }
            }

            for (task, iteration_repos) in to_spawn {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| CoreError::Other(anyhow::anyhow!(e)))?;
                let hosting = self.hosting.clone();
                let resolver = self.resolver.clone();
                let naming = self.naming.clone();
                let timeout = self.call_timeout;
                let tx = result_tx.clone();
                debug!(task = %task.id, kind = %task.kind, target = %task.target, "task started");
                let task_id = task.id;
                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    let attempt =
                        execute_attempt(hosting, resolver, naming, timeout, task, iteration_repos)
                            .await;
                    tx.send((task_id, attempt)).await.ok();
                });
                active.insert(task_id, handle);
            }

            {
                let st = state.lock().await;
                if active.is_empty() && st.all_terminal() {
                    break;
                }
            }

            if !active.is_empty() {
                match result_rx.recv().await {
                    Some((task_id, attempt)) => {
                        if let Some(handle) = active.remove(&task_id) {
                            handle.await.ok();
                        }
                        let mut st = state.lock().await;
                        if attempt.result != StepResult::Success {
                            warn!(task = %task_id, result = %attempt.result, message = %attempt.message, "task did not complete");
                        }
                        st.record_attempt(task_id, attempt, self.clock.as_ref())?;
                        let idx = st.task_index(task_id)?;
                        if fail_fast && st.tasks[idx].status == TaskStatus::Failed {
                            info!(task = %task_id, "fail-fast: halting scheduling");
                            halted = true;
                        }
                    }
                    None => break,
                }
            }
        }

        let state = Arc::try_unwrap(state)
            .map_err(|_| CoreError::Other(anyhow::anyhow!("execution state still shared")))?;
        let ExecState { mut run, tasks, .. } = state.into_inner();
        for item in run.items.iter_mut() {
            if item.final_result.is_none() {
                item.conclude();
            }
        }
        run.finished_at = Some(self.clock.now());
        self.runs.save_run(&run).await?;
        self.runs.save_tasks(&tasks).await?;

        let summary = run.summary();
        info!(
            run = %run.id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "run finished"
        );
        Ok(ExecutionOutcome {
            run,
            tasks,
            summary,
        })
    }
}

/// Perform one task's Git action. Never returns an error: every failure
/// becomes a failed attempt recorded on the task.
async fn execute_attempt(
    hosting: Arc<dyn GitHostingPort>,
    resolver: Arc<ContextResolver>,
    naming: NamingSettings,
    timeout: Duration,
    task: RunTask,
    iteration_repos: Vec<String>,
) -> Attempt {
    let ctx = match resolver.resolve(&task).await {
        Ok(Some(ctx)) => ctx,
        Ok(None) => {
            return Attempt::failed(format!("no execution context for {}", task.target));
        }
        Err(e) => return Attempt::failed(format!("context resolution failed: {}", e)),
    };

    match task.kind {
        TaskKind::MergeFeature => {
            let Some(feature) = ctx.feature_branch else {
                return Attempt::failed("no feature branch in context");
            };
            let Some(release) = ctx.release_branch else {
                return Attempt::failed("no release branch recorded for repository");
            };
            merge(hosting.as_ref(), timeout, &ctx.repo, &feature, &release).await
        }
        TaskKind::MergeToDefault => {
            let Some(release) = ctx.release_branch else {
                return Attempt::failed("no release branch recorded for repository");
            };
            merge(
                hosting.as_ref(),
                timeout,
                &ctx.repo,
                &release,
                &naming.default_branch,
            )
            .await
        }
        TaskKind::CreateTag => {
            let Some(version) = ctx.target_version else {
                return Attempt::failed("no target version recorded for repository");
            };
            let Some(release) = ctx.release_branch else {
                return Attempt::failed("no release branch recorded for repository");
            };
            let tag = naming.tag(&version);
            let message = format!("Release {}", version);
            match bounded(timeout, hosting.create_tag(&ctx.repo, &tag, &release, &message)).await {
                Ok(true) => Attempt::success(format!("created tag {} at {}", tag, release)),
                Ok(false) => Attempt::success(format!("tag {} already exists", tag)),
                Err(e) => Attempt::failed(e.to_string()),
            }
        }
        TaskKind::CloseIteration => {
            let Some(feature) = ctx.feature_branch else {
                return Attempt::failed("no feature branch in context");
            };
            let mut archived = 0usize;
            for repo in &iteration_repos {
                match bounded(timeout, hosting.archive_branch(repo, &feature, &ctx.window_key))
                    .await
                {
                    Ok(true) => archived += 1,
                    // Already archived earlier; repeat close stays clean
                    Ok(false) => {}
                    Err(e) => {
                        return Attempt::failed(format!(
                            "archiving {} in {}: {}",
                            feature, repo, e
                        ));
                    }
                }
            }
            Attempt::success(format!(
                "archived {} in {} of {} repositories",
                feature,
                archived,
                iteration_repos.len()
            ))
        }
    }
}

async fn merge(
    hosting: &dyn GitHostingPort,
    timeout: Duration,
    repo: &str,
    source: &str,
    target: &str,
) -> Attempt {
    let message = format!("Merge {} into {}", source, target);
    match bounded(timeout, hosting.merge_branch(repo, source, target, &message)).await {
        Ok(MergeOutcome::Success) => {
            Attempt::success(format!("merged {} into {}", source, target))
        }
        Ok(MergeOutcome::Conflict { info }) => Attempt {
            result: StepResult::Conflict,
            message: format!("merge conflict: {}", info),
        },
        Ok(MergeOutcome::Failed { error }) => Attempt::failed(error),
        Err(e) => Attempt::failed(e.to_string()),
    }
}
