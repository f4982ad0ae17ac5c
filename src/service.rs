//! Operations facade over the stores, engines and ports.
//!
//! This is the surface the excluded presentation layer consumes. Every
//! operation loads plain records through the store traits, drives the
//! domain logic, and saves the result; nothing here holds state of its own.

use crate::clock::Clock;
use crate::compliance::{BranchComplianceEngine, BranchRule, ComplianceDecision, RuleKind};
use crate::errors::{CoreError, Result};
use crate::hosting::GitHostingPort;
use crate::iteration::{Iteration, WindowIteration};
use crate::run::context::ContextResolver;
use crate::run::executor::{CancelToken, ExecutionOutcome, RunExecutor};
use crate::run::plan::build_plan;
use crate::run::task::{RunTask, TaskStatus};
use crate::run::{export, Run};
use crate::settings::Settings;
use crate::store::{
    AttachmentStore, IterationStore, MemoryAttachmentStore, MemoryIterationStore,
    MemoryPolicyStore, MemoryReleaseBranchStore, MemoryRuleStore, MemoryRunStore,
    MemoryVersionStore, MemoryWindowStore, PolicyStore, ReleaseBranchLookup, RuleStore, RunStore,
    VersionLookup, WindowStore,
};
use crate::version::{BumpRule, VersionPolicy, VersionScheme};
use crate::window::ReleaseWindow;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Persistence handles, one per aggregate.
#[derive(Clone)]
pub struct Stores {
    pub windows: Arc<dyn WindowStore>,
    pub iterations: Arc<dyn IterationStore>,
    pub attachments: Arc<dyn AttachmentStore>,
    pub rules: Arc<dyn RuleStore>,
    pub policies: Arc<dyn PolicyStore>,
    pub runs: Arc<dyn RunStore>,
}

impl Stores {
    /// All-in-memory stores, used by tests and as the reference
    /// implementation of the persistence contract.
    pub fn in_memory() -> Self {
        Self {
            windows: Arc::new(MemoryWindowStore::new()),
            iterations: Arc::new(MemoryIterationStore::new()),
            attachments: Arc::new(MemoryAttachmentStore::new()),
            rules: Arc::new(MemoryRuleStore::new()),
            policies: Arc::new(MemoryPolicyStore::new()),
            runs: Arc::new(MemoryRunStore::new()),
        }
    }
}

/// External collaborator ports the engine consumes.
#[derive(Clone)]
pub struct Ports {
    pub hosting: Arc<dyn GitHostingPort>,
    pub clock: Arc<dyn Clock>,
    pub release_branches: Arc<dyn ReleaseBranchLookup>,
    pub versions: Arc<dyn VersionLookup>,
}

impl Ports {
    pub fn new(hosting: Arc<dyn GitHostingPort>, clock: Arc<dyn Clock>) -> Self {
        Self {
            hosting,
            clock,
            release_branches: Arc::new(MemoryReleaseBranchStore::new()),
            versions: Arc::new(MemoryVersionStore::new()),
        }
    }
}

pub struct ReleaseService {
    stores: Stores,
    clock: Arc<dyn Clock>,
    settings: Settings,
    executor: RunExecutor,
    /// One lock per window key; no two lifecycle transitions on the same
    /// window run concurrently
    window_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ReleaseService {
    pub fn new(stores: Stores, ports: Ports, settings: Settings) -> Self {
        let resolver = Arc::new(ContextResolver::new(
            stores.runs.clone(),
            ports.release_branches.clone(),
            ports.versions.clone(),
            settings.naming.clone(),
        ));
        let executor = RunExecutor::new(
            ports.hosting.clone(),
            resolver,
            stores.runs.clone(),
            ports.clock.clone(),
            settings.naming.clone(),
            settings.orchestrator.clone(),
            Duration::from_secs(settings.hosting.call_timeout_secs),
        );
        Self {
            stores,
            clock: ports.clock,
            settings,
            executor,
            window_locks: Mutex::new(HashMap::new()),
        }
    }

    // -- Release windows ----------------------------------------------------

    pub async fn create_window(&self, window_key: &str, name: &str) -> Result<ReleaseWindow> {
        if self.stores.windows.find_by_key(window_key).await?.is_some() {
            return Err(CoreError::validation(
                "window_key",
                format!("'{}' already exists", window_key),
            ));
        }
        let window = ReleaseWindow::new(window_key, name, self.clock.as_ref())?;
        self.stores.windows.save(&window).await?;
        info!(window = window_key, "created release window");
        Ok(window)
    }

    pub async fn get_window(&self, window_key: &str) -> Result<ReleaseWindow> {
        self.stores
            .windows
            .find_by_key(window_key)
            .await?
            .ok_or_else(|| CoreError::not_found("release_window", window_key))
    }

    pub async fn list_windows(&self) -> Result<Vec<ReleaseWindow>> {
        self.stores.windows.list().await
    }

    pub async fn configure_window(
        &self,
        window_key: &str,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<ReleaseWindow> {
        self.mutate_window(window_key, "configure", |w, clock| {
            w.configure(start_at, end_at, clock)
        })
        .await
    }

    pub async fn freeze_window(&self, window_key: &str) -> Result<ReleaseWindow> {
        self.mutate_window(window_key, "freeze", |w, clock| {
            w.freeze(clock);
            Ok(())
        })
        .await
    }

    pub async fn unfreeze_window(&self, window_key: &str) -> Result<ReleaseWindow> {
        self.mutate_window(window_key, "unfreeze", |w, clock| {
            w.unfreeze(clock);
            Ok(())
        })
        .await
    }

    pub async fn publish_window(&self, window_key: &str) -> Result<ReleaseWindow> {
        self.mutate_window(window_key, "publish", |w, clock| w.publish(clock))
            .await
    }

    pub async fn release_window(&self, window_key: &str) -> Result<ReleaseWindow> {
        self.mutate_window(window_key, "release", |w, clock| w.release(clock))
            .await
    }

    pub async fn close_window(&self, window_key: &str) -> Result<ReleaseWindow> {
        self.mutate_window(window_key, "close", |w, clock| w.close(clock))
            .await
    }

    /// Load, mutate under the lifecycle rules, save — all while holding the
    /// window's transition lock. The store sees the window only after the
    /// transition succeeded, so a rejected transition is never partially
    /// applied.
    async fn mutate_window<F>(
        &self,
        window_key: &str,
        operation: &str,
        mutate: F,
    ) -> Result<ReleaseWindow>
    where
        F: FnOnce(&mut ReleaseWindow, &dyn Clock) -> Result<()>,
    {
        let lock = {
            let mut locks = self.window_locks.lock().await;
            locks.entry(window_key.to_string()).or_default().clone()
        };
        let _transition = lock.lock().await;

        let mut window = self.get_window(window_key).await?;
        mutate(&mut window, self.clock.as_ref())?;
        self.stores.windows.save(&window).await?;
        info!(window = window_key, operation, status = %window.status, "window transition");
        Ok(window)
    }

    // -- Iterations and attachments -----------------------------------------

    pub async fn create_iteration(
        &self,
        iteration_key: &str,
        description: &str,
        repos: Vec<String>,
    ) -> Result<Iteration> {
        if self
            .stores
            .iterations
            .find_by_key(iteration_key)
            .await?
            .is_some()
        {
            return Err(CoreError::validation(
                "iteration_key",
                format!("'{}' already exists", iteration_key),
            ));
        }
        let iteration = Iteration::new(iteration_key, description, repos, self.clock.as_ref())?;
        self.stores.iterations.save(&iteration).await?;
        info!(iteration = iteration_key, repos = iteration.repos.len(), "created iteration");
        Ok(iteration)
    }

    pub async fn attach_iteration(
        &self,
        window_key: &str,
        iteration_key: &str,
    ) -> Result<WindowIteration> {
        let window = self.plan_mutable_window(window_key, "attach").await?;
        if self
            .stores
            .iterations
            .find_by_key(iteration_key)
            .await?
            .is_none()
        {
            return Err(CoreError::not_found("iteration", iteration_key));
        }
        let attachment = WindowIteration::new(window.id, iteration_key, self.clock.as_ref());
        self.stores.attachments.save(&attachment).await?;
        info!(window = window_key, iteration = iteration_key, "attached iteration");
        Ok(attachment)
    }

    /// Remove an attachment. Detaching a pair that is not attached is not an
    /// error; the return value says whether a record existed.
    pub async fn detach_iteration(&self, window_key: &str, iteration_key: &str) -> Result<bool> {
        let window = self.plan_mutable_window(window_key, "detach").await?;
        let removed = self
            .stores
            .attachments
            .remove(&WindowIteration::attachment_id(window.id, iteration_key))
            .await?;
        if removed {
            info!(window = window_key, iteration = iteration_key, "detached iteration");
        }
        Ok(removed)
    }

    pub async fn attached_iterations(&self, window_key: &str) -> Result<Vec<Iteration>> {
        let window = self.get_window(window_key).await?;
        let attachments = self.stores.attachments.list_for_window(window.id).await?;
        let mut iterations = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let iteration = self
                .stores
                .iterations
                .find_by_key(&attachment.iteration_key)
                .await?
                .ok_or_else(|| CoreError::not_found("iteration", &attachment.iteration_key))?;
            iterations.push(iteration);
        }
        Ok(iterations)
    }

    /// A window accepting plan changes: not closed, not frozen.
    async fn plan_mutable_window(&self, window_key: &str, attempted: &str) -> Result<ReleaseWindow> {
        let window = self.get_window(window_key).await?;
        if window.status.is_terminal() {
            return Err(CoreError::invalid_state(
                "release_window",
                window.status,
                attempted,
            ));
        }
        if window.frozen {
            return Err(CoreError::invalid_state(
                "release_window",
                "frozen",
                attempted,
            ));
        }
        Ok(window)
    }

    // -- Branch rules and compliance ----------------------------------------

    pub async fn create_rule(&self, name: &str, pattern: &str, kind: RuleKind) -> Result<BranchRule> {
        let rule = BranchRule::new(name, pattern, kind)?;
        self.stores.rules.save(&rule).await?;
        info!(rule = name, pattern, "created branch rule");
        Ok(rule)
    }

    pub async fn update_rule(
        &self,
        id: Uuid,
        name: &str,
        pattern: &str,
        kind: RuleKind,
    ) -> Result<BranchRule> {
        let mut rule = self
            .stores
            .rules
            .find(id)
            .await?
            .ok_or_else(|| CoreError::not_found("branch_rule", &id.to_string()))?;
        if name.is_empty() {
            return Err(CoreError::validation("name", "must not be empty"));
        }
        rule.update_pattern(pattern)?;
        rule.name = name.to_string();
        rule.kind = kind;
        self.stores.rules.save(&rule).await?;
        Ok(rule)
    }

    pub async fn delete_rule(&self, id: Uuid) -> Result<bool> {
        self.stores.rules.delete(id).await
    }

    pub async fn list_rules(&self) -> Result<Vec<BranchRule>> {
        self.stores.rules.list().await
    }

    pub async fn check_compliance(&self, branch: &str) -> Result<ComplianceDecision> {
        let rules = self.stores.rules.list().await?;
        let engine = BranchComplianceEngine::new(&rules)?;
        Ok(engine.evaluate(branch))
    }

    // -- Version policies ---------------------------------------------------

    pub async fn create_policy(
        &self,
        name: &str,
        scheme: VersionScheme,
        bump: BumpRule,
    ) -> Result<VersionPolicy> {
        if self.stores.policies.find_by_name(name).await?.is_some() {
            return Err(CoreError::validation(
                "name",
                format!("policy '{}' already exists", name),
            ));
        }
        let policy = VersionPolicy::new(name, scheme, bump)?;
        self.stores.policies.save(&policy).await?;
        Ok(policy)
    }

    pub async fn derive_version(&self, policy_name: &str, current: &str) -> Result<String> {
        let policy = self.get_policy(policy_name).await?;
        policy.derive_next(current, self.clock.as_ref())
    }

    pub async fn validate_version(&self, policy_name: &str, version: &str) -> Result<bool> {
        let policy = self.get_policy(policy_name).await?;
        Ok(policy.validate(version))
    }

    async fn get_policy(&self, name: &str) -> Result<VersionPolicy> {
        self.stores
            .policies
            .find_by_name(name)
            .await?
            .ok_or_else(|| CoreError::not_found("version_policy", name))
    }

    // -- Runs ---------------------------------------------------------------

    /// Plan and execute a run for the window's attached iterations.
    pub async fn start_orchestration(
        &self,
        window_key: &str,
        fail_fast: bool,
        cancel: &CancelToken,
    ) -> Result<ExecutionOutcome> {
        let window = self.get_window(window_key).await?;
        let iterations = self.attached_iterations(window_key).await?;
        let plan = build_plan(
            &window,
            &iterations,
            &self.settings.orchestrator,
            self.clock.as_ref(),
        )?;
        self.executor.execute(plan, fail_fast, cancel).await
    }

    /// Re-execute one failed task. Its skipped dependents stay skipped —
    /// the caller chose single-task scope.
    pub async fn retry_task(&self, task_id: Uuid) -> Result<ExecutionOutcome> {
        let mut task = self
            .stores
            .runs
            .find_task(task_id)
            .await?
            .ok_or_else(|| CoreError::not_found("run_task", &task_id.to_string()))?;
        task.reset_for_retry()?;
        let run = self.get_run(task.run_id).await?;
        info!(run = %run.id, task = %task_id, retry = task.retry_count, "retrying task");
        self.executor
            .resume(run, vec![task], false, &CancelToken::new())
            .await
    }

    /// Re-execute a run's failed tasks that still have retries left, along
    /// with the tasks that were skipped as their dependents.
    pub async fn retry_run(&self, run_id: Uuid) -> Result<ExecutionOutcome> {
        let run = self.get_run(run_id).await?;
        let all = self.stores.runs.tasks_for_run(run_id).await?;

        let mut subset = Vec::new();
        let mut reset_failed = 0usize;
        for mut task in all {
            match task.status {
                TaskStatus::Failed if task.can_retry() => {
                    task.reset_for_retry()?;
                    reset_failed += 1;
                    subset.push(task);
                }
                // Kept in the subset unchanged: a reactivated dependent of an
                // exhausted task must see its failed predecessor and skip again
                TaskStatus::Failed => subset.push(task),
                TaskStatus::Skipped => {
                    task.reactivate()?;
                    subset.push(task);
                }
                _ => {}
            }
        }
        if reset_failed == 0 {
            return Err(CoreError::validation(
                "run_id",
                "run has no retryable failed tasks",
            ));
        }
        info!(run = %run_id, tasks = subset.len(), "retrying run");
        self.executor
            .resume(run, subset, false, &CancelToken::new())
            .await
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<Run> {
        self.stores
            .runs
            .find_run(run_id)
            .await?
            .ok_or_else(|| CoreError::not_found("run", &run_id.to_string()))
    }

    pub async fn get_tasks(&self, run_id: Uuid) -> Result<Vec<RunTask>> {
        self.stores.runs.tasks_for_run(run_id).await
    }

    pub async fn export_run_csv(&self, run_id: Uuid) -> Result<String> {
        let run = self.get_run(run_id).await?;
        Ok(export::to_csv(&run))
    }

    pub async fn export_run_json(&self, run_id: Uuid) -> Result<String> {
        let run = self.get_run(run_id).await?;
        export::to_json(&run)
    }
}
