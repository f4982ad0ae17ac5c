//! Persistence boundary: narrow save/find contracts per aggregate.
//!
//! The engine depends only on these traits; the excluded persistence layer
//! supplies durable implementations. The in-memory implementations here
//! back the test suite and double as a reference for the save/rehydrate
//! contract (records round-trip including their `version` counters).

use crate::compliance::BranchRule;
use crate::errors::{CoreError, Result};
use crate::iteration::{Iteration, WindowIteration};
use crate::run::task::RunTask;
use crate::run::Run;
use crate::version::VersionPolicy;
use crate::window::ReleaseWindow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Version numbers resolved for one (window, repo) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub base_version: String,
    pub dev_version: String,
    pub target_version: String,
}

#[async_trait]
pub trait WindowStore: Send + Sync {
    async fn save(&self, window: &ReleaseWindow) -> Result<()>;
    async fn find_by_key(&self, window_key: &str) -> Result<Option<ReleaseWindow>>;
    async fn list(&self) -> Result<Vec<ReleaseWindow>>;
}

#[async_trait]
pub trait IterationStore: Send + Sync {
    async fn save(&self, iteration: &Iteration) -> Result<()>;
    async fn find_by_key(&self, iteration_key: &str) -> Result<Option<Iteration>>;
}

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Insert or replace by the attachment's deterministic id.
    async fn save(&self, attachment: &WindowIteration) -> Result<()>;
    /// Returns whether a record existed.
    async fn remove(&self, attachment_id: &str) -> Result<bool>;
    async fn list_for_window(&self, window_id: Uuid) -> Result<Vec<WindowIteration>>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn save(&self, rule: &BranchRule) -> Result<()>;
    async fn delete(&self, id: Uuid) -> Result<bool>;
    async fn find(&self, id: Uuid) -> Result<Option<BranchRule>>;
    async fn list(&self) -> Result<Vec<BranchRule>>;
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn save(&self, policy: &VersionPolicy) -> Result<()>;
    async fn find_by_name(&self, name: &str) -> Result<Option<VersionPolicy>>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save_run(&self, run: &Run) -> Result<()>;
    async fn find_run(&self, run_id: Uuid) -> Result<Option<Run>>;
    /// Insert or replace tasks by id.
    async fn save_tasks(&self, tasks: &[RunTask]) -> Result<()>;
    async fn find_task(&self, task_id: Uuid) -> Result<Option<RunTask>>;
    /// A run's tasks sorted by `task_order`.
    async fn tasks_for_run(&self, run_id: Uuid) -> Result<Vec<RunTask>>;
}

/// Release-branch names recorded per (window, repo). Optional by design:
/// a miss degrades the task context instead of failing resolution.
#[async_trait]
pub trait ReleaseBranchLookup: Send + Sync {
    async fn release_branch(&self, window_key: &str, repo: &str) -> Result<Option<String>>;
}

/// Version numbers recorded per (window, repo). Optional like the above.
#[async_trait]
pub trait VersionLookup: Send + Sync {
    async fn version_info(&self, window_key: &str, repo: &str) -> Result<Option<VersionInfo>>;
}

fn guard<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| CoreError::LockPoisoned)
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryWindowStore {
    windows: Mutex<HashMap<String, ReleaseWindow>>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn save(&self, window: &ReleaseWindow) -> Result<()> {
        guard(&self.windows)?.insert(window.window_key.clone(), window.clone());
        Ok(())
    }

    async fn find_by_key(&self, window_key: &str) -> Result<Option<ReleaseWindow>> {
        Ok(guard(&self.windows)?.get(window_key).cloned())
    }

    async fn list(&self) -> Result<Vec<ReleaseWindow>> {
        let mut windows: Vec<ReleaseWindow> = guard(&self.windows)?.values().cloned().collect();
        windows.sort_by(|a, b| a.window_key.cmp(&b.window_key));
        Ok(windows)
    }
}

#[derive(Default)]
pub struct MemoryIterationStore {
    iterations: Mutex<HashMap<String, Iteration>>,
}

impl MemoryIterationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IterationStore for MemoryIterationStore {
    async fn save(&self, iteration: &Iteration) -> Result<()> {
        guard(&self.iterations)?.insert(iteration.iteration_key.clone(), iteration.clone());
        Ok(())
    }

    async fn find_by_key(&self, iteration_key: &str) -> Result<Option<Iteration>> {
        Ok(guard(&self.iterations)?.get(iteration_key).cloned())
    }
}

#[derive(Default)]
pub struct MemoryAttachmentStore {
    attachments: Mutex<HashMap<String, WindowIteration>>,
}

impl MemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttachmentStore for MemoryAttachmentStore {
    async fn save(&self, attachment: &WindowIteration) -> Result<()> {
        guard(&self.attachments)?.insert(attachment.id.clone(), attachment.clone());
        Ok(())
    }

    async fn remove(&self, attachment_id: &str) -> Result<bool> {
        Ok(guard(&self.attachments)?.remove(attachment_id).is_some())
    }

    async fn list_for_window(&self, window_id: Uuid) -> Result<Vec<WindowIteration>> {
        let mut list: Vec<WindowIteration> = guard(&self.attachments)?
            .values()
            .filter(|a| a.window_id == window_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.iteration_key.cmp(&b.iteration_key));
        Ok(list)
    }
}

#[derive(Default)]
pub struct MemoryRuleStore {
    rules: Mutex<HashMap<Uuid, BranchRule>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn save(&self, rule: &BranchRule) -> Result<()> {
        guard(&self.rules)?.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(guard(&self.rules)?.remove(&id).is_some())
    }

    async fn find(&self, id: Uuid) -> Result<Option<BranchRule>> {
        Ok(guard(&self.rules)?.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<BranchRule>> {
        let mut rules: Vec<BranchRule> = guard(&self.rules)?.values().cloned().collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rules)
    }
}

#[derive(Default)]
pub struct MemoryPolicyStore {
    policies: Mutex<HashMap<String, VersionPolicy>>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn save(&self, policy: &VersionPolicy) -> Result<()> {
        guard(&self.policies)?.insert(policy.name.clone(), policy.clone());
        Ok(())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<VersionPolicy>> {
        Ok(guard(&self.policies)?.get(name).cloned())
    }
}

#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<Uuid, Run>>,
    tasks: Mutex<HashMap<Uuid, RunTask>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save_run(&self, run: &Run) -> Result<()> {
        guard(&self.runs)?.insert(run.id, run.clone());
        Ok(())
    }

    async fn find_run(&self, run_id: Uuid) -> Result<Option<Run>> {
        Ok(guard(&self.runs)?.get(&run_id).cloned())
    }

    async fn save_tasks(&self, tasks: &[RunTask]) -> Result<()> {
        let mut map = guard(&self.tasks)?;
        for task in tasks {
            map.insert(task.id, task.clone());
        }
        Ok(())
    }

    async fn find_task(&self, task_id: Uuid) -> Result<Option<RunTask>> {
        Ok(guard(&self.tasks)?.get(&task_id).cloned())
    }

    async fn tasks_for_run(&self, run_id: Uuid) -> Result<Vec<RunTask>> {
        let mut tasks: Vec<RunTask> = guard(&self.tasks)?
            .values()
            .filter(|t| t.run_id == run_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.task_order);
        Ok(tasks)
    }
}

/// In-memory release-branch records, keyed by (window, repo).
#[derive(Default)]
pub struct MemoryReleaseBranchStore {
    branches: Mutex<HashMap<(String, String), String>>,
}

impl MemoryReleaseBranchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, window_key: &str, repo: &str, branch: &str) {
        if let Ok(mut map) = self.branches.lock() {
            map.insert(
                (window_key.to_string(), repo.to_string()),
                branch.to_string(),
            );
        }
    }
}

#[async_trait]
impl ReleaseBranchLookup for MemoryReleaseBranchStore {
    async fn release_branch(&self, window_key: &str, repo: &str) -> Result<Option<String>> {
        Ok(guard(&self.branches)?
            .get(&(window_key.to_string(), repo.to_string()))
            .cloned())
    }
}

/// In-memory version records, keyed by (window, repo).
#[derive(Default)]
pub struct MemoryVersionStore {
    versions: Mutex<HashMap<(String, String), VersionInfo>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, window_key: &str, repo: &str, info: VersionInfo) {
        if let Ok(mut map) = self.versions.lock() {
            map.insert((window_key.to_string(), repo.to_string()), info);
        }
    }
}

#[async_trait]
impl VersionLookup for MemoryVersionStore {
    async fn version_info(&self, window_key: &str, repo: &str) -> Result<Option<VersionInfo>> {
        Ok(guard(&self.versions)?
            .get(&(window_key.to_string(), repo.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{TimeZone, Utc};

    fn clock() -> FixedClock {
        FixedClock::at(Utc.with_ymd_and_hms(2025, 8, 4, 10, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_window_round_trips_with_version_counter() {
        let clock = clock();
        let store = MemoryWindowStore::new();
        let mut window = ReleaseWindow::new("2025-08-rc", "August", &clock).unwrap();
        window.publish(&clock).unwrap();
        store.save(&window).await.unwrap();

        let loaded = store.find_by_key("2025-08-rc").await.unwrap().unwrap();
        assert_eq!(loaded.version, window.version);
        assert_eq!(loaded.status, window.status);
        assert!(store.find_by_key("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_attachment_replace_and_remove() {
        let clock = clock();
        let store = MemoryAttachmentStore::new();
        let window_id = Uuid::new_v4();

        let first = WindowIteration::new(window_id, "ITER-1", &clock);
        store.save(&first).await.unwrap();
        clock.advance_secs(60);
        let second = WindowIteration::new(window_id, "ITER-1", &clock);
        store.save(&second).await.unwrap();

        // Re-attach replaced the record rather than duplicating it
        let list = store.list_for_window(window_id).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].attached_at, second.attached_at);

        assert!(store.remove(&first.id).await.unwrap());
        assert!(!store.remove(&first.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_tasks_sorted_by_order() {
        use crate::run::task::{RunTask, TaskTarget};
        use crate::run::TaskKind;

        let store = MemoryRunStore::new();
        let run_id = Uuid::new_v4();
        let t2 = RunTask::new(
            run_id,
            TaskKind::CreateTag,
            2,
            TaskTarget::Repository("b".into()),
            3,
        );
        let t0 = RunTask::new(
            run_id,
            TaskKind::MergeFeature,
            0,
            TaskTarget::Repository("a".into()),
            3,
        );
        store.save_tasks(&[t2, t0]).await.unwrap();

        let tasks = store.tasks_for_run(run_id).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].task_order, 0);
        assert_eq!(tasks[1].task_order, 2);
        // Tasks of other runs do not leak
        assert!(store.tasks_for_run(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookups_miss_cleanly() {
        let branches = MemoryReleaseBranchStore::new();
        assert!(branches
            .release_branch("2025-08-rc", "group/app")
            .await
            .unwrap()
            .is_none());
        branches.set("2025-08-rc", "group/app", "release/1.4.0");
        assert_eq!(
            branches
                .release_branch("2025-08-rc", "group/app")
                .await
                .unwrap()
                .as_deref(),
            Some("release/1.4.0")
        );

        let versions = MemoryVersionStore::new();
        assert!(versions
            .version_info("2025-08-rc", "group/app")
            .await
            .unwrap()
            .is_none());
    }
}
