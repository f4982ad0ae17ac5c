//! Task context resolution.
//!
//! Given a task, reconstruct the window/iteration/repo/branch/version
//! context its Git action needs. Resolution degrades rather than fails:
//! a missing release branch or version record leaves those fields empty,
//! and a missing run or item yields `None` — the calling task decides what
//! is fatal for its action type.

use crate::errors::Result;
use crate::run::task::{RunTask, TaskTarget};
use crate::settings::NamingSettings;
use crate::store::{ReleaseBranchLookup, RunStore, VersionLookup};
use std::sync::Arc;
use tracing::debug;

/// Everything a task execution may need. Optional fields stay `None` when
/// the corresponding lookup missed.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub window_key: String,
    pub repo: String,
    pub iteration_key: Option<String>,
    pub release_branch: Option<String>,
    pub feature_branch: Option<String>,
    pub base_version: Option<String>,
    pub dev_version: Option<String>,
    pub target_version: Option<String>,
}

pub struct ContextResolver {
    runs: Arc<dyn RunStore>,
    release_branches: Arc<dyn ReleaseBranchLookup>,
    versions: Arc<dyn VersionLookup>,
    naming: NamingSettings,
}

impl ContextResolver {
    pub fn new(
        runs: Arc<dyn RunStore>,
        release_branches: Arc<dyn ReleaseBranchLookup>,
        versions: Arc<dyn VersionLookup>,
        naming: NamingSettings,
    ) -> Self {
        Self {
            runs,
            release_branches,
            versions,
            naming,
        }
    }

    /// Resolve the execution context for a task. `None` means no run or no
    /// matching item exists — the caller skips or fails the task explicitly.
    pub async fn resolve(&self, task: &RunTask) -> Result<Option<TaskContext>> {
        let Some(run) = self.runs.find_run(task.run_id).await? else {
            debug!(task = %task.id, "no run for task");
            return Ok(None);
        };

        let item = match &task.target {
            TaskTarget::Repository(repo) => run.items.iter().find(|i| &i.repo == repo),
            TaskTarget::Iteration(key) => run
                .items
                .iter()
                .find(|i| i.iteration_key.as_deref() == Some(key.as_str())),
        };
        let Some(item) = item else {
            debug!(task = %task.id, target = %task.target, "no matching run item");
            return Ok(None);
        };

        let feature_branch = item
            .iteration_key
            .as_deref()
            .map(|key| self.naming.feature_branch(key));

        // Both lookups are independently optional
        let release_branch = self
            .release_branches
            .release_branch(&run.window_key, &item.repo)
            .await?;
        let versions = self
            .versions
            .version_info(&run.window_key, &item.repo)
            .await?;

        Ok(Some(TaskContext {
            window_key: run.window_key.clone(),
            repo: item.repo.clone(),
            iteration_key: item.iteration_key.clone(),
            release_branch,
            feature_branch,
            base_version: versions.as_ref().map(|v| v.base_version.clone()),
            dev_version: versions.as_ref().map(|v| v.dev_version.clone()),
            target_version: versions.map(|v| v.target_version),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::task::TaskTarget;
    use crate::run::{Run, RunItem, RunType, TaskKind};
    use crate::store::{
        MemoryReleaseBranchStore, MemoryRunStore, MemoryVersionStore, VersionInfo,
    };
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    struct Fixture {
        resolver: ContextResolver,
        runs: Arc<MemoryRunStore>,
        branches: Arc<MemoryReleaseBranchStore>,
        versions: Arc<MemoryVersionStore>,
    }

    fn fixture() -> Fixture {
        let runs = Arc::new(MemoryRunStore::new());
        let branches = Arc::new(MemoryReleaseBranchStore::new());
        let versions = Arc::new(MemoryVersionStore::new());
        let resolver = ContextResolver::new(
            runs.clone(),
            branches.clone(),
            versions.clone(),
            NamingSettings::default(),
        );
        Fixture {
            resolver,
            runs,
            branches,
            versions,
        }
    }

    async fn seed_run(fixture: &Fixture) -> Run {
        let started = Utc.with_ymd_and_hms(2025, 8, 4, 10, 0, 0).unwrap();
        let mut run = Run::new(RunType::Release, "2025-08-rc", started);
        run.items
            .push(RunItem::new("2025-08-rc", "group/app", Some("ITER-1"), 0));
        fixture.runs.save_run(&run).await.unwrap();
        run
    }

    fn repo_task(run_id: Uuid) -> RunTask {
        RunTask::new(
            run_id,
            TaskKind::MergeFeature,
            0,
            TaskTarget::Repository("group/app".to_string()),
            3,
        )
    }

    #[tokio::test]
    async fn test_missing_run_resolves_to_none() {
        let fixture = fixture();
        let task = repo_task(Uuid::new_v4());
        assert!(fixture.resolver.resolve(&task).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_item_resolves_to_none() {
        let fixture = fixture();
        let run = seed_run(&fixture).await;
        let task = RunTask::new(
            run.id,
            TaskKind::MergeFeature,
            0,
            TaskTarget::Repository("group/other".to_string()),
            3,
        );
        assert!(fixture.resolver.resolve(&task).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_full_context_when_lookups_hit() {
        let fixture = fixture();
        let run = seed_run(&fixture).await;
        fixture
            .branches
            .set("2025-08-rc", "group/app", "release/1.4.0");
        fixture.versions.set(
            "2025-08-rc",
            "group/app",
            VersionInfo {
                base_version: "1.3.0".to_string(),
                dev_version: "1.4.0-dev".to_string(),
                target_version: "1.4.0".to_string(),
            },
        );

        let ctx = fixture
            .resolver
            .resolve(&repo_task(run.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.window_key, "2025-08-rc");
        assert_eq!(ctx.repo, "group/app");
        assert_eq!(ctx.feature_branch.as_deref(), Some("feature/ITER-1"));
        assert_eq!(ctx.release_branch.as_deref(), Some("release/1.4.0"));
        assert_eq!(ctx.base_version.as_deref(), Some("1.3.0"));
        assert_eq!(ctx.target_version.as_deref(), Some("1.4.0"));
    }

    #[tokio::test]
    async fn test_lookup_misses_degrade_instead_of_failing() {
        let fixture = fixture();
        let run = seed_run(&fixture).await;

        let ctx = fixture
            .resolver
            .resolve(&repo_task(run.id))
            .await
            .unwrap()
            .unwrap();
        assert!(ctx.release_branch.is_none());
        assert!(ctx.base_version.is_none());
        // The derivable parts are still present
        assert_eq!(ctx.feature_branch.as_deref(), Some("feature/ITER-1"));
    }

    #[tokio::test]
    async fn test_iteration_target_matches_by_key() {
        let fixture = fixture();
        let run = seed_run(&fixture).await;
        let task = RunTask::new(
            run.id,
            TaskKind::CloseIteration,
            1,
            TaskTarget::Iteration("ITER-1".to_string()),
            3,
        );
        let ctx = fixture.resolver.resolve(&task).await.unwrap().unwrap();
        assert_eq!(ctx.iteration_key.as_deref(), Some("ITER-1"));
        assert_eq!(ctx.repo, "group/app");
    }
}
