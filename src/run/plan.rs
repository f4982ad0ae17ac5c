//! Plan expansion: (window × iterations × repos) → ordered tasks.
//!
//! One task per (target, kind) the release recipe requires, with
//! `task_order` assigned monotonically in recipe order. Tasks for different
//! repositories carry no ordering dependency; tasks for the same target run
//! strictly in `task_order` (the executor enforces this).

use crate::clock::Clock;
use crate::errors::{CoreError, Result};
use crate::iteration::Iteration;
use crate::run::task::{RunTask, TaskTarget};
use crate::run::{Run, RunItem, RunType, TaskKind};
use crate::settings::OrchestratorSettings;
use crate::window::{ReleaseWindow, WindowStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A run record plus the ordered tasks that will drive it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPlan {
    pub run: Run,
    pub tasks: Vec<RunTask>,
}

/// Expand a window's attached iterations into a run plan.
///
/// The recipe per repository is: merge feature→release, tag, and (when
/// configured) merge release→default branch; each iteration closes with a
/// branch-archival task once its repositories are done.
pub fn build_plan(
    window: &ReleaseWindow,
    iterations: &[Iteration],
    settings: &OrchestratorSettings,
    clock: &dyn Clock,
) -> Result<RunPlan> {
    match window.status {
        WindowStatus::Published | WindowStatus::Released => {}
        other => {
            return Err(CoreError::invalid_state(
                "release_window",
                other,
                "orchestrate",
            ))
        }
    }
    if iterations.is_empty() {
        return Err(CoreError::validation(
            "iterations",
            "window has no attached iterations",
        ));
    }

    let mut run = Run::new(RunType::Release, &window.window_key, clock.now());
    let mut tasks = Vec::new();
    let mut planned_order = 0u32;
    let mut task_order = 0u32;
    let mut seen_repos: HashSet<&str> = HashSet::new();

    let mut sorted: Vec<&Iteration> = iterations.iter().collect();
    sorted.sort_by(|a, b| a.iteration_key.cmp(&b.iteration_key));

    for iteration in sorted {
        for repo in &iteration.repos {
            if !seen_repos.insert(repo.as_str()) {
                return Err(CoreError::validation(
                    "repos",
                    format!("repository {} appears in more than one iteration", repo),
                ));
            }
            run.items.push(RunItem::new(
                &window.window_key,
                repo,
                Some(&iteration.iteration_key),
                planned_order,
            ));
            planned_order += 1;

            let mut kinds = vec![TaskKind::MergeFeature, TaskKind::CreateTag];
            if settings.merge_to_default {
                kinds.push(TaskKind::MergeToDefault);
            }
            for kind in kinds {
                tasks.push(RunTask::new(
                    run.id,
                    kind,
                    task_order,
                    TaskTarget::Repository(repo.clone()),
                    settings.default_max_retries,
                ));
                task_order += 1;
            }
        }

        tasks.push(RunTask::new(
            run.id,
            TaskKind::CloseIteration,
            task_order,
            TaskTarget::Iteration(iteration.iteration_key.clone()),
            settings.default_max_retries,
        ));
        task_order += 1;
    }

    Ok(RunPlan { run, tasks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{TimeZone, Utc};

    fn clock() -> FixedClock {
        FixedClock::at(Utc.with_ymd_and_hms(2025, 8, 4, 10, 0, 0).unwrap())
    }

    fn published_window(clock: &FixedClock) -> ReleaseWindow {
        let mut w = ReleaseWindow::new("2025-08-rc", "August", clock).unwrap();
        w.publish(clock).unwrap();
        w
    }

    fn iteration(clock: &FixedClock, key: &str, repos: &[&str]) -> Iteration {
        Iteration::new(
            key,
            "work",
            repos.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
            clock,
        )
        .unwrap()
    }

    #[test]
    fn test_plan_shape_for_two_repos() {
        let clock = clock();
        let window = published_window(&clock);
        let iterations = vec![iteration(&clock, "ITER-1", &["group/api", "group/web"])];
        let settings = OrchestratorSettings::default();

        let plan = build_plan(&window, &iterations, &settings, &clock).unwrap();
        assert_eq!(plan.run.items.len(), 2);
        // merge+tag per repo, then one close task for the iteration
        assert_eq!(plan.tasks.len(), 5);
        assert_eq!(plan.tasks[0].kind, TaskKind::MergeFeature);
        assert_eq!(plan.tasks[1].kind, TaskKind::CreateTag);
        assert_eq!(plan.tasks[4].kind, TaskKind::CloseIteration);

        // task_order is strictly monotonic in recipe order
        let orders: Vec<u32> = plan.tasks.iter().map(|t| t.task_order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_merge_to_default_extends_the_recipe() {
        let clock = clock();
        let window = published_window(&clock);
        let iterations = vec![iteration(&clock, "ITER-1", &["group/api"])];
        let settings = OrchestratorSettings {
            merge_to_default: true,
            ..Default::default()
        };

        let plan = build_plan(&window, &iterations, &settings, &clock).unwrap();
        let kinds: Vec<TaskKind> = plan.tasks.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TaskKind::MergeFeature,
                TaskKind::CreateTag,
                TaskKind::MergeToDefault,
                TaskKind::CloseIteration,
            ]
        );
    }

    #[test]
    fn test_plan_requires_published_window() {
        let clock = clock();
        let window = ReleaseWindow::new("2025-08-rc", "August", &clock).unwrap();
        let iterations = vec![iteration(&clock, "ITER-1", &["group/api"])];
        let err = build_plan(
            &window,
            &iterations,
            &OrchestratorSettings::default(),
            &clock,
        )
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[test]
    fn test_plan_rejects_empty_iterations() {
        let clock = clock();
        let window = published_window(&clock);
        let err = build_plan(&window, &[], &OrchestratorSettings::default(), &clock).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn test_plan_rejects_repo_in_two_iterations() {
        let clock = clock();
        let window = published_window(&clock);
        let iterations = vec![
            iteration(&clock, "ITER-1", &["group/api"]),
            iteration(&clock, "ITER-2", &["group/api"]),
        ];
        let err = build_plan(
            &window,
            &iterations,
            &OrchestratorSettings::default(),
            &clock,
        )
        .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn test_iterations_expand_in_key_order() {
        let clock = clock();
        let window = published_window(&clock);
        let iterations = vec![
            iteration(&clock, "ITER-9", &["group/z"]),
            iteration(&clock, "ITER-1", &["group/a"]),
        ];
        let plan = build_plan(
            &window,
            &iterations,
            &OrchestratorSettings::default(),
            &clock,
        )
        .unwrap();
        assert_eq!(plan.run.items[0].iteration_key.as_deref(), Some("ITER-1"));
        assert_eq!(plan.run.items[1].iteration_key.as_deref(), Some("ITER-9"));
    }
}
