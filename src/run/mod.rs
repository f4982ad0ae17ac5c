//! Run records: the audit trail of one orchestration execution.
//!
//! A run owns its items and tasks. Items are the per-(repo, iteration)
//! slices carrying append-only step records; tasks are the schedulable
//! units in `task.rs`. Steps are appended in real completion order, which
//! is why `executed_order` exists alongside `planned_order`.

pub mod context;
pub mod executor;
pub mod export;
pub mod plan;
pub mod task;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The Git action a task/step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Merge the iteration's feature branch into the release branch
    MergeFeature,
    /// Tag the release branch at the target version
    CreateTag,
    /// Merge the release branch back into the default branch
    MergeToDefault,
    /// Archive the iteration's feature branches
    CloseIteration,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::MergeFeature => write!(f, "merge_feature"),
            TaskKind::CreateTag => write!(f, "create_tag"),
            TaskKind::MergeToDefault => write!(f, "merge_to_default"),
            TaskKind::CloseIteration => write!(f, "close_iteration"),
        }
    }
}

/// Outcome of a single step or of a whole item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResult {
    Success,
    Conflict,
    Failed,
    Skipped,
}

impl StepResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Severity ordering used to conclude an item from its steps: any
    /// failure outweighs a conflict, which outweighs skips and successes.
    fn severity(&self) -> u8 {
        match self {
            StepResult::Failed => 3,
            StepResult::Conflict => 2,
            StepResult::Skipped => 1,
            StepResult::Success => 0,
        }
    }
}

impl std::fmt::Display for StepResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepResult::Success => write!(f, "success"),
            StepResult::Conflict => write!(f, "conflict"),
            StepResult::Failed => write!(f, "failed"),
            StepResult::Skipped => write!(f, "skipped"),
        }
    }
}

/// One execution attempt, recorded on the owning item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStep {
    pub action: TaskKind,
    pub result: StepResult,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub message: String,
}

/// The per-(repo, iteration) slice of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunItem {
    pub window_key: String,
    pub repo: String,
    pub iteration_key: Option<String>,
    pub planned_order: u32,
    /// Actual completion sequence; differs from `planned_order` when
    /// independent repos finish out of order
    pub executed_order: Option<u32>,
    pub final_result: Option<StepResult>,
    pub steps: Vec<RunStep>,
}

impl RunItem {
    pub fn new(
        window_key: &str,
        repo: &str,
        iteration_key: Option<&str>,
        planned_order: u32,
    ) -> Self {
        Self {
            window_key: window_key.to_string(),
            repo: repo.to_string(),
            iteration_key: iteration_key.map(str::to_string),
            planned_order,
            executed_order: None,
            final_result: None,
            steps: Vec::new(),
        }
    }

    /// Append an audit step. Steps are never rewritten.
    pub fn record_step(&mut self, step: RunStep) {
        self.steps.push(step);
    }

    /// Conclude the item from its recorded steps: the latest step per
    /// action decides (earlier attempts stay in the audit trail but a
    /// successful retry supersedes them), and the worst of those wins. An
    /// item with no steps at all (every task skipped before execution)
    /// concludes as skipped.
    pub fn conclude(&mut self) {
        let mut latest: std::collections::HashMap<TaskKind, StepResult> =
            std::collections::HashMap::new();
        for step in &self.steps {
            latest.insert(step.action, step.result);
        }
        let worst = latest.values().copied().max_by_key(|r| r.severity());
        self.final_result = Some(worst.unwrap_or(StepResult::Skipped));
    }
}

/// What kind of execution a run was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    /// Full orchestration of a window's plan
    Release,
    /// Re-execution of previously failed tasks
    Retry,
}

/// One execution of the orchestration plan for a window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub run_type: RunType,
    pub window_key: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub items: Vec<RunItem>,
}

impl Run {
    pub fn new(run_type: RunType, window_key: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_type,
            window_key: window_key.to_string(),
            started_at,
            finished_at: None,
            items: Vec::new(),
        }
    }

    pub fn item_for_repo_mut(&mut self, repo: &str) -> Option<&mut RunItem> {
        self.items.iter_mut().find(|i| i.repo == repo)
    }

    pub fn item_for_iteration_mut(&mut self, iteration_key: &str) -> Option<&mut RunItem> {
        self.items
            .iter_mut()
            .find(|i| i.iteration_key.as_deref() == Some(iteration_key))
    }

    /// A run with any failed or conflicted item is partially failed. It is
    /// never reported successful while failures exist.
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total_items: self.items.len(),
            ..Default::default()
        };
        for item in &self.items {
            match item.final_result {
                Some(StepResult::Success) => summary.succeeded += 1,
                Some(StepResult::Conflict) | Some(StepResult::Failed) => summary.failed += 1,
                Some(StepResult::Skipped) => summary.skipped += 1,
                None => summary.pending += 1,
            }
        }
        summary
    }
}

/// Aggregated item results for operator review.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_items: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
}

impl RunSummary {
    pub fn all_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.pending == 0
    }

    pub fn partially_failed(&self) -> bool {
        self.failed > 0
    }
}
