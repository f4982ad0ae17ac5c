//! RunTask: the schedulable, retryable unit of orchestrated work.
//!
//! A task's lifecycle is strictly forward — Pending → Running → terminal —
//! except for the Pending re-entry performed by an explicit retry, which
//! keeps `retry_count` so the cap can never be bypassed.

use crate::clock::Clock;
use crate::errors::{CoreError, Result};
use crate::run::TaskKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a task operates on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum TaskTarget {
    Repository(String),
    Iteration(String),
}

impl TaskTarget {
    /// The target identity used for item matching and ordering.
    pub fn id(&self) -> &str {
        match self {
            TaskTarget::Repository(id) => id,
            TaskTarget::Iteration(key) => key,
        }
    }
}

impl std::fmt::Display for TaskTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskTarget::Repository(id) => write!(f, "repository:{}", id),
            TaskTarget::Iteration(key) => write!(f, "iteration:{}", key),
        }
    }
}

/// Execution status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// The unit the orchestrator schedules and retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTask {
    pub id: Uuid,
    pub run_id: Uuid,
    pub kind: TaskKind,
    /// Position in the plan; defines execution order within a target
    pub task_order: u32,
    pub target: TaskTarget,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

const ENTITY: &str = "run_task";

impl RunTask {
    pub fn new(
        run_id: Uuid,
        kind: TaskKind,
        task_order: u32,
        target: TaskTarget,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            kind,
            task_order,
            target,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries,
            started_at: None,
            finished_at: None,
            error_message: None,
        }
    }

    /// Pending → Running.
    pub fn start(&mut self, clock: &dyn Clock) -> Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(CoreError::invalid_state(ENTITY, self.status, "start"));
        }
        self.status = TaskStatus::Running;
        self.started_at = Some(clock.now());
        Ok(())
    }

    /// Running → Completed.
    pub fn mark_completed(&mut self, clock: &dyn Clock) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(CoreError::invalid_state(ENTITY, self.status, "complete"));
        }
        self.status = TaskStatus::Completed;
        self.finished_at = Some(clock.now());
        self.error_message = None;
        Ok(())
    }

    /// Running → Failed, capturing the failure message.
    pub fn mark_failed(&mut self, message: &str, clock: &dyn Clock) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(CoreError::invalid_state(ENTITY, self.status, "fail"));
        }
        self.status = TaskStatus::Failed;
        self.finished_at = Some(clock.now());
        self.error_message = Some(message.to_string());
        Ok(())
    }

    /// Pending → Skipped (the task never executed).
    pub fn mark_skipped(&mut self, clock: &dyn Clock) -> Result<()> {
        if self.status.is_terminal() || self.status == TaskStatus::Running {
            return Err(CoreError::invalid_state(ENTITY, self.status, "skip"));
        }
        self.status = TaskStatus::Skipped;
        self.finished_at = Some(clock.now());
        Ok(())
    }

    /// Whether another retry is allowed under the cap.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    /// Re-enter the execution path after a failure. Keeps `retry_count`.
    pub fn reset_for_retry(&mut self) -> Result<()> {
        if self.status != TaskStatus::Failed {
            return Err(CoreError::invalid_state(ENTITY, self.status, "retry"));
        }
        if !self.can_retry() {
            return Err(CoreError::validation(
                "retry_count",
                format!("retry cap of {} reached", self.max_retries),
            ));
        }
        self.increment_retry();
        self.status = TaskStatus::Pending;
        self.started_at = None;
        self.finished_at = None;
        Ok(())
    }

    /// Re-enter a skipped task into the execution path. A skip is not an
    /// attempt, so `retry_count` stays untouched; the task will skip again
    /// if its predecessor fails again.
    pub fn reactivate(&mut self) -> Result<()> {
        if self.status != TaskStatus::Skipped {
            return Err(CoreError::invalid_state(ENTITY, self.status, "reactivate"));
        }
        self.status = TaskStatus::Pending;
        self.finished_at = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::TimeZone;

    fn clock() -> FixedClock {
        FixedClock::at(Utc.with_ymd_and_hms(2025, 8, 4, 10, 0, 0).unwrap())
    }

    fn task(max_retries: u32) -> RunTask {
        RunTask::new(
            Uuid::new_v4(),
            TaskKind::MergeFeature,
            0,
            TaskTarget::Repository("group/app".to_string()),
            max_retries,
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let clock = clock();
        let mut t = task(3);
        t.start(&clock).unwrap();
        assert_eq!(t.status, TaskStatus::Running);
        assert!(t.started_at.is_some());
        t.mark_completed(&clock).unwrap();
        assert_eq!(t.status, TaskStatus::Completed);
        assert!(t.finished_at.is_some());
    }

    #[test]
    fn test_cannot_start_twice() {
        let clock = clock();
        let mut t = task(3);
        t.start(&clock).unwrap();
        assert_eq!(t.start(&clock).unwrap_err().code(), "INVALID_STATE");
    }

    #[test]
    fn test_failure_captures_message() {
        let clock = clock();
        let mut t = task(3);
        t.start(&clock).unwrap();
        t.mark_failed("merge conflict: src/lib.rs", &clock).unwrap();
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.error_message.as_deref(), Some("merge conflict: src/lib.rs"));
    }

    #[test]
    fn test_skip_only_from_pending() {
        let clock = clock();
        let mut t = task(3);
        t.mark_skipped(&clock).unwrap();
        assert_eq!(t.status, TaskStatus::Skipped);
        assert!(t.error_message.is_none());

        let mut running = task(3);
        running.start(&clock).unwrap();
        assert_eq!(running.mark_skipped(&clock).unwrap_err().code(), "INVALID_STATE");
    }

    #[test]
    fn test_retry_cap_arithmetic() {
        let mut t = task(3);
        assert!(t.can_retry());
        t.increment_retry();
        t.increment_retry();
        assert!(t.can_retry(), "after 2 of 3 retries the cap is not reached");
        t.increment_retry();
        assert!(!t.can_retry(), "after 3 of 3 retries the cap is reached");
    }

    #[test]
    fn test_reset_for_retry_keeps_count() {
        let clock = clock();
        let mut t = task(2);
        t.start(&clock).unwrap();
        t.mark_failed("boom", &clock).unwrap();

        t.reset_for_retry().unwrap();
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.retry_count, 1);
        assert!(t.started_at.is_none());

        t.start(&clock).unwrap();
        t.mark_failed("boom again", &clock).unwrap();
        t.reset_for_retry().unwrap();
        assert_eq!(t.retry_count, 2);

        t.start(&clock).unwrap();
        t.mark_failed("final", &clock).unwrap();
        let err = t.reset_for_retry().unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
        assert_eq!(t.status, TaskStatus::Failed, "exhausted task stays failed");
    }

    #[test]
    fn test_reset_requires_failed_status() {
        let mut t = task(3);
        assert_eq!(t.reset_for_retry().unwrap_err().code(), "INVALID_STATE");
    }

    #[test]
    fn test_reactivate_skipped_task_keeps_retry_count() {
        let clock = clock();
        let mut t = task(3);
        t.mark_skipped(&clock).unwrap();
        t.reactivate().unwrap();
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.retry_count, 0, "skips do not consume retries");
        assert!(t.finished_at.is_none());
        assert_eq!(t.reactivate().unwrap_err().code(), "INVALID_STATE");
    }

    #[test]
    fn test_target_id_and_display() {
        let repo = TaskTarget::Repository("group/app".to_string());
        assert_eq!(repo.id(), "group/app");
        assert_eq!(repo.to_string(), "repository:group/app");
        let iter = TaskTarget::Iteration("ITER-1".to_string());
        assert_eq!(iter.id(), "ITER-1");
    }
}
