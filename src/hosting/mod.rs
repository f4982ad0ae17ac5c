//! Git hosting boundary.
//!
//! All repository mutation goes through [`GitHostingPort`]; the engine never
//! touches Git object storage itself. A merge conflict is a first-class
//! typed outcome, not an error — only transport/API/timeout failures are
//! errors, and those are recorded on the owning task rather than propagated.

pub mod gitlab;
pub mod local;

use crate::errors::HostingError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Result of a merge attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeOutcome {
    Success,
    /// The merge produced conflicts; `info` names the conflicting paths or
    /// the hosting system's conflict description.
    Conflict { info: String },
    /// The hosting system refused or failed the merge for another reason.
    Failed { error: String },
}

impl MergeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Operations the orchestrator requires from the Git hosting system.
///
/// `repo` is the hosting system's repository identifier (a project path for
/// REST adapters, a directory for the local adapter).
#[async_trait]
pub trait GitHostingPort: Send + Sync {
    async fn branch_exists(&self, repo: &str, branch: &str) -> Result<bool, HostingError>;

    /// Create `name` from `source`. Returns `false` when the branch already
    /// exists.
    async fn create_branch(
        &self,
        repo: &str,
        name: &str,
        source: &str,
    ) -> Result<bool, HostingError>;

    async fn merge_branch(
        &self,
        repo: &str,
        source: &str,
        target: &str,
        message: &str,
    ) -> Result<MergeOutcome, HostingError>;

    /// Rename `name` to `archive/<reason>/<name>`. Returns `false` without
    /// error when the source branch does not exist, so repeat archiving is
    /// idempotent.
    async fn archive_branch(
        &self,
        repo: &str,
        name: &str,
        reason: &str,
    ) -> Result<bool, HostingError>;

    /// Tag `reference`. Returns `false` when the tag already exists.
    async fn create_tag(
        &self,
        repo: &str,
        tag: &str,
        reference: &str,
        message: &str,
    ) -> Result<bool, HostingError>;

    /// Read a file's content at `reference`, or `None` when absent. Used for
    /// repository-declared version manifests.
    async fn read_file(
        &self,
        repo: &str,
        path: &str,
        reference: &str,
    ) -> Result<Option<String>, HostingError>;

    async fn file_exists(&self, repo: &str, path: &str, reference: &str)
        -> Result<bool, HostingError>;
}

/// The archive ref name used by every adapter.
pub fn archive_ref(reason: &str, name: &str) -> String {
    format!("archive/{}/{}", reason, name)
}

/// Bound a hosting call by the configured timeout. A timeout is an external
/// failure like any other: it lands on the task and counts against retries.
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, HostingError>
where
    F: Future<Output = Result<T, HostingError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(HostingError::Timeout {
            seconds: timeout.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_ref_layout() {
        assert_eq!(
            archive_ref("2025-08-rc", "feature/ITER-1"),
            "archive/2025-08-rc/feature/ITER-1"
        );
    }

    #[test]
    fn test_merge_outcome_serialization() {
        let json = serde_json::to_string(&MergeOutcome::Conflict {
            info: "src/lib.rs".to_string(),
        })
        .unwrap();
        assert!(json.contains("conflict"));
        assert!(json.contains("src/lib.rs"));
    }

    #[tokio::test]
    async fn test_bounded_passes_through_fast_calls() {
        let result = bounded(Duration::from_secs(5), async { Ok::<_, HostingError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_bounded_times_out_slow_calls() {
        let result = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, HostingError>(())
        })
        .await;
        assert!(matches!(result, Err(HostingError::Timeout { .. })));
    }
}
