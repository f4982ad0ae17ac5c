//! Iterations and their attachment to release windows.
//!
//! An iteration is a unit of development work spanning one or more
//! repositories. Its repository set is fixed at creation. Attachment to a
//! window is recorded as a [`WindowIteration`] with a deterministic identity,
//! which makes attach/detach idempotent: re-attaching the same pair replaces
//! the prior record.

use crate::clock::Clock;
use crate::errors::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

const MAX_KEY_LEN: usize = 64;

/// A unit of development work tied to a set of repositories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    pub id: Uuid,
    /// Unique business key, e.g. `ITER-142`
    pub iteration_key: String,
    pub description: String,
    /// Repository identifiers; deduplicated, order-irrelevant
    pub repos: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl Iteration {
    pub fn new(
        iteration_key: &str,
        description: &str,
        repos: impl IntoIterator<Item = String>,
        clock: &dyn Clock,
    ) -> Result<Self> {
        if iteration_key.is_empty() || iteration_key.len() > MAX_KEY_LEN {
            return Err(CoreError::validation(
                "iteration_key",
                format!("must be 1..={} characters", MAX_KEY_LEN),
            ));
        }
        let repos: BTreeSet<String> = repos.into_iter().filter(|r| !r.is_empty()).collect();
        if repos.is_empty() {
            return Err(CoreError::validation(
                "repos",
                "an iteration needs at least one repository",
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            iteration_key: iteration_key.to_string(),
            description: description.to_string(),
            repos,
            created_at: clock.now(),
        })
    }
}

/// Attachment of an iteration to a window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowIteration {
    /// Deterministic identity: `{window_id}::{iteration_key}`
    pub id: String,
    pub window_id: Uuid,
    pub iteration_key: String,
    pub attached_at: DateTime<Utc>,
}

impl WindowIteration {
    /// The deterministic attachment id for a (window, iteration) pair.
    pub fn attachment_id(window_id: Uuid, iteration_key: &str) -> String {
        format!("{}::{}", window_id, iteration_key)
    }

    pub fn new(window_id: Uuid, iteration_key: &str, clock: &dyn Clock) -> Self {
        Self {
            id: Self::attachment_id(window_id, iteration_key),
            window_id,
            iteration_key: iteration_key.to_string(),
            attached_at: clock.now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::TimeZone;

    fn clock() -> FixedClock {
        FixedClock::at(Utc.with_ymd_and_hms(2025, 8, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_iteration_dedups_repos() {
        let clock = clock();
        let iter = Iteration::new(
            "ITER-1",
            "payment flow",
            vec![
                "group/billing".to_string(),
                "group/api".to_string(),
                "group/billing".to_string(),
            ],
            &clock,
        )
        .unwrap();
        assert_eq!(iter.repos.len(), 2);
        assert!(iter.repos.contains("group/billing"));
    }

    #[test]
    fn test_iteration_rejects_empty_key() {
        let clock = clock();
        let err = Iteration::new("", "x", vec!["r".to_string()], &clock).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn test_iteration_requires_a_repo() {
        let clock = clock();
        let err = Iteration::new("ITER-1", "x", Vec::new(), &clock).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
        // Empty repo names are filtered before the check
        let err = Iteration::new("ITER-1", "x", vec![String::new()], &clock).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn test_attachment_id_is_deterministic() {
        let clock = clock();
        let window_id = Uuid::new_v4();
        let a = WindowIteration::new(window_id, "ITER-1", &clock);
        let b = WindowIteration::new(window_id, "ITER-1", &clock);
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, format!("{}::ITER-1", window_id));
    }
}
