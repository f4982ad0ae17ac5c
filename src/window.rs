//! Release windows and their lifecycle state machine.
//!
//! A window is created in `Draft`, moves forward through
//! `Published` → `Released` → `Closed`, and is never deleted. The `frozen`
//! flag is orthogonal to status and blocks destructive plan changes while
//! set. Every successful transition stamps `updated_at` and bumps the
//! optimistic-concurrency `version`.

use crate::clock::Clock;
use crate::errors::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a release window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    #[default]
    Draft,
    Published,
    Released,
    Closed,
}

impl WindowStatus {
    /// Closed windows accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether the window has been published at some point.
    pub fn reached_published(&self) -> bool {
        !matches!(self, Self::Draft)
    }
}

impl std::fmt::Display for WindowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowStatus::Draft => write!(f, "draft"),
            WindowStatus::Published => write!(f, "published"),
            WindowStatus::Released => write!(f, "released"),
            WindowStatus::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for WindowStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(WindowStatus::Draft),
            "published" => Ok(WindowStatus::Published),
            "released" => Ok(WindowStatus::Released),
            "closed" => Ok(WindowStatus::Closed),
            _ => Err(CoreError::validation(
                "status",
                format!("unknown window status '{}'", s),
            )),
        }
    }
}

/// A named, time-boxed container coordinating a multi-repo release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseWindow {
    pub id: Uuid,
    /// Unique business key, e.g. `2025-08-sprint-3`
    pub window_key: String,
    pub name: String,
    pub status: WindowStatus,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    /// Blocks destructive plan changes while set; orthogonal to status
    pub frozen: bool,
    /// Set exactly once, on publish
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency counter, bumped on every successful transition
    pub version: u64,
}

const ENTITY: &str = "release_window";
const MAX_KEY_LEN: usize = 64;
const MAX_NAME_LEN: usize = 128;

impl ReleaseWindow {
    pub fn new(window_key: &str, name: &str, clock: &dyn Clock) -> Result<Self> {
        if window_key.is_empty() || window_key.len() > MAX_KEY_LEN {
            return Err(CoreError::validation(
                "window_key",
                format!("must be 1..={} characters", MAX_KEY_LEN),
            ));
        }
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(CoreError::validation(
                "name",
                format!("must be 1..={} characters", MAX_NAME_LEN),
            ));
        }
        let now = clock.now();
        Ok(Self {
            id: Uuid::new_v4(),
            window_key: window_key.to_string(),
            name: name.to_string(),
            status: WindowStatus::Draft,
            start_at: None,
            end_at: None,
            frozen: false,
            published_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// Set the window's time range. Allowed in any non-closed state.
    pub fn configure(
        &mut self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        clock: &dyn Clock,
    ) -> Result<()> {
        if self.status.is_terminal() {
            return Err(CoreError::invalid_state(ENTITY, self.status, "configure"));
        }
        if end_at <= start_at {
            return Err(CoreError::validation(
                "end_at",
                "must be strictly after start_at",
            ));
        }
        self.start_at = Some(start_at);
        self.end_at = Some(end_at);
        self.touch(clock);
        Ok(())
    }

    /// Set the freeze flag. Freezing an already-frozen window is a no-op.
    pub fn freeze(&mut self, clock: &dyn Clock) {
        if !self.frozen {
            self.frozen = true;
            self.touch(clock);
        }
    }

    /// Clear the freeze flag. Unfreezing an unfrozen window is a no-op.
    pub fn unfreeze(&mut self, clock: &dyn Clock) {
        if self.frozen {
            self.frozen = false;
            self.touch(clock);
        }
    }

    /// Draft → Published. Stamps `published_at` exactly once.
    pub fn publish(&mut self, clock: &dyn Clock) -> Result<()> {
        if self.status != WindowStatus::Draft {
            return Err(CoreError::invalid_state(ENTITY, self.status, "publish"));
        }
        self.status = WindowStatus::Published;
        self.published_at = Some(clock.now());
        self.touch(clock);
        Ok(())
    }

    /// Published → Released.
    pub fn release(&mut self, clock: &dyn Clock) -> Result<()> {
        if self.status != WindowStatus::Published {
            return Err(CoreError::invalid_state(ENTITY, self.status, "release"));
        }
        self.status = WindowStatus::Released;
        self.touch(clock);
        Ok(())
    }

    /// Released → Closed. Closing an already-closed window succeeds without
    /// touching `updated_at` or `version`.
    pub fn close(&mut self, clock: &dyn Clock) -> Result<()> {
        match self.status {
            WindowStatus::Closed => Ok(()),
            WindowStatus::Released => {
                self.status = WindowStatus::Closed;
                self.touch(clock);
                Ok(())
            }
            other => Err(CoreError::invalid_state(ENTITY, other, "close")),
        }
    }

    fn touch(&mut self, clock: &dyn Clock) {
        self.updated_at = clock.now();
        self.version += 1;
    }
}
