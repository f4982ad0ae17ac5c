//! Version policies: derivation and validation of release version strings.
//!
//! A policy names a scheme and a bump rule. Derivation is a pure function of
//! the policy and the current version (plus the clock, for the date scheme).

use crate::clock::Clock;
use crate::errors::{CoreError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use uuid::Uuid;

static SEMVER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.(\d+)\.(\d+)(?:-([0-9A-Za-z.-]+))?(?:\+([0-9A-Za-z.-]+))?$")
        .expect("semver pattern compiles")
});

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}\.\d{2}\.\d{2}$").expect("date pattern compiles"));

/// Versioning scheme of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionScheme {
    Semver,
    Date,
    Custom,
}

/// Which component a semver policy increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BumpRule {
    Major,
    Minor,
    Patch,
    None,
}

/// A named version-derivation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionPolicy {
    pub id: Uuid,
    pub name: String,
    pub scheme: VersionScheme,
    pub bump: BumpRule,
}

impl VersionPolicy {
    pub fn new(name: &str, scheme: VersionScheme, bump: BumpRule) -> Result<Self> {
        if name.is_empty() {
            return Err(CoreError::validation("name", "must not be empty"));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            scheme,
            bump,
        })
    }

    /// Derive the next version from the current one.
    ///
    /// Semver applies the bump rule and drops any pre-release/build
    /// metadata from the result. Date ignores `current` and formats the
    /// clock's today (UTC) as `YYYY.MM.DD`. Custom derivation is
    /// unsupported.
    pub fn derive_next(&self, current: &str, clock: &dyn Clock) -> Result<String> {
        match self.scheme {
            VersionScheme::Semver => {
                let caps = SEMVER_RE.captures(current).ok_or_else(|| {
                    CoreError::validation(
                        "version",
                        format!("'{}' is not MAJOR.MINOR.PATCH", current),
                    )
                })?;
                // Captures 1..=3 are guaranteed digits by the pattern
                let major: u64 = caps[1].parse().map_err(|_| {
                    CoreError::validation("version", "major component out of range")
                })?;
                let minor: u64 = caps[2].parse().map_err(|_| {
                    CoreError::validation("version", "minor component out of range")
                })?;
                let patch: u64 = caps[3].parse().map_err(|_| {
                    CoreError::validation("version", "patch component out of range")
                })?;

                Ok(match self.bump {
                    BumpRule::Major => format!("{}.0.0", major + 1),
                    BumpRule::Minor => format!("{}.{}.0", major, minor + 1),
                    BumpRule::Patch => format!("{}.{}.{}", major, minor, patch + 1),
                    BumpRule::None => current.to_string(),
                })
            }
            VersionScheme::Date => Ok(clock.now().format("%Y.%m.%d").to_string()),
            VersionScheme::Custom => Err(CoreError::Unsupported(
                "custom scheme derivation".to_string(),
            )),
        }
    }

    /// Check a version string against the policy's scheme. Custom policies
    /// accept everything.
    pub fn validate(&self, version: &str) -> bool {
        match self.scheme {
            VersionScheme::Semver => SEMVER_RE.is_match(version),
            VersionScheme::Date => DATE_RE.is_match(version),
            VersionScheme::Custom => true,
        }
    }
}
