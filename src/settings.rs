//! Unified configuration for the release engine.
//!
//! The observed deployment kept hosting credentials and naming templates as
//! process-wide mutable globals; here they are an explicit [`Settings`]
//! object injected into the engines that need them. Settings layer in the
//! order file → environment → caller overrides.
//!
//! # Configuration file format
//!
//! ```toml
//! [hosting]
//! base_url = "https://gitlab.example.com/api/v4"
//! token = "glpat-..."
//! call_timeout_secs = 30
//!
//! [naming]
//! feature_branch_template = "feature/{iteration}"
//! release_branch_template = "release/{version}"
//! tag_template = "v{version}"
//! default_branch = "master"
//!
//! [orchestrator]
//! max_parallel = 4
//! default_max_retries = 3
//! merge_to_default = false
//! ```

use crate::errors::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// An access token that never prints its value.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value, for building request headers only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Masked rendering: first four characters, then `****`.
    pub fn masked(&self) -> String {
        if self.0.len() <= 4 {
            "****".to_string()
        } else {
            format!("{}****", &self.0[..4])
        }
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.masked())
    }
}

impl fmt::Display for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.masked())
    }
}

/// Git hosting connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostingSettings {
    /// Base URL of the hosting REST API
    #[serde(default)]
    pub base_url: String,
    /// Access token, masked in all diagnostic output
    #[serde(default)]
    pub token: SecretToken,
    /// Per-call timeout in seconds
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_call_timeout_secs() -> u64 {
    30
}

impl Default for HostingSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: SecretToken::default(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

/// Branch and tag naming templates. Placeholders: `{iteration}`, `{version}`,
/// `{window}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingSettings {
    #[serde(default = "default_feature_template")]
    pub feature_branch_template: String,
    #[serde(default = "default_release_template")]
    pub release_branch_template: String,
    #[serde(default = "default_tag_template")]
    pub tag_template: String,
    /// The long-lived integration branch merges land on after release
    #[serde(default = "default_default_branch")]
    pub default_branch: String,
}

fn default_feature_template() -> String {
    "feature/{iteration}".to_string()
}

fn default_release_template() -> String {
    "release/{version}".to_string()
}

fn default_tag_template() -> String {
    "v{version}".to_string()
}

fn default_default_branch() -> String {
    "master".to_string()
}

impl Default for NamingSettings {
    fn default() -> Self {
        Self {
            feature_branch_template: default_feature_template(),
            release_branch_template: default_release_template(),
            tag_template: default_tag_template(),
            default_branch: default_default_branch(),
        }
    }
}

impl NamingSettings {
    /// Expand a template's placeholders from the given context values.
    pub fn render(template: &str, window: &str, iteration: &str, version: &str) -> String {
        template
            .replace("{window}", window)
            .replace("{iteration}", iteration)
            .replace("{version}", version)
    }

    pub fn feature_branch(&self, iteration_key: &str) -> String {
        Self::render(&self.feature_branch_template, "", iteration_key, "")
    }

    pub fn release_branch(&self, version: &str) -> String {
        Self::render(&self.release_branch_template, "", "", version)
    }

    pub fn tag(&self, version: &str) -> String {
        Self::render(&self.tag_template, "", "", version)
    }
}

/// Execution-engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Maximum tasks in flight at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Retry cap assigned to newly planned tasks
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// Whether the recipe includes the release→default-branch merge
    #[serde(default)]
    pub merge_to_default: bool,
}

fn default_max_parallel() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            default_max_retries: default_max_retries(),
            merge_to_default: false,
        }
    }
}

/// Top-level settings object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub hosting: HostingSettings,
    #[serde(default)]
    pub naming: NamingSettings,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
}

impl Settings {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CoreError::validation("settings", format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut settings: Settings = toml::from_str(&raw)
            .map_err(|e| CoreError::validation("settings", format!("invalid TOML: {}", e)))?;
        settings.apply_env();
        Ok(settings)
    }

    /// Overlay `SLIPWAY_*` environment variables on the loaded values.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("SLIPWAY_HOSTING_URL") {
            self.hosting.base_url = url;
        }
        if let Ok(token) = std::env::var("SLIPWAY_HOSTING_TOKEN") {
            self.hosting.token = SecretToken::new(token);
        }
        if let Ok(branch) = std::env::var("SLIPWAY_DEFAULT_BRANCH") {
            self.naming.default_branch = branch;
        }
        if let Ok(parallel) = std::env::var("SLIPWAY_MAX_PARALLEL") {
            if let Ok(n) = parallel.parse() {
                self.orchestrator.max_parallel = n;
            }
        }
    }
}
