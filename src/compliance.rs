//! Branch-naming compliance engine.
//!
//! Rules are globs with an allow/block kind. `*` matches within a path
//! segment, `**` matches across segments, `?` matches a single non-separator
//! character; everything else is literal. Block rules always win; allow
//! rules, when any exist, form an allow-list; with neither in play the
//! engine is permissive.

use crate::errors::{CoreError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MAX_PATTERN_LEN: usize = 256;

/// Whether a rule admits or rejects matching branch names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Allow,
    Block,
}

/// A named branch-naming rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRule {
    pub id: Uuid,
    pub name: String,
    pub pattern: String,
    pub kind: RuleKind,
}

impl BranchRule {
    /// Create a rule, rejecting glob syntax that does not compile. Invalid
    /// patterns are never stored.
    pub fn new(name: &str, pattern: &str, kind: RuleKind) -> Result<Self> {
        if name.is_empty() {
            return Err(CoreError::validation("name", "must not be empty"));
        }
        compile_glob(pattern)?;
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            pattern: pattern.to_string(),
            kind,
        })
    }

    /// Replace the pattern, revalidating first.
    pub fn update_pattern(&mut self, pattern: &str) -> Result<()> {
        compile_glob(pattern)?;
        self.pattern = pattern.to_string();
        Ok(())
    }
}

/// Translate a glob into an anchored regex: `**` crosses path separators,
/// `*` and `?` do not, all other metacharacters are literal.
pub fn compile_glob(pattern: &str) -> Result<Regex> {
    if pattern.is_empty() || pattern.len() > MAX_PATTERN_LEN {
        return Err(CoreError::validation(
            "pattern",
            format!("must be 1..={} characters", MAX_PATTERN_LEN),
        ));
    }

    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    translated.push_str(".*");
                } else {
                    translated.push_str("[^/]*");
                }
            }
            '?' => translated.push_str("[^/]"),
            _ => translated.push_str(&regex::escape(&c.to_string())),
        }
    }
    translated.push('$');

    Regex::new(&translated)
        .map_err(|e| CoreError::validation("pattern", format!("invalid glob: {}", e)))
}

/// A rule with its compiled matcher.
#[derive(Debug)]
struct CompiledRule {
    name: String,
    kind: RuleKind,
    matcher: Regex,
}

/// Outcome of a compliance check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceDecision {
    pub compliant: bool,
    /// Name of the rule that decided the outcome, when one did
    pub decided_by: Option<String>,
}

/// Evaluates branch names against a fixed rule set. Rules are compiled once
/// at construction; evaluation order does not affect the outcome.
#[derive(Debug)]
pub struct BranchComplianceEngine {
    rules: Vec<CompiledRule>,
    has_allow: bool,
}

impl BranchComplianceEngine {
    pub fn new(rules: &[BranchRule]) -> Result<Self> {
        let compiled = rules
            .iter()
            .map(|r| {
                Ok(CompiledRule {
                    name: r.name.clone(),
                    kind: r.kind,
                    matcher: compile_glob(&r.pattern)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let has_allow = compiled.iter().any(|r| r.kind == RuleKind::Allow);
        Ok(Self {
            rules: compiled,
            has_allow,
        })
    }

    /// Decide whether a branch name is compliant.
    ///
    /// Empty rule set → compliant. Any block match → non-compliant. With
    /// allow rules present, at least one must match; otherwise permissive.
    pub fn evaluate(&self, branch: &str) -> ComplianceDecision {
        if self.rules.is_empty() {
            return ComplianceDecision {
                compliant: true,
                decided_by: None,
            };
        }

        if let Some(block) = self
            .rules
            .iter()
            .find(|r| r.kind == RuleKind::Block && r.matcher.is_match(branch))
        {
            return ComplianceDecision {
                compliant: false,
                decided_by: Some(block.name.clone()),
            };
        }

        if self.has_allow {
            let matched = self
                .rules
                .iter()
                .find(|r| r.kind == RuleKind::Allow && r.matcher.is_match(branch));
            return ComplianceDecision {
                compliant: matched.is_some(),
                decided_by: matched.map(|r| r.name.clone()),
            };
        }

        ComplianceDecision {
            compliant: true,
            decided_by: None,
        }
    }

    pub fn is_compliant(&self, branch: &str) -> bool {
        self.evaluate(branch).compliant
    }
}
