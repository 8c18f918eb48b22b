//! Deterministic guardrails run between agents.
//!
//! Pure functions over already-parsed artifacts; no I/O, no suspension.
//! Each returns a [`GuardrailReport`] of violations and recommendations.
//! Critical findings drive re-entry into an earlier agent, major findings
//! block the release gate, minor findings are reported only.

mod clues;
mod outline;
mod prose;

pub use clues::{check_clues, essential_deadline, required_clue_list, RequiredClue};
pub use outline::check_outline_coverage;
pub use prose::check_prose;

use serde::{Deserialize, Serialize};

pub use crate::error::GuardrailSeverity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailViolation {
    /// Stable machine-readable code, e.g. `inference_coverage_missing`.
    pub code: String,
    pub severity: GuardrailSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardrailReport {
    pub violations: Vec<GuardrailViolation>,
    pub recommendations: Vec<String>,
}

impl GuardrailReport {
    pub fn push(&mut self, code: &str, severity: GuardrailSeverity, message: impl Into<String>) {
        self.violations.push(GuardrailViolation {
            code: code.to_string(),
            severity,
            message: message.into(),
        });
    }

    pub fn recommend(&mut self, note: impl Into<String>) {
        self.recommendations.push(note.into());
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn max_severity(&self) -> Option<GuardrailSeverity> {
        self.violations.iter().map(|v| v.severity).max()
    }

    pub fn has_critical(&self) -> bool {
        self.max_severity() == Some(GuardrailSeverity::Critical)
    }

    /// Whether this report blocks advancement without a retry.
    pub fn blocking(&self) -> bool {
        self.max_severity() >= Some(GuardrailSeverity::Major)
    }

    /// One line per violation, fed verbatim into retry prompts.
    pub fn violation_lines(&self) -> Vec<String> {
        self.violations
            .iter()
            .map(|v| format!("[{}] {}: {}", v.severity, v.code, v.message))
            .collect()
    }

    pub fn merge(&mut self, other: GuardrailReport) {
        self.violations.extend(other.violations);
        self.recommendations.extend(other.recommendations);
    }
}

/// Case-insensitive containment of any term.
pub(crate) fn has_any(haystack_lower: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| haystack_lower.contains(t))
}
