//! Phase scoring and end-of-run aggregation.
//!
//! Every phase scorer produces a [`PhaseScore`] from deterministic tests over
//! the phase's artifacts. Component weighting, grading, and pass thresholds
//! are fixed here; the aggregator folds all phase scores into the final
//! [`GenerationReport`] stored as an artifact at run end.

mod phases;

pub use phases::*;

use serde::{Deserialize, Serialize};

use crate::case::Cml;
use crate::model::{CaseSpec, TargetLength};

/// Which component a test contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Validation,
    Quality,
    Completeness,
    Consistency,
}

/// One deterministic test result inside a phase score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreTest {
    pub name: String,
    pub component: Component,
    pub passed: bool,
    pub weight: f64,
    /// A failed critical test fails the whole phase regardless of totals.
    pub critical: bool,
    pub detail: String,
}

impl ScoreTest {
    pub fn new(
        name: &str,
        component: Component,
        passed: bool,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            component,
            passed,
            weight: 1.0,
            critical: false,
            detail: detail.into(),
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn weighted(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_total(total: f64) -> Self {
        if total >= 90.0 {
            Self::A
        } else if total >= 80.0 {
            Self::B
        } else if total >= 70.0 {
            Self::C
        } else if total >= 60.0 {
            Self::D
        } else {
            Self::F
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        };
        f.write_str(s)
    }
}

/// Component weights in the phase total.
const VALIDATION_WEIGHT: f64 = 0.4;
const QUALITY_WEIGHT: f64 = 0.3;
const COMPLETENESS_WEIGHT: f64 = 0.2;
const CONSISTENCY_WEIGHT: f64 = 0.1;

/// Per-component minimums a passing phase must meet.
const VALIDATION_FLOOR: f64 = 60.0;
const QUALITY_FLOOR: f64 = 50.0;
const COMPLETENESS_FLOOR: f64 = 60.0;
const CONSISTENCY_FLOOR: f64 = 50.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseScore {
    pub phase: String,
    pub validation: f64,
    pub quality: f64,
    pub completeness: f64,
    pub consistency: f64,
    pub total: f64,
    pub grade: Grade,
    pub passed: bool,
    pub tests: Vec<ScoreTest>,
}

impl PhaseScore {
    /// Build a phase score from its test results. Components without tests
    /// score a neutral 100.
    pub fn from_tests(phase: &str, tests: Vec<ScoreTest>) -> Self {
        let component_score = |component: Component| -> f64 {
            let relevant: Vec<&ScoreTest> =
                tests.iter().filter(|t| t.component == component).collect();
            if relevant.is_empty() {
                return 100.0;
            }
            let total_weight: f64 = relevant.iter().map(|t| t.weight).sum();
            let earned: f64 = relevant
                .iter()
                .filter(|t| t.passed)
                .map(|t| t.weight)
                .sum();
            100.0 * earned / total_weight
        };

        let validation = component_score(Component::Validation);
        let quality = component_score(Component::Quality);
        let completeness = component_score(Component::Completeness);
        let consistency = component_score(Component::Consistency);
        let total = VALIDATION_WEIGHT * validation
            + QUALITY_WEIGHT * quality
            + COMPLETENESS_WEIGHT * completeness
            + CONSISTENCY_WEIGHT * consistency;

        let critical_failed = tests.iter().any(|t| t.critical && !t.passed);
        let passed = !critical_failed
            && total >= 60.0
            && validation >= VALIDATION_FLOOR
            && quality >= QUALITY_FLOOR
            && completeness >= COMPLETENESS_FLOOR
            && consistency >= CONSISTENCY_FLOOR;

        Self {
            phase: phase.into(),
            validation,
            quality,
            completeness,
            consistency,
            total,
            grade: Grade::from_total(total),
            passed,
            tests,
        }
    }
}

/// Inputs shared by every phase scorer.
pub struct ScoringContext<'a> {
    pub spec: &'a CaseSpec,
    pub cml: Option<&'a Cml>,
    pub target_length: TargetLength,
    /// True while prose batches are still in flight; disables aggregate
    /// word-count and chapter-count tests.
    pub partial_generation: bool,
}

// ── Aggregation ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryStats {
    /// Gateway attempts across all agents, including retries.
    pub total_attempts: u32,
    /// Agents that needed more than one attempt.
    pub retried_agents: Vec<String>,
    /// Feedback-loop re-entries (clue retry, CML revision, prose repair...).
    pub loop_reentries: u32,
}

/// The end-of-run report, stored as a `generation_report` artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    pub phases: Vec<PhaseScore>,
    pub overall_score: f64,
    pub overall_grade: Grade,
    pub passed: bool,
    pub retry_stats: RetryStats,
    /// Total estimated USD cost of every gateway call in the run.
    pub total_cost: f64,
    pub weakest_phase: Option<String>,
    pub strongest_phase: Option<String>,
}

/// Fold phase scores into the final report. Overall score is the mean of the
/// phase totals; the run passes only when every phase passed.
pub fn aggregate(
    phases: Vec<PhaseScore>,
    retry_stats: RetryStats,
    total_cost: f64,
) -> GenerationReport {
    let overall_score = if phases.is_empty() {
        0.0
    } else {
        phases.iter().map(|p| p.total).sum::<f64>() / phases.len() as f64
    };
    let weakest_phase = phases
        .iter()
        .min_by(|a, b| a.total.total_cmp(&b.total))
        .map(|p| p.phase.clone());
    let strongest_phase = phases
        .iter()
        .max_by(|a, b| a.total.total_cmp(&b.total))
        .map(|p| p.phase.clone());
    let passed = !phases.is_empty() && phases.iter().all(|p| p.passed);

    GenerationReport {
        overall_grade: Grade::from_total(overall_score),
        overall_score,
        passed,
        phases,
        retry_stats,
        total_cost,
        weakest_phase,
        strongest_phase,
    }
}
