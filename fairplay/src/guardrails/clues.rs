//! Clue guardrails, run after Agent 5 and before the fair-play audit.

use super::{GuardrailReport, GuardrailSeverity};
use crate::case::{Cast, Clues, Cml};

/// Latest chapter (inclusive) an essential clue may be revealed in.
pub fn essential_deadline(total_chapters: u32) -> u32 {
    (f64::from(total_chapters) * 0.66).ceil() as u32
}

/// One entry of the explicit required-clue list computed before Agent 5 is
/// prompted. The agent's task is to describe each entry creatively, not to
/// decide what coverage exists.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RequiredClue {
    /// Coverage kind, e.g. `inference_step`, `eliminate_suspect`.
    pub kind: String,
    /// What the clue must accomplish.
    pub directive: String,
}

/// Compute the required-clue list from the CML and cast.
pub fn required_clue_list(cml: &Cml, cast: &Cast) -> Vec<RequiredClue> {
    let mut required = Vec::new();

    for step in &cml.inference_path {
        required.push(RequiredClue {
            kind: "inference_step".into(),
            directive: format!(
                "a clue with supports_inference_step={} grounding: {}",
                step.index, step.premise
            ),
        });
    }
    for suspect in cml_non_culprits(cml, cast) {
        required.push(RequiredClue {
            kind: "eliminate_suspect".into(),
            directive: format!(
                "a clue with eliminates_suspect=\"{}\" that clears them on evidence",
                suspect
            ),
        });
    }
    required.push(RequiredClue {
        kind: "discriminating_test".into(),
        directive: format!(
            "a clue with references_discriminating_test=true seeding: {}",
            cml.discriminating_test.design
        ),
    });
    required.push(RequiredClue {
        kind: "false_assumption_support".into(),
        directive: "a clue with supports_false_assumption=true that makes the wrong reading natural"
            .into(),
    });
    required.push(RequiredClue {
        kind: "false_assumption_contradiction".into(),
        directive:
            "a clue with contradicts_false_assumption=true an attentive reader can catch".into(),
    });
    required.push(RequiredClue {
        kind: "false_assumption_naming".into(),
        directive: format!(
            "a clue with references_false_assumption=true pointing at: {}",
            cml.false_assumption.statement
        ),
    });
    required
}

fn cml_non_culprits<'a>(cml: &Cml, cast: &'a Cast) -> Vec<&'a str> {
    cast.suspects
        .iter()
        .filter(|s| s.name != cml.hidden_model.culprit)
        .map(|s| s.name.as_str())
        .collect()
}

/// Run all clue guardrails.
pub fn check_clues(cml: &Cml, cast: &Cast, clues: &Clues, total_chapters: u32) -> GuardrailReport {
    let mut report = GuardrailReport::default();
    let deadline = essential_deadline(total_chapters);

    // Essential placement
    for clue in &clues.clues {
        if clue.essential && clue.reveal_chapter > deadline {
            report.push(
                "essential_clue_late",
                GuardrailSeverity::Major,
                format!(
                    "essential clue {} reveals in chapter {} (deadline {deadline} of {total_chapters})",
                    clue.id, clue.reveal_chapter
                ),
            );
        }
    }

    // Unique ids
    let mut seen = std::collections::HashSet::new();
    for clue in &clues.clues {
        if !seen.insert(clue.id.as_str()) {
            report.push(
                "duplicate_clue_id",
                GuardrailSeverity::Major,
                format!("clue id {} appears more than once", clue.id),
            );
        }
    }

    // No private phrasing
    for clue in &clues.clues {
        let observer = clue.observed_by.trim().to_lowercase();
        let text = clue.description.to_lowercase();
        if observer == "detective" || text.contains("only the detective") {
            report.push(
                "detective_private_clue",
                GuardrailSeverity::Major,
                format!("clue {} names the detective as sole observer", clue.id),
            );
        }
    }

    // Inference coverage
    for step in &cml.inference_path {
        let covered = clues
            .clues
            .iter()
            .any(|c| c.supports_inference_step == Some(step.index));
        if !covered {
            report.push(
                "inference_coverage_missing",
                GuardrailSeverity::Critical,
                format!("no clue supports inference step {}", step.index),
            );
            report.recommend(format!(
                "add a clue with supports_inference_step={} for: {}",
                step.index, step.premise
            ));
        }
    }

    // Contradiction pair
    let supports = clues.clues.iter().any(|c| c.supports_false_assumption);
    let contradicts = clues.clues.iter().any(|c| c.contradicts_false_assumption);
    if !(supports && contradicts) {
        report.push(
            "contradiction_pair_missing",
            GuardrailSeverity::Critical,
            format!(
                "false assumption needs both support and contradiction (support={supports}, contradiction={contradicts})"
            ),
        );
    }

    // False-assumption naming
    if !clues.clues.iter().any(|c| c.references_false_assumption) {
        report.push(
            "false_assumption_unnamed",
            GuardrailSeverity::Major,
            "no clue explicitly references the false assumption",
        );
    }

    // Discriminating-test reachability
    if !clues
        .clues
        .iter()
        .any(|c| c.references_discriminating_test)
    {
        report.push(
            "discriminating_test_unreachable",
            GuardrailSeverity::Major,
            "no clue references the discriminating test design",
        );
    }

    // Suspect elimination
    for suspect in cml_non_culprits(cml, cast) {
        let eliminated = clues
            .clues
            .iter()
            .any(|c| c.eliminates_suspect.as_deref() == Some(suspect));
        if !eliminated {
            report.push(
                "suspect_elimination_missing",
                GuardrailSeverity::Critical,
                format!("non-culprit suspect {suspect} has no eliminating clue"),
            );
            report.recommend(format!(
                "add a clue with eliminates_suspect=\"{suspect}\""
            ));
        }
    }

    report
}
