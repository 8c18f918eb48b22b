//! Outline coverage gate, run after Agent 7.
//!
//! Term scans are deliberately dumb: they look for co-located vocabulary in
//! scene summaries rather than asking a model whether coverage exists. A
//! failed gate produces quality-guardrail recommendations that drive one
//! outline regeneration, and propagate to the prose agent if unresolved.

use super::{has_any, GuardrailReport, GuardrailSeverity};
use crate::case::{Cast, Cml, Outline};

const TEST_TERMS: &[&str] = &[
    "test",
    "experiment",
    "re-enact",
    "reenact",
    "demonstration",
];
const EXCLUSION_TERMS: &[&str] = &[
    "exclude",
    "exclusion",
    "rule out",
    "ruled out",
    "rules out",
    "clear",
    "eliminat",
];
const EVIDENCE_TERMS: &[&str] = &["evidence", "proof", "prove", "demonstrat"];
const CLOSURE_TERMS: &[&str] = &[
    "ruled out",
    "rules out",
    "cleared",
    "clears",
    "eliminated",
    "exonerat",
];

/// Check discriminating-test coverage and suspect closure across the outline.
pub fn check_outline_coverage(cml: &Cml, cast: &Cast, outline: &Outline) -> GuardrailReport {
    let mut report = GuardrailReport::default();

    let scene_texts: Vec<String> = outline
        .chapters
        .iter()
        .flat_map(|ch| ch.scenes.iter().map(|s| s.summary.to_lowercase()))
        .collect();

    // Discriminating-test coverage: literal phrase, or test + exclusion +
    // evidence language co-located in one scene.
    let test_covered = scene_texts.iter().any(|text| {
        text.contains("discriminating test")
            || (has_any(text, TEST_TERMS)
                && has_any(text, EXCLUSION_TERMS)
                && has_any(text, EVIDENCE_TERMS))
    });
    if !test_covered {
        report.push(
            "outline_test_uncovered",
            GuardrailSeverity::Major,
            "no scene stages the discriminating test with exclusion and evidence language",
        );
        report.recommend(format!(
            "add a scene staging the discriminating test ({}) that names what it excludes and the evidence observed",
            cml.discriminating_test.design
        ));
    }

    // Suspect closure: every non-culprit must be cleared in some scene.
    for suspect in cast.suspects.iter().filter(|s| s.name != cml.hidden_model.culprit) {
        let name = suspect.name.to_lowercase();
        let closed = scene_texts
            .iter()
            .any(|text| text.contains(&name) && has_any(text, CLOSURE_TERMS) && has_any(text, EVIDENCE_TERMS));
        if !closed {
            report.push(
                "outline_suspect_unclosed",
                GuardrailSeverity::Major,
                format!("no scene rules out {} on evidence", suspect.name),
            );
            report.recommend(format!(
                "add a scene in which {} is ruled out on explicit evidence",
                suspect.name
            ));
        }
    }

    report
}
