//! Prose release checks, run after Agent 9 and again at the release gate.
//!
//! Running the checks twice on the same artifact set yields the same report;
//! everything here is a pure function of the prose text and the CML.

use regex::Regex;

use super::{has_any, GuardrailReport, GuardrailSeverity};
use crate::case::{Cast, Cml, Prose};
use crate::sanitize::mojibake_count;

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

fn word_pattern(name: &str) -> Option<Regex> {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(name))).ok()
}

/// Run every prose release check.
pub fn check_prose(cml: &Cml, cast: &Cast, prose: &Prose) -> GuardrailReport {
    let mut report = GuardrailReport::default();
    let full_text = prose.full_text();

    check_identity_drift(cml, cast, prose, &mut report);

    // Mojibake: sanitizer residue must be zero at release.
    let residue = mojibake_count(&full_text);
    if residue > 0 {
        report.push(
            "mojibake_residue",
            GuardrailSeverity::Major,
            format!("{residue} mojibake sequences survived sanitization"),
        );
    }

    // Discriminating test realized on-page.
    let realized = prose.chapters.iter().any(|ch| {
        let text = ch.text.to_lowercase();
        text.contains("discriminating test")
            || (has_any(&text, TEST_TERMS)
                && has_any(&text, EXCLUSION_TERMS)
                && has_any(&text, EVIDENCE_TERMS))
    });
    if !realized {
        report.push(
            "discriminating_test_unrealized",
            GuardrailSeverity::Major,
            "the discriminating test never happens on the page",
        );
        report.recommend(format!(
            "stage the discriminating test on-page: {}",
            cml.discriminating_test.design
        ));
    }

    // Suspect closure present in prose.
    for suspect in cast
        .suspects
        .iter()
        .filter(|s| s.name != cml.hidden_model.culprit)
    {
        let name = suspect.name.to_lowercase();
        let closed = prose.chapters.iter().any(|ch| {
            let text = ch.text.to_lowercase();
            text.contains(&name) && has_any(&text, CLOSURE_TERMS)
        });
        if !closed {
            report.push(
                "suspect_closure_missing",
                GuardrailSeverity::Major,
                format!("{} is never cleared on the page", suspect.name),
            );
            report.recommend(format!(
                "show {} being ruled out before the reveal",
                suspect.name
            ));
        }
    }

    // Continuity bridge for case-class transitions.
    if cml.has_case_transition() {
        let apparent_terms = cml.surface_model.apparent_case_class.terms();
        let final_terms = cml.meta.case_class.terms();
        let bridged = prose.chapters.iter().any(|ch| {
            let text = ch.text.to_lowercase();
            has_any(&text, apparent_terms) && has_any(&text, final_terms)
        });
        if !bridged {
            report.push(
                "continuity_bridge_missing",
                GuardrailSeverity::Major,
                "the case class shifts but no chapter bridges the transition",
            );
        }
    }

    // Minor: wildly empty chapters are reported but never block.
    for ch in &prose.chapters {
        if ch.word_count < 200 {
            report.push(
                "thin_chapter",
                GuardrailSeverity::Minor,
                format!("chapter {} has only {} words", ch.number, ch.word_count),
            );
        }
    }

    report
}

/// After the reveal, the culprit must be referenced by name at least once;
/// a post-reveal section that knows them only by their pre-reveal role alias
/// reads as a continuity break.
fn check_identity_drift(cml: &Cml, cast: &Cast, prose: &Prose, report: &mut GuardrailReport) {
    let culprit = &cml.hidden_model.culprit;
    let Some(name_re) = word_pattern(culprit) else {
        return;
    };
    let role_re = cast
        .suspects
        .iter()
        .find(|s| &s.name == culprit)
        .and_then(|s| word_pattern(&s.role));

    let post_reveal: Vec<&str> = prose
        .chapters
        .iter()
        .filter(|ch| ch.number > prose.reveal_chapter)
        .map(|ch| ch.text.as_str())
        .collect();
    if post_reveal.is_empty() {
        return;
    }

    let name_mentions: usize = post_reveal.iter().map(|t| name_re.find_iter(t).count()).sum();
    let alias_mentions: usize = role_re
        .map(|re| post_reveal.iter().map(|t| re.find_iter(t).count()).sum())
        .unwrap_or(0);

    if name_mentions == 0 && alias_mentions > 0 {
        report.push(
            "identity_drift",
            GuardrailSeverity::Critical,
            format!(
                "after chapter {} the culprit {culprit} is referenced only by role alias",
                prose.reveal_chapter
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests_support::{test_cast, test_cml};
    use super::*;
    use crate::case::{CaseClass, ProseChapter};

    fn chapter(number: u32, text: &str) -> ProseChapter {
        ProseChapter {
            number,
            title: format!("Chapter {number}"),
            text: text.into(),
            word_count: text.split_whitespace().count().max(250) as u32,
        }
    }

    /// Prose that satisfies every release check for the shared fixture case.
    fn good_prose() -> Prose {
        Prose {
            chapters: vec![
                chapter(1, "Mary was ruled out when the ledger proved she never left the kitchen. Col. Brace was cleared by the gatehouse log."),
                chapter(2, "They staged the re-enactment with the clock corrected; the evidence ruled out every account but one."),
                chapter(3, "Edwin confessed before the assembled household, and Edwin alone."),
            ],
            reveal_chapter: 2,
        }
    }

    #[test]
    fn test_good_prose_clean() {
        let report = check_prose(&test_cml(), &test_cast(), &good_prose());
        assert!(report.is_clean(), "violations: {:?}", report.violations);
    }

    #[test]
    fn test_release_checks_idempotent() {
        let cml = test_cml();
        let cast = test_cast();
        let prose = good_prose();
        let first = check_prose(&cml, &cast, &prose);
        let second = check_prose(&cml, &cast, &prose);
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }

    #[test]
    fn test_identity_drift_detected() {
        let mut prose = good_prose();
        prose.chapters[2].text =
            "The nephew was led away. The nephew never spoke again.".into();
        let report = check_prose(&test_cml(), &test_cast(), &prose);
        assert!(report.has_critical());
        assert!(report
            .violations
            .iter()
            .any(|v| v.code == "identity_drift"));
    }

    #[test]
    fn test_name_mention_defeats_drift() {
        let mut prose = good_prose();
        prose.chapters[2].text =
            "The nephew was led away, and Edwin never spoke again.".into();
        let report = check_prose(&test_cml(), &test_cast(), &prose);
        assert!(!report.violations.iter().any(|v| v.code == "identity_drift"));
    }

    #[test]
    fn test_mojibake_blocks_release() {
        let mut prose = good_prose();
        prose.chapters[0]
            .text
            .push_str(" It wasn\u{00e2}\u{20ac}\u{2122}t right.");
        let report = check_prose(&test_cml(), &test_cast(), &prose);
        assert!(report
            .violations
            .iter()
            .any(|v| v.code == "mojibake_residue"));
    }

    #[test]
    fn test_unrealized_test_flagged() {
        let mut prose = good_prose();
        prose.chapters[1].text = "A quiet chapter of conversation.".into();
        let report = check_prose(&test_cml(), &test_cast(), &prose);
        assert!(report
            .violations
            .iter()
            .any(|v| v.code == "discriminating_test_unrealized"));
    }

    #[test]
    fn test_missing_closure_flagged() {
        let mut prose = good_prose();
        prose.chapters[0].text =
            "Mary was ruled out when the ledger proved she never left the kitchen.".into();
        let report = check_prose(&test_cml(), &test_cast(), &prose);
        assert!(report
            .violations
            .iter()
            .any(|v| v.code == "suspect_closure_missing" && v.message.contains("Col. Brace")));
    }

    #[test]
    fn test_continuity_bridge_required_on_transition() {
        let mut cml = test_cml();
        cml.surface_model.apparent_case_class = CaseClass::Disappearance;
        let report = check_prose(&cml, &test_cast(), &good_prose());
        assert!(report
            .violations
            .iter()
            .any(|v| v.code == "continuity_bridge_missing"));

        let mut bridged = good_prose();
        bridged.chapters[1].text.push_str(
            " What had begun as a disappearance was now, unmistakably, a murder: the body lay in the ice house.",
        );
        let report = check_prose(&cml, &test_cast(), &bridged);
        assert!(!report
            .violations
            .iter()
            .any(|v| v.code == "continuity_bridge_missing"));
    }

    #[test]
    fn test_thin_chapter_is_minor_only() {
        let mut prose = good_prose();
        prose.chapters[0].word_count = 50;
        let report = check_prose(&test_cml(), &test_cast(), &prose);
        assert_eq!(report.max_severity(), Some(GuardrailSeverity::Minor));
        assert!(!report.blocking());
    }
}
