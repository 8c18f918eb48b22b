//! Per-phase scorers.
//!
//! Each scorer turns one phase's artifacts (plus any guardrail report that
//! gated them) into deterministic test results. None of these call a model.

use super::{Component, PhaseScore, ScoreTest, ScoringContext};
use crate::case::{
    AuditStatus, BackgroundContext, Cast, Clues, Cml, CmlValidation, FairPlayReport,
    HardLogicDevices, NoveltyAudit, NoveltyStatus, Outline, Prose, Setting, Synopsis,
};
use crate::guardrails::{GuardrailReport, GuardrailSeverity};

pub fn score_setting(setting: &Setting, ctx: &ScoringContext<'_>) -> PhaseScore {
    let tests = vec![
        ScoreTest::new(
            "anchors_present",
            Component::Validation,
            (2..=3).contains(&setting.period_anchors.len()),
            format!("{} period anchors", setting.period_anchors.len()),
        ),
        ScoreTest::new(
            "no_anachronisms",
            Component::Quality,
            setting.anachronisms.is_empty(),
            format!("{} anachronisms flagged", setting.anachronisms.len()),
        )
        .weighted(2.0),
        ScoreTest::new(
            "no_implausibilities",
            Component::Quality,
            setting.implausibilities.is_empty(),
            format!("{} implausibilities flagged", setting.implausibilities.len()),
        ),
        ScoreTest::new(
            "description_substantial",
            Component::Completeness,
            setting.description.split_whitespace().count() >= 40,
            "description length",
        ),
        ScoreTest::new(
            "decade_matches_spec",
            Component::Consistency,
            setting.decade == ctx.spec.decade,
            format!("setting decade {} vs spec {}", setting.decade, ctx.spec.decade),
        )
        .critical(),
    ];
    PhaseScore::from_tests("setting", tests)
}

pub fn score_cast(cast: &Cast, ctx: &ScoringContext<'_>) -> PhaseScore {
    let names: std::collections::HashSet<&str> =
        cast.suspects.iter().map(|s| s.name.as_str()).collect();
    let tests = vec![
        ScoreTest::new(
            "cast_size_met",
            Component::Validation,
            cast.suspects.len() as u32 >= ctx.spec.cast_size,
            format!("{} of {} suspects", cast.suspects.len(), ctx.spec.cast_size),
        )
        .critical(),
        ScoreTest::new(
            "stereotype_check_clean",
            Component::Quality,
            cast.stereotype_check.is_empty(),
            format!("{} stereotype flags", cast.stereotype_check.len()),
        )
        .weighted(2.0),
        ScoreTest::new(
            "names_unique",
            Component::Consistency,
            names.len() == cast.suspects.len(),
            "duplicate suspect names",
        ),
        ScoreTest::new(
            "pressures_present",
            Component::Completeness,
            cast.suspects.iter().all(|s| !s.hidden_pressure.is_empty()),
            "every suspect carries a hidden pressure",
        ),
    ];
    PhaseScore::from_tests("cast", tests)
}

pub fn score_background(context: &BackgroundContext, _ctx: &ScoringContext<'_>) -> PhaseScore {
    let tests = vec![
        ScoreTest::new(
            "zones_mapped",
            Component::Completeness,
            context.location.zones.len() >= 2,
            format!("{} zones", context.location.zones.len()),
        ),
        ScoreTest::new(
            "rhythm_established",
            Component::Completeness,
            context.temporal.daily_rhythm.len() >= 3,
            format!("{} time blocks", context.temporal.daily_rhythm.len()),
        ),
        ScoreTest::new(
            "tensions_present",
            Component::Quality,
            context.social.tensions.len() >= 2,
            format!("{} tensions", context.social.tensions.len()),
        ),
        ScoreTest::new(
            "authority_present",
            Component::Validation,
            !context.institution.institutions.is_empty(),
            "at least one institution",
        ),
        ScoreTest::new(
            "rhythm_hours_valid",
            Component::Consistency,
            context
                .temporal
                .daily_rhythm
                .iter()
                .all(|b| b.start_hour < 24),
            "time blocks within the clock",
        ),
    ];
    PhaseScore::from_tests("background_context", tests)
}

pub fn score_devices(devices: &HardLogicDevices, _ctx: &ScoringContext<'_>) -> PhaseScore {
    let tests = vec![
        ScoreTest::new(
            "minimum_devices",
            Component::Validation,
            devices.devices.len() >= 3,
            format!("{} devices", devices.devices.len()),
        )
        .critical(),
        ScoreTest::new(
            "surfaces_differ_from_reality",
            Component::Quality,
            devices
                .devices
                .iter()
                .all(|d| d.surface_appearance != d.underlying_reality),
            "surface and underlying reality must diverge",
        ),
        ScoreTest::new(
            "fair_play_clues_seeded",
            Component::Completeness,
            devices.devices.iter().all(|d| !d.fair_play_clues.is_empty()),
            "every device seeds at least one clue",
        ),
        ScoreTest::new(
            "anti_trope_notes",
            Component::Quality,
            devices.devices.iter().all(|d| !d.anti_trope_note.is_empty()),
            "every device justifies itself against trope",
        ),
    ];
    PhaseScore::from_tests("hard_logic_devices", tests)
}

pub fn score_cml(cml: &Cml, validation: &CmlValidation, ctx: &ScoringContext<'_>) -> PhaseScore {
    let spec = ctx.spec;
    let checklist_passed = validation.checklist.iter().filter(|c| c.passed).count();
    let tests = vec![
        ScoreTest::new(
            "validator_verdict",
            Component::Validation,
            validation.passed,
            format!(
                "{checklist_passed}/{} checklist items passed",
                validation.checklist.len()
            ),
        )
        .critical()
        .weighted(2.0),
        ScoreTest::new(
            "axis_verbatim",
            Component::Consistency,
            cml.meta.primary_axis == spec.primary_axis,
            format!("meta axis {} vs spec {}", cml.meta.primary_axis, spec.primary_axis),
        )
        .critical(),
        ScoreTest::new(
            "spec_fields_verbatim",
            Component::Consistency,
            cml.meta.decade == spec.decade
                && cml.meta.location_preset == spec.location_preset
                && cml.meta.tone == spec.tone
                && cml.meta.target_length == spec.target_length,
            "decade/location/tone/length carried into meta",
        ),
        ScoreTest::new(
            "inference_path_depth",
            Component::Completeness,
            cml.inference_path.len() >= 3,
            format!("{} inference steps", cml.inference_path.len()),
        ),
        ScoreTest::new(
            "constraint_space_size",
            Component::Completeness,
            cml.constraint_space.constraints.len() >= 4,
            format!("{} constraints", cml.constraint_space.constraints.len()),
        ),
        ScoreTest::new(
            "test_excludes_someone",
            Component::Quality,
            !cml.discriminating_test.excludes.is_empty(),
            "discriminating test names who it clears",
        ),
        ScoreTest::new(
            "collapse_effect_stated",
            Component::Quality,
            !cml.false_assumption.collapse_effect.is_empty(),
            "false assumption states its collapse effect",
        ),
    ];
    PhaseScore::from_tests("cml", tests)
}

pub fn score_clues(
    clues: &Clues,
    guardrails: &GuardrailReport,
    _ctx: &ScoringContext<'_>,
) -> PhaseScore {
    let critical = guardrails.has_critical();
    let majors = guardrails
        .violations
        .iter()
        .filter(|v| v.severity == GuardrailSeverity::Major)
        .count();
    let tests = vec![
        ScoreTest::new(
            "guardrails_critical_clear",
            Component::Validation,
            !critical,
            "no unresolved critical clue guardrails",
        )
        .critical()
        .weighted(2.0),
        ScoreTest::new(
            "guardrails_major_clear",
            Component::Validation,
            majors == 0,
            format!("{majors} major clue guardrails outstanding"),
        ),
        ScoreTest::new(
            "clue_volume",
            Component::Completeness,
            clues.clues.len() >= 8,
            format!("{} clue cards", clues.clues.len()),
        ),
        ScoreTest::new(
            "descriptions_textured",
            Component::Quality,
            clues
                .clues
                .iter()
                .all(|c| c.description.split_whitespace().count() >= 6),
            "clue descriptions are scenes, not labels",
        ),
    ];
    PhaseScore::from_tests("clues", tests)
}

pub fn score_fair_play(report: &FairPlayReport, _ctx: &ScoringContext<'_>) -> PhaseScore {
    let checklist_total = report.checklist.len().max(1);
    let checklist_passed = report.checklist.iter().filter(|c| c.passed).count();
    let tests = vec![
        ScoreTest::new(
            "audit_verdict",
            Component::Validation,
            report.overall == AuditStatus::Pass,
            format!("overall {:?}", report.overall),
        )
        .critical()
        .weighted(2.0),
        ScoreTest::new(
            "no_structural_violations",
            Component::Validation,
            !report.has_structural_violation(),
            "structural classes escalate to CML revision",
        ),
        ScoreTest::new(
            "checklist_majority",
            Component::Quality,
            checklist_passed * 2 >= checklist_total,
            format!("{checklist_passed}/{checklist_total} rules passed"),
        ),
    ];
    PhaseScore::from_tests("fair_play", tests)
}

pub fn score_outline(
    outline: &Outline,
    gate: &GuardrailReport,
    ctx: &ScoringContext<'_>,
) -> PhaseScore {
    let planned = ctx.target_length.planned_chapters();
    let count = outline.chapter_count();
    let within = count.abs_diff(planned) <= 2;
    let numbered_in_order = outline
        .chapters
        .iter()
        .enumerate()
        .all(|(i, ch)| ch.number == i as u32 + 1);
    let tests = vec![
        ScoreTest::new(
            "coverage_gate_clear",
            Component::Validation,
            gate.is_clean(),
            format!("{} coverage violations", gate.violations.len()),
        )
        .weighted(2.0),
        ScoreTest::new(
            "chapter_count_near_plan",
            Component::Completeness,
            within,
            format!("{count} chapters vs planned {planned} ±2"),
        ),
        ScoreTest::new(
            "chapters_numbered_in_order",
            Component::Consistency,
            numbered_in_order,
            "chapter numbers are sequential from 1",
        ),
        ScoreTest::new(
            "reveal_inside_book",
            Component::Consistency,
            outline.reveal_chapter >= 1 && outline.reveal_chapter <= count,
            format!("reveal at chapter {} of {count}", outline.reveal_chapter),
        )
        .critical(),
        ScoreTest::new(
            "clues_scheduled",
            Component::Quality,
            outline
                .chapters
                .iter()
                .flat_map(|c| &c.scenes)
                .any(|s| !s.clues_revealed.is_empty()),
            "at least some scenes place clues",
        ),
    ];
    PhaseScore::from_tests("outline", tests)
}

pub fn score_prose(
    prose: &Prose,
    release: &GuardrailReport,
    ctx: &ScoringContext<'_>,
) -> PhaseScore {
    let mut tests = vec![
        ScoreTest::new(
            "release_checks_clear",
            Component::Validation,
            !release.blocking(),
            format!("{} release violations", release.violations.len()),
        )
        .critical()
        .weighted(2.0),
        ScoreTest::new(
            "chapters_nonempty",
            Component::Quality,
            prose.chapters.iter().all(|c| !c.text.trim().is_empty()),
            "no empty chapters",
        ),
    ];
    // Aggregate size tests are meaningless while batches are in flight.
    if !ctx.partial_generation {
        let (min_words, max_words) = ctx.target_length.word_range();
        let words = prose.total_words();
        let planned = ctx.target_length.planned_chapters();
        tests.push(
            ScoreTest::new(
                "word_count_in_range",
                Component::Completeness,
                (min_words..=max_words).contains(&words),
                format!("{words} words vs [{min_words}, {max_words}]"),
            ),
        );
        tests.push(ScoreTest::new(
            "chapter_count_near_plan",
            Component::Completeness,
            (prose.chapters.len() as u32).abs_diff(planned) <= 2,
            format!("{} chapters vs planned {planned} ±2", prose.chapters.len()),
        ));
    }
    PhaseScore::from_tests("prose", tests)
}

pub fn score_novelty(audit: &NoveltyAudit, _ctx: &ScoringContext<'_>) -> PhaseScore {
    let tests = vec![
        ScoreTest::new(
            "novelty_status",
            Component::Validation,
            audit.status != NoveltyStatus::Fail,
            format!("{:?}: {}", audit.status, audit.reason),
        )
        .critical(),
        ScoreTest::new(
            "novelty_clean_pass",
            Component::Quality,
            audit.status == NoveltyStatus::Pass,
            "warning status costs quality",
        ),
    ];
    PhaseScore::from_tests("novelty", tests)
}

pub fn score_synopsis(synopsis: &Synopsis, ctx: &ScoringContext<'_>) -> PhaseScore {
    let leaks = ctx
        .cml
        .map(|cml| {
            let culprit = cml.hidden_model.culprit.to_lowercase();
            synopsis
                .spoiler_free_summary
                .to_lowercase()
                .contains(&culprit)
                && culprit.len() > 3
        })
        .unwrap_or(false);
    let tests = vec![
        ScoreTest::new(
            "hook_present",
            Component::Completeness,
            !synopsis.hook.trim().is_empty(),
            "hook",
        ),
        ScoreTest::new(
            "no_spoilers",
            Component::Quality,
            !leaks,
            "summary must not name the culprit",
        )
        .critical(),
    ];
    PhaseScore::from_tests("synopsis", tests)
}
