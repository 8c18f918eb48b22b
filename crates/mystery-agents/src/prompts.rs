//! Prompt templates for each agent.
//!
//! Templates are data: opaque strings with `{placeholder}` slots filled from
//! upstream artifacts and the per-run uniqueness seed. Prompt versioning:
//! bump `PROMPT_VERSION` whenever template content changes, so every stored
//! artifact records which prompt produced it.

use std::collections::BTreeMap;

use fairplay::PipelineError;

/// Prompt version. Bump on any template content change.
pub const PROMPT_VERSION: &str = "1.4.0";

/// One registered template.
pub struct PromptTemplate {
    pub id: &'static str,
    pub system: &'static str,
    pub user: &'static str,
}

/// A template with its placeholders filled, ready for the gateway.
#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    pub template_id: String,
    pub system: String,
    pub user: String,
}

const COMMON_RULES: &str = "\
Respond with a single JSON object and nothing else. No markdown fences, no \
commentary. Every field named in the task is required. British period idiom \
is expected in all descriptive text.";

static TEMPLATES: &[PromptTemplate] = &[
    PromptTemplate {
        id: "setting.v2",
        system: "You design period settings for Golden Age detective novels. \
You are scrupulous about period accuracy: anything that could not exist in \
the stated decade goes in the anachronisms list, anything socially or \
logistically implausible goes in the implausibilities list. Aim for both \
lists to be empty by fixing the description instead of flagging it.",
        user: "Design the setting for a {decade} {tone} mystery at a \
{location_preset}. Theme notes: {theme}. Include two or three concrete \
period anchors (objects, customs, technology) that ground the era.\n\
{previous_violations}\n\
Uniqueness seed: {uniqueness_seed}.\n\
Fields: decade, location, description, period_anchors, anachronisms, \
implausibilities. {common_rules}",
    },
    PromptTemplate {
        id: "cast.v2",
        system: "You cast suspects for fair-play mysteries. Every suspect \
needs a public face and a hidden pressure that could read as motive. Avoid \
stock types; anything that leans on a stereotype goes in stereotype_check, \
and your goal is an empty stereotype_check.",
        user: "Cast {cast_size} suspects for this setting:\n{setting}\n\
Preferred names (use them if given): {cast_names}.\n\
{previous_violations}\n\
Uniqueness seed: {uniqueness_seed}.\n\
Fields: suspects (name, role, public_face, hidden_pressure), \
stereotype_check. {common_rules}",
    },
    PromptTemplate {
        id: "profile.location.v1",
        system: "You map crime-scene geography for mystery construction: \
zones with access levels, choke points, seclusion.",
        user: "Map the location from this setting:\n{setting}\n\
{previous_violations}\n\
Uniqueness seed: {uniqueness_seed}.\n\
Fields: name, zones (name, access one of public/restricted/private), \
choke_points, seclusion (open/semi/isolated). {common_rules}",
    },
    PromptTemplate {
        id: "profile.temporal.v1",
        system: "You establish the temporal texture of a period household: \
era markers, the daily rhythm, and the intervals a plot can hide inside.",
        user: "Build the temporal profile for:\n{setting}\n\
{previous_violations}\n\
Uniqueness seed: {uniqueness_seed}.\n\
Fields: era_markers, daily_rhythm (label, start_hour 0-23, activity), \
key_intervals. {common_rules}",
    },
    PromptTemplate {
        id: "profile.social.v1",
        system: "You chart the social web among a fixed cast: hierarchies, \
pairwise tensions, and the norms that govern who may say what to whom.",
        user: "Chart the social profile for this cast:\n{cast}\n\
in this setting:\n{setting}\n\
{previous_violations}\n\
Uniqueness seed: {uniqueness_seed}.\n\
Fields: hierarchies, tensions (between, kind one of \
romantic/financial/professional/familial/criminal, note), norms. \
{common_rules}",
    },
    PromptTemplate {
        id: "profile.institution.v1",
        system: "You describe the institutions whose authority shapes a \
period mystery: who investigates, who certifies, who can close a door.",
        user: "Describe the institutional landscape for:\n{setting}\n\
{previous_violations}\n\
Uniqueness seed: {uniqueness_seed}.\n\
Fields: institutions (name, kind one of \
police/church/estate/business/club, authority_figure), procedures. \
{common_rules}",
    },
    PromptTemplate {
        id: "devices.v3",
        system: "You engineer hard-logic devices: physical mechanisms whose \
surface appearance differs from their underlying reality, each resting on a \
named physical principle and each fair — the clues that expose it must be \
plantable in plain sight. The anti_trope_note must say how the device \
avoids its nearest cliché.",
        user: "Engineer at least three devices for this context:\n\
{background_context}\n\
Theme notes: {theme}. Primary axis: {primary_axis}.\n\
{previous_violations}\n\
Uniqueness seed: {uniqueness_seed}.\n\
Fields: devices (id, principle one of mechanical/optical/acoustic/chemical/\
chronometric/documentary/physiological, surface_appearance, \
underlying_reality, fair_play_clues, anti_trope_note). {common_rules}",
    },
    PromptTemplate {
        id: "cml.v4",
        system: "You compose the complete case model for a fair-play \
mystery: a surface model everyone believes, a hidden model that is true, a \
single false assumption bridging them, a constraint space that pins every \
suspect, an inference path a careful reader can walk, and a discriminating \
test with an observable outcome. Honor the spec fields verbatim in meta.",
        user: "Compose the case model.\nSpec: decade {decade}, location \
{location_preset}, tone {tone}, theme {theme}, primary axis {primary_axis}, \
target length {target_length}.\nCast:\n{cast}\nBackground:\n\
{background_context}\nDevices to build on:\n{hard_logic_devices}\n\
{divergence_constraints}\n{repair_directives}\n{previous_violations}\n\
Uniqueness seed: {uniqueness_seed}.\n\
Fields: meta (title, decade, location_preset, tone, theme, primary_axis, \
target_length, case_class), surface_model (summary, apparent_case_class, \
observed_timeline, assumed_facts), hidden_model (summary, true_sequence, \
culprit, motive_core), false_assumption (statement, assumption_type, \
collapse_effect), constraint_space (constraints: id, description, binds), \
inference_path (index, premise, conclusion), discriminating_test (design, \
method, observable_outcome, excludes), fair_play (guarantees, \
reader_visibility), quality_controls (anti_trope_notes, difficulty_notes). \
{common_rules}",
    },
    PromptTemplate {
        id: "cml_validator.v2",
        system: "You audit case models against a fixed checklist: structural \
integrity, axis dominance, epistemic integrity, false-assumption test, \
inference-path validity, discriminating-test soundness, fair-play \
guarantees. You fail a model rather than excuse it, and every failed rule \
gets a concrete repair directive.",
        user: "Audit this case model:\n{cml}\n\
{previous_violations}\n\
Fields: passed, checklist (rule, passed, note), repair_directives. \
{common_rules}",
    },
    PromptTemplate {
        id: "character_profiles.v2",
        system: "You deepen suspects into characters once the case model is \
fixed: what they show, what they hide, and exactly how much of the crime \
each one knows.",
        user: "Profile every suspect.\nCast:\n{cast}\nCase model:\n{cml}\n\
{previous_violations}\n\
Uniqueness seed: {uniqueness_seed}.\n\
Fields: profiles (name, outward_manner, private_history, knowledge_of_crime \
one of none/partial/full, voice_notes). {common_rules}",
    },
    PromptTemplate {
        id: "clues.v3",
        system: "You write clue cards. The required coverage list is already \
computed; your work is to realize each required clue as a concrete, \
period-true object or observation a reader could notice. Never make the \
detective the sole observer of anything.",
        user: "Write clue cards covering every entry of this required list:\n\
{required_clues}\nCase model:\n{cml}\nTotal chapters: {total_chapters}. \
Essential clues must reveal by chapter {essential_deadline}.\n\
{blind_reader_feedback}\n{previous_violations}\n\
Uniqueness seed: {uniqueness_seed}.\n\
Fields: clues (id, description, reveal_chapter, essential, \
supports_inference_step, eliminates_suspect, supports_false_assumption, \
contradicts_false_assumption, references_false_assumption, \
references_discriminating_test, observed_by). {common_rules}",
    },
    PromptTemplate {
        id: "fair_play.v2",
        system: "You audit clue sets for fair play under the classic rules: \
the reader must be able to reach the solution from presented clues alone. \
Structural defects in the case model itself — an inference path too \
abstract to clue, a constraint space too thin to pin suspects — use the \
violation classes inference_path_abstract and constraint_space_insufficient.",
        user: "Audit fair play.\nCase model:\n{cml}\nClues:\n{clues}\n\
Fields: overall (pass/needs-revision/fail), checklist (rule, passed, note), \
violations (class one of inference_path_abstract/\
constraint_space_insufficient/clue_placement/reader_visibility/other, \
detail), recommendations. {common_rules}",
    },
    PromptTemplate {
        id: "blind_reader.v1",
        system: "You are a careful mystery reader. You see only the clues — \
no solution, no case model. Name the culprit if the clues let you, and show \
your chain of reasoning either way.",
        user: "Here are the clues in reveal order:\n{clues}\n\
Suspects: {suspect_names}.\n\
Fields: identified (bool), suspect (name or null), confidence \
(certain/likely/guess/impossible), reasoning. {common_rules}",
    },
    PromptTemplate {
        id: "outline.v2",
        system: "You structure mystery novels chapter by chapter: every clue \
placed, every suspect ruled out on the page, the discriminating test staged \
as a scene, the reveal landing where the length plan says it should.",
        user: "Outline the novel.\nCase model:\n{cml}\nClues to place:\n\
{clues}\nCharacter profiles:\n{character_profiles}\nPlan: about \
{planned_chapters} chapters (±2), reveal near chapter {reveal_target}.\n\
{quality_guardrails}\n{previous_violations}\n\
Uniqueness seed: {uniqueness_seed}.\n\
Fields: chapters (number, title, scenes (summary, clues_revealed), \
word_target), reveal_chapter. {common_rules}",
    },
    PromptTemplate {
        id: "prose_batch.v2",
        system: "You write Golden Age detective prose: close third person, \
period diction, clues surfacing in narration exactly where the outline \
places them. Chapter text is narrative only — no headings, no notes to the \
editor.",
        user: "Write chapters {chapter_range} of the novel.\nOutline for \
these chapters:\n{outline_slice}\nCase model:\n{cml}\nCast:\n{cast}\n\
Character profiles:\n{character_profiles}\nLocation:\n{location_profile}\n\
Daily rhythm:\n{temporal_profile}\n{quality_guardrails}\n{repair_notes}\n\
{previous_violations}\n\
Uniqueness seed: {uniqueness_seed}.\n\
Fields: chapters (number, title, text, word_count), reveal_chapter. \
{common_rules}",
    },
    PromptTemplate {
        id: "synopsis.v1",
        system: "You write back-cover copy for mysteries: a hook, a premise, \
and a summary that sells the puzzle without leaking a grain of solution.",
        user: "Write the synopsis for this case model:\n{cml}\n\
{previous_violations}\n\
Fields: hook, premise, spoiler_free_summary. {common_rules}",
    },
    PromptTemplate {
        id: "novelty.v1",
        system: "You compare a case model's structure against seed patterns \
and rate similarity per category as numbers between 0 and 1: axis, \
mechanism, false_assumption, test_method, era, location.",
        user: "Rate this case model:\n{cml_summary}\nagainst each seed:\n\
{seeds}\n\
Fields: comparisons (seed_id, axis, mechanism, false_assumption, \
test_method, era, location). {common_rules}",
    },
];

/// Look up a template by id.
pub fn template(id: &str) -> Option<&'static PromptTemplate> {
    TEMPLATES.iter().find(|t| t.id == id)
}

/// Fill a template's placeholders. Placeholders with no entry in `vars`
/// render as empty strings, which is how optional sections (feedback,
/// divergence constraints) disappear.
pub fn render(
    id: &str,
    vars: &BTreeMap<String, String>,
) -> Result<RenderedPrompt, PipelineError> {
    let t = template(id)
        .ok_or_else(|| PipelineError::Llm(format!("unknown prompt template: {id}")))?;
    Ok(RenderedPrompt {
        template_id: t.id.to_string(),
        system: fill(t.system, vars),
        user: fill(t.user, vars),
    })
}

fn fill(text: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        match rest[open..].find('}') {
            Some(close_rel) => {
                let key = &rest[open + 1..open + close_rel];
                if key == "common_rules" {
                    out.push_str(COMMON_RULES);
                } else {
                    out.push_str(vars.get(key).map(String::as_str).unwrap_or(""));
                }
                rest = &rest[open + close_rel + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
