//! Agents 5, 6, 8, and the blind-reader simulation.

use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use fairplay::case::{CategorySimilarity, Cast, Clues, Cml, FairPlayReport, NoveltyAudit};
use fairplay::guardrails::{essential_deadline, RequiredClue};
use fairplay::model::ArtifactType;
use fairplay::novelty;
use fairplay::parse::parse_payload;
use fairplay::PipelineError;

use super::{into_typed, to_prompt_json, AgentContext, AgentOutcome};
use crate::retry::{call_validated, RetryOptions};

/// Agent 5: clue cards against a precomputed required-clue list.
///
/// `feedback` carries blind-reader rationale or guardrail violation text
/// from an earlier rejected set.
pub async fn generate_clues(
    ctx: &AgentContext,
    required: &[RequiredClue],
    feedback: &[String],
) -> Result<AgentOutcome<Clues>, PipelineError> {
    let agent = "clues";
    let (cml, cml_record) = ctx.require_typed::<Cml>(ArtifactType::Cml, agent)?;
    let total_chapters = ctx.spec.target_length.planned_chapters();

    let mut vars = ctx.base_vars();
    vars.insert("cml".into(), to_prompt_json(&cml));
    vars.insert("required_clues".into(), to_prompt_json(&required));
    vars.insert("total_chapters".into(), total_chapters.to_string());
    vars.insert(
        "essential_deadline".into(),
        essential_deadline(total_chapters).to_string(),
    );
    if !feedback.is_empty() {
        vars.insert(
            "blind_reader_feedback".into(),
            format!(
                "The previous clue set failed review; address every point:\n- {}",
                feedback.join("\n- ")
            ),
        );
    }

    let call = call_validated(
        &ctx.gateway,
        &ctx.call_ctx(agent, "generate"),
        ArtifactType::Clues,
        "clues.v3",
        &mut vars,
        &RetryOptions::default().with_max_tokens(6144),
    )
    .await?;

    let clues: Clues = into_typed(ArtifactType::Clues, &call)?;
    let record = ctx.persist(ArtifactType::Clues, call.payload.clone(), Some(cml_record.id))?;
    Ok(AgentOutcome {
        value: clues,
        record,
        call,
    })
}

/// Agent 6: fair-play audit over CML + clues.
pub async fn audit_fair_play(
    ctx: &AgentContext,
) -> Result<AgentOutcome<FairPlayReport>, PipelineError> {
    let agent = "fair_play_report";
    let (cml, _) = ctx.require_typed::<Cml>(ArtifactType::Cml, agent)?;
    let (clues, clues_record) = ctx.require_typed::<Clues>(ArtifactType::Clues, agent)?;

    let mut vars = ctx.base_vars();
    vars.insert("cml".into(), to_prompt_json(&cml));
    vars.insert("clues".into(), to_prompt_json(&clues));
    let call = call_validated(
        &ctx.gateway,
        &ctx.call_ctx(agent, "audit"),
        ArtifactType::FairPlayReport,
        "fair_play.v2",
        &mut vars,
        &RetryOptions::default(),
    )
    .await?;

    let report: FairPlayReport = into_typed(ArtifactType::FairPlayReport, &call)?;
    let record = ctx.persist(
        ArtifactType::FairPlayReport,
        call.payload.clone(),
        Some(clues_record.id),
    )?;
    Ok(AgentOutcome {
        value: report,
        record,
        call,
    })
}

// ── Blind reader ────────────────────────────────────────────────────

/// What the simulated reader concluded. Not persisted as an artifact; the
/// orchestrator records the verdict in a `blind_reader` event.
#[derive(Debug, Clone, Deserialize)]
pub struct BlindReaderVerdict {
    #[serde(default)]
    pub identified: bool,
    #[serde(default)]
    pub suspect: Option<String>,
    #[serde(default)]
    pub confidence: String,
    #[serde(default)]
    pub reasoning: String,
}

impl BlindReaderVerdict {
    /// The solve counts only when the named suspect is the actual culprit.
    pub fn solved(&self, culprit: &str) -> bool {
        self.identified
            && self.confidence != "impossible"
            && self.suspect.as_deref() == Some(culprit)
    }
}

/// Blind-reader simulation: a separate gateway call that sees only the
/// clues, never the solution. An unparseable answer counts as a failed
/// solve — fail closed, regenerate the clues.
pub async fn simulate_blind_reader(
    ctx: &AgentContext,
) -> Result<BlindReaderVerdict, PipelineError> {
    let agent = "blind_reader";
    let (clues, _) = ctx.require_typed::<Clues>(ArtifactType::Clues, agent)?;
    let (cast, _) = ctx.require_typed::<Cast>(ArtifactType::Cast, agent)?;

    // Reveal order, description and chapter only: no solution fields.
    let mut ordered = clues.clues.clone();
    ordered.sort_by_key(|c| c.reveal_chapter);
    let clue_lines: Vec<String> = ordered
        .iter()
        .map(|c| format!("chapter {}: {}", c.reveal_chapter, c.description))
        .collect();
    let suspect_names: Vec<&str> = cast.suspects.iter().map(|s| s.name.as_str()).collect();

    let mut vars = ctx.base_vars();
    vars.insert("clues".into(), clue_lines.join("\n"));
    vars.insert("suspect_names".into(), suspect_names.join(", "));
    let prompt = crate::prompts::render("blind_reader.v1", &vars)?;
    let response = ctx
        .gateway
        .call(
            &ctx.call_ctx(agent, "simulate"),
            &prompt,
            true,
            Duration::from_secs(120),
            2048,
        )
        .await?;

    match parse_payload(&response.text).and_then(|v| {
        serde_json::from_value::<BlindReaderVerdict>(v).map_err(|e| {
            fairplay::parse::ParseFailure {
                attempts: vec![format!("verdict shape: {e}")],
            }
        })
    }) {
        Ok(verdict) => Ok(verdict),
        Err(e) => {
            warn!(error = %e, "blind reader verdict unparseable; treating as failed solve");
            Ok(BlindReaderVerdict {
                identified: false,
                suspect: None,
                confidence: "impossible".into(),
                reasoning: "verdict unparseable".into(),
            })
        }
    }
}

// ── Novelty auditor ─────────────────────────────────────────────────

/// Agent 8: similarity scoring against the seed library.
///
/// The model rates per-category similarity; the weighted overall is always
/// recomputed locally. Missing or malformed model numbers fall back to the
/// deterministic structural comparison.
pub async fn audit_novelty(
    ctx: &AgentContext,
    exhausted: bool,
) -> Result<AgentOutcome<NoveltyAudit>, PipelineError> {
    let agent = "novelty_audit";
    let (cml, cml_record) = ctx.require_typed::<Cml>(ArtifactType::Cml, agent)?;
    let seeds = novelty::builtin_seeds();

    let mut score_cost = 0.0;
    let comparisons = if ctx.config.novelty_bypassed() {
        Vec::new()
    } else {
        let summary = serde_json::json!({
            "primary_axis": cml.meta.primary_axis,
            "false_assumption_type": cml.false_assumption.assumption_type,
            "test_method": cml.discriminating_test.method,
            "era": cml.meta.decade,
            "location": cml.meta.location_preset,
            "hidden_mechanism": cml.hidden_model.summary,
        });
        let mut vars = ctx.base_vars();
        vars.insert("cml_summary".into(), summary.to_string());
        vars.insert("seeds".into(), to_prompt_json(&seeds));
        let prompt = crate::prompts::render("novelty.v1", &vars)?;
        let response = ctx
            .gateway
            .call(
                &ctx.call_ctx(agent, "score"),
                &prompt,
                true,
                Duration::from_secs(120),
                2048,
            )
            .await?;
        score_cost = response.estimated_cost;
        rated_comparisons(&response.text, &cml, &seeds)
    };

    let audit = novelty::evaluate(comparisons, &ctx.config, &seeds, exhausted);
    info!(status = ?audit.status, reason = %audit.reason, "novelty audit evaluated");

    let payload = serde_json::to_value(&audit)
        .map_err(|e| PipelineError::Parse(format!("novelty re-serialization: {e}")))?;
    let record = ctx.persist(ArtifactType::NoveltyAudit, payload, Some(cml_record.id))?;
    Ok(AgentOutcome {
        value: audit,
        record,
        call: crate::retry::ValidatedCall {
            payload: serde_json::Value::Null,
            validation: Default::default(),
            attempts: Vec::new(),
            cost: score_cost,
        },
    })
}

/// Extract per-seed category ratings from the model's answer, falling back
/// to structural comparison per seed.
fn rated_comparisons(
    raw: &str,
    cml: &Cml,
    seeds: &[novelty::SeedPattern],
) -> Vec<(String, CategorySimilarity)> {
    let rated = parse_payload(raw).ok();
    seeds
        .iter()
        .map(|seed| {
            let from_model = rated
                .as_ref()
                .and_then(|v| v.get("comparisons"))
                .and_then(|c| c.as_array())
                .and_then(|rows| {
                    rows.iter()
                        .find(|row| row.get("seed_id").and_then(|s| s.as_str()) == Some(&seed.id))
                })
                .and_then(|row| {
                    let num = |key: &str| row.get(key).and_then(|v| v.as_f64());
                    Some(CategorySimilarity {
                        axis: num("axis")?,
                        mechanism: num("mechanism")?,
                        false_assumption: num("false_assumption")?,
                        test_method: num("test_method")?,
                        era: num("era")?,
                        location: num("location")?,
                    })
                });
            let categories =
                from_model.unwrap_or_else(|| novelty::structural_similarity(cml, seed));
            (seed.id.clone(), categories)
        })
        .collect()
}
