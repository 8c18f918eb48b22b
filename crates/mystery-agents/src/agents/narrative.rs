//! Agents 7 and 9 plus the synopsis pass: outline, chapter-batched prose,
//! and back-cover copy.

use tracing::{info, warn};

use fairplay::case::{
    Cast, CharacterProfiles, Clues, Cml, LocationProfile, Outline, Prose, ProseChapter, Synopsis,
    TemporalProfile,
};
use fairplay::model::ArtifactType;
use fairplay::sanitize::sanitize;
use fairplay::PipelineError;

use super::{into_typed, to_prompt_json, AgentContext, AgentOutcome};
use crate::retry::{call_validated, RetryAttempt, RetryOptions, ValidatedCall};

/// Chapters per prose batch.
const BATCH_SIZE: usize = 3;

/// Agent 7: chapter/scene outline with clue placement.
pub async fn generate_outline(
    ctx: &AgentContext,
    quality_guardrails: &[String],
) -> Result<AgentOutcome<Outline>, PipelineError> {
    let agent = "outline";
    let (cml, cml_record) = ctx.require_typed::<Cml>(ArtifactType::Cml, agent)?;
    let (clues, _) = ctx.require_typed::<Clues>(ArtifactType::Clues, agent)?;
    let (profiles, _) =
        ctx.require_typed::<CharacterProfiles>(ArtifactType::CharacterProfiles, agent)?;

    let planned = ctx.spec.target_length.planned_chapters();
    let mut vars = ctx.base_vars();
    vars.insert("cml".into(), to_prompt_json(&cml));
    vars.insert("clues".into(), to_prompt_json(&clues));
    vars.insert("character_profiles".into(), to_prompt_json(&profiles));
    vars.insert("planned_chapters".into(), planned.to_string());
    vars.insert(
        "reveal_target".into(),
        (planned.saturating_sub(2)).to_string(),
    );
    if !quality_guardrails.is_empty() {
        vars.insert(
            "quality_guardrails".into(),
            format!(
                "Quality guardrails from the coverage gate; satisfy each:\n- {}",
                quality_guardrails.join("\n- ")
            ),
        );
    }

    let call = call_validated(
        &ctx.gateway,
        &ctx.call_ctx(agent, "generate"),
        ArtifactType::Outline,
        "outline.v2",
        &mut vars,
        &RetryOptions::default().with_max_tokens(8192),
    )
    .await?;

    let outline: Outline = into_typed(ArtifactType::Outline, &call)?;
    let record = ctx.persist(ArtifactType::Outline, call.payload.clone(), Some(cml_record.id))?;
    Ok(AgentOutcome {
        value: outline,
        record,
        call,
    })
}

/// Inputs the prose batches share.
struct ProseInputs {
    cml: Cml,
    cast: Cast,
    profiles: CharacterProfiles,
    location: LocationProfile,
    temporal: TemporalProfile,
}

fn prose_inputs(ctx: &AgentContext) -> Result<ProseInputs, PipelineError> {
    let agent = "prose";
    Ok(ProseInputs {
        cml: ctx.require_typed::<Cml>(ArtifactType::Cml, agent)?.0,
        cast: ctx.require_typed::<Cast>(ArtifactType::Cast, agent)?.0,
        profiles: ctx
            .require_typed::<CharacterProfiles>(ArtifactType::CharacterProfiles, agent)?
            .0,
        location: ctx
            .require_typed::<LocationProfile>(ArtifactType::LocationProfile, agent)?
            .0,
        temporal: ctx
            .require_typed::<TemporalProfile>(ArtifactType::TemporalProfile, agent)?
            .0,
    })
}

/// One batch call: write `chapters` of the outline. The batch payload is
/// validated with the prose schema and retried with schema feedback like any
/// other agent output.
async fn write_batch(
    ctx: &AgentContext,
    inputs: &ProseInputs,
    outline: &Outline,
    chapters: &[u32],
    quality_guardrails: &[String],
    repair_notes: &[String],
) -> Result<(Vec<ProseChapter>, ValidatedCall), PipelineError> {
    let slice: Vec<_> = outline
        .chapters
        .iter()
        .filter(|ch| chapters.contains(&ch.number))
        .collect();
    let range_label = match (chapters.first(), chapters.last()) {
        (Some(a), Some(b)) if a != b => format!("{a}-{b}"),
        (Some(a), _) => a.to_string(),
        _ => String::new(),
    };

    let mut vars = ctx.base_vars();
    vars.insert("chapter_range".into(), range_label.clone());
    vars.insert("outline_slice".into(), to_prompt_json(&slice));
    vars.insert("cml".into(), to_prompt_json(&inputs.cml));
    vars.insert("cast".into(), to_prompt_json(&inputs.cast));
    vars.insert("character_profiles".into(), to_prompt_json(&inputs.profiles));
    vars.insert("location_profile".into(), to_prompt_json(&inputs.location));
    vars.insert("temporal_profile".into(), to_prompt_json(&inputs.temporal));
    if !quality_guardrails.is_empty() {
        vars.insert(
            "quality_guardrails".into(),
            format!(
                "Unresolved coverage guardrails; the prose itself must satisfy them:\n- {}",
                quality_guardrails.join("\n- ")
            ),
        );
    }
    if !repair_notes.is_empty() {
        vars.insert(
            "repair_notes".into(),
            format!("Repair pass — fix exactly these defects:\n- {}", repair_notes.join("\n- ")),
        );
    }

    let call = call_validated(
        &ctx.gateway,
        &ctx.call_ctx("prose", &format!("batch {range_label}")),
        ctx.spec.target_length.prose_artifact_type(),
        "prose_batch.v2",
        &mut vars,
        &RetryOptions::default().with_max_tokens(16_384),
    )
    .await?;

    let batch: Prose = into_typed(ctx.spec.target_length.prose_artifact_type(), &call)?;
    let mut written: Vec<ProseChapter> = batch
        .chapters
        .into_iter()
        .filter(|ch| chapters.contains(&ch.number))
        .map(sanitize_chapter)
        .collect();
    written.sort_by_key(|ch| ch.number);
    Ok((written, call))
}

/// Sanitize before persistence: NFC, mojibake cleanup, residue strip, and an
/// honest word count.
fn sanitize_chapter(mut chapter: ProseChapter) -> ProseChapter {
    let cleaned = sanitize(&chapter.text);
    if cleaned.mojibake_replaced > 0 || cleaned.residue_lines_removed > 0 {
        info!(
            chapter = chapter.number,
            mojibake = cleaned.mojibake_replaced,
            residue_lines = cleaned.residue_lines_removed,
            "chapter text sanitized"
        );
    }
    chapter.word_count = cleaned.text.split_whitespace().count() as u32;
    chapter.text = cleaned.text;
    chapter
}

/// Agent 9: chapter-batched prose generation.
pub async fn generate_prose(
    ctx: &AgentContext,
    outline: &Outline,
    quality_guardrails: &[String],
) -> Result<AgentOutcome<Prose>, PipelineError> {
    let inputs = prose_inputs(ctx)?;
    let numbers: Vec<u32> = outline.chapters.iter().map(|ch| ch.number).collect();

    let mut chapters: Vec<ProseChapter> = Vec::new();
    let mut attempts: Vec<RetryAttempt> = Vec::new();
    let mut cost = 0.0;
    for batch in numbers.chunks(BATCH_SIZE) {
        let (written, call) =
            write_batch(ctx, &inputs, outline, batch, quality_guardrails, &[]).await?;
        if written.len() < batch.len() {
            warn!(
                expected = batch.len(),
                written = written.len(),
                "prose batch returned fewer chapters than requested"
            );
        }
        chapters.extend(written);
        cost += call.cost;
        attempts.extend(call.attempts);
    }
    chapters.sort_by_key(|ch| ch.number);

    let prose = Prose {
        chapters,
        reveal_chapter: outline.reveal_chapter,
    };
    let record = persist_prose(ctx, &prose, None)?;
    Ok(AgentOutcome {
        value: prose,
        record,
        call: ValidatedCall {
            payload: serde_json::Value::Null,
            validation: Default::default(),
            attempts,
            cost,
        },
    })
}

/// Targeted regeneration of specific chapters (identity drift, release-gate
/// repair). Produces a new prose version chained to the previous one.
pub async fn repair_prose(
    ctx: &AgentContext,
    previous: &AgentOutcome<Prose>,
    outline: &Outline,
    chapter_numbers: &[u32],
    repair_notes: &[String],
) -> Result<AgentOutcome<Prose>, PipelineError> {
    let inputs = prose_inputs(ctx)?;
    let mut merged = previous.value.clone();
    let mut attempts: Vec<RetryAttempt> = Vec::new();
    let mut cost = 0.0;

    for batch in chapter_numbers.chunks(BATCH_SIZE) {
        let (written, call) = write_batch(ctx, &inputs, outline, batch, &[], repair_notes).await?;
        for chapter in written {
            match merged
                .chapters
                .iter_mut()
                .find(|existing| existing.number == chapter.number)
            {
                Some(existing) => *existing = chapter,
                None => merged.chapters.push(chapter),
            }
        }
        cost += call.cost;
        attempts.extend(call.attempts);
    }
    merged.chapters.sort_by_key(|ch| ch.number);

    let record = persist_prose(ctx, &merged, Some(previous.record.id.clone()))?;
    Ok(AgentOutcome {
        value: merged,
        record,
        call: ValidatedCall {
            payload: serde_json::Value::Null,
            validation: Default::default(),
            attempts,
            cost,
        },
    })
}

fn persist_prose(
    ctx: &AgentContext,
    prose: &Prose,
    parent: Option<String>,
) -> Result<fairplay::ArtifactRecord, PipelineError> {
    let payload = serde_json::to_value(prose)
        .map_err(|e| PipelineError::Parse(format!("prose re-serialization: {e}")))?;
    ctx.persist(ctx.spec.target_length.prose_artifact_type(), payload, parent)
}

/// Synopsis from the CML alone.
pub async fn generate_synopsis(
    ctx: &AgentContext,
) -> Result<AgentOutcome<Synopsis>, PipelineError> {
    let (cml, cml_record) = ctx.require_typed::<Cml>(ArtifactType::Cml, "synopsis")?;

    let mut vars = ctx.base_vars();
    vars.insert("cml".into(), to_prompt_json(&cml));
    let call = call_validated(
        &ctx.gateway,
        &ctx.call_ctx("synopsis", "generate"),
        ArtifactType::Synopsis,
        "synopsis.v1",
        &mut vars,
        &RetryOptions::default(),
    )
    .await?;

    let synopsis: Synopsis = into_typed(ArtifactType::Synopsis, &call)?;
    let record = ctx.persist(ArtifactType::Synopsis, call.payload.clone(), Some(cml_record.id))?;
    Ok(AgentOutcome {
        value: synopsis,
        record,
        call,
    })
}
