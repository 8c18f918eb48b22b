//! Agents 3b, 3, 4, and the character-profile pass: the case model and its
//! validation.

use tracing::{info, warn};

use fairplay::case::{BackgroundContext, Cast, CharacterProfiles, Cml, CmlValidation, HardLogicDevices};
use fairplay::model::ArtifactType;
use fairplay::PipelineError;

use super::{into_typed, to_prompt_json, AgentContext, AgentOutcome};
use crate::retry::{call_validated, RetryOptions};

/// Agent 3b: hard-logic devices. Gets a third attempt because principled
/// device enums are the hardest contract in the pipeline to hit.
pub async fn generate_devices(
    ctx: &AgentContext,
) -> Result<AgentOutcome<HardLogicDevices>, PipelineError> {
    let (background, background_record) =
        ctx.require_typed::<BackgroundContext>(ArtifactType::BackgroundContext, "hard_logic_devices")?;

    let mut vars = ctx.base_vars();
    vars.insert("background_context".into(), to_prompt_json(&background));
    let call = call_validated(
        &ctx.gateway,
        &ctx.call_ctx("hard_logic_devices", "generate"),
        ArtifactType::HardLogicDevices,
        "devices.v3",
        &mut vars,
        &RetryOptions::attempts(3),
    )
    .await?;

    let devices: HardLogicDevices = into_typed(ArtifactType::HardLogicDevices, &call)?;
    let record = ctx.persist(
        ArtifactType::HardLogicDevices,
        call.payload.clone(),
        Some(background_record.id),
    )?;
    Ok(AgentOutcome {
        value: devices,
        record,
        call,
    })
}

/// Agent 3: the CML generator.
///
/// `divergence` carries novelty constraints from the auditor's pattern
/// summary; `repair` carries targeted directives when the fair-play chain
/// escalated to a CML revision. Both render as empty sections otherwise.
pub async fn generate_cml(
    ctx: &AgentContext,
    divergence: &[String],
    repair: &[String],
) -> Result<AgentOutcome<Cml>, PipelineError> {
    let agent = "cml";
    let (cast, _) = ctx.require_typed::<Cast>(ArtifactType::Cast, agent)?;
    let (background, _) =
        ctx.require_typed::<BackgroundContext>(ArtifactType::BackgroundContext, agent)?;
    let (devices, devices_record) =
        ctx.require_typed::<HardLogicDevices>(ArtifactType::HardLogicDevices, agent)?;

    let mut vars = ctx.base_vars();
    vars.insert("cast".into(), to_prompt_json(&cast));
    vars.insert("background_context".into(), to_prompt_json(&background));
    vars.insert("hard_logic_devices".into(), to_prompt_json(&devices));
    if !divergence.is_empty() {
        vars.insert(
            "divergence_constraints".into(),
            format!(
                "Structural divergence constraints (all mandatory):\n- {}",
                divergence.join("\n- ")
            ),
        );
    }
    if !repair.is_empty() {
        vars.insert(
            "repair_directives".into(),
            format!("Targeted repairs from the last audit:\n- {}", repair.join("\n- ")),
        );
    }

    let operation = if repair.is_empty() { "generate" } else { "revise" };
    let call = call_validated(
        &ctx.gateway,
        &ctx.call_ctx(agent, operation),
        ArtifactType::Cml,
        "cml.v4",
        &mut vars,
        &RetryOptions::default().with_max_tokens(8192),
    )
    .await?;

    let mut cml: Cml = into_typed(ArtifactType::Cml, &call)?;
    enforce_spec_meta(ctx, &mut cml);

    let payload = serde_json::to_value(&cml)
        .map_err(|e| PipelineError::Parse(format!("cml re-serialization: {e}")))?;
    let record = ctx.persist(ArtifactType::Cml, payload, Some(devices_record.id))?;
    Ok(AgentOutcome {
        value: cml,
        record,
        call,
    })
}

/// Spec fields are carried into `meta` verbatim; a model that drifted gets
/// corrected rather than retried, since these fields are not creative.
fn enforce_spec_meta(ctx: &AgentContext, cml: &mut Cml) {
    let spec = &ctx.spec;
    let drifted = cml.meta.decade != spec.decade
        || cml.meta.location_preset != spec.location_preset
        || cml.meta.tone != spec.tone
        || cml.meta.primary_axis != spec.primary_axis
        || cml.meta.target_length != spec.target_length;
    if drifted {
        warn!("cml meta drifted from spec; forcing verbatim fields");
    }
    cml.meta.decade = spec.decade.clone();
    cml.meta.location_preset = spec.location_preset.clone();
    cml.meta.tone = spec.tone.clone();
    cml.meta.theme = spec.theme.clone();
    cml.meta.primary_axis = spec.primary_axis;
    cml.meta.target_length = spec.target_length;
}

/// Agent 4: CML validation against the fixed checklist.
pub async fn validate_cml(ctx: &AgentContext) -> Result<AgentOutcome<CmlValidation>, PipelineError> {
    let (cml, cml_record) = ctx.require_typed::<Cml>(ArtifactType::Cml, "cml_validation")?;

    let mut vars = ctx.base_vars();
    vars.insert("cml".into(), to_prompt_json(&cml));
    let call = call_validated(
        &ctx.gateway,
        &ctx.call_ctx("cml_validation", "audit"),
        ArtifactType::CmlValidation,
        "cml_validator.v2",
        &mut vars,
        &RetryOptions::default(),
    )
    .await?;

    let validation: CmlValidation = into_typed(ArtifactType::CmlValidation, &call)?;
    if !validation.passed {
        info!(
            directives = validation.repair_directives.len(),
            "cml validator rejected the model"
        );
    }
    let record = ctx.persist(
        ArtifactType::CmlValidation,
        call.payload.clone(),
        Some(cml_record.id),
    )?;
    Ok(AgentOutcome {
        value: validation,
        record,
        call,
    })
}

/// Character profiles, downstream of CML + cast.
pub async fn generate_character_profiles(
    ctx: &AgentContext,
) -> Result<AgentOutcome<CharacterProfiles>, PipelineError> {
    let agent = "character_profiles";
    let (cml, cml_record) = ctx.require_typed::<Cml>(ArtifactType::Cml, agent)?;
    let (cast, _) = ctx.require_typed::<Cast>(ArtifactType::Cast, agent)?;

    let mut vars = ctx.base_vars();
    vars.insert("cml".into(), to_prompt_json(&cml));
    vars.insert("cast".into(), to_prompt_json(&cast));
    let call = call_validated(
        &ctx.gateway,
        &ctx.call_ctx(agent, "generate"),
        ArtifactType::CharacterProfiles,
        "character_profiles.v2",
        &mut vars,
        &RetryOptions::default(),
    )
    .await?;

    let profiles: CharacterProfiles = into_typed(ArtifactType::CharacterProfiles, &call)?;
    let record = ctx.persist(
        ArtifactType::CharacterProfiles,
        call.payload.clone(),
        Some(cml_record.id),
    )?;
    Ok(AgentOutcome {
        value: profiles,
        record,
        call,
    })
}
