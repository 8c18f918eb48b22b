//! Agents 1, 2, and 2b–2e: setting, cast, and the four background profiles.

use tracing::{info, warn};

use fairplay::case::{
    BackgroundContext, Cast, InstitutionProfile, LocationProfile, Setting, SocialProfile,
    Suspect, TemporalProfile,
};
use fairplay::model::ArtifactType;
use fairplay::PipelineError;

use super::{into_typed, to_prompt_json, AgentContext, AgentOutcome};
use crate::retry::{call_validated, RetryOptions};

/// Agent 1: period setting with plausibility bookkeeping.
pub async fn generate_setting(ctx: &AgentContext) -> Result<AgentOutcome<Setting>, PipelineError> {
    let mut vars = ctx.base_vars();
    let call = call_validated(
        &ctx.gateway,
        &ctx.call_ctx("setting", "generate"),
        ArtifactType::Setting,
        "setting.v2",
        &mut vars,
        &RetryOptions::default(),
    )
    .await?;

    let setting: Setting = into_typed(ArtifactType::Setting, &call)?;
    if !setting.anachronisms.is_empty() || !setting.implausibilities.is_empty() {
        warn!(
            anachronisms = setting.anachronisms.len(),
            implausibilities = setting.implausibilities.len(),
            "setting accepted with unresolved plausibility flags"
        );
    }
    let record = ctx.persist(ArtifactType::Setting, call.payload.clone(), None)?;
    Ok(AgentOutcome {
        value: setting,
        record,
        call,
    })
}

/// Agent 2: suspects. Undersized casts are padded with safe defaults rather
/// than failing the run.
pub async fn generate_cast(ctx: &AgentContext) -> Result<AgentOutcome<Cast>, PipelineError> {
    let (setting, setting_record) = ctx.require_typed::<Setting>(ArtifactType::Setting, "cast")?;

    let mut vars = ctx.base_vars();
    vars.insert("setting".into(), to_prompt_json(&setting));
    let call = call_validated(
        &ctx.gateway,
        &ctx.call_ctx("cast", "generate"),
        ArtifactType::Cast,
        "cast.v2",
        &mut vars,
        &RetryOptions::default(),
    )
    .await?;

    let mut cast: Cast = into_typed(ArtifactType::Cast, &call)?;
    pad_cast(&mut cast, ctx.spec.cast_size, &ctx.spec.cast_names);
    if !cast.stereotype_check.is_empty() {
        warn!(
            flags = cast.stereotype_check.len(),
            "cast accepted with unresolved stereotype flags"
        );
    }

    let payload = serde_json::to_value(&cast)
        .map_err(|e| PipelineError::Parse(format!("cast re-serialization: {e}")))?;
    let record = ctx.persist(ArtifactType::Cast, payload, Some(setting_record.id))?;
    Ok(AgentOutcome {
        value: cast,
        record,
        call,
    })
}

/// Fill an undersized cast up to `target` with neutral house guests.
fn pad_cast(cast: &mut Cast, target: u32, preferred_names: &[String]) {
    let mut next_guest = 1;
    while (cast.suspects.len() as u32) < target {
        let name = preferred_names
            .iter()
            .find(|n| cast.suspects.iter().all(|s| &s.name != *n))
            .cloned()
            .unwrap_or_else(|| {
                let name = format!("Guest {next_guest}");
                next_guest += 1;
                name
            });
        info!(name = %name, "padding undersized cast");
        cast.suspects.push(Suspect {
            name,
            role: "house guest".into(),
            public_face: "An unremarkable acquaintance of the household.".into(),
            hidden_pressure: "Quiet money troubles kept from the family.".into(),
        });
    }
}

macro_rules! profile_agent {
    ($fn_name:ident, $ty:ty, $artifact:expr, $template:expr, $agent:expr) => {
        pub async fn $fn_name(ctx: &AgentContext) -> Result<AgentOutcome<$ty>, PipelineError> {
            let (setting, setting_record) =
                ctx.require_typed::<Setting>(ArtifactType::Setting, $agent)?;
            let mut vars = ctx.base_vars();
            vars.insert("setting".into(), to_prompt_json(&setting));
            if let Ok((cast, _)) = ctx.require_typed::<Cast>(ArtifactType::Cast, $agent) {
                vars.insert("cast".into(), to_prompt_json(&cast));
            }
            let call = call_validated(
                &ctx.gateway,
                &ctx.call_ctx($agent, "generate"),
                $artifact,
                $template,
                &mut vars,
                &RetryOptions::default(),
            )
            .await?;
            let value: $ty = into_typed($artifact, &call)?;
            let record = ctx.persist($artifact, call.payload.clone(), Some(setting_record.id))?;
            Ok(AgentOutcome {
                value,
                record,
                call,
            })
        }
    };
}

// Agents 2b–2e. Enum violations are the common retry trigger here, which is
// exactly what the schema feedback loop is for.
profile_agent!(
    generate_location_profile,
    LocationProfile,
    ArtifactType::LocationProfile,
    "profile.location.v1",
    "location_profile"
);
profile_agent!(
    generate_temporal_profile,
    TemporalProfile,
    ArtifactType::TemporalProfile,
    "profile.temporal.v1",
    "temporal_profile"
);
profile_agent!(
    generate_social_profile,
    SocialProfile,
    ArtifactType::SocialProfile,
    "profile.social.v1",
    "social_profile"
);
profile_agent!(
    generate_institution_profile,
    InstitutionProfile,
    ArtifactType::InstitutionProfile,
    "profile.institution.v1",
    "institution_profile"
);

/// Compose the `background_context` artifact from the four profiles. Pure
/// assembly — no gateway call.
pub fn compose_background_context(
    ctx: &AgentContext,
) -> Result<(BackgroundContext, fairplay::ArtifactRecord), PipelineError> {
    let agent = "background_context";
    let (location, _) = ctx.require_typed::<LocationProfile>(ArtifactType::LocationProfile, agent)?;
    let (temporal, _) = ctx.require_typed::<TemporalProfile>(ArtifactType::TemporalProfile, agent)?;
    let (social, _) = ctx.require_typed::<SocialProfile>(ArtifactType::SocialProfile, agent)?;
    let (institution, last) =
        ctx.require_typed::<InstitutionProfile>(ArtifactType::InstitutionProfile, agent)?;

    let context = BackgroundContext {
        location,
        temporal,
        social,
        institution,
    };
    let payload = serde_json::to_value(&context)
        .map_err(|e| PipelineError::Parse(format!("background re-serialization: {e}")))?;
    let record = ctx.persist(ArtifactType::BackgroundContext, payload, Some(last.id))?;
    Ok((context, record))
}
