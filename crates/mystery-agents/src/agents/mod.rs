//! The agent layer.
//!
//! Every agent has the same shape: assemble inputs from latest artifacts,
//! run the validation-retry wrapper, convert the payload into its typed
//! artifact, persist. Agents never mutate run or project status and never
//! emit events — the orchestrator owns both.

pub mod casework;
pub mod cluework;
pub mod narrative;
pub mod worldbuilding;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use fairplay::model::{ArtifactRecord, ArtifactType, CaseSpec, NewArtifact};
use fairplay::{ArtifactStore, PipelineConfig, PipelineError};

use crate::gateway::{CallContext, LlmGateway};
use crate::prompts::PROMPT_VERSION;
use crate::retry::ValidatedCall;

/// Everything an agent needs for one run.
pub struct AgentContext {
    pub gateway: Arc<LlmGateway>,
    pub store: Arc<dyn ArtifactStore>,
    pub config: PipelineConfig,
    pub project_id: String,
    pub run_id: Option<String>,
    pub spec: CaseSpec,
}

/// A persisted agent result: the typed payload, its stored record, and the
/// wrapper's retry metadata.
#[derive(Debug)]
pub struct AgentOutcome<T> {
    pub value: T,
    pub record: ArtifactRecord,
    pub call: ValidatedCall,
}

impl AgentContext {
    /// Variables every prompt receives, including the uniqueness seed that
    /// keeps otherwise-identical specs from converging on one story.
    pub fn base_vars(&self) -> BTreeMap<String, String> {
        let spec = &self.spec;
        let mut vars = BTreeMap::new();
        vars.insert(
            "uniqueness_seed".into(),
            format!(
                "({}, {})",
                self.run_id.as_deref().unwrap_or("adhoc"),
                self.project_id
            ),
        );
        vars.insert("decade".into(), spec.decade.clone());
        vars.insert("location_preset".into(), spec.location_preset.clone());
        vars.insert("tone".into(), spec.tone.clone());
        vars.insert("theme".into(), spec.theme.clone());
        vars.insert("cast_size".into(), spec.cast_size.to_string());
        vars.insert("cast_names".into(), spec.cast_names.join(", "));
        vars.insert("primary_axis".into(), spec.primary_axis.to_string());
        vars.insert("target_length".into(), spec.target_length.to_string());
        vars
    }

    pub fn call_ctx(&self, agent: &str, operation: &str) -> CallContext {
        CallContext {
            project_id: self.project_id.clone(),
            run_id: self.run_id.clone(),
            agent: agent.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Latest artifact of a type, or `DependencyMissing` attributed to the
    /// requesting agent.
    pub fn require_latest(
        &self,
        artifact_type: ArtifactType,
        agent: &str,
    ) -> Result<ArtifactRecord, PipelineError> {
        self.store
            .latest_artifact(&self.project_id, artifact_type)?
            .ok_or(PipelineError::DependencyMissing {
                agent: agent.to_string(),
                missing: artifact_type,
            })
    }

    /// Latest artifact deserialized into its typed payload.
    pub fn require_typed<T: DeserializeOwned>(
        &self,
        artifact_type: ArtifactType,
        agent: &str,
    ) -> Result<(T, ArtifactRecord), PipelineError> {
        let record = self.require_latest(artifact_type, agent)?;
        let value = serde_json::from_value(record.payload.clone()).map_err(|e| {
            PipelineError::SchemaViolation {
                artifact_type,
                detail: format!("stored payload no longer deserializes: {e}"),
                errors: Vec::new(),
            }
        })?;
        Ok((value, record))
    }

    /// Persist a payload as a new artifact version.
    pub fn persist(
        &self,
        artifact_type: ArtifactType,
        payload: serde_json::Value,
        parent_artifact_id: Option<String>,
    ) -> Result<ArtifactRecord, PipelineError> {
        Ok(self.store.insert_artifact(NewArtifact {
            project_id: self.project_id.clone(),
            run_id: self.run_id.clone(),
            artifact_type,
            payload,
            source_spec_id: self.spec.id.clone(),
            parent_artifact_id,
            model: Some(self.gateway.model().to_string()),
            prompt_version: Some(PROMPT_VERSION.to_string()),
        })?)
    }
}

/// Convert a wrapper result into its typed artifact, or surface the schema
/// violations that survived the retry budget.
pub fn into_typed<T: DeserializeOwned>(
    artifact_type: ArtifactType,
    call: &ValidatedCall,
) -> Result<T, PipelineError> {
    serde_json::from_value(call.payload.clone()).map_err(|e| PipelineError::SchemaViolation {
        artifact_type,
        detail: if call.is_valid() {
            format!("payload shape mismatch: {e}")
        } else {
            format!(
                "unresolved after {} attempts: {}",
                call.attempts.len(),
                call.validation
                    .error_lines()
                    .first()
                    .cloned()
                    .unwrap_or_else(|| e.to_string())
            )
        },
        errors: call.validation.errors.clone(),
    })
}

/// Serialize a typed value for prompt interpolation.
pub fn to_prompt_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".into())
}
