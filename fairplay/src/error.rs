//! Pipeline error kinds, stable across drivers and transports.
//!
//! Every failure a caller can observe maps to one of these variants, and each
//! variant maps to a fixed HTTP status so the transport layer stays a
//! mechanical shim. Retry-internal failures (schema, parse) are consumed by
//! the validation-retry wrapper and only surface here once budgets run out.

use crate::model::ArtifactType;
use crate::schema::SchemaError;
use crate::store::StoreError;

/// Result alias used throughout the pipeline crates.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Severity of a deterministic guardrail finding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailSeverity {
    /// Reported only; never blocks advancement.
    Minor,
    /// Blocks the release gate.
    Major,
    /// Drives re-entry into an earlier agent.
    Critical,
}

impl std::fmt::Display for GuardrailSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minor => write!(f, "minor"),
            Self::Major => write!(f, "major"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Top-level error for the generation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Artifact failed schema validation after all retry attempts.
    #[error("schema validation failed for {artifact_type}: {detail}")]
    SchemaViolation {
        artifact_type: ArtifactType,
        detail: String,
        errors: Vec<SchemaError>,
    },

    /// All parse strategies (strict JSON, repair, YAML) failed.
    #[error("unable to parse model output: {0}")]
    Parse(String),

    /// Transport, rate, or timeout failure after gateway retries.
    #[error("llm call failed: {0}")]
    Llm(String),

    /// A deterministic guardrail rejected an artifact.
    #[error("guardrail violation ({severity}): {detail}")]
    Guardrail {
        severity: GuardrailSeverity,
        detail: String,
    },

    /// A per-loop attempt or cost cap was exhausted.
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    /// A run is already executing for this project.
    #[error("a run is already active for project {0}")]
    RunAlreadyActive(String),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("spec not found: {0}")]
    SpecNotFound(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("no {0} artifact available")]
    ArtifactNotFound(ArtifactType),

    /// An agent was invoked without its required upstream inputs.
    #[error("agent {agent} requires a {missing} artifact that does not exist")]
    DependencyMissing {
        agent: String,
        missing: ArtifactType,
    },

    /// LLM credentials were unavailable at run start.
    #[error("llm credentials are not configured")]
    CredentialMissing,

    /// Caller lacks the mode required to read this artifact.
    #[error("access denied: {0}")]
    Forbidden(String),

    /// Regeneration scope that cannot be produced as an isolated call.
    #[error("regeneration scope not supported: {0}")]
    UnsupportedScope(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Stable HTTP status code for this error kind.
    ///
    /// Validation-class failures map to 4xx, internal failures to 5xx, and
    /// missing credentials to 503 so the caller can fail fast before a run
    /// record is created.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::SchemaViolation { .. } | Self::Guardrail { .. } => 422,
            Self::Parse(_) => 502,
            Self::Llm(_) => 502,
            Self::BudgetExceeded(_) => 422,
            Self::RunAlreadyActive(_) => 409,
            Self::ProjectNotFound(_)
            | Self::SpecNotFound(_)
            | Self::RunNotFound(_)
            | Self::ArtifactNotFound(_) => 404,
            Self::DependencyMissing { .. } => 409,
            Self::CredentialMissing => 503,
            Self::Forbidden(_) => 403,
            Self::UnsupportedScope(_) => 400,
            Self::Store(_) => 500,
        }
    }

    /// Short machine-readable classification for run-failure events.
    pub fn classification(&self) -> &'static str {
        match self {
            Self::SchemaViolation { .. } => "schema_violation",
            Self::Parse(_) => "parse_error",
            Self::Llm(_) => "llm_error",
            Self::Guardrail { .. } => "guardrail_violation",
            Self::BudgetExceeded(_) => "budget_exceeded",
            Self::RunAlreadyActive(_) => "run_already_active",
            Self::ProjectNotFound(_) => "project_not_found",
            Self::SpecNotFound(_) => "spec_not_found",
            Self::RunNotFound(_) => "run_not_found",
            Self::ArtifactNotFound(_) => "artifact_not_found",
            Self::DependencyMissing { .. } => "dependency_missing",
            Self::CredentialMissing => "credential_missing",
            Self::Forbidden(_) => "forbidden",
            Self::UnsupportedScope(_) => "unsupported_scope",
            Self::Store(_) => "store_error",
        }
    }
}
