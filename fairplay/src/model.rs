//! Core data model: projects, specs, runs, run events, and artifact records.
//!
//! Artifacts are immutable after write; "regeneration" always creates a new
//! version. Version sequences per `(project, type)` are strictly increasing
//! and gap-free, and `latest/<type>` is derived from the highest version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ProjectId = String;
pub type SpecId = String;
pub type RunId = String;
pub type ArtifactId = String;

/// Fresh v4 id, used for projects, specs, runs, and artifacts alike.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ── Project ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Idle,
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub status: ProjectStatus,
}

impl Project {
    pub fn new(name: &str) -> Self {
        Self {
            id: new_id(),
            name: name.to_string(),
            created_at: Utc::now(),
            status: ProjectStatus::Idle,
        }
    }
}

// ── Spec ────────────────────────────────────────────────────────────

/// The structural axis the mystery's deception rides on.
///
/// Exactly one axis value is carried verbatim from the spec into the CML
/// `meta` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryAxis {
    Temporal,
    Spatial,
    Identity,
    Behavioral,
    Authority,
}

impl PrimaryAxis {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temporal => "temporal",
            Self::Spatial => "spatial",
            Self::Identity => "identity",
            Self::Behavioral => "behavioral",
            Self::Authority => "authority",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "temporal" => Some(Self::Temporal),
            "spatial" => Some(Self::Spatial),
            "identity" => Some(Self::Identity),
            "behavioral" => Some(Self::Behavioral),
            "authority" => Some(Self::Authority),
            _ => None,
        }
    }

    pub const ALL: [PrimaryAxis; 5] = [
        Self::Temporal,
        Self::Spatial,
        Self::Identity,
        Self::Behavioral,
        Self::Authority,
    ];
}

impl std::fmt::Display for PrimaryAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target novel length, driving chapter planning and prose word budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetLength {
    Short,
    Medium,
    Long,
}

impl TargetLength {
    /// Planned chapter count; outlines may deviate by ±2.
    pub fn planned_chapters(self) -> u32 {
        match self {
            Self::Short => 12,
            Self::Medium => 18,
            Self::Long => 24,
        }
    }

    /// Acceptable total word-count range for finished prose.
    pub fn word_range(self) -> (u32, u32) {
        match self {
            Self::Short => (20_000, 35_000),
            Self::Medium => (40_000, 60_000),
            Self::Long => (60_000, 90_000),
        }
    }

    /// Prose artifacts are keyed by length so all three can coexist.
    pub fn prose_artifact_type(self) -> ArtifactType {
        match self {
            Self::Short => ArtifactType::ProseShort,
            Self::Medium => ArtifactType::ProseMedium,
            Self::Long => ArtifactType::ProseLong,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }
}

impl std::fmt::Display for TargetLength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generation request. Immutable once written; every run references one
/// spec version and every artifact records the spec that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSpec {
    pub id: SpecId,
    pub project_id: ProjectId,
    pub version: u32,
    /// e.g. "1930s"
    pub decade: String,
    /// e.g. "CountryHouse", "SeasideHotel"
    pub location_preset: String,
    pub tone: String,
    /// Free text; may embed difficulty directives.
    pub theme: String,
    pub cast_size: u32,
    #[serde(default)]
    pub cast_names: Vec<String>,
    pub primary_axis: PrimaryAxis,
    pub target_length: TargetLength,
    pub created_at: DateTime<Utc>,
}

impl CaseSpec {
    pub fn new(project_id: &str, version: u32) -> Self {
        Self {
            id: new_id(),
            project_id: project_id.to_string(),
            version,
            decade: "1930s".into(),
            location_preset: "CountryHouse".into(),
            tone: "Cozy".into(),
            theme: String::new(),
            cast_size: 6,
            cast_names: Vec::new(),
            primary_axis: PrimaryAxis::Temporal,
            target_length: TargetLength::Medium,
            created_at: Utc::now(),
        }
    }
}

// ── Run ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub project_id: ProjectId,
    pub spec_id: SpecId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// Remaining USD budget for the fair-play feedback chain.
    pub cost_budget_remaining: f64,
}

impl Run {
    pub fn new(project_id: &str, spec_id: &str, fair_play_budget: f64) -> Self {
        Self {
            id: new_id(),
            project_id: project_id.to_string(),
            spec_id: spec_id.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            cost_budget_remaining: fair_play_budget,
        }
    }
}

// ── Run events ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

/// Closed enum of progress steps.
///
/// Covers every orchestrator state transition plus the guardrail-specific
/// steps emitted inside feedback loops. Progress percentage is a client-side
/// function of the highest-ordered step seen; the core only guarantees
/// monotonic event ordering per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStep {
    SpecReady,
    SettingStarted,
    SettingDone,
    CastStarted,
    CastDone,
    BackgroundContextStarted,
    BackgroundContextDone,
    HardLogicDevicesStarted,
    HardLogicDevicesDone,
    CmlStarted,
    CmlDone,
    CmlRetry,
    CmlValidated,
    CmlRevision,
    CharacterProfilesStarted,
    CharacterProfilesDone,
    NoveltyMath,
    NoveltyAuditDone,
    CluesStarted,
    CluesDone,
    ClueGuardrailRetry,
    BlindReader,
    FairPlayReportStarted,
    FairPlayReportDone,
    OutlineStarted,
    OutlineDone,
    ProseStarted,
    ProseBatchRepair,
    ProseDone,
    SynopsisDone,
    ReleaseGate,
    RunFinished,
    RunFailed,
    RunAborted,
}

impl RunStep {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::RunFinished | Self::RunFailed | Self::RunAborted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SpecReady => "spec_ready",
            Self::SettingStarted => "setting_started",
            Self::SettingDone => "setting_done",
            Self::CastStarted => "cast_started",
            Self::CastDone => "cast_done",
            Self::BackgroundContextStarted => "background_context_started",
            Self::BackgroundContextDone => "background_context_done",
            Self::HardLogicDevicesStarted => "hard_logic_devices_started",
            Self::HardLogicDevicesDone => "hard_logic_devices_done",
            Self::CmlStarted => "cml_started",
            Self::CmlDone => "cml_done",
            Self::CmlRetry => "cml_retry",
            Self::CmlValidated => "cml_validated",
            Self::CmlRevision => "cml_revision",
            Self::CharacterProfilesStarted => "character_profiles_started",
            Self::CharacterProfilesDone => "character_profiles_done",
            Self::NoveltyMath => "novelty_math",
            Self::NoveltyAuditDone => "novelty_audit_done",
            Self::CluesStarted => "clues_started",
            Self::CluesDone => "clues_done",
            Self::ClueGuardrailRetry => "clue_guardrail_retry",
            Self::BlindReader => "blind_reader",
            Self::FairPlayReportStarted => "fair_play_report_started",
            Self::FairPlayReportDone => "fair_play_report_done",
            Self::OutlineStarted => "outline_started",
            Self::OutlineDone => "outline_done",
            Self::ProseStarted => "prose_started",
            Self::ProseBatchRepair => "prose_batch_repair",
            Self::ProseDone => "prose_done",
            Self::SynopsisDone => "synopsis_done",
            Self::ReleaseGate => "release_gate",
            Self::RunFinished => "run_finished",
            Self::RunFailed => "run_failed",
            Self::RunAborted => "run_aborted",
        }
    }
}

impl std::fmt::Display for RunStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single progress record. `seq` is the zero-based offset within the run;
/// readers stream from any offset and receive events in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub seq: u64,
    pub run_id: RunId,
    pub step: RunStep,
    pub message: String,
    pub severity: EventSeverity,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

// ── Artifacts ───────────────────────────────────────────────────────

/// Closed enum of artifact types forming the agent dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Setting,
    Cast,
    LocationProfile,
    TemporalProfile,
    SocialProfile,
    InstitutionProfile,
    BackgroundContext,
    HardLogicDevices,
    Cml,
    CmlValidation,
    CharacterProfiles,
    Clues,
    FairPlayReport,
    Outline,
    ProseShort,
    ProseMedium,
    ProseLong,
    Synopsis,
    NoveltyAudit,
    GamePack,
    GenerationReport,
}

impl ArtifactType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setting => "setting",
            Self::Cast => "cast",
            Self::LocationProfile => "location_profile",
            Self::TemporalProfile => "temporal_profile",
            Self::SocialProfile => "social_profile",
            Self::InstitutionProfile => "institution_profile",
            Self::BackgroundContext => "background_context",
            Self::HardLogicDevices => "hard_logic_devices",
            Self::Cml => "cml",
            Self::CmlValidation => "cml_validation",
            Self::CharacterProfiles => "character_profiles",
            Self::Clues => "clues",
            Self::FairPlayReport => "fair_play_report",
            Self::Outline => "outline",
            Self::ProseShort => "prose_short",
            Self::ProseMedium => "prose_medium",
            Self::ProseLong => "prose_long",
            Self::Synopsis => "synopsis",
            Self::NoveltyAudit => "novelty_audit",
            Self::GamePack => "game_pack",
            Self::GenerationReport => "generation_report",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// Reading these requires `advanced` or `expert` mode: they carry the
    /// full solution structure.
    pub fn is_solution_bearing(self) -> bool {
        matches!(self, Self::Cml | Self::CmlValidation)
    }

    pub fn is_prose(self) -> bool {
        matches!(self, Self::ProseShort | Self::ProseMedium | Self::ProseLong)
    }

    pub const ALL: [ArtifactType; 21] = [
        Self::Setting,
        Self::Cast,
        Self::LocationProfile,
        Self::TemporalProfile,
        Self::SocialProfile,
        Self::InstitutionProfile,
        Self::BackgroundContext,
        Self::HardLogicDevices,
        Self::Cml,
        Self::CmlValidation,
        Self::CharacterProfiles,
        Self::Clues,
        Self::FairPlayReport,
        Self::Outline,
        Self::ProseShort,
        Self::ProseMedium,
        Self::ProseLong,
        Self::Synopsis,
        Self::NoveltyAudit,
        Self::GamePack,
        Self::GenerationReport,
    ];
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored, versioned artifact row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: ArtifactId,
    pub project_id: ProjectId,
    /// Absent for isolated regenerations performed outside a run.
    pub run_id: Option<RunId>,
    pub artifact_type: ArtifactType,
    pub version: u32,
    pub payload: serde_json::Value,
    pub source_spec_id: SpecId,
    pub parent_artifact_id: Option<ArtifactId>,
    pub model: Option<String>,
    pub prompt_version: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields the writer supplies; the store assigns id, version, and timestamp.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub project_id: ProjectId,
    pub run_id: Option<RunId>,
    pub artifact_type: ArtifactType,
    pub payload: serde_json::Value,
    pub source_spec_id: SpecId,
    pub parent_artifact_id: Option<ArtifactId>,
    pub model: Option<String>,
    pub prompt_version: Option<String>,
}

// ── LLM operational log ─────────────────────────────────────────────

/// Metadata-only record of one gateway call. Raw prompts and responses are
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmLogRecord {
    pub timestamp: DateTime<Utc>,
    pub project_id: ProjectId,
    pub run_id: Option<RunId>,
    pub agent: String,
    pub operation: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost: f64,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_type_roundtrip() {
        for t in ArtifactType::ALL {
            assert_eq!(ArtifactType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ArtifactType::parse("no_such_type"), None);
    }

    #[test]
    fn test_solution_bearing_types() {
        assert!(ArtifactType::Cml.is_solution_bearing());
        assert!(ArtifactType::CmlValidation.is_solution_bearing());
        assert!(!ArtifactType::Synopsis.is_solution_bearing());
        assert!(!ArtifactType::ProseMedium.is_solution_bearing());
    }

    #[test]
    fn test_target_length_planning() {
        assert_eq!(TargetLength::Medium.planned_chapters(), 18);
        assert_eq!(TargetLength::Medium.word_range(), (40_000, 60_000));
        assert_eq!(
            TargetLength::Long.prose_artifact_type(),
            ArtifactType::ProseLong
        );
    }

    #[test]
    fn test_primary_axis_parse() {
        assert_eq!(PrimaryAxis::parse("temporal"), Some(PrimaryAxis::Temporal));
        assert_eq!(PrimaryAxis::parse("sideways"), None);
        for axis in PrimaryAxis::ALL {
            assert_eq!(PrimaryAxis::parse(axis.as_str()), Some(axis));
        }
    }

    #[test]
    fn test_run_step_serde_names() {
        let json = serde_json::to_string(&RunStep::FairPlayReportDone).unwrap();
        assert_eq!(json, "\"fair_play_report_done\"");
        assert!(RunStep::RunFailed.is_terminal());
        assert!(!RunStep::ReleaseGate.is_terminal());
    }

    #[test]
    fn test_run_event_serde_roundtrip() {
        let event = RunEvent {
            seq: 3,
            run_id: "r1".into(),
            step: RunStep::CluesDone,
            message: "12 clue cards".into(),
            severity: EventSeverity::Info,
            payload: serde_json::json!({"clue_count": 12}),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let restored: RunEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.seq, 3);
        assert_eq!(restored.step, RunStep::CluesDone);
    }
}
