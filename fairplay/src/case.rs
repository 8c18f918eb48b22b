//! Typed artifact payloads.
//!
//! Dynamic LLM payloads are converted into these structs immediately after
//! parse + normalize; everything downstream (guardrails, scoring, the
//! orchestrator) operates on typed artifacts only. Field names match the
//! wire payloads the agents produce, so `serde_json::from_value` on a
//! normalized payload is the only conversion step.

use serde::{Deserialize, Serialize};

use crate::model::{PrimaryAxis, TargetLength};

// ── Setting (Agent 1) ───────────────────────────────────────────────

/// Period setting with explicit plausibility bookkeeping. The anachronism
/// and implausibility lists must be empty in an accepted artifact; non-empty
/// lists after max attempts are recorded as a major violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub decade: String,
    pub location: String,
    pub description: String,
    /// 2–3 period-accurate anchors (objects, customs, technology).
    #[serde(default)]
    pub period_anchors: Vec<String>,
    #[serde(default)]
    pub anachronisms: Vec<String>,
    #[serde(default)]
    pub implausibilities: Vec<String>,
}

// ── Cast (Agent 2) ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suspect {
    pub name: String,
    /// Household/social role, e.g. "estate solicitor".
    pub role: String,
    pub public_face: String,
    pub hidden_pressure: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cast {
    pub suspects: Vec<Suspect>,
    /// Flagged stereotype concerns; must be empty after retries.
    #[serde(default)]
    pub stereotype_check: Vec<String>,
}

impl Cast {
    /// Suspects other than the named culprit.
    pub fn non_culprits<'a>(&'a self, culprit: &str) -> Vec<&'a Suspect> {
        self.suspects.iter().filter(|s| s.name != culprit).collect()
    }
}

// ── Background profiles (Agents 2b–2e) ──────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Public,
    Restricted,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeclusionLevel {
    Open,
    Semi,
    Isolated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationZone {
    pub name: String,
    pub access: AccessLevel,
}

/// Agent 2b output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationProfile {
    pub name: String,
    pub zones: Vec<LocationZone>,
    #[serde(default)]
    pub choke_points: Vec<String>,
    pub seclusion: SeclusionLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeBlock {
    pub label: String,
    /// 0–23; schedule anchors for alibi reasoning.
    pub start_hour: u32,
    pub activity: String,
}

/// Agent 2c output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalProfile {
    #[serde(default)]
    pub era_markers: Vec<String>,
    pub daily_rhythm: Vec<TimeBlock>,
    /// Windows the plot hinges on ("the forty minutes after dinner").
    #[serde(default)]
    pub key_intervals: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensionKind {
    Romantic,
    Financial,
    Professional,
    Familial,
    Criminal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialTension {
    pub between: Vec<String>,
    pub kind: TensionKind,
    pub note: String,
}

/// Agent 2d output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialProfile {
    #[serde(default)]
    pub hierarchies: Vec<String>,
    pub tensions: Vec<SocialTension>,
    #[serde(default)]
    pub norms: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstitutionKind {
    Police,
    Church,
    Estate,
    Business,
    Club,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Institution {
    pub name: String,
    pub kind: InstitutionKind,
    pub authority_figure: String,
}

/// Agent 2e output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstitutionProfile {
    pub institutions: Vec<Institution>,
    #[serde(default)]
    pub procedures: Vec<String>,
}

/// Deterministic composition of the four profile artifacts. Not an LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundContext {
    pub location: LocationProfile,
    pub temporal: TemporalProfile,
    pub social: SocialProfile,
    pub institution: InstitutionProfile,
}

// ── Hard-logic devices (Agent 3b) ───────────────────────────────────

/// Physical principle class a device rests on. Enum violations here are the
/// most common retry trigger for Agent 3b.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipleType {
    Mechanical,
    Optical,
    Acoustic,
    Chemical,
    Chronometric,
    Documentary,
    Physiological,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicDevice {
    pub id: String,
    pub principle: PrincipleType,
    /// What witnesses believe they observed.
    pub surface_appearance: String,
    /// What actually happened.
    pub underlying_reality: String,
    /// Clue seeds that keep the device fair.
    pub fair_play_clues: Vec<String>,
    pub anti_trope_note: String,
}

/// Minimum 3 devices; gated before CML generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardLogicDevices {
    pub devices: Vec<LogicDevice>,
}

// ── CML (Agent 3) ───────────────────────────────────────────────────

/// What kind of crime the case presents as / resolves into. A transition
/// (disappearance that becomes a murder) requires a bridge scene in prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseClass {
    Disappearance,
    Murder,
    Theft,
    Blackmail,
    Fraud,
}

impl CaseClass {
    /// Vocabulary used by the deterministic continuity check on prose.
    pub fn terms(self) -> &'static [&'static str] {
        match self {
            Self::Disappearance => &["disappear", "missing", "vanish"],
            Self::Murder => &["murder", "body", "killed", "dead"],
            Self::Theft => &["theft", "stolen", "missing jewels", "robbery"],
            Self::Blackmail => &["blackmail", "letter", "extortion"],
            Self::Fraud => &["fraud", "forgery", "swindle"],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmlMeta {
    pub title: String,
    pub decade: String,
    pub location_preset: String,
    pub tone: String,
    pub theme: String,
    pub primary_axis: PrimaryAxis,
    pub target_length: TargetLength,
    pub case_class: CaseClass,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceModel {
    pub summary: String,
    /// How the case first presents; may differ from `meta.case_class`.
    pub apparent_case_class: CaseClass,
    #[serde(default)]
    pub observed_timeline: Vec<String>,
    #[serde(default)]
    pub assumed_facts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiddenModel {
    pub summary: String,
    #[serde(default)]
    pub true_sequence: Vec<String>,
    pub culprit: String,
    pub motive_core: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FalseAssumptionType {
    IdentityConflation,
    TimeAnchor,
    SpatialContinuity,
    AuthorityTrust,
    BehavioralPattern,
}

/// The mistaken inferential belief the surface model relies on. Removing it
/// collapses the surface conclusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FalseAssumption {
    pub statement: String,
    pub assumption_type: FalseAssumptionType,
    pub collapse_effect: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseConstraint {
    pub id: String,
    pub description: String,
    /// Names of suspects/devices this constraint binds.
    #[serde(default)]
    pub binds: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintSpace {
    pub constraints: Vec<CaseConstraint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceStep {
    /// Zero-based; clue cards reference this index.
    pub index: u32,
    pub premise: String,
    pub conclusion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestMethod {
    Reenactment,
    Trap,
    MaterialComparison,
    TimedDemonstration,
    WitnessConfrontation,
}

/// The narrative device that distinguishes the culprit from innocents via an
/// observable outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscriminatingTest {
    pub design: String,
    pub method: TestMethod,
    pub observable_outcome: String,
    /// Suspects the outcome clears.
    #[serde(default)]
    pub excludes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FairPlayContract {
    #[serde(default)]
    pub guarantees: Vec<String>,
    pub reader_visibility: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityControls {
    #[serde(default)]
    pub anti_trope_notes: Vec<String>,
    #[serde(default)]
    pub difficulty_notes: Vec<String>,
}

/// The canonical structured representation of a mystery case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cml {
    pub meta: CmlMeta,
    pub surface_model: SurfaceModel,
    pub hidden_model: HiddenModel,
    pub false_assumption: FalseAssumption,
    pub constraint_space: ConstraintSpace,
    pub inference_path: Vec<InferenceStep>,
    pub discriminating_test: DiscriminatingTest,
    pub fair_play: FairPlayContract,
    pub quality_controls: QualityControls,
}

impl Cml {
    /// Whether the case class shifts between first presentation and solution.
    pub fn has_case_transition(&self) -> bool {
        self.surface_model.apparent_case_class != self.meta.case_class
    }
}

// ── CML validation (Agent 4) ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub rule: String,
    pub passed: bool,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmlValidation {
    pub passed: bool,
    pub checklist: Vec<ChecklistItem>,
    /// Targeted repair directives for the single regeneration attempt.
    #[serde(default)]
    pub repair_directives: Vec<String>,
}

// ── Character profiles (downstream of CML + cast) ───────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeLevel {
    None,
    Partial,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub name: String,
    pub outward_manner: String,
    pub private_history: String,
    pub knowledge_of_crime: KnowledgeLevel,
    #[serde(default)]
    pub voice_notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterProfiles {
    pub profiles: Vec<CharacterProfile>,
}

// ── Clues (Agent 5) ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClueCard {
    pub id: String,
    pub description: String,
    pub reveal_chapter: u32,
    #[serde(default)]
    pub essential: bool,
    /// Index into the CML inference path this clue supports.
    pub supports_inference_step: Option<u32>,
    /// Suspect this clue eliminates.
    pub eliminates_suspect: Option<String>,
    #[serde(default)]
    pub supports_false_assumption: bool,
    #[serde(default)]
    pub contradicts_false_assumption: bool,
    #[serde(default)]
    pub references_false_assumption: bool,
    #[serde(default)]
    pub references_discriminating_test: bool,
    /// Who can attest to this clue; "detective" alone is a fair-play defect.
    pub observed_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clues {
    pub clues: Vec<ClueCard>,
}

// ── Fair-play audit (Agent 6) ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditStatus {
    Pass,
    NeedsRevision,
    Fail,
}

/// Violation classes the audit can raise. The structural classes escalate to
/// CML revision instead of a clue retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditViolationClass {
    InferencePathAbstract,
    ConstraintSpaceInsufficient,
    CluePlacement,
    ReaderVisibility,
    Other,
}

impl AuditViolationClass {
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            Self::InferencePathAbstract | Self::ConstraintSpaceInsufficient
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditViolation {
    pub class: AuditViolationClass,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FairPlayReport {
    pub overall: AuditStatus,
    pub checklist: Vec<ChecklistItem>,
    #[serde(default)]
    pub violations: Vec<AuditViolation>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl FairPlayReport {
    pub fn has_structural_violation(&self) -> bool {
        self.violations.iter().any(|v| v.class.is_structural())
    }
}

// ── Outline (Agent 7) ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenePlan {
    pub summary: String,
    #[serde(default)]
    pub clues_revealed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterPlan {
    pub number: u32,
    pub title: String,
    pub scenes: Vec<ScenePlan>,
    pub word_target: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outline {
    pub chapters: Vec<ChapterPlan>,
    /// Chapter in which the culprit is revealed.
    pub reveal_chapter: u32,
}

impl Outline {
    pub fn chapter_count(&self) -> u32 {
        self.chapters.len() as u32
    }
}

// ── Prose (Agent 9) ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProseChapter {
    pub number: u32,
    pub title: String,
    pub text: String,
    pub word_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prose {
    pub chapters: Vec<ProseChapter>,
    pub reveal_chapter: u32,
}

impl Prose {
    pub fn total_words(&self) -> u32 {
        self.chapters.iter().map(|c| c.word_count).sum()
    }

    pub fn full_text(&self) -> String {
        let mut out = String::new();
        for ch in &self.chapters {
            out.push_str(&ch.text);
            out.push('\n');
        }
        out
    }
}

// ── Synopsis ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Synopsis {
    pub hook: String,
    pub premise: String,
    /// Back-cover copy; must not leak the solution.
    pub spoiler_free_summary: String,
}

// ── Novelty audit (Agent 8) ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoveltyStatus {
    Pass,
    Warning,
    Fail,
}

/// Per-category similarity against one seed pattern, each in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CategorySimilarity {
    pub axis: f64,
    pub mechanism: f64,
    pub false_assumption: f64,
    pub test_method: f64,
    pub era: f64,
    pub location: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedSimilarity {
    pub seed_id: String,
    pub categories: CategorySimilarity,
    /// Weighted sum, always recomputed locally from `categories`.
    pub overall: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoveltyAudit {
    pub status: NoveltyStatus,
    pub threshold: f64,
    pub comparisons: Vec<SeedSimilarity>,
    pub top_match: Option<String>,
    #[serde(default)]
    pub divergence_constraints: Vec<String>,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_transition_detection() {
        let meta = CmlMeta {
            title: "t".into(),
            decade: "1930s".into(),
            location_preset: "CountryHouse".into(),
            tone: "Cozy".into(),
            theme: String::new(),
            primary_axis: PrimaryAxis::Temporal,
            target_length: TargetLength::Medium,
            case_class: CaseClass::Murder,
        };
        let cml = Cml {
            meta,
            surface_model: SurfaceModel {
                summary: String::new(),
                apparent_case_class: CaseClass::Disappearance,
                observed_timeline: vec![],
                assumed_facts: vec![],
            },
            hidden_model: HiddenModel {
                summary: String::new(),
                true_sequence: vec![],
                culprit: "X".into(),
                motive_core: String::new(),
            },
            false_assumption: FalseAssumption {
                statement: String::new(),
                assumption_type: FalseAssumptionType::TimeAnchor,
                collapse_effect: String::new(),
            },
            constraint_space: ConstraintSpace {
                constraints: vec![],
            },
            inference_path: vec![],
            discriminating_test: DiscriminatingTest {
                design: String::new(),
                method: TestMethod::Reenactment,
                observable_outcome: String::new(),
                excludes: vec![],
            },
            fair_play: FairPlayContract {
                guarantees: vec![],
                reader_visibility: String::new(),
            },
            quality_controls: QualityControls {
                anti_trope_notes: vec![],
                difficulty_notes: vec![],
            },
        };
        assert!(cml.has_case_transition());
    }

    #[test]
    fn test_audit_status_wire_format() {
        let json = serde_json::to_string(&AuditStatus::NeedsRevision).unwrap();
        assert_eq!(json, "\"needs-revision\"");
    }

    #[test]
    fn test_structural_violation_classes() {
        assert!(AuditViolationClass::InferencePathAbstract.is_structural());
        assert!(AuditViolationClass::ConstraintSpaceInsufficient.is_structural());
        assert!(!AuditViolationClass::CluePlacement.is_structural());
    }

    #[test]
    fn test_prose_word_totals() {
        let prose = Prose {
            chapters: vec![
                ProseChapter {
                    number: 1,
                    title: "One".into(),
                    text: "a b c".into(),
                    word_count: 3,
                },
                ProseChapter {
                    number: 2,
                    title: "Two".into(),
                    text: "d e".into(),
                    word_count: 2,
                },
            ],
            reveal_chapter: 2,
        };
        assert_eq!(prose.total_words(), 5);
        assert!(prose.full_text().contains("a b c"));
    }

    #[test]
    fn test_non_culprit_filter() {
        let cast = Cast {
            suspects: vec![
                Suspect {
                    name: "A".into(),
                    role: "butler".into(),
                    public_face: String::new(),
                    hidden_pressure: String::new(),
                },
                Suspect {
                    name: "B".into(),
                    role: "heir".into(),
                    public_face: String::new(),
                    hidden_pressure: String::new(),
                },
            ],
            stereotype_check: vec![],
        };
        let others = cast.non_culprits("B");
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].name, "A");
    }
}
