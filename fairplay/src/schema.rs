//! Schema registry: declarative validation for every agent-produced payload.
//!
//! One schema per artifact type, keyed by the type itself. `validate` walks a
//! parsed JSON payload against field rules and reports structured errors
//! (`path`, `rule`, `expected`, `actual`); enum violations, missing required
//! fields, and type mismatches are errors, soft recommendations are warnings.
//! `normalize` fills safe defaults for missing required fields (empty arrays,
//! sentinel enum strings flagged safe) before validation and logs every fill
//! as a warning — it never fabricates semantic content.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::ArtifactType;

/// Sentinel written by `normalize` for missing enum fields that are safe to
/// default. Always fails enum validation afterwards, so the retry feedback
/// names the field explicitly.
pub const SENTINEL: &str = "unspecified";

// ── Rule model ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    Number,
    Integer,
    Bool,
    List,
    Object,
    Enum(&'static [&'static str]),
}

impl FieldKind {
    fn expected(&self) -> String {
        match self {
            Self::Str => "string".into(),
            Self::Number => "number".into(),
            Self::Integer => "integer".into(),
            Self::Bool => "bool".into(),
            Self::List => "array".into(),
            Self::Object => "object".into(),
            Self::Enum(values) => format!("one of [{}]", values.join(", ")),
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Str => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_u64() || value.is_i64(),
            Self::Bool => value.is_boolean(),
            Self::List => value.is_array(),
            Self::Object => value.is_object(),
            Self::Enum(values) => value
                .as_str()
                .map(|s| values.contains(&s))
                .unwrap_or(false),
        }
    }
}

/// How `normalize` may fill a missing required field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// Semantic content; never fabricated.
    None,
    EmptyList,
    /// `"unspecified"` sentinel; safe because it still fails enum validation.
    Sentinel,
}

/// One field rule. `path` is dot-separated; a segment ending in `[]` applies
/// the remainder of the rule to every element of that array.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub path: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub fill: Fill,
}

impl FieldRule {
    const fn req(path: &'static str, kind: FieldKind) -> Self {
        Self {
            path,
            kind,
            required: true,
            min_items: None,
            max_items: None,
            fill: Fill::None,
        }
    }

    const fn list(path: &'static str, min_items: usize) -> Self {
        Self {
            path,
            kind: FieldKind::List,
            required: true,
            min_items: Some(min_items),
            max_items: None,
            fill: Fill::None,
        }
    }

    const fn list_or_empty(path: &'static str) -> Self {
        Self {
            path,
            kind: FieldKind::List,
            required: true,
            min_items: None,
            max_items: None,
            fill: Fill::EmptyList,
        }
    }

    /// A bookkeeping list that must come back empty (anachronisms,
    /// stereotype flags). Entries are schema errors, so they drive retries;
    /// the final attempt is still accepted and the residue recorded.
    const fn empty_list(path: &'static str) -> Self {
        Self {
            path,
            kind: FieldKind::List,
            required: true,
            min_items: None,
            max_items: Some(0),
            fill: Fill::EmptyList,
        }
    }

    const fn enum_req(path: &'static str, values: &'static [&'static str]) -> Self {
        Self {
            path,
            kind: FieldKind::Enum(values),
            required: true,
            min_items: None,
            max_items: None,
            fill: Fill::Sentinel,
        }
    }
}

// ── Validation results ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaRule {
    MissingRequired,
    TypeMismatch,
    EnumViolation,
    TooFewItems,
    MustBeEmpty,
}

impl std::fmt::Display for SchemaRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired => write!(f, "missing_required"),
            Self::TypeMismatch => write!(f, "type_mismatch"),
            Self::EnumViolation => write!(f, "enum_violation"),
            Self::TooFewItems => write!(f, "too_few_items"),
            Self::MustBeEmpty => write!(f, "must_be_empty"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaError {
    pub path: String,
    pub rule: SchemaRule,
    pub expected: String,
    pub actual: Option<String>,
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at `{}`: expected {}", self.rule, self.path, self.expected)?;
        if let Some(actual) = &self.actual {
            write!(f, ", got {actual}")?;
        }
        Ok(())
    }
}

impl SchemaError {
    /// Short corrective directive fed back into retry prompts.
    pub fn directive(&self) -> String {
        match self.rule {
            SchemaRule::MissingRequired => {
                format!("Provide the required field `{}` ({}).", self.path, self.expected)
            }
            SchemaRule::TypeMismatch => {
                format!("Emit `{}` as {}.", self.path, self.expected)
            }
            SchemaRule::EnumViolation => {
                format!("Set `{}` to {}.", self.path, self.expected)
            }
            SchemaRule::TooFewItems => {
                format!("Supply at least {} entries in `{}`.", self.expected, self.path)
            }
            SchemaRule::MustBeEmpty => format!(
                "Resolve every entry of `{}` and return it empty.",
                self.path
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaWarning {
    pub path: String,
    pub note: String,
}

/// Outcome of validating one payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<SchemaError>,
    pub warnings: Vec<SchemaWarning>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// One line per error, used verbatim in retry feedback.
    pub fn error_lines(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|e| format!("{e} — {}", e.directive()))
            .collect()
    }
}

// ── Schema definitions ──────────────────────────────────────────────

const ACCESS_LEVELS: &[&str] = &["public", "restricted", "private"];
const SECLUSION_LEVELS: &[&str] = &["open", "semi", "isolated"];
const TENSION_KINDS: &[&str] = &[
    "romantic",
    "financial",
    "professional",
    "familial",
    "criminal",
];
const INSTITUTION_KINDS: &[&str] = &["police", "church", "estate", "business", "club"];
const PRINCIPLE_TYPES: &[&str] = &[
    "mechanical",
    "optical",
    "acoustic",
    "chemical",
    "chronometric",
    "documentary",
    "physiological",
];
const CASE_CLASSES: &[&str] = &["disappearance", "murder", "theft", "blackmail", "fraud"];
const FALSE_ASSUMPTION_TYPES: &[&str] = &[
    "identity_conflation",
    "time_anchor",
    "spatial_continuity",
    "authority_trust",
    "behavioral_pattern",
];
const TEST_METHODS: &[&str] = &[
    "reenactment",
    "trap",
    "material_comparison",
    "timed_demonstration",
    "witness_confrontation",
];
const KNOWLEDGE_LEVELS: &[&str] = &["none", "partial", "full"];
const AUDIT_STATUSES: &[&str] = &["pass", "needs-revision", "fail"];
const PRIMARY_AXES: &[&str] = &[
    "temporal",
    "spatial",
    "identity",
    "behavioral",
    "authority",
];
const TARGET_LENGTHS: &[&str] = &["short", "medium", "long"];
const NOVELTY_STATUSES: &[&str] = &["pass", "warning", "fail"];

#[derive(Debug, Clone, Copy)]
pub struct SchemaDef {
    pub fields: &'static [FieldRule],
}

const SETTING_SCHEMA: SchemaDef = SchemaDef {
    fields: &[
        FieldRule::req("decade", FieldKind::Str),
        FieldRule::req("location", FieldKind::Str),
        FieldRule::req("description", FieldKind::Str),
        FieldRule::list("period_anchors", 2),
        FieldRule::empty_list("anachronisms"),
        FieldRule::empty_list("implausibilities"),
    ],
};

const CAST_SCHEMA: SchemaDef = SchemaDef {
    fields: &[
        FieldRule::list("suspects", 3),
        FieldRule::req("suspects[].name", FieldKind::Str),
        FieldRule::req("suspects[].role", FieldKind::Str),
        FieldRule::req("suspects[].public_face", FieldKind::Str),
        FieldRule::req("suspects[].hidden_pressure", FieldKind::Str),
        FieldRule::empty_list("stereotype_check"),
    ],
};

const LOCATION_PROFILE_SCHEMA: SchemaDef = SchemaDef {
    fields: &[
        FieldRule::req("name", FieldKind::Str),
        FieldRule::list("zones", 2),
        FieldRule::req("zones[].name", FieldKind::Str),
        FieldRule::enum_req("zones[].access", ACCESS_LEVELS),
        FieldRule::list_or_empty("choke_points"),
        FieldRule::enum_req("seclusion", SECLUSION_LEVELS),
    ],
};

const TEMPORAL_PROFILE_SCHEMA: SchemaDef = SchemaDef {
    fields: &[
        FieldRule::list_or_empty("era_markers"),
        FieldRule::list("daily_rhythm", 3),
        FieldRule::req("daily_rhythm[].label", FieldKind::Str),
        FieldRule::req("daily_rhythm[].start_hour", FieldKind::Integer),
        FieldRule::req("daily_rhythm[].activity", FieldKind::Str),
        FieldRule::list_or_empty("key_intervals"),
    ],
};

const SOCIAL_PROFILE_SCHEMA: SchemaDef = SchemaDef {
    fields: &[
        FieldRule::list_or_empty("hierarchies"),
        FieldRule::list("tensions", 2),
        FieldRule::req("tensions[].between", FieldKind::List),
        FieldRule::enum_req("tensions[].kind", TENSION_KINDS),
        FieldRule::req("tensions[].note", FieldKind::Str),
        FieldRule::list_or_empty("norms"),
    ],
};

const INSTITUTION_PROFILE_SCHEMA: SchemaDef = SchemaDef {
    fields: &[
        FieldRule::list("institutions", 1),
        FieldRule::req("institutions[].name", FieldKind::Str),
        FieldRule::enum_req("institutions[].kind", INSTITUTION_KINDS),
        FieldRule::req("institutions[].authority_figure", FieldKind::Str),
        FieldRule::list_or_empty("procedures"),
    ],
};

const HARD_LOGIC_DEVICES_SCHEMA: SchemaDef = SchemaDef {
    fields: &[
        FieldRule::list("devices", 3),
        FieldRule::req("devices[].id", FieldKind::Str),
        FieldRule::enum_req("devices[].principle", PRINCIPLE_TYPES),
        FieldRule::req("devices[].surface_appearance", FieldKind::Str),
        FieldRule::req("devices[].underlying_reality", FieldKind::Str),
        FieldRule::list("devices[].fair_play_clues", 1),
        FieldRule::req("devices[].anti_trope_note", FieldKind::Str),
    ],
};

const CML_SCHEMA: SchemaDef = SchemaDef {
    fields: &[
        FieldRule::req("meta", FieldKind::Object),
        FieldRule::req("meta.title", FieldKind::Str),
        FieldRule::req("meta.decade", FieldKind::Str),
        FieldRule::req("meta.location_preset", FieldKind::Str),
        FieldRule::req("meta.tone", FieldKind::Str),
        FieldRule::req("meta.theme", FieldKind::Str),
        FieldRule::enum_req("meta.primary_axis", PRIMARY_AXES),
        FieldRule::enum_req("meta.target_length", TARGET_LENGTHS),
        FieldRule::enum_req("meta.case_class", CASE_CLASSES),
        FieldRule::req("surface_model", FieldKind::Object),
        FieldRule::req("surface_model.summary", FieldKind::Str),
        FieldRule::enum_req("surface_model.apparent_case_class", CASE_CLASSES),
        FieldRule::req("hidden_model", FieldKind::Object),
        FieldRule::req("hidden_model.summary", FieldKind::Str),
        FieldRule::req("hidden_model.culprit", FieldKind::Str),
        FieldRule::req("hidden_model.motive_core", FieldKind::Str),
        FieldRule::req("false_assumption", FieldKind::Object),
        FieldRule::req("false_assumption.statement", FieldKind::Str),
        FieldRule::enum_req("false_assumption.assumption_type", FALSE_ASSUMPTION_TYPES),
        FieldRule::req("false_assumption.collapse_effect", FieldKind::Str),
        FieldRule::req("constraint_space", FieldKind::Object),
        FieldRule::list("constraint_space.constraints", 4),
        FieldRule::req("constraint_space.constraints[].id", FieldKind::Str),
        FieldRule::req("constraint_space.constraints[].description", FieldKind::Str),
        FieldRule::list("inference_path", 3),
        FieldRule::req("inference_path[].index", FieldKind::Integer),
        FieldRule::req("inference_path[].premise", FieldKind::Str),
        FieldRule::req("inference_path[].conclusion", FieldKind::Str),
        FieldRule::req("discriminating_test", FieldKind::Object),
        FieldRule::req("discriminating_test.design", FieldKind::Str),
        FieldRule::enum_req("discriminating_test.method", TEST_METHODS),
        FieldRule::req("discriminating_test.observable_outcome", FieldKind::Str),
        FieldRule::req("fair_play", FieldKind::Object),
        FieldRule::list("fair_play.guarantees", 2),
        FieldRule::req("fair_play.reader_visibility", FieldKind::Str),
        FieldRule::req("quality_controls", FieldKind::Object),
        FieldRule::list_or_empty("quality_controls.anti_trope_notes"),
        FieldRule::list_or_empty("quality_controls.difficulty_notes"),
    ],
};

const CML_VALIDATION_SCHEMA: SchemaDef = SchemaDef {
    fields: &[
        FieldRule::req("passed", FieldKind::Bool),
        FieldRule::list("checklist", 5),
        FieldRule::req("checklist[].rule", FieldKind::Str),
        FieldRule::req("checklist[].passed", FieldKind::Bool),
        FieldRule::list_or_empty("repair_directives"),
    ],
};

const CHARACTER_PROFILES_SCHEMA: SchemaDef = SchemaDef {
    fields: &[
        FieldRule::list("profiles", 3),
        FieldRule::req("profiles[].name", FieldKind::Str),
        FieldRule::req("profiles[].outward_manner", FieldKind::Str),
        FieldRule::req("profiles[].private_history", FieldKind::Str),
        FieldRule::enum_req("profiles[].knowledge_of_crime", KNOWLEDGE_LEVELS),
        FieldRule::list_or_empty("profiles[].voice_notes"),
    ],
};

const CLUES_SCHEMA: SchemaDef = SchemaDef {
    fields: &[
        FieldRule::list("clues", 5),
        FieldRule::req("clues[].id", FieldKind::Str),
        FieldRule::req("clues[].description", FieldKind::Str),
        FieldRule::req("clues[].reveal_chapter", FieldKind::Integer),
        FieldRule::req("clues[].observed_by", FieldKind::Str),
    ],
};

const FAIR_PLAY_REPORT_SCHEMA: SchemaDef = SchemaDef {
    fields: &[
        FieldRule::enum_req("overall", AUDIT_STATUSES),
        FieldRule::list("checklist", 4),
        FieldRule::req("checklist[].rule", FieldKind::Str),
        FieldRule::req("checklist[].passed", FieldKind::Bool),
        FieldRule::list_or_empty("violations"),
        FieldRule::list_or_empty("recommendations"),
    ],
};

const OUTLINE_SCHEMA: SchemaDef = SchemaDef {
    fields: &[
        FieldRule::list("chapters", 6),
        FieldRule::req("chapters[].number", FieldKind::Integer),
        FieldRule::req("chapters[].title", FieldKind::Str),
        FieldRule::list("chapters[].scenes", 1),
        FieldRule::req("chapters[].scenes[].summary", FieldKind::Str),
        FieldRule::req("chapters[].word_target", FieldKind::Integer),
        FieldRule::req("reveal_chapter", FieldKind::Integer),
    ],
};

const PROSE_SCHEMA: SchemaDef = SchemaDef {
    fields: &[
        FieldRule::list("chapters", 1),
        FieldRule::req("chapters[].number", FieldKind::Integer),
        FieldRule::req("chapters[].title", FieldKind::Str),
        FieldRule::req("chapters[].text", FieldKind::Str),
        FieldRule::req("chapters[].word_count", FieldKind::Integer),
        FieldRule::req("reveal_chapter", FieldKind::Integer),
    ],
};

const SYNOPSIS_SCHEMA: SchemaDef = SchemaDef {
    fields: &[
        FieldRule::req("hook", FieldKind::Str),
        FieldRule::req("premise", FieldKind::Str),
        FieldRule::req("spoiler_free_summary", FieldKind::Str),
    ],
};

const NOVELTY_AUDIT_SCHEMA: SchemaDef = SchemaDef {
    fields: &[
        FieldRule::enum_req("status", NOVELTY_STATUSES),
        FieldRule::req("threshold", FieldKind::Number),
        FieldRule::list_or_empty("comparisons"),
        FieldRule::list_or_empty("divergence_constraints"),
        FieldRule::req("reason", FieldKind::Str),
    ],
};

/// Look up the schema for an artifact type. Composed and administrative types
/// (`background_context`, `game_pack`, `generation_report`) have no schema:
/// they are produced deterministically, never parsed from model output.
pub fn schema_for(artifact_type: ArtifactType) -> Option<&'static SchemaDef> {
    match artifact_type {
        ArtifactType::Setting => Some(&SETTING_SCHEMA),
        ArtifactType::Cast => Some(&CAST_SCHEMA),
        ArtifactType::LocationProfile => Some(&LOCATION_PROFILE_SCHEMA),
        ArtifactType::TemporalProfile => Some(&TEMPORAL_PROFILE_SCHEMA),
        ArtifactType::SocialProfile => Some(&SOCIAL_PROFILE_SCHEMA),
        ArtifactType::InstitutionProfile => Some(&INSTITUTION_PROFILE_SCHEMA),
        ArtifactType::HardLogicDevices => Some(&HARD_LOGIC_DEVICES_SCHEMA),
        ArtifactType::Cml => Some(&CML_SCHEMA),
        ArtifactType::CmlValidation => Some(&CML_VALIDATION_SCHEMA),
        ArtifactType::CharacterProfiles => Some(&CHARACTER_PROFILES_SCHEMA),
        ArtifactType::Clues => Some(&CLUES_SCHEMA),
        ArtifactType::FairPlayReport => Some(&FAIR_PLAY_REPORT_SCHEMA),
        ArtifactType::Outline => Some(&OUTLINE_SCHEMA),
        ArtifactType::ProseShort | ArtifactType::ProseMedium | ArtifactType::ProseLong => {
            Some(&PROSE_SCHEMA)
        }
        ArtifactType::Synopsis => Some(&SYNOPSIS_SCHEMA),
        ArtifactType::NoveltyAudit => Some(&NOVELTY_AUDIT_SCHEMA),
        ArtifactType::BackgroundContext
        | ArtifactType::GamePack
        | ArtifactType::GenerationReport => None,
    }
}

// ── Path walking ────────────────────────────────────────────────────

/// Resolve a rule path against a payload, returning `(concrete_path, value)`
/// pairs. A segment suffixed with `[]` fans out across array elements; an
/// empty array upstream yields no pairs (vacuous for per-element rules).
fn resolve<'a>(payload: &'a Value, path: &str) -> Vec<(String, Option<&'a Value>)> {
    let mut frontier: Vec<(String, &'a Value)> = vec![(String::new(), payload)];
    let segments: Vec<&str> = path.split('.').collect();

    for (i, segment) in segments.iter().enumerate() {
        let last = i == segments.len() - 1;
        let (key, each) = match segment.strip_suffix("[]") {
            Some(k) => (k, true),
            None => (*segment, false),
        };

        let mut next: Vec<(String, &'a Value)> = Vec::new();
        let mut missing: Vec<(String, Option<&'a Value>)> = Vec::new();

        for (prefix, value) in frontier {
            let child_path = if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{prefix}.{key}")
            };
            match value.get(key) {
                Some(child) if each => {
                    if let Some(items) = child.as_array() {
                        for (idx, item) in items.iter().enumerate() {
                            next.push((format!("{child_path}[{idx}]"), item));
                        }
                    } else {
                        // Wrong shape; surface the array itself for a
                        // type-mismatch report at the parent path.
                        missing.push((child_path, Some(child)));
                    }
                }
                Some(child) => next.push((child_path, child)),
                None => missing.push((child_path, None)),
            }
        }

        if last {
            let mut out: Vec<(String, Option<&'a Value>)> =
                next.into_iter().map(|(p, v)| (p, Some(v))).collect();
            out.extend(missing);
            return out;
        }
        if next.is_empty() {
            // Intermediate object missing entirely: report at the deepest
            // reachable path only when the leaf rule is required; callers
            // treat `None` values as missing.
            return missing
                .into_iter()
                .map(|(p, _)| {
                    let rest = segments[i + 1..].join(".");
                    (format!("{p}.{rest}"), None)
                })
                .collect();
        }
        frontier = next;
    }
    Vec::new()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Registry operations ─────────────────────────────────────────────

/// Validate a payload against the schema for `artifact_type`.
///
/// Types without a registered schema validate vacuously.
pub fn validate(artifact_type: ArtifactType, payload: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();
    let Some(def) = schema_for(artifact_type) else {
        return report;
    };

    for rule in def.fields {
        for (path, value) in resolve(payload, rule.path) {
            match value {
                None | Some(Value::Null) => {
                    if rule.required {
                        report.errors.push(SchemaError {
                            path,
                            rule: SchemaRule::MissingRequired,
                            expected: rule.kind.expected(),
                            actual: None,
                        });
                    }
                }
                Some(v) => {
                    if !rule.kind.matches(v) {
                        let (schema_rule, actual) = match rule.kind {
                            FieldKind::Enum(_) if v.is_string() => (
                                SchemaRule::EnumViolation,
                                v.as_str().map(String::from),
                            ),
                            _ => (SchemaRule::TypeMismatch, Some(type_name(v).to_string())),
                        };
                        report.errors.push(SchemaError {
                            path,
                            rule: schema_rule,
                            expected: rule.kind.expected(),
                            actual,
                        });
                    } else if let Some(items) = v.as_array() {
                        if let Some(min) = rule.min_items {
                            if items.len() < min {
                                report.errors.push(SchemaError {
                                    path: path.clone(),
                                    rule: SchemaRule::TooFewItems,
                                    expected: min.to_string(),
                                    actual: Some(items.len().to_string()),
                                });
                            }
                        }
                        if rule.max_items == Some(0) && !items.is_empty() {
                            report.errors.push(SchemaError {
                                path,
                                rule: SchemaRule::MustBeEmpty,
                                expected: "an empty list".into(),
                                actual: Some(items.len().to_string()),
                            });
                        }
                    }
                }
            }
        }
    }
    report
}

/// Walk `segments` of object keys from `root`, requiring each intermediate
/// value to already be an object. Returns `None` if any segment is missing
/// or not an object.
fn navigate_mut<'a>(root: &'a mut Value, segments: &[&str]) -> Option<&'a mut Value> {
    let mut cursor = root;
    for segment in segments {
        match cursor.get_mut(*segment) {
            Some(child) if child.is_object() => cursor = child,
            _ => return None,
        }
    }
    Some(cursor)
}

/// Fill safe defaults for missing required fields, logging each decision as a
/// warning. Only non-fanned paths are filled; per-element defaults would mean
/// inventing content.
pub fn normalize(artifact_type: ArtifactType, payload: &mut Value) -> Vec<SchemaWarning> {
    let mut warnings = Vec::new();
    let Some(def) = schema_for(artifact_type) else {
        return warnings;
    };
    if !payload.is_object() {
        return warnings;
    }

    for rule in def.fields {
        if rule.fill == Fill::None || rule.path.contains("[]") {
            continue;
        }
        let segments: Vec<&str> = rule.path.split('.').collect();
        let Some(cursor) = navigate_mut(payload, &segments[..segments.len() - 1]) else {
            continue;
        };
        let leaf = segments[segments.len() - 1];
        if let Some(obj) = cursor.as_object_mut() {
            let missing = matches!(obj.get(leaf), None | Some(Value::Null));
            if missing {
                let filled = match rule.fill {
                    Fill::EmptyList => Value::Array(Vec::new()),
                    Fill::Sentinel => Value::String(SENTINEL.to_string()),
                    Fill::None => continue,
                };
                obj.insert(leaf.to_string(), filled);
                warnings.push(SchemaWarning {
                    path: rule.path.to_string(),
                    note: match rule.fill {
                        Fill::EmptyList => "filled missing list with []".into(),
                        _ => format!("filled missing field with \"{SENTINEL}\""),
                    },
                });
            }
        }
    }
    warnings
}

/// Normalize then validate in one step; the warnings from normalization are
/// folded into the report.
pub fn normalize_and_validate(
    artifact_type: ArtifactType,
    payload: &mut Value,
) -> ValidationReport {
    let warnings = normalize(artifact_type, payload);
    let mut report = validate(artifact_type, payload);
    report.warnings.extend(warnings);
    report
}
