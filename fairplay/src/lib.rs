//! Deterministic core of the mystery generation pipeline.
//!
//! This crate holds everything that must not depend on a model being
//! reachable: the data model and typed artifact payloads, the schema
//! registry with normalization, the parse ladder for raw model output, the
//! prose sanitizer, the versioned artifact store (memory and JSON-file
//! drivers), the run-event log, the deterministic guardrails, the novelty
//! audit math, and the scoring/aggregation subsystem.
//!
//! The agent and orchestration layer lives in the `mystery-agents` crate.

pub mod case;
pub mod config;
pub mod error;
pub mod events;
pub mod guardrails;
pub mod model;
pub mod novelty;
pub mod parse;
pub mod sanitize;
pub mod schema;
pub mod scoring;
pub mod store;

// Re-export the types nearly every consumer needs.
pub use config::{LogConfig, PipelineConfig};
pub use error::{GuardrailSeverity, PipelineError, PipelineResult};
pub use events::EventEmitter;
pub use model::{
    ArtifactRecord, ArtifactType, CaseSpec, EventSeverity, LlmLogRecord, NewArtifact,
    PrimaryAxis, Project, ProjectStatus, Run, RunEvent, RunStatus, RunStep, TargetLength,
};
pub use schema::{SchemaError, SchemaWarning, ValidationReport};
pub use store::{ArtifactStore, JsonFileStore, MemoryStore, StoreError, StoreResult};

pub use guardrails::{
    check_clues, check_outline_coverage, check_prose, required_clue_list, GuardrailReport,
    GuardrailViolation, RequiredClue,
};
pub use novelty::{builtin_seeds, divergence_constraints, weighted_overall, SeedPattern};
pub use scoring::{
    aggregate, Component, GenerationReport, Grade, PhaseScore, RetryStats, ScoreTest,
    ScoringContext,
};
