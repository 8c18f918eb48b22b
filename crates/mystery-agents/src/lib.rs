//! Agent pipeline for fair-play Golden Age mystery generation.
//!
//! Eleven LLM agents run in dependency order under a typed state machine:
//! setting → cast → background profiles → hard-logic devices → case model →
//! validation → character profiles → novelty audit → clues → fair-play audit
//! → outline → prose → release gate. Feedback edges re-enter earlier agents
//! under bounded attempt and cost budgets; the deterministic core (schemas,
//! guardrails, store, scoring) lives in the `fairplay` crate.

pub mod agents;
pub mod config;
pub mod gateway;
pub mod orchestrator;
pub mod prompts;
pub mod retry;
pub mod service;
pub mod state_machine;

pub use config::{AgentsConfig, LlmEndpoint};
pub use gateway::{
    BackendError, CallContext, ChatBackend, ChatCompletion, ChatRequest, GatewayResponse,
    LlmGateway, OpenAiBackend,
};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use prompts::{render, RenderedPrompt, PROMPT_VERSION};
pub use retry::{call_validated, RetryAttempt, RetryOptions, ValidatedCall};
pub use service::{CmlMode, ExportBundle, PipelineService, SpecDraft, StatusView};
pub use state_machine::{LoopBudgets, PipelineState, StateMachine};
