//! Pipeline state machine — explicit states and legal transition guards.
//!
//! The orchestrator loop calls `advance()` to move between states. Each call
//! validates the transition against the state graph and records it, so every
//! feedback loop re-entry is auditable after the run. Backward transitions
//! exist only along the declared feedback edges; everything else is illegal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// The set of pipeline states. Every run starts at `SpecReady` and
/// terminates at `Succeeded` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    SpecReady,
    SettingDone,
    CastDone,
    BackgroundContextDone,
    HardLogicDevicesDone,
    /// CML generated, not yet validated.
    CmlDraft,
    CmlValidated,
    CharacterProfilesDone,
    NoveltyAudited,
    CluesDone,
    FairPlayAudited,
    OutlineDone,
    ProseDone,
    ReleaseGate,
    Succeeded,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SpecReady => "SpecReady",
            Self::SettingDone => "SettingDone",
            Self::CastDone => "CastDone",
            Self::BackgroundContextDone => "BackgroundContextDone",
            Self::HardLogicDevicesDone => "HardLogicDevicesDone",
            Self::CmlDraft => "CmlDraft",
            Self::CmlValidated => "CmlValidated",
            Self::CharacterProfilesDone => "CharacterProfilesDone",
            Self::NoveltyAudited => "NoveltyAudited",
            Self::CluesDone => "CluesDone",
            Self::FairPlayAudited => "FairPlayAudited",
            Self::OutlineDone => "OutlineDone",
            Self::ProseDone => "ProseDone",
            Self::ReleaseGate => "ReleaseGate",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Legal transitions.
///
/// ```text
/// SpecReady → SettingDone → CastDone → BackgroundContextDone
///   → HardLogicDevicesDone → CmlDraft → CmlValidated
///   → CharacterProfilesDone → NoveltyAudited → CluesDone
///   → FairPlayAudited → OutlineDone → ProseDone → ReleaseGate → Succeeded
///
/// Feedback edges:
///   CmlValidated   → CmlDraft     (validator rejection → regenerate once)
///   NoveltyAudited → CmlDraft     (novelty fail → divergence regen)
///   CmlDraft       → NoveltyAudited  (re-audit after novelty regen)
///   FairPlayAudited → CluesDone   (clue regeneration + re-audit)
///   FairPlayAudited → CmlValidated (structural escalation → CML revision)
///   CmlValidated   → CluesDone    (resume after fair-play CML revision)
///   ReleaseGate    → ProseDone    (validation-repair pass)
/// ```
fn is_legal_transition(from: PipelineState, to: PipelineState) -> bool {
    use PipelineState::*;

    // Any non-terminal state can fail.
    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (SpecReady, SettingDone)
            | (SettingDone, CastDone)
            | (CastDone, BackgroundContextDone)
            | (BackgroundContextDone, HardLogicDevicesDone)
            | (HardLogicDevicesDone, CmlDraft)
            | (CmlDraft, CmlValidated)
            | (CmlValidated, CharacterProfilesDone)
            | (CharacterProfilesDone, NoveltyAudited)
            | (NoveltyAudited, CluesDone)
            | (CluesDone, FairPlayAudited)
            | (FairPlayAudited, OutlineDone)
            | (OutlineDone, ProseDone)
            | (ProseDone, ReleaseGate)
            | (ReleaseGate, Succeeded)
            // Feedback edges
            | (CmlValidated, CmlDraft)
            | (NoveltyAudited, CmlDraft)
            | (CmlDraft, NoveltyAudited)
            | (FairPlayAudited, CluesDone)
            | (FairPlayAudited, CmlValidated)
            | (CmlValidated, CluesDone)
            | (ReleaseGate, ProseDone)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: PipelineState,
    pub to: PipelineState,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: PipelineState,
    pub to: PipelineState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// The pipeline state machine: current state plus the full transition log.
#[derive(Debug)]
pub struct StateMachine {
    current: PipelineState,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: PipelineState::SpecReady,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> PipelineState {
        self.current
    }

    /// Attempt to advance to the next state.
    pub fn advance(
        &mut self,
        to: PipelineState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }
        tracing::debug!(from = %self.current, to = %to, "state transition");
        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Transition to `Failed` from any non-terminal state.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(PipelineState::Failed, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// How many times a state has been entered, for per-edge attempt budgets.
    pub fn entries(&self, state: PipelineState) -> u32 {
        self.transitions.iter().filter(|t| t.to == state).count() as u32
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Attempt budgets for the backward edges. Each loop gets exactly the budget
/// the feedback design allows; exceeding it escalates or aborts.
#[derive(Debug, Clone)]
pub struct LoopBudgets {
    pub novelty_regens: u32,
    pub clue_guardrail_regens: u32,
    pub blind_reader_regens: u32,
    pub fair_play_clue_regens: u32,
    pub cml_revisions: u32,
    pub validator_regens: u32,
    pub outline_regens: u32,
    pub prose_regens: u32,
    pub prose_repairs: u32,
}

impl Default for LoopBudgets {
    fn default() -> Self {
        Self {
            novelty_regens: 1,
            clue_guardrail_regens: 1,
            blind_reader_regens: 1,
            fair_play_clue_regens: 1,
            cml_revisions: 1,
            validator_regens: 1,
            outline_regens: 1,
            prose_regens: 1,
            prose_repairs: 1,
        }
    }
}
