//! Pipeline orchestrator.
//!
//! Owns the run lifecycle end to end: state transitions, every feedback
//! edge and its attempt budget, the fair-play cost circuit-breaker, event
//! emission, the release gate, and final aggregation. Agents create
//! artifacts; nothing else mutates run or project status.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};

use fairplay::case::{AuditStatus, Cast, Clues, Cml, NoveltyStatus, Outline, Prose};
use fairplay::guardrails::{self, GuardrailReport};
use fairplay::model::{
    ArtifactType, EventSeverity, NewArtifact, ProjectStatus, Run, RunStatus, RunStep,
};
use fairplay::scoring::{self, GenerationReport, PhaseScore, RetryStats, ScoringContext};
use fairplay::{ArtifactStore, EventEmitter, PipelineConfig, PipelineError};

use crate::agents::{casework, cluework, narrative, worldbuilding, AgentContext};
use crate::gateway::LlmGateway;
use crate::prompts::PROMPT_VERSION;
use crate::retry::ValidatedCall;
use crate::state_machine::{LoopBudgets, PipelineState, StateMachine};

/// What `execute_run` hands back. Failures after the run record exists are
/// reported here, not as errors — the run and its events carry the story.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub report: Option<GenerationReport>,
}

/// Accumulates cost and retry bookkeeping across the run.
#[derive(Default)]
struct RunTally {
    total_cost: f64,
    stats: RetryStats,
    phases: Vec<PhaseScore>,
}

impl RunTally {
    fn absorb(&mut self, agent: &str, call: &ValidatedCall) {
        self.total_cost += call.cost;
        self.stats.total_attempts += call.attempts.len() as u32;
        if call.attempts.len() > 1 && !self.stats.retried_agents.iter().any(|a| a == agent) {
            self.stats.retried_agents.push(agent.to_string());
        }
    }

    fn reentry(&mut self) {
        self.stats.loop_reentries += 1;
    }
}

pub struct Orchestrator {
    store: Arc<dyn ArtifactStore>,
    gateway: Arc<LlmGateway>,
    config: PipelineConfig,
    emitter: Arc<EventEmitter>,
    budgets: LoopBudgets,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        gateway: Arc<LlmGateway>,
        config: PipelineConfig,
        emitter: Arc<EventEmitter>,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
            emitter,
            budgets: LoopBudgets::default(),
        }
    }

    /// Execute one run for a project against its latest spec.
    ///
    /// Pre-run validation errors (unknown project, active run, missing spec)
    /// surface as `Err` before any record is created; everything after run
    /// creation terminates in a `RunOutcome`.
    pub async fn execute_run(&self, project_id: &str) -> Result<RunOutcome, PipelineError> {
        let mut project = self
            .store
            .get_project(project_id)?
            .ok_or_else(|| PipelineError::ProjectNotFound(project_id.to_string()))?;
        if project.status == ProjectStatus::Running {
            return Err(PipelineError::RunAlreadyActive(project_id.to_string()));
        }
        let spec = self
            .store
            .latest_spec(project_id)?
            .ok_or_else(|| PipelineError::SpecNotFound(project_id.to_string()))?;

        let mut run = Run::new(project_id, &spec.id, self.config.fair_play_cost_ceiling);
        self.store.put_run(&run)?;
        project.status = ProjectStatus::Running;
        self.store.put_project(&project)?;
        info!(project_id, run_id = %run.id, spec = %spec.id, "run started");

        let ctx = AgentContext {
            gateway: self.gateway.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            project_id: project_id.to_string(),
            run_id: Some(run.id.clone()),
            spec,
        };

        let mut sm = StateMachine::new();
        let mut tally = RunTally::default();
        let result = self.pipeline(&ctx, &mut run, &mut sm, &mut tally).await;

        let report = self.write_report(&ctx, &mut tally);
        let status = match result {
            Ok(()) => {
                run.status = RunStatus::Succeeded;
                self.emit(&run.id, RunStep::RunFinished, EventSeverity::Info, "run finished", json!({}));
                RunStatus::Succeeded
            }
            Err(e) => {
                error!(run_id = %run.id, error = %e, "run failed");
                let _ = sm.fail(&e.to_string());
                run.status = RunStatus::Failed;
                self.emit(
                    &run.id,
                    RunStep::RunFailed,
                    EventSeverity::Error,
                    e.to_string(),
                    json!({"classification": e.classification()}),
                );
                RunStatus::Failed
            }
        };
        run.finished_at = Some(chrono::Utc::now());
        self.store.put_run(&run)?;
        project.status = ProjectStatus::Idle;
        self.store.put_project(&project)?;

        Ok(RunOutcome {
            run_id: run.id,
            status,
            report,
        })
    }

    fn emit(
        &self,
        run_id: &str,
        step: RunStep,
        severity: EventSeverity,
        message: impl Into<String>,
        payload: serde_json::Value,
    ) {
        if let Err(e) = self.emitter.emit(run_id, step, severity, message, payload) {
            warn!(error = %e, "failed to emit run event");
        }
    }

    fn scoring_ctx<'a>(&self, ctx: &'a AgentContext, cml: Option<&'a Cml>) -> ScoringContext<'a> {
        ScoringContext {
            spec: &ctx.spec,
            cml,
            target_length: ctx.spec.target_length,
            partial_generation: false,
        }
    }

    /// The agent DAG with its feedback loops. Any `Err` fails the run.
    async fn pipeline(
        &self,
        ctx: &AgentContext,
        run: &mut Run,
        sm: &mut StateMachine,
        tally: &mut RunTally,
    ) -> Result<(), PipelineError> {
        let run_id = run.id.clone();
        let advance = |sm: &mut StateMachine, to: PipelineState, reason: Option<&str>| {
            sm.advance(to, reason)
                .map_err(|e| PipelineError::Guardrail {
                    severity: fairplay::GuardrailSeverity::Critical,
                    detail: e.to_string(),
                })
        };

        self.emit(&run_id, RunStep::SpecReady, EventSeverity::Info, "spec resolved", json!({"spec_id": ctx.spec.id}));

        // Agent 1 — setting
        self.emit(&run_id, RunStep::SettingStarted, EventSeverity::Info, "generating setting", json!({}));
        let setting = worldbuilding::generate_setting(ctx).await?;
        tally.absorb("setting", &setting.call);
        tally.phases.push(scoring::score_setting(&setting.value, &self.scoring_ctx(ctx, None)));
        self.emit(&run_id, RunStep::SettingDone, EventSeverity::Info, "setting ready", json!({"version": setting.record.version}));
        advance(sm, PipelineState::SettingDone, None)?;

        // Agent 2 — cast
        self.emit(&run_id, RunStep::CastStarted, EventSeverity::Info, "casting suspects", json!({}));
        let cast = worldbuilding::generate_cast(ctx).await?;
        tally.absorb("cast", &cast.call);
        tally.phases.push(scoring::score_cast(&cast.value, &self.scoring_ctx(ctx, None)));
        self.emit(&run_id, RunStep::CastDone, EventSeverity::Info, format!("{} suspects", cast.value.suspects.len()), json!({"version": cast.record.version}));
        advance(sm, PipelineState::CastDone, None)?;

        // Agents 2b–2e — background profiles, then deterministic composition
        self.emit(&run_id, RunStep::BackgroundContextStarted, EventSeverity::Info, "profiling background", json!({}));
        let location = worldbuilding::generate_location_profile(ctx).await?;
        tally.absorb("location_profile", &location.call);
        let temporal = worldbuilding::generate_temporal_profile(ctx).await?;
        tally.absorb("temporal_profile", &temporal.call);
        let social = worldbuilding::generate_social_profile(ctx).await?;
        tally.absorb("social_profile", &social.call);
        let institution = worldbuilding::generate_institution_profile(ctx).await?;
        tally.absorb("institution_profile", &institution.call);
        let (background, background_record) = worldbuilding::compose_background_context(ctx)?;
        tally.phases.push(scoring::score_background(&background, &self.scoring_ctx(ctx, None)));
        self.emit(&run_id, RunStep::BackgroundContextDone, EventSeverity::Info, "background composed", json!({"version": background_record.version}));
        advance(sm, PipelineState::BackgroundContextDone, None)?;

        // Agent 3b — hard-logic devices
        self.emit(&run_id, RunStep::HardLogicDevicesStarted, EventSeverity::Info, "engineering devices", json!({}));
        let devices = casework::generate_devices(ctx).await?;
        tally.absorb("hard_logic_devices", &devices.call);
        tally.phases.push(scoring::score_devices(&devices.value, &self.scoring_ctx(ctx, None)));
        self.emit(&run_id, RunStep::HardLogicDevicesDone, EventSeverity::Info, format!("{} devices", devices.value.devices.len()), json!({"version": devices.record.version}));
        advance(sm, PipelineState::HardLogicDevicesDone, None)?;

        // Agent 3 — CML, with one validator-driven regeneration
        self.emit(&run_id, RunStep::CmlStarted, EventSeverity::Info, "composing case model", json!({}));
        let mut cml = casework::generate_cml(ctx, &[], &[]).await?;
        tally.absorb("cml", &cml.call);
        self.emit(&run_id, RunStep::CmlDone, EventSeverity::Info, "case model drafted", json!({"version": cml.record.version}));
        advance(sm, PipelineState::CmlDraft, None)?;

        let mut validation = casework::validate_cml(ctx).await?;
        tally.absorb("cml_validation", &validation.call);
        if !validation.value.passed {
            tally.reentry();
            self.emit(
                &run_id,
                RunStep::CmlRevision,
                EventSeverity::Warning,
                "validator rejected case model; regenerating once",
                json!({"directives": validation.value.repair_directives}),
            );
            cml = casework::generate_cml(ctx, &[], &validation.value.repair_directives).await?;
            tally.absorb("cml", &cml.call);
            validation = casework::validate_cml(ctx).await?;
            tally.absorb("cml_validation", &validation.call);
        }
        self.emit(
            &run_id,
            RunStep::CmlValidated,
            EventSeverity::Info,
            if validation.value.passed { "case model validated" } else { "case model accepted with validator objections" },
            json!({"passed": validation.value.passed}),
        );
        advance(sm, PipelineState::CmlValidated, None)?;
        tally.phases.push(scoring::score_cml(&cml.value, &validation.value, &self.scoring_ctx(ctx, Some(&cml.value))));

        // Character profiles
        self.emit(&run_id, RunStep::CharacterProfilesStarted, EventSeverity::Info, "profiling characters", json!({}));
        let profiles = casework::generate_character_profiles(ctx).await?;
        tally.absorb("character_profiles", &profiles.call);
        self.emit(&run_id, RunStep::CharacterProfilesDone, EventSeverity::Info, format!("{} profiles", profiles.value.profiles.len()), json!({"version": profiles.record.version}));
        advance(sm, PipelineState::CharacterProfilesDone, None)?;

        // Agent 8 — novelty audit, with one divergence regeneration
        let mut audit = cluework::audit_novelty(ctx, false).await?;
        tally.absorb("novelty_audit", &audit.call);
        self.emit(
            &run_id,
            RunStep::NoveltyMath,
            EventSeverity::Info,
            audit.value.reason.clone(),
            json!({"threshold": audit.value.threshold, "comparisons": audit.value.comparisons, "top_match": audit.value.top_match}),
        );
        advance(sm, PipelineState::NoveltyAudited, None)?;
        if audit.value.status == NoveltyStatus::Fail && self.budgets.novelty_regens > 0 {
            tally.reentry();
            self.emit(
                &run_id,
                RunStep::CmlRetry,
                EventSeverity::Warning,
                "structural echo of a seed pattern; regenerating case model",
                json!({"divergence_constraints": audit.value.divergence_constraints}),
            );
            advance(sm, PipelineState::CmlDraft, Some("novelty fail"))?;
            cml = casework::generate_cml(ctx, &audit.value.divergence_constraints, &[]).await?;
            tally.absorb("cml", &cml.call);
            audit = cluework::audit_novelty(ctx, true).await?;
            tally.absorb("novelty_audit", &audit.call);
            self.emit(
                &run_id,
                RunStep::NoveltyMath,
                EventSeverity::Info,
                audit.value.reason.clone(),
                json!({"threshold": audit.value.threshold, "top_match": audit.value.top_match}),
            );
            advance(sm, PipelineState::NoveltyAudited, Some("re-audit"))?;
        }
        if audit.value.status == NoveltyStatus::Fail {
            return Err(PipelineError::Guardrail {
                severity: fairplay::GuardrailSeverity::Critical,
                detail: format!("novelty hard fail: {}", audit.value.reason),
            });
        }
        let novelty_status = audit.value.status;
        self.emit(
            &run_id,
            RunStep::NoveltyAuditDone,
            if novelty_status == NoveltyStatus::Pass { EventSeverity::Info } else { EventSeverity::Warning },
            format!("novelty audit: {novelty_status:?}"),
            json!({"status": novelty_status}),
        );
        tally.phases.push(scoring::score_novelty(&audit.value, &self.scoring_ctx(ctx, Some(&cml.value))));

        // Agent 5 — clues, under the clue guardrails
        self.emit(&run_id, RunStep::CluesStarted, EventSeverity::Info, "writing clue cards", json!({}));
        let (mut clues, mut clue_report) = self.clues_with_guardrails(ctx, &run_id, tally, &cml.value, &cast.value, &[]).await?;
        self.emit(&run_id, RunStep::CluesDone, EventSeverity::Info, format!("{} clue cards", clues.value.clues.len()), json!({"version": clues.record.version}));
        advance(sm, PipelineState::CluesDone, None)?;

        // Blind-reader simulation
        let verdict = cluework::simulate_blind_reader(ctx).await?;
        let solved = verdict.solved(&cml.value.hidden_model.culprit);
        self.emit(
            &run_id,
            RunStep::BlindReader,
            if solved { EventSeverity::Info } else { EventSeverity::Warning },
            if solved { "blind reader named the culprit" } else { "blind reader could not solve the case" },
            json!({"identified": verdict.identified, "suspect": verdict.suspect, "confidence": verdict.confidence}),
        );
        if !solved && self.budgets.blind_reader_regens > 0 {
            tally.reentry();
            let feedback = vec![format!(
                "a blind reader seeing only the clues failed to identify the culprit; their reasoning: {}",
                verdict.reasoning
            )];
            let (regen, regen_report) = self.clues_with_guardrails(ctx, &run_id, tally, &cml.value, &cast.value, &feedback).await?;
            clues = regen;
            clue_report = regen_report;
            let second = cluework::simulate_blind_reader(ctx).await?;
            self.emit(
                &run_id,
                RunStep::BlindReader,
                EventSeverity::Info,
                "blind reader re-run after clue regeneration",
                json!({"identified": second.identified, "suspect": second.suspect, "confidence": second.confidence}),
            );
        }
        tally.phases.push(scoring::score_clues(&clues.value, &clue_report, &self.scoring_ctx(ctx, Some(&cml.value))));

        // Agent 6 — fair-play audit with its feedback chains
        self.emit(&run_id, RunStep::FairPlayReportStarted, EventSeverity::Info, "auditing fair play", json!({}));
        let fair_play = self
            .fair_play_chain(ctx, &run_id, run, sm, tally, &mut cml, &cast.value)
            .await?;
        tally.phases.push(scoring::score_fair_play(&fair_play, &self.scoring_ctx(ctx, Some(&cml.value))));

        // Agent 7 — outline under the coverage gate
        self.emit(&run_id, RunStep::OutlineStarted, EventSeverity::Info, "outlining chapters", json!({}));
        let mut outline = narrative::generate_outline(ctx, &[]).await?;
        tally.absorb("outline", &outline.call);
        let mut gate = guardrails::check_outline_coverage(&cml.value, &cast.value, &outline.value);
        let mut carried_guardrails: Vec<String> = Vec::new();
        if !gate.is_clean() && self.budgets.outline_regens > 0 {
            tally.reentry();
            outline = narrative::generate_outline(ctx, &gate.recommendations).await?;
            tally.absorb("outline", &outline.call);
            gate = guardrails::check_outline_coverage(&cml.value, &cast.value, &outline.value);
        }
        if !gate.is_clean() {
            // Unresolved coverage propagates to the prose agent.
            carried_guardrails = gate.recommendations.clone();
            warn!(violations = gate.violations.len(), "outline coverage unresolved; propagating to prose");
        }
        self.emit(&run_id, RunStep::OutlineDone, EventSeverity::Info, format!("{} chapters", outline.value.chapter_count()), json!({"version": outline.record.version, "coverage_violations": gate.violations.len()}));
        advance(sm, PipelineState::OutlineDone, None)?;
        tally.phases.push(scoring::score_outline(&outline.value, &gate, &self.scoring_ctx(ctx, Some(&cml.value))));

        // Agent 9 — prose
        self.emit(&run_id, RunStep::ProseStarted, EventSeverity::Info, "writing prose in chapter batches", json!({}));
        let mut prose = narrative::generate_prose(ctx, &outline.value, &carried_guardrails).await?;
        tally.absorb("prose", &prose.call);

        let mut release = guardrails::check_prose(&cml.value, &cast.value, &prose.value);
        if release.violations.iter().any(|v| v.code == "identity_drift") && self.budgets.prose_regens > 0 {
            // Loop 9: identity drift triggers one full prose regeneration,
            // not a chapter patch — the drift directive rides along with any
            // carried coverage guardrails for every batch of the rewrite.
            tally.reentry();
            self.emit(
                &run_id,
                RunStep::ProseBatchRepair,
                EventSeverity::Warning,
                "identity drift after the reveal; regenerating prose in full",
                json!({"scope": "full", "reveal_chapter": prose.value.reveal_chapter}),
            );
            let mut drift_notes = carried_guardrails.clone();
            drift_notes.push(format!(
                "after the reveal in chapter {}, refer to the culprit {} by name, never only by role",
                prose.value.reveal_chapter, cml.value.hidden_model.culprit
            ));
            prose = narrative::generate_prose(ctx, &outline.value, &drift_notes).await?;
            tally.absorb("prose", &prose.call);
            release = guardrails::check_prose(&cml.value, &cast.value, &prose.value);
        }
        self.emit(&run_id, RunStep::ProseDone, EventSeverity::Info, format!("{} chapters, {} words", prose.value.chapters.len(), prose.value.total_words()), json!({"version": prose.record.version}));
        advance(sm, PipelineState::ProseDone, None)?;

        // Synopsis
        let synopsis = narrative::generate_synopsis(ctx).await?;
        tally.absorb("synopsis", &synopsis.call);
        self.emit(&run_id, RunStep::SynopsisDone, EventSeverity::Info, "synopsis ready", json!({"version": synopsis.record.version}));
        tally.phases.push(scoring::score_synopsis(&synopsis.value, &self.scoring_ctx(ctx, Some(&cml.value))));

        // Game pack is planned, not implemented: a documented placeholder
        // artifact rather than synthetic content.
        self.store.insert_artifact(NewArtifact {
            project_id: ctx.project_id.clone(),
            run_id: Some(run_id.clone()),
            artifact_type: ArtifactType::GamePack,
            payload: json!({"status": "not_implemented", "reason": "game pack generation is planned but not part of this pipeline"}),
            source_spec_id: ctx.spec.id.clone(),
            parent_artifact_id: None,
            model: None,
            prompt_version: Some(PROMPT_VERSION.to_string()),
        })?;

        // Release gate
        advance(sm, PipelineState::ReleaseGate, None)?;
        release = self
            .release_repair(ctx, &run_id, sm, tally, &cml.value, &cast.value, &outline.value, &mut prose, release)
            .await?;
        let blocking = release.blocking();
        self.emit(
            &run_id,
            RunStep::ReleaseGate,
            if blocking { EventSeverity::Error } else { EventSeverity::Info },
            if blocking { "release gate failed" } else { "release gate passed" },
            json!({"violations": release.violations}),
        );
        tally.phases.push(scoring::score_prose(&prose.value, &release, &self.scoring_ctx(ctx, Some(&cml.value))));
        if blocking {
            return Err(PipelineError::Guardrail {
                severity: release.max_severity().unwrap_or(fairplay::GuardrailSeverity::Major),
                detail: format!(
                    "release gate: {}",
                    release.violation_lines().join("; ")
                ),
            });
        }

        advance(sm, PipelineState::Succeeded, None)?;
        Ok(())
    }

    /// Agent 5 plus the clue guardrail loop: one retargeted regeneration on a
    /// blocking report, then advance even with unresolved majors.
    async fn clues_with_guardrails(
        &self,
        ctx: &AgentContext,
        run_id: &str,
        tally: &mut RunTally,
        cml: &Cml,
        cast: &Cast,
        extra_feedback: &[String],
    ) -> Result<(crate::agents::AgentOutcome<Clues>, GuardrailReport), PipelineError> {
        let required = guardrails::required_clue_list(cml, cast);
        let total_chapters = ctx.spec.target_length.planned_chapters();

        let mut clues = cluework::generate_clues(ctx, &required, extra_feedback).await?;
        tally.absorb("clues", &clues.call);
        let mut report = guardrails::check_clues(cml, cast, &clues.value, total_chapters);

        if report.blocking() && self.budgets.clue_guardrail_regens > 0 {
            tally.reentry();
            self.emit(
                run_id,
                RunStep::ClueGuardrailRetry,
                EventSeverity::Warning,
                format!("{} clue guardrail violations; regenerating", report.violations.len()),
                json!({"violations": report.violation_lines()}),
            );
            let mut feedback = report.violation_lines();
            feedback.extend(extra_feedback.iter().cloned());
            clues = cluework::generate_clues(ctx, &required, &feedback).await?;
            tally.absorb("clues", &clues.call);
            report = guardrails::check_clues(cml, cast, &clues.value, total_chapters);
            if report.blocking() {
                warn!(
                    violations = report.violations.len(),
                    "advancing with unresolved clue guardrail violations"
                );
            }
        }
        Ok((clues, report))
    }

    /// Agent 6 and feedback loops 3/4: clue regeneration under the cost
    /// ceiling, structural escalation into a CML revision, and the
    /// persistent-failure abort.
    #[allow(clippy::too_many_arguments)]
    async fn fair_play_chain(
        &self,
        ctx: &AgentContext,
        run_id: &str,
        run: &mut Run,
        sm: &mut StateMachine,
        tally: &mut RunTally,
        cml: &mut crate::agents::AgentOutcome<Cml>,
        cast: &Cast,
    ) -> Result<fairplay::case::FairPlayReport, PipelineError> {
        let mut audit = cluework::audit_fair_play(ctx).await?;
        self.spend_fair_play(run, tally, &audit.call)?;
        self.emit_fair_play(run_id, &audit.value);
        sm.advance(PipelineState::FairPlayAudited, None)
            .map_err(|e| PipelineError::Guardrail {
                severity: fairplay::GuardrailSeverity::Critical,
                detail: e.to_string(),
            })?;

        if audit.value.overall == AuditStatus::Pass {
            return Ok(audit.value);
        }

        if audit.value.has_structural_violation() && self.budgets.cml_revisions > 0 {
            // Loop 4: structural escalation — CML revision, clues, re-audit.
            tally.reentry();
            let directives: Vec<String> = audit
                .value
                .violations
                .iter()
                .map(|v| format!("{:?}: {}", v.class, v.detail))
                .chain(audit.value.recommendations.iter().cloned())
                .collect();
            self.emit(
                run_id,
                RunStep::CmlRevision,
                EventSeverity::Warning,
                "structural fair-play violation; revising case model",
                json!({"directives": directives}),
            );
            sm.advance(PipelineState::CmlValidated, Some("fair-play structural revision"))
                .ok();
            *cml = casework::generate_cml(ctx, &[], &directives).await?;
            self.spend_fair_play(run, tally, &cml.call)?;
            let validation = casework::validate_cml(ctx).await?;
            self.spend_fair_play(run, tally, &validation.call)?;
            self.emit(
                run_id,
                RunStep::CmlValidated,
                EventSeverity::Info,
                "revised case model validated",
                json!({"passed": validation.value.passed}),
            );

            sm.advance(PipelineState::CluesDone, Some("clues after revision")).ok();
            let (clues, _) = self
                .clues_with_guardrails(ctx, run_id, tally, &cml.value, cast, &[])
                .await?;
            self.emit(
                run_id,
                RunStep::CluesDone,
                EventSeverity::Info,
                format!("{} clue cards after revision", clues.value.clues.len()),
                json!({"version": clues.record.version}),
            );

            sm.advance(PipelineState::FairPlayAudited, Some("re-audit")).ok();
            audit = cluework::audit_fair_play(ctx).await?;
            self.spend_fair_play(run, tally, &audit.call)?;
            self.emit_fair_play(run_id, &audit.value);

            if audit.value.overall != AuditStatus::Pass && audit.value.has_structural_violation() {
                return Err(PipelineError::Guardrail {
                    severity: fairplay::GuardrailSeverity::Critical,
                    detail: "persistent_fair_play: structural violations survived the revision chain".into(),
                });
            }
            return Ok(audit.value);
        }

        if self.budgets.fair_play_clue_regens > 0 {
            // Loop 3: one clue regeneration + re-audit under the ceiling.
            tally.reentry();
            let feedback: Vec<String> = audit
                .value
                .violations
                .iter()
                .map(|v| v.detail.clone())
                .chain(audit.value.recommendations.iter().cloned())
                .collect();
            sm.advance(PipelineState::CluesDone, Some("fair-play clue retry")).ok();
            let (clues, _) = self
                .clues_with_guardrails(ctx, run_id, tally, &cml.value, cast, &feedback)
                .await?;
            self.emit(
                run_id,
                RunStep::CluesDone,
                EventSeverity::Info,
                format!("{} clue cards after fair-play feedback", clues.value.clues.len()),
                json!({"version": clues.record.version}),
            );
            sm.advance(PipelineState::FairPlayAudited, Some("re-audit")).ok();
            audit = cluework::audit_fair_play(ctx).await?;
            self.spend_fair_play(run, tally, &audit.call)?;
            self.emit_fair_play(run_id, &audit.value);
        }

        if audit.value.overall == AuditStatus::Fail && audit.value.has_structural_violation() {
            return Err(PipelineError::Guardrail {
                severity: fairplay::GuardrailSeverity::Critical,
                detail: "persistent_fair_play: audit still failing after clue regeneration".into(),
            });
        }
        Ok(audit.value)
    }

    /// Debit the fair-play circuit-breaker. The ceiling bounds the whole
    /// audit chain; crossing it aborts rather than looping further.
    fn spend_fair_play(
        &self,
        run: &mut Run,
        tally: &mut RunTally,
        call: &ValidatedCall,
    ) -> Result<(), PipelineError> {
        tally.absorb("fair_play_chain", call);
        run.cost_budget_remaining -= call.cost;
        if run.cost_budget_remaining < 0.0 {
            return Err(PipelineError::BudgetExceeded(format!(
                "fair-play chain exceeded cost ceiling of {:.2}",
                self.config.fair_play_cost_ceiling
            )));
        }
        self.store.put_run(run)?;
        Ok(())
    }

    fn emit_fair_play(&self, run_id: &str, report: &fairplay::case::FairPlayReport) {
        let severity = match report.overall {
            AuditStatus::Pass => EventSeverity::Info,
            AuditStatus::NeedsRevision => EventSeverity::Warning,
            AuditStatus::Fail => EventSeverity::Error,
        };
        self.emit(
            run_id,
            RunStep::FairPlayReportDone,
            severity,
            format!("fair-play audit: {:?}", report.overall),
            json!({"overall": report.overall, "violations": report.violations}),
        );
    }

    /// Loop 10: one targeted prose regeneration when the release gate flags
    /// a missing discriminating-test realization or suspect closure.
    #[allow(clippy::too_many_arguments)]
    async fn release_repair(
        &self,
        ctx: &AgentContext,
        run_id: &str,
        sm: &mut StateMachine,
        tally: &mut RunTally,
        cml: &Cml,
        cast: &Cast,
        outline: &Outline,
        prose: &mut crate::agents::AgentOutcome<Prose>,
        release: GuardrailReport,
    ) -> Result<GuardrailReport, PipelineError> {
        let repairable = release.violations.iter().any(|v| {
            v.code == "discriminating_test_unrealized" || v.code == "suspect_closure_missing"
        });
        if !repairable || self.budgets.prose_repairs == 0 {
            return Ok(release);
        }

        tally.reentry();
        let reveal = prose.value.reveal_chapter.max(1);
        let mut chapters: Vec<u32> = vec![reveal.saturating_sub(1).max(1), reveal];
        chapters.dedup();
        let notes: Vec<String> = release.recommendations.clone();
        self.emit(
            run_id,
            RunStep::ProseBatchRepair,
            EventSeverity::Warning,
            "release gate flagged missing coverage; repairing reveal chapters",
            json!({"chapters": chapters, "violations": release.violation_lines()}),
        );
        sm.advance(PipelineState::ProseDone, Some("validation repair")).ok();
        *prose = narrative::repair_prose(ctx, prose, outline, &chapters, &notes).await?;
        tally.absorb("prose", &prose.call);
        sm.advance(PipelineState::ReleaseGate, Some("re-check")).ok();

        Ok(guardrails::check_prose(cml, cast, &prose.value))
    }

    /// Persist the generation report, on success and failure alike — a failed
    /// run still reports `passed=false` with whatever phases completed.
    fn write_report(&self, ctx: &AgentContext, tally: &mut RunTally) -> Option<GenerationReport> {
        if tally.phases.is_empty() {
            return None;
        }
        let report = scoring::aggregate(
            std::mem::take(&mut tally.phases),
            std::mem::take(&mut tally.stats),
            tally.total_cost,
        );
        let payload = match serde_json::to_value(&report) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to serialize generation report");
                return Some(report);
            }
        };
        if let Err(e) = self.store.insert_artifact(NewArtifact {
            project_id: ctx.project_id.clone(),
            run_id: ctx.run_id.clone(),
            artifact_type: ArtifactType::GenerationReport,
            payload,
            source_spec_id: ctx.spec.id.clone(),
            parent_artifact_id: None,
            model: None,
            prompt_version: Some(PROMPT_VERSION.to_string()),
        }) {
            warn!(error = %e, "failed to persist generation report");
        }
        Some(report)
    }
}
