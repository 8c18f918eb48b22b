//! Typed service facade.
//!
//! Every operation of the external API surface exists here as a typed call;
//! the HTTP transport is a mechanical shim that maps `PipelineError` via
//! `http_status()`. Mode gating for solution-bearing artifacts lives here,
//! not in the transport, so property tests can cover it without sockets.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use fairplay::model::{
    ArtifactRecord, ArtifactType, CaseSpec, PrimaryAxis, Project, Run, RunEvent, RunStatus,
    TargetLength,
};
use fairplay::scoring::GenerationReport;
use fairplay::{
    ArtifactStore, EventEmitter, JsonFileStore, MemoryStore, PipelineConfig, PipelineError,
};

use crate::agents::AgentContext;
use crate::config::AgentsConfig;
use crate::gateway::{ChatBackend, LlmGateway, OpenAiBackend};
use crate::orchestrator::{Orchestrator, RunOutcome};

/// Caller mode from the `x-cml-mode` header. Anything unrecognized is
/// `user`; only `advanced` and `expert` may read solution-bearing artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmlMode {
    User,
    Advanced,
    Expert,
}

impl CmlMode {
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("advanced") => Self::Advanced,
            Some(v) if v.eq_ignore_ascii_case("expert") => Self::Expert,
            _ => Self::User,
        }
    }

    pub fn can_read_solution(self) -> bool {
        matches!(self, Self::Advanced | Self::Expert)
    }
}

/// Incoming spec fields; versioning and ids are assigned by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct SpecDraft {
    pub decade: String,
    pub location_preset: String,
    pub tone: String,
    #[serde(default)]
    pub theme: String,
    pub cast_size: u32,
    #[serde(default)]
    pub cast_names: Vec<String>,
    pub primary_axis: PrimaryAxis,
    pub target_length: TargetLength,
}

/// Project status as the API reports it.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub project: Project,
    pub active_run: Option<Run>,
    pub last_run: Option<Run>,
}

/// Packaged artifact subset for export. Solution-bearing payloads appear
/// only for advanced/expert callers.
#[derive(Debug, Clone, Serialize)]
pub struct ExportBundle {
    pub project_id: String,
    pub artifacts: std::collections::BTreeMap<String, serde_json::Value>,
}

/// Cross-project report statistics.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateReportStats {
    pub reports: usize,
    pub passed: usize,
    pub mean_overall_score: f64,
}

/// Regeneration scopes producible as an isolated call.
const ISOLATED_SCOPES: &[&str] = &["character_profiles", "synopsis"];

pub struct PipelineService {
    store: Arc<dyn ArtifactStore>,
    emitter: Arc<EventEmitter>,
    pipeline_config: PipelineConfig,
    agents_config: AgentsConfig,
    backend_override: Option<Arc<dyn ChatBackend>>,
}

impl PipelineService {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        pipeline_config: PipelineConfig,
        agents_config: AgentsConfig,
    ) -> Self {
        let emitter = Arc::new(EventEmitter::new(store.clone()));
        Self {
            store,
            emitter,
            pipeline_config,
            agents_config,
            backend_override: None,
        }
    }

    /// Build from environment: JSON-file store when `CML_JSON_DB_PATH` is
    /// set, in-memory otherwise. Interrupted runs are failed at startup.
    pub fn from_env() -> Result<Self, PipelineError> {
        let pipeline_config = PipelineConfig::from_env();
        let agents_config = AgentsConfig::from_env();
        let store: Arc<dyn ArtifactStore> = match &pipeline_config.json_db_path {
            Some(path) => Arc::new(JsonFileStore::open(path)?),
            None => Arc::new(MemoryStore::new()),
        };
        let interrupted = store.fail_interrupted_runs()?;
        if !interrupted.is_empty() {
            info!(count = interrupted.len(), "failed interrupted runs at startup");
        }
        Ok(Self::new(store, pipeline_config, agents_config))
    }

    /// Inject a scripted backend (tests, offline smoke runs).
    pub fn with_backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.backend_override = Some(backend);
        self
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn emitter(&self) -> &Arc<EventEmitter> {
        &self.emitter
    }

    // ── Projects ────────────────────────────────────────────────────

    pub fn create_project(&self, name: &str) -> Result<Project, PipelineError> {
        let project = Project::new(name);
        self.store.put_project(&project)?;
        Ok(project)
    }

    pub fn list_projects(&self) -> Result<Vec<Project>, PipelineError> {
        Ok(self.store.list_projects()?)
    }

    pub fn get_project(&self, id: &str) -> Result<Project, PipelineError> {
        self.store
            .get_project(id)?
            .ok_or_else(|| PipelineError::ProjectNotFound(id.to_string()))
    }

    // ── Specs ───────────────────────────────────────────────────────

    pub fn store_spec(
        &self,
        project_id: &str,
        draft: SpecDraft,
    ) -> Result<CaseSpec, PipelineError> {
        self.get_project(project_id)?;
        let version = self
            .store
            .latest_spec(project_id)?
            .map(|s| s.version + 1)
            .unwrap_or(1);
        let spec = CaseSpec {
            decade: draft.decade,
            location_preset: draft.location_preset,
            tone: draft.tone,
            theme: draft.theme,
            cast_size: draft.cast_size,
            cast_names: draft.cast_names,
            primary_axis: draft.primary_axis,
            target_length: draft.target_length,
            ..CaseSpec::new(project_id, version)
        };
        self.store.put_spec(&spec)?;
        Ok(spec)
    }

    pub fn get_spec(&self, id: &str) -> Result<CaseSpec, PipelineError> {
        self.store
            .get_spec(id)?
            .ok_or_else(|| PipelineError::SpecNotFound(id.to_string()))
    }

    // ── Runs ────────────────────────────────────────────────────────

    fn gateway(&self) -> Result<Arc<LlmGateway>, PipelineError> {
        let endpoint = self.agents_config.require_endpoint()?;
        let backend: Arc<dyn ChatBackend> = match &self.backend_override {
            Some(backend) => backend.clone(),
            None => Arc::new(OpenAiBackend::new(endpoint)?),
        };
        Ok(Arc::new(LlmGateway::new(
            backend,
            endpoint.model.clone(),
            self.store.clone(),
            self.agents_config.concurrency,
            self.agents_config.max_transport_retries,
        )))
    }

    /// Start a run and drive it to its terminal state.
    ///
    /// Fails fast — before any run record exists — on missing credentials
    /// (503) or an already-active run (409).
    pub async fn start_run(&self, project_id: &str) -> Result<RunOutcome, PipelineError> {
        let gateway = self.gateway()?;
        let orchestrator = Orchestrator::new(
            self.store.clone(),
            gateway,
            self.pipeline_config.clone(),
            self.emitter.clone(),
        );
        orchestrator.execute_run(project_id).await
    }

    pub fn status(&self, project_id: &str) -> Result<StatusView, PipelineError> {
        let project = self.get_project(project_id)?;
        let runs = self.store.list_runs(project_id)?;
        Ok(StatusView {
            active_run: runs
                .iter()
                .find(|r| r.status == RunStatus::Running)
                .cloned(),
            last_run: runs.last().cloned(),
            project,
        })
    }

    // ── Events ──────────────────────────────────────────────────────

    pub fn run_events(&self, run_id: &str, offset: u64) -> Result<Vec<RunEvent>, PipelineError> {
        if self.store.get_run(run_id)?.is_none() {
            return Err(PipelineError::RunNotFound(run_id.to_string()));
        }
        Ok(self.store.events_since(run_id, offset)?)
    }

    /// Events of the project's most recent run, from an offset.
    pub fn project_events(
        &self,
        project_id: &str,
        offset: u64,
    ) -> Result<Vec<RunEvent>, PipelineError> {
        self.get_project(project_id)?;
        let runs = self.store.list_runs(project_id)?;
        match runs.last() {
            Some(run) => Ok(self.store.events_since(&run.id, offset)?),
            None => Ok(Vec::new()),
        }
    }

    // ── Artifacts ───────────────────────────────────────────────────

    /// `latest/<type>` with CML mode gating. Only solution-bearing types
    /// consult the mode; every other read ignores the header.
    pub fn latest_artifact(
        &self,
        project_id: &str,
        artifact_type: ArtifactType,
        mode: CmlMode,
    ) -> Result<ArtifactRecord, PipelineError> {
        if artifact_type.is_solution_bearing() && !mode.can_read_solution() {
            return Err(PipelineError::Forbidden(format!(
                "{artifact_type} requires advanced or expert mode"
            )));
        }
        self.get_project(project_id)?;
        self.store
            .latest_artifact(project_id, artifact_type)?
            .ok_or(PipelineError::ArtifactNotFound(artifact_type))
    }

    /// Isolated regeneration outside a run. Unsupported scopes return a
    /// structured error without partial work.
    pub async fn regenerate(
        &self,
        project_id: &str,
        scope: &str,
    ) -> Result<ArtifactRecord, PipelineError> {
        if !ISOLATED_SCOPES.contains(&scope) {
            return Err(PipelineError::UnsupportedScope(format!(
                "{scope} (supported: {})",
                ISOLATED_SCOPES.join(", ")
            )));
        }
        self.get_project(project_id)?;
        let spec = self
            .store
            .latest_spec(project_id)?
            .ok_or_else(|| PipelineError::SpecNotFound(project_id.to_string()))?;
        let ctx = AgentContext {
            gateway: self.gateway()?,
            store: self.store.clone(),
            config: self.pipeline_config.clone(),
            project_id: project_id.to_string(),
            run_id: None,
            spec,
        };
        let record = match scope {
            "character_profiles" => {
                crate::agents::casework::generate_character_profiles(&ctx)
                    .await?
                    .record
            }
            "synopsis" => crate::agents::narrative::generate_synopsis(&ctx).await?.record,
            _ => unreachable!("scope filtered above"),
        };
        Ok(record)
    }

    /// Packaged artifact subset: reader-facing material always, the case
    /// model only for advanced/expert callers.
    pub fn export(&self, project_id: &str, mode: CmlMode) -> Result<ExportBundle, PipelineError> {
        self.get_project(project_id)?;
        let mut artifacts = std::collections::BTreeMap::new();
        let mut reader_facing = vec![
            ArtifactType::Synopsis,
            ArtifactType::Outline,
            ArtifactType::ProseShort,
            ArtifactType::ProseMedium,
            ArtifactType::ProseLong,
            ArtifactType::GenerationReport,
        ];
        if mode.can_read_solution() {
            reader_facing.push(ArtifactType::Cml);
            reader_facing.push(ArtifactType::CmlValidation);
        }
        for artifact_type in reader_facing {
            if let Some(record) = self.store.latest_artifact(project_id, artifact_type)? {
                artifacts.insert(artifact_type.as_str().to_string(), record.payload);
            }
        }
        Ok(ExportBundle {
            project_id: project_id.to_string(),
            artifacts,
        })
    }

    pub fn clear_store(&self) -> Result<(), PipelineError> {
        Ok(self.store.clear()?)
    }

    // ── Reports ─────────────────────────────────────────────────────

    pub fn run_report(
        &self,
        project_id: &str,
        run_id: &str,
    ) -> Result<GenerationReport, PipelineError> {
        let versions = self
            .store
            .artifact_versions(project_id, ArtifactType::GenerationReport)?;
        let record = versions
            .iter()
            .rev()
            .find(|r| r.run_id.as_deref() == Some(run_id))
            .ok_or(PipelineError::ArtifactNotFound(ArtifactType::GenerationReport))?;
        serde_json::from_value(record.payload.clone())
            .map_err(|e| PipelineError::Parse(format!("stored report unreadable: {e}")))
    }

    pub fn report_history(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<GenerationReport>, PipelineError> {
        let versions = self
            .store
            .artifact_versions(project_id, ArtifactType::GenerationReport)?;
        Ok(versions
            .iter()
            .rev()
            .take(limit)
            .filter_map(|r| serde_json::from_value(r.payload.clone()).ok())
            .collect())
    }

    pub fn aggregate_reports(&self) -> Result<AggregateReportStats, PipelineError> {
        let mut reports = 0usize;
        let mut passed = 0usize;
        let mut score_sum = 0.0;
        for project in self.store.list_projects()? {
            for record in self
                .store
                .artifact_versions(&project.id, ArtifactType::GenerationReport)?
            {
                if let Ok(report) =
                    serde_json::from_value::<GenerationReport>(record.payload.clone())
                {
                    reports += 1;
                    if report.passed {
                        passed += 1;
                    }
                    score_sum += report.overall_score;
                }
            }
        }
        Ok(AggregateReportStats {
            reports,
            passed,
            mean_overall_score: if reports == 0 {
                0.0
            } else {
                score_sum / reports as f64
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairplay::model::NewArtifact;

    fn service() -> PipelineService {
        PipelineService::new(
            Arc::new(MemoryStore::new()),
            PipelineConfig::default(),
            AgentsConfig::default(),
        )
    }

    fn draft() -> SpecDraft {
        SpecDraft {
            decade: "1930s".into(),
            location_preset: "CountryHouse".into(),
            tone: "Cozy".into(),
            theme: String::new(),
            cast_size: 6,
            cast_names: vec![],
            primary_axis: PrimaryAxis::Temporal,
            target_length: TargetLength::Medium,
        }
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(CmlMode::from_header(None), CmlMode::User);
        assert_eq!(CmlMode::from_header(Some("user")), CmlMode::User);
        assert_eq!(CmlMode::from_header(Some("advanced")), CmlMode::Advanced);
        assert_eq!(CmlMode::from_header(Some("Expert")), CmlMode::Expert);
        assert_eq!(CmlMode::from_header(Some("root")), CmlMode::User);
    }

    #[test]
    fn test_spec_versions_increment() {
        let svc = service();
        let project = svc.create_project("case").unwrap();
        let s1 = svc.store_spec(&project.id, draft()).unwrap();
        let s2 = svc.store_spec(&project.id, draft()).unwrap();
        assert_eq!(s1.version, 1);
        assert_eq!(s2.version, 2);
        assert_eq!(svc.get_spec(&s2.id).unwrap().version, 2);
    }

    #[test]
    fn test_cml_mode_gating() {
        let svc = service();
        let project = svc.create_project("case").unwrap();
        let spec = svc.store_spec(&project.id, draft()).unwrap();
        svc.store()
            .insert_artifact(NewArtifact {
                project_id: project.id.clone(),
                run_id: None,
                artifact_type: ArtifactType::Cml,
                payload: serde_json::json!({"meta": {}}),
                source_spec_id: spec.id.clone(),
                parent_artifact_id: None,
                model: None,
                prompt_version: None,
            })
            .unwrap();

        let err = svc
            .latest_artifact(&project.id, ArtifactType::Cml, CmlMode::User)
            .unwrap_err();
        assert_eq!(err.http_status(), 403);
        assert!(svc
            .latest_artifact(&project.id, ArtifactType::Cml, CmlMode::Advanced)
            .is_ok());
        assert!(svc
            .latest_artifact(&project.id, ArtifactType::Cml, CmlMode::Expert)
            .is_ok());
    }

    #[test]
    fn test_non_solution_reads_ignore_mode() {
        let svc = service();
        let project = svc.create_project("case").unwrap();
        let spec = svc.store_spec(&project.id, draft()).unwrap();
        svc.store()
            .insert_artifact(NewArtifact {
                project_id: project.id.clone(),
                run_id: None,
                artifact_type: ArtifactType::Synopsis,
                payload: serde_json::json!({"hook": "h"}),
                source_spec_id: spec.id,
                parent_artifact_id: None,
                model: None,
                prompt_version: None,
            })
            .unwrap();
        assert!(svc
            .latest_artifact(&project.id, ArtifactType::Synopsis, CmlMode::User)
            .is_ok());
    }

    #[tokio::test]
    async fn test_run_without_credentials_is_503() {
        let svc = service();
        let project = svc.create_project("case").unwrap();
        svc.store_spec(&project.id, draft()).unwrap();

        let err = svc.start_run(&project.id).await.unwrap_err();
        assert!(matches!(err, PipelineError::CredentialMissing));
        assert_eq!(err.http_status(), 503);
        // No run record was created.
        assert!(svc.store().list_runs(&project.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_regeneration_scope() {
        let svc = service();
        let project = svc.create_project("case").unwrap();
        svc.store_spec(&project.id, draft()).unwrap();

        let err = svc.regenerate(&project.id, "outline").await.unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedScope(_)));
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn test_missing_artifact_404() {
        let svc = service();
        let project = svc.create_project("case").unwrap();
        let err = svc
            .latest_artifact(&project.id, ArtifactType::Outline, CmlMode::User)
            .unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn test_export_excludes_solution_for_user_mode() {
        let svc = service();
        let project = svc.create_project("case").unwrap();
        let spec = svc.store_spec(&project.id, draft()).unwrap();
        for (t, payload) in [
            (ArtifactType::Synopsis, serde_json::json!({"hook": "h"})),
            (ArtifactType::Cml, serde_json::json!({"meta": {}})),
        ] {
            svc.store()
                .insert_artifact(NewArtifact {
                    project_id: project.id.clone(),
                    run_id: None,
                    artifact_type: t,
                    payload,
                    source_spec_id: spec.id.clone(),
                    parent_artifact_id: None,
                    model: None,
                    prompt_version: None,
                })
                .unwrap();
        }

        let user_bundle = svc.export(&project.id, CmlMode::User).unwrap();
        assert!(user_bundle.artifacts.contains_key("synopsis"));
        assert!(!user_bundle.artifacts.contains_key("cml"));

        let expert_bundle = svc.export(&project.id, CmlMode::Expert).unwrap();
        assert!(expert_bundle.artifacts.contains_key("cml"));
    }

    #[test]
    fn test_clear_store() {
        let svc = service();
        svc.create_project("case").unwrap();
        svc.clear_store().unwrap();
        assert!(svc.list_projects().unwrap().is_empty());
    }
}
