//! Versioned artifact persistence.
//!
//! One trait, two drivers: an in-memory store for tests and ephemeral runs,
//! and a single-file JSON store with atomic replace (`json_file`). Writes are
//! serialized per store via an `RwLock`; artifact versions per
//! `(project, type)` are strictly increasing and gap-free, and readers never
//! observe a version before its write completes.

mod json_file;

pub use json_file::JsonFileStore;

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::model::{
    ArtifactRecord, ArtifactType, CaseSpec, EventSeverity, LlmLogRecord, NewArtifact, Project,
    ProjectStatus, Run, RunEvent, RunStatus, RunStep, new_id,
};

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Unknown run: {0}")]
    UnknownRun(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The entire persisted graph. The JSON-file driver serializes this struct
/// verbatim, so every field must stay serde-friendly.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    pub projects: HashMap<String, Project>,
    pub specs: HashMap<String, CaseSpec>,
    pub runs: HashMap<String, Run>,
    /// Append-only event log per run.
    pub events: HashMap<String, Vec<RunEvent>>,
    /// project → type name → versions ascending.
    pub artifacts: HashMap<String, HashMap<String, Vec<ArtifactRecord>>>,
    pub llm_logs: Vec<LlmLogRecord>,
}

impl StoreState {
    fn insert_artifact(&mut self, new: NewArtifact) -> ArtifactRecord {
        let by_type = self
            .artifacts
            .entry(new.project_id.clone())
            .or_default()
            .entry(new.artifact_type.as_str().to_string())
            .or_default();
        let version = by_type.last().map(|a| a.version + 1).unwrap_or(1);
        let record = ArtifactRecord {
            id: new_id(),
            project_id: new.project_id,
            run_id: new.run_id,
            artifact_type: new.artifact_type,
            version,
            payload: new.payload,
            source_spec_id: new.source_spec_id,
            parent_artifact_id: new.parent_artifact_id,
            model: new.model,
            prompt_version: new.prompt_version,
            created_at: chrono::Utc::now(),
        };
        by_type.push(record.clone());
        record
    }

    fn latest_artifact(
        &self,
        project_id: &str,
        artifact_type: ArtifactType,
    ) -> Option<ArtifactRecord> {
        self.artifacts
            .get(project_id)?
            .get(artifact_type.as_str())?
            .last()
            .cloned()
    }

    fn append_event(
        &mut self,
        run_id: &str,
        step: RunStep,
        severity: EventSeverity,
        message: String,
        payload: serde_json::Value,
    ) -> StoreResult<RunEvent> {
        if !self.runs.contains_key(run_id) {
            return Err(StoreError::UnknownRun(run_id.to_string()));
        }
        let log = self.events.entry(run_id.to_string()).or_default();
        let event = RunEvent {
            seq: log.len() as u64,
            run_id: run_id.to_string(),
            step,
            message,
            severity,
            payload,
            timestamp: chrono::Utc::now(),
        };
        log.push(event.clone());
        Ok(event)
    }

    /// Mark every non-terminal run as failed. Called at startup: there is no
    /// mid-state resumption across process restarts.
    fn fail_interrupted_runs(&mut self) -> Vec<String> {
        let mut failed = Vec::new();
        for run in self.runs.values_mut() {
            if run.status == RunStatus::Running {
                run.status = RunStatus::Failed;
                run.finished_at = Some(chrono::Utc::now());
                failed.push(run.id.clone());
            }
        }
        for run_id in &failed {
            let log = self.events.entry(run_id.clone()).or_default();
            let event = RunEvent {
                seq: log.len() as u64,
                run_id: run_id.clone(),
                step: RunStep::RunFailed,
                message: "run interrupted by process restart".into(),
                severity: EventSeverity::Error,
                payload: serde_json::json!({"classification": "interrupted"}),
                timestamp: chrono::Utc::now(),
            };
            log.push(event);
        }
        let affected_projects: Vec<String> = failed
            .iter()
            .filter_map(|rid| self.runs.get(rid).map(|r| r.project_id.clone()))
            .collect();
        for project in self.projects.values_mut() {
            if project.status == ProjectStatus::Running && affected_projects.contains(&project.id) {
                project.status = ProjectStatus::Idle;
            }
        }
        failed
    }
}

/// Storage contract shared by all drivers. Synchronous by design: store
/// operations never suspend, which keeps the orchestrator's suspension
/// points limited to gateway calls.
pub trait ArtifactStore: Send + Sync {
    // Projects
    fn put_project(&self, project: &Project) -> StoreResult<()>;
    fn get_project(&self, id: &str) -> StoreResult<Option<Project>>;
    fn list_projects(&self) -> StoreResult<Vec<Project>>;

    // Specs
    fn put_spec(&self, spec: &CaseSpec) -> StoreResult<()>;
    fn get_spec(&self, id: &str) -> StoreResult<Option<CaseSpec>>;
    /// Highest-version spec for a project.
    fn latest_spec(&self, project_id: &str) -> StoreResult<Option<CaseSpec>>;

    // Runs
    fn put_run(&self, run: &Run) -> StoreResult<()>;
    fn get_run(&self, id: &str) -> StoreResult<Option<Run>>;
    fn list_runs(&self, project_id: &str) -> StoreResult<Vec<Run>>;

    // Run events
    fn append_event(
        &self,
        run_id: &str,
        step: RunStep,
        severity: EventSeverity,
        message: String,
        payload: serde_json::Value,
    ) -> StoreResult<RunEvent>;
    fn events_since(&self, run_id: &str, offset: u64) -> StoreResult<Vec<RunEvent>>;

    // Artifacts
    fn insert_artifact(&self, new: NewArtifact) -> StoreResult<ArtifactRecord>;
    fn latest_artifact(
        &self,
        project_id: &str,
        artifact_type: ArtifactType,
    ) -> StoreResult<Option<ArtifactRecord>>;
    fn artifact_versions(
        &self,
        project_id: &str,
        artifact_type: ArtifactType,
    ) -> StoreResult<Vec<ArtifactRecord>>;

    // LLM operational log
    fn append_llm_log(&self, record: LlmLogRecord) -> StoreResult<()>;
    fn llm_logs(&self, project_id: &str) -> StoreResult<Vec<LlmLogRecord>>;

    /// Mark interrupted runs failed; returns their ids.
    fn fail_interrupted_runs(&self) -> StoreResult<Vec<String>>;

    /// Wipe everything (admin clear).
    fn clear(&self) -> StoreResult<()>;
}

/// In-memory driver.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

macro_rules! read_state {
    ($self:ident) => {
        $self.state.read().map_err(|_| StoreError::LockPoisoned)?
    };
}

macro_rules! write_state {
    ($self:ident) => {
        $self.state.write().map_err(|_| StoreError::LockPoisoned)?
    };
}

pub(crate) use read_state;
pub(crate) use write_state;

impl ArtifactStore for MemoryStore {
    fn put_project(&self, project: &Project) -> StoreResult<()> {
        write_state!(self)
            .projects
            .insert(project.id.clone(), project.clone());
        Ok(())
    }

    fn get_project(&self, id: &str) -> StoreResult<Option<Project>> {
        Ok(read_state!(self).projects.get(id).cloned())
    }

    fn list_projects(&self) -> StoreResult<Vec<Project>> {
        let mut projects: Vec<Project> = read_state!(self).projects.values().cloned().collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(projects)
    }

    fn put_spec(&self, spec: &CaseSpec) -> StoreResult<()> {
        write_state!(self).specs.insert(spec.id.clone(), spec.clone());
        Ok(())
    }

    fn get_spec(&self, id: &str) -> StoreResult<Option<CaseSpec>> {
        Ok(read_state!(self).specs.get(id).cloned())
    }

    fn latest_spec(&self, project_id: &str) -> StoreResult<Option<CaseSpec>> {
        Ok(read_state!(self)
            .specs
            .values()
            .filter(|s| s.project_id == project_id)
            .max_by_key(|s| s.version)
            .cloned())
    }

    fn put_run(&self, run: &Run) -> StoreResult<()> {
        write_state!(self).runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    fn get_run(&self, id: &str) -> StoreResult<Option<Run>> {
        Ok(read_state!(self).runs.get(id).cloned())
    }

    fn list_runs(&self, project_id: &str) -> StoreResult<Vec<Run>> {
        let mut runs: Vec<Run> = read_state!(self)
            .runs
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(runs)
    }

    fn append_event(
        &self,
        run_id: &str,
        step: RunStep,
        severity: EventSeverity,
        message: String,
        payload: serde_json::Value,
    ) -> StoreResult<RunEvent> {
        write_state!(self).append_event(run_id, step, severity, message, payload)
    }

    fn events_since(&self, run_id: &str, offset: u64) -> StoreResult<Vec<RunEvent>> {
        Ok(read_state!(self)
            .events
            .get(run_id)
            .map(|log| log.iter().skip(offset as usize).cloned().collect())
            .unwrap_or_default())
    }

    fn insert_artifact(&self, new: NewArtifact) -> StoreResult<ArtifactRecord> {
        Ok(write_state!(self).insert_artifact(new))
    }

    fn latest_artifact(
        &self,
        project_id: &str,
        artifact_type: ArtifactType,
    ) -> StoreResult<Option<ArtifactRecord>> {
        Ok(read_state!(self).latest_artifact(project_id, artifact_type))
    }

    fn artifact_versions(
        &self,
        project_id: &str,
        artifact_type: ArtifactType,
    ) -> StoreResult<Vec<ArtifactRecord>> {
        Ok(read_state!(self)
            .artifacts
            .get(project_id)
            .and_then(|m| m.get(artifact_type.as_str()))
            .cloned()
            .unwrap_or_default())
    }

    fn append_llm_log(&self, record: LlmLogRecord) -> StoreResult<()> {
        write_state!(self).llm_logs.push(record);
        Ok(())
    }

    fn llm_logs(&self, project_id: &str) -> StoreResult<Vec<LlmLogRecord>> {
        Ok(read_state!(self)
            .llm_logs
            .iter()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect())
    }

    fn fail_interrupted_runs(&self) -> StoreResult<Vec<String>> {
        Ok(write_state!(self).fail_interrupted_runs())
    }

    fn clear(&self) -> StoreResult<()> {
        *write_state!(self) = StoreState::default();
        Ok(())
    }
}
