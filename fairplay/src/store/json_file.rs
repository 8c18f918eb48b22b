//! Single-file JSON driver.
//!
//! The entire store graph lives in one JSON document. Every mutation
//! serializes the full state to a temp file in the same directory and
//! atomically renames it over the target, so an abrupt termination can never
//! leave a half-written store. Stale temp files from crashed processes are
//! removed at open, and any run left `running` by a previous process is
//! marked failed — there is no mid-state resumption.

use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use tracing::{debug, warn};

use super::{
    read_state, write_state, ArtifactStore, StoreError, StoreResult, StoreState,
};
use crate::model::{
    ArtifactRecord, ArtifactType, CaseSpec, EventSeverity, LlmLogRecord, NewArtifact, Project,
    Run, RunEvent, RunStep,
};

/// Attempts for transient rename/write failures (antivirus scans, NFS).
const WRITE_RETRIES: u32 = 5;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(20);

pub struct JsonFileStore {
    state: RwLock<StoreState>,
    path: PathBuf,
}

impl JsonFileStore {
    /// Open or create a store file. Cleans up stale temp files and fails any
    /// run interrupted by a previous process.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        cleanup_stale_temps(&path);

        let mut state = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| StoreError::Io(e.to_string()))?;
            serde_json::from_str(&raw).map_err(|e| StoreError::Serialization(e.to_string()))?
        } else {
            StoreState::default()
        };

        let interrupted = state.fail_interrupted_runs();
        if !interrupted.is_empty() {
            warn!(
                count = interrupted.len(),
                "marked interrupted runs as failed at startup"
            );
        }

        let store = Self {
            state: RwLock::new(state),
            path,
        };
        {
            let guard = store.state.read().map_err(|_| StoreError::LockPoisoned)?;
            store.flush(&guard)?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize the full state and atomically replace the store file,
    /// retrying transient failures with a linear backoff.
    fn flush(&self, state: &StoreState) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let temp = temp_path(&self.path);

        let mut last_err = None;
        for attempt in 1..=WRITE_RETRIES {
            let result = std::fs::write(&temp, &json)
                .and_then(|()| std::fs::rename(&temp, &self.path));
            match result {
                Ok(()) => {
                    debug!(path = %self.path.display(), bytes = json.len(), "store flushed");
                    return Ok(());
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    std::thread::sleep(RETRY_BASE_DELAY * attempt);
                }
            }
        }
        let _ = std::fs::remove_file(&temp);
        Err(StoreError::Io(format!(
            "failed to replace store file after {WRITE_RETRIES} attempts: {}",
            last_err.unwrap_or_default()
        )))
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "store.json".into());
    let temp_name = format!("{name}.tmp-{}", uuid::Uuid::new_v4());
    path.with_file_name(temp_name)
}

/// Remove temp files left behind by a crashed writer.
fn cleanup_stale_temps(path: &Path) {
    let Some(dir) = path.parent() else { return };
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
        return;
    };
    let prefix = format!("{name}.tmp-");
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let file_name = entry.file_name().to_string_lossy().to_string();
        if file_name.starts_with(&prefix) {
            debug!(file = %file_name, "removing stale store temp file");
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

impl ArtifactStore for JsonFileStore {
    fn put_project(&self, project: &Project) -> StoreResult<()> {
        let mut state = write_state!(self);
        state.projects.insert(project.id.clone(), project.clone());
        self.flush(&state)
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
        let mut state = write_state!(self);
        state.specs.insert(spec.id.clone(), spec.clone());
        self.flush(&state)
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
        let mut state = write_state!(self);
        state.runs.insert(run.id.clone(), run.clone());
        self.flush(&state)
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
        let mut state = write_state!(self);
        let event = state.append_event(run_id, step, severity, message, payload)?;
        self.flush(&state)?;
        Ok(event)
    }

    fn events_since(&self, run_id: &str, offset: u64) -> StoreResult<Vec<RunEvent>> {
        Ok(read_state!(self)
            .events
            .get(run_id)
            .map(|log| log.iter().skip(offset as usize).cloned().collect())
            .unwrap_or_default())
    }

    fn insert_artifact(&self, new: NewArtifact) -> StoreResult<ArtifactRecord> {
        let mut state = write_state!(self);
        let record = state.insert_artifact(new);
        self.flush(&state)?;
        Ok(record)
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
        let mut state = write_state!(self);
        state.llm_logs.push(record);
        self.flush(&state)
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
        let mut state = write_state!(self);
        let failed = state.fail_interrupted_runs();
        self.flush(&state)?;
        Ok(failed)
    }

    fn clear(&self) -> StoreResult<()> {
        let mut state = write_state!(self);
        *state = StoreState::default();
        self.flush(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProjectStatus, RunStatus};
    use serde_json::json;

    fn artifact(project: &str, t: ArtifactType) -> NewArtifact {
        NewArtifact {
            project_id: project.into(),
            run_id: Some("r1".into()),
            artifact_type: t,
            payload: json!({"v": true}),
            source_spec_id: "s1".into(),
            parent_artifact_id: None,
            model: None,
            prompt_version: None,
        }
    }

    #[test]
    fn test_roundtrip_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = JsonFileStore::open(&path).unwrap();
            store.put_project(&Project::new("case one")).unwrap();
            store.insert_artifact(artifact("p1", ArtifactType::Cml)).unwrap();
            store.insert_artifact(artifact("p1", ArtifactType::Cml)).unwrap();
        }

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.list_projects().unwrap().len(), 1);
        assert_eq!(
            store
                .latest_artifact("p1", ArtifactType::Cml)
                .unwrap()
                .unwrap()
                .version,
            2
        );
    }

    #[test]
    fn test_interrupted_run_failed_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let run_id;
        {
            let store = JsonFileStore::open(&path).unwrap();
            let mut project = Project::new("case");
            project.status = ProjectStatus::Running;
            store.put_project(&project).unwrap();
            let run = Run::new(&project.id, "s1", 0.15);
            run_id = run.id.clone();
            store.put_run(&run).unwrap();
            // Simulated crash: store dropped while the run is still running.
        }

        let store = JsonFileStore::open(&path).unwrap();
        let run = store.get_run(&run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        let events = store.events_since(&run_id, 0).unwrap();
        assert_eq!(events.last().unwrap().step, RunStep::RunFailed);
        for project in store.list_projects().unwrap() {
            assert_eq!(project.status, ProjectStatus::Idle);
        }
    }

    #[test]
    fn test_stale_temp_files_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let stale = dir.path().join("store.json.tmp-deadbeef");
        std::fs::write(&stale, b"{").unwrap();

        let _store = JsonFileStore::open(&path).unwrap();
        assert!(!stale.exists());
        assert!(path.exists());
    }

    #[test]
    fn test_no_temp_files_left_after_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = JsonFileStore::open(&path).unwrap();
        for _ in 0..3 {
            store.insert_artifact(artifact("p1", ArtifactType::Clues)).unwrap();
        }
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_clear_wipes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = JsonFileStore::open(&path).unwrap();
        store.put_project(&Project::new("case")).unwrap();
        store.clear().unwrap();
        drop(store);

        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.list_projects().unwrap().is_empty());
    }
}
