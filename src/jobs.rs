use crate::backend::Backend;
use crate::error::{AppError, Result};
use crate::request::ExportRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A submitted remote task. The task itself lives on the backend; this is
/// only the local reference to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHandle {
    pub name: String,
    pub id: String,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub checked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobHandle {
    fn submitted(name: &str, id: String) -> Self {
        Self {
            name: name.to_string(),
            id,
            state: JobState::Pending,
            submitted_at: Utc::now(),
            checked_at: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitSummary {
    pub submitted: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollSummary {
    pub checked: usize,
    pub changed: usize,
    pub unreachable: usize,
}

/// Named jobs of one run, persisted between invocations so that submission
/// and polling can happen in separate runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRegistry {
    jobs: BTreeMap<String, JobHandle>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a registry, or start an empty one if the file does not exist yet.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let registry = serde_json::from_str(&content).map_err(|e| {
            AppError::Job(format!(
                "Failed to read job registry {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(registry)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Write-then-rename so an interrupted save leaves the old registry intact
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&JobHandle> {
        self.jobs.get(name)
    }

    pub fn status(&self, name: &str) -> Option<JobState> {
        self.jobs.get(name).map(|j| j.state)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobHandle> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn all_completed(&self) -> bool {
        self.jobs.values().all(|j| j.state == JobState::Completed)
    }

    /// Job counts per state, in state order.
    pub fn summary(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for job in self.jobs.values() {
            *counts.entry(job.state.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Submit every request whose name has no job yet. Already-known names
    /// are never submitted again, whatever their state.
    ///
    /// Jobs submitted before an error stay registered.
    pub async fn submit_all(
        &mut self,
        backend: &Backend,
        requests: &[(String, ExportRequest)],
    ) -> Result<SubmitSummary> {
        let mut summary = SubmitSummary::default();

        for (name, request) in requests {
            if let Some(existing) = self.jobs.get(name) {
                info!(
                    "Job '{}' already submitted as {} ({}), skipping",
                    name, existing.id, existing.state
                );
                summary.skipped.push(name.clone());
                continue;
            }

            let id = backend.start_export(request).await?;
            info!("Submitted job '{}' as {}", name, id);
            self.jobs
                .insert(name.clone(), JobHandle::submitted(name, id));
            summary.submitted.push(name.clone());
        }

        Ok(summary)
    }

    /// Replace a failed job with a fresh submission.
    pub async fn resubmit(
        &mut self,
        backend: &Backend,
        name: &str,
        request: &ExportRequest,
    ) -> Result<JobHandle> {
        match self.jobs.get(name) {
            None => {
                return Err(AppError::Job(format!(
                    "Job '{}' was never submitted",
                    name
                )))
            }
            Some(job) if job.state != JobState::Failed => {
                return Err(AppError::Job(format!(
                    "Job '{}' is {}, only failed jobs can be resubmitted",
                    name, job.state
                )))
            }
            Some(_) => {}
        }

        let id = backend.start_export(request).await?;
        info!("Resubmitted job '{}' as {}", name, id);
        let job = JobHandle::submitted(name, id);
        self.jobs.insert(name.to_string(), job.clone());
        Ok(job)
    }

    /// Query each non-terminal job once. Safe to call any number of times;
    /// a job whose status cannot be fetched keeps its previous state.
    pub async fn poll(&mut self, backend: &Backend) -> PollSummary {
        let mut summary = PollSummary::default();

        for job in self.jobs.values_mut() {
            if job.state.is_terminal() {
                continue;
            }
            summary.checked += 1;

            match backend.task_status(&job.id).await {
                Ok(status) => {
                    job.checked_at = Some(Utc::now());
                    if status.state != job.state {
                        info!("Job '{}': {} -> {}", job.name, job.state, status.state);
                        job.state = status.state;
                        summary.changed += 1;
                    }
                    if status.state == JobState::Failed {
                        let message = status
                            .error_message
                            .unwrap_or_else(|| "no error message".to_string());
                        warn!("Job '{}' failed: {}", job.name, message);
                        job.error = Some(message);
                    }
                }
                Err(e) => {
                    summary.unreachable += 1;
                    warn!("Could not fetch status of job '{}': {}", job.name, e);
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str, state: JobState) -> JobHandle {
        JobHandle {
            state,
            ..JobHandle::submitted(name, format!("task-{}", name))
        }
    }

    #[test]
    fn test_registry_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jobs.json");

        let mut registry = JobRegistry::new();
        registry
            .jobs
            .insert("water".to_string(), handle("water", JobState::Running));
        registry.save(&path).unwrap();

        let loaded = JobRegistry::load(&path).unwrap();
        assert_eq!(loaded, registry);
        assert_eq!(loaded.status("water"), Some(JobState::Running));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::load(dir.path().join("absent.json")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_load_corrupt_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(JobRegistry::load(&path), Err(AppError::Job(_))));
    }

    #[test]
    fn test_summary_and_completion() {
        let mut registry = JobRegistry::new();
        registry
            .jobs
            .insert("a".to_string(), handle("a", JobState::Completed));
        registry
            .jobs
            .insert("b".to_string(), handle("b", JobState::Failed));
        assert!(!registry.all_completed());

        let summary = registry.summary();
        assert_eq!(summary.get("completed"), Some(&1));
        assert_eq!(summary.get("failed"), Some(&1));
        assert_eq!(summary.get("pending"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }
}
