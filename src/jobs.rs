//! Job records and the process-lifetime job table.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            JobState::Queued => 0,
            JobState::Processing => 1,
            JobState::Completed | JobState::Failed => 2,
        }
    }

    /// Transitions only move forward and terminal states are final.
    pub fn can_advance_to(&self, next: JobState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub published_location: String,
    pub total_duration_seconds: f64,
    pub clips_used_count: usize,
}

/// How a job ended. Written to the table as one unit.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(JobResult),
    Failed(String),
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Completed(_) => JobState::Completed,
            JobOutcome::Failed(_) => JobState::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub callback_target: Option<String>,
}

impl Job {
    pub fn queued(id: impl Into<String>, callback_target: Option<String>) -> Self {
        Self {
            id: id.into(),
            state: JobState::Queued,
            created_at: Utc::now(),
            result: None,
            error: None,
            callback_target,
        }
    }

    fn advance(&mut self, next: JobState) -> bool {
        if !self.state.can_advance_to(next) {
            return false;
        }
        self.state = next;
        true
    }

    fn finish(&mut self, outcome: &JobOutcome) -> bool {
        if !self.advance(outcome.state()) {
            return false;
        }
        match outcome {
            JobOutcome::Completed(result) => self.result = Some(result.clone()),
            JobOutcome::Failed(cause) => self.error = Some(cause.clone()),
        }
        true
    }

    /// Status-boundary view of this job.
    pub fn status_view(&self) -> JobStatusView {
        let mut view = JobStatusView {
            job_id: self.id.clone(),
            status: self.state,
            created_at: self.created_at,
            video_url: None,
            duration: None,
            clips_used: None,
            error: None,
        };
        match self.state {
            JobState::Completed => {
                if let Some(result) = &self.result {
                    view.video_url = Some(result.published_location.clone());
                    view.duration = Some(result.total_duration_seconds);
                    view.clips_used = Some(result.clips_used_count);
                }
            }
            JobState::Failed => view.error = self.error.clone(),
            _ => {}
        }
        view
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clips_used: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobStoreError {
    #[error("job id already exists: {0}")]
    Duplicate(String),
}

/// Shared job table. Every call is synchronized; reads return snapshots.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: Job) -> Result<(), JobStoreError>;

    fn get(&self, id: &str) -> Option<Job>;

    /// `Queued -> Processing`. False if the job is gone or already past it.
    fn mark_processing(&self, id: &str) -> bool;

    /// Terminal transition; state plus result-or-error land together.
    fn finish(&self, id: &str, outcome: &JobOutcome) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory table bounded by `capacity`. Over capacity, the oldest terminal
/// jobs are evicted; queued and processing jobs are never evicted.
pub struct MemoryJobStore {
    capacity: usize,
    jobs: Mutex<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn evict_overflow(capacity: usize, jobs: &mut HashMap<String, Job>) {
        if jobs.len() <= capacity {
            return;
        }
        let mut evictable: Vec<(DateTime<Utc>, String)> = jobs
            .values()
            .filter(|j| j.state.is_terminal())
            .map(|j| (j.created_at, j.id.clone()))
            .collect();
        evictable.sort();

        let excess = jobs.len() - capacity;
        for (_, id) in evictable.into_iter().take(excess) {
            jobs.remove(&id);
            tracing::debug!("Evicted job {} from the job table", id);
        }
    }
}

impl JobStore for MemoryJobStore {
    fn insert(&self, job: Job) -> Result<(), JobStoreError> {
        let mut jobs = self.lock();
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::Duplicate(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Self::evict_overflow(self.capacity, &mut jobs);
        Ok(())
    }

    fn get(&self, id: &str) -> Option<Job> {
        self.lock().get(id).cloned()
    }

    fn mark_processing(&self, id: &str) -> bool {
        self.lock()
            .get_mut(id)
            .map(|job| job.advance(JobState::Processing))
            .unwrap_or(false)
    }

    fn finish(&self, id: &str, outcome: &JobOutcome) -> bool {
        let mut jobs = self.lock();
        let done = jobs
            .get_mut(id)
            .map(|job| job.finish(outcome))
            .unwrap_or(false);
        // a finished job may now be the one that makes room
        Self::evict_overflow(self.capacity, &mut jobs);
        done
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn result() -> JobResult {
        JobResult {
            published_location: "https://cdn.example/videos/a.mp4".to_string(),
            total_duration_seconds: 600.0,
            clips_used_count: 18,
        }
    }

    #[test]
    fn states_only_move_forward() {
        assert!(JobState::Queued.can_advance_to(JobState::Processing));
        assert!(JobState::Processing.can_advance_to(JobState::Completed));
        assert!(JobState::Processing.can_advance_to(JobState::Failed));
        assert!(!JobState::Processing.can_advance_to(JobState::Queued));
        assert!(!JobState::Completed.can_advance_to(JobState::Failed));
        assert!(!JobState::Failed.can_advance_to(JobState::Completed));
        assert!(!JobState::Queued.can_advance_to(JobState::Queued));
    }

    #[test]
    fn finish_writes_result_once() {
        let store = MemoryJobStore::new(10);
        store.insert(Job::queued("a", None)).unwrap();
        assert!(store.mark_processing("a"));
        assert!(!store.mark_processing("a"));
        assert!(store.finish("a", &JobOutcome::Completed(result())));
        assert!(!store.finish("a", &JobOutcome::Failed("late".into())));

        let job = store.get("a").unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.result, Some(result()));
        assert_eq!(job.error, None);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let store = MemoryJobStore::new(10);
        store.insert(Job::queued("a", None)).unwrap();
        assert_eq!(
            store.insert(Job::queued("a", None)),
            Err(JobStoreError::Duplicate("a".into()))
        );
    }

    #[test]
    fn evicts_oldest_terminal_jobs_only() {
        let store = MemoryJobStore::new(2);
        let base = Utc::now();

        let mut old_done = Job::queued("old-done", None);
        old_done.created_at = base - Duration::seconds(30);
        let mut old_running = Job::queued("old-running", None);
        old_running.created_at = base - Duration::seconds(60);

        store.insert(old_running).unwrap();
        store.mark_processing("old-running");
        store.insert(old_done).unwrap();
        store.mark_processing("old-done");
        store.finish("old-done", &JobOutcome::Failed("boom".into()));

        store.insert(Job::queued("new", None)).unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.get("old-running").is_some());
        assert!(store.get("old-done").is_none());
        assert!(store.get("new").is_some());
    }

    #[test]
    fn active_jobs_may_exceed_capacity() {
        let store = MemoryJobStore::new(1);
        store.insert(Job::queued("a", None)).unwrap();
        store.insert(Job::queued("b", None)).unwrap();
        assert_eq!(store.len(), 2);

        store.mark_processing("a");
        store.finish("a", &JobOutcome::Failed("x".into()));
        assert_eq!(store.len(), 1);
        assert!(store.get("b").is_some());
    }

    #[test]
    fn status_view_exposes_terminal_payload() {
        let mut job = Job::queued("a", None);
        assert!(job.status_view().video_url.is_none());
        job.advance(JobState::Processing);
        job.finish(&JobOutcome::Failed("too few clips sourced: 2/3".into()));

        let json = serde_json::to_value(job.status_view()).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "too few clips sourced: 2/3");
        assert!(json.get("video_url").is_none());
    }
}
