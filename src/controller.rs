//! Drives a job from `Queued` to a terminal state: runs the pipeline in a
//! private work directory, records the outcome once, then notifies.

use crate::config::PipelineSettings;
use crate::error::JobError;
use crate::ffmpeg::MediaEngine;
use crate::jobs::{Job, JobOutcome, JobResult, JobStatusView, JobStore, JobStoreError};
use crate::normalize::normalize_all;
use crate::notify::{Notifier, TerminalNotice};
use crate::request::JobRequest;
use crate::scene_plan::ScenePlanner;
use crate::sourcing::{ClipSource, SourcedClip};
use crate::storage::{ArtifactStore, object_key, prune_previous_artifacts};
use crate::timeline::TimelineAssembler;
use crate::{logi, logok, logw};
use futures::{FutureExt, StreamExt, stream};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Everything a job talks to outside its own work directory.
pub struct Collaborators {
    pub store: Arc<dyn JobStore>,
    pub media: Arc<dyn MediaEngine>,
    pub source: Arc<dyn ClipSource>,
    pub artifacts: Option<Arc<dyn ArtifactStore>>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct JobController {
    store: Arc<dyn JobStore>,
    media: Arc<dyn MediaEngine>,
    source: Arc<dyn ClipSource>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    notifier: Arc<dyn Notifier>,
    settings: PipelineSettings,
    default_webhook: Option<String>,
    work_dir: PathBuf,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
}

impl JobController {
    pub fn new(
        parts: Collaborators,
        settings: PipelineSettings,
        default_webhook: Option<String>,
        work_dir: impl Into<PathBuf>,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            store: parts.store,
            media: parts.media,
            source: parts.source,
            artifacts: parts.artifacts,
            notifier: parts.notifier,
            settings,
            default_webhook,
            work_dir: work_dir.into(),
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn has_storage(&self) -> bool {
        self.artifacts.is_some()
    }

    pub fn status(&self, id: &str) -> Option<JobStatusView> {
        self.store.get(id).map(|job| job.status_view())
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the job as `Queued` and schedule it. The record exists before
    /// this returns; the work runs on a background task.
    pub fn submit(self: &Arc<Self>, id: impl Into<String>, request: JobRequest) -> Result<(), JobStoreError> {
        let id = id.into();
        let callback = request
            .webhook_url
            .clone()
            .or_else(|| self.default_webhook.clone());
        self.store.insert(Job::queued(id.clone(), callback.clone()))?;
        logi(format!("Job {} queued", id));

        let this = Arc::clone(self);
        let mut tasks = self.lock_tasks();
        while let Some(done) = tasks.try_join_next() {
            if let Err(err) = done {
                logw(format!("Job task ended abnormally: {}", err));
            }
        }
        tasks.spawn(async move { this.run(id, callback, request).await });
        Ok(())
    }

    /// Wait for every scheduled job to reach its terminal state.
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut *self.lock_tasks());
        while let Some(done) = tasks.join_next().await {
            if let Err(err) = done {
                logw(format!("Job task ended abnormally: {}", err));
            }
        }
    }

    async fn run(self: Arc<Self>, id: String, callback: Option<String>, request: JobRequest) {
        let _permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                logw(format!("Job {}: worker pool closed", id));
                return;
            }
        };
        if !self.store.mark_processing(&id) {
            logw(format!("Job {} vanished before it started", id));
            return;
        }
        logi(format!("Job {} processing", id));

        let original = request.original.clone();
        let outcome = match self.run_in_work_dir(&id, request).await {
            Ok(result) => {
                logok(format!(
                    "Job {} completed: {} ({} clips, {:.1}s)",
                    id, result.published_location, result.clips_used_count, result.total_duration_seconds
                ));
                JobOutcome::Completed(result)
            }
            Err(err) => {
                logw(format!("Job {} failed: {}", id, err));
                JobOutcome::Failed(err.to_string())
            }
        };

        if !self.store.finish(&id, &outcome) {
            logw(format!("Job {} was already terminal", id));
            return;
        }
        self.notify(&id, callback.as_deref(), &outcome, original).await;
    }

    /// Runs the pipeline and always removes the work directory before
    /// returning, panics included.
    async fn run_in_work_dir(&self, id: &str, request: JobRequest) -> Result<JobResult, JobError> {
        let work = tempfile::Builder::new()
            .prefix(&format!("broll-{}-", id))
            .tempdir_in(&self.work_dir)
            .map_err(|err| {
                logw(format!("Job {}: cannot create work dir: {}", id, err));
                JobError::Internal
            })?;

        let result = match AssertUnwindSafe(self.execute(id, &request, work.path()))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                logw(format!("Job {} panicked", id));
                Err(JobError::Internal)
            }
        };

        let work_path = work.path().to_path_buf();
        if let Err(err) = work.close() {
            logw(format!("Cleanup of {} failed: {}", work_path.display(), err));
        }
        result
    }

    async fn execute(&self, id: &str, request: &JobRequest, work: &Path) -> Result<JobResult, JobError> {
        request.validate()?;

        let audio_in = work.join("voiceover.input");
        let audio_wav = work.join("voiceover.wav");
        let audio = request.decode_audio()?;
        tokio::fs::write(&audio_in, &audio).await.map_err(|err| {
            logw(format!("Job {}: writing audio failed: {}", id, err));
            JobError::encoding("audio decode")
        })?;
        drop(audio);

        self.media
            .decode_audio(&audio_in, &audio_wav)
            .await
            .map_err(|err| {
                logw(format!("Job {}: decode failed: {:#}", id, err));
                JobError::encoding("audio decode")
            })?;
        let duration = self
            .media
            .probe_duration(&audio_wav)
            .await
            .ok()
            .filter(|d| d.is_finite() && *d > 0.0)
            .ok_or_else(|| JobError::input("audio has no measurable duration"))?;
        logi(format!("[{}] AUDIO: {:.1}s", id, duration));

        let scene_count = self.settings.effective_scene_count(request.scene_count);
        let planner = ScenePlanner::new(
            scene_count,
            self.settings.context_words,
            self.settings.fallback_words_per_second,
        );
        let words = request.script.words_lower();
        let scenes = planner.plan(duration, &words, request.keyword_hint());
        let clip_seconds = planner
            .avg_scene_duration(duration)
            .min(self.settings.max_clip_seconds);
        logi(format!(
            "[{}] SCENES: {} x {:.2}s clips from {} words",
            id,
            scenes.len(),
            clip_seconds,
            words.len()
        ));

        // buffered() yields in scene order
        let pending: Vec<_> = scenes
            .iter()
            .map(|scene| self.source.source_clip(scene, clip_seconds, work))
            .collect();
        let sourced: Vec<SourcedClip> = stream::iter(pending)
            .buffered(self.settings.sourcing_concurrency.max(1))
            .collect::<Vec<Option<SourcedClip>>>()
            .await
            .into_iter()
            .flatten()
            .collect();
        logi(format!("[{}] CLIPS: {}/{}", id, sourced.len(), scenes.len()));

        let required = self.settings.min_viable_clips;
        if sourced.len() < required {
            return Err(JobError::SourcingShortfall {
                sourced: sourced.len(),
                required,
            });
        }

        let normalized = normalize_all(
            self.media.as_ref(),
            &sourced,
            work,
            self.settings.min_normalized_bytes,
        )
        .await;
        if normalized.is_empty() {
            return Err(JobError::NormalizationShortfall);
        }

        let assembler = TimelineAssembler {
            media: self.media.as_ref(),
            max_loops: self.settings.max_loops,
            max_entries: self.settings.max_concat_entries,
            frame_seconds: 1.0 / f64::from(self.settings.fps.max(1)),
        };
        let timeline = assembler.assemble(&normalized, duration, work).await?;

        let final_path = work.join("final.mp4");
        self.media
            .mux(&timeline.path, &audio_wav, &final_path)
            .await
            .map_err(|err| {
                logw(format!("Job {}: mux failed: {:#}", id, err));
                JobError::encoding("mux")
            })?;

        let published_location = self.publish(id, &final_path).await?;

        Ok(JobResult {
            published_location,
            total_duration_seconds: timeline.duration_seconds,
            clips_used_count: sourced.len(),
        })
    }

    async fn publish(&self, id: &str, final_path: &Path) -> Result<String, JobError> {
        let store = self
            .artifacts
            .as_deref()
            .ok_or_else(|| JobError::publish("storage not configured"))?;

        let prefix = &self.settings.artifact_prefix;
        let key = object_key(prefix);
        let location = store
            .upload(final_path, &key, "video/mp4")
            .await
            .map_err(|err| {
                logw(format!("Job {}: upload failed: {}", id, err));
                JobError::publish(format!("upload to {} failed", store.name()))
            })?;
        logok(format!("[{}] PUBLISHED: {}", id, key));

        if self.settings.prune_previous_artifacts {
            prune_previous_artifacts(store, prefix, &key).await;
        }
        Ok(location)
    }

    async fn notify(&self, id: &str, callback: Option<&str>, outcome: &JobOutcome, original: serde_json::Value) {
        let Some(target) = callback else {
            logi(format!("Job {}: no webhook configured, skipping notification", id));
            return;
        };
        let notice = TerminalNotice::new(id, outcome, original);
        match self.notifier.deliver(target, &notice).await {
            Ok(()) => logi(format!("Job {}: {} notification sent", id, outcome.state())),
            Err(err) => logw(format!("Job {}: notification failed: {:#}", id, err)),
        }
    }
}
