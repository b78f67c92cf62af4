//! Loops the normalized clip sequence into one silent track of exactly the
//! narration's length.

use crate::error::JobError;
use crate::ffmpeg::MediaEngine;
use crate::normalize::NormalizedClip;
use crate::{logi, logok, logw};
use std::path::{Path, PathBuf};
use tokio::fs;

const COVER_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct TimelinePlan {
    /// How many times the clip sequence is repeated in the play-list.
    pub loops: u32,
    /// Indexes into the clip sequence, in play order.
    pub entries: Vec<usize>,
    pub playlist_seconds: f64,
    /// The capped play-list is still shorter than the target and has to be
    /// replayed by the concat step.
    pub needs_loop_input: bool,
}

pub fn plan_timeline(durations: &[f64], target: f64, max_loops: u32, max_entries: usize) -> TimelinePlan {
    let total: f64 = durations.iter().sum();
    let loops = if total > 0.0 && total < target && durations.len() > 1 {
        let needed = (target / total).ceil();
        (needed.min(max_loops as f64) as u32).max(1)
    } else {
        1
    };

    let max_entries = max_entries.max(1);
    let mut entries = Vec::new();
    'outer: for _ in 0..loops {
        for i in 0..durations.len() {
            if entries.len() >= max_entries {
                break 'outer;
            }
            entries.push(i);
        }
    }

    let playlist_seconds: f64 = entries.iter().map(|&i| durations[i]).sum();
    TimelinePlan {
        loops,
        entries,
        playlist_seconds,
        needs_loop_input: playlist_seconds + COVER_EPSILON < target,
    }
}

/// One line of an ffmpeg concat-demuxer list.
pub fn concat_line(path: &Path) -> String {
    let escaped = path.display().to_string().replace('\'', "'\\''");
    format!("file '{}'\n", escaped)
}

#[derive(Debug, Clone)]
pub struct AssembledTimeline {
    pub path: PathBuf,
    pub plan: TimelinePlan,
    pub duration_seconds: f64,
}

pub struct TimelineAssembler<'a> {
    pub media: &'a dyn MediaEngine,
    pub max_loops: u32,
    pub max_entries: usize,
    /// Allowed gap between the rendered and requested length.
    pub frame_seconds: f64,
}

impl TimelineAssembler<'_> {
    /// Probe every clip, build the play-list and render `target` seconds of
    /// video into `work_dir`. Clips whose duration cannot be probed are left
    /// out.
    pub async fn assemble(
        &self,
        clips: &[NormalizedClip],
        target: f64,
        work_dir: &Path,
    ) -> Result<AssembledTimeline, JobError> {
        let mut usable: Vec<&NormalizedClip> = Vec::with_capacity(clips.len());
        let mut durations = Vec::with_capacity(clips.len());
        for clip in clips {
            match self.media.probe_duration(&clip.path).await {
                Ok(d) => {
                    usable.push(clip);
                    durations.push(d);
                }
                Err(err) => logw(format!("Cannot probe scene {}: {:#}", clip.scene_index, err)),
            }
        }
        if usable.is_empty() {
            return Err(JobError::NormalizationShortfall);
        }

        let plan = plan_timeline(&durations, target, self.max_loops, self.max_entries);
        logi(format!(
            "Timeline: {} clips, {:.1}s per pass, {} loop(s), {} entries ({:.1}s) for {:.1}s target{}",
            usable.len(),
            durations.iter().sum::<f64>(),
            plan.loops,
            plan.entries.len(),
            plan.playlist_seconds,
            target,
            if plan.needs_loop_input { ", replaying list" } else { "" }
        ));

        let list_path = work_dir.join("timeline_concat.txt");
        let list: String = plan
            .entries
            .iter()
            .map(|&i| concat_line(&usable[i].path))
            .collect();
        fs::write(&list_path, list).await.map_err(|err| {
            logw(format!("Writing concat list failed: {}", err));
            JobError::encoding("timeline")
        })?;

        let out = work_dir.join("timeline.mp4");
        self.media
            .concat_clips(&list_path, &out, target, plan.needs_loop_input)
            .await
            .map_err(|err| {
                logw(format!("Concat failed: {:#}", err));
                JobError::encoding("timeline")
            })?;

        let rendered = self.media.probe_duration(&out).await.map_err(|err| {
            logw(format!("Cannot probe assembled timeline: {:#}", err));
            JobError::encoding("timeline")
        })?;
        if (rendered - target).abs() > self.frame_seconds + COVER_EPSILON {
            logw(format!(
                "Timeline is {:.3}s, expected {:.3}s",
                rendered, target
            ));
            return Err(JobError::encoding("timeline"));
        }

        logok(format!("Timeline assembled: {} ({:.3}s)", out.display(), rendered));
        Ok(AssembledTimeline {
            path: out,
            plan,
            duration_seconds: rendered,
        })
    }
}
