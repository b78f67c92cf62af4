use crate::ffmpeg::MediaEngine;
use crate::sourcing::SourcedClip;
use crate::{logi, logw};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedClip {
    pub scene_index: usize,
    pub path: PathBuf,
    pub target_duration: f64,
}

async fn output_size(path: &Path) -> u64 {
    fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

/// Re-encode one clip to the canonical geometry, cut to its scene length.
/// Returns `None` (and removes
/// any partial output) when encoding fails or the output is implausibly
/// small. Never retried.
pub async fn normalize_clip(
    media: &dyn MediaEngine,
    clip: &SourcedClip,
    work_dir: &Path,
    min_bytes: u64,
) -> Option<NormalizedClip> {
    let out = work_dir.join(format!("scene_{:03}_norm.mp4", clip.scene_index));

    if let Err(err) = media.normalize_clip(&clip.path, &out, clip.target_duration).await {
        logw(format!("Normalize failed for scene {}: {:#}", clip.scene_index, err));
        let _ = fs::remove_file(&out).await;
        return None;
    }

    let size = output_size(&out).await;
    if size <= min_bytes {
        logw(format!(
            "Normalized scene {} is only {} bytes; dropping it",
            clip.scene_index, size
        ));
        let _ = fs::remove_file(&out).await;
        return None;
    }

    Some(NormalizedClip {
        scene_index: clip.scene_index,
        path: out,
        target_duration: clip.target_duration,
    })
}

/// Normalize every sourced clip in order, keeping the ones that survive.
pub async fn normalize_all(
    media: &dyn MediaEngine,
    clips: &[SourcedClip],
    work_dir: &Path,
    min_bytes: u64,
) -> Vec<NormalizedClip> {
    let mut out = Vec::with_capacity(clips.len());
    for clip in clips {
        if let Some(norm) = normalize_clip(media, clip, work_dir, min_bytes).await {
            out.push(norm);
        }
    }
    logi(format!("Normalized {}/{} clips", out.len(), clips.len()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    /// Writes `size` bytes for every normalize call except the scenes in `fail`.
    struct SizedOutput {
        size: usize,
        fail: Vec<usize>,
        lengths: std::sync::Mutex<Vec<f64>>,
    }

    impl SizedOutput {
        fn new(size: usize, fail: Vec<usize>) -> Self {
            Self {
                size,
                fail,
                lengths: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MediaEngine for SizedOutput {
        async fn decode_audio(&self, _input: &Path, _out: &Path) -> Result<()> {
            unreachable!()
        }
        async fn probe_duration(&self, _path: &Path) -> Result<f64> {
            unreachable!()
        }
        async fn normalize_clip(&self, input: &Path, out: &Path, max_s: f64) -> Result<()> {
            self.lengths.lock().unwrap().push(max_s);
            let name = input.file_name().unwrap().to_string_lossy().to_string();
            fs::write(out, vec![0u8; self.size]).await?;
            if self.fail.iter().any(|i| name.contains(&format!("src_{i}"))) {
                anyhow::bail!("encoder crashed");
            }
            Ok(())
        }
        async fn concat_clips(&self, _list: &Path, _out: &Path, _target: f64, _looped: bool) -> Result<()> {
            unreachable!()
        }
        async fn mux(&self, _video: &Path, _audio: &Path, _out: &Path) -> Result<()> {
            unreachable!()
        }
    }

    fn sourced(dir: &Path, count: usize) -> Vec<SourcedClip> {
        (0..count)
            .map(|i| SourcedClip {
                scene_index: i,
                path: dir.join(format!("src_{i}.mp4")),
                target_duration: 2.5 + i as f64,
            })
            .collect()
    }

    #[tokio::test]
    async fn failed_clips_are_dropped_and_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let media = SizedOutput::new(5000, vec![1]);
        let clips = sourced(dir.path(), 3);
        let out = normalize_all(&media, &clips, dir.path(), 1000).await;

        assert_eq!(out.iter().map(|c| c.scene_index).collect::<Vec<_>>(), vec![0, 2]);
        assert!(!dir.path().join("scene_001_norm.mp4").exists());
        assert!(out.iter().all(|c| c.path.exists()));
        assert_eq!(*media.lengths.lock().unwrap(), vec![2.5, 3.5, 4.5]);
    }

    #[tokio::test]
    async fn undersized_output_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let media = SizedOutput::new(10, vec![]);
        let clips = sourced(dir.path(), 2);
        let out = normalize_all(&media, &clips, dir.path(), 1000).await;
        assert!(out.is_empty());
        assert!(!dir.path().join("scene_000_norm.mp4").exists());
    }
}
