use crate::storage::R2Config;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Tunables of the assembly pipeline. Every field has a default so a
/// settings file only needs to name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub scene_count: usize,
    pub max_scene_count: usize,
    pub min_viable_clips: usize,
    pub max_clip_seconds: f64,
    pub context_words: usize,
    pub fallback_words_per_second: f64,
    pub max_loops: u32,
    pub max_concat_entries: usize,
    pub min_normalized_bytes: u64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub fps: u32,
    pub min_variant_width: u32,
    pub max_search_page: u32,
    pub results_per_page: u32,
    pub sourcing_concurrency: usize,
    pub decode_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub normalize_timeout_secs: u64,
    pub assemble_timeout_secs: u64,
    pub search_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub notify_timeout_secs: u64,
    pub artifact_prefix: String,
    pub prune_previous_artifacts: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            scene_count: 20,
            max_scene_count: 60,
            min_viable_clips: 3,
            max_clip_seconds: 4.0,
            context_words: 7,
            fallback_words_per_second: 2.5,
            max_loops: 3,
            max_concat_entries: 150,
            min_normalized_bytes: 1000,
            frame_width: 1920,
            frame_height: 1080,
            fps: 30,
            min_variant_width: 1280,
            max_search_page: 3,
            results_per_page: 25,
            sourcing_concurrency: 4,
            decode_timeout_secs: 120,
            probe_timeout_secs: 10,
            normalize_timeout_secs: 90,
            assemble_timeout_secs: 300,
            search_timeout_secs: 20,
            download_timeout_secs: 30,
            notify_timeout_secs: 30,
            artifact_prefix: "videos/".to_string(),
            prune_previous_artifacts: true,
        }
    }
}

impl PipelineSettings {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read settings: {}", path.as_ref().display()))?;
        let settings: PipelineSettings = serde_json::from_str(&content)
            .with_context(|| format!("Invalid settings JSON: {}", path.as_ref().display()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scene_count == 0 {
            anyhow::bail!("settings: scene_count must be at least 1");
        }
        if self.min_viable_clips == 0 {
            anyhow::bail!("settings: min_viable_clips must be at least 1");
        }
        if self.min_viable_clips > self.scene_count {
            anyhow::bail!(
                "settings: min_viable_clips ({}) exceeds scene_count ({})",
                self.min_viable_clips,
                self.scene_count
            );
        }
        if self.max_scene_count < self.scene_count {
            anyhow::bail!("settings: max_scene_count is below scene_count");
        }
        if self.max_clip_seconds <= 0.0 || self.fallback_words_per_second <= 0.0 {
            anyhow::bail!("settings: clip ceiling and words-per-second must be positive");
        }
        if self.max_loops == 0 || self.max_concat_entries == 0 {
            anyhow::bail!("settings: max_loops and max_concat_entries must be at least 1");
        }
        if self.frame_width % 2 != 0 || self.frame_height % 2 != 0 || self.fps == 0 {
            anyhow::bail!("settings: frame size must be even and fps positive");
        }
        if self.max_search_page == 0 || self.sourcing_concurrency == 0 {
            anyhow::bail!("settings: max_search_page and sourcing_concurrency must be at least 1");
        }
        Ok(())
    }

    /// Scene count for one job: the request's override clamped so the
    /// viability threshold stays reachable.
    pub fn effective_scene_count(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.scene_count)
            .clamp(self.min_viable_clips, self.max_scene_count)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub pexels_api_key: Option<String>,
    pub pixabay_api_key: Option<String>,
    pub r2: Option<R2Config>,
    pub webhook_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub job_capacity: usize,
    pub max_concurrent_jobs: usize,
    pub work_dir: PathBuf,
    pub max_body_bytes: usize,
    pub settings: PipelineSettings,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Read the process configuration. `BROLL_SETTINGS` may point at a JSON
    /// file of [`PipelineSettings`].
    pub async fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = match env_opt("BROLL_SETTINGS") {
            Some(path) => PipelineSettings::load(path).await?,
            None => PipelineSettings::default(),
        };

        let r2 = match R2Config::from_env() {
            Ok(cfg) => Some(cfg),
            Err(err) => {
                tracing::warn!("Object storage not configured: {}", err);
                None
            }
        };

        let config = Self {
            pexels_api_key: env_opt("PEXELS_API_KEY"),
            pixabay_api_key: env_opt("PIXABAY_API_KEY"),
            r2,
            webhook_url: env_opt("WEBHOOK_URL"),
            host: env_opt("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_parse("PORT", 8080),
            job_capacity: env_parse("JOB_CAPACITY", 200),
            max_concurrent_jobs: env_parse("MAX_CONCURRENT_JOBS", 2),
            work_dir: env_opt("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            max_body_bytes: env_parse("MAX_BODY_BYTES", 200 * 1024 * 1024),
            settings,
        };

        if config.job_capacity == 0 || config.max_concurrent_jobs == 0 {
            anyhow::bail!("JOB_CAPACITY and MAX_CONCURRENT_JOBS must be at least 1");
        }
        if config.pexels_api_key.is_none() && config.pixabay_api_key.is_none() {
            tracing::warn!("No stock footage provider key set; every scene will fail sourcing");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipelineSettings::default().validate().unwrap();
    }

    #[test]
    fn partial_settings_file_keeps_defaults() {
        let settings: PipelineSettings =
            serde_json::from_str(r#"{"scene_count": 25, "max_loops": 5}"#).unwrap();
        assert_eq!(settings.scene_count, 25);
        assert_eq!(settings.max_loops, 5);
        assert_eq!(settings.min_viable_clips, 3);
        assert_eq!(settings.artifact_prefix, "videos/");
    }

    #[test]
    fn rejects_unreachable_threshold() {
        let settings = PipelineSettings {
            scene_count: 2,
            min_viable_clips: 3,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn scene_count_override_is_clamped() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.effective_scene_count(None), 20);
        assert_eq!(settings.effective_scene_count(Some(25)), 25);
        assert_eq!(settings.effective_scene_count(Some(1)), 3);
        assert_eq!(settings.effective_scene_count(Some(1000)), 60);
    }

    #[tokio::test]
    async fn load_reads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, r#"{"fps": 25}"#).await.unwrap();
        let settings = PipelineSettings::load(&path).await.unwrap();
        assert_eq!(settings.fps, 25);
    }
}
