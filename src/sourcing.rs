//! Resolves one scene query into a local clip file, trying each stock
//! provider in order until one yields a download.

use crate::api::{SearchParams, StockProvider, StockVideo, VideoVariant};
use crate::config::PipelineSettings;
use crate::scene_plan::SceneAssignment;
use crate::{logok, logw};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Off-topic subjects. A result whose description or tags contain one of
/// these words (or its plural) is never used.
pub const CONTENT_DENYLIST: &[&str] = &[
    "dog", "cat", "puppy", "kitten", "animal", "wildlife", "bird", "fish", "horse", "fitness", "yoga",
    "workout", "gym", "kitchen", "cooking", "food",
];

/// Terms shorter than this only match at the end of a word.
const SUBSTRING_MIN_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct SourcedClip {
    pub scene_index: usize,
    pub path: PathBuf,
    pub target_duration: f64,
}

/// Long terms match anywhere in a word ("seafood", "fishing"). Short ones
/// match as a word ending, plural included ("bulldogs", "wildcat"), so
/// "category" and "communication" stay allowed.
fn denied_word(word: &str) -> bool {
    let singular = [Some(word), word.strip_suffix('s'), word.strip_suffix("es")];
    CONTENT_DENYLIST.iter().any(|term| {
        if term.len() >= SUBSTRING_MIN_LEN {
            word.contains(term)
        } else {
            singular.iter().flatten().any(|w| w.ends_with(term))
        }
    })
}

/// True when nothing in the result's metadata hits the denylist.
pub fn is_on_topic(video: &StockVideo) -> bool {
    let text = video.metadata_text();
    !text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .any(denied_word)
}

/// Pick a random on-topic result that has a wide enough rendition.
pub fn choose_candidate<'a, R: Rng + ?Sized>(
    videos: &'a [StockVideo],
    min_width: u32,
    rng: &mut R,
) -> Option<(&'a StockVideo, &'a VideoVariant)> {
    let candidates: Vec<&StockVideo> = videos
        .iter()
        .filter(|v| is_on_topic(v) && v.best_variant(min_width).is_some())
        .collect();
    let video = *candidates.choose(rng)?;
    video.best_variant(min_width).map(|variant| (video, variant))
}

/// Stream `url` into `dest`. A partial file is removed on failure.
pub async fn download_to(client: &Client, url: &str, dest: &Path, timeout: Duration) -> Result<u64> {
    let result = async {
        let mut resp = client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .context("clip download request failed")?
            .error_for_status()
            .context("clip download rejected")?;

        let mut file = fs::File::create(dest)
            .await
            .with_context(|| format!("create {}", dest.display()))?;
        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await.context("clip download interrupted")? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        if written == 0 {
            anyhow::bail!("clip download was empty");
        }
        Ok::<u64, anyhow::Error>(written)
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(dest).await;
    }
    result
}

#[async_trait]
pub trait ClipSource: Send + Sync {
    /// `None` means no provider produced a clip for this scene; the job
    /// carries on without it.
    async fn source_clip(&self, scene: &SceneAssignment, target_duration: f64, work_dir: &Path) -> Option<SourcedClip>;
}

pub struct ClipSourcer {
    client: Client,
    providers: Vec<Box<dyn StockProvider>>,
    max_search_page: u32,
    per_page: u32,
    min_width: u32,
    search_timeout: Duration,
    download_timeout: Duration,
}

impl ClipSourcer {
    pub fn new(client: Client, providers: Vec<Box<dyn StockProvider>>, settings: &PipelineSettings) -> Self {
        Self {
            client,
            providers,
            max_search_page: settings.max_search_page.max(1),
            per_page: settings.results_per_page,
            min_width: settings.min_variant_width,
            search_timeout: settings.search_timeout(),
            download_timeout: settings.download_timeout(),
        }
    }

    pub fn enabled_providers(&self) -> Vec<&'static str> {
        self.providers
            .iter()
            .filter(|p| p.is_enabled())
            .map(|p| p.name())
            .collect()
    }

    async fn try_provider(
        &self,
        provider: &dyn StockProvider,
        scene: &SceneAssignment,
        work_dir: &Path,
    ) -> Result<Option<PathBuf>> {
        let page = rand::thread_rng().gen_range(1..=self.max_search_page);
        let params = SearchParams {
            query: &scene.search_query,
            page,
            per_page: self.per_page,
            min_width: self.min_width,
            timeout: self.search_timeout,
        };
        let videos = provider.search(&self.client, &params).await?;

        let picked = {
            let mut rng = rand::thread_rng();
            choose_candidate(&videos, self.min_width, &mut rng)
                .map(|(video, variant)| (video.id.clone(), variant.url.clone()))
        };
        let Some((video_id, url)) = picked else {
            return Ok(None);
        };

        let dest = work_dir.join(format!("scene_{:03}_src.mp4", scene.index));
        let bytes = download_to(&self.client, &url, &dest, self.download_timeout)
            .await
            .with_context(|| format!("{} video {}", provider.name(), video_id))?;
        tracing::debug!("Downloaded {} bytes for scene {}", bytes, scene.index);
        Ok(Some(dest))
    }
}

#[async_trait]
impl ClipSource for ClipSourcer {
    async fn source_clip(&self, scene: &SceneAssignment, target_duration: f64, work_dir: &Path) -> Option<SourcedClip> {
        let short_query: String = scene.search_query.chars().take(40).collect();

        for provider in &self.providers {
            if !provider.is_enabled() {
                continue;
            }
            match self.try_provider(provider.as_ref(), scene, work_dir).await {
                Ok(Some(path)) => {
                    logok(format!(
                        "Scene {}: '{}...' -> {}",
                        scene.index + 1,
                        short_query,
                        provider.name()
                    ));
                    return Some(SourcedClip {
                        scene_index: scene.index,
                        path,
                        target_duration,
                    });
                }
                Ok(None) => logw(format!(
                    "{}: no suitable result for scene {}",
                    provider.name(),
                    scene.index + 1
                )),
                Err(err) => logw(format!("{}: {:#}", provider.name(), err)),
            }
        }

        logw(format!("NO CLIP for scene {}: '{}'", scene.index + 1, scene.search_query));
        None
    }
}
