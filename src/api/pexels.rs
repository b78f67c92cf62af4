use crate::api::{SearchParams, StockProvider, StockVideo, VideoVariant, qualified_query};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

const SEARCH_URL: &str = "https://api.pexels.com/videos/search";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    videos: Vec<PexelsVideo>,
}

#[derive(Debug, Deserialize)]
struct PexelsVideo {
    id: u64,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    video_files: Vec<PexelsFile>,
}

#[derive(Debug, Deserialize)]
struct PexelsFile {
    #[serde(default)]
    link: String,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

/// The page URL slug ("/video/woman-typing-on-laptop-3209211/") is the only
/// descriptive text Pexels returns for many videos.
fn slug_words(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .split('-')
        .filter(|part| !part.chars().all(|c| c.is_ascii_digit()))
        .collect::<Vec<_>>()
        .join(" ")
}

impl From<PexelsVideo> for StockVideo {
    fn from(v: PexelsVideo) -> Self {
        let description = match v.description {
            Some(d) if !d.trim().is_empty() => d,
            _ => slug_words(&v.url),
        };
        StockVideo {
            id: v.id.to_string(),
            description,
            tags: v.tags,
            variants: v
                .video_files
                .into_iter()
                .map(|f| VideoVariant {
                    url: f.link,
                    width: f.width.unwrap_or(0),
                    height: f.height.unwrap_or(0),
                })
                .collect(),
        }
    }
}

pub struct Pexels {
    api_key: Option<String>,
}

impl Pexels {
    pub fn new(api_key: Option<String>) -> Self {
        Self { api_key }
    }
}

#[async_trait]
impl StockProvider for Pexels {
    fn name(&self) -> &'static str {
        "Pexels"
    }

    fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    async fn search(&self, client: &Client, params: &SearchParams<'_>) -> Result<Vec<StockVideo>> {
        let key = self.api_key.as_deref().context("Pexels API key missing")?;
        let query = qualified_query(params.query);
        let per_page = params.per_page.to_string();
        let page = params.page.to_string();

        let resp = client
            .get(SEARCH_URL)
            .header("Authorization", key)
            .query(&[
                ("query", query.as_str()),
                ("orientation", "landscape"),
                ("per_page", per_page.as_str()),
                ("page", page.as_str()),
            ])
            .timeout(params.timeout)
            .send()
            .await
            .context("Pexels request failed")?;

        if !resp.status().is_success() {
            anyhow::bail!("Pexels search HTTP {}", resp.status().as_u16());
        }

        let body: SearchResponse = resp.json().await.context("Pexels response parse failed")?;
        Ok(body.videos.into_iter().map(StockVideo::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_search_response() {
        let raw = r#"{
            "page": 1,
            "videos": [{
                "id": 3209211,
                "url": "https://www.pexels.com/video/woman-typing-on-laptop-3209211/",
                "video_files": [
                    {"id": 1, "quality": "sd", "width": 640, "height": 360, "link": "https://v/sd.mp4"},
                    {"id": 2, "quality": "hd", "width": 1920, "height": 1080, "link": "https://v/hd.mp4"},
                    {"id": 3, "quality": "hls", "width": null, "height": null, "link": "https://v/x.m3u8"}
                ]
            }]
        }"#;
        let body: SearchResponse = serde_json::from_str(raw).unwrap();
        let videos: Vec<StockVideo> = body.videos.into_iter().map(StockVideo::from).collect();

        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].description, "woman typing on laptop");
        assert_eq!(videos[0].variants.len(), 3);
        assert_eq!(videos[0].best_variant(1280).unwrap().url, "https://v/hd.mp4");
    }

    #[test]
    fn explicit_description_wins_over_slug() {
        let raw = r#"{"videos":[{"id":1,"url":"https://www.pexels.com/video/dog-1/","description":"Cute dog","tags":["pet"]}]}"#;
        let body: SearchResponse = serde_json::from_str(raw).unwrap();
        let v = StockVideo::from(body.videos.into_iter().next().unwrap());
        assert_eq!(v.metadata_text(), "cute dog pet");
    }

    #[test]
    fn disabled_without_key() {
        assert!(!Pexels::new(None).is_enabled());
        assert!(Pexels::new(Some("k".into())).is_enabled());
    }
}
