use crate::api::{SearchParams, StockProvider, StockVideo, VideoVariant, qualified_query};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;

const SEARCH_URL: &str = "https://pixabay.com/api/videos/";

/// Rendition names in descending quality.
const QUALITIES: &[&str] = &["large", "medium", "small", "tiny"];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<PixabayHit>,
}

#[derive(Debug, Deserialize)]
struct PixabayHit {
    id: u64,
    /// Comma-separated, e.g. "laptop, office, business".
    #[serde(default)]
    tags: String,
    #[serde(default)]
    videos: HashMap<String, PixabayRendition>,
}

#[derive(Debug, Deserialize)]
struct PixabayRendition {
    #[serde(default)]
    url: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

impl From<PixabayHit> for StockVideo {
    fn from(mut hit: PixabayHit) -> Self {
        let tags = hit
            .tags
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let variants = QUALITIES
            .iter()
            .filter_map(|q| hit.videos.remove(*q))
            .filter(|r| !r.url.is_empty())
            .map(|r| VideoVariant {
                url: r.url,
                width: r.width,
                height: r.height,
            })
            .collect();
        StockVideo {
            id: hit.id.to_string(),
            description: String::new(),
            tags,
            variants,
        }
    }
}

pub struct Pixabay {
    api_key: Option<String>,
}

impl Pixabay {
    pub fn new(api_key: Option<String>) -> Self {
        Self { api_key }
    }
}

#[async_trait]
impl StockProvider for Pixabay {
    fn name(&self) -> &'static str {
        "Pixabay"
    }

    fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    async fn search(&self, client: &Client, params: &SearchParams<'_>) -> Result<Vec<StockVideo>> {
        let key = self.api_key.as_deref().context("Pixabay API key missing")?;
        let query = qualified_query(params.query);
        let per_page = params.per_page.to_string();
        let page = params.page.to_string();
        let min_width = params.min_width.to_string();

        let resp = client
            .get(SEARCH_URL)
            .query(&[
                ("key", key),
                ("q", query.as_str()),
                ("per_page", per_page.as_str()),
                ("page", page.as_str()),
                ("safesearch", "true"),
                ("min_width", min_width.as_str()),
            ])
            .timeout(params.timeout)
            .send()
            .await
            .context("Pixabay request failed")?;

        if !resp.status().is_success() {
            anyhow::bail!("Pixabay search HTTP {}", resp.status().as_u16());
        }

        let body: SearchResponse = resp.json().await.context("Pixabay response parse failed")?;
        Ok(body.hits.into_iter().map(StockVideo::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hits_and_renditions() {
        let raw = r#"{
            "total": 1,
            "hits": [{
                "id": 125,
                "tags": "laptop, office ,  business",
                "videos": {
                    "large": {"url": "", "width": 0, "height": 0, "size": 0},
                    "medium": {"url": "https://p/m.mp4", "width": 1920, "height": 1080, "size": 1},
                    "small": {"url": "https://p/s.mp4", "width": 1280, "height": 720, "size": 1},
                    "tiny": {"url": "https://p/t.mp4", "width": 640, "height": 360, "size": 1}
                }
            }]
        }"#;
        let body: SearchResponse = serde_json::from_str(raw).unwrap();
        let v = StockVideo::from(body.hits.into_iter().next().unwrap());

        assert_eq!(v.tags, vec!["laptop", "office", "business"]);
        assert_eq!(v.variants.len(), 3);
        assert_eq!(v.best_variant(1280).unwrap().url, "https://p/m.mp4");
    }
}
