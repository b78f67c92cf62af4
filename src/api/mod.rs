//! Stock-footage search providers.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

pub mod pexels;
pub mod pixabay;

/// Terms appended to every search to bias results toward tech/office B-roll.
pub const QUERY_QUALIFIERS: &str = "laptop computer screen coding technology office";

#[derive(Debug, Clone, PartialEq)]
pub struct VideoVariant {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// One search hit, reduced to what clip selection looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct StockVideo {
    pub id: String,
    pub description: String,
    pub tags: Vec<String>,
    pub variants: Vec<VideoVariant>,
}

impl StockVideo {
    /// Lower-cased description and tags, the text the content filter inspects.
    pub fn metadata_text(&self) -> String {
        let mut text = self.description.to_lowercase();
        for tag in &self.tags {
            text.push(' ');
            text.push_str(&tag.to_lowercase());
        }
        text
    }

    /// Widest variant at least `min_width` wide.
    pub fn best_variant(&self, min_width: u32) -> Option<&VideoVariant> {
        self.variants
            .iter()
            .filter(|v| v.width >= min_width && !v.url.is_empty())
            .max_by_key(|v| v.width)
    }
}

#[derive(Debug, Clone)]
pub struct SearchParams<'a> {
    pub query: &'a str,
    pub page: u32,
    pub per_page: u32,
    pub min_width: u32,
    pub timeout: Duration,
}

#[async_trait]
pub trait StockProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// False when the provider has no credentials and must be skipped.
    fn is_enabled(&self) -> bool;

    async fn search(&self, client: &Client, params: &SearchParams<'_>) -> Result<Vec<StockVideo>>;
}

pub fn qualified_query(query: &str) -> String {
    format!("{} {}", query, QUERY_QUALIFIERS)
}
