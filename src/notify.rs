use crate::jobs::{JobOutcome, JobResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NoticeBody {
    Completed {
        video_url: String,
        duration: f64,
        clips_used: usize,
    },
    Failed {
        error: String,
    },
}

/// Sent once per job when it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerminalNotice {
    pub job_id: String,
    #[serde(flatten)]
    pub body: NoticeBody,
    /// The submission body as it was received.
    pub original_data: Value,
}

impl TerminalNotice {
    pub fn new(job_id: impl Into<String>, outcome: &JobOutcome, original_data: Value) -> Self {
        let body = match outcome {
            JobOutcome::Completed(JobResult {
                published_location,
                total_duration_seconds,
                clips_used_count,
            }) => NoticeBody::Completed {
                video_url: published_location.clone(),
                duration: *total_duration_seconds,
                clips_used: *clips_used_count,
            },
            JobOutcome::Failed(cause) => NoticeBody::Failed { error: cause.clone() },
        };
        Self {
            job_id: job_id.into(),
            body,
            original_data,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, target: &str, notice: &TerminalNotice) -> Result<()>;
}

/// POSTs the notice as JSON. One attempt, bounded by `timeout`.
pub struct WebhookNotifier {
    client: Client,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, target: &str, notice: &TerminalNotice) -> Result<()> {
        let resp = self
            .client
            .post(target)
            .timeout(self.timeout)
            .json(notice)
            .send()
            .await
            .context("webhook request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("webhook answered HTTP {}", status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn completed_payload_shape() {
        let outcome = JobOutcome::Completed(JobResult {
            published_location: "https://pub.example.dev/videos/x.mp4".into(),
            total_duration_seconds: 600.0,
            clips_used_count: 18,
        });
        let notice = TerminalNotice::new("job-1", &outcome, json!({"keywords": "n8n"}));
        assert_eq!(
            serde_json::to_value(&notice).unwrap(),
            json!({
                "job_id": "job-1",
                "status": "completed",
                "video_url": "https://pub.example.dev/videos/x.mp4",
                "duration": 600.0,
                "clips_used": 18,
                "original_data": {"keywords": "n8n"}
            })
        );
    }

    #[test]
    fn failed_payload_shape() {
        let outcome = JobOutcome::Failed("too few clips sourced: 2/3".into());
        let notice = TerminalNotice::new("job-2", &outcome, Value::Null);
        assert_eq!(
            serde_json::to_value(&notice).unwrap(),
            json!({
                "job_id": "job-2",
                "status": "failed",
                "error": "too few clips sourced: 2/3",
                "original_data": null
            })
        );
    }

    #[tokio::test]
    async fn webhook_posts_json_body() {
        use axum::routing::post;
        use axum::{Json, Router};

        let received: Arc<Mutex<Vec<Value>>> = Arc::default();
        let sink = received.clone();
        let app = Router::new().route(
            "/hook",
            post(move |Json(body): Json<Value>| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(body);
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = Client::builder().no_proxy().build().unwrap();
        let notifier = WebhookNotifier::new(client, Duration::from_secs(5));
        let notice = TerminalNotice::new("job-3", &JobOutcome::Failed("internal error".into()), json!({}));
        notifier
            .deliver(&format!("http://{addr}/hook"), &notice)
            .await
            .unwrap();

        let got = received.lock().unwrap().clone();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["job_id"], "job-3");
        assert_eq!(got[0]["status"], "failed");

        let missing = notifier.deliver(&format!("http://{addr}/nope"), &notice).await;
        assert!(missing.is_err());
    }
}
