use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use broll_render::api::StockProvider;
use broll_render::api::pexels::Pexels;
use broll_render::api::pixabay::Pixabay;
use broll_render::controller::{Collaborators, JobController};
use broll_render::ffmpeg::FfmpegEngine;
use broll_render::notify::WebhookNotifier;
use broll_render::sourcing::ClipSourcer;
use broll_render::storage::LocalDirStore;
use broll_render::{Config, JobRequest, JobState, MemoryJobStore, init, init_tracing};

const USAGE: &str = "usage: broll-cli <audio-file> <script-file> [keywords] [--out DIR]";

struct Args {
    audio: PathBuf,
    script: PathBuf,
    keywords: Option<String>,
    out_dir: PathBuf,
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut positional = Vec::new();
    let mut out_dir = PathBuf::from("output");
    let mut iter = raw.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--out" => {
                out_dir = iter.next().map(PathBuf::from).context(USAGE)?;
            }
            "-h" | "--help" => anyhow::bail!(USAGE),
            _ => positional.push(arg),
        }
    }
    if !(2..=3).contains(&positional.len()) {
        anyhow::bail!(USAGE);
    }
    let mut positional = positional.into_iter();
    Ok(Args {
        audio: positional.next().map(PathBuf::from).context(USAGE)?,
        script: positional.next().map(PathBuf::from).context(USAGE)?,
        keywords: positional.next(),
        out_dir,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = parse_args(std::env::args().skip(1))?;

    let mut config = Config::from_env().await?;
    // local renders accumulate in the output directory
    config.settings.prune_previous_artifacts = false;

    init::ensure_work_dir(&config.work_dir).await?;
    if let Some(warning) = init::missing_tools_message(&init::missing_tools()) {
        tracing::warn!("{}", warning);
    } else if let Err(err) = init::ffmpeg_version().await {
        tracing::warn!("FFmpeg is on PATH but failed to run: {:#}", err);
    }

    let audio = tokio::fs::read(&args.audio)
        .await
        .with_context(|| format!("Failed to read {}", args.audio.display()))?;
    let script = tokio::fs::read_to_string(&args.script)
        .await
        .with_context(|| format!("Failed to read {}", args.script.display()))?;
    let request = JobRequest::from_value(json!({
        "audio_base64": STANDARD.encode(&audio),
        "script": script,
        "keywords": args.keywords,
    }))?;

    let client = reqwest::Client::builder()
        .gzip(true)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;
    let providers: Vec<Box<dyn StockProvider>> = vec![
        Box::new(Pexels::new(config.pexels_api_key.clone())),
        Box::new(Pixabay::new(config.pixabay_api_key.clone())),
    ];

    let controller = Arc::new(JobController::new(
        Collaborators {
            store: Arc::new(MemoryJobStore::new(1)),
            media: Arc::new(FfmpegEngine::new(&config.settings)),
            source: Arc::new(ClipSourcer::new(client.clone(), providers, &config.settings)),
            artifacts: Some(Arc::new(LocalDirStore::new(&args.out_dir))),
            notifier: Arc::new(WebhookNotifier::new(client, config.settings.notify_timeout())),
        },
        config.settings.clone(),
        None,
        config.work_dir.clone(),
        1,
    ));

    let job_id = uuid::Uuid::new_v4().to_string();
    controller.submit(job_id.clone(), request)?;
    controller.drain().await;

    let view = controller
        .status(&job_id)
        .context("job record disappeared")?;
    println!("{}", serde_json::to_string_pretty(&view)?);

    let code = if view.status == JobState::Completed { 0 } else { 1 };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_positionals_and_out_dir() {
        let parsed = args(&["vo.mp3", "script.txt", "n8n, agents", "--out", "renders"]).unwrap();
        assert_eq!(parsed.audio, PathBuf::from("vo.mp3"));
        assert_eq!(parsed.script, PathBuf::from("script.txt"));
        assert_eq!(parsed.keywords.as_deref(), Some("n8n, agents"));
        assert_eq!(parsed.out_dir, PathBuf::from("renders"));
    }

    #[test]
    fn keywords_are_optional() {
        let parsed = args(&["vo.mp3", "script.txt"]).unwrap();
        assert!(parsed.keywords.is_none());
        assert_eq!(parsed.out_dir, PathBuf::from("output"));
    }

    #[test]
    fn rejects_missing_script() {
        assert!(args(&["vo.mp3"]).is_err());
        assert!(args(&["a", "b", "c", "d"]).is_err());
        assert!(args(&["a", "b", "--out"]).is_err());
    }
}
