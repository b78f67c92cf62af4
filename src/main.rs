use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use broll_render::api::StockProvider;
use broll_render::api::pexels::Pexels;
use broll_render::api::pixabay::Pixabay;
use broll_render::controller::{Collaborators, JobController};
use broll_render::ffmpeg::FfmpegEngine;
use broll_render::notify::WebhookNotifier;
use broll_render::server::{AppState, router};
use broll_render::sourcing::ClipSourcer;
use broll_render::storage::{ArtifactStore, R2Store};
use broll_render::{Config, MemoryJobStore, init, init_tracing};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown requested; finishing in-flight jobs");
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = Config::from_env().await?;

    init::ensure_work_dir(&config.work_dir).await?;
    if let Some(warning) = init::missing_tools_message(&init::missing_tools()) {
        tracing::warn!("{}", warning);
    }

    let client = reqwest::Client::builder()
        .gzip(true)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    let providers: Vec<Box<dyn StockProvider>> = vec![
        Box::new(Pexels::new(config.pexels_api_key.clone())),
        Box::new(Pixabay::new(config.pixabay_api_key.clone())),
    ];
    let sourcer = ClipSourcer::new(client.clone(), providers, &config.settings);
    tracing::info!("Stock providers enabled: {:?}", sourcer.enabled_providers());

    let artifacts = config
        .r2
        .clone()
        .map(|r2| Arc::new(R2Store::new(r2)) as Arc<dyn ArtifactStore>);

    let controller = Arc::new(JobController::new(
        Collaborators {
            store: Arc::new(MemoryJobStore::new(config.job_capacity)),
            media: Arc::new(FfmpegEngine::new(&config.settings)),
            source: Arc::new(sourcer),
            artifacts,
            notifier: Arc::new(WebhookNotifier::new(client, config.settings.notify_timeout())),
        },
        config.settings.clone(),
        config.webhook_url.clone(),
        config.work_dir.clone(),
        config.max_concurrent_jobs,
    ));

    let app = router(
        AppState {
            controller: controller.clone(),
        },
        config.max_body_bytes,
    );

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    controller.drain().await;
    tracing::info!("All jobs finished");
    Ok(())
}
