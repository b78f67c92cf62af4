pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod ffmpeg;
pub mod init;
pub mod jobs;
pub mod normalize;
pub mod notify;
pub mod query;
pub mod request;
pub mod scene_plan;
pub mod server;
pub mod sourcing;
pub mod storage;
pub mod timeline;

pub use config::{Config, PipelineSettings};
pub use controller::JobController;
pub use error::JobError;
pub use jobs::{Job, JobState, JobStore, MemoryJobStore};
pub use request::{FreeText, JobRequest};

pub(crate) fn logv(tag: &str, message: &str) {
    match tag {
        "WARN" => tracing::warn!("[{}] {}", tag, message),
        _ => tracing::info!("[{}] {}", tag, message),
    }
}

pub(crate) fn logi(message: impl AsRef<str>) {
    logv("INFO", message.as_ref());
}

pub(crate) fn logok(message: impl AsRef<str>) {
    logv("OK", message.as_ref());
}

pub(crate) fn logw(message: impl AsRef<str>) {
    logv("WARN", message.as_ref());
}

/// Install the fmt subscriber used by both binaries. `LOG_FORMAT=json`
/// switches to structured output.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .init();
    }
}
