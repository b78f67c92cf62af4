use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

const REQUIRED_TOOLS: &[&str] = &["ffmpeg", "ffprobe"];
const TOOL_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn ensure_work_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create work dir {}", dir.display()))?;
        tracing::info!("Created directory: {}", dir.display());
    }
    Ok(())
}

/// Names of required media tools that are not on `PATH`.
pub fn missing_tools() -> Vec<&'static str> {
    REQUIRED_TOOLS
        .iter()
        .copied()
        .filter(|tool| which::which(tool).is_err())
        .collect()
}

/// Startup warning for missing tools, `None` when all are present.
pub fn missing_tools_message(missing: &[&str]) -> Option<String> {
    if missing.is_empty() {
        return None;
    }
    Some(format!("Missing media tools: {}; every job will fail", missing.join(", ")))
}

/// First line of `ffmpeg -version`.
pub async fn ffmpeg_version() -> Result<String> {
    tool_first_line("ffmpeg", &["-version"], TOOL_CHECK_TIMEOUT).await
}

/// Run `program` and return the first line of its stdout. The child is
/// killed if it outlives `limit`.
async fn tool_first_line(program: &str, args: &[&str], limit: Duration) -> Result<String> {
    let child = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(limit, child)
        .await
        .map_err(|_| anyhow::anyhow!("{} timed out after {:?}", program, limit))?
        .with_context(|| format!("{} is not runnable", program))?;
    if !output.status.success() {
        anyhow::bail!("{} exited with {}", program, output.status);
    }
    let text = String::from_utf8_lossy(&output.stdout);
    Ok(text.lines().next().unwrap_or_default().trim().to_string())
}
