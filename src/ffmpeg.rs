use crate::config::PipelineSettings;
use crate::logw;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

async fn run_cmd(args: &[String], timeout: Duration) -> Result<()> {
    if args.is_empty() {
        return Ok(());
    }

    let mut cmd = Command::new(&args[0]);
    cmd.args(&args[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().with_context(|| format!("Failed to spawn {}", args[0]))?;
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(out) => out.context("Command execution failed")?,
        Err(_) => anyhow::bail!("{} timed out after {}s", args[0], timeout.as_secs()),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let start = stderr
            .char_indices()
            .rev()
            .nth(399)
            .map(|(i, _)| i)
            .unwrap_or(0);
        anyhow::bail!("{} exited with {}: {}", args[0], output.status, &stderr[start..]);
    }

    Ok(())
}

fn ffmpeg_base() -> Vec<String> {
    vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ]
}

pub async fn ffprobe_duration_seconds(path: &Path, timeout: Duration) -> Result<f64> {
    let mut cmd = Command::new("ffprobe");
    cmd.args([
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
    ])
    .arg(path)
    .kill_on_drop(true);

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| anyhow::anyhow!("ffprobe timed out after {}s", timeout.as_secs()))?
        .context("ffprobe duration failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed on {}", path.display()));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let duration = text.parse::<f64>().unwrap_or(-1.0);
    if !duration.is_finite() || duration <= 0.0 {
        return Err(anyhow::anyhow!("Invalid duration '{}' for {}", text, path.display()));
    }
    Ok(duration)
}

/// Any audio container in, 48 kHz PCM WAV out.
pub async fn ffmpeg_decode_audio(input: &Path, out_wav: &Path, timeout: Duration) -> Result<bool> {
    let mut args = ffmpeg_base();
    args.extend([
        "-i".to_string(),
        input.display().to_string(),
        "-vn".to_string(),
        "-acodec".to_string(),
        "pcm_s16le".to_string(),
        "-ar".to_string(),
        "48000".to_string(),
        out_wav.display().to_string(),
    ]);
    run_cmd(&args, timeout).await?;
    Ok(out_wav.exists())
}

/// Fill the canonical frame without letterboxing: scale up until both sides
/// cover it, then center-crop the overflow.
pub fn normalize_filter(width: u32, height: u32, fps: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1,fps={fps},format=yuv420p",
        w = width,
        h = height,
        fps = fps
    )
}

/// At most `max_s` seconds of `input`, silent, in the canonical geometry.
pub fn normalize_args(input: &Path, out_mp4: &Path, width: u32, height: u32, fps: u32, max_s: f64) -> Vec<String> {
    let mut args = ffmpeg_base();
    args.extend([
        "-i".to_string(),
        input.display().to_string(),
        "-t".to_string(),
        format!("{:.3}", max_s),
        "-vf".to_string(),
        normalize_filter(width, height, fps),
        "-an".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "ultrafast".to_string(),
        "-crf".to_string(),
        "23".to_string(),
        "-r".to_string(),
        fps.to_string(),
        out_mp4.display().to_string(),
    ]);
    args
}

pub async fn ffmpeg_normalize_clip(
    input: &Path,
    out_mp4: &Path,
    width: u32,
    height: u32,
    fps: u32,
    max_s: f64,
    timeout: Duration,
) -> Result<bool> {
    let args = normalize_args(input, out_mp4, width, height, fps, max_s);
    run_cmd(&args, timeout).await?;
    Ok(out_mp4.exists())
}

/// Concatenate a play-list of uniformly encoded clips without re-encoding and
/// cut the result at `target_s`. With `loop_input` the list is replayed until
/// the target is reached.
pub async fn ffmpeg_concat_copy(
    list_txt: &Path,
    out_mp4: &Path,
    target_s: f64,
    loop_input: bool,
    timeout: Duration,
) -> Result<bool> {
    let mut args = ffmpeg_base();
    if loop_input {
        args.extend(["-stream_loop".to_string(), "-1".to_string()]);
    }
    args.extend([
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list_txt.display().to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-c".to_string(),
        "copy".to_string(),
        "-t".to_string(),
        format!("{:.3}", target_s),
        "-movflags".to_string(),
        "+faststart".to_string(),
        out_mp4.display().to_string(),
    ]);
    run_cmd(&args, timeout).await?;
    Ok(out_mp4.exists())
}

/// Silent video + narration into the deliverable, ending with the shorter
/// stream.
pub async fn ffmpeg_mux(video_in: &Path, audio_in: &Path, out_mp4: &Path, timeout: Duration) -> Result<bool> {
    let mut args = ffmpeg_base();
    args.extend([
        "-i".to_string(),
        video_in.display().to_string(),
        "-i".to_string(),
        audio_in.display().to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-shortest".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        out_mp4.display().to_string(),
    ]);
    run_cmd(&args, timeout).await?;
    Ok(out_mp4.exists())
}

/// Media operations the pipeline needs, each bounded by its own timeout.
/// Every method returns an error when the expected output was not produced.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn decode_audio(&self, input: &Path, out_wav: &Path) -> Result<()>;

    async fn probe_duration(&self, path: &Path) -> Result<f64>;

    /// Re-encode at most `max_s` seconds of `input`.
    async fn normalize_clip(&self, input: &Path, out_mp4: &Path, max_s: f64) -> Result<()>;

    async fn concat_clips(&self, list_txt: &Path, out_mp4: &Path, target_s: f64, loop_input: bool) -> Result<()>;

    async fn mux(&self, video_in: &Path, audio_in: &Path, out_mp4: &Path) -> Result<()>;
}

pub struct FfmpegEngine {
    width: u32,
    height: u32,
    fps: u32,
    decode_timeout: Duration,
    probe_timeout: Duration,
    normalize_timeout: Duration,
    assemble_timeout: Duration,
}

impl FfmpegEngine {
    pub fn new(settings: &PipelineSettings) -> Self {
        Self {
            width: settings.frame_width,
            height: settings.frame_height,
            fps: settings.fps,
            decode_timeout: Duration::from_secs(settings.decode_timeout_secs),
            probe_timeout: Duration::from_secs(settings.probe_timeout_secs),
            normalize_timeout: Duration::from_secs(settings.normalize_timeout_secs),
            assemble_timeout: Duration::from_secs(settings.assemble_timeout_secs),
        }
    }
}

fn produced(ok: bool, what: &str, path: &Path) -> Result<()> {
    if ok {
        Ok(())
    } else {
        logw(format!("{} produced no output at {}", what, path.display()));
        Err(anyhow::anyhow!("{} produced no output", what))
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn decode_audio(&self, input: &Path, out_wav: &Path) -> Result<()> {
        let ok = ffmpeg_decode_audio(input, out_wav, self.decode_timeout).await?;
        produced(ok, "audio decode", out_wav)
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        ffprobe_duration_seconds(path, self.probe_timeout).await
    }

    async fn normalize_clip(&self, input: &Path, out_mp4: &Path, max_s: f64) -> Result<()> {
        let ok = ffmpeg_normalize_clip(
            input,
            out_mp4,
            self.width,
            self.height,
            self.fps,
            max_s,
            self.normalize_timeout,
        )
        .await?;
        produced(ok, "normalize", out_mp4)
    }

    async fn concat_clips(&self, list_txt: &Path, out_mp4: &Path, target_s: f64, loop_input: bool) -> Result<()> {
        let ok = ffmpeg_concat_copy(list_txt, out_mp4, target_s, loop_input, self.assemble_timeout).await?;
        produced(ok, "concat", out_mp4)
    }

    async fn mux(&self, video_in: &Path, audio_in: &Path, out_mp4: &Path) -> Result<()> {
        let ok = ffmpeg_mux(video_in, audio_in, out_mp4, self.assemble_timeout).await?;
        produced(ok, "mux", out_mp4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_filter_crops_instead_of_padding() {
        let f = normalize_filter(1920, 1080, 30);
        assert!(f.starts_with("scale=1920:1080:force_original_aspect_ratio=increase,crop=1920:1080"));
        assert!(f.contains("fps=30"));
        assert!(!f.contains("pad="));
    }

    #[test]
    fn normalize_trims_to_scene_length() {
        let args = normalize_args(Path::new("in.mp4"), Path::new("out.mp4"), 1920, 1080, 30, 4.0);
        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "4.000");
        assert!(t > args.iter().position(|a| a == "-i").unwrap());
        assert!(args.contains(&"-an".to_string()));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[tokio::test]
    async fn empty_command_is_a_no_op() {
        run_cmd(&[], Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let args = vec!["definitely-not-a-real-binary-4821".to_string()];
        assert!(run_cmd(&args, Duration::from_secs(5)).await.is_err());
    }
}
