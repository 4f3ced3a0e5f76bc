//! Client for the external yt-dlp binary: builds invocations, streams the
//! process output through the line classifier, and recovers the final output
//! path from the tool's stage announcements.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::SystemTime;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::{wrappers::LinesStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::lines::{self, LineEvent};
use crate::models::{RawVideoInfo, VideoInfo};

const USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 13; SM-G991B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";
const REFERER: &str = "https://www.youtube.com/";

/// A single download job for the external tool.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub format_id: Option<String>,
    pub audio_only: bool,
}

/// Options that reduce HTTP 403s, throttling and geo blocks. Applied to every
/// invocation.
fn anti_block_args(args: &mut Vec<String>) {
    let options = [
        "--user-agent",
        USER_AGENT,
        "--referer",
        REFERER,
        "--force-ipv4",
        "--no-check-certificates",
        "--http-chunk-size",
        "10M",
        "--sleep-requests",
        "1",
        "--extractor-retries",
        "3",
        "--no-part",
        "--geo-bypass",
        "--no-warnings",
        "--buffer-size",
        "16K",
    ];
    args.extend(options.iter().map(|s| s.to_string()));
}

fn metadata_args(url: &str) -> Vec<String> {
    let mut args = vec!["--dump-json".to_string(), "--no-playlist".to_string()];
    anti_block_args(&mut args);
    args.push(url.to_string());
    args
}

/// Builds the full argument list for a download invocation. The format
/// selector depends on the request mode; the title in the output template is
/// truncated to keep generated names inside filesystem limits.
fn build_download_args(req: &DownloadRequest, dest: &Path) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        format!("{}/%(title).200s.%(ext)s", dest.display()),
        "--no-playlist".to_string(),
        "--restrict-filenames".to_string(),
        "--newline".to_string(),
    ];
    anti_block_args(&mut args);

    if req.audio_only {
        args.push("-x".to_string());
        args.push("--audio-format".to_string());
        args.push("mp3".to_string());
        args.push("--audio-quality".to_string());
        args.push("0".to_string());
        args.push("-f".to_string());
        match &req.format_id {
            Some(id) => args.push(id.clone()),
            None => args.push("bestaudio/best".to_string()),
        }
    } else if let Some(id) = &req.format_id {
        args.push("-f".to_string());
        args.push(format!("{id}+bestaudio/best/{id}"));
        args.push("--merge-output-format".to_string());
        args.push("mp4".to_string());
    } else {
        args.push("-f".to_string());
        args.push("bestvideo[ext=mp4]+bestaudio[ext=m4a]/bestvideo+bestaudio/best".to_string());
        args.push("--merge-output-format".to_string());
        args.push("mp4".to_string());
    }

    args.push("--retries".to_string());
    args.push("10".to_string());
    args.push("--fragment-retries".to_string());
    args.push("10".to_string());
    args.push("--retry-sleep".to_string());
    args.push("exp=1:20:2".to_string());
    args.push("--continue".to_string());
    args.push("--no-overwrites".to_string());

    args.push(req.url.clone());
    args
}

/// Clamps a reported percentage into the [0, 1] fraction forwarded to callers.
fn progress_fraction(percent: f32) -> f32 {
    (percent / 100.0).clamp(0.0, 1.0)
}

/// Last meaningful lines of the tool's stderr, for user-facing error messages.
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return "unknown yt-dlp failure".to_string();
    }
    let start = lines.len().saturating_sub(3);
    lines[start..].join(" | ")
}

/// Most recently modified file in a directory. The fallback result when no
/// destination marker was scraped from the output.
fn latest_file(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut best: Option<(SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) else {
            continue;
        };
        if best.as_ref().map_or(true, |(t, _)| modified > *t) {
            best = Some((modified, path));
        }
    }
    best.map(|(_, path)| path)
}

/// The extractor client. Holds nothing between operations except the
/// cancellation token of the in-flight one; every operation arms a fresh token.
pub struct Extractor {
    current: Mutex<Option<CancellationToken>>,
}

impl Extractor {
    pub fn new() -> Self {
        Extractor {
            current: Mutex::new(None),
        }
    }

    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.current.lock().unwrap() = Some(token.clone());
        token
    }

    /// Idempotent; safe to call with no operation in flight.
    pub fn cancel(&self) {
        if let Some(token) = self.current.lock().unwrap().as_ref() {
            token.cancel();
        }
    }

    /// Fetches the metadata document for a URL and parses it into a VideoInfo.
    pub async fn fetch_metadata(&self, url: &str) -> Result<VideoInfo, AppError> {
        if url.trim().is_empty() {
            return Err(AppError::BadRequest("URL cannot be empty".to_string()));
        }
        tracing::info!("Fetching metadata for URL: {}", url);

        let output = Command::new("yt-dlp")
            .args(metadata_args(url))
            .output()
            .await
            .map_err(|e| AppError::YtDlp(format!("failed to run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!("yt-dlp metadata fetch failed: {}", stderr_tail(&stderr));
            return Err(AppError::YtDlp(stderr_tail(&stderr)));
        }

        let raw: RawVideoInfo = serde_json::from_slice(&output.stdout)
            .map_err(|e| AppError::YtDlp(format!("malformed metadata: {}", e)))?;
        let info = VideoInfo::from_raw(raw, url);
        tracing::info!(
            "Fetched {} formats for '{}'",
            info.formats.len(),
            info.title
        );
        Ok(info)
    }

    /// Runs a download to completion, forwarding progress to the callback and
    /// returning the produced file path.
    ///
    /// Once the armed token is cancelled, no further progress callbacks fire,
    /// the child is killed, and the call resolves to `AppError::Cancelled`.
    pub async fn download(
        &self,
        req: &DownloadRequest,
        dest: &Path,
        mut on_progress: impl FnMut(f32, &str),
    ) -> Result<PathBuf, AppError> {
        if req.url.trim().is_empty() {
            return Err(AppError::BadRequest("URL cannot be empty".to_string()));
        }
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create download directory: {}", e))?;

        let token = self.arm();

        let mut child = Command::new("yt-dlp")
            .args(build_download_args(req, dest))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::YtDlp(format!("failed to start yt-dlp: {}", e)))?;

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let mut destination: Option<String> = None;
        if let Some(stdout) = child.stdout.take() {
            let reader = BufReader::new(stdout).lines();
            let mut stdout_lines = LinesStream::new(reader);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        let _ = child.start_kill();
                        break;
                    }
                    line = stdout_lines.next() => {
                        let Some(Ok(line)) = line else { break };
                        // Checked before forwarding: once cancellation is
                        // requested, no further progress reaches the caller.
                        if token.is_cancelled() {
                            continue;
                        }
                        match lines::classify(&line) {
                            Some(LineEvent::Progress { percent, eta_seconds }) => {
                                on_progress(
                                    progress_fraction(percent),
                                    &lines::progress_text(percent.clamp(0.0, 100.0), eta_seconds),
                                );
                            }
                            Some(LineEvent::Destination(path)) => destination = Some(path),
                            None => {}
                        }
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| AppError::YtDlp(format!("yt-dlp did not exit cleanly: {}", e)))?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        if token.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        if !status.success() {
            return Err(AppError::YtDlp(stderr_tail(&stderr_text)));
        }

        destination
            .map(PathBuf::from)
            .filter(|p| p.exists())
            .or_else(|| latest_file(dest))
            .ok_or_else(|| {
                AppError::YtDlp("download finished but no output file was found".to_string())
            })
    }

    /// Runs the tool's self-update against the stable channel. The last output
    /// line is the status label.
    pub async fn update_tool(&self) -> Result<String, AppError> {
        let output = Command::new("yt-dlp")
            .args(["--update-to", "stable"])
            .output()
            .await
            .map_err(|e| AppError::YtDlp(format!("failed to run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::YtDlp(stderr_tail(&stderr)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("Updated")
            .trim()
            .to_string())
    }
}
