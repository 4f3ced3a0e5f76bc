//! Sequences user intent into extractor calls and publishes a consistent
//! download snapshot after every step. One orchestrator owns one session:
//! the pasted URL, its fetched metadata, the format selection, and the
//! download state. At most one download runs at a time; a second start while
//! one is active is rejected rather than racing it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::AppError;
use crate::library;
use crate::models::{
    human_size, DownloadState, DownloadStatus, SessionSnapshot, VideoFormat, VideoInfo,
};
use crate::ytdlp::{DownloadRequest, Extractor};
use crate::ConfigState;

struct Session {
    url: String,
    video_info: Option<VideoInfo>,
    selected_format: Option<VideoFormat>,
    audio_only: bool,
    download: DownloadState,
}

/// Result of applying the configured default quality to fetched metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum QualitySelection {
    /// Leave the selector automatic.
    Auto,
    AudioOnly,
    Format(VideoFormat),
}

/// Resolves the quality preference against the fetched formats: "audio"
/// switches to audio-only, "best" leaves the selection automatic, and a
/// height string picks the first non-audio format with that resolution.
pub fn default_selection(info: &VideoInfo, quality: &str) -> QualitySelection {
    match quality {
        "audio" => QualitySelection::AudioOnly,
        "best" => QualitySelection::Auto,
        other => match other.parse::<u32>() {
            Ok(target) => info
                .formats
                .iter()
                .filter(|f| !f.audio_only)
                .find(|f| f.height() == Some(target))
                .cloned()
                .map(QualitySelection::Format)
                .unwrap_or(QualitySelection::Auto),
            Err(_) => QualitySelection::Auto,
        },
    }
}

pub struct Orchestrator {
    extractor: Extractor,
    config: ConfigState,
    session: RwLock<Session>,
    /// Run generation. Bumped by every start, cancel and reset so callbacks
    /// and terminal writes from a superseded run are provably ignored.
    generation: AtomicU64,
}

impl Orchestrator {
    pub fn new(config: ConfigState) -> Self {
        let audio_only = config.read().unwrap().prefer_audio;
        Orchestrator {
            extractor: Extractor::new(),
            config,
            session: RwLock::new(Session {
                url: String::new(),
                video_info: None,
                selected_format: None,
                audio_only,
                download: DownloadState::default(),
            }),
            generation: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let session = self.session.read().unwrap();
        SessionSnapshot {
            url: session.url.clone(),
            video_info: session.video_info.clone(),
            selected_format: session.selected_format.clone(),
            audio_only: session.audio_only,
            download: session.download.clone(),
        }
    }

    /// Replaces the download snapshot whole. Observers never see a partially
    /// updated state.
    fn publish(&self, state: DownloadState) {
        self.session.write().unwrap().download = state;
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Fetches metadata for a URL, storing it as the session's video and
    /// applying the configured default quality.
    pub async fn fetch_info(&self, url: &str) -> Result<VideoInfo, AppError> {
        let url = url.trim().to_string();
        if url.is_empty() {
            return Err(AppError::BadRequest("URL cannot be empty".to_string()));
        }

        {
            let mut session = self.session.write().unwrap();
            session.url = url.clone();
            session.video_info = None;
            session.selected_format = None;
            session.download = DownloadState {
                status: DownloadStatus::FetchingInfo,
                ..DownloadState::default()
            };
        }

        match self.extractor.fetch_metadata(&url).await {
            Ok(info) => {
                let quality = self.config.read().unwrap().download_quality.clone();
                let selection = default_selection(&info, &quality);
                let mut session = self.session.write().unwrap();
                session.video_info = Some(info.clone());
                match selection {
                    QualitySelection::AudioOnly => {
                        session.audio_only = true;
                        session.selected_format = None;
                    }
                    QualitySelection::Auto => session.selected_format = None,
                    QualitySelection::Format(format) => session.selected_format = Some(format),
                }
                session.download = DownloadState::default();
                Ok(info)
            }
            Err(e) => {
                self.publish(DownloadState {
                    status: DownloadStatus::Error,
                    error: Some(e.to_string()),
                    ..DownloadState::default()
                });
                Err(e)
            }
        }
    }

    /// Selects a format by id, or clears the selection. Picking an audio-only
    /// format switches the session into audio-only mode.
    pub fn select_format(&self, format_id: Option<String>) -> Result<(), AppError> {
        let mut session = self.session.write().unwrap();
        match format_id {
            None => {
                session.selected_format = None;
                Ok(())
            }
            Some(id) => {
                let format = session
                    .video_info
                    .as_ref()
                    .and_then(|info| info.formats.iter().find(|f| f.format_id == id).cloned())
                    .ok_or_else(|| AppError::NotFound(format!("Unknown format id '{}'", id)))?;
                if format.audio_only {
                    session.audio_only = true;
                }
                session.selected_format = Some(format);
                Ok(())
            }
        }
    }

    /// Enabling audio-only clears any selected video format.
    pub fn set_audio_only(&self, enabled: bool) {
        let mut session = self.session.write().unwrap();
        session.audio_only = enabled;
        if enabled {
            session.selected_format = None;
        }
    }

    /// Starts the download for the current session. The format id is derived
    /// from the selection only when not in audio-only mode.
    pub fn start_download(self: &Arc<Self>) -> Result<(), AppError> {
        let (url, format_id, audio_only) = {
            let mut session = self.session.write().unwrap();
            if session.url.trim().is_empty() {
                return Err(AppError::BadRequest("URL cannot be empty".to_string()));
            }
            if session.download.status == DownloadStatus::Downloading {
                return Err(AppError::Busy(
                    "A download is already in progress".to_string(),
                ));
            }
            let format_id = if session.audio_only {
                None
            } else {
                session.selected_format.as_ref().map(|f| f.format_id.clone())
            };
            match (&session.selected_format, session.audio_only) {
                (_, true) => tracing::info!("Starting audio download for {}", session.url),
                (Some(format), _) => {
                    tracing::info!("Starting download of {} for {}", format.display_name(), session.url)
                }
                (None, _) => tracing::info!("Starting download for {}", session.url),
            }
            session.download = DownloadState {
                status: DownloadStatus::Downloading,
                ..DownloadState::default()
            };
            (session.url.clone(), format_id, session.audio_only)
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_download(generation, url, format_id, audio_only).await;
        });
        Ok(())
    }

    async fn run_download(
        self: Arc<Self>,
        generation: u64,
        url: String,
        format_id: Option<String>,
        audio_only: bool,
    ) {
        let staging = {
            let config = self.config.read().unwrap();
            library::staging_dir(&config)
        };
        let request = DownloadRequest {
            url,
            format_id,
            audio_only,
        };

        let progress_handle = Arc::clone(&self);
        let result = self
            .extractor
            .download(&request, &staging, |fraction, text| {
                if progress_handle.current_generation() != generation {
                    return;
                }
                progress_handle.publish(DownloadState {
                    status: DownloadStatus::Downloading,
                    progress: fraction,
                    progress_text: text.to_string(),
                    error: None,
                    downloaded_file: None,
                });
            })
            .await;

        match result {
            Ok(path) => {
                // Best effort: a file the user can reach beats a file in the
                // ideal location.
                let final_path = match library::relocate_to_public(&path) {
                    Ok(public) => public,
                    Err(e) => {
                        tracing::warn!(
                            "Could not relocate {} to public storage: {}",
                            path.display(),
                            e
                        );
                        path
                    }
                };
                let size = std::fs::metadata(&final_path).map(|m| m.len()).unwrap_or(0);
                tracing::info!(
                    "Download completed: {} ({})",
                    final_path.display(),
                    human_size(size)
                );
                if self.current_generation() == generation {
                    self.publish(DownloadState {
                        status: DownloadStatus::Completed,
                        progress: 1.0,
                        progress_text: String::new(),
                        error: None,
                        downloaded_file: Some(final_path.to_string_lossy().to_string()),
                    });
                }
            }
            Err(AppError::Cancelled) => {
                // cancel() normally published this already under a newer
                // generation; this covers a run that observed the token on
                // its own.
                if self.current_generation() == generation {
                    self.publish(DownloadState {
                        status: DownloadStatus::Cancelled,
                        ..DownloadState::default()
                    });
                }
            }
            Err(e) => {
                if self.current_generation() == generation {
                    self.publish(DownloadState {
                        status: DownloadStatus::Error,
                        error: Some(e.to_string()),
                        ..DownloadState::default()
                    });
                }
            }
        }
    }

    /// Cancels the in-flight run, if any, and publishes Cancelled immediately
    /// rather than waiting for the extractor's own cancellation error.
    pub fn cancel(&self) {
        self.extractor.cancel();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.publish(DownloadState {
            status: DownloadStatus::Cancelled,
            ..DownloadState::default()
        });
    }

    /// Returns to a fresh Idle session, restoring the audio preference from
    /// the settings.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let prefer_audio = self.config.read().unwrap().prefer_audio;
        let mut session = self.session.write().unwrap();
        session.url.clear();
        session.video_info = None;
        session.selected_format = None;
        session.audio_only = prefer_audio;
        session.download = DownloadState::default();
    }

    /// Runs the tool self-update; the outcome is reported, never fatal.
    pub async fn update_tool(&self) -> String {
        match self.extractor.update_tool().await {
            Ok(status) => format!("yt-dlp updated: {}", status),
            Err(e) => format!("Update failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::RawVideoInfo;

    fn config_state(prefer_audio: bool, quality: &str) -> ConfigState {
        Arc::new(RwLock::new(Config {
            prefer_audio,
            download_quality: quality.to_string(),
            ..Config::default()
        }))
    }

    fn test_info() -> VideoInfo {
        let raw: RawVideoInfo = serde_json::from_value(serde_json::json!({
            "id": "abc",
            "title": "Test",
            "formats": [
                { "format_id": "18", "ext": "mp4", "width": 640, "height": 360,
                  "vcodec": "avc1", "acodec": "mp4a" },
                { "format_id": "22", "ext": "mp4", "width": 1280, "height": 720,
                  "vcodec": "avc1", "acodec": "mp4a" },
                { "format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a" }
            ]
        }))
        .unwrap();
        VideoInfo::from_raw(raw, "https://example.com/watch?v=abc")
    }

    #[test]
    fn quality_360_selects_matching_format() {
        let selection = default_selection(&test_info(), "360");
        match selection {
            QualitySelection::Format(f) => assert_eq!(f.format_id, "18"),
            other => panic!("expected format selection, got {:?}", other),
        }
    }

    #[test]
    fn quality_audio_switches_mode() {
        assert_eq!(default_selection(&test_info(), "audio"), QualitySelection::AudioOnly);
    }

    #[test]
    fn quality_best_stays_automatic() {
        assert_eq!(default_selection(&test_info(), "best"), QualitySelection::Auto);
    }

    #[test]
    fn unmatched_height_stays_automatic() {
        assert_eq!(default_selection(&test_info(), "1080"), QualitySelection::Auto);
        assert_eq!(default_selection(&test_info(), "potato"), QualitySelection::Auto);
    }

    #[test]
    fn audio_formats_never_match_height_targets() {
        // The audio entry has no resolution; only video formats qualify.
        let selection = default_selection(&test_info(), "720");
        match selection {
            QualitySelection::Format(f) => assert!(!f.audio_only),
            other => panic!("expected format selection, got {:?}", other),
        }
    }

    #[test]
    fn starts_with_audio_preference_from_settings() {
        let orch = Orchestrator::new(config_state(true, "best"));
        assert!(orch.snapshot().audio_only);
        assert_eq!(orch.snapshot().download.status, DownloadStatus::Idle);
    }

    #[test]
    fn selecting_audio_format_forces_audio_only() {
        let orch = Orchestrator::new(config_state(false, "best"));
        orch.session.write().unwrap().video_info = Some(test_info());
        orch.select_format(Some("140".to_string())).unwrap();
        let snapshot = orch.snapshot();
        assert!(snapshot.audio_only);
        assert_eq!(
            snapshot.selected_format.map(|f| f.format_id),
            Some("140".to_string())
        );
    }

    #[test]
    fn enabling_audio_only_clears_selection() {
        let orch = Orchestrator::new(config_state(false, "best"));
        orch.session.write().unwrap().video_info = Some(test_info());
        orch.select_format(Some("18".to_string())).unwrap();
        orch.set_audio_only(true);
        let snapshot = orch.snapshot();
        assert!(snapshot.audio_only);
        assert!(snapshot.selected_format.is_none());
    }

    #[test]
    fn unknown_format_id_is_rejected() {
        let orch = Orchestrator::new(config_state(false, "best"));
        orch.session.write().unwrap().video_info = Some(test_info());
        assert!(orch.select_format(Some("999".to_string())).is_err());
    }

    #[test]
    fn reset_restores_settings_preference() {
        let orch = Orchestrator::new(config_state(true, "best"));
        orch.set_audio_only(false);
        {
            let mut session = orch.session.write().unwrap();
            session.url = "https://example.com".to_string();
            session.video_info = Some(test_info());
        }
        orch.reset();
        let snapshot = orch.snapshot();
        assert!(snapshot.url.is_empty());
        assert!(snapshot.video_info.is_none());
        assert!(snapshot.selected_format.is_none());
        assert!(snapshot.audio_only);
        assert_eq!(snapshot.download, DownloadState::default());
    }

    #[test]
    fn cancel_publishes_cancelled_snapshot() {
        let orch = Orchestrator::new(config_state(false, "best"));
        orch.cancel();
        assert_eq!(orch.snapshot().download.status, DownloadStatus::Cancelled);
    }

    #[test]
    fn stale_generation_publishes_nothing() {
        let orch = Orchestrator::new(config_state(false, "best"));
        let stale = orch.current_generation();
        orch.cancel();
        // A callback from the superseded run would observe a newer generation.
        assert_ne!(orch.current_generation(), stale);
    }
}
