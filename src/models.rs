use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

// === yt-dlp JSON models ===

/// Top-level JSON output from `yt-dlp --dump-json`. Only the fields we
/// consume; everything else in the document is ignored.
#[derive(Deserialize, Debug)]
pub struct RawVideoInfo {
    #[serde(default)]
    pub id: String,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

/// A single format entry from the dump-json document.
#[derive(Deserialize, Debug, Default)]
pub struct RawFormat {
    #[serde(default)]
    pub format_id: String,
    pub ext: Option<String>,
    pub format_note: Option<String>,
    pub format: Option<String>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub filesize_approx: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
}

// === Domain models ===

/// Metadata for a single source URL. Immutable once fetched; a new fetch
/// replaces it wholesale.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub thumbnail: Option<String>,
    /// Duration in seconds.
    pub duration: u64,
    pub uploader: Option<String>,
    pub formats: Vec<VideoFormat>,
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VideoFormat {
    pub format_id: String,
    pub ext: String,
    pub label: String,
    pub filesize: Option<u64>,
    pub resolution: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub audio_only: bool,
    pub video_only: bool,
}

/// A codec field counts as absent when missing, empty, or the literal "none"
/// sentinel yt-dlp uses for trackless formats.
fn codec_absent(codec: &Option<String>) -> bool {
    match codec {
        None => true,
        Some(c) => c.is_empty() || c == "none",
    }
}

impl VideoInfo {
    /// Builds the domain model from a raw dump-json document. Format entries
    /// without a format identifier are dropped.
    pub fn from_raw(raw: RawVideoInfo, url: &str) -> Self {
        let formats = raw
            .formats
            .into_iter()
            .filter(|f| !f.format_id.is_empty())
            .map(VideoFormat::from_raw)
            .collect();

        VideoInfo {
            id: raw.id,
            title: raw.title.unwrap_or_else(|| "Unknown".to_string()),
            thumbnail: raw.thumbnail,
            duration: raw.duration.unwrap_or(0.0) as u64,
            uploader: raw.uploader,
            formats,
            url: url.to_string(),
        }
    }
}

impl VideoFormat {
    fn from_raw(raw: RawFormat) -> Self {
        let audio_only = codec_absent(&raw.vcodec);
        // A track cannot be both; when both codec fields are absent it
        // classifies as audio-only.
        let video_only = codec_absent(&raw.acodec) && !audio_only;

        let resolution = if audio_only {
            None
        } else {
            Some(format!(
                "{}x{}",
                raw.width.unwrap_or(0),
                raw.height.unwrap_or(0)
            ))
        };

        VideoFormat {
            format_id: raw.format_id,
            ext: raw.ext.unwrap_or_else(|| "mp4".to_string()),
            label: raw
                .format_note
                .or(raw.format)
                .unwrap_or_else(|| "Unknown".to_string()),
            filesize: raw.filesize.or(raw.filesize_approx),
            resolution,
            vcodec: if audio_only { None } else { raw.vcodec },
            acodec: raw.acodec,
            audio_only,
            video_only,
        }
    }

    /// Height in pixels parsed from the resolution string, if any.
    pub fn height(&self) -> Option<u32> {
        self.resolution
            .as_deref()
            .and_then(|r| r.split('x').nth(1))
            .and_then(|h| h.parse().ok())
    }

    pub fn display_name(&self) -> String {
        if self.audio_only {
            let mut name = format!("Audio • {}", self.ext);
            if let Some(acodec) = &self.acodec {
                name.push_str(&format!(" • {}", acodec));
            }
            name
        } else {
            let mut name = self
                .resolution
                .clone()
                .unwrap_or_else(|| self.label.clone());
            name.push_str(&format!(" • {}", self.ext));
            if self.video_only {
                name.push_str(" (video only)");
            }
            name
        }
    }
}

// === Download state ===

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Idle,
    FetchingInfo,
    Downloading,
    Completed,
    Error,
    Cancelled,
}

/// The observable download snapshot. Always replaced whole on a transition so
/// observers never see a mixed status/progress combination.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DownloadState {
    pub status: DownloadStatus,
    /// Fraction in [0, 1].
    pub progress: f32,
    pub progress_text: String,
    pub error: Option<String>,
    pub downloaded_file: Option<String>,
}

impl Default for DownloadState {
    fn default() -> Self {
        DownloadState {
            status: DownloadStatus::Idle,
            progress: 0.0,
            progress_text: String::new(),
            error: None,
            downloaded_file: None,
        }
    }
}

// === Library models ===

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "avi", "mov", "flv", "wmv", "m4v"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "opus", "ogg", "wav", "flac", "wma"];

pub fn is_video_ext(ext: &str) -> bool {
    VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

pub fn is_audio_ext(ext: &str) -> bool {
    AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

/// A previously downloaded file discovered by the library scanner. Never
/// mutated; recreated on each rescan.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    /// Display name without the extension. Scan results deduplicate on this.
    pub name: String,
    pub size: u64,
    /// Last-modified time as unix seconds.
    pub modified: u64,
    pub is_video: bool,
    pub is_audio: bool,
}

impl DownloadedFile {
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let modified = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Ok(DownloadedFile {
            path: path.to_path_buf(),
            name: path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
            size: metadata.len(),
            modified,
            is_video: is_video_ext(&ext),
            is_audio: is_audio_ext(&ext),
        })
    }
}

pub fn human_size(bytes: u64) -> String {
    match bytes {
        b if b >= 1_073_741_824 => format!("{:.1} GB", b as f64 / 1_073_741_824.0),
        b if b >= 1_048_576 => format!("{:.1} MB", b as f64 / 1_048_576.0),
        b if b >= 1024 => format!("{:.1} KB", b as f64 / 1024.0),
        b => format!("{} B", b),
    }
}

// === API Request/Response Models ===

/// The query parameters for a `GET /info` request.
#[derive(Deserialize, Debug)]
pub struct InfoRequest {
    pub url: String,
}

/// The JSON body for a `POST /select` request. A missing format_id clears the
/// selection back to automatic.
#[derive(Deserialize, Debug, Default)]
pub struct SelectRequest {
    pub format_id: Option<String>,
}

/// The JSON body for a `POST /audio-only` request.
#[derive(Deserialize, Debug)]
pub struct AudioOnlyRequest {
    pub enabled: bool,
}

/// The query parameters for a `GET /library` request.
#[derive(Deserialize, Debug, Default)]
pub struct LibraryQuery {
    pub filter: Option<String>,
}

/// The response sent after successfully starting a download.
#[derive(Serialize, Debug)]
pub struct DownloadResponse {
    pub message: String,
}

/// The response from a `POST /tool/update` request.
#[derive(Serialize, Debug)]
pub struct ToolUpdateResponse {
    pub status: String,
}

/// The full orchestration session as seen by clients of `GET /state`.
#[derive(Serialize, Debug, Clone)]
pub struct SessionSnapshot {
    pub url: String,
    pub video_info: Option<VideoInfo>,
    pub selected_format: Option<VideoFormat>,
    pub audio_only: bool,
    pub download: DownloadState,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_format(id: &str, vcodec: Option<&str>, acodec: Option<&str>) -> RawFormat {
        RawFormat {
            format_id: id.to_string(),
            ext: Some("mp4".to_string()),
            vcodec: vcodec.map(String::from),
            acodec: acodec.map(String::from),
            ..Default::default()
        }
    }

    fn info_with(formats: Vec<RawFormat>) -> VideoInfo {
        VideoInfo::from_raw(
            RawVideoInfo {
                id: "abc".to_string(),
                title: Some("Test".to_string()),
                thumbnail: None,
                duration: Some(212.4),
                uploader: None,
                formats,
            },
            "https://example.com/watch?v=abc",
        )
    }

    #[test]
    fn empty_format_id_is_dropped() {
        let info = info_with(vec![
            raw_format("", Some("avc1"), Some("mp4a")),
            raw_format("18", Some("avc1"), Some("mp4a")),
        ]);
        assert_eq!(info.formats.len(), 1);
        assert_eq!(info.formats[0].format_id, "18");
    }

    #[test]
    fn every_format_has_nonempty_id() {
        let info = info_with(vec![
            raw_format("18", Some("avc1"), Some("mp4a")),
            raw_format("", None, None),
            raw_format("140", Some("none"), Some("mp4a")),
        ]);
        assert!(info.formats.iter().all(|f| !f.format_id.is_empty()));
    }

    #[test]
    fn missing_vcodec_classifies_audio_only() {
        let info = info_with(vec![
            raw_format("140", Some("none"), Some("mp4a")),
            raw_format("139", None, Some("opus")),
        ]);
        assert!(info.formats.iter().all(|f| f.audio_only && !f.video_only));
        assert!(info.formats.iter().all(|f| f.resolution.is_none()));
    }

    #[test]
    fn missing_acodec_classifies_video_only() {
        let info = info_with(vec![raw_format("137", Some("avc1"), Some("none"))]);
        let format = &info.formats[0];
        assert!(format.video_only);
        assert!(!format.audio_only);
    }

    #[test]
    fn both_codecs_absent_is_audio_only_not_both() {
        let info = info_with(vec![raw_format("x", None, None)]);
        let format = &info.formats[0];
        assert!(format.audio_only);
        assert!(!format.video_only);
    }

    #[test]
    fn filesize_falls_back_to_approx() {
        let raw = RawFormat {
            format_id: "22".to_string(),
            filesize: None,
            filesize_approx: Some(1234),
            vcodec: Some("avc1".to_string()),
            acodec: Some("mp4a".to_string()),
            ..Default::default()
        };
        let info = info_with(vec![raw]);
        assert_eq!(info.formats[0].filesize, Some(1234));
    }

    #[test]
    fn height_parses_from_resolution() {
        let raw = RawFormat {
            format_id: "18".to_string(),
            width: Some(640),
            height: Some(360),
            vcodec: Some("avc1".to_string()),
            acodec: Some("mp4a".to_string()),
            ..Default::default()
        };
        let info = info_with(vec![raw]);
        assert_eq!(info.formats[0].resolution.as_deref(), Some("640x360"));
        assert_eq!(info.formats[0].height(), Some(360));
    }

    #[test]
    fn duration_truncates_to_seconds() {
        let info = info_with(vec![]);
        assert_eq!(info.duration, 212);
    }

    #[test]
    fn display_name_variants() {
        let video = info_with(vec![raw_format("137", Some("avc1"), Some("none"))]);
        assert!(video.formats[0].display_name().contains("(video only)"));

        let audio = info_with(vec![raw_format("140", Some("none"), Some("mp4a"))]);
        assert_eq!(audio.formats[0].display_name(), "Audio • mp4 • mp4a");
    }

    #[test]
    fn extension_classification() {
        assert!(is_video_ext("mp4"));
        assert!(is_video_ext("MKV"));
        assert!(is_audio_ext("mp3"));
        assert!(!is_audio_ext("mp4"));
        assert!(!is_video_ext("txt"));
    }

    #[test]
    fn human_size_units() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(5 * 1_048_576), "5.0 MB");
        assert_eq!(human_size(3 * 1_073_741_824), "3.0 GB");
    }
}
