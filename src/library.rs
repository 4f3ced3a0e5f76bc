//! Scanner over every location downloads can end up in: the private staging
//! folder plus the public Movies/Music/Downloads folders, each under a
//! "Falcon Downloader" subdirectory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail};
use directories::UserDirs;
use walkdir::WalkDir;

use crate::config::{self, Config};
use crate::error::AppError;
use crate::models::{is_audio_ext, is_video_ext, DownloadedFile};

pub const FOLDER_NAME: &str = "Falcon Downloader";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Other,
}

pub fn media_kind(path: &Path) -> MediaKind {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if is_video_ext(&ext) {
        MediaKind::Video
    } else if is_audio_ext(&ext) {
        MediaKind::Audio
    } else {
        MediaKind::Other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LibraryFilter {
    #[default]
    All,
    Video,
    Audio,
}

impl LibraryFilter {
    pub fn parse(value: Option<&str>) -> Result<Self, AppError> {
        match value.unwrap_or("all") {
            "all" => Ok(LibraryFilter::All),
            "video" => Ok(LibraryFilter::Video),
            "audio" => Ok(LibraryFilter::Audio),
            other => Err(AppError::BadRequest(format!(
                "Unknown library filter '{}'",
                other
            ))),
        }
    }

    fn matches(&self, file: &DownloadedFile) -> bool {
        match self {
            LibraryFilter::All => true,
            LibraryFilter::Video => file.is_video,
            LibraryFilter::Audio => file.is_audio,
        }
    }
}

/// The private staging folder downloads land in before relocation.
pub fn staging_dir(config: &Config) -> PathBuf {
    if !config.download_path.is_empty() {
        return PathBuf::from(&config.download_path);
    }
    match config::project_dirs() {
        Ok(dirs) => dirs.data_local_dir().join(FOLDER_NAME),
        Err(_) => PathBuf::from(FOLDER_NAME),
    }
}

/// The shared folder for a media kind, when the platform exposes one.
fn public_root(kind: MediaKind) -> Option<PathBuf> {
    let dirs = UserDirs::new()?;
    let base = match kind {
        MediaKind::Video => dirs.video_dir()?.to_path_buf(),
        MediaKind::Audio => dirs.audio_dir()?.to_path_buf(),
        MediaKind::Other => dirs.download_dir()?.to_path_buf(),
    };
    Some(base.join(FOLDER_NAME))
}

/// Every root the scanner covers, private staging first. The order matters:
/// dedup keeps the first occurrence of a display name.
pub fn library_roots(config: &Config) -> Vec<PathBuf> {
    let mut roots = vec![staging_dir(config)];
    for kind in [MediaKind::Video, MediaKind::Audio, MediaKind::Other] {
        if let Some(root) = public_root(kind) {
            if !roots.contains(&root) {
                roots.push(root);
            }
        }
    }
    roots
}

/// Keeps the first occurrence of each display name, then orders most recently
/// modified first.
fn dedup_and_sort(mut files: Vec<DownloadedFile>) -> Vec<DownloadedFile> {
    let mut seen = HashSet::new();
    files.retain(|f| seen.insert(f.name.clone()));
    files.sort_by(|a, b| b.modified.cmp(&a.modified));
    files
}

/// Enumerates the top-level files of each root in order.
pub fn scan_roots(roots: &[PathBuf]) -> Vec<DownloadedFile> {
    let mut files = Vec::new();
    for root in roots {
        if !root.exists() {
            continue;
        }
        for entry in WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(file) = DownloadedFile::from_path(entry.path()) {
                files.push(file);
            }
        }
    }
    dedup_and_sort(files)
}

pub fn scan(config: &Config, filter: LibraryFilter) -> Vec<DownloadedFile> {
    scan_roots(&library_roots(config))
        .into_iter()
        .filter(|f| filter.matches(f))
        .collect()
}

/// Copies a finished download into the public folder for its media kind and
/// removes the staged source. Failure leaves the source in place; the caller
/// treats that as non-fatal.
pub fn relocate_to_public(src: &Path) -> anyhow::Result<PathBuf> {
    if !src.exists() {
        bail!("source file does not exist");
    }
    let root = public_root(media_kind(src))
        .ok_or_else(|| anyhow!("no public media directory available"))?;
    std::fs::create_dir_all(&root)?;
    let file_name = src
        .file_name()
        .ok_or_else(|| anyhow!("source has no file name"))?;
    let dest = root.join(file_name);
    std::fs::copy(src, &dest)?;
    // Removal is best-effort; a leftover staged copy only costs disk space.
    let _ = std::fs::remove_file(src);
    Ok(dest)
}

/// Looks up a library entry by its full file name (display name + extension).
pub fn find_by_file_name(config: &Config, file_name: &str) -> Option<DownloadedFile> {
    scan_roots(&library_roots(config))
        .into_iter()
        .find(|f| f.path.file_name().map_or(false, |n| n.to_string_lossy() == file_name))
}

/// Deletes a library file after verifying it still resolves under a known root.
pub fn delete_file(config: &Config, file: &DownloadedFile) -> Result<(), AppError> {
    let canonical = std::fs::canonicalize(&file.path)
        .map_err(|_| AppError::NotFound(format!("File '{}' not found", file.name)))?;
    let contained = library_roots(config).iter().any(|root| {
        std::fs::canonicalize(root).map_or(false, |r| canonical.starts_with(r))
    });
    if !contained {
        return Err(AppError::NotFound(format!("File '{}' not found", file.name)));
    }
    std::fs::remove_file(&canonical)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn entry(name: &str, modified: u64, is_video: bool, is_audio: bool) -> DownloadedFile {
        DownloadedFile {
            path: PathBuf::from(format!("/library/{name}")),
            name: name.to_string(),
            size: 1,
            modified,
            is_video,
            is_audio,
        }
    }

    #[test]
    fn first_occurrence_wins_on_duplicate_names() {
        let files = vec![
            entry("clip", 10, true, false),
            entry("clip", 99, true, false),
            entry("song", 5, false, true),
        ];
        let result = dedup_and_sort(files);
        assert_eq!(result.len(), 2);
        let clip = result.iter().find(|f| f.name == "clip").unwrap();
        assert_eq!(clip.modified, 10);
    }

    #[test]
    fn sorted_most_recent_first() {
        let files = vec![
            entry("a", 1, true, false),
            entry("c", 30, true, false),
            entry("b", 20, false, true),
        ];
        let result = dedup_and_sort(files);
        let names: Vec<&str> = result.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["c", "b", "a"]);
    }

    #[test]
    fn filter_matches_by_kind() {
        let video = entry("v", 1, true, false);
        let audio = entry("a", 1, false, true);
        assert!(LibraryFilter::All.matches(&video));
        assert!(LibraryFilter::Video.matches(&video));
        assert!(!LibraryFilter::Video.matches(&audio));
        assert!(LibraryFilter::Audio.matches(&audio));
    }

    #[test]
    fn filter_parse() {
        assert_eq!(LibraryFilter::parse(None).unwrap(), LibraryFilter::All);
        assert_eq!(
            LibraryFilter::parse(Some("video")).unwrap(),
            LibraryFilter::Video
        );
        assert!(LibraryFilter::parse(Some("bogus")).is_err());
    }

    #[test]
    fn media_kind_by_extension() {
        assert_eq!(media_kind(Path::new("a.mp4")), MediaKind::Video);
        assert_eq!(media_kind(Path::new("a.MP3")), MediaKind::Audio);
        assert_eq!(media_kind(Path::new("a.txt")), MediaKind::Other);
        assert_eq!(media_kind(Path::new("noext")), MediaKind::Other);
    }

    #[test]
    fn scan_roots_collapses_same_name_across_roots() {
        let private = tempfile::tempdir().unwrap();
        let public = tempfile::tempdir().unwrap();
        fs::write(private.path().join("clip.mp4"), b"staged").unwrap();
        fs::write(public.path().join("clip.mp4"), b"relocated").unwrap();
        fs::write(public.path().join("song.mp3"), b"audio").unwrap();

        let roots = vec![private.path().to_path_buf(), public.path().to_path_buf()];
        let result = scan_roots(&roots);
        assert_eq!(result.len(), 2);
        let clip = result.iter().find(|f| f.name == "clip").unwrap();
        assert!(clip.path.starts_with(private.path()));
        assert!(clip.is_video);
        let song = result.iter().find(|f| f.name == "song").unwrap();
        assert!(song.is_audio);
    }

    #[test]
    fn scan_roots_skips_directories_and_missing_roots() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("nested")).unwrap();
        fs::write(root.path().join("nested").join("deep.mp4"), b"x").unwrap();
        fs::write(root.path().join("top.mp4"), b"x").unwrap();

        let roots = vec![
            root.path().to_path_buf(),
            PathBuf::from("/definitely/not/here"),
        ];
        let result = scan_roots(&roots);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "top");
    }

    #[test]
    fn staging_dir_honors_override() {
        let config = Config {
            download_path: "/custom/stage".to_string(),
            ..Config::default()
        };
        assert_eq!(staging_dir(&config), PathBuf::from("/custom/stage"));
    }
}
