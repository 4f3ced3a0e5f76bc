//! Classifier for yt-dlp's textual output. The tool has no structured
//! progress/result channel, so every line is pattern-matched into either a
//! progress event or a destination-path marker here, keeping the scraping out
//! of the execution loop.

use once_cell::sync::Lazy;
use regex::Regex;

static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)(?P<percent>\d+(?:\.\d+)?)%").unwrap());

static ETA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"ETA\s+(?P<eta>\d+(?::\d+)*)").unwrap());

/// What a single output line tells us, if anything.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    Progress {
        /// Percentage as reported, 0-100.
        percent: f32,
        eta_seconds: Option<u64>,
    },
    /// An output-path announcement from a download/merge/extract/transcode
    /// stage, or the "already downloaded" message. The last one seen wins.
    Destination(String),
}

pub fn classify(line: &str) -> Option<LineEvent> {
    if let Some(rest) = substring_after(line, "[download] Destination:") {
        return Some(LineEvent::Destination(rest.trim().to_string()));
    }
    if let Some(rest) = substring_after(line, "[Merger] Merging formats into") {
        let path = rest.trim().trim_matches('"').trim_matches('\'');
        return Some(LineEvent::Destination(path.to_string()));
    }
    if let Some(rest) = substring_after(line, "[ExtractAudio] Destination:") {
        return Some(LineEvent::Destination(rest.trim().to_string()));
    }
    if let Some(rest) = substring_after(line, "[ffmpeg] Destination:") {
        return Some(LineEvent::Destination(rest.trim().to_string()));
    }
    if let Some(idx) = line.find(" has already been downloaded") {
        // "file.mp4 has already been downloaded", sometimes prefixed with the
        // [download] stage tag.
        let path = line[..idx]
            .trim()
            .trim_start_matches("[download]")
            .trim();
        if !path.is_empty() {
            return Some(LineEvent::Destination(path.to_string()));
        }
        return None;
    }

    let caps = PERCENT_RE.captures(line)?;
    let percent: f32 = caps.name("percent")?.as_str().parse().ok()?;
    let eta_seconds = ETA_RE
        .captures(line)
        .and_then(|c| parse_clock(c.name("eta")?.as_str()));
    Some(LineEvent::Progress {
        percent,
        eta_seconds,
    })
}

/// Formats the human progress text: "<percent>% ETA: Xm Ys", without the ETA
/// part when none is known.
pub fn progress_text(percent: f32, eta_seconds: Option<u64>) -> String {
    match eta_seconds {
        Some(eta) if eta > 0 => {
            format!("{}% ETA: {}m {}s", percent as u32, eta / 60, eta % 60)
        }
        _ => format!("{}%", percent as u32),
    }
}

/// Parses "SS", "MM:SS" or "HH:MM:SS" clock strings into seconds.
fn parse_clock(clock: &str) -> Option<u64> {
    let mut total = 0u64;
    for part in clock.split(':') {
        total = total * 60 + part.parse::<u64>().ok()?;
    }
    Some(total)
}

fn substring_after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.find(marker).map(|idx| &line[idx + marker.len()..])
}
