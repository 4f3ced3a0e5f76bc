use anyhow::{anyhow, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// The structure of our configuration file (config.toml).
///
/// Missing keys fill in from the defaults, so old config files keep working
/// when new settings are added.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    /// Preferred quality applied after a metadata fetch:
    /// "best", "1080", "720", "480", "360" or "audio".
    pub download_quality: String,
    /// Start new sessions in audio-only mode.
    pub prefer_audio: bool,
    /// Theme preference stored on behalf of UI clients: "system", "light" or "dark".
    pub dark_mode: String,
    /// Run a best-effort yt-dlp self-update when the server starts.
    pub auto_update: bool,
    /// Stored for UI clients; the orchestrator itself runs a single download at a time.
    pub concurrent_downloads: u32,
    /// Override for the staging directory; empty means the default data dir.
    pub download_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            download_quality: "best".to_string(),
            prefer_audio: false,
            dark_mode: "system".to_string(),
            auto_update: true,
            concurrent_downloads: 1,
            download_path: String::new(),
        }
    }
}

/// Returns the cross-platform project directories used for config, PID and data files.
pub fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "falcon", "falcon-agent")
        .ok_or_else(|| anyhow!("Could not find a valid home directory"))
}

/// Returns the cross-platform path to the configuration file, creating the directory if needed.
async fn get_config_path() -> Result<PathBuf> {
    let project_dirs = project_dirs()?;
    let config_dir = project_dirs.config_dir();
    fs::create_dir_all(config_dir).await?;
    Ok(config_dir.join("config.toml"))
}

/// Loads the configuration from the file, or creates a default one if it doesn't exist.
pub async fn load_config() -> Result<Config> {
    let config_path = get_config_path().await?;

    if !config_path.exists() {
        tracing::info!(
            "No config file found. Creating a default one at: {}",
            config_path.display()
        );
        let default_config = Config::default();
        save_config(&default_config).await?;
        return Ok(default_config);
    }

    let config_content = fs::read_to_string(&config_path).await?;
    let config: Config = toml::from_str(&config_content)
        .map_err(|e| anyhow!("Failed to parse config file at {}: {}", config_path.display(), e))?;

    Ok(config)
}

/// Saves the provided configuration object to the file.
pub async fn save_config(config: &Config) -> Result<()> {
    let config_path = get_config_path().await?;
    let toml_string = toml::to_string_pretty(config)?;
    fs::write(config_path, toml_string).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.download_quality, "best");
        assert!(!config.prefer_audio);
        assert_eq!(config.dark_mode, "system");
        assert!(config.auto_update);
        assert_eq!(config.concurrent_downloads, 1);
        assert!(config.download_path.is_empty());
    }

    #[test]
    fn partial_file_fills_missing_keys() {
        let config: Config = toml::from_str("download_quality = \"720\"\nprefer_audio = true\n")
            .expect("partial config should parse");
        assert_eq!(config.download_quality, "720");
        assert!(config.prefer_audio);
        // Untouched keys come from the defaults.
        assert_eq!(config.dark_mode, "system");
        assert!(config.auto_update);
        assert_eq!(config.concurrent_downloads, 1);
    }
}
