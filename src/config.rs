//! Configuration management for capture-uploader

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Intake server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Batch upload configuration
    #[serde(default)]
    pub upload: UploadConfig,

    /// Screen capture and recording configuration
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the intake server, e.g. `http://127.0.0.1:5000`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path of the multipart upload endpoint
    #[serde(default = "default_upload_path")]
    pub upload_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum number of files accepted in one batch
    #[serde(default = "default_max_files")]
    pub max_files_per_batch: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// ffmpeg executable used for display grabbing and encoding
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// ffplay executable used for the live preview window
    #[serde(default = "default_ffplay_path")]
    pub ffplay_path: String,

    /// Open a live preview window while sharing
    #[serde(default)]
    pub preview: bool,

    /// ffmpeg input format for the display (x11grab, avfoundation, gdigrab)
    #[serde(default = "default_display_format")]
    pub display_format: String,

    /// ffmpeg input device for the display
    #[serde(default = "default_display_input")]
    pub display_input: String,

    /// ffmpeg input format for system audio
    #[serde(default = "default_audio_format")]
    pub audio_format: String,

    /// ffmpeg input device for system audio. None records video only.
    #[serde(default = "default_audio_input")]
    pub audio_input: Option<String>,

    /// Capture frame rate
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Video bitrate in Kbps
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate_kbps: u32,

    /// How often the recorder hands buffered data to the chunk buffer (ms)
    #[serde(default = "default_segment_interval")]
    pub segment_interval_ms: u64,
}

// Default value functions
fn default_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_upload_path() -> String {
    "/upload".to_string()
}

fn default_max_files() -> usize {
    50
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffplay_path() -> String {
    "ffplay".to_string()
}

#[cfg(target_os = "macos")]
fn default_display_format() -> String {
    "avfoundation".to_string()
}

#[cfg(target_os = "windows")]
fn default_display_format() -> String {
    "gdigrab".to_string()
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn default_display_format() -> String {
    "x11grab".to_string()
}

#[cfg(target_os = "macos")]
fn default_display_input() -> String {
    // avfoundation index of the first screen
    "1".to_string()
}

#[cfg(target_os = "windows")]
fn default_display_input() -> String {
    "desktop".to_string()
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn default_display_input() -> String {
    std::env::var("DISPLAY").unwrap_or_else(|_| ":0.0".to_string())
}

#[cfg(target_os = "macos")]
fn default_audio_format() -> String {
    "avfoundation".to_string()
}

#[cfg(target_os = "windows")]
fn default_audio_format() -> String {
    "dshow".to_string()
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn default_audio_format() -> String {
    "pulse".to_string()
}

#[cfg(target_os = "macos")]
fn default_audio_input() -> Option<String> {
    Some(":0".to_string())
}

#[cfg(target_os = "windows")]
fn default_audio_input() -> Option<String> {
    // dshow needs a named device; left to the user
    None
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn default_audio_input() -> Option<String> {
    Some("default".to_string())
}

fn default_fps() -> u32 {
    30
}

fn default_video_bitrate() -> u32 {
    2500
}

fn default_segment_interval() -> u64 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            upload_path: default_upload_path(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_files_per_batch: default_max_files(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffplay_path: default_ffplay_path(),
            preview: false,
            display_format: default_display_format(),
            display_input: default_display_input(),
            audio_format: default_audio_format(),
            audio_input: default_audio_input(),
            fps: default_fps(),
            video_bitrate_kbps: default_video_bitrate(),
            segment_interval_ms: default_segment_interval(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upload: UploadConfig::default(),
            capture: CaptureConfig::default(),
            config_path: None,
        }
    }
}

impl Config {
    /// Load configuration from `path` (or the default location), creating
    /// a default file when none exists yet
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let mut config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

            config.config_path = Some(config_path);
            Ok(config)
        } else {
            let config = Config {
                config_path: Some(config_path),
                ..Config::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "capture-uploader", "client")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Full URL of the upload endpoint
    pub fn upload_endpoint(&self) -> String {
        let base = self.server.base_url.trim_end_matches('/');
        let path = self.server.upload_path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }

    /// Override the server base URL (from `--server`)
    pub fn set_base_url(&mut self, base_url: String) {
        self.server.base_url = base_url;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_endpoint_joins_slashes() {
        let mut config = Config::default();
        assert_eq!(config.upload_endpoint(), "http://127.0.0.1:5000/upload");

        config.set_base_url("https://intake.example.org/".to_string());
        config.server.upload_path = "upload".to_string();
        assert_eq!(config.upload_endpoint(), "https://intake.example.org/upload");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            base_url = "http://media.local:8080"

            [capture]
            fps = 15
            audio_input = "alsa_output.monitor"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.base_url, "http://media.local:8080");
        assert_eq!(config.server.upload_path, "/upload");
        assert_eq!(config.upload.max_files_per_batch, 50);
        assert_eq!(config.capture.fps, 15);
        assert_eq!(config.capture.audio_input.as_deref(), Some("alsa_output.monitor"));
        assert_eq!(config.capture.segment_interval_ms, 1000);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(config.config_path().unwrap(), path);

        let reloaded = Config::load(Some(&path)).unwrap();
        assert_eq!(reloaded.upload_endpoint(), config.upload_endpoint());
    }
}
