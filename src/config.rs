//! Persistent configuration (`config.toml`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

const APP_NAME: &str = "kidsafe";

/// Environment variable that overrides `store.url`
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub workspace: WorkspaceConfig,
    pub timeouts: Timeouts,
    pub commands: CommandsConfig,
    pub title: TitleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `sqlite:<path>`, `postgres://...` or `memory:`
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let path = data_dir().join("verdicts.db");
        Self {
            url: format!("sqlite:{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: cache_dir().join("tmp"),
        }
    }
}

/// Per-operation limits, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub audio_download: u64,
    pub video_download: u64,
    pub frame_extraction: u64,
    pub quick_audio: u64,
    pub image: u64,
    pub full_audio: u64,
    pub context: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            audio_download: 300,
            video_download: 600,
            frame_extraction: 60,
            quick_audio: 120,
            image: 120,
            full_audio: 600,
            context: 600,
        }
    }
}

impl Timeouts {
    pub fn audio_download(&self) -> Duration {
        Duration::from_secs(self.audio_download)
    }

    pub fn video_download(&self) -> Duration {
        Duration::from_secs(self.video_download)
    }

    pub fn frame_extraction(&self) -> Duration {
        Duration::from_secs(self.frame_extraction)
    }

    pub fn quick_audio(&self) -> Duration {
        Duration::from_secs(self.quick_audio)
    }

    pub fn image(&self) -> Duration {
        Duration::from_secs(self.image)
    }

    pub fn full_audio(&self) -> Duration {
        Duration::from_secs(self.full_audio)
    }

    pub fn context(&self) -> Duration {
        Duration::from_secs(self.context)
    }
}

/// Argv templates for the external tools
///
/// Placeholders are substituted per argument: `{id}`, `{output}`, `{input}`,
/// `{dir}`, `{audio}`, `{video}`, `{frames}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Tried in order until the audio file exists
    pub audio_download: Vec<Vec<String>>,
    /// Tried in order until the video file exists
    pub video_download: Vec<Vec<String>>,
    pub extract_frames: Vec<String>,
    pub quick_audio: Vec<String>,
    pub images: Vec<String>,
    pub full_audio: Vec<String>,
    pub context: Vec<String>,
}

const PLAYER_CLIENTS: &[Option<&str>] = &[Some("android"), Some("ios"), Some("web"), None];

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn download_fallbacks(leading: &[&str], formats: &[&str]) -> Vec<Vec<String>> {
    PLAYER_CLIENTS
        .iter()
        .zip(formats.iter())
        .map(|(client, format)| {
            let mut cmd = argv(&["yt-dlp"]);
            cmd.extend(argv(leading));
            if !format.is_empty() {
                cmd.extend(argv(&["-f", format]));
            }
            cmd.extend(argv(&["-o", "{output}", "--no-warnings"]));
            if let Some(client) = client {
                cmd.push("--extractor-args".to_string());
                cmd.push(format!("youtube:player_client={}", client));
            }
            cmd.push("https://www.youtube.com/watch?v={id}".to_string());
            cmd
        })
        .collect()
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            audio_download: download_fallbacks(&["-x", "--audio-format", "wav"], &["", "", "", ""]),
            video_download: download_fallbacks(
                &[],
                &[
                    "bv*[height<=360]/bv*",
                    "bv*[height<=360]/bv*",
                    "best[height<=360]/worst",
                    "best[height<=360]/worst",
                ],
            ),
            extract_frames: argv(&[
                "ffmpeg",
                "-i",
                "{input}",
                "-vf",
                "fps=1/10",
                "-frames:v",
                "50",
                "{frames}",
                "-y",
            ]),
            quick_audio: argv(&["python3", "whisper_scan.py", "{audio}"]),
            images: argv(&["python3", "image_scan.py", "{dir}"]),
            full_audio: argv(&["python3", "whisper_scan_full.py", "{audio}"]),
            context: argv(&["python3", "transcription_analyzer.py", "{dir}"]),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleConfig {
    /// Appended to the built-in denylist
    pub extra_terms: Vec<String>,
}

impl Config {
    /// Load from disk, falling back to defaults on any error
    pub fn load() -> Self {
        let mut config = match Self::config_path() {
            Ok(path) if path.exists() => match Self::load_from(&path) {
                Ok(config) => config,
                Err(e) => {
                    warn!("ignoring unreadable config {}: {:#}", path.display(), e);
                    Self::default()
                }
            },
            _ => Self::default(),
        };
        config.apply_env();
        config
    }

    /// Like [`load`](Self::load), but writes defaults if no file exists yet
    pub fn load_or_create() -> Self {
        if let Ok(path) = Self::config_path() {
            if !path.exists() {
                if let Err(e) = Self::default().save() {
                    warn!("failed to write default config: {:#}", e);
                }
            }
        }
        Self::load()
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(path)
    }

    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", APP_NAME)
            .context("Failed to determine config directory")?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// `DATABASE_URL` wins over the configured store URL
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            let url = url.trim();
            if !url.is_empty() {
                debug!("store url taken from {}", DATABASE_URL_ENV);
                self.store.url = url.to_string();
            }
        }
    }
}

fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".").join(APP_NAME))
}

fn cache_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".").join(APP_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_timeouts() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.audio_download(), Duration::from_secs(300));
        assert_eq!(timeouts.video_download(), Duration::from_secs(600));
        assert_eq!(timeouts.frame_extraction(), Duration::from_secs(60));
        assert_eq!(timeouts.quick_audio(), Duration::from_secs(120));
        assert_eq!(timeouts.context(), Duration::from_secs(600));
    }

    #[test]
    fn test_default_store_is_sqlite() {
        let config = Config::default();
        assert!(config.store.url.starts_with("sqlite:"));
        assert!(config.store.url.ends_with("verdicts.db"));
    }

    #[test]
    fn test_download_fallbacks() {
        let commands = CommandsConfig::default();
        assert_eq!(commands.audio_download.len(), 4);
        assert_eq!(commands.video_download.len(), 4);

        let first = &commands.audio_download[0];
        assert_eq!(first[0], "yt-dlp");
        assert!(first.contains(&"youtube:player_client=android".to_string()));
        assert!(!commands.audio_download[3].contains(&"--extractor-args".to_string()));

        let video = &commands.video_download[2];
        assert!(video.contains(&"best[height<=360]/worst".to_string()));
        assert_eq!(
            video.last().map(String::as_str),
            Some("https://www.youtube.com/watch?v={id}")
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[store]\nurl = \"memory:\"\n\n[timeouts]\nimage = 5\n\n[title]\nextra_terms = [\"clown\"]\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.store.url, "memory:");
        assert_eq!(config.timeouts.image, 5);
        assert_eq!(config.timeouts.full_audio, 600);
        assert_eq!(config.title.extra_terms, vec!["clown"]);
        assert_eq!(config.commands.extract_frames[0], "ffmpeg");
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.timeouts, config.timeouts);
        assert_eq!(parsed.commands.audio_download, config.commands.audio_download);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[store\nurl = ").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
