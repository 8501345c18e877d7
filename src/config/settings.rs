//! Application settings and Telegram configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Telegram API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: i32,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    pub api_hash: String,

    /// Bot token from `@BotFather`, used for publishing and admin commands.
    pub bot_token: String,

    /// Telegram user id allowed to issue admin commands.
    pub admin_id: i64,

    /// Path to the user session file (reads donor channels).
    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,

    /// Path to the bot session file (publishes to target channels).
    #[serde(default = "default_bot_session_path")]
    pub bot_session_path: PathBuf,
}

fn default_session_path() -> PathBuf {
    PathBuf::from("content_cloner_user.session")
}

fn default_bot_session_path() -> PathBuf {
    PathBuf::from("content_cloner_bot.session")
}

impl TelegramConfig {
    /// Creates a new Telegram configuration.
    #[must_use]
    pub fn new(api_id: i32, api_hash: String, bot_token: String, admin_id: i64) -> Self {
        Self {
            api_id,
            api_hash,
            bot_token,
            admin_id,
            session_path: default_session_path(),
            bot_session_path: default_bot_session_path(),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `TG_API_ID`, `TG_API_HASH` and `TG_BOT_TOKEN` to be set.
    /// `TG_ADMIN_ID` is optional; without it admin commands are ignored.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_id: i32 = std::env::var("TG_API_ID")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_ID"))?
            .parse()
            .map_err(|_| ConfigError::InvalidApiId)?;

        let api_hash = std::env::var("TG_API_HASH")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_HASH"))?;

        let bot_token = std::env::var("TG_BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("TG_BOT_TOKEN"))?;

        let admin_id = match std::env::var("TG_ADMIN_ID") {
            Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidAdminId)?,
            Err(_) => 0,
        };

        let session_path = std::env::var("TG_SESSION_PATH")
            .map_or_else(|_| default_session_path(), PathBuf::from);
        let bot_session_path = std::env::var("TG_BOT_SESSION_PATH")
            .map_or_else(|_| default_bot_session_path(), PathBuf::from);

        Ok(Self {
            api_id,
            api_hash,
            bot_token,
            admin_id,
            session_path,
            bot_session_path,
        })
    }

    /// Whether an admin account is configured.
    #[must_use]
    pub const fn has_admin(&self) -> bool {
        self.admin_id != 0
    }
}

/// Tunables for scraping, sending and storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClonerSettings {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Directory for transient media downloads.
    pub download_dir: PathBuf,

    /// ffmpeg binary used to re-encode video notes.
    pub ffmpeg_path: PathBuf,

    /// Fallback wait when a flood wait carries no duration, in seconds.
    pub flood_wait_default_secs: u64,

    /// Upper bound for a single flood wait sleep, in seconds.
    pub flood_wait_cap_secs: u64,

    /// Total send attempts before a rate limit is surfaced.
    pub max_retries: u32,

    /// Minimum spacing between outbound sends, in milliseconds.
    pub min_send_interval_ms: u64,

    /// Realtime poll interval, in seconds.
    pub poll_interval_secs: u64,

    /// Sleep when no realtime pairs are configured, in seconds.
    pub idle_interval_secs: u64,

    /// Sleep after a failed monitor cycle, in seconds.
    pub error_backoff_secs: u64,

    /// Grace delay before collecting album siblings in realtime mode, in milliseconds.
    pub album_grace_ms: u64,

    /// Default N for latest/first scrapes.
    pub default_scrape_count: usize,

    /// Command prefix character for admin commands.
    pub command_prefix: String,
}

impl Default for ClonerSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("content_cloner.db"),
            download_dir: PathBuf::from("downloads"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            flood_wait_default_secs: 1,
            flood_wait_cap_secs: 60,
            max_retries: 5,
            min_send_interval_ms: 0,
            poll_interval_secs: 5,
            idle_interval_secs: 30,
            error_backoff_secs: 10,
            album_grace_ms: 1000,
            default_scrape_count: 50,
            command_prefix: "/".to_owned(),
        }
    }
}

impl ClonerSettings {
    /// Loads settings from a JSON file; missing fields take their defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Saves settings to a JSON file.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Overrides fields from environment variables where present.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(dir);
        }
        if let Ok(ffmpeg) = std::env::var("FFMPEG_PATH") {
            self.ffmpeg_path = PathBuf::from(ffmpeg);
        }
        if let Some(secs) = env_parse("FLOODWAIT_RETRY_DELAY") {
            self.flood_wait_default_secs = secs;
        }
        if let Some(retries) = env_parse("MAX_FLOODWAIT_RETRIES") {
            self.max_retries = retries;
        }
        if let Some(secs) = env_parse("POLL_INTERVAL") {
            self.poll_interval_secs = secs;
        }
        self
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[must_use]
    pub const fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    #[must_use]
    pub const fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    #[must_use]
    pub const fn album_grace(&self) -> Duration {
        Duration::from_millis(self.album_grace_ms)
    }

    #[must_use]
    pub const fn min_send_interval(&self) -> Duration {
        Duration::from_millis(self.min_send_interval_ms)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be a positive integer)")]
    InvalidApiId,

    #[error("Invalid admin ID format (must be an integer user id)")]
    InvalidAdminId,

    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),
}
