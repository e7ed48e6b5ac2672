//! Application settings and Telegram configuration.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::DEFAULT_CLIP_SECONDS;

/// Telegram API configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: i32,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    #[serde(skip_serializing)]
    pub api_hash: String,

    /// Bot token issued by `@BotFather`.
    #[serde(skip_serializing)]
    pub bot_token: String,

    /// Path to the session file.
    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,
}

fn default_session_path() -> PathBuf {
    PathBuf::from("bot.session")
}

impl TelegramConfig {
    /// Creates a new Telegram configuration.
    #[must_use]
    pub fn new(api_id: i32, api_hash: String, bot_token: String) -> Self {
        Self {
            api_id,
            api_hash,
            bot_token,
            session_path: default_session_path(),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `BOT_TOKEN`, `TG_API_ID` and `TG_API_HASH` to be set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = lookup("BOT_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingEnvVar("BOT_TOKEN"))?;

        let api_id: i32 = lookup("TG_API_ID")
            .ok_or(ConfigError::MissingEnvVar("TG_API_ID"))?
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidApiId)?;

        let api_hash = lookup("TG_API_HASH").ok_or(ConfigError::MissingEnvVar("TG_API_HASH"))?;

        let session_path = lookup("TG_SESSION_PATH").map_or_else(default_session_path, PathBuf::from);

        Ok(Self {
            api_id,
            api_hash,
            bot_token,
            session_path,
        })
    }
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("api_id", &self.api_id)
            .field("session_path", &self.session_path)
            .finish_non_exhaustive()
    }
}

/// Bot-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    /// Only this user may enable test mode. `None` lets anyone in.
    pub admin_id: Option<i64>,

    /// Path to the `SQLite` database holding submissions.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Directory for downloaded sources and intermediate clips.
    #[serde(default = "std::env::temp_dir")]
    pub scratch_dir: PathBuf,

    /// Encoder binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Font used for the caption, if the encoder has no fontconfig.
    pub font_file: Option<PathBuf>,

    /// Seconds taken from the start of each submission.
    #[serde(default = "default_clip_seconds")]
    pub clip_seconds: u32,

    /// Whether a user's submissions are deleted after a successful assembly.
    #[serde(default)]
    pub clear_after_assembly: bool,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("users.db")
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

const fn default_clip_seconds() -> u32 {
    DEFAULT_CLIP_SECONDS
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            admin_id: None,
            database_path: default_database_path(),
            scratch_dir: std::env::temp_dir(),
            ffmpeg_path: default_ffmpeg_path(),
            font_file: None,
            clip_seconds: default_clip_seconds(),
            clear_after_assembly: false,
        }
    }
}

impl BotSettings {
    /// Creates bot settings from environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates bot settings from an arbitrary key lookup.
    ///
    /// Unset keys fall back to defaults; set but malformed keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let admin_id = match lookup("ADMIN_ID") {
            Some(raw) if !raw.trim().is_empty() => {
                let id: i64 = raw.trim().parse().map_err(|_| ConfigError::InvalidAdminId(raw.clone()))?;
                (id != 0).then_some(id)
            }
            _ => None,
        };

        let clip_seconds = match lookup("CLIP_SECONDS") {
            Some(raw) => raw
                .trim()
                .parse()
                .ok()
                .filter(|&secs: &u32| secs > 0)
                .ok_or(ConfigError::InvalidClipSeconds(raw))?,
            None => default_clip_seconds(),
        };

        let clear_after_assembly = match lookup("CLEAR_AFTER_ASSEMBLY") {
            Some(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidFlag("CLEAR_AFTER_ASSEMBLY", raw))?,
            None => false,
        };

        Ok(Self {
            admin_id,
            database_path: lookup("DATABASE_PATH").map_or_else(default_database_path, PathBuf::from),
            scratch_dir: lookup("SCRATCH_DIR").map_or_else(std::env::temp_dir, PathBuf::from),
            ffmpeg_path: lookup("FFMPEG_PATH").map_or_else(default_ffmpeg_path, PathBuf::from),
            font_file: lookup("FONT_FILE").filter(|s| !s.is_empty()).map(PathBuf::from),
            clip_seconds,
            clear_after_assembly,
        })
    }

    /// Returns whether the given user may enable test mode.
    #[must_use]
    pub fn may_use_test_mode(&self, user_id: i64) -> bool {
        self.admin_id.is_none_or(|admin| admin == user_id)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be a positive integer)")]
    InvalidApiId,

    #[error("Invalid ADMIN_ID '{0}' (must be a Telegram user id)")]
    InvalidAdminId(String),

    #[error("Invalid CLIP_SECONDS '{0}' (must be a positive integer)")]
    InvalidClipSeconds(String),

    #[error("Invalid boolean for {0}: '{1}'")]
    InvalidFlag(&'static str, String),
}
