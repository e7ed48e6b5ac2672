//! Configuration module for the challenge bot.
//!
//! Handles loading of Telegram credentials and bot settings
//! from the process environment.

mod settings;

pub use settings::{BotSettings, ConfigError, TelegramConfig};

/// Default clip length taken from each submission, in seconds.
pub const DEFAULT_CLIP_SECONDS: u32 = 1;
