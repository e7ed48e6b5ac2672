//! Command types and definitions.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::telegram::TelegramError;

/// Available bot commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    /// Greet the user and explain the challenge.
    Start,

    /// Same as [`BotCommand::Start`].
    Help,

    /// Enable test mode for the sender.
    Test,

    /// Assemble the sender's videos.
    Finish,
}

impl BotCommand {
    /// Parses a command from a message text.
    ///
    /// Accepts an optional `@botname` suffix and trailing arguments, which
    /// are ignored. Returns `None` if the message is not a known command.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.trim().split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split_once('@').map_or(name, |(name, _bot)| name);

        match name.to_lowercase().as_str() {
            "start" => Some(Self::Start),
            "help" => Some(Self::Help),
            "test" => Some(Self::Test),
            "finish" => Some(Self::Finish),
            _ => None,
        }
    }

    /// Returns the command name as it appears in chat.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::Test => "test",
            Self::Finish => "finish",
        }
    }
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.name())
    }
}

/// A message as seen by the command handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Telegram user id of the sender.
    pub sender_id: i64,

    /// Message text or caption.
    pub text: String,

    /// Stored reference of the attached video, if any.
    pub video: Option<String>,
}

/// Sends replies to the chat a message came from.
#[async_trait]
pub trait Replier: Send + Sync {
    /// Sends a text message.
    async fn send_text(&self, text: &str) -> Result<(), TelegramError>;

    /// Uploads and sends a video file.
    async fn send_video(&self, path: &Path, duration: Duration) -> Result<(), TelegramError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(BotCommand::parse("/start"), Some(BotCommand::Start));
        assert_eq!(BotCommand::parse("/help"), Some(BotCommand::Help));
        assert_eq!(BotCommand::parse("/test"), Some(BotCommand::Test));
        assert_eq!(BotCommand::parse("/finish"), Some(BotCommand::Finish));
    }

    #[test]
    fn test_parse_with_bot_suffix() {
        assert_eq!(
            BotCommand::parse("/finish@day_challenge_bot"),
            Some(BotCommand::Finish)
        );
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!(BotCommand::parse("/TEST"), Some(BotCommand::Test));
        assert_eq!(BotCommand::parse("/Start"), Some(BotCommand::Start));
    }

    #[test]
    fn test_parse_with_extra_whitespace_and_args() {
        assert_eq!(BotCommand::parse("  /start   now "), Some(BotCommand::Start));
    }

    #[test]
    fn test_parse_rejects_non_commands() {
        assert_eq!(BotCommand::parse("start"), None);
        assert_eq!(BotCommand::parse("/skip"), None);
        assert_eq!(BotCommand::parse(""), None);
        assert_eq!(BotCommand::parse("hello /start"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(BotCommand::Finish.to_string(), "/finish");
    }
}
