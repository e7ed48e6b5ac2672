//! Command handler implementation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::types::{BotCommand, IncomingMessage, Replier};
use crate::config::BotSettings;
use crate::media::{Assembler, MediaError, MediaSource};
use crate::storage::{StorageError, VideoStore};
use crate::telegram::TelegramError;

const START_TEXT: &str = "Hi! This bot runs a 30-day video challenge.\n\
                          Send /test to try the montage right away with any number of videos.";
const TEST_DENIED_TEXT: &str = "Test mode is only available to the admin 😊";
const TEST_ENABLED_TEXT: &str = "Test mode is on!\n\
                                 Send any number of videos in a row (3 or 30, up to you).\n\
                                 When you are done, send /finish and I will put the clip together \
                                 (1 second each plus a \"Day N\" caption).";
const NOT_A_VIDEO_TEXT: &str = "Please send a video 😊";
const NEEDS_TEST_MODE_TEXT: &str = "Turn on test mode first with /test";
const NO_VIDEOS_TEXT: &str = "No videos to put together";
const ASSEMBLING_TEXT: &str = "Putting your clip together… usually 5–15 seconds";
const DONE_TEXT: &str = "Done! That was a test montage 😊";
const FAILED_TEXT: &str = "Sorry, the montage failed. Please try /finish again later.";

/// Errors that abort handling of a single message.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Telegram(#[from] TelegramError),
}

/// Handles bot commands and video submissions.
pub struct ChallengeHandler {
    /// Bot settings (admin id, clip length, cleanup policy).
    settings: Arc<BotSettings>,

    /// Submission store.
    store: VideoStore,

    /// Runs the encoder pipeline.
    assembler: Assembler,

    /// Users currently in test mode. Not persisted.
    test_mode: RwLock<HashSet<i64>>,
}

impl ChallengeHandler {
    /// Creates a new command handler.
    #[must_use]
    pub fn new(settings: Arc<BotSettings>, store: VideoStore, assembler: Assembler) -> Self {
        Self {
            settings,
            store,
            assembler,
            test_mode: RwLock::new(HashSet::new()),
        }
    }

    /// Returns whether `user_id` has test mode enabled.
    pub async fn is_in_test_mode(&self, user_id: i64) -> bool {
        self.test_mode.read().await.contains(&user_id)
    }

    /// Handles one incoming message.
    ///
    /// Commands are matched first; anything else is treated as a submission
    /// when the sender is in test mode and ignored otherwise.
    pub async fn handle(
        &self,
        message: &IncomingMessage,
        reply: &dyn Replier,
        media: &dyn MediaSource,
    ) -> Result<(), HandlerError> {
        let user_id = message.sender_id;

        if let Some(command) = BotCommand::parse(&message.text) {
            info!("User {} sent {}", user_id, command);
            return match command {
                BotCommand::Start | BotCommand::Help => Ok(reply.send_text(START_TEXT).await?),
                BotCommand::Test => self.handle_test(user_id, reply).await,
                BotCommand::Finish => self.handle_finish(user_id, reply, media).await,
            };
        }

        if self.is_in_test_mode(user_id).await {
            return self.handle_submission(message, reply).await;
        }

        debug!("Ignoring message from user {} outside test mode", user_id);
        Ok(())
    }

    async fn handle_test(&self, user_id: i64, reply: &dyn Replier) -> Result<(), HandlerError> {
        if !self.settings.may_use_test_mode(user_id) {
            warn!("User {} tried to enable test mode without permission", user_id);
            reply.send_text(TEST_DENIED_TEXT).await?;
            return Ok(());
        }

        self.test_mode.write().await.insert(user_id);
        reply.send_text(TEST_ENABLED_TEXT).await?;
        Ok(())
    }

    async fn handle_submission(
        &self,
        message: &IncomingMessage,
        reply: &dyn Replier,
    ) -> Result<(), HandlerError> {
        let Some(video) = &message.video else {
            reply.send_text(NOT_A_VIDEO_TEXT).await?;
            return Ok(());
        };

        let day = self.store.append(message.sender_id, video).await?;
        info!("Saved day {} for user {}", day, message.sender_id);

        reply.send_text(&saved_text(day)).await?;
        Ok(())
    }

    async fn handle_finish(
        &self,
        user_id: i64,
        reply: &dyn Replier,
        media: &dyn MediaSource,
    ) -> Result<(), HandlerError> {
        if !self.is_in_test_mode(user_id).await {
            reply.send_text(NEEDS_TEST_MODE_TEXT).await?;
            return Ok(());
        }

        let submissions = self.store.list_for_user(user_id).await?;
        if submissions.is_empty() {
            reply.send_text(NO_VIDEOS_TEXT).await?;
            return Ok(());
        }

        reply.send_text(ASSEMBLING_TEXT).await?;

        let video = match self.assembler.assemble(user_id, &submissions, media).await {
            Ok(video) => video,
            Err(e) => {
                error!("Assembly failed for user {}: {}", user_id, e);
                reply.send_text(FAILED_TEXT).await?;
                return Err(e.into());
            }
        };

        let clips = u32::try_from(video.clips).unwrap_or(u32::MAX);
        let duration = Duration::from_secs(u64::from(self.settings.clip_seconds) * u64::from(clips));
        reply.send_video(&video.path, duration).await?;
        drop(video);

        reply.send_text(DONE_TEXT).await?;

        if self.settings.clear_after_assembly {
            self.store.clear_user(user_id).await?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for ChallengeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeHandler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Acknowledgement for a stored video.
fn saved_text(day: i64) -> String {
    format!("Video for Day {day} saved ✓\nSend the next one or /finish")
}
