//! Telegram client wrapper for the challenge bot.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grammers_client::client::{UpdateStream, UpdatesConfiguration};
use grammers_client::media::Attribute;
use grammers_client::update::Message;
use grammers_client::message::InputMessage;
use grammers_client::{Client, InvocationError, SenderPool, SignInError, sender};
use grammers_session::storages::SqliteSession;
use grammers_tl_types as tl;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::file_ref::{FileRef, FileRefError};
use super::incoming::video_ref_from_raw;
use crate::commands::Replier;
use crate::config::TelegramConfig;
use crate::media::{CLIP_FRAME, MediaSource};

/// Bytes requested per `upload.getFile` call. Must divide 1 MiB.
const DOWNLOAD_CHUNK: i32 = 512 * 1024;

/// Errors that can occur during Telegram operations.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Not authorized. Please sign in first.")]
    NotAuthorized,

    #[error("Sign in failed: {0}")]
    SignInFailed(String),

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("File is stored on DC {0}")]
    FileMigrate(i32),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("API invocation error: {0}")]
    Invocation(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error(transparent)]
    FileRef(#[from] FileRefError),
}

impl From<InvocationError> for TelegramError {
    fn from(err: InvocationError) -> Self {
        let err_str = err.to_string();

        // Check for flood wait errors
        if (err_str.contains("FLOOD_WAIT") || err_str.contains("flood"))
            && let Some(seconds) = extract_flood_wait_seconds(&err_str)
        {
            return Self::FloodWait(seconds);
        }

        if err_str.contains("FILE_MIGRATE")
            && let Some(dc_id) = extract_migrate_dc(&err_str)
        {
            return Self::FileMigrate(dc_id);
        }

        Self::Invocation(err_str)
    }
}

/// Extracts flood wait seconds from an error message.
fn extract_flood_wait_seconds(err_msg: &str) -> Option<u32> {
    let patterns = ["FLOOD_WAIT_", "flood wait "];

    for pattern in patterns {
        if let Some(idx) = err_msg.to_lowercase().find(&pattern.to_lowercase()) {
            let start = idx + pattern.len();
            let num_str: String = err_msg[start..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(seconds) = num_str.parse() {
                return Some(seconds);
            }
        }
    }
    None
}

/// Extracts the target DC from a `FILE_MIGRATE_X` error message.
///
/// Accepts both the raw `FILE_MIGRATE_4` form and the `(value: 4)` suffix.
fn extract_migrate_dc(err_msg: &str) -> Option<i32> {
    let idx = err_msg.find("FILE_MIGRATE")?;
    let rest = &err_msg[idx + "FILE_MIGRATE".len()..];
    let rest = match rest.strip_prefix('_') {
        Some(rest) => rest,
        None => &rest[rest.find("value: ")? + "value: ".len()..],
    };

    let num_str: String = rest.chars().take_while(char::is_ascii_digit).collect();
    num_str.parse().ok()
}

fn is_expired_reference(err: &TelegramError) -> bool {
    matches!(err, TelegramError::Invocation(msg) if msg.contains("FILE_REFERENCE_"))
}

/// Runs `op`, sleeping out and retrying once if Telegram asks for a flood wait.
async fn retry_flood_wait<T, F, Fut>(mut op: F) -> Result<T, TelegramError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InvocationError>>,
{
    match op().await.map_err(TelegramError::from) {
        Err(TelegramError::FloodWait(seconds)) => {
            warn!("Flood wait triggered: {} seconds, retrying once", seconds);
            tokio::time::sleep(Duration::from_secs(u64::from(seconds))).await;
            op().await.map_err(TelegramError::from)
        }
        other => other,
    }
}

/// High-level Telegram client wrapper.
pub struct TelegramBot {
    /// The underlying grammers client.
    client: Client,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    /// Update stream, taken once by [`TelegramBot::take_updates`].
    updates: Mutex<Option<UpdateStream>>,

    /// Background task running the sender pool.
    _pool_task: JoinHandle<()>,
}

impl TelegramBot {
    /// Connects to Telegram with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be opened or the connection fails.
    pub async fn connect(config: &TelegramConfig) -> Result<Self, TelegramError> {
        info!("Connecting to Telegram...");

        let session = Arc::new(
            SqliteSession::open(&config.session_path)
                .await
                .map_err(|e| TelegramError::Session(e.to_string()))?,
        );

        let SenderPool {
            runner,
            updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), config.api_id);

        let client = Client::new(handle.clone());

        // Spawn the sender pool runner
        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        // Messages sent while the bot was offline are not replayed.
        let configuration = UpdatesConfiguration {
            catch_up: false,
            ..Default::default()
        };
        let updates = client.stream_updates(updates, configuration).await;

        let is_authorized = client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))?;

        info!("Connected to Telegram. Authorized: {}", is_authorized);

        Ok(Self {
            client,
            handle: handle.thin,
            updates: Mutex::new(Some(updates)),
            _pool_task: pool_task,
        })
    }

    /// Checks if the client is authorized.
    ///
    /// # Errors
    ///
    /// Returns an error if the check fails.
    pub async fn is_authorized(&self) -> Result<bool, TelegramError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))
    }

    /// Signs in with a bot token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is rejected or the request fails.
    pub async fn sign_in_bot(&self, token: &str, api_hash: &str) -> Result<(), TelegramError> {
        info!("Signing in with bot token...");

        match self.client.bot_sign_in(token, api_hash).await {
            Ok(user) => {
                info!("Signed in as @{}", user.username().unwrap_or("<no username>"));
                Ok(())
            }
            Err(SignInError::Other(e)) => Err(e.into()),
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    /// Takes the update stream. Only the first call succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream was already taken.
    pub async fn take_updates(&self) -> Result<UpdateStream, TelegramError> {
        self.updates
            .lock()
            .await
            .take()
            .ok_or_else(|| TelegramError::Connection("update stream already taken".to_owned()))
    }

    /// Downloads a stored document reference to `dest`.
    ///
    /// An expired file reference is refreshed once from the original message.
    /// Files kept on another data center are fetched from that DC.
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk request fails or `dest` cannot be written.
    pub async fn download_document(&self, file_ref: &FileRef, dest: &Path) -> Result<u64, TelegramError> {
        match self.download_chunks(file_ref, dest).await {
            Err(err) if is_expired_reference(&err) => {
                debug!("File reference expired, refreshing message {}", file_ref.message_id);
                let fresh = self.refresh_reference(file_ref.message_id).await?;
                self.download_chunks(&fresh, dest).await
            }
            other => other,
        }
    }

    async fn download_chunks(&self, file_ref: &FileRef, dest: &Path) -> Result<u64, TelegramError> {
        let location = tl::enums::InputFileLocation::InputDocumentFileLocation(
            tl::types::InputDocumentFileLocation {
                id: file_ref.document_id,
                access_hash: file_ref.access_hash,
                file_reference: file_ref.file_reference.clone(),
                thumb_size: String::new(),
            },
        );

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| TelegramError::Download(e.to_string()))?;
        let mut offset: i64 = 0;
        let mut file_dc: Option<i32> = None;

        loop {
            let request = tl::functions::upload::GetFile {
                precise: false,
                cdn_supported: false,
                location: location.clone(),
                offset,
                limit: DOWNLOAD_CHUNK,
            };
            let request = &request;

            let result = match file_dc {
                Some(dc_id) => retry_flood_wait(move || self.client.invoke_in_dc(dc_id, request)).await,
                None => retry_flood_wait(move || self.client.invoke(request)).await,
            };

            let chunk = match result {
                Err(TelegramError::FileMigrate(dc_id)) if file_dc.is_none() => {
                    debug!("Document {} lives on DC {}, switching", file_ref.document_id, dc_id);
                    file_dc = Some(dc_id);
                    continue;
                }
                other => other?,
            };

            let bytes = match chunk {
                tl::enums::upload::File::File(chunk) => chunk.bytes,
                tl::enums::upload::File::CdnRedirect(_) => {
                    return Err(TelegramError::Download("CDN redirect is not supported".to_owned()));
                }
            };

            file.write_all(&bytes)
                .await
                .map_err(|e| TelegramError::Download(e.to_string()))?;
            offset += bytes.len() as i64;

            if bytes.len() < DOWNLOAD_CHUNK as usize {
                break;
            }
        }

        file.flush()
            .await
            .map_err(|e| TelegramError::Download(e.to_string()))?;

        debug!("Downloaded {} bytes to {}", offset, dest.display());
        Ok(offset.unsigned_abs())
    }

    /// Fetches a message again to get a fresh file reference for its video.
    async fn refresh_reference(&self, message_id: i32) -> Result<FileRef, TelegramError> {
        let request = tl::functions::messages::GetMessages {
            id: vec![tl::enums::InputMessage::Id(tl::types::InputMessageId { id: message_id })],
        };

        let messages = match self.client.invoke(&request).await? {
            tl::enums::messages::Messages::Messages(m) => m.messages,
            tl::enums::messages::Messages::Slice(m) => m.messages,
            tl::enums::messages::Messages::ChannelMessages(m) => m.messages,
            tl::enums::messages::Messages::NotModified(_) => Vec::new(),
        };

        messages
            .iter()
            .find_map(video_ref_from_raw)
            .ok_or_else(|| TelegramError::Download(format!("message {message_id} no longer has a video")))
    }

    /// Sends a text message in the chat `message` came from.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails after one flood-wait retry.
    pub async fn send_text(&self, message: &Message, text: &str) -> Result<(), TelegramError> {
        retry_flood_wait(move || message.respond(text)).await?;
        Ok(())
    }

    /// Uploads `path` and sends it as a video in the chat `message` came from.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload or the send fails.
    pub async fn send_video(
        &self,
        message: &Message,
        path: &Path,
        duration: Duration,
    ) -> Result<(), TelegramError> {
        info!("Uploading {}", path.display());

        let uploaded = self
            .client
            .upload_file(path)
            .await
            .map_err(|e| TelegramError::Upload(e.to_string()))?;

        let (w, h) = CLIP_FRAME;
        let video = InputMessage::default()
            .document(uploaded)
            .mime_type("video/mp4")
            .attribute(Attribute::Video {
                supports_streaming: true,
                duration,
                w: i32::try_from(w).unwrap_or_default(),
                h: i32::try_from(h).unwrap_or_default(),
                round_message: false,
            });

        message.respond(video).await?;
        Ok(())
    }

    /// Disconnects from Telegram.
    pub fn disconnect(&self) {
        info!("Disconnecting from Telegram...");
        self.handle.quit();
    }
}

#[async_trait]
impl MediaSource for TelegramBot {
    async fn download(&self, file_id: &str, dest: &Path) -> Result<(), TelegramError> {
        let file_ref: FileRef = file_id.parse()?;
        self.download_document(&file_ref, dest).await?;
        Ok(())
    }
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot").finish_non_exhaustive()
    }
}

/// Replies in the chat of one incoming message.
pub struct ChatReply<'a> {
    bot: &'a TelegramBot,
    message: &'a Message,
}

impl<'a> ChatReply<'a> {
    /// Creates a replier bound to `message`'s chat.
    #[must_use]
    pub const fn new(bot: &'a TelegramBot, message: &'a Message) -> Self {
        Self { bot, message }
    }
}

#[async_trait]
impl Replier for ChatReply<'_> {
    async fn send_text(&self, text: &str) -> Result<(), TelegramError> {
        self.bot.send_text(self.message, text).await
    }

    async fn send_video(&self, path: &Path, duration: Duration) -> Result<(), TelegramError> {
        self.bot.send_video(self.message, path, duration).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_flood_wait() {
        assert_eq!(extract_flood_wait_seconds("FLOOD_WAIT_120"), Some(120));
        assert_eq!(extract_flood_wait_seconds("flood wait 60 seconds"), Some(60));
        assert_eq!(extract_flood_wait_seconds("some other error"), None);
    }

    #[test]
    fn test_extract_migrate_dc() {
        assert_eq!(extract_migrate_dc("rpc error 303: FILE_MIGRATE_4"), Some(4));
        assert_eq!(
            extract_migrate_dc("request error: rpc error 303: FILE_MIGRATE caused by upload.getFile (value: 5)"),
            Some(5)
        );
        assert_eq!(extract_migrate_dc("FILE_REFERENCE_EXPIRED"), None);
        assert_eq!(extract_migrate_dc("FILE_MIGRATE"), None);
    }

    #[test]
    fn test_migrate_error_is_not_an_expired_reference() {
        let err = TelegramError::FileMigrate(4);
        assert!(!is_expired_reference(&err));
        assert_eq!(err.to_string(), "File is stored on DC 4");
    }

    #[test]
    fn test_expired_reference_detection() {
        assert!(is_expired_reference(&TelegramError::Invocation(
            "rpc error 400: FILE_REFERENCE_EXPIRED".to_owned()
        )));
        assert!(!is_expired_reference(&TelegramError::Invocation("FILE_ID_INVALID".to_owned())));
        assert!(!is_expired_reference(&TelegramError::Download("FILE_REFERENCE_EXPIRED".to_owned())));
    }
}
