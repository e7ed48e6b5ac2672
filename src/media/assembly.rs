//! Turns a user's stored submissions into one captioned video.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::ffmpeg::{Encoder, MediaError, concat_list};
use crate::storage::Submission;
use crate::telegram::TelegramError;

/// Something that can fetch a stored video reference to a local file.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Downloads the video behind `file_id` to `dest`.
    async fn download(&self, file_id: &str, dest: &Path) -> Result<(), TelegramError>;
}

/// Files created for one assembly, removed when dropped.
#[derive(Debug, Default)]
pub struct ScratchFiles {
    paths: Vec<PathBuf>,
}

impl ScratchFiles {
    /// Registers a path for removal and returns it.
    pub fn track(&mut self, path: PathBuf) -> PathBuf {
        self.paths.push(path.clone());
        path
    }

    /// Removes every tracked file, ignoring errors.
    pub fn cleanup(&mut self) {
        for path in self.paths.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                debug!("Could not remove {}: {}", path.display(), e);
            }
        }
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// The finished video and the scratch files behind it.
///
/// Dropping this removes the output as well.
#[derive(Debug)]
pub struct AssembledVideo {
    /// Path of the concatenated result.
    pub path: PathBuf,

    /// Number of clips in the result.
    pub clips: usize,

    /// Every file written during assembly, including `path`.
    pub scratch: ScratchFiles,
}

/// Runs the download, trim, caption, overlay and concat steps.
#[derive(Debug, Clone)]
pub struct Assembler {
    encoder: Encoder,
    scratch_dir: PathBuf,
    clip_seconds: u32,
}

impl Assembler {
    /// Creates an assembler writing intermediates under `scratch_dir`.
    #[must_use]
    pub fn new(encoder: Encoder, scratch_dir: impl Into<PathBuf>, clip_seconds: u32) -> Self {
        Self {
            encoder,
            scratch_dir: scratch_dir.into(),
            clip_seconds,
        }
    }

    /// Builds the output video for `user_id` from `submissions`, in the given order.
    ///
    /// Any failing step aborts the whole assembly; scratch files written so far
    /// are removed before the error is returned.
    pub async fn assemble(
        &self,
        user_id: i64,
        submissions: &[Submission],
        source: &dyn MediaSource,
    ) -> Result<AssembledVideo, MediaError> {
        if submissions.is_empty() {
            return Err(MediaError::Empty);
        }

        tokio::fs::create_dir_all(&self.scratch_dir).await?;

        let mut scratch = ScratchFiles::default();
        let mut parts = Vec::with_capacity(submissions.len());

        for submission in submissions {
            let day = submission.day;
            let source_path = scratch.track(self.scratch_path(&format!("{user_id}_{day}.mp4")));
            let trimmed = scratch.track(self.scratch_path(&format!("trim_{user_id}_{day}.mp4")));
            let caption = scratch.track(self.scratch_path(&format!("text_{user_id}_{day}.png")));
            let part = scratch.track(self.scratch_path(&format!("part_{user_id}_{day}.mp4")));

            debug!("Downloading day {} for user {}", day, user_id);
            source
                .download(&submission.file_id, &source_path)
                .await
                .map_err(|err| MediaError::Download {
                    day,
                    source: Box::new(err),
                })?;

            self.encoder.trim(&source_path, self.clip_seconds, &trimmed).await?;
            let has_audio = self.encoder.has_audio(&trimmed).await?;
            self.encoder.render_caption(day, &caption).await?;
            self.encoder
                .overlay(&trimmed, &caption, self.clip_seconds, has_audio, &part)
                .await?;

            parts.push(part);
        }

        let list_file = scratch.track(self.scratch_path(&format!("list_{user_id}.txt")));
        tokio::fs::write(&list_file, concat_list(&parts)).await?;

        let output = scratch.track(self.scratch_path(&format!("result_{user_id}.mp4")));
        self.encoder.concat(&list_file, &output).await?;

        info!(
            "Assembled {} clips for user {} into {}",
            parts.len(),
            user_id,
            output.display()
        );

        Ok(AssembledVideo {
            path: output,
            clips: parts.len(),
            scratch,
        })
    }

    fn scratch_path(&self, name: &str) -> PathBuf {
        self.scratch_dir.join(name)
    }
}
