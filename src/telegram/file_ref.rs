//! Stored references to Telegram documents.
//!
//! `MTProto` has no stable file id string, so a reference keeps everything
//! needed to download the document again, plus the message it came in for
//! refreshing an expired file reference.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use thiserror::Error;

const VERSION_TAG: &str = "v1";

/// Errors produced when parsing a stored reference.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FileRefError {
    #[error("Unsupported file reference format: '{0}'")]
    Format(String),

    #[error("Invalid number in file reference: '{0}'")]
    Number(String),

    #[error("Invalid file reference bytes: {0}")]
    Bytes(String),
}

/// Everything needed to download a document sent to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// Id of the message the document arrived in.
    pub message_id: i32,

    /// Document id.
    pub document_id: i64,

    /// Document access hash.
    pub access_hash: i64,

    /// Opaque, expiring file reference bytes.
    pub file_reference: Vec<u8>,
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{VERSION_TAG}:{}:{}:{}:{}",
            self.message_id,
            self.document_id,
            self.access_hash,
            URL_SAFE_NO_PAD.encode(&self.file_reference)
        )
    }
}

impl FromStr for FileRef {
    type Err = FileRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [tag, message_id, document_id, access_hash, reference] = parts.as_slice() else {
            return Err(FileRefError::Format(s.to_owned()));
        };
        if *tag != VERSION_TAG {
            return Err(FileRefError::Format(s.to_owned()));
        }

        Ok(Self {
            message_id: parse_number(message_id)?,
            document_id: parse_number(document_id)?,
            access_hash: parse_number(access_hash)?,
            file_reference: URL_SAFE_NO_PAD
                .decode(reference)
                .map_err(|e| FileRefError::Bytes(e.to_string()))?,
        })
    }
}

fn parse_number<T: FromStr>(raw: &str) -> Result<T, FileRefError> {
    raw.parse().map_err(|_| FileRefError::Number(raw.to_owned()))
}
