//! Telegram client wrapper module.
//!
//! Provides bot sign-in, the update stream, document downloads and
//! replies in the chat a message came from.

mod client;
mod file_ref;
mod incoming;

pub use client::{ChatReply, TelegramBot, TelegramError};
pub use file_ref::{FileRef, FileRefError};
pub use grammers_client::update::Update;
pub use incoming::incoming_from_raw;
