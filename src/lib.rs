//! Day Challenge Bot Library
//!
//! A Telegram bot for a day-by-day video challenge.
//!
//! This crate provides the core functionality for:
//! - Loading configuration from the environment
//! - Connecting to Telegram via `MTProto` as a bot
//! - Storing one video per user and day in `SQLite`
//! - Assembling captioned one-second clips with `ffmpeg`

pub mod commands;
pub mod config;
pub mod media;
pub mod storage;
pub mod telegram;
