//! Persistence of challenge submissions.
//!
//! A single `SQLite` table holds one row per user and day.

mod videos;

pub use videos::{StorageError, Submission, VideoStore};
