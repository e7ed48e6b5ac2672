//! Command handling module.
//!
//! Dispatches `/start`, `/test` and `/finish`, stores submitted videos and
//! triggers assembly. Replies go out through the [`Replier`] trait.

mod handler;
mod types;

pub use handler::{ChallengeHandler, HandlerError};
pub use types::{BotCommand, IncomingMessage, Replier};
