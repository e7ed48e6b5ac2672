//! Day Challenge Bot - Main Entry Point
//!
//! A Telegram bot that collects one video per day and stitches
//! one-second captioned clips into a single video on `/finish`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use day_challenge_bot::commands::ChallengeHandler;
use day_challenge_bot::config::{BotSettings, TelegramConfig};
use day_challenge_bot::media::{Assembler, Encoder};
use day_challenge_bot::storage::VideoStore;
use day_challenge_bot::telegram::{ChatReply, TelegramBot, TelegramError, Update, incoming_from_raw};

/// Telegram bot for a day-by-day video challenge.
#[derive(Parser, Debug)]
#[command(name = "day_challenge_bot")]
#[command(about = "Collect daily videos and stitch them into one captioned clip")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Print the effective settings as JSON and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    // Load environment variables
    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    let settings = BotSettings::from_env().context("Invalid bot settings in environment")?;

    if args.print_config {
        return print_config(&settings);
    }

    let tg_config = TelegramConfig::from_env()
        .context("Failed to load Telegram configuration from environment")?;

    match settings.admin_id {
        Some(admin) => info!("Test mode restricted to user {}", admin),
        None => info!("Test mode open to everyone"),
    }

    let store = VideoStore::open(&settings.database_path)
        .await
        .context("Failed to open submission database")?;

    let encoder = Encoder::new(&settings.ffmpeg_path).with_font_file(settings.font_file.clone());
    match encoder.version().await {
        Ok(version) => info!("Using {}", version),
        Err(e) => warn!("Encoder check failed, /finish will not work: {}", e),
    }

    let assembler = Assembler::new(encoder, &settings.scratch_dir, settings.clip_seconds);
    let handler = ChallengeHandler::new(Arc::new(settings), store.clone(), assembler);

    // Connect to Telegram
    let bot = TelegramBot::connect(&tg_config)
        .await
        .context("Failed to connect to Telegram")?;

    if !bot.is_authorized().await.context("Failed to check authorization")? {
        bot.sign_in_bot(&tg_config.bot_token, &tg_config.api_hash)
            .await
            .context("Bot sign in failed")?;
    }

    if !bot.is_authorized().await.context("Failed to check authorization")? {
        return Err(TelegramError::NotAuthorized.into());
    }

    let mut updates = bot.take_updates().await?;

    info!("Bot is running. Use Ctrl+C to stop.");

    loop {
        let update = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            update = updates.next() => update,
        };

        let update = match update {
            Ok(update) => update,
            Err(e) => {
                error!("Update stream failed: {}", e);
                break;
            }
        };

        let Update::NewMessage(message) = update else {
            continue;
        };

        let Some(incoming) = incoming_from_raw(&message.raw) else {
            continue;
        };

        let reply = ChatReply::new(&bot, &message);
        if let Err(e) = handler.handle(&incoming, &reply, &bot).await {
            error!("Failed to handle message from user {}: {}", incoming.sender_id, e);
        }
    }

    // Cleanup
    info!("Shutting down...");
    store.close().await;
    bot.disconnect();

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Prints the effective settings without secrets.
fn print_config(settings: &BotSettings) -> Result<()> {
    let mut value = serde_json::to_value(settings)?;

    if let Ok(tg_config) = TelegramConfig::from_env() {
        value["telegram"] = serde_json::to_value(&tg_config)?;
    }

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
