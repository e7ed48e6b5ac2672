//! Maintenance tool for the challenge bot.
//!
//! Inspects and clears stored submissions and checks that the encoder
//! binary can be launched, without connecting to Telegram.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use day_challenge_bot::config::BotSettings;
use day_challenge_bot::media::Encoder;
use day_challenge_bot::storage::VideoStore;

/// Challenge bot maintenance tool.
#[derive(Parser, Debug)]
#[command(name = "challenge_admin")]
#[command(about = "Inspect stored challenge videos and check the encoder")]
#[command(version)]
struct Args {
    /// Path to the submission database (defaults to DATABASE_PATH or users.db).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    #[command(subcommand)]
    command: AdminCommand,
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    /// List a user's stored videos in day order.
    List {
        /// Telegram user id.
        #[arg(short, long)]
        user: i64,
    },

    /// Delete all of a user's stored videos.
    Clear {
        /// Telegram user id.
        #[arg(short, long)]
        user: i64,
    },

    /// Check that the encoder binary runs.
    CheckFfmpeg,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        eprintln!("Note: could not load {} ({e}), using the process environment", args.env_file);
    }

    let mut settings = match BotSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("✗ Invalid settings: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(database) = args.database {
        settings.database_path = database;
    }

    match args.command {
        AdminCommand::List { user } => list(&settings, user).await,
        AdminCommand::Clear { user } => clear(&settings, user).await,
        AdminCommand::CheckFfmpeg => check_ffmpeg(&settings).await,
    }
}

async fn open_store(settings: &BotSettings) -> Option<VideoStore> {
    match VideoStore::open(&settings.database_path).await {
        Ok(store) => Some(store),
        Err(e) => {
            eprintln!("✗ Failed to open {}: {e}", settings.database_path.display());
            None
        }
    }
}

async fn list(settings: &BotSettings, user: i64) -> ExitCode {
    let Some(store) = open_store(settings).await else {
        return ExitCode::FAILURE;
    };

    let submissions = match store.list_for_user(user).await {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("✗ Failed to read submissions: {e}");
            return ExitCode::FAILURE;
        }
    };

    if submissions.is_empty() {
        println!("No videos stored for user {user}");
        return ExitCode::SUCCESS;
    }

    println!("Videos for user {user}:");
    for submission in &submissions {
        let submitted = if submission.submitted_at.is_empty() {
            "unknown time"
        } else {
            submission.submitted_at.as_str()
        };
        println!(
            "  Day {:>3}  {}  {}",
            submission.day,
            submitted,
            truncate(&submission.file_id, 40)
        );
    }
    println!("\n{} video(s)", submissions.len());

    ExitCode::SUCCESS
}

async fn clear(settings: &BotSettings, user: i64) -> ExitCode {
    let Some(store) = open_store(settings).await else {
        return ExitCode::FAILURE;
    };

    match store.clear_user(user).await {
        Ok(removed) => {
            println!("✓ Removed {removed} video(s) for user {user}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Failed to clear submissions: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn check_ffmpeg(settings: &BotSettings) -> ExitCode {
    let encoder = Encoder::new(&settings.ffmpeg_path);

    match encoder.version().await {
        Ok(version) => {
            println!("✓ {version}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ {e}");
            ExitCode::FAILURE
        }
    }
}

/// Truncates a string for display.
fn truncate(s: &str, max_len: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", chars[..max_len].iter().collect::<String>())
    }
}
