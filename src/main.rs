//! Content Cloner - Main Entry Point
//!
//! Reads donor channels through a user session and republishes their posts
//! to target channels through a bot.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Input, Password};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use content_cloner::cloner::ClonePipeline;
use content_cloner::commands::CommandHandler;
use content_cloner::config::{ClonerSettings, TelegramConfig};
use content_cloner::scraper::{MonitorMessage, RealtimeMonitor, Scraper};
use content_cloner::storage::Database;
use content_cloner::telegram::{
    next_incoming_text, GrammersApi, IncomingText, TelegramError, TelegramSession,
};

/// Telegram bot that clones posts from donor channels.
#[derive(Parser, Debug)]
#[command(name = "content_cloner")]
#[command(about = "Clone posts from donor Telegram channels into target channels")]
#[command(version)]
struct Args {
    /// Path to the JSON settings file (optional; defaults apply when missing).
    #[arg(short, long, default_value = "cloner.json")]
    settings: String,

    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Generate an example settings file and exit.
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    // Handle example config generation
    if args.generate_config {
        return generate_example_config();
    }

    // Load environment variables
    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    // Load configurations
    let tg_config = TelegramConfig::from_env()
        .context("Failed to load Telegram configuration from environment")?;
    let settings = load_settings(&args.settings)?;

    if !tg_config.has_admin() {
        warn!("TG_ADMIN_ID is not set; admin commands will be ignored");
    }

    let db = Database::open(&settings.database_path)
        .await
        .with_context(|| format!("Failed to open database {}", settings.database_path.display()))?;

    // Connect the reading user session; its updates are not consumed
    let (user, _) = TelegramSession::connect(&tg_config.session_path, tg_config.api_id)
        .await
        .context("Failed to connect user session")?;
    if !user.is_authorized().await.context("Failed to check authorization")? {
        authenticate(&user, &tg_config).await?;
    }

    // Connect the publishing bot session
    let (bot, mut bot_updates) =
        TelegramSession::connect(&tg_config.bot_session_path, tg_config.api_id)
            .await
            .context("Failed to connect bot session")?;
    if !bot.is_authorized().await.context("Failed to check bot authorization")? {
        bot.bot_sign_in(&tg_config.bot_token, &tg_config.api_hash)
            .await
            .context("Bot sign-in failed")?;
    }

    let api = Arc::new(GrammersApi::new(&user, &bot));
    let pipeline = Arc::new(ClonePipeline::new(api, db, &settings));
    let scraper = Arc::new(Scraper::new(pipeline, &settings));

    // Create monitor channel
    let (monitor_tx, monitor_rx) = mpsc::unbounded_channel::<MonitorMessage>();

    let handler = CommandHandler::new(Arc::clone(&scraper), monitor_tx.clone(), &settings);
    let monitor = RealtimeMonitor::new(scraper, &settings);

    info!("Starting content cloner...");
    info!("Command prefix: {}", settings.command_prefix);

    // Spawn monitor task
    let monitor_handle = tokio::spawn(async move {
        monitor.run(monitor_rx).await;
    });

    info!("Cloner is running. Use Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            incoming = next_incoming_text(&mut bot_updates) => match incoming {
                Ok(Some(message)) => {
                    handle_incoming(&handler, &tg_config, &message).await;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Update stream failed: {}", e);
                    break;
                }
            },
        }
    }

    // Cleanup
    info!("Shutting down...");
    if monitor_tx.send(MonitorMessage::Shutdown).is_err() {
        debug!("Realtime monitor already stopped");
    }
    if let Err(e) = monitor_handle.await {
        warn!("Realtime monitor task failed: {}", e);
    }
    bot.disconnect();
    user.disconnect();

    Ok(())
}

/// Runs an admin command and replies with its result.
async fn handle_incoming(
    handler: &CommandHandler<GrammersApi>,
    config: &TelegramConfig,
    message: &IncomingText,
) {
    if !config.has_admin() || message.sender_id != config.admin_id {
        debug!("Ignoring message from non-admin {}", message.sender_id);
        return;
    }

    let Some(result) = handler.try_handle(message.sender_id, &message.text).await else {
        return;
    };
    if let Err(e) = message.reply(&result.message).await {
        warn!("Failed to reply to admin: {}", e);
    }
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Loads settings from `path` when it exists, then applies env overrides.
fn load_settings(path: &str) -> Result<ClonerSettings> {
    let settings = if Path::new(path).exists() {
        ClonerSettings::load_from_file(path)
            .with_context(|| format!("Failed to load settings from {path}"))?
    } else {
        debug!("No settings file at {}, using defaults", path);
        ClonerSettings::default()
    };
    Ok(settings.with_env_overrides())
}

/// Generates an example settings file.
fn generate_example_config() -> Result<()> {
    ClonerSettings::default().save_to_file("cloner.example.json")?;

    println!("✓ Example settings written to: cloner.example.json");
    println!("\nTo use this bot:");
    println!("1. Copy cloner.example.json to cloner.json and adjust it (optional)");
    println!("2. Create a .env file with TG_API_ID, TG_API_HASH, TG_BOT_TOKEN and TG_ADMIN_ID");
    println!("3. Add the bot as an admin of every target channel");
    println!("4. Run: content_cloner");

    Ok(())
}

/// Handles Telegram authentication of the user session.
async fn authenticate(session: &TelegramSession, config: &TelegramConfig) -> Result<()> {
    info!("Authentication required");

    let phone: String = Input::new()
        .with_prompt("Enter your phone number (with country code)")
        .interact_text()?;

    let token = session
        .request_login_code(&phone, &config.api_hash)
        .await
        .context("Failed to request login code")?;

    info!("Login code sent to your Telegram app");

    let code: String = Input::new()
        .with_prompt("Enter the login code")
        .interact_text()?;

    match session.sign_in(&token, &code).await {
        Ok(()) => {
            info!("Successfully signed in!");
            Ok(())
        }
        Err(TelegramError::PasswordRequired(password_token)) => {
            info!("Two-factor authentication is enabled");

            let hint = password_token.hint().unwrap_or("no hint");
            info!("Password hint: {}", hint);

            let password: String = Password::new()
                .with_prompt("Enter your 2FA password")
                .interact()?;

            session
                .check_password(password_token, &password)
                .await
                .context("2FA authentication failed")?;

            info!("Successfully signed in with 2FA!");
            Ok(())
        }
        Err(e) => Err(e).context("Authentication failed"),
    }
}
