//! Configuration module for the cloner.
//!
//! Handles loading of Telegram credentials from the environment and of
//! the scraping/sending tunables from an optional JSON file.

mod settings;

pub use settings::{ClonerSettings, ConfigError, TelegramConfig};
