//! Content Cloner Library
//!
//! A Telegram bot that republishes posts from donor channels into target
//! channels. A user session reads the donors; a bot session publishes.
//!
//! This crate provides the core functionality for:
//! - Scraping donor history (latest N, first N, full) and realtime polling
//! - Reassembling albums and cloning posts with rewritten links and buttons
//! - Retrying sends through flood waits and unresolved peers
//! - Remembering what was cloned so nothing is posted twice
//! - Handling admin commands sent to the bot

pub mod cloner;
pub mod commands;
pub mod config;
pub mod rules;
pub mod scraper;
pub mod storage;
pub mod telegram;

#[cfg(test)]
mod testing;
