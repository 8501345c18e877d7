//! SQLite persistence for pairs, statistics, rules, the dedup ledger and
//! user preferences.
//!
//! All operations hang off [`Database`]; each file adds one group of them.

mod database;
mod error;
mod ledger;
mod models;
mod pairs;
mod rules;
mod user_settings;

pub use database::Database;
pub use error::StorageError;
pub use models::{
    ButtonMode, ButtonRule, ButtonSpec, ChannelPair, LinkRule, PairStats, UserSettings,
};
pub use user_settings::DEFAULT_LANG;

#[cfg(test)]
pub(crate) use database::test_support;
