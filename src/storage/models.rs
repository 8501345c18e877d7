//! Persisted records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

/// A configured donor → target association.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ChannelPair {
    pub id: i64,
    pub donor_channel: String,
    pub target_channel: String,
    pub enabled: bool,
    pub realtime_enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Counters for one pair, joined with the pair's channels.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PairStats {
    pub pair_id: i64,
    pub donor_channel: String,
    pub target_channel: String,
    pub posts_cloned: i64,
    pub last_cloned_at: Option<DateTime<Utc>>,
}

/// A link/keyword replacement rule.
///
/// Patterns starting with [`LinkRule::REGEX_PREFIX`] are regular expressions,
/// everything else is matched literally. Both are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LinkRule {
    pub id: i64,
    pub pattern: String,
    pub replacement: String,
    pub enabled: bool,
}

impl LinkRule {
    pub const REGEX_PREFIX: &'static str = "regex:";

    /// Builds an enabled rule; used by tests and previews.
    #[must_use]
    pub fn new(id: i64, pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            id,
            pattern: pattern.into(),
            replacement: replacement.into(),
            enabled: true,
        }
    }

    /// Returns the regex body if this is a `regex:` rule.
    #[must_use]
    pub fn regex_body(&self) -> Option<&str> {
        self.pattern.strip_prefix(Self::REGEX_PREFIX)
    }
}

/// How many buttons the global button rule renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonMode {
    One,
    Two,
    Three,
}

impl ButtonMode {
    /// Maximum number of buttons rendered in this mode.
    #[must_use]
    pub const fn capacity(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    /// Mode that fits exactly `count` buttons.
    #[must_use]
    pub const fn for_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            3 => Some(Self::Three),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::One => "one",
            Self::Two => "two",
            Self::Three => "three",
        }
    }
}

impl fmt::Display for ButtonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ButtonMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "one" | "1" => Ok(Self::One),
            "two" | "2" => Ok(Self::Two),
            "three" | "3" => Ok(Self::Three),
            other => Err(other.to_owned()),
        }
    }
}

/// A single configured URL button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonSpec {
    pub text: String,
    pub url: String,
}

impl ButtonSpec {
    #[must_use]
    pub fn new(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: url.into(),
        }
    }
}

/// The global button configuration. At most one exists at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonRule {
    pub mode: ButtonMode,
    /// Up to three buttons in display order.
    pub buttons: Vec<ButtonSpec>,
}

/// Per-user UI preference.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UserSettings {
    pub user_id: i64,
    pub lang: String,
}
