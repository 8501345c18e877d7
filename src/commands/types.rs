//! Admin command types and parsing.

use std::fmt;

use crate::storage::ButtonSpec;

use super::texts::Lang;

/// Admin commands understood by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// Greeting with a short overview.
    Start,

    /// Show the command list.
    Help,

    /// Register a donor → target pair.
    AddPair { donor: String, target: String },

    RemovePair(i64),

    /// List all pairs.
    Pairs,

    /// Show per-pair clone counters.
    Stats,

    /// Add a link rule. An empty replacement deletes matches.
    AddRule { pattern: String, replacement: String },

    RemoveRule(i64),

    /// Remove every rule with exactly this pattern.
    RemoveRulePattern(String),

    /// List link rules and the button rule.
    Rules,

    /// Replace the button rule. Holds one to three buttons.
    SetButtons(Vec<ButtonSpec>),

    RemoveButtons,

    /// Clone the newest messages of a pair.
    Latest { pair_id: i64, count: Option<usize> },

    /// Clone the oldest not yet cloned messages of a pair.
    First { pair_id: i64, count: Option<usize> },

    /// Clone a pair's whole history.
    Full(i64),

    /// Switch realtime monitoring; toggles when no state is given.
    Realtime { pair_id: i64, enabled: Option<bool> },

    /// Forget what was cloned for a pair.
    Reset(i64),

    /// Wipe pairs, statistics and the ledger (and rules with `all`).
    ClearDb { include_rules: bool },

    SetLang(Lang),
}

/// A known command with unusable arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageError {
    /// Command name without the prefix.
    pub command: &'static str,
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid arguments for {}", self.command)
    }
}

impl std::error::Error for UsageError {}

const fn usage(command: &'static str) -> UsageError {
    UsageError { command }
}

impl BotCommand {
    /// Parses a command from a message text.
    ///
    /// Returns `None` if the message is not a known command, and a
    /// [`UsageError`] if it is one but the arguments do not fit.
    #[must_use]
    pub fn parse(text: &str, prefix: &str) -> Option<Result<Self, UsageError>> {
        let after_prefix = text.trim().strip_prefix(prefix)?;

        let (cmd, args) = match after_prefix.split_once(char::is_whitespace) {
            Some((cmd, args)) => (cmd, args.trim()),
            None => (after_prefix, ""),
        };
        // Group chats address commands as `/cmd@botname`.
        let cmd = cmd.split_once('@').map_or(cmd, |(cmd, _)| cmd).to_lowercase();

        let parsed = match cmd.as_str() {
            "start" => Ok(Self::Start),
            "help" => Ok(Self::Help),
            "addpair" => Self::parse_add_pair(args),
            "removepair" => parse_id(args).map(Self::RemovePair).ok_or(usage("removepair")),
            "pairs" => Ok(Self::Pairs),
            "stats" => Ok(Self::Stats),
            "addrule" => Self::parse_add_rule(args),
            "removerule" => parse_id(args).map(Self::RemoveRule).ok_or(usage("removerule")),
            "removerulepat" if args.is_empty() => Err(usage("removerulepat")),
            "removerulepat" => Ok(Self::RemoveRulePattern(args.to_owned())),
            "rules" => Ok(Self::Rules),
            "addbtn1" => parse_buttons(args, 1).map(Self::SetButtons).ok_or(usage("addbtn1")),
            "addbtn2" => parse_buttons(args, 2).map(Self::SetButtons).ok_or(usage("addbtn2")),
            "addbtn3" => parse_buttons(args, 3).map(Self::SetButtons).ok_or(usage("addbtn3")),
            "removebtn" => Ok(Self::RemoveButtons),
            "latest" => parse_pair_and_count(args)
                .map(|(pair_id, count)| Self::Latest { pair_id, count })
                .ok_or(usage("latest")),
            "first" => parse_pair_and_count(args)
                .map(|(pair_id, count)| Self::First { pair_id, count })
                .ok_or(usage("first")),
            "full" => parse_id(args).map(Self::Full).ok_or(usage("full")),
            "realtime" => Self::parse_realtime(args),
            "reset" => parse_id(args).map(Self::Reset).ok_or(usage("reset")),
            "cleardb" => match args.to_lowercase().as_str() {
                "" => Ok(Self::ClearDb {
                    include_rules: false,
                }),
                "all" => Ok(Self::ClearDb {
                    include_rules: true,
                }),
                _ => Err(usage("cleardb")),
            },
            "lang" => Lang::from_code(args).map(Self::SetLang).ok_or(usage("lang")),
            _ => return None,
        };
        Some(parsed)
    }

    /// Parses `<donor> <target>`.
    fn parse_add_pair(args: &str) -> Result<Self, UsageError> {
        let mut parts = args.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(donor), Some(target), None) => Ok(Self::AddPair {
                donor: donor.to_owned(),
                target: target.to_owned(),
            }),
            _ => Err(usage("addpair")),
        }
    }

    /// Parses `<pattern> [replacement]`. The replacement may contain spaces.
    fn parse_add_rule(args: &str) -> Result<Self, UsageError> {
        let (pattern, replacement) = args
            .split_once(char::is_whitespace)
            .map_or((args, ""), |(p, r)| (p, r.trim()));
        if pattern.is_empty() {
            return Err(usage("addrule"));
        }
        Ok(Self::AddRule {
            pattern: pattern.to_owned(),
            replacement: replacement.to_owned(),
        })
    }

    /// Parses `<pair> [on|off]`.
    fn parse_realtime(args: &str) -> Result<Self, UsageError> {
        let mut parts = args.split_whitespace();
        let pair_id = parts.next().and_then(|id| id.parse().ok());
        let enabled = match parts.next().map(str::to_lowercase).as_deref() {
            None => None,
            Some("on" | "1" | "true") => Some(true),
            Some("off" | "0" | "false") => Some(false),
            Some(_) => return Err(usage("realtime")),
        };
        match (pair_id, parts.next()) {
            (Some(pair_id), None) => Ok(Self::Realtime { pair_id, enabled }),
            _ => Err(usage("realtime")),
        }
    }

    /// Returns the command name without the prefix.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::AddPair { .. } => "addpair",
            Self::RemovePair(_) => "removepair",
            Self::Pairs => "pairs",
            Self::Stats => "stats",
            Self::AddRule { .. } => "addrule",
            Self::RemoveRule(_) => "removerule",
            Self::RemoveRulePattern(_) => "removerulepat",
            Self::Rules => "rules",
            Self::SetButtons(_) => "addbtn",
            Self::RemoveButtons => "removebtn",
            Self::Latest { .. } => "latest",
            Self::First { .. } => "first",
            Self::Full(_) => "full",
            Self::Realtime { .. } => "realtime",
            Self::Reset(_) => "reset",
            Self::ClearDb { .. } => "cleardb",
            Self::SetLang(_) => "lang",
        }
    }
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddPair { donor, target } => write!(f, "addpair {donor} {target}"),
            Self::RemovePair(id) | Self::RemoveRule(id) | Self::Full(id) | Self::Reset(id) => {
                write!(f, "{} {id}", self.name())
            }
            Self::AddRule { pattern, .. } | Self::RemoveRulePattern(pattern) => {
                write!(f, "{} {pattern}", self.name())
            }
            Self::SetButtons(buttons) => write!(f, "addbtn{}", buttons.len()),
            Self::Latest { pair_id, count } | Self::First { pair_id, count } => match count {
                Some(n) => write!(f, "{} {pair_id} {n}", self.name()),
                None => write!(f, "{} {pair_id}", self.name()),
            },
            Self::Realtime { pair_id, .. } => write!(f, "realtime {pair_id}"),
            Self::ClearDb { include_rules: true } => f.write_str("cleardb all"),
            Self::SetLang(lang) => write!(f, "lang {}", lang.code()),
            _ => f.write_str(self.name()),
        }
    }
}

fn parse_id(args: &str) -> Option<i64> {
    let mut parts = args.split_whitespace();
    let id = parts.next()?.parse().ok()?;
    parts.next().is_none().then_some(id)
}

/// Parses `<pair> [n]`.
fn parse_pair_and_count(args: &str) -> Option<(i64, Option<usize>)> {
    let mut parts = args.split_whitespace();
    let pair_id = parts.next()?.parse().ok()?;
    let count = match parts.next() {
        Some(n) => Some(n.parse().ok()?),
        None => None,
    };
    parts.next().is_none().then_some((pair_id, count))
}

/// Parses exactly `count` buttons written as `text|url || text|url ...`.
fn parse_buttons(args: &str, count: usize) -> Option<Vec<ButtonSpec>> {
    let buttons = args
        .split("||")
        .map(|group| {
            let (text, url) = group.split_once('|')?;
            let (text, url) = (text.trim(), url.trim());
            (!text.is_empty() && !url.is_empty() && !url.contains('|'))
                .then(|| ButtonSpec::new(text, url))
        })
        .collect::<Option<Vec<_>>>()?;
    (buttons.len() == count).then_some(buttons)
}

/// Result of command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Whether the command was successful.
    pub success: bool,

    /// Response message to show the user.
    pub message: String,
}

impl CommandResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Creates an error result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "/";

    fn parse(text: &str) -> Option<Result<BotCommand, UsageError>> {
        BotCommand::parse(text, PREFIX)
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse("/start"), Some(Ok(BotCommand::Start)));
        assert_eq!(parse("  /HELP  "), Some(Ok(BotCommand::Help)));
        assert_eq!(parse("/pairs@cloner_bot"), Some(Ok(BotCommand::Pairs)));
        assert_eq!(parse("/removebtn"), Some(Ok(BotCommand::RemoveButtons)));
    }

    #[test]
    fn test_parse_not_a_command() {
        assert_eq!(parse("hello"), None);
        assert_eq!(parse("/unknown 1"), None);
        assert_eq!(BotCommand::parse("!pairs", PREFIX), None);
    }

    #[test]
    fn test_parse_add_pair() {
        assert_eq!(
            parse("/addpair @donor -1009876543210"),
            Some(Ok(BotCommand::AddPair {
                donor: "@donor".to_owned(),
                target: "-1009876543210".to_owned(),
            }))
        );
        assert_eq!(parse("/addpair @donor"), Some(Err(usage("addpair"))));
        assert_eq!(parse("/addpair a b c"), Some(Err(usage("addpair"))));
    }

    #[test]
    fn test_parse_add_rule() {
        assert_eq!(
            parse("/addrule Favbet [Our partner](https://example.com)"),
            Some(Ok(BotCommand::AddRule {
                pattern: "Favbet".to_owned(),
                replacement: "[Our partner](https://example.com)".to_owned(),
            }))
        );
        assert_eq!(
            parse("/addrule regex:(parik)\\d*"),
            Some(Ok(BotCommand::AddRule {
                pattern: "regex:(parik)\\d*".to_owned(),
                replacement: String::new(),
            }))
        );
        assert_eq!(parse("/addrule"), Some(Err(usage("addrule"))));
    }

    #[test]
    fn test_parse_rule_removal() {
        assert_eq!(parse("/removerule 4"), Some(Ok(BotCommand::RemoveRule(4))));
        assert_eq!(parse("/removerule four"), Some(Err(usage("removerule"))));
        assert_eq!(
            parse("/removerulepat regex:(a|b)"),
            Some(Ok(BotCommand::RemoveRulePattern("regex:(a|b)".to_owned())))
        );
        assert_eq!(parse("/removerulepat"), Some(Err(usage("removerulepat"))));
    }

    #[test]
    fn test_parse_buttons() {
        assert_eq!(
            parse("/addbtn1 Join | https://t.me/x"),
            Some(Ok(BotCommand::SetButtons(vec![ButtonSpec::new(
                "Join",
                "https://t.me/x"
            )])))
        );
        assert_eq!(
            parse("/addbtn2 A|https://a || B|https://b"),
            Some(Ok(BotCommand::SetButtons(vec![
                ButtonSpec::new("A", "https://a"),
                ButtonSpec::new("B", "https://b"),
            ])))
        );
        assert_eq!(
            parse("/addbtn3 A|https://a || B|https://b || C|https://c")
                .and_then(Result::ok)
                .map(|cmd| cmd.to_string()),
            Some("addbtn3".to_owned())
        );
        // Count must match the command.
        assert_eq!(parse("/addbtn2 A|https://a"), Some(Err(usage("addbtn2"))));
        assert_eq!(parse("/addbtn1 no url"), Some(Err(usage("addbtn1"))));
        assert_eq!(parse("/addbtn1 A|"), Some(Err(usage("addbtn1"))));
    }

    #[test]
    fn test_parse_scrape_commands() {
        assert_eq!(
            parse("/latest 3"),
            Some(Ok(BotCommand::Latest {
                pair_id: 3,
                count: None
            }))
        );
        assert_eq!(
            parse("/first 3 200"),
            Some(Ok(BotCommand::First {
                pair_id: 3,
                count: Some(200)
            }))
        );
        assert_eq!(parse("/full 2"), Some(Ok(BotCommand::Full(2))));
        assert_eq!(parse("/latest"), Some(Err(usage("latest"))));
        assert_eq!(parse("/first 1 -5"), Some(Err(usage("first"))));
        assert_eq!(parse("/reset 7"), Some(Ok(BotCommand::Reset(7))));
    }

    #[test]
    fn test_parse_realtime() {
        assert_eq!(
            parse("/realtime 1"),
            Some(Ok(BotCommand::Realtime {
                pair_id: 1,
                enabled: None
            }))
        );
        assert_eq!(
            parse("/realtime 1 OFF"),
            Some(Ok(BotCommand::Realtime {
                pair_id: 1,
                enabled: Some(false)
            }))
        );
        assert_eq!(parse("/realtime 1 maybe"), Some(Err(usage("realtime"))));
    }

    #[test]
    fn test_parse_cleardb_and_lang() {
        assert_eq!(
            parse("/cleardb"),
            Some(Ok(BotCommand::ClearDb {
                include_rules: false
            }))
        );
        assert_eq!(
            parse("/cleardb ALL"),
            Some(Ok(BotCommand::ClearDb {
                include_rules: true
            }))
        );
        assert_eq!(parse("/cleardb everything"), Some(Err(usage("cleardb"))));
        assert_eq!(parse("/lang en"), Some(Ok(BotCommand::SetLang(Lang::En))));
        assert_eq!(parse("/lang de"), Some(Err(usage("lang"))));
    }

    #[test]
    fn test_custom_prefix() {
        assert_eq!(
            BotCommand::parse("!stats", "!"),
            Some(Ok(BotCommand::Stats))
        );
    }
}
