//! Command handler implementation.

use std::sync::Arc;

use regex::RegexBuilder;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::texts::{fill, Lang, Msg};
use super::types::{BotCommand, CommandResult};
use crate::config::ClonerSettings;
use crate::scraper::{MonitorMessage, ScrapeMode, Scraper};
use crate::storage::{
    ButtonMode, ButtonRule, ButtonSpec, ChannelPair, Database, LinkRule, StorageError,
    DEFAULT_LANG,
};
use crate::telegram::{ChatRef, TelegramApi};

/// Longest pattern or replacement echoed back in replies.
const ECHO_LIMIT: usize = 100;

/// Executes admin commands against the store and the scraper.
pub struct CommandHandler<T: TelegramApi> {
    /// Command prefix (e.g. "/").
    prefix: String,

    /// N used by `/latest` and `/first` without a count.
    default_count: usize,

    scraper: Arc<Scraper<T>>,

    /// Channel to the realtime monitor.
    monitor: mpsc::UnboundedSender<MonitorMessage>,
}

impl<T: TelegramApi> CommandHandler<T> {
    #[must_use]
    pub fn new(
        scraper: Arc<Scraper<T>>,
        monitor: mpsc::UnboundedSender<MonitorMessage>,
        settings: &ClonerSettings,
    ) -> Self {
        Self {
            prefix: settings.command_prefix.clone(),
            default_count: settings.default_scrape_count,
            scraper,
            monitor,
        }
    }

    fn db(&self) -> &Database {
        self.scraper.pipeline().db()
    }

    /// Tries to parse and execute a command sent by `user_id`.
    ///
    /// Returns `None` if the message is not a command.
    pub async fn try_handle(&self, user_id: i64, message_text: &str) -> Option<CommandResult> {
        let parsed = BotCommand::parse(message_text, &self.prefix)?;
        let lang = self.lang(user_id).await;

        let result = match parsed {
            Ok(command) => {
                debug!("Handling command: {}", command);
                self.execute(user_id, lang, command).await
            }
            Err(e) => {
                debug!("Rejected command: {}", e);
                CommandResult::error(lang.usage(e.command))
            }
        };
        info!("Command result: success={}", result.success);

        Some(result)
    }

    async fn lang(&self, user_id: i64) -> Lang {
        match self.db().user_lang(user_id).await {
            Ok(code) => Lang::from_stored(&code),
            Err(e) => {
                warn!("Failed to load language of {}: {}", user_id, e);
                Lang::from_stored(DEFAULT_LANG)
            }
        }
    }

    /// Executes a parsed command. Storage failures become an error reply.
    async fn execute(&self, user_id: i64, lang: Lang, command: BotCommand) -> CommandResult {
        let name = command.name();
        let result = match command {
            BotCommand::Start => Ok(CommandResult::success(lang.text(Msg::Welcome))),
            BotCommand::Help => Ok(CommandResult::success(lang.text(Msg::Help))),
            BotCommand::AddPair { donor, target } => self.handle_add_pair(lang, &donor, &target).await,
            BotCommand::RemovePair(id) => self.handle_remove_pair(lang, id).await,
            BotCommand::Pairs => self.handle_pairs(lang).await,
            BotCommand::Stats => self.handle_stats(lang).await,
            BotCommand::AddRule {
                pattern,
                replacement,
            } => self.handle_add_rule(lang, &pattern, &replacement).await,
            BotCommand::RemoveRule(id) => self.handle_remove_rule(lang, id).await,
            BotCommand::RemoveRulePattern(pattern) => {
                self.handle_remove_rule_pattern(lang, &pattern).await
            }
            BotCommand::Rules => self.handle_rules(lang).await,
            BotCommand::SetButtons(buttons) => self.handle_set_buttons(lang, buttons).await,
            BotCommand::RemoveButtons => self.handle_remove_buttons(lang).await,
            BotCommand::Latest { pair_id, count } => {
                let n = count.unwrap_or(self.default_count);
                self.handle_scrape(lang, pair_id, ScrapeMode::Latest(n)).await
            }
            BotCommand::First { pair_id, count } => {
                let n = count.unwrap_or(self.default_count);
                self.handle_scrape(lang, pair_id, ScrapeMode::First(n)).await
            }
            BotCommand::Full(pair_id) => self.handle_scrape(lang, pair_id, ScrapeMode::Full).await,
            BotCommand::Realtime { pair_id, enabled } => {
                self.handle_realtime(lang, pair_id, enabled).await
            }
            BotCommand::Reset(pair_id) => self.handle_reset(lang, pair_id).await,
            BotCommand::ClearDb { include_rules } => self.handle_clear_db(lang, include_rules).await,
            BotCommand::SetLang(new_lang) => self.handle_set_lang(user_id, new_lang).await,
        };

        result.unwrap_or_else(|e| {
            error!("Command {} failed: {}", name, e);
            CommandResult::error(fill(lang.text(Msg::GenericError), &[("error", &e)]))
        })
    }

    async fn handle_add_pair(
        &self,
        lang: Lang,
        donor: &str,
        target: &str,
    ) -> Result<CommandResult, StorageError> {
        let (Some(donor_ref), Some(target_ref)) = (ChatRef::parse(donor), ChatRef::parse(target))
        else {
            return Ok(CommandResult::error(lang.usage("addpair")));
        };

        let mut replies = Vec::new();
        let donor = match self.scraper.pipeline().api().resolve_donor(&donor_ref.canonical()).await {
            Ok(chat) => {
                debug!("Donor {} resolved to {} ({})", donor, chat.ledger_key(), chat.title);
                chat.ledger_key()
            }
            Err(e) => {
                warn!("Could not resolve donor {}: {}", donor, e);
                replies.push(fill(lang.text(Msg::PairResolveWarn), &[("error", &e)]));
                donor_ref.canonical()
            }
        };
        let target = target_ref.canonical();

        let id = self.db().add_pair(&donor, &target).await?;
        replies.push(fill(
            lang.text(Msg::PairAdded),
            &[("id", &id), ("donor", &donor), ("target", &target)],
        ));
        Ok(CommandResult::success(replies.join("\n\n")))
    }

    async fn handle_remove_pair(&self, lang: Lang, id: i64) -> Result<CommandResult, StorageError> {
        let Some(pair) = self.db().remove_pair(id).await? else {
            return Ok(not_found(lang, id));
        };
        self.forget(pair.donor_channel);
        Ok(CommandResult::success(fill(lang.text(Msg::PairRemoved), &[("id", &id)])))
    }

    async fn handle_pairs(&self, lang: Lang) -> Result<CommandResult, StorageError> {
        let pairs = self.db().list_pairs().await?;
        if pairs.is_empty() {
            return Ok(CommandResult::success(lang.text(Msg::NoPairs)));
        }

        let mut lines = vec![lang.text(Msg::PairsTitle).to_owned()];
        for pair in &pairs {
            let realtime = lang.text(if pair.realtime_enabled { Msg::On } else { Msg::Off });
            lines.push(fill(
                lang.text(Msg::PairLine),
                &[
                    ("id", &pair.id),
                    ("donor", &pair.donor_channel),
                    ("target", &pair.target_channel),
                    ("realtime", &realtime),
                ],
            ));
        }
        Ok(CommandResult::success(lines.join("\n")))
    }

    async fn handle_stats(&self, lang: Lang) -> Result<CommandResult, StorageError> {
        let stats = self.db().statistics().await?;
        if stats.is_empty() {
            return Ok(CommandResult::success(lang.text(Msg::NoPairs)));
        }

        let mut lines = vec![lang.text(Msg::StatsTitle).to_owned()];
        for entry in &stats {
            let last = entry.last_cloned_at.map_or_else(
                || lang.text(Msg::Never).to_owned(),
                |at| at.format("%Y-%m-%d %H:%M UTC").to_string(),
            );
            lines.push(fill(
                lang.text(Msg::StatsLine),
                &[
                    ("id", &entry.pair_id),
                    ("donor", &entry.donor_channel),
                    ("target", &entry.target_channel),
                    ("posts", &entry.posts_cloned),
                    ("last", &last),
                ],
            ));
        }
        let total: i64 = stats.iter().map(|s| s.posts_cloned).sum();
        lines.push(String::new());
        lines.push(fill(lang.text(Msg::StatsTotal), &[("total", &total)]));
        Ok(CommandResult::success(lines.join("\n")))
    }

    async fn handle_add_rule(
        &self,
        lang: Lang,
        pattern: &str,
        replacement: &str,
    ) -> Result<CommandResult, StorageError> {
        let mut replies = Vec::new();
        if let Some(body) = LinkRule::new(0, pattern, replacement).regex_body() {
            if let Err(e) = RegexBuilder::new(body).case_insensitive(true).build() {
                replies.push(fill(lang.text(Msg::RegexInvalid), &[("error", &e)]));
            }
        }

        let id = self.db().add_link_rule(pattern, replacement).await?;
        let shown_replacement = if replacement.is_empty() {
            lang.text(Msg::EmptyReplacement).to_owned()
        } else {
            truncate(replacement, ECHO_LIMIT)
        };
        replies.insert(
            0,
            fill(
                lang.text(Msg::RuleAdded),
                &[
                    ("id", &id),
                    ("pattern", &truncate(pattern, ECHO_LIMIT)),
                    ("replacement", &shown_replacement),
                ],
            ),
        );
        Ok(CommandResult::success(replies.join("\n\n")))
    }

    async fn handle_remove_rule(&self, lang: Lang, id: i64) -> Result<CommandResult, StorageError> {
        if self.db().remove_link_rule(id).await? {
            Ok(CommandResult::success(fill(lang.text(Msg::RuleRemoved), &[("id", &id)])))
        } else {
            Ok(CommandResult::error(fill(lang.text(Msg::RuleNotFound), &[("id", &id)])))
        }
    }

    async fn handle_remove_rule_pattern(
        &self,
        lang: Lang,
        pattern: &str,
    ) -> Result<CommandResult, StorageError> {
        let count = self.db().remove_link_rules_by_pattern(pattern).await?;
        Ok(CommandResult::success(fill(
            lang.text(Msg::RulesRemovedByPattern),
            &[("pattern", &pattern), ("count", &count)],
        )))
    }

    async fn handle_rules(&self, lang: Lang) -> Result<CommandResult, StorageError> {
        let rules = self.db().link_rules().await?;
        let mut lines = vec![lang.text(Msg::RulesTitle).to_owned()];
        if rules.is_empty() {
            lines.push(lang.text(Msg::NoRules).to_owned());
        }
        for rule in &rules {
            let replacement = if rule.replacement.is_empty() {
                lang.text(Msg::EmptyReplacement).to_owned()
            } else {
                truncate(&rule.replacement, ECHO_LIMIT)
            };
            lines.push(format!(
                "#{}: {} → {}",
                rule.id,
                truncate(&rule.pattern, ECHO_LIMIT),
                replacement
            ));
        }

        lines.push(String::new());
        match self.db().button_rule().await? {
            Some(rule) => {
                lines.push(fill(lang.text(Msg::ButtonsTitle), &[("mode", &rule.mode)]));
                for (i, button) in rule.buttons.iter().enumerate() {
                    lines.push(format!("{}. {} → {}", i + 1, button.text, button.url));
                }
            }
            None => lines.push(lang.text(Msg::NoButtons).to_owned()),
        }
        Ok(CommandResult::success(lines.join("\n")))
    }

    async fn handle_set_buttons(
        &self,
        lang: Lang,
        buttons: Vec<ButtonSpec>,
    ) -> Result<CommandResult, StorageError> {
        let Some(mode) = ButtonMode::for_count(buttons.len()) else {
            return Ok(CommandResult::error(lang.usage("addbtn1")));
        };
        self.db().set_button_rule(&ButtonRule { mode, buttons }).await?;
        Ok(CommandResult::success(lang.text(Msg::ButtonsSet)))
    }

    async fn handle_remove_buttons(&self, lang: Lang) -> Result<CommandResult, StorageError> {
        self.db().clear_button_rule().await?;
        Ok(CommandResult::success(lang.text(Msg::ButtonsRemoved)))
    }

    async fn handle_scrape(
        &self,
        lang: Lang,
        pair_id: i64,
        mode: ScrapeMode,
    ) -> Result<CommandResult, StorageError> {
        let Some(pair) = self.db().get_pair(pair_id).await? else {
            return Ok(not_found(lang, pair_id));
        };

        let reply = match mode {
            ScrapeMode::Latest(n) => fill(
                lang.text(Msg::ScrapeLatestStarted),
                &[("n", &n), ("id", &pair_id)],
            ),
            ScrapeMode::First(n) => fill(
                lang.text(Msg::ScrapeFirstStarted),
                &[("n", &n), ("id", &pair_id)],
            ),
            ScrapeMode::Full => fill(lang.text(Msg::ScrapeFullStarted), &[("id", &pair_id)]),
        };
        self.spawn_scrape(pair, mode);
        Ok(CommandResult::success(reply))
    }

    /// Runs a manual scrape in the background. Scrapes may overlap each
    /// other and the realtime monitor.
    fn spawn_scrape(&self, pair: ChannelPair, mode: ScrapeMode) {
        let scraper = Arc::clone(&self.scraper);
        tokio::spawn(async move {
            match scraper.scrape(&pair, mode).await {
                Ok(report) => info!("Pair {} ({}): {}", pair.id, mode, report),
                Err(e) => error!("Pair {} ({}) scrape failed: {}", pair.id, mode, e),
            }
        });
    }

    async fn handle_realtime(
        &self,
        lang: Lang,
        pair_id: i64,
        enabled: Option<bool>,
    ) -> Result<CommandResult, StorageError> {
        let Some(pair) = self.db().get_pair(pair_id).await? else {
            return Ok(not_found(lang, pair_id));
        };

        let enabled = enabled.unwrap_or(!pair.realtime_enabled);
        self.db().set_realtime(pair_id, enabled).await?;
        let msg = if enabled { Msg::RealtimeOn } else { Msg::RealtimeOff };
        Ok(CommandResult::success(fill(lang.text(msg), &[("id", &pair_id)])))
    }

    async fn handle_reset(&self, lang: Lang, pair_id: i64) -> Result<CommandResult, StorageError> {
        match self.db().reset_progress(pair_id).await {
            Ok(donor) => {
                self.forget(donor);
                Ok(CommandResult::success(fill(lang.text(Msg::ResetDone), &[("id", &pair_id)])))
            }
            Err(StorageError::PairNotFound(_)) => Ok(not_found(lang, pair_id)),
            Err(e) => Err(e),
        }
    }

    async fn handle_clear_db(
        &self,
        lang: Lang,
        include_rules: bool,
    ) -> Result<CommandResult, StorageError> {
        let pairs = self.db().list_pairs().await?;
        self.db().clear_data(include_rules).await?;
        for pair in pairs {
            self.forget(pair.donor_channel);
        }

        let msg = if include_rules { Msg::ClearDoneAll } else { Msg::ClearDone };
        Ok(CommandResult::success(lang.text(msg)))
    }

    async fn handle_set_lang(&self, user_id: i64, lang: Lang) -> Result<CommandResult, StorageError> {
        self.db().set_user_lang(user_id, lang.code()).await?;
        Ok(CommandResult::success(lang.text(Msg::LangSet)))
    }

    /// Drops the monitor's mark for `channel`.
    fn forget(&self, channel: String) {
        if self.monitor.send(MonitorMessage::Forget(channel)).is_err() {
            warn!("Realtime monitor is not running");
        }
    }
}

fn not_found(lang: Lang, pair_id: i64) -> CommandResult {
    CommandResult::error(fill(lang.text(Msg::PairNotFound), &[("id", &pair_id)]))
}

/// Truncates a string to `max_len` characters, appending "..." if cut.
fn truncate(s: &str, max_len: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", chars[..max_len].iter().collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cloner::ClonePipeline;
    use crate::storage::test_support::temp_db;
    use crate::testing::{text, FakeTelegram};

    const ADMIN: i64 = 42;

    struct Harness {
        handler: CommandHandler<FakeTelegram>,
        api: Arc<FakeTelegram>,
        db: Database,
        monitor_rx: mpsc::UnboundedReceiver<MonitorMessage>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        async fn new() -> Self {
            let (db, dir) = temp_db().await;
            let settings = ClonerSettings {
                download_dir: dir.path().join("media"),
                album_grace_ms: 0,
                ..ClonerSettings::default()
            };
            let api = Arc::new(FakeTelegram::new().with_channel("@donor", -1_001));
            let pipeline = Arc::new(ClonePipeline::new(Arc::clone(&api), db.clone(), &settings));
            let scraper = Arc::new(Scraper::new(pipeline, &settings));
            let (tx, monitor_rx) = mpsc::unbounded_channel();
            Self {
                handler: CommandHandler::new(scraper, tx, &settings),
                api,
                db,
                monitor_rx,
                _dir: dir,
            }
        }

        async fn run(&self, text: &str) -> CommandResult {
            self.handler
                .try_handle(ADMIN, text)
                .await
                .expect("not recognised as a command")
        }

        async fn wait_for_sends(&self, count: usize) {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            while self.api.sent().len() < count && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Hello", 10), "Hello");
        assert_eq!(truncate("Hello, World!", 5), "Hello...");
        assert_eq!(truncate("Привет", 6), "Привет");
    }

    #[tokio::test]
    async fn test_non_commands_are_ignored() {
        let h = Harness::new().await;
        assert!(h.handler.try_handle(ADMIN, "just chatting").await.is_none());
    }

    #[tokio::test]
    async fn test_usage_reply_in_user_language() {
        let h = Harness::new().await;
        let result = h.run("/removepair x").await;
        assert!(!result.success);
        assert!(result.message.starts_with("Использование"));

        assert!(h.run("/lang en").await.success);
        let result = h.run("/removepair x").await;
        assert_eq!(result.message, "Usage: /removepair <pair_id>");
    }

    #[tokio::test]
    async fn test_add_pair_normalises_references() {
        let h = Harness::new().await;
        let result = h.run("/addpair https://t.me/donor \u{2212}1009876").await;
        assert!(result.success, "{}", result.message);

        let pairs = h.db.list_pairs().await.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].donor_channel, "@donor");
        assert_eq!(pairs[0].target_channel, "-1009876");
    }

    #[tokio::test]
    async fn test_add_pair_keeps_unresolved_donor() {
        let h = Harness::new().await;
        let result = h.run("/addpair unknown @target").await;
        assert!(result.success);
        assert!(result.message.contains("⚠️"));
        assert_eq!(h.db.list_pairs().await.unwrap()[0].donor_channel, "@unknown");
    }

    #[tokio::test]
    async fn test_remove_pair_forgets_monitor_mark() {
        let mut h = Harness::new().await;
        let id = h.db.add_pair("@donor", "@target").await.unwrap();

        assert!(h.run(&format!("/removepair {id}")).await.success);
        assert_eq!(
            h.monitor_rx.recv().await,
            Some(MonitorMessage::Forget("@donor".to_owned()))
        );
        assert!(!h.run(&format!("/removepair {id}")).await.success);
    }

    #[tokio::test]
    async fn test_pairs_and_realtime_toggle() {
        let h = Harness::new().await;
        assert_eq!(h.run("/pairs").await.message, "Нет настроенных пар каналов.");

        let id = h.db.add_pair("@donor", "@target").await.unwrap();
        assert!(h.run(&format!("/realtime {id}")).await.success);
        assert!(!h.db.get_pair(id).await.unwrap().unwrap().realtime_enabled);
        assert!(h.run(&format!("/realtime {id} on")).await.success);
        assert!(h.db.get_pair(id).await.unwrap().unwrap().realtime_enabled);

        h.run("/lang en").await;
        let listing = h.run("/pairs").await.message;
        assert!(listing.contains(&format!("#{id}: @donor → @target (realtime: on)")));
        assert!(!h.run("/realtime 999 on").await.success);
    }

    #[tokio::test]
    async fn test_rule_commands() {
        let h = Harness::new().await;
        h.run("/lang en").await;

        let added = h.run("/addrule Favbet [Partner](https://example.com)").await;
        assert!(added.success);
        assert!(added.message.contains("Pattern: Favbet"));

        let bad_regex = h.run("/addrule regex:(unclosed").await;
        assert!(bad_regex.success);
        assert!(bad_regex.message.contains("does not compile"));
        assert!(bad_regex.message.contains("(empty/remove)"));

        let rules = h.db.link_rules().await.unwrap();
        assert_eq!(rules.len(), 2);

        let listing = h.run("/rules").await.message;
        assert!(listing.contains("Favbet → [Partner](https://example.com)"));
        assert!(listing.contains("No buttons configured."));

        assert!(h.run(&format!("/removerule {}", rules[0].id)).await.success);
        assert!(!h.run(&format!("/removerule {}", rules[0].id)).await.success);
        let removed = h.run("/removerulepat regex:(unclosed").await;
        assert!(removed.message.ends_with(": 1"));
        assert!(h.db.link_rules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_button_commands() {
        let h = Harness::new().await;
        assert!(h.run("/addbtn2 A|https://a || B|https://b").await.success);

        let rule = h.db.button_rule().await.unwrap().unwrap();
        assert_eq!(rule.mode, ButtonMode::Two);
        assert_eq!(rule.buttons[1], ButtonSpec::new("B", "https://b"));

        assert!(h.run("/removebtn").await.success);
        assert!(h.db.button_rule().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_runs_in_background() {
        let h = Harness::new().await;
        let id = h.db.add_pair("@donor", "@target").await.unwrap();
        h.api.push_all("@donor", (1..=5).map(|i| text(i, &format!("post {i}"))));

        h.run("/lang en").await;
        let started = h.run(&format!("/latest {id} 2")).await;
        assert_eq!(started.message, format!("Started scraping the 2 newest posts of pair {id}."));

        h.wait_for_sends(2).await;
        assert_eq!(h.api.sent_texts(), vec!["post 4", "post 5"]);
        assert!(!h.run("/full 999").await.success);
    }

    #[tokio::test]
    async fn test_stats_and_reset() {
        let mut h = Harness::new().await;
        let id = h.db.add_pair("@donor", "@target").await.unwrap();
        h.db.mark_processed("@donor", 1).await.unwrap();
        h.db.increment_stats(id).await.unwrap();

        h.run("/lang en").await;
        let stats = h.run("/stats").await.message;
        assert!(stats.contains("@donor → @target: 1 posts"));
        assert!(stats.ends_with("Total posts: 1"));

        assert!(h.run(&format!("/reset {id}")).await.success);
        assert!(!h.db.is_processed("@donor", 1).await.unwrap());
        assert_eq!(
            h.monitor_rx.recv().await,
            Some(MonitorMessage::Forget("@donor".to_owned()))
        );
        assert!(!h.run("/reset 999").await.success);
    }

    #[tokio::test]
    async fn test_cleardb() {
        let mut h = Harness::new().await;
        h.db.add_pair("@donor", "@target").await.unwrap();
        h.db.add_link_rule("a", "b").await.unwrap();

        assert!(h.run("/cleardb").await.success);
        assert!(h.db.list_pairs().await.unwrap().is_empty());
        assert_eq!(h.db.link_rules().await.unwrap().len(), 1);
        assert!(h.monitor_rx.recv().await.is_some());

        assert!(h.run("/cleardb all").await.success);
        assert!(h.db.link_rules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleardb_does_not_wait_for_monitor() {
        let mut h = Harness::new().await;
        for n in 0..40 {
            h.db.add_pair(&format!("@donor{n}"), "@target").await.unwrap();
        }

        let result = tokio::time::timeout(Duration::from_secs(5), h.run("/cleardb")).await;
        assert!(result.unwrap().success);

        let mut forgotten = 0;
        while let Ok(MonitorMessage::Forget(_)) = h.monitor_rx.try_recv() {
            forgotten += 1;
        }
        assert_eq!(forgotten, 40);
    }
}
