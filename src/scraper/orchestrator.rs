//! Scrape modes over a donor's history.
//!
//! Every mode ends up in [`Scraper::process_batch`], which filters out
//! service messages and ledger hits, reassembles albums and hands each
//! unit to the clone pipeline. Anything handled (sent or deliberately
//! skipped) is recorded in the ledger under the pair's donor channel.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cloner::{CloneOutcome, ClonePipeline};
use crate::config::ClonerSettings;
use crate::storage::{ChannelPair, StorageError};
use crate::telegram::{ResolvedChat, SourceMessage, TelegramApi, TelegramError};

/// History page size.
pub const PAGE_SIZE: usize = 100;
/// Messages fetched per realtime check.
const REALTIME_FETCH: usize = 10;
/// History window searched for album siblings, centred on the anchor.
const ALBUM_WINDOW: usize = 20;
/// Ids above the anchor covered by the window.
const ALBUM_REACH: i32 = 10;

/// A manual scrape request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeMode {
    /// The newest N messages.
    Latest(usize),
    /// The N lowest-id eligible messages, sent oldest first. Albums are
    /// not included.
    First(usize),
    /// The whole history.
    Full,
}

impl fmt::Display for ScrapeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest(n) => write!(f, "latest {n}"),
            Self::First(n) => write!(f, "first {n}"),
            Self::Full => f.write_str("full history"),
        }
    }
}

/// Counters for one scrape pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeReport {
    pub examined: usize,
    pub cloned: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ScrapeReport {
    pub fn merge(&mut self, other: Self) {
        self.examined += other.examined;
        self.cloned += other.cloned;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

impl fmt::Display for ScrapeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "examined {}, cloned {}, skipped {}, failed {}",
            self.examined, self.cloned, self.skipped, self.failed
        )
    }
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Cannot resolve donor {donor}: {source}")]
    Resolve {
        donor: String,
        #[source]
        source: TelegramError,
    },

    #[error("Failed to read history of {donor}: {source}")]
    History {
        donor: String,
        #[source]
        source: TelegramError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Keeps the `cap` smallest-id messages offered to it.
struct OldestBuffer<M> {
    cap: usize,
    messages: BTreeMap<i32, SourceMessage<M>>,
}

impl<M> OldestBuffer<M> {
    fn new(cap: usize) -> Self {
        Self {
            cap,
            messages: BTreeMap::new(),
        }
    }

    fn offer(&mut self, message: SourceMessage<M>) {
        if self.cap == 0 {
            return;
        }
        self.messages.insert(message.id, message);
        if self.messages.len() > self.cap {
            self.messages.pop_last();
        }
    }

    fn into_ascending(self) -> Vec<SourceMessage<M>> {
        self.messages.into_values().collect()
    }
}

/// Runs scrape passes for channel pairs.
pub struct Scraper<T: TelegramApi> {
    pipeline: Arc<ClonePipeline<T>>,
    page_size: usize,
    album_grace: Duration,
}

impl<T: TelegramApi> Scraper<T> {
    #[must_use]
    pub fn new(pipeline: Arc<ClonePipeline<T>>, settings: &ClonerSettings) -> Self {
        Self {
            pipeline,
            page_size: PAGE_SIZE,
            album_grace: settings.album_grace(),
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, PAGE_SIZE);
        self
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<ClonePipeline<T>> {
        &self.pipeline
    }

    async fn resolve(&self, pair: &ChannelPair) -> Result<ResolvedChat<T::Peer>, ScrapeError> {
        self.pipeline
            .api()
            .resolve_donor(&pair.donor_channel)
            .await
            .map_err(|source| ScrapeError::Resolve {
                donor: pair.donor_channel.clone(),
                source,
            })
    }

    async fn history(
        &self,
        pair: &ChannelPair,
        chat: &ResolvedChat<T::Peer>,
        offset_id: i32,
        limit: usize,
    ) -> Result<Vec<SourceMessage<T::Media>>, ScrapeError> {
        self.pipeline
            .api()
            .history(chat, offset_id, limit)
            .await
            .map_err(|source| ScrapeError::History {
                donor: pair.donor_channel.clone(),
                source,
            })
    }

    /// Runs one manual scrape of `pair`.
    pub async fn scrape(
        &self,
        pair: &ChannelPair,
        mode: ScrapeMode,
    ) -> Result<ScrapeReport, ScrapeError> {
        info!("Starting {} scrape of {} -> {}", mode, pair.donor_channel, pair.target_channel);
        let chat = self.resolve(pair).await?;

        let report = match mode {
            ScrapeMode::Latest(n) => self.scrape_latest(pair, &chat, n).await?,
            ScrapeMode::First(n) => self.scrape_first(pair, &chat, n).await?,
            ScrapeMode::Full => self.scrape_full(pair, &chat).await?,
        };

        info!("Finished {} scrape of {}: {}", mode, pair.donor_channel, report);
        Ok(report)
    }

    async fn scrape_latest(
        &self,
        pair: &ChannelPair,
        chat: &ResolvedChat<T::Peer>,
        count: usize,
    ) -> Result<ScrapeReport, ScrapeError> {
        let mut collected = Vec::new();
        let mut offset_id = 0;

        while collected.len() < count {
            let limit = (count - collected.len()).min(self.page_size);
            let page = self.history(pair, chat, offset_id, limit).await?;
            let Some(oldest) = page.last() else {
                break;
            };
            offset_id = oldest.id;
            collected.extend(page);
        }

        collected.reverse();
        let mut handled = HashSet::new();
        self.process_batch(pair, chat, collected, &mut handled, false)
            .await
    }

    async fn scrape_first(
        &self,
        pair: &ChannelPair,
        chat: &ResolvedChat<T::Peer>,
        count: usize,
    ) -> Result<ScrapeReport, ScrapeError> {
        let db = self.pipeline.db();
        let mut buffer = OldestBuffer::new(count);
        let mut offset_id = 0;
        let mut pages = 0;

        loop {
            let page = self.history(pair, chat, offset_id, self.page_size).await?;
            let Some(oldest) = page.last() else {
                break;
            };
            offset_id = oldest.id;
            pages += 1;

            for message in page {
                if message.is_service || message.grouped_id.is_some() {
                    continue;
                }
                if db.is_processed(&pair.donor_channel, message.id).await? {
                    continue;
                }
                buffer.offer(message);
            }
        }

        debug!("Scanned {} history pages of {}", pages, pair.donor_channel);
        let mut handled = HashSet::new();
        self.process_batch(pair, chat, buffer.into_ascending(), &mut handled, false)
            .await
    }

    async fn scrape_full(
        &self,
        pair: &ChannelPair,
        chat: &ResolvedChat<T::Peer>,
    ) -> Result<ScrapeReport, ScrapeError> {
        let mut report = ScrapeReport::default();
        let mut handled = HashSet::new();
        let mut offset_id = 0;

        loop {
            let mut page = self.history(pair, chat, offset_id, self.page_size).await?;
            let Some(oldest) = page.last() else {
                break;
            };
            offset_id = oldest.id;
            page.reverse();

            let page_report = self
                .process_batch(pair, chat, page, &mut handled, false)
                .await?;
            debug!("Page below {} of {}: {}", offset_id, pair.donor_channel, page_report);
            report.merge(page_report);
        }
        Ok(report)
    }

    /// One realtime check of `pair`.
    ///
    /// Returns the pass report and the new high-water mark: the largest id
    /// seen, or `mark` if nothing newer arrived.
    pub async fn monitor_pair(
        &self,
        pair: &ChannelPair,
        mark: Option<i32>,
    ) -> Result<(ScrapeReport, Option<i32>), ScrapeError> {
        let chat = self.resolve(pair).await?;
        let recent = self.history(pair, &chat, 0, REALTIME_FETCH).await?;

        let newest = recent.iter().map(|m| m.id).max();
        let floor = mark.unwrap_or(0);
        let mut fresh: Vec<_> = recent.into_iter().filter(|m| m.id > floor).collect();
        fresh.reverse();

        let mut handled = HashSet::new();
        let report = self
            .process_batch(pair, &chat, fresh, &mut handled, true)
            .await?;
        Ok((report, newest.max(mark)))
    }

    /// Clones `messages` (ascending) that are neither service messages nor
    /// already in the ledger. `handled` carries ids dealt with earlier in the
    /// same pass so album siblings are sent once.
    async fn process_batch(
        &self,
        pair: &ChannelPair,
        chat: &ResolvedChat<T::Peer>,
        messages: Vec<SourceMessage<T::Media>>,
        handled: &mut HashSet<i32>,
        realtime: bool,
    ) -> Result<ScrapeReport, ScrapeError> {
        let db = self.pipeline.db();
        let donor = pair.donor_channel.as_str();
        let mut report = ScrapeReport::default();

        for message in messages {
            if !handled.insert(message.id) {
                continue;
            }
            if message.is_service {
                continue;
            }
            if db.is_processed(donor, message.id).await? {
                continue;
            }
            report.examined += 1;

            let Some(group) = message.grouped_id else {
                let result = self
                    .pipeline
                    .clone_message(&message, &pair.target_channel, pair.id)
                    .await;
                match result {
                    Ok(outcome) => {
                        db.mark_processed(donor, message.id).await?;
                        count(&mut report, &outcome);
                    }
                    Err(e) => {
                        error!("Failed to clone message {} from {}: {}", message.id, donor, e);
                        report.failed += 1;
                    }
                }
                continue;
            };

            if realtime && !self.album_grace.is_zero() {
                tokio::time::sleep(self.album_grace).await;
            }

            let anchor_id = message.id;
            let mut members = Vec::new();
            for member in self.gather_album(pair, chat, message, group).await {
                if member.is_service || (member.id != anchor_id && handled.contains(&member.id)) {
                    continue;
                }
                if db.is_processed(donor, member.id).await? {
                    continue;
                }
                members.push(member);
            }
            handled.extend(members.iter().map(|m| m.id));

            let ids: Vec<i32> = members.iter().map(|m| m.id).collect();
            debug!("Album {} from {} has members {:?}", group, donor, ids);
            match self
                .pipeline
                .clone_album(&members, &pair.target_channel, pair.id)
                .await
            {
                Ok(outcome) => {
                    for id in &ids {
                        db.mark_processed(donor, *id).await?;
                    }
                    count(&mut report, &outcome);
                }
                Err(e) => {
                    error!("Failed to clone album {:?} from {}: {}", ids, donor, e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Siblings of `anchor` in album `group`, ascending, the anchor
    /// included. Falls back to the anchor alone if the window cannot be read.
    async fn gather_album(
        &self,
        pair: &ChannelPair,
        chat: &ResolvedChat<T::Peer>,
        anchor: SourceMessage<T::Media>,
        group: i64,
    ) -> Vec<SourceMessage<T::Media>> {
        let offset_id = anchor.id.saturating_add(ALBUM_REACH + 1);

        let window = match self.history(pair, chat, offset_id, ALBUM_WINDOW + 1).await {
            Ok(window) => window,
            Err(e) => {
                warn!("Cannot collect album around message {}: {}", anchor.id, e);
                return vec![anchor];
            }
        };

        let mut by_id: BTreeMap<i32, SourceMessage<T::Media>> = window
            .into_iter()
            .filter(|m| m.grouped_id == Some(group))
            .map(|m| (m.id, m))
            .collect();
        by_id.insert(anchor.id, anchor);
        by_id.into_values().collect()
    }
}

fn count(report: &mut ScrapeReport, outcome: &CloneOutcome) {
    match outcome {
        CloneOutcome::Sent(_) => report.cloned += 1,
        CloneOutcome::Skipped(_) => report.skipped += 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_db;
    use crate::storage::Database;
    use crate::telegram::MessageKind;
    use crate::testing::{
        album_member, media, service, text, unsupported, FakeTelegram, Scripted, Sent,
    };

    struct Harness {
        api: Arc<FakeTelegram>,
        scraper: Scraper<FakeTelegram>,
        db: Database,
        pair: ChannelPair,
        _db_dir: tempfile::TempDir,
        _media_dir: tempfile::TempDir,
    }

    async fn harness(page_size: usize) -> Harness {
        harness_with_grace(page_size, 0).await
    }

    async fn harness_with_grace(page_size: usize, album_grace_ms: u64) -> Harness {
        let (db, db_dir) = temp_db().await;
        let media_dir = tempfile::tempdir().unwrap();
        let settings = ClonerSettings {
            download_dir: media_dir.path().to_path_buf(),
            album_grace_ms,
            ..ClonerSettings::default()
        };
        let api = Arc::new(FakeTelegram::new().with_channel("@donor", -1_001));
        let pair_id = db.add_pair("@donor", "@target").await.unwrap();
        let pair = db.get_pair(pair_id).await.unwrap().unwrap();
        let pipeline = Arc::new(ClonePipeline::new(Arc::clone(&api), db.clone(), &settings));

        Harness {
            api,
            scraper: Scraper::new(pipeline, &settings).with_page_size(page_size),
            db,
            pair,
            _db_dir: db_dir,
            _media_dir: media_dir,
        }
    }

    fn posts(ids: impl IntoIterator<Item = i32>) -> Vec<SourceMessage<String>> {
        ids.into_iter().map(|id| text(id, &format!("post {id}"))).collect()
    }

    fn texts(ids: impl IntoIterator<Item = i32>) -> Vec<String> {
        ids.into_iter().map(|id| format!("post {id}")).collect()
    }

    #[tokio::test]
    async fn test_latest_sends_newest_ascending_once() {
        let h = harness(3).await;
        h.api.push_all("@donor", posts(1..=30));

        let report = h.scraper.scrape(&h.pair, ScrapeMode::Latest(5)).await.unwrap();
        assert_eq!(report.cloned, 5);
        assert_eq!(h.api.sent_texts(), texts(26..=30));

        let again = h.scraper.scrape(&h.pair, ScrapeMode::Latest(5)).await.unwrap();
        assert_eq!(again.cloned, 0);
        assert_eq!(h.api.sent().len(), 5);
    }

    #[tokio::test]
    async fn test_latest_with_huge_count_stops_at_history_end() {
        let h = harness(3).await;
        h.api.push_all("@donor", posts(1..=5));

        let report = h.scraper.scrape(&h.pair, ScrapeMode::Latest(usize::MAX)).await.unwrap();
        assert_eq!(report.cloned, 5);
        assert_eq!(h.api.sent_texts(), texts(1..=5));
        assert_eq!(h.api.history_calls(), 3);
    }

    #[tokio::test]
    async fn test_first_sends_oldest_regardless_of_page_size() {
        for page_size in [7, 100] {
            let h = harness(page_size).await;
            h.api.push_all("@donor", posts(1..=100));

            h.scraper.scrape(&h.pair, ScrapeMode::First(10)).await.unwrap();
            assert_eq!(h.api.sent_texts(), texts(1..=10), "page size {page_size}");
        }
    }

    #[tokio::test]
    async fn test_first_skips_processed_albums_and_service() {
        let h = harness(4).await;
        h.api.push_all("@donor", posts(5..=12));
        h.api.push("@donor", service(1));
        h.api.push("@donor", album_member(2, 77, "a"));
        h.api.push("@donor", album_member(3, 77, ""));
        h.api.push("@donor", text(4, "already sent"));
        h.db.mark_processed("@donor", 4).await.unwrap();

        h.scraper.scrape(&h.pair, ScrapeMode::First(3)).await.unwrap();
        assert_eq!(h.api.sent_texts(), texts(5..=7));
    }

    #[tokio::test]
    async fn test_first_zero_sends_nothing() {
        let h = harness(10).await;
        h.api.push_all("@donor", posts(1..=5));
        let report = h.scraper.scrape(&h.pair, ScrapeMode::First(0)).await.unwrap();
        assert_eq!(report, ScrapeReport::default());
    }

    #[tokio::test]
    async fn test_full_visits_every_message_once() {
        let h = harness(7).await;
        h.api.push_all("@donor", posts(1..=25));

        let report = h.scraper.scrape(&h.pair, ScrapeMode::Full).await.unwrap();
        assert_eq!(report.cloned, 25);

        let mut sent = h.api.sent_texts();
        assert_eq!(sent.len(), 25);
        sent.sort_by_key(|t| t[5..].parse::<i32>().unwrap());
        assert_eq!(sent, texts(1..=25));
        assert_eq!(h.db.processed_count("@donor").await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_album_is_sent_as_one_group() {
        let h = harness(2).await;
        h.api.push("@donor", text(1, "post 1"));
        h.api.push("@donor", album_member(2, 55, ""));
        h.api.push("@donor", album_member(3, 55, "album caption"));
        h.api.push("@donor", album_member(4, 55, ""));
        h.api.push("@donor", text(5, "post 5"));

        let report = h.scraper.scrape(&h.pair, ScrapeMode::Full).await.unwrap();
        assert_eq!(report.cloned, 3);

        let albums: Vec<_> = h
            .api
            .sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Album { items, .. } => Some(items),
                _ => None,
            })
            .collect();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].len(), 3);
        for id in 1..=5 {
            assert!(h.db.is_processed("@donor", id).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_failed_album_is_not_marked_and_retried_next_pass() {
        let h = harness(10).await;
        h.api.push("@donor", album_member(1, 55, ""));
        h.api.push("@donor", album_member(2, 55, "album caption"));
        h.api.push("@donor", album_member(3, 55, ""));
        h.api.script([Scripted::Fatal("CHAT_WRITE_FORBIDDEN")]);

        let report = h.scraper.scrape(&h.pair, ScrapeMode::Full).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.cloned, 0);
        assert!(h.api.sent().is_empty());
        for id in 1..=3 {
            assert!(!h.db.is_processed("@donor", id).await.unwrap());
        }

        let retry = h.scraper.scrape(&h.pair, ScrapeMode::Full).await.unwrap();
        assert_eq!(retry.cloned, 1);
        assert!(matches!(&h.api.sent()[..], [Sent::Album { items, .. }] if items.len() == 3));
        for id in 1..=3 {
            assert!(h.db.is_processed("@donor", id).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_monitor_pair_waits_and_sends_new_album() {
        let h = harness_with_grace(10, 20).await;
        h.api.push("@donor", text(1, "post 1"));
        h.api.push("@donor", album_member(2, 9, ""));
        h.api.push("@donor", album_member(3, 9, "album caption"));
        h.api.push("@donor", text(4, "post 4"));

        let started = std::time::Instant::now();
        let (report, mark) = h.scraper.monitor_pair(&h.pair, Some(1)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(report.cloned, 2);
        assert_eq!(mark, Some(4));

        let sent = h.api.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(&sent[0], Sent::Album { items, .. } if items.len() == 2));
        assert_eq!(h.api.sent_texts(), texts([4]));
        assert!(!h.db.is_processed("@donor", 1).await.unwrap());
        for id in 2..=4 {
            assert!(h.db.is_processed("@donor", id).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_service_is_filtered_and_unsupported_is_marked() {
        let h = harness(10).await;
        h.api.push("@donor", service(1));
        h.api.push("@donor", unsupported(2));
        h.api.push("@donor", media(3, MessageKind::Photo, ""));

        let report = h.scraper.scrape(&h.pair, ScrapeMode::Latest(10)).await.unwrap();
        assert_eq!(report.cloned, 1);
        assert_eq!(report.skipped, 1);
        assert!(!h.db.is_processed("@donor", 1).await.unwrap());
        assert!(h.db.is_processed("@donor", 2).await.unwrap());
        assert!(h.db.is_processed("@donor", 3).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_message_is_not_marked_and_loop_continues() {
        let h = harness(10).await;
        h.api.push_all("@donor", posts(1..=3));
        h.api.script([Scripted::Pass, Scripted::Fatal("CHAT_WRITE_FORBIDDEN")]);

        let report = h.scraper.scrape(&h.pair, ScrapeMode::Latest(3)).await.unwrap();
        assert_eq!(report.cloned, 2);
        assert_eq!(report.failed, 1);
        assert!(!h.db.is_processed("@donor", 2).await.unwrap());
        assert_eq!(h.api.sent_texts(), vec!["post 1", "post 3"]);
    }

    #[tokio::test]
    async fn test_unknown_donor_fails_the_pass() {
        let h = harness(10).await;
        let mut pair = h.pair.clone();
        pair.donor_channel = "@missing".to_owned();

        let result = h.scraper.scrape(&pair, ScrapeMode::Full).await;
        assert!(matches!(result, Err(ScrapeError::Resolve { .. })));
    }

    #[tokio::test]
    async fn test_monitor_pair_only_sends_new_messages() {
        let h = harness(10).await;
        h.api.push_all("@donor", posts(1..=3));

        let (report, mark) = h.scraper.monitor_pair(&h.pair, Some(2)).await.unwrap();
        assert_eq!(report.cloned, 1);
        assert_eq!(mark, Some(3));
        assert_eq!(h.api.sent_texts(), texts([3]));

        h.api.push_all("@donor", posts(4..=5));
        h.db.mark_processed("@donor", 5).await.unwrap();
        let (report, mark) = h.scraper.monitor_pair(&h.pair, mark).await.unwrap();
        assert_eq!(report.cloned, 1);
        assert_eq!(mark, Some(5));
        assert_eq!(h.api.sent_texts(), texts([3, 4]));

        let (report, mark) = h.scraper.monitor_pair(&h.pair, mark).await.unwrap();
        assert_eq!(report, ScrapeReport::default());
        assert_eq!(mark, Some(5));
    }

    #[test]
    fn test_oldest_buffer_keeps_smallest_ids() {
        let mut buffer = OldestBuffer::new(3);
        for id in [50, 10, 40, 20, 30, 5] {
            buffer.offer(text(id, ""));
        }
        let ids: Vec<i32> = buffer.into_ascending().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![5, 10, 20]);
    }
}
