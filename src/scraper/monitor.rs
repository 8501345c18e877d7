//! Realtime monitor.
//!
//! Every poll interval all enabled realtime pairs are checked concurrently
//! and the loop waits for the slowest one. The monitor owns the
//! high-water marks; other tasks reach it only through [`MonitorMessage`].
//! It never stops on errors:
//! - no realtime pairs → sleep the idle interval
//! - a failed cycle (e.g. the database) → sleep the error backoff
//! - a failed pair → logged, the other pairs are unaffected

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use super::{HighWaterMarks, ScrapeError, Scraper};
use crate::config::ClonerSettings;
use crate::telegram::TelegramApi;

/// Messages that can be sent to the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorMessage {
    /// Drop the high-water mark of a donor channel.
    Forget(String),
    /// Stop the monitor.
    Shutdown,
}

pub struct RealtimeMonitor<T: TelegramApi> {
    scraper: Arc<Scraper<T>>,
    poll_interval: Duration,
    idle_interval: Duration,
    error_backoff: Duration,
}

impl<T: TelegramApi> RealtimeMonitor<T> {
    #[must_use]
    pub fn new(scraper: Arc<Scraper<T>>, settings: &ClonerSettings) -> Self {
        Self {
            scraper,
            poll_interval: settings.poll_interval(),
            idle_interval: settings.idle_interval(),
            error_backoff: settings.error_backoff(),
        }
    }

    /// Overrides the loop timing.
    #[must_use]
    pub const fn with_intervals(mut self, poll: Duration, idle: Duration, backoff: Duration) -> Self {
        self.poll_interval = poll;
        self.idle_interval = idle;
        self.error_backoff = backoff;
        self
    }

    /// Runs until [`MonitorMessage::Shutdown`] or the sender is dropped.
    pub async fn run(&self, mut rx: mpsc::UnboundedReceiver<MonitorMessage>) {
        info!(
            "Realtime monitor started (poll every {:?})",
            self.poll_interval
        );

        let mut marks = HighWaterMarks::new();
        let mut next_cycle = Instant::now();

        loop {
            tokio::select! {
                () = sleep_until(next_cycle) => {
                    let delay = match self.cycle(&mut marks).await {
                        Ok(0) => {
                            debug!("No realtime pairs, idling");
                            self.idle_interval
                        }
                        Ok(_) => self.poll_interval,
                        Err(e) => {
                            error!("Realtime cycle failed: {}", e);
                            self.error_backoff
                        }
                    };
                    next_cycle = Instant::now() + delay;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(MonitorMessage::Forget(channel)) => {
                            if let Some(mark) = marks.forget(&channel) {
                                debug!("Forgot mark {} of {}", mark, channel);
                            }
                        }
                        Some(MonitorMessage::Shutdown) | None => {
                            info!("Realtime monitor shutting down");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Checks every realtime pair once. Returns how many pairs were checked.
    pub async fn cycle(&self, marks: &mut HighWaterMarks) -> Result<usize, ScrapeError> {
        let pairs = self.scraper.pipeline().db().realtime_pairs().await?;

        let checks = pairs.iter().map(|pair| {
            let mark = marks.get(&pair.donor_channel);
            async move { (pair, self.scraper.monitor_pair(pair, mark).await) }
        });

        for (pair, result) in join_all(checks).await {
            match result {
                Ok((report, mark)) => {
                    if let Some(mark) = mark {
                        marks.advance(&pair.donor_channel, mark);
                    }
                    if report.cloned > 0 || report.failed > 0 {
                        info!(
                            "Realtime {} -> {}: {}",
                            pair.donor_channel, pair.target_channel, report
                        );
                    }
                }
                Err(e) => warn!("Realtime check of pair {} failed: {}", pair.id, e),
            }
        }

        Ok(pairs.len())
    }
}

impl<T: TelegramApi> std::fmt::Debug for RealtimeMonitor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeMonitor")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
