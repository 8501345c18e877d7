//! Reading donor channels.
//!
//! Manual scrape passes (latest N, first N, full history) and the
//! realtime monitor that polls every realtime-enabled pair.

mod monitor;
mod orchestrator;
mod state;

pub use monitor::{MonitorMessage, RealtimeMonitor};
pub use orchestrator::{ScrapeError, ScrapeMode, ScrapeReport, Scraper, PAGE_SIZE};
pub use state::HighWaterMarks;
