//! Telegram access.
//!
//! [`TelegramApi`] is the seam the scraper and the clone pipeline talk to;
//! [`GrammersApi`] implements it over a reading user session and a
//! publishing bot session.

mod api;
mod client;
mod error;
mod rate_limiter;
mod retry;
mod types;

pub use api::TelegramApi;
pub use client::{next_incoming_text, GrammersApi, IncomingText, TelegramSession};
pub use error::TelegramError;
pub use grammers_client::client::{LoginToken, PasswordToken, UpdateStream};
pub use rate_limiter::RateLimiter;
pub use retry::{send_with_retry, RetryPolicy, SendError};
pub use types::{
    AlbumItem, ChatRef, InlineKeyboard, MediaSource, MessageKind, OutgoingPost, Payload,
    PayloadFlags, ResolvedChat, SendOutcome, SourceMessage, TextBody, UrlButton,
};
