//! The seam between cloning logic and the Telegram client.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{
    AlbumItem, InlineKeyboard, OutgoingPost, ResolvedChat, SendOutcome, SourceMessage,
    TelegramError, TextBody,
};

/// Everything the scraper and the pipeline need from Telegram.
///
/// Reads go through the user session, sends through the bot session.
/// Send methods report one attempt; retrying is the caller's job.
#[async_trait]
pub trait TelegramApi: Send + Sync + 'static {
    /// Resolved peer handle.
    type Peer: Clone + Send + Sync;
    /// Opaque remote media reference.
    type Media: Clone + Send + Sync;

    /// Resolves a donor reference (`@name`, `t.me/name` or a numeric id).
    async fn resolve_donor(
        &self,
        reference: &str,
    ) -> Result<ResolvedChat<Self::Peer>, TelegramError>;

    /// Up to `limit` messages with id strictly below `offset_id`, newest
    /// first. `offset_id == 0` starts from the newest message.
    async fn history(
        &self,
        chat: &ResolvedChat<Self::Peer>,
        offset_id: i32,
        limit: usize,
    ) -> Result<Vec<SourceMessage<Self::Media>>, TelegramError>;

    /// Saves `media` under `dir` with file stem `stem`.
    async fn download(
        &self,
        media: &Self::Media,
        dir: &Path,
        stem: &str,
    ) -> Result<PathBuf, TelegramError>;

    /// Publishes one post. Returns the new message id.
    async fn send_post(&self, target: &str, post: &OutgoingPost<Self::Media>) -> SendOutcome<i32>;

    /// Publishes an album as one media group.
    async fn send_album(
        &self,
        target: &str,
        items: &[AlbumItem<Self::Media>],
    ) -> SendOutcome<Vec<i32>>;

    /// Adds `markup` to an already published message, keeping its caption.
    async fn attach_markup(
        &self,
        target: &str,
        message_id: i32,
        caption: &TextBody,
        markup: &InlineKeyboard,
    ) -> SendOutcome<()>;

    /// Makes the publisher learn `target` so later sends resolve it.
    async fn force_resolve(&self, target: &str) -> Result<(), TelegramError>;
}
