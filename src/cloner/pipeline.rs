//! Transform-and-send for single messages and albums.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::media::{MediaStore, TempFiles};
use crate::config::ClonerSettings;
use crate::rules::{resolve_markup, rewrite};
use crate::storage::{Database, LinkRule, StorageError};
use crate::telegram::{
    send_with_retry, AlbumItem, MessageKind, OutgoingPost, Payload, RateLimiter, RetryPolicy,
    SendError, SourceMessage, TelegramApi, TelegramError, TextBody,
};

/// Why a message was not sent although nothing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The payload kind cannot be cloned.
    Unsupported,
    /// A text message whose text is empty after rewriting.
    EmptyText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneOutcome {
    /// Published; ids of the new messages in the target.
    Sent(Vec<i32>),
    Skipped(SkipReason),
}

#[derive(Debug, Error)]
pub enum CloneError {
    #[error("Rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Target channel could not be resolved")]
    UnresolvedPeer,

    #[error("Telegram error: {0}")]
    Telegram(#[from] TelegramError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<SendError> for CloneError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::RateLimited { attempts, .. } => Self::RateLimited { attempts },
            SendError::UnresolvedPeer => Self::UnresolvedPeer,
            SendError::Fatal(e) => Self::Telegram(e),
        }
    }
}

/// Rewrites donor text with the link rules. Rich output drops the donor's
/// entities; so does any change to plain text, since their offsets no
/// longer line up.
fn text_body<M>(message: &SourceMessage<M>, rules: &[LinkRule]) -> TextBody {
    let rewritten = rewrite(&message.text, rules);
    if rewritten.rich {
        TextBody::Html(rewritten.text)
    } else if rewritten.text == message.text {
        TextBody::Plain {
            text: rewritten.text,
            entities: message.entities.clone(),
        }
    } else {
        TextBody::Plain {
            text: rewritten.text,
            entities: Vec::new(),
        }
    }
}

/// Sends donor messages to a target channel.
pub struct ClonePipeline<T: TelegramApi> {
    api: Arc<T>,
    db: Database,
    media: MediaStore,
    limiter: RateLimiter,
    policy: RetryPolicy,
}

impl<T: TelegramApi> ClonePipeline<T> {
    #[must_use]
    pub fn new(api: Arc<T>, db: Database, settings: &ClonerSettings) -> Self {
        Self {
            api,
            db,
            media: MediaStore::new(&settings.download_dir, &settings.ffmpeg_path),
            limiter: RateLimiter::new(settings.min_send_interval()),
            policy: RetryPolicy::from_settings(settings),
        }
    }

    #[must_use]
    pub fn api(&self) -> &Arc<T> {
        &self.api
    }

    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Clones one message into `target` and counts it for `pair_id`.
    pub async fn clone_message(
        &self,
        message: &SourceMessage<T::Media>,
        target: &str,
        pair_id: i64,
    ) -> Result<CloneOutcome, CloneError> {
        let Some(kind) = message.kind else {
            debug!("Message {} has no clonable payload", message.id);
            return Ok(CloneOutcome::Skipped(SkipReason::Unsupported));
        };

        let rules = self.db.link_rules().await?;
        let button_rule = self.db.button_rule().await?;
        let markup = resolve_markup(button_rule.as_ref(), message.markup.as_ref());

        let mut body = text_body(message, &rules);
        if kind == MessageKind::Text && body.is_blank() {
            return Ok(CloneOutcome::Skipped(SkipReason::EmptyText));
        }
        if !kind.takes_caption() {
            body = TextBody::empty();
        }

        let mut temps = TempFiles::new();
        let payload = if kind == MessageKind::Text {
            Payload::Text
        } else {
            let Some(media) = &message.media else {
                warn!("Message {} is {:?} without media, skipping", message.id, kind);
                return Ok(CloneOutcome::Skipped(SkipReason::Unsupported));
            };
            let source = self
                .media
                .fetch(self.api.as_ref(), media, kind, message.id, &mut temps)
                .await;
            Payload::Media { kind, source }
        };

        let post = OutgoingPost {
            body,
            payload,
            markup,
        };

        let sent_id = send_with_retry(
            &self.policy,
            &self.limiter,
            || self.api.send_post(target, &post),
            || self.api.force_resolve(target),
        )
        .await?;
        drop(temps);

        self.db.increment_stats(pair_id).await?;
        info!("Cloned message {} as {:?} to {} ({})", message.id, kind, target, sent_id);
        Ok(CloneOutcome::Sent(vec![sent_id]))
    }

    /// Clones an album, given in ascending id order, as one media group.
    pub async fn clone_album(
        &self,
        members: &[SourceMessage<T::Media>],
        target: &str,
        pair_id: i64,
    ) -> Result<CloneOutcome, CloneError> {
        let rules = self.db.link_rules().await?;
        let button_rule = self.db.button_rule().await?;
        let original_markup = members.iter().find_map(|m| m.markup.as_ref());
        let markup = resolve_markup(button_rule.as_ref(), original_markup);

        let caption = members
            .iter()
            .rev()
            .find(|m| !m.text.trim().is_empty())
            .map(|m| text_body(m, &rules));

        let mut temps = TempFiles::new();
        let mut items = Vec::with_capacity(members.len());
        for member in members {
            let (Some(kind), Some(media)) = (member.kind, &member.media) else {
                debug!("Album member {} has no media, leaving it out", member.id);
                continue;
            };
            if !kind.is_groupable() {
                debug!("Album member {} is {:?}, leaving it out", member.id, kind);
                continue;
            }
            let source = self
                .media
                .fetch(self.api.as_ref(), media, kind, member.id, &mut temps)
                .await;
            items.push(AlbumItem {
                kind,
                source,
                caption: None,
            });
        }

        let Some(first) = items.first_mut() else {
            return Ok(CloneOutcome::Skipped(SkipReason::Unsupported));
        };
        first.caption.clone_from(&caption);

        let ids = send_with_retry(
            &self.policy,
            &self.limiter,
            || self.api.send_album(target, &items),
            || self.api.force_resolve(target),
        )
        .await?;
        drop(temps);

        if let (Some(markup), Some(&first_id)) = (&markup, ids.first()) {
            let caption = caption.unwrap_or_else(TextBody::empty);
            let attached = send_with_retry(
                &self.policy,
                &self.limiter,
                || self.api.attach_markup(target, first_id, &caption, markup),
                || self.api.force_resolve(target),
            )
            .await;
            if let Err(e) = attached {
                warn!("Album sent to {} but buttons could not be attached: {}", target, e);
            }
        }

        self.db.increment_stats(pair_id).await?;
        let first_id = members.first().map_or(0, |m| m.id);
        info!(
            "Cloned album starting at {} ({} items) to {}",
            first_id,
            ids.len(),
            target
        );
        Ok(CloneOutcome::Sent(ids))
    }
}
