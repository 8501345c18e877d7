//! Client-independent message model shared by the scraper and the pipeline.
//!
//! `M` is the client's opaque media handle and `P` its resolved peer; the
//! real client uses grammers types, tests use plain strings.

use std::path::PathBuf;
use std::time::Duration;

use grammers_tl_types as tl;

use super::TelegramError;

/// Payload kind of a donor message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    VideoNote,
    Sticker,
    Text,
}

/// Which payloads a raw message carries. Several may be set at once on
/// some clients; [`MessageKind::classify`] picks one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadFlags {
    pub photo: bool,
    pub video: bool,
    pub document: bool,
    pub audio: bool,
    pub voice: bool,
    pub video_note: bool,
    pub sticker: bool,
    pub text: bool,
}

impl MessageKind {
    /// Priority order used when a message matches more than one kind.
    pub const PRIORITY: [Self; 8] = [
        Self::Photo,
        Self::Video,
        Self::Document,
        Self::Audio,
        Self::Voice,
        Self::VideoNote,
        Self::Sticker,
        Self::Text,
    ];

    /// First matching kind in [`Self::PRIORITY`] order, `None` if unsupported.
    #[must_use]
    pub fn classify(flags: PayloadFlags) -> Option<Self> {
        Self::PRIORITY.into_iter().find(|kind| match kind {
            Self::Photo => flags.photo,
            Self::Video => flags.video,
            Self::Document => flags.document,
            Self::Audio => flags.audio,
            Self::Voice => flags.voice,
            Self::VideoNote => flags.video_note,
            Self::Sticker => flags.sticker,
            Self::Text => flags.text,
        })
    }

    /// Kinds that are saved locally before re-upload.
    #[must_use]
    pub const fn is_downloadable(self) -> bool {
        matches!(
            self,
            Self::Photo | Self::Video | Self::Document | Self::Audio | Self::Voice | Self::VideoNote
        )
    }

    /// Kinds that can be part of an album.
    #[must_use]
    pub const fn is_groupable(self) -> bool {
        matches!(self, Self::Photo | Self::Video | Self::Document | Self::Audio)
    }

    /// Kinds that accept a caption.
    #[must_use]
    pub const fn takes_caption(self) -> bool {
        !matches!(self, Self::VideoNote | Self::Sticker)
    }
}

/// A URL button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlButton {
    pub text: String,
    pub url: String,
}

impl UrlButton {
    #[must_use]
    pub fn new(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: url.into(),
        }
    }
}

/// Inline keyboard made of URL buttons only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<UrlButton>>,
}

impl InlineKeyboard {
    #[must_use]
    pub fn single_row(buttons: Vec<UrlButton>) -> Self {
        Self {
            rows: vec![buttons],
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }

    #[must_use]
    pub fn button_count(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }
}

/// A donor message as read through the user session.
#[derive(Debug, Clone)]
pub struct SourceMessage<M> {
    pub id: i32,
    pub grouped_id: Option<i64>,
    /// Joins, pins, title changes and the like.
    pub is_service: bool,
    /// Text or caption.
    pub text: String,
    pub entities: Vec<tl::enums::MessageEntity>,
    /// `None` when the payload cannot be cloned.
    pub kind: Option<MessageKind>,
    pub media: Option<M>,
    /// The donor's own URL buttons.
    pub markup: Option<InlineKeyboard>,
}

/// A resolved donor chat.
#[derive(Debug, Clone)]
pub struct ResolvedChat<P> {
    /// Marked id (`-100…` for channels).
    pub id: i64,
    pub username: Option<String>,
    pub title: String,
    pub peer: P,
}

impl<P> ResolvedChat<P> {
    /// Identity under which the chat's messages are recorded in the ledger.
    #[must_use]
    pub fn ledger_key(&self) -> String {
        self.username
            .as_ref()
            .map_or_else(|| self.id.to_string(), |name| format!("@{name}"))
    }
}

/// A channel reference as typed by the admin: `@name`, `t.me/name` or a
/// numeric (marked) id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChatRef {
    Username(String),
    Id(i64),
}

impl ChatRef {
    /// Parses a reference. Returns `None` for blank input.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        // Typographic minus signs count as `-`.
        let normalized = input.trim().replace(['\u{2212}', '\u{2013}', '\u{2014}'], "-");
        let mut rest = normalized.as_str();
        for scheme in ["https://", "http://"] {
            rest = rest.strip_prefix(scheme).unwrap_or(rest);
        }
        for host in ["t.me/", "telegram.me/"] {
            rest = rest.strip_prefix(host).unwrap_or(rest);
        }
        let rest = rest.trim_start_matches('@').trim_end_matches('/');

        if rest.is_empty() {
            return None;
        }
        Some(rest.parse().map_or_else(|_| Self::Username(rest.to_owned()), Self::Id))
    }

    /// Form stored in channel pairs: `@name` or the id.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::Username(name) => format!("@{name}"),
            Self::Id(id) => id.to_string(),
        }
    }
}

/// Text of an outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub enum TextBody {
    /// Plain text with the donor's formatting entities.
    Plain {
        text: String,
        entities: Vec<tl::enums::MessageEntity>,
    },
    /// Rendered HTML; donor entities are dropped.
    Html(String),
}

impl TextBody {
    #[must_use]
    pub const fn empty() -> Self {
        Self::Plain {
            text: String::new(),
            entities: Vec::new(),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Plain { text, .. } => text,
            Self::Html(html) => html,
        }
    }

    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.as_str().trim().is_empty()
    }
}

/// Where outgoing media comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource<M> {
    /// A downloaded (and possibly re-encoded) file.
    Local(PathBuf),
    /// The donor's remote reference, used when download failed.
    Remote(M),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload<M> {
    Text,
    Media {
        kind: MessageKind,
        source: MediaSource<M>,
    },
}

/// One message to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingPost<M> {
    pub body: TextBody,
    pub payload: Payload<M>,
    pub markup: Option<InlineKeyboard>,
}

/// One attachment of an album.
#[derive(Debug, Clone, PartialEq)]
pub struct AlbumItem<M> {
    pub kind: MessageKind,
    pub source: MediaSource<M>,
    pub caption: Option<TextBody>,
}

/// Result of a single send attempt.
#[derive(Debug)]
pub enum SendOutcome<T> {
    Ok(T),
    RateLimited { retry_after: Option<Duration> },
    UnresolvedPeer,
    Fatal(TelegramError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_priority() {
        let flags = PayloadFlags {
            document: true,
            video: true,
            text: true,
            ..PayloadFlags::default()
        };
        assert_eq!(MessageKind::classify(flags), Some(MessageKind::Video));

        let flags = PayloadFlags {
            sticker: true,
            text: true,
            ..PayloadFlags::default()
        };
        assert_eq!(MessageKind::classify(flags), Some(MessageKind::Sticker));

        let text_only = PayloadFlags {
            text: true,
            ..PayloadFlags::default()
        };
        assert_eq!(MessageKind::classify(text_only), Some(MessageKind::Text));
        assert_eq!(MessageKind::classify(PayloadFlags::default()), None);
    }

    #[test]
    fn test_ledger_key() {
        let named = ResolvedChat {
            id: -100_123,
            username: Some("donor".to_owned()),
            title: "Donor".to_owned(),
            peer: (),
        };
        assert_eq!(named.ledger_key(), "@donor");

        let private = ResolvedChat {
            username: None,
            ..named
        };
        assert_eq!(private.ledger_key(), "-100123");
    }

    #[test]
    fn test_chat_ref_parse() {
        assert_eq!(ChatRef::parse("@news"), Some(ChatRef::Username("news".to_owned())));
        assert_eq!(
            ChatRef::parse(" https://t.me/news/ "),
            Some(ChatRef::Username("news".to_owned()))
        );
        assert_eq!(ChatRef::parse("-1001234"), Some(ChatRef::Id(-1_001_234)));
        assert_eq!(ChatRef::parse("\u{2212}1001234"), Some(ChatRef::Id(-1_001_234)));
        assert_eq!(ChatRef::parse("@"), None);
        assert_eq!(ChatRef::parse("t.me/news").unwrap().canonical(), "@news");
        assert_eq!(ChatRef::Id(-100_5).canonical(), "-1005");
    }

    #[test]
    fn test_keyboard_helpers() {
        let keyboard = InlineKeyboard::single_row(vec![UrlButton::new("a", "https://a")]);
        assert_eq!(keyboard.button_count(), 1);
        assert!(!keyboard.is_empty());
        assert!(InlineKeyboard::default().is_empty());
    }
}
