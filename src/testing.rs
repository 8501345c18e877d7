//! In-memory [`TelegramApi`] for tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::telegram::{
    AlbumItem, InlineKeyboard, MessageKind, OutgoingPost, ResolvedChat, SendOutcome,
    SourceMessage, TelegramApi, TelegramError, TextBody,
};

/// An outcome injected ahead of the next send.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Let the call go through.
    Pass,
    RateLimited(Option<Duration>),
    Unresolved,
    Fatal(&'static str),
}

impl Scripted {
    fn into_outcome<T>(self) -> Option<SendOutcome<T>> {
        match self {
            Self::Pass => None,
            Self::RateLimited(retry_after) => Some(SendOutcome::RateLimited { retry_after }),
            Self::Unresolved => Some(SendOutcome::UnresolvedPeer),
            Self::Fatal(name) => Some(SendOutcome::Fatal(TelegramError::Invocation(
                name.to_owned(),
            ))),
        }
    }
}

/// A successful publisher call.
#[derive(Debug, Clone)]
pub enum Sent {
    Post {
        target: String,
        post: OutgoingPost<String>,
        id: i32,
    },
    Album {
        target: String,
        items: Vec<AlbumItem<String>>,
        ids: Vec<i32>,
    },
    Markup {
        target: String,
        message_id: i32,
        markup: InlineKeyboard,
    },
}

struct FakeChannel {
    chat: ResolvedChat<()>,
    messages: BTreeMap<i32, SourceMessage<String>>,
}

#[derive(Default)]
pub struct FakeTelegram {
    channels: Mutex<HashMap<String, FakeChannel>>,
    sent: Mutex<Vec<Sent>>,
    script: Mutex<VecDeque<Scripted>>,
    force_resolved: Mutex<Vec<String>>,
    fail_downloads: AtomicBool,
    next_id: AtomicI32,
    history_calls: AtomicUsize,
}

impl FakeTelegram {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicI32::new(1000),
            ..Self::default()
        }
    }

    /// Registers a donor reachable as `reference`.
    #[must_use]
    pub fn with_channel(self, reference: &str, id: i64) -> Self {
        let chat = ResolvedChat {
            id,
            username: reference.strip_prefix('@').map(str::to_owned),
            title: reference.to_owned(),
            peer: (),
        };
        self.channels.lock().unwrap().insert(
            reference.to_owned(),
            FakeChannel {
                chat,
                messages: BTreeMap::new(),
            },
        );
        self
    }

    pub fn push(&self, reference: &str, message: SourceMessage<String>) {
        let mut channels = self.channels.lock().unwrap();
        let channel = channels.get_mut(reference).expect("unknown fake channel");
        channel.messages.insert(message.id, message);
    }

    pub fn push_all(&self, reference: &str, messages: impl IntoIterator<Item = SourceMessage<String>>) {
        for message in messages {
            self.push(reference, message);
        }
    }

    pub fn script(&self, outcomes: impl IntoIterator<Item = Scripted>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    pub fn fail_downloads(&self) {
        self.fail_downloads.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// Texts of sent single posts, in send order.
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Post { post, .. } => Some(post.body.as_str().to_owned()),
                _ => None,
            })
            .collect()
    }

    pub fn force_resolved(&self) -> Vec<String> {
        self.force_resolved.lock().unwrap().clone()
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    /// The injected outcome for this call, if any.
    fn intercept<T>(&self) -> Option<SendOutcome<T>> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .and_then(Scripted::into_outcome)
    }

    fn allocate_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl TelegramApi for FakeTelegram {
    type Peer = ();
    type Media = String;

    async fn resolve_donor(&self, reference: &str) -> Result<ResolvedChat<()>, TelegramError> {
        self.channels
            .lock()
            .unwrap()
            .get(reference)
            .map(|channel| channel.chat.clone())
            .ok_or_else(|| TelegramError::ChatNotFound(reference.to_owned()))
    }

    async fn history(
        &self,
        chat: &ResolvedChat<()>,
        offset_id: i32,
        limit: usize,
    ) -> Result<Vec<SourceMessage<String>>, TelegramError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let channels = self.channels.lock().unwrap();
        let channel = channels
            .values()
            .find(|channel| channel.chat.id == chat.id)
            .ok_or_else(|| TelegramError::ChatNotFound(chat.title.clone()))?;

        let upper = if offset_id == 0 { i32::MAX } else { offset_id };
        Ok(channel
            .messages
            .range(..upper)
            .rev()
            .take(limit)
            .map(|(_, message)| message.clone())
            .collect())
    }

    async fn download(&self, media: &String, dir: &Path, stem: &str) -> Result<PathBuf, TelegramError> {
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(TelegramError::Download(media.clone()));
        }
        let path = dir.join(format!("{stem}.bin"));
        tokio::fs::write(&path, media.as_bytes())
            .await
            .map_err(|e| TelegramError::Download(e.to_string()))?;
        Ok(path)
    }

    async fn send_post(&self, target: &str, post: &OutgoingPost<String>) -> SendOutcome<i32> {
        if let Some(outcome) = self.intercept() {
            return outcome;
        }
        let id = self.allocate_id();
        self.sent.lock().unwrap().push(Sent::Post {
            target: target.to_owned(),
            post: post.clone(),
            id,
        });
        SendOutcome::Ok(id)
    }

    async fn send_album(&self, target: &str, items: &[AlbumItem<String>]) -> SendOutcome<Vec<i32>> {
        if let Some(outcome) = self.intercept() {
            return outcome;
        }
        let ids: Vec<i32> = items.iter().map(|_| self.allocate_id()).collect();
        self.sent.lock().unwrap().push(Sent::Album {
            target: target.to_owned(),
            items: items.to_vec(),
            ids: ids.clone(),
        });
        SendOutcome::Ok(ids)
    }

    async fn attach_markup(
        &self,
        target: &str,
        message_id: i32,
        _caption: &TextBody,
        markup: &InlineKeyboard,
    ) -> SendOutcome<()> {
        if let Some(outcome) = self.intercept() {
            return outcome;
        }
        self.sent.lock().unwrap().push(Sent::Markup {
            target: target.to_owned(),
            message_id,
            markup: markup.clone(),
        });
        SendOutcome::Ok(())
    }

    async fn force_resolve(&self, target: &str) -> Result<(), TelegramError> {
        self.force_resolved.lock().unwrap().push(target.to_owned());
        Ok(())
    }
}

fn message(id: i32, kind: Option<MessageKind>, text: &str) -> SourceMessage<String> {
    SourceMessage {
        id,
        grouped_id: None,
        is_service: false,
        text: text.to_owned(),
        entities: Vec::new(),
        kind,
        media: None,
        markup: None,
    }
}

pub fn text(id: i32, text: &str) -> SourceMessage<String> {
    message(id, Some(MessageKind::Text), text)
}

pub fn media(id: i32, kind: MessageKind, caption: &str) -> SourceMessage<String> {
    SourceMessage {
        media: Some(format!("media-{id}")),
        ..message(id, Some(kind), caption)
    }
}

pub fn album_member(id: i32, group: i64, caption: &str) -> SourceMessage<String> {
    SourceMessage {
        grouped_id: Some(group),
        ..media(id, MessageKind::Photo, caption)
    }
}

pub fn service(id: i32) -> SourceMessage<String> {
    SourceMessage {
        is_service: true,
        ..message(id, None, "")
    }
}

pub fn unsupported(id: i32) -> SourceMessage<String> {
    message(id, None, "")
}
