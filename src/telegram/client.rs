//! grammers-backed sessions and the [`TelegramApi`] implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use grammers_client::client::{LoginToken, PasswordToken, UpdateStream};
use grammers_client::types::{Attribute, Chat, Media, Message, PackedChat, PackedType};
use grammers_client::{
    button, reply_markup, sender, Client, InputMedia, InputMessage, InvocationError, SenderPool,
    SignInError, UpdatesConfiguration,
};
use grammers_client::update::Update;
use grammers_session::storages::SqliteSession;
use grammers_tl_types as tl;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{
    AlbumItem, ChatRef, InlineKeyboard, MediaSource, MessageKind, OutgoingPost, Payload,
    PayloadFlags, ResolvedChat, SendOutcome, SourceMessage, TelegramApi, TelegramError, TextBody,
    UrlButton,
};

/// Offset between bare channel ids and their marked (`-100…`) form.
const CHANNEL_MARK: i64 = 1_000_000_000_000;

/// One connected MTProto session (user or bot).
pub struct TelegramSession {
    client: Client,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    /// Background task running the sender pool.
    _pool_task: JoinHandle<()>,
}

impl TelegramSession {
    /// Connects using the session file at `session_path`.
    ///
    /// Returns the session and its update stream; callers that do not
    /// handle updates may drop the stream.
    pub async fn connect(
        session_path: &Path,
        api_id: i32,
    ) -> Result<(Self, UpdateStream), TelegramError> {
        info!("Connecting to Telegram ({})...", session_path.display());

        let session = Arc::new(
            SqliteSession::open(session_path)
                .await
                .map_err(|e| TelegramError::Session(e.to_string()))?,
        );

        let SenderPool {
            runner,
            updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), api_id);

        let client = Client::new(handle.clone());

        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        let stream = client.stream_updates(
            updates,
            UpdatesConfiguration {
                catch_up: false,
                ..Default::default()
            },
        );

        Ok((
            Self {
                client,
                handle: handle.thin,
                _pool_task: pool_task,
            },
            stream,
        ))
    }

    pub async fn is_authorized(&self) -> Result<bool, TelegramError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))
    }

    /// Requests a login code to be sent to the phone number.
    pub async fn request_login_code(
        &self,
        phone: &str,
        api_hash: &str,
    ) -> Result<LoginToken, TelegramError> {
        info!("Requesting login code for phone: {}...", mask_phone(phone));

        self.client
            .request_login_code(phone, api_hash)
            .await
            .map_err(|e| TelegramError::SignInFailed(e.to_string()))
    }

    /// Signs in with the login code.
    pub async fn sign_in(&self, token: &LoginToken, code: &str) -> Result<(), TelegramError> {
        match self.client.sign_in(token, code).await {
            Ok(_user) => {
                info!("Successfully signed in!");
                Ok(())
            }
            Err(SignInError::PasswordRequired(password_token)) => {
                debug!("2FA password required, hint: {:?}", password_token.hint());
                Err(TelegramError::PasswordRequired(password_token))
            }
            Err(SignInError::InvalidCode) => {
                Err(TelegramError::SignInFailed("Invalid code".to_owned()))
            }
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    /// Checks the 2FA password.
    pub async fn check_password(
        &self,
        password_token: PasswordToken,
        password: &str,
    ) -> Result<(), TelegramError> {
        match self.client.check_password(password_token, password).await {
            Ok(_user) => {
                info!("Successfully authenticated with 2FA!");
                Ok(())
            }
            Err(SignInError::InvalidPassword(token)) => Err(TelegramError::InvalidPassword(token)),
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    /// Signs the session in as a bot.
    pub async fn bot_sign_in(&self, bot_token: &str, api_hash: &str) -> Result<(), TelegramError> {
        self.client
            .bot_sign_in(bot_token, api_hash)
            .await
            .map(|_| info!("Bot session signed in"))
            .map_err(|e| TelegramError::SignInFailed(e.to_string()))
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn disconnect(&self) {
        info!("Disconnecting from Telegram...");
        self.handle.quit();
    }
}

/// A text message received by the bot account.
pub struct IncomingText {
    pub sender_id: i64,
    pub text: String,
    message: Message,
}

impl IncomingText {
    pub async fn reply(&self, text: &str) -> Result<(), TelegramError> {
        self.message
            .reply(text)
            .await
            .map(|_| ())
            .map_err(|e| TelegramError::Invocation(e.to_string()))
    }
}

/// Waits for the next update and keeps it if it is an incoming text
/// message. Other updates yield `Ok(None)`.
pub async fn next_incoming_text(
    updates: &mut UpdateStream,
) -> Result<Option<IncomingText>, TelegramError> {
    let update = updates
        .next()
        .await
        .map_err(|e| TelegramError::Connection(e.to_string()))?;

    let Update::NewMessage(message) = update else {
        return Ok(None);
    };
    if message.outgoing() || message.text().is_empty() {
        return Ok(None);
    }
    let Some(sender_id) = message.sender().map(|sender| sender.id()) else {
        return Ok(None);
    };

    Ok(Some(IncomingText {
        sender_id,
        text: message.text().to_owned(),
        message,
    }))
}

impl std::fmt::Debug for TelegramSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSession").finish_non_exhaustive()
    }
}

/// Why a send did not go through, before it is turned into a [`SendOutcome`].
enum Failure {
    RateLimited(Option<Duration>),
    Unresolved,
    Fatal(TelegramError),
}

impl<T> From<Failure> for SendOutcome<T> {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::RateLimited(retry_after) => Self::RateLimited { retry_after },
            Failure::Unresolved => Self::UnresolvedPeer,
            Failure::Fatal(e) => Self::Fatal(e),
        }
    }
}

impl From<InvocationError> for Failure {
    fn from(err: InvocationError) -> Self {
        if let InvocationError::Rpc(rpc) = &err {
            match classify_rpc(rpc.code, &rpc.name, rpc.value) {
                RpcClass::RateLimited(wait) => return Self::RateLimited(wait),
                RpcClass::UnresolvedPeer => return Self::Unresolved,
                RpcClass::Other => {}
            }
        }
        Self::Fatal(TelegramError::Invocation(err.to_string()))
    }
}

fn into_outcome<T>(result: Result<T, Failure>) -> SendOutcome<T> {
    result.map_or_else(Into::into, SendOutcome::Ok)
}

#[derive(Debug, PartialEq, Eq)]
enum RpcClass {
    RateLimited(Option<Duration>),
    UnresolvedPeer,
    Other,
}

/// Maps an RPC error to the retry taxonomy by its code and name.
fn classify_rpc(code: i32, name: &str, value: Option<u32>) -> RpcClass {
    let wait = value.map(|secs| Duration::from_secs(u64::from(secs)));
    match (code, name) {
        (420, _) | (_, "FLOOD_WAIT" | "FLOOD_PREMIUM_WAIT" | "SLOWMODE_WAIT") => {
            RpcClass::RateLimited(wait)
        }
        (_, "PEER_ID_INVALID" | "CHANNEL_INVALID" | "USERNAME_NOT_OCCUPIED" | "CHAT_ID_INVALID") => {
            RpcClass::UnresolvedPeer
        }
        _ => RpcClass::Other,
    }
}

/// Marked id for a packed peer.
fn marked_id(packed: &PackedChat) -> i64 {
    match packed.ty {
        PackedType::Broadcast | PackedType::Megagroup | PackedType::Gigagroup => {
            -CHANNEL_MARK - packed.id
        }
        PackedType::Chat => -packed.id,
        _ => packed.id,
    }
}

/// Packed peer for a marked id, without an access hash.
fn unmark(id: i64) -> PackedChat {
    let (ty, bare) = if id <= -CHANNEL_MARK {
        (PackedType::Broadcast, -id - CHANNEL_MARK)
    } else if id < 0 {
        (PackedType::Chat, -id)
    } else {
        (PackedType::User, id)
    };
    PackedChat {
        ty,
        id: bare,
        access_hash: None,
    }
}

fn resolved(chat: &Chat) -> ResolvedChat<PackedChat> {
    let peer = chat.pack();
    ResolvedChat {
        id: marked_id(&peer),
        username: chat.username().map(str::to_owned),
        title: chat.name().to_owned(),
        peer,
    }
}

/// [`TelegramApi`] over two sessions: a user that reads and a bot that publishes.
pub struct GrammersApi {
    reader: Client,
    publisher: Client,
    donors: Mutex<HashMap<String, ResolvedChat<PackedChat>>>,
    targets: Mutex<HashMap<String, PackedChat>>,
}

impl GrammersApi {
    #[must_use]
    pub fn new(reader: &TelegramSession, publisher: &TelegramSession) -> Self {
        Self {
            reader: reader.client().clone(),
            publisher: publisher.client().clone(),
            donors: Mutex::new(HashMap::new()),
            targets: Mutex::new(HashMap::new()),
        }
    }

    fn cached_donor(&self, key: &str) -> Option<ResolvedChat<PackedChat>> {
        self.donors.lock().ok()?.get(key).cloned()
    }

    fn cached_target(&self, key: &str) -> Option<PackedChat> {
        self.targets.lock().ok()?.get(key).copied()
    }

    fn remember_target(&self, key: &str, peer: PackedChat) {
        if let Ok(mut targets) = self.targets.lock() {
            targets.insert(key.to_owned(), peer);
        }
    }

    async fn find_in_dialogs(&self, id: i64) -> Result<Option<Chat>, InvocationError> {
        let mut dialogs = self.reader.iter_dialogs();
        while let Some(dialog) = dialogs.next().await? {
            let chat = dialog.chat();
            if marked_id(&chat.pack()) == id {
                return Ok(Some(chat.clone()));
            }
        }
        Ok(None)
    }

    /// Peer for `target` as seen by the publisher.
    async fn target_peer(&self, target: &str) -> Result<PackedChat, Failure> {
        if let Some(peer) = self.cached_target(target) {
            return Ok(peer);
        }
        match ChatRef::parse(target) {
            Some(ChatRef::Username(name)) => {
                let chat = self
                    .publisher
                    .resolve_username(&name)
                    .await?
                    .ok_or(Failure::Unresolved)?;
                let peer = chat.pack();
                self.remember_target(target, peer);
                Ok(peer)
            }
            Some(ChatRef::Id(id)) => Ok(unmark(id)),
            None => Err(Failure::Fatal(TelegramError::ChatNotFound(target.to_owned()))),
        }
    }

    async fn upload(&self, path: &Path) -> Result<grammers_client::types::media::Uploaded, Failure> {
        self.publisher
            .upload_file(path)
            .await
            .map_err(|e| Failure::Fatal(TelegramError::Upload(format!("{}: {e}", path.display()))))
    }

    async fn build_post(&self, post: &OutgoingPost<Media>) -> Result<InputMessage, Failure> {
        let mut message = input_message(&post.body);

        if let Payload::Media { kind, source } = &post.payload {
            message = match source {
                MediaSource::Local(path) => {
                    let file = self.upload(path).await?;
                    match kind {
                        MessageKind::Photo => message.photo(file),
                        other => with_attributes(message.document(file), *other),
                    }
                }
                MediaSource::Remote(media) => message.copy_media(media),
            };
        }

        if let Some(markup) = &post.markup {
            message = message.reply_markup(&to_reply_markup(markup));
        }
        Ok(message)
    }

    async fn build_album_item(&self, item: &AlbumItem<Media>) -> Result<InputMedia, Failure> {
        let mut media = match &item.caption {
            Some(TextBody::Plain { text, entities }) => {
                InputMedia::caption(text.as_str()).fmt_entities(entities.clone())
            }
            Some(TextBody::Html(html)) => InputMedia::html(html.as_str()),
            None => InputMedia::caption(""),
        };

        media = match &item.source {
            MediaSource::Local(path) => {
                let file = self.upload(path).await?;
                match item.kind {
                    MessageKind::Photo => media.photo(file),
                    MessageKind::Video => media.document(file).attribute(Attribute::Video {
                        round_message: false,
                        supports_streaming: true,
                        duration: Duration::ZERO,
                        w: 0,
                        h: 0,
                    }),
                    _ => media.document(file),
                }
            }
            MediaSource::Remote(remote) => media.copy_media(remote),
        };
        Ok(media)
    }

    async fn try_send_post(&self, target: &str, post: &OutgoingPost<Media>) -> Result<i32, Failure> {
        let peer = self.target_peer(target).await?;
        let message = self.build_post(post).await?;
        let sent = self.publisher.send_message(peer, message).await?;
        Ok(sent.id())
    }

    async fn try_send_album(
        &self,
        target: &str,
        items: &[AlbumItem<Media>],
    ) -> Result<Vec<i32>, Failure> {
        let peer = self.target_peer(target).await?;
        let mut media = Vec::with_capacity(items.len());
        for item in items {
            media.push(self.build_album_item(item).await?);
        }
        let sent = self.publisher.send_album(peer, media).await?;
        Ok(sent.iter().flatten().map(Message::id).collect())
    }

    async fn try_attach_markup(
        &self,
        target: &str,
        message_id: i32,
        caption: &TextBody,
        markup: &InlineKeyboard,
    ) -> Result<(), Failure> {
        let peer = self.target_peer(target).await?;
        let message = input_message(caption).reply_markup(&to_reply_markup(markup));
        self.publisher.edit_message(peer, message_id, message).await?;
        Ok(())
    }
}

fn input_message(body: &TextBody) -> InputMessage {
    match body {
        TextBody::Plain { text, entities } => {
            InputMessage::text(text.as_str()).fmt_entities(entities.clone())
        }
        TextBody::Html(html) => InputMessage::html(html.as_str()),
    }
}

fn with_attributes(message: InputMessage, kind: MessageKind) -> InputMessage {
    match kind {
        MessageKind::Video => message.attribute(Attribute::Video {
            round_message: false,
            supports_streaming: true,
            duration: Duration::ZERO,
            w: 0,
            h: 0,
        }),
        MessageKind::VideoNote => message.attribute(Attribute::Video {
            round_message: true,
            supports_streaming: false,
            duration: Duration::ZERO,
            w: 384,
            h: 384,
        }),
        MessageKind::Voice => message.attribute(Attribute::Voice {
            duration: Duration::ZERO,
            waveform: None,
        }),
        MessageKind::Audio => message.attribute(Attribute::Audio {
            duration: Duration::ZERO,
            title: None,
            performer: None,
        }),
        _ => message,
    }
}

fn to_reply_markup(keyboard: &InlineKeyboard) -> reply_markup::Inline {
    reply_markup::inline(
        keyboard
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| button::url(b.text.as_str(), b.url.as_str()))
                    .collect()
            })
            .collect(),
    )
}

fn from_reply_markup(markup: &tl::enums::ReplyMarkup) -> Option<InlineKeyboard> {
    let tl::enums::ReplyMarkup::ReplyInlineMarkup(inline) = markup else {
        return None;
    };
    let rows: Vec<Vec<UrlButton>> = inline
        .rows
        .iter()
        .map(|tl::enums::KeyboardButtonRow::Row(row)| {
            row.buttons
                .iter()
                .filter_map(|button| match button {
                    tl::enums::KeyboardButton::Url(b) => Some(UrlButton::new(&b.text, &b.url)),
                    _ => None,
                })
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect();

    let keyboard = InlineKeyboard { rows };
    (!keyboard.is_empty()).then_some(keyboard)
}

/// Payload flags read from the raw media of a message.
fn payload_flags(media: Option<&tl::enums::MessageMedia>, text: &str) -> PayloadFlags {
    let mut flags = PayloadFlags {
        text: !text.trim().is_empty(),
        ..PayloadFlags::default()
    };

    match media {
        Some(tl::enums::MessageMedia::Photo(_)) => flags.photo = true,
        Some(tl::enums::MessageMedia::Document(media)) => {
            let Some(tl::enums::Document::Document(doc)) = &media.document else {
                return flags;
            };
            flags.document = true;
            for attribute in &doc.attributes {
                match attribute {
                    tl::enums::DocumentAttribute::Video(video) if video.round_message => {
                        flags.video_note = true;
                        flags.document = false;
                    }
                    tl::enums::DocumentAttribute::Video(_) => {
                        flags.video = true;
                        flags.document = false;
                    }
                    tl::enums::DocumentAttribute::Audio(audio) if audio.voice => {
                        flags.voice = true;
                        flags.document = false;
                    }
                    tl::enums::DocumentAttribute::Audio(_) => {
                        flags.audio = true;
                        flags.document = false;
                    }
                    tl::enums::DocumentAttribute::Sticker(_) => {
                        flags.sticker = true;
                        flags.document = false;
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
    flags
}

fn source_message(message: &Message) -> SourceMessage<Media> {
    let text = message.text().to_owned();
    let kind = MessageKind::classify(payload_flags(message.raw.media.as_ref(), &text));
    SourceMessage {
        id: message.id(),
        grouped_id: message.grouped_id(),
        is_service: message.action().is_some(),
        entities: message.fmt_entities().cloned().unwrap_or_default(),
        kind,
        media: message.media(),
        markup: message.raw.reply_markup.as_ref().and_then(from_reply_markup),
        text,
    }
}

/// File extension for a download, from the file name or MIME type.
fn extension_for(file_name: Option<&str>, mime: Option<&str>) -> String {
    if let Some(ext) = file_name
        .map(Path::new)
        .and_then(Path::extension)
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
    {
        return ext.to_lowercase();
    }
    match mime.unwrap_or_default() {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "audio/ogg" => "ogg",
        "audio/mpeg" => "mp3",
        "audio/mp4" => "m4a",
        _ => "bin",
    }
    .to_owned()
}

#[async_trait]
impl TelegramApi for GrammersApi {
    type Peer = PackedChat;
    type Media = Media;

    async fn resolve_donor(&self, reference: &str) -> Result<ResolvedChat<PackedChat>, TelegramError> {
        if let Some(chat) = self.cached_donor(reference) {
            return Ok(chat);
        }

        let not_found = || TelegramError::ChatNotFound(reference.to_owned());
        let chat = match ChatRef::parse(reference).ok_or_else(not_found)? {
            ChatRef::Username(name) => self.reader.resolve_username(&name).await,
            ChatRef::Id(id) => self.find_in_dialogs(id).await,
        }
        .map_err(|e| TelegramError::Invocation(e.to_string()))?
        .ok_or_else(not_found)?;

        let chat = resolved(&chat);
        debug!("Resolved donor {} to {} ({})", reference, chat.id, chat.title);
        if let Ok(mut donors) = self.donors.lock() {
            donors.insert(reference.to_owned(), chat.clone());
        }
        Ok(chat)
    }

    async fn history(
        &self,
        chat: &ResolvedChat<PackedChat>,
        offset_id: i32,
        limit: usize,
    ) -> Result<Vec<SourceMessage<Media>>, TelegramError> {
        let mut iter = self
            .reader
            .iter_messages(chat.peer)
            .offset_id(offset_id)
            .limit(limit);

        let mut messages = Vec::with_capacity(limit);
        while let Some(message) = iter
            .next()
            .await
            .map_err(|e| TelegramError::Invocation(e.to_string()))?
        {
            messages.push(source_message(&message));
        }
        Ok(messages)
    }

    async fn download(&self, media: &Media, dir: &Path, stem: &str) -> Result<PathBuf, TelegramError> {
        let extension = match media {
            Media::Photo(_) => "jpg".to_owned(),
            Media::Document(doc) => extension_for(Some(doc.name()), doc.mime_type()),
            _ => "bin".to_owned(),
        };
        let path = dir.join(format!("{stem}.{extension}"));

        self.reader
            .download_media(media, &path)
            .await
            .map_err(|e| TelegramError::Download(e.to_string()))?;
        Ok(path)
    }

    async fn send_post(&self, target: &str, post: &OutgoingPost<Media>) -> SendOutcome<i32> {
        into_outcome(self.try_send_post(target, post).await)
    }

    async fn send_album(&self, target: &str, items: &[AlbumItem<Media>]) -> SendOutcome<Vec<i32>> {
        into_outcome(self.try_send_album(target, items).await)
    }

    async fn attach_markup(
        &self,
        target: &str,
        message_id: i32,
        caption: &TextBody,
        markup: &InlineKeyboard,
    ) -> SendOutcome<()> {
        into_outcome(
            self.try_attach_markup(target, message_id, caption, markup)
                .await,
        )
    }

    async fn force_resolve(&self, target: &str) -> Result<(), TelegramError> {
        let invocation = |e: InvocationError| TelegramError::Invocation(e.to_string());
        let peer = match ChatRef::parse(target) {
            Some(ChatRef::Username(name)) => self
                .publisher
                .resolve_username(&name)
                .await
                .map_err(invocation)?
                .map(|chat| chat.pack()),
            Some(ChatRef::Id(id)) if id <= -CHANNEL_MARK => {
                let request = tl::functions::channels::GetChannels {
                    id: vec![tl::enums::InputChannel::Channel(tl::types::InputChannel {
                        channel_id: -id - CHANNEL_MARK,
                        access_hash: 0,
                    })],
                };
                let chats = self.publisher.invoke(&request).await.map_err(invocation)?;
                let (tl::enums::messages::Chats::Chats(tl::types::messages::Chats { chats })
                | tl::enums::messages::Chats::Slice(tl::types::messages::ChatsSlice {
                    chats, ..
                })) = chats;
                chats.into_iter().find_map(|chat| match chat {
                    tl::enums::Chat::Channel(channel) => Some(PackedChat {
                        ty: PackedType::Broadcast,
                        id: channel.id,
                        access_hash: channel.access_hash,
                    }),
                    _ => None,
                })
            }
            Some(ChatRef::Id(id)) => Some(unmark(id)),
            None => None,
        }
        .ok_or_else(|| TelegramError::ChatNotFound(target.to_owned()))?;

        info!("Publisher resolved {} to {}", target, marked_id(&peer));
        self.remember_target(target, peer);
        Ok(())
    }
}

/// Masks a phone number for logging (shows last 4 digits).
fn mask_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > 4 {
        format!("***{}", &digits[digits.len() - 4..])
    } else {
        "****".to_owned()
    }
}
