//! Dispatcher: routes each inbound message to the media or chat handler.
//!
//! Commands are recognized by case-insensitive substring tokens anywhere in
//! the message. `_pic` asks for a random picture from the media directory;
//! `_chat` and `_chag` forward the rest of the message to the backend.
//!
//! The media path runs under a single async mutex from file selection to
//! cache write, so two concurrent requests can never upload the same file
//! twice.

use crate::backend::ChatBackend;
use crate::config::TokenPolicy;
use crate::error::Result;
use crate::media::{AttachmentStore, UploadCache};
use crate::messaging::MessagingDyn;
use crate::InboundMessage;

use std::sync::Arc;
use tokio::sync::Mutex;

/// Token requesting a random picture.
pub const MEDIA_TOKEN: &str = "_pic";

/// Interchangeable tokens requesting a backend reply.
pub const CHAT_TOKENS: [&str; 2] = ["_chat", "_chag"];

/// Reply used when the backend can't produce text.
pub const CHAT_FALLBACK: &str =
    "Guhh? Sorry, something went wrong while communicating with the server.";

/// Every command token, stripped from the seed when both paths run.
const COMMAND_TOKENS: [&str; 3] = [CHAT_TOKENS[0], CHAT_TOKENS[1], MEDIA_TOKEN];

/// Longest message excerpt written to debug logs.
const MAX_LOGGED_CHARS: usize = 120;

/// Reply used when the media path fails. Blames whoever asked.
pub fn media_failure_text(author_label: &str) -> String {
    format!("Guhh? Couldn't send a picture. This is {author_label}'s fault.")
}

/// A command found in a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Media,
    Chat { seed_text: String },
}

/// How a media request was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaDelivery {
    /// The file was uploaded before; its URL was sent as text.
    Cached { file_name: String, url: String },
    /// The file was uploaded now and its URL recorded.
    Uploaded { file_name: String, url: String },
}

/// Find the commands in `content`, in the order they should run.
pub fn classify(content: &str, policy: TokenPolicy) -> Vec<Command> {
    let lowered = content.to_ascii_lowercase();
    let wants_media = lowered.contains(MEDIA_TOKEN);
    let wants_chat = CHAT_TOKENS.iter().any(|token| lowered.contains(token));

    let mut commands = Vec::new();
    if wants_media {
        commands.push(Command::Media);
    }
    if wants_chat && (!wants_media || policy == TokenPolicy::Independent) {
        let seed_text = if wants_media {
            strip_tokens(content, &COMMAND_TOKENS)
        } else {
            strip_chat_tokens(content)
        };
        commands.push(Command::Chat { seed_text });
    }
    commands
}

/// Remove every chat token (any case) and collapse the leftover whitespace.
pub fn strip_chat_tokens(content: &str) -> String {
    strip_tokens(content, &CHAT_TOKENS)
}

fn strip_tokens(content: &str, tokens: &[&str]) -> String {
    let bytes = content.as_bytes();
    let mut stripped = String::with_capacity(content.len());
    let mut segment_start = 0;
    let mut index = 0;

    // Tokens are ASCII, so a match never starts or ends inside a multi-byte char.
    while index < bytes.len() {
        let matched = tokens.iter().find(|token| {
            bytes[index..]
                .get(..token.len())
                .is_some_and(|window| window.eq_ignore_ascii_case(token.as_bytes()))
        });

        match matched {
            Some(token) => {
                stripped.push_str(&content[segment_start..index]);
                stripped.push(' ');
                index += token.len();
                segment_start = index;
            }
            None => index += 1,
        }
    }
    stripped.push_str(&content[segment_start..]);

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_for_log(message: &str, max_chars: usize) -> (&str, bool) {
    match message.char_indices().nth(max_chars) {
        Some((byte_index, _character)) => (&message[..byte_index], true),
        None => (message, false),
    }
}

/// Routes messages to handlers. Shared across per-message tasks.
pub struct Dispatcher {
    messaging: Arc<dyn MessagingDyn>,
    backend: Arc<dyn ChatBackend>,
    store: AttachmentStore,
    cache: Arc<UploadCache>,
    token_policy: TokenPolicy,
    learn: bool,
    /// Serializes the media path end to end.
    media_lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        messaging: Arc<dyn MessagingDyn>,
        backend: Arc<dyn ChatBackend>,
        store: AttachmentStore,
        cache: Arc<UploadCache>,
    ) -> Self {
        Self {
            messaging,
            backend,
            store,
            cache,
            token_policy: TokenPolicy::default(),
            learn: false,
            media_lock: Mutex::new(()),
        }
    }

    pub fn with_token_policy(mut self, token_policy: TokenPolicy) -> Self {
        self.token_policy = token_policy;
        self
    }

    /// Forward messages without commands to the backend's `/learn`.
    pub fn with_learning(mut self, learn: bool) -> Self {
        self.learn = learn;
        self
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &Arc<UploadCache> {
        &self.cache
    }

    /// Load the upload cache and drop entries for files no longer on disk.
    ///
    /// Reconciliation is skipped when the media directory is missing, so an
    /// unmounted volume doesn't wipe the cache.
    pub async fn warm_up(&self) {
        let loaded = self.cache.load().await;

        if !tokio::fs::metadata(self.store.dir())
            .await
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false)
        {
            tracing::warn!(
                path = %self.store.dir().display(),
                "media directory missing, skipping cache reconciliation"
            );
            return;
        }

        let candidates = self.store.list_candidates().await;
        let pruned = self.cache.retain_files(&candidates).await;
        tracing::info!(
            path = %self.cache.path().display(),
            cached = loaded - pruned,
            pruned,
            media_files = candidates.len(),
            "upload cache ready"
        );
    }

    /// Handle one inbound message. Never fails; errors become log lines and
    /// fallback replies. Returns the commands that were run.
    pub async fn handle(&self, message: &InboundMessage) -> Vec<Command> {
        if message.from_self {
            return Vec::new();
        }

        let (excerpt, truncated) = truncate_for_log(&message.content, MAX_LOGGED_CHARS);
        tracing::debug!(
            author = %message.author_label,
            channel = %message.conversation_id,
            content = %excerpt,
            truncated,
            "message received"
        );

        let commands = classify(&message.content, self.token_policy);
        if commands.is_empty() {
            if self.learn {
                self.learn_from(message).await;
            }
            return commands;
        }

        for command in &commands {
            match command {
                Command::Media => self.handle_media(message).await,
                Command::Chat { seed_text } => self.handle_chat(message, seed_text).await,
            }
        }
        commands
    }

    async fn handle_media(&self, message: &InboundMessage) {
        let failure = match self.send_media(message).await {
            Ok(Some(delivery)) => {
                tracing::info!(?delivery, author = %message.author_label, "media sent");
                return;
            }
            Ok(None) => {
                tracing::warn!(path = %self.store.dir().display(), "no media files to send");
                media_failure_text(&message.author_label)
            }
            Err(error) => {
                tracing::error!(%error, author = %message.author_label, "failed to send media");
                media_failure_text(&message.author_label)
            }
        };

        self.reply(message, &failure).await;
    }

    /// Pick a file and send it, uploading only on a cache miss.
    ///
    /// `Ok(None)` when there is nothing to send.
    pub async fn send_media(&self, message: &InboundMessage) -> Result<Option<MediaDelivery>> {
        let _guard = self.media_lock.lock().await;

        let Some(file_name) = self.store.pick_random().await else {
            return Ok(None);
        };

        if let Some(url) = self.cache.get(&file_name).await {
            self.messaging
                .send_text(&message.conversation_id, &url)
                .await?;
            return Ok(Some(MediaDelivery::Cached { file_name, url }));
        }

        let path = self.store.path_of(&file_name);
        let receipt = self
            .messaging
            .send_file(&message.conversation_id, &path, &file_name)
            .await?;
        tracing::debug!(
            %file_name,
            message_id = %receipt.message_id,
            "attachment uploaded"
        );
        self.cache.put(&file_name, &receipt.url).await;

        Ok(Some(MediaDelivery::Uploaded {
            file_name,
            url: receipt.url,
        }))
    }

    async fn handle_chat(&self, message: &InboundMessage, seed_text: &str) {
        let reply = self.chat_reply(message, seed_text).await;
        self.reply(message, &reply).await;
    }

    /// Ask the backend for a reply, falling back to [`CHAT_FALLBACK`].
    pub async fn chat_reply(&self, message: &InboundMessage, seed_text: &str) -> String {
        if seed_text.is_empty() {
            tracing::debug!(author = %message.author_label, "chat command without text");
            return CHAT_FALLBACK.to_string();
        }

        match self.backend.generate(seed_text, &message.author_label).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::warn!("backend returned empty text");
                CHAT_FALLBACK.to_string()
            }
            Err(error) => {
                tracing::warn!(%error, "backend generate failed");
                CHAT_FALLBACK.to_string()
            }
        }
    }

    async fn learn_from(&self, message: &InboundMessage) {
        if message.content.trim().is_empty() {
            return;
        }
        if let Err(error) = self.backend.learn(&message.content).await {
            tracing::debug!(%error, "backend learn failed");
        }
    }

    async fn reply(&self, message: &InboundMessage, text: &str) {
        if let Err(error) = self
            .messaging
            .send_text(&message.conversation_id, text)
            .await
        {
            tracing::error!(%error, channel = %message.conversation_id, "failed to send reply");
        }
    }
}
