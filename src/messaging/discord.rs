//! Discord messaging adapter using serenity.
//!
//! `start()` first checks the token with one REST call, so a bad token or an
//! unreachable API fails fast as an error. Only then does it run the gateway
//! client on a background task and wait for the `ready` event, bounded by
//! [`READY_TIMEOUT`]. serenity retries a failed shard boot internally without
//! ever returning, so the timeout turns a gateway that never comes up into an
//! error as well. Once connected, serenity keeps the shard alive and
//! reconnects on its own.

use crate::error::MessagingError;
use crate::messaging::traits::{InboundStream, Messaging};
use crate::{InboundMessage, UploadReceipt};

use anyhow::Context as _;
use arc_swap::ArcSwapOption;
use serenity::Client;
use serenity::all::{
    ChannelId, Context, CreateAttachment, CreateMessage, EventHandler, GatewayIntents, Http,
    Message, Ready,
};
use serenity::gateway::ShardManager;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Discord rejects messages longer than this many characters.
const DISCORD_MESSAGE_LIMIT: usize = 2000;

/// How long a started gateway client may take to report `ready`.
pub const READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Gateway event handler forwarding messages into the inbound channel.
struct Handler {
    inbound_tx: mpsc::Sender<InboundMessage>,
    ready_tx: std::sync::Mutex<Option<oneshot::Sender<()>>>,
}

#[serenity::async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(
            user = %ready.user.name,
            guilds = ready.guilds.len(),
            "discord gateway ready"
        );

        let ready_tx = self
            .ready_tx
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(ready_tx) = ready_tx {
            let _ = ready_tx.send(());
        }
    }

    async fn message(&self, ctx: Context, message: Message) {
        let from_self = message.author.id == ctx.cache.current_user().id;
        let timestamp = chrono::DateTime::from_timestamp(message.timestamp.unix_timestamp(), 0)
            .unwrap_or_else(chrono::Utc::now);

        let inbound = InboundMessage {
            id: message.id.to_string(),
            source: "discord".into(),
            conversation_id: message.channel_id.to_string(),
            sender_id: message.author.id.to_string(),
            author_label: message.author.name.clone(),
            content: message.content.clone(),
            from_self,
            timestamp,
        };

        if self.inbound_tx.send(inbound).await.is_err() {
            tracing::debug!("inbound receiver dropped, discarding discord message");
        }
    }
}

/// Discord adapter state.
pub struct DiscordAdapter {
    token: String,
    /// REST client of the live session. Empty until `start()` succeeds.
    http: ArcSwapOption<Http>,
    shard_manager: ArcSwapOption<ShardManager>,
}

impl DiscordAdapter {
    /// Create a new Discord adapter. Nothing connects until `start()`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            http: ArcSwapOption::empty(),
            shard_manager: ArcSwapOption::empty(),
        }
    }

    fn http(&self) -> Result<Arc<Http>, MessagingError> {
        self.http.load_full().ok_or(MessagingError::NotConnected)
    }
}

fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::DIRECT_MESSAGES
}

impl Messaging for DiscordAdapter {
    fn name(&self) -> &str {
        "discord"
    }

    async fn start(&self) -> crate::Result<InboundStream> {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (ready_tx, ready_rx) = oneshot::channel();

        let handler = Handler {
            inbound_tx,
            ready_tx: std::sync::Mutex::new(Some(ready_tx)),
        };

        let mut client = Client::builder(&self.token, intents())
            .event_handler(handler)
            .await
            .context("failed to build discord client")?;

        let user = verify_login(&client.http).await?;
        tracing::debug!(user = %user.name, "discord token accepted");

        let http = client.http.clone();
        let shard_manager = client.shard_manager.clone();
        let mut session = tokio::spawn(async move { client.start().await });

        if let Err(error) = wait_for_ready(ready_rx, &mut session, READY_TIMEOUT).await {
            shard_manager.shutdown_all().await;
            session.abort();
            return Err(error.into());
        }

        self.http.store(Some(http));
        self.shard_manager.store(Some(shard_manager));

        tokio::spawn(async move {
            match session.await {
                Ok(Ok(())) => tracing::info!("discord client stopped"),
                Ok(Err(error)) => tracing::error!(%error, "discord client exited with error"),
                Err(error) => tracing::error!(%error, "discord client task failed"),
            }
        });

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(
            inbound_rx,
        )))
    }

    async fn send_text(&self, target: &str, text: &str) -> crate::Result<()> {
        let http = self.http()?;
        let channel_id = parse_channel_id(target)?;

        for chunk in split_message(text, DISCORD_MESSAGE_LIMIT) {
            channel_id
                .say(&http, chunk)
                .await
                .context("failed to send discord message")?;
        }
        Ok(())
    }

    async fn send_file(
        &self,
        target: &str,
        path: &Path,
        file_name: &str,
    ) -> crate::Result<UploadReceipt> {
        let http = self.http()?;
        let channel_id = parse_channel_id(target)?;

        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read media file {}", path.display()))?;
        let attachment = CreateAttachment::bytes(data, file_name);

        let message = channel_id
            .send_message(&http, CreateMessage::new().add_file(attachment))
            .await
            .context("failed to upload discord attachment")?;

        let url = message
            .attachments
            .first()
            .map(|attachment| attachment.url.clone())
            .ok_or_else(|| MessagingError::MissingAttachment {
                file_name: file_name.to_string(),
            })?;

        Ok(UploadReceipt {
            message_id: message.id.to_string(),
            url,
        })
    }

    async fn shutdown(&self) -> crate::Result<()> {
        if let Some(shard_manager) = self.shard_manager.swap(None) {
            shard_manager.shutdown_all().await;
        }
        self.http.store(None);
        tracing::info!("discord adapter shut down");
        Ok(())
    }
}

/// One REST round-trip with the bot token. Fails fast on a rejected token
/// and on an unreachable API alike.
async fn verify_login(http: &Http) -> Result<serenity::model::user::CurrentUser, MessagingError> {
    http.get_current_user()
        .await
        .map_err(|error| MessagingError::SessionEnded(format!("login check failed: {error}")))
}

/// Wait for the gateway `ready` signal, the client task ending, or `timeout`,
/// whichever comes first.
async fn wait_for_ready(
    ready_rx: oneshot::Receiver<()>,
    session: &mut JoinHandle<serenity::Result<()>>,
    timeout: Duration,
) -> Result<(), MessagingError> {
    tokio::select! {
        ready = ready_rx => {
            ready.map_err(|_| MessagingError::SessionEnded("ready signal dropped".into()))
        }
        result = &mut *session => {
            let reason = match result {
                Ok(Ok(())) => "client stopped".to_string(),
                Ok(Err(error)) => error.to_string(),
                Err(error) => error.to_string(),
            };
            Err(MessagingError::SessionEnded(reason))
        }
        _ = tokio::time::sleep(timeout) => {
            Err(MessagingError::SessionEnded(format!(
                "no ready event within {}s",
                timeout.as_secs()
            )))
        }
    }
}

fn parse_channel_id(target: &str) -> Result<ChannelId, MessagingError> {
    target
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(ChannelId::new)
        .ok_or_else(|| MessagingError::InvalidChannel(target.to_string()))
}

/// Split text into chunks of at most `max_len` bytes, preferring newline and
/// space boundaries.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Walk back to a valid char boundary before slicing
        let mut safe_max = max_len.min(remaining.len());
        while !remaining.is_char_boundary(safe_max) {
            safe_max -= 1;
        }

        let split_at = remaining[..safe_max]
            .rfind('\n')
            .or_else(|| remaining[..safe_max].rfind(' '))
            .filter(|index| *index > 0)
            .unwrap_or(safe_max);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_message("hello", 2000), vec!["hello".to_string()]);
    }

    #[test]
    fn long_text_splits_on_whitespace() {
        let text = "aaaa bbbb cccc";
        let chunks = split_message(text, 9);
        assert_eq!(chunks, vec!["aaaa".to_string(), "bbbb cccc".to_string()]);
    }

    #[test]
    fn split_respects_char_boundaries() {
        let text = "ééééé";
        let chunks = split_message(text, 3);
        assert!(chunks.iter().all(|chunk| chunk.len() <= 3));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn channel_ids_must_be_nonzero_integers() {
        assert_eq!(
            parse_channel_id("123456789").expect("valid id").get(),
            123456789
        );
        assert!(parse_channel_id("0").is_err());
        assert!(parse_channel_id("general").is_err());
    }

    #[tokio::test]
    async fn login_check_fails_fast_when_api_is_unreachable() {
        // Bind then drop to get a local port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind local port");
        let address = listener.local_addr().expect("local address");
        drop(listener);

        let http = serenity::http::HttpBuilder::new("MTIz.abc.def")
            .proxy(format!("http://{address}"))
            .ratelimiter_disabled(true)
            .build();

        let error = tokio::time::timeout(Duration::from_secs(10), verify_login(&http))
            .await
            .expect("login check must not hang")
            .expect_err("unreachable api must fail");
        assert!(matches!(error, MessagingError::SessionEnded(_)), "{error:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn gateway_that_never_readies_times_out() {
        let (_ready_tx, ready_rx) = oneshot::channel();
        let mut session = tokio::spawn(std::future::pending::<serenity::Result<()>>());

        let started = tokio::time::Instant::now();
        let error = wait_for_ready(ready_rx, &mut session, READY_TIMEOUT)
            .await
            .expect_err("a silent gateway must not count as connected");
        session.abort();

        assert!(matches!(error, MessagingError::SessionEnded(_)), "{error:?}");
        assert!(started.elapsed() >= READY_TIMEOUT);
    }

    #[tokio::test]
    async fn client_exit_before_ready_is_an_error() {
        let (_ready_tx, ready_rx) = oneshot::channel();
        let mut session = tokio::spawn(async { Err::<(), _>(serenity::Error::Other("invalid token")) });

        let error = wait_for_ready(ready_rx, &mut session, READY_TIMEOUT)
            .await
            .expect_err("client exit must fail the start");
        assert!(error.to_string().contains("invalid token"), "{error}");
    }

    #[tokio::test]
    async fn ready_signal_completes_the_wait() {
        let (ready_tx, ready_rx) = oneshot::channel();
        let mut session = tokio::spawn(std::future::pending::<serenity::Result<()>>());
        ready_tx.send(()).expect("receiver alive");

        wait_for_ready(ready_rx, &mut session, READY_TIMEOUT)
            .await
            .expect("ready should complete the wait");
        session.abort();
    }

    #[tokio::test]
    async fn sending_before_start_is_not_connected() {
        let adapter = DiscordAdapter::new("token");
        let error = Messaging::send_text(&adapter, "123", "hi")
            .await
            .expect_err("send without a session must fail");
        assert!(error.to_string().contains("not connected"));
    }
}
