//! In-process fakes for the messaging platform and the backend.
//!
//! Provides:
//! - [`FakeMessaging`]: records every send, counts uploads, can fail logins
//!   and uploads on demand
//! - [`StubBackend`]: a `ChatBackend` returning a fixed reply or error
//! - [`capture_logs`]: collects formatted log lines for the current thread

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;

use crate::backend::ChatBackend;
use crate::error::{BackendError, MessagingError, Result};
use crate::messaging::traits::{InboundStream, Messaging};
use crate::{InboundMessage, UploadReceipt};

/// Something the fake platform was asked to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text { target: String, text: String },
    File { target: String, file_name: String },
}

/// Messaging adapter that keeps everything in memory.
#[derive(Default)]
pub struct FakeMessaging {
    sent: Mutex<Vec<Sent>>,
    uploads: AtomicU32,
    fail_uploads: AtomicBool,
    start_attempts: AtomicU32,
    start_failures_left: Mutex<u32>,
    unreachable: AtomicBool,
    inbound: Mutex<Vec<InboundMessage>>,
}

impl FakeMessaging {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `failures` calls to `start()`.
    pub fn failing_starts(failures: u32) -> Self {
        let fake = Self::default();
        *fake.start_failures_left.lock().expect("lock poisoned") = failures;
        fake
    }

    /// Fail the first `failures` calls to `start()` with a connection error,
    /// as when the platform can't be reached at all.
    pub fn unreachable_starts(failures: u32) -> Self {
        let fake = Self::failing_starts(failures);
        fake.unreachable.store(true, Ordering::SeqCst);
        fake
    }

    /// Deliver `messages` on the stream returned by `start()`.
    pub fn with_inbound(messages: Vec<InboundMessage>) -> Self {
        let fake = Self::default();
        *fake.inbound.lock().expect("lock poisoned") = messages;
        fake
    }

    pub fn fail_uploads(&self) {
        self.fail_uploads.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().expect("lock poisoned").clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Text { text, .. } => Some(text),
                Sent::File { .. } => None,
            })
            .collect()
    }

    pub fn uploads(&self) -> u32 {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn start_attempts(&self) -> u32 {
        self.start_attempts.load(Ordering::SeqCst)
    }
}

impl Messaging for FakeMessaging {
    fn name(&self) -> &str {
        "fake"
    }

    async fn start(&self) -> Result<InboundStream> {
        self.start_attempts.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures_left = self.start_failures_left.lock().expect("lock poisoned");
            if *failures_left > 0 {
                *failures_left -= 1;
                if self.unreachable.load(Ordering::SeqCst) {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "platform unreachable",
                    )
                    .into());
                }
                return Err(MessagingError::SessionEnded("simulated login failure".into()).into());
            }
        }
        let messages = std::mem::take(&mut *self.inbound.lock().expect("lock poisoned"));
        Ok(Box::pin(futures::stream::iter(messages)))
    }

    async fn send_text(&self, target: &str, text: &str) -> Result<()> {
        self.sent.lock().expect("lock poisoned").push(Sent::Text {
            target: target.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_file(&self, target: &str, path: &Path, file_name: &str) -> Result<UploadReceipt> {
        // Let concurrent callers interleave like a real network call would.
        tokio::task::yield_now().await;

        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("upload rejected: 413 Payload Too Large").into());
        }
        tokio::fs::metadata(path).await?;

        let upload = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().expect("lock poisoned").push(Sent::File {
            target: target.to_string(),
            file_name: file_name.to_string(),
        });
        Ok(UploadReceipt {
            message_id: format!("msg-{upload}"),
            url: format!("https://cdn.example/{file_name}?upload={upload}"),
        })
    }
}

/// Backend returning a fixed reply (or a fixed rejection).
pub struct StubBackend {
    reply: std::result::Result<String, String>,
    generated: Mutex<Vec<(String, String)>>,
    learned: Mutex<Vec<String>>,
}

impl StubBackend {
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            reply: Ok(text.into()),
            generated: Mutex::new(Vec::new()),
            learned: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(message: impl Into<String>) -> Self {
        Self {
            reply: Err(message.into()),
            generated: Mutex::new(Vec::new()),
            learned: Mutex::new(Vec::new()),
        }
    }

    /// `(seed_text, author_label)` pairs passed to `generate`.
    pub fn generated(&self) -> Vec<(String, String)> {
        self.generated.lock().expect("lock poisoned").clone()
    }

    pub fn learned(&self) -> Vec<String> {
        self.learned.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl ChatBackend for StubBackend {
    async fn generate(&self, seed_text: &str, author_label: &str) -> Result<String> {
        self.generated
            .lock()
            .expect("lock poisoned")
            .push((seed_text.to_string(), author_label.to_string()));
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(message) => Err(BackendError::Rejected(message.clone()).into()),
        }
    }

    async fn learn(&self, message: &str) -> Result<String> {
        self.learned
            .lock()
            .expect("lock poisoned")
            .push(message.to_string());
        Ok("Message added successfully".into())
    }
}

/// Formatted log output captured by [`capture_logs`].
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().expect("lock poisoned").clone();
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Lines at `level` (e.g. `"WARN"`) containing `needle`.
    pub fn count(&self, level: &str, needle: &str) -> usize {
        self.lines()
            .iter()
            .filter(|line| line.contains(level) && line.contains(needle))
            .count()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("lock poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Record every event at debug and above until the guard drops.
///
/// The subscriber is thread-local, so use it from a current-thread runtime.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    (logs, tracing::subscriber::set_default(subscriber))
}
