//! Messaging trait and dynamic dispatch companion.

use crate::error::Result;
use crate::{InboundMessage, UploadReceipt};
use futures::Stream;
use std::path::Path;
use std::pin::Pin;

/// Message stream type.
pub type InboundStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// Static trait for messaging adapters.
/// Use this for type-safe implementations.
pub trait Messaging: Send + Sync + 'static {
    /// Unique name for this adapter.
    fn name(&self) -> &str;

    /// Log in and return the inbound message stream.
    ///
    /// Resolves only once the session is live; any login or network failure
    /// is returned as an error so the caller can retry.
    fn start(&self) -> impl std::future::Future<Output = Result<InboundStream>> + Send;

    /// Send plain text to a channel.
    fn send_text(
        &self,
        target: &str,
        text: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Upload a local file to a channel and return its hosted URL.
    fn send_file(
        &self,
        target: &str,
        path: &Path,
        file_name: &str,
    ) -> impl std::future::Future<Output = Result<UploadReceipt>> + Send;

    /// Graceful shutdown.
    fn shutdown(&self) -> impl std::future::Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Dynamic trait for runtime polymorphism.
/// Use this when you need `Arc<dyn MessagingDyn>` for storing different adapters.
pub trait MessagingDyn: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn start<'a>(
        &'a self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<InboundStream>> + Send + 'a>>;

    fn send_text<'a>(
        &'a self,
        target: &'a str,
        text: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;

    fn send_file<'a>(
        &'a self,
        target: &'a str,
        path: &'a Path,
        file_name: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<UploadReceipt>> + Send + 'a>>;

    fn shutdown<'a>(&'a self) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;
}

/// Blanket implementation: any type implementing Messaging automatically implements MessagingDyn.
impl<T: Messaging> MessagingDyn for T {
    fn name(&self) -> &str {
        Messaging::name(self)
    }

    fn start<'a>(
        &'a self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<InboundStream>> + Send + 'a>> {
        Box::pin(Messaging::start(self))
    }

    fn send_text<'a>(
        &'a self,
        target: &'a str,
        text: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Messaging::send_text(self, target, text))
    }

    fn send_file<'a>(
        &'a self,
        target: &'a str,
        path: &'a Path,
        file_name: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<UploadReceipt>> + Send + 'a>> {
        Box::pin(Messaging::send_file(self, target, path, file_name))
    }

    fn shutdown<'a>(&'a self) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Messaging::shutdown(self))
    }
}
