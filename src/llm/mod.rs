//! Chat completion backend: request encoding, `data:` line decoding, and the
//! async HTTP client that ties them together.

pub mod client;
pub mod sink;
pub mod sse;
pub(crate) mod wire;

pub use client::ChatClient;
pub use sink::{NullSink, StreamSink};
pub use sse::{EventLineDecoder, StreamEvent};

use std::future::Future;
use std::pin::Pin;

use crate::conversation::Message;
use crate::error::ChatResult;

/// Boxed future returned by [`CompletionBackend`].
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Something that turns a prompt into an assistant reply.
pub trait CompletionBackend: Send + Sync {
    /// Produce a reply to `messages`, reporting cumulative text to `sink`.
    ///
    /// On failure, any text already passed to `sink` is the partial reply.
    fn respond<'a>(
        &'a self,
        messages: &'a [Message],
        sink: &'a mut dyn StreamSink,
    ) -> BackendFuture<'a, ChatResult<String>>;
}

impl<T: CompletionBackend + ?Sized> CompletionBackend for Box<T> {
    fn respond<'a>(
        &'a self,
        messages: &'a [Message],
        sink: &'a mut dyn StreamSink,
    ) -> BackendFuture<'a, ChatResult<String>> {
        (**self).respond(messages, sink)
    }
}
