//! Async client for the hosted chat completion endpoint.

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ACCEPT, HeaderValue};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::conversation::Message;
use crate::error::{ChatError, ChatResult};

use super::sink::StreamSink;
use super::sse::{EventLineDecoder, StreamEvent};
use super::wire::{CompletionRequest, CompletionResponse};
use super::{BackendFuture, CompletionBackend};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Chat completion client.
///
/// Streaming and whole-response modes share the same request body; only the
/// `stream` flag and the timeout differ.
#[derive(Clone, Debug)]
pub struct ChatClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl ChatClient {
    /// Build a client for `config`.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the HTTP client cannot be built.
    pub fn new(config: LlmConfig) -> ChatResult<Self> {
        if config.api_key.expose().trim().is_empty() {
            return Err(ChatError::Config("API key is empty".to_string()));
        }
        url::Url::parse(&config.endpoint)?;

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("mentor-chat/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http, config })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Whether replies are streamed.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.config.stream
    }

    /// Switch between streamed and whole replies.
    pub const fn set_streaming(&mut self, stream: bool) {
        self.config.stream = stream;
    }

    /// Stream a reply, reporting cumulative text to `sink` after each delta.
    ///
    /// Stops at the `[DONE]` sentinel even if the connection stays open.
    ///
    /// # Errors
    /// Returns [`ChatError::Api`] for non-success statuses and
    /// [`ChatError::Network`] for transport failures or timeouts. Text
    /// delivered before a failure has already reached `sink`.
    pub async fn stream(&self, messages: &[Message], sink: &mut dyn StreamSink) -> ChatResult<String> {
        let response = self.post(messages, true, self.config.stream_timeout).await?;
        let mut body = response.bytes_stream();
        let mut decoder = EventLineDecoder::new();
        let mut text = String::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            if apply_events(decoder.push(&chunk), &mut text, sink) {
                break;
            }
        }
        if !decoder.is_finished() {
            debug!("Stream closed without [DONE] sentinel");
            apply_events(decoder.finish(), &mut text, sink);
        }

        sink.complete(&text);
        Ok(text)
    }

    /// Fetch a whole reply; `sink` sees it once as a single partial.
    ///
    /// # Errors
    /// Returns [`ChatError::Api`] for non-success statuses or bodies without
    /// content, and [`ChatError::Network`] for transport failures.
    pub async fn complete(&self, messages: &[Message], sink: &mut dyn StreamSink) -> ChatResult<String> {
        let response = self
            .post(messages, false, self.config.completion_timeout)
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        let content = serde_json::from_str::<CompletionResponse>(&body)
            .ok()
            .and_then(CompletionResponse::into_content);
        let Some(text) = content else {
            warn!("Completion body without content (status {status})");
            return Err(ChatError::Api { status, body });
        };

        if !text.is_empty() {
            sink.partial(&text);
        }
        sink.complete(&text);
        Ok(text)
    }

    async fn post(&self, messages: &[Message], stream: bool, timeout: Duration) -> ChatResult<reqwest::Response> {
        let request = CompletionRequest::new(&self.config, messages, stream);
        debug!(
            model = %self.config.model,
            turns = messages.len(),
            stream,
            "Sending chat completion request"
        );

        let mut builder = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(self.config.api_key.expose())
            .timeout(timeout)
            .json(&request);
        if stream {
            builder = builder.header(ACCEPT, HeaderValue::from_static("text/event-stream"));
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    warn!("Could not read error body for status {status}: {err}");
                    format!("<unreadable body: {err}>")
                }
            };
            warn!("Chat completion failed with status {status}");
            return Err(ChatError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// Append deltas to `text`; returns true once the end sentinel was seen.
fn apply_events(events: Vec<StreamEvent>, text: &mut String, sink: &mut dyn StreamSink) -> bool {
    for event in events {
        match event {
            StreamEvent::Delta(delta) => {
                text.push_str(&delta);
                sink.partial(text);
            }
            StreamEvent::Done => return true,
        }
    }
    false
}

impl CompletionBackend for ChatClient {
    fn respond<'a>(
        &'a self,
        messages: &'a [Message],
        sink: &'a mut dyn StreamSink,
    ) -> BackendFuture<'a, ChatResult<String>> {
        Box::pin(async move {
            if self.config.stream {
                self.stream(messages, sink).await
            } else {
                self.complete(messages, sink).await
            }
        })
    }
}
