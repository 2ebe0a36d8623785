//! Request and response bodies of the OpenAI-compatible chat completion API.

use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::conversation::Message;

#[derive(Debug, Serialize)]
pub(crate) struct WireMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<WireMessage<'a>>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stream: bool,
}

impl<'a> CompletionRequest<'a> {
    /// System prompt first (when configured), then the conversation turns.
    pub(crate) fn new(config: &'a LlmConfig, messages: &'a [Message], stream: bool) -> Self {
        let system = config.system_prompt.as_deref().map(|content| WireMessage {
            role: "system",
            content,
        });
        let turns = messages.iter().map(|message| WireMessage {
            role: message.role.as_str(),
            content: &message.content,
        });

        Self {
            model: &config.model,
            messages: system.into_iter().chain(turns).collect(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            stream,
        }
    }
}

/// One streamed `data:` payload.
#[derive(Debug, Deserialize)]
pub(crate) struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

impl StreamChunk {
    /// Text delta of the first choice; `None` for empty or role-only chunks.
    pub(crate) fn into_delta(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .filter(|content| !content.is_empty())
    }
}

/// Non-streamed response body.
#[derive(Debug, Deserialize)]
pub(crate) struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl CompletionResponse {
    /// `choices[0].message.content`.
    pub(crate) fn into_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
    }
}
