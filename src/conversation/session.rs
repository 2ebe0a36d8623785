//! The live conversation and the orchestration around it.

use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::error::{ChatError, ChatResult};
use crate::history::{HistoryStore, RecordId, SavedHistoryRecord};
use crate::llm::{CompletionBackend, StreamSink};

use super::message::{Message, first_question};
use super::progress::ProgressStep;

/// Number of trailing messages sent as the prompt.
pub const DEFAULT_CONTEXT_MESSAGES: usize = 20;

/// Result of a successful [`ConversationSession::ask`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AskOutcome {
    /// Full assistant reply, as appended to the conversation.
    pub reply: String,
    /// Record written when the question started a new thread.
    pub auto_saved: Option<RecordId>,
}

/// A single chat session backed by a history store.
///
/// `saved` is true only while the messages match the last persisted
/// snapshot. Any operation that would drop unsaved turns (a new question,
/// `clear`, `load`) writes them first, and does nothing else if that write
/// fails.
pub struct ConversationSession<B> {
    backend: B,
    store: Arc<dyn HistoryStore>,
    messages: Vec<Message>,
    saved: bool,
    created_at: DateTime<Local>,
    display_name: Option<String>,
    record_id: Option<RecordId>,
    context_messages: usize,
}

impl<B: CompletionBackend> ConversationSession<B> {
    /// Start an empty session.
    pub fn new(backend: B, store: Arc<dyn HistoryStore>) -> Self {
        Self {
            backend,
            store,
            messages: Vec::new(),
            saved: false,
            created_at: Local::now(),
            display_name: None,
            record_id: None,
            context_messages: DEFAULT_CONTEXT_MESSAGES,
        }
    }

    /// Limit the prompt to the last `count` messages (at least one).
    #[must_use]
    pub fn with_context_messages(mut self, count: usize) -> Self {
        self.context_messages = count.max(1);
        self
    }

    /// Messages in turn order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Whether there are no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether the messages match the last persisted snapshot.
    #[must_use]
    pub const fn is_saved(&self) -> bool {
        self.saved
    }

    /// When this conversation started (or was originally saved, once loaded).
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    /// Label of the conversation: the record's display name when loaded or
    /// renamed, otherwise the first question.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .or_else(|| first_question(&self.messages))
    }

    /// Record this conversation mirrors, if any.
    #[must_use]
    pub const fn record_id(&self) -> Option<&RecordId> {
        self.record_id.as_ref()
    }

    /// Completion backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Completion backend, mutably (for toggling streaming).
    pub const fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Ask a question and append the exchange.
    ///
    /// A question that is not a repeat of an earlier user turn, asked while
    /// the conversation has unsaved turns, auto-saves them and starts a new
    /// thread. The prompt is the trailing window of the conversation,
    /// including the new question.
    ///
    /// # Errors
    /// [`ChatError::EmptyQuery`] for blank input (nothing is changed), an
    /// auto-save failure (nothing is changed), or the backend's error. In the
    /// last case both messages are still appended and the assistant turn
    /// holds the partial reply followed by the error text.
    pub async fn ask(&mut self, query: &str, sink: &mut dyn StreamSink) -> ChatResult<AskOutcome> {
        if query.trim().is_empty() {
            return Err(ChatError::EmptyQuery);
        }
        sink.progress(ProgressStep::Analyzing);

        let auto_saved = if self.starts_new_thread(query) {
            let id = self.auto_save().await?;
            self.reset();
            id
        } else {
            None
        };

        self.messages.push(Message::user(query));
        self.saved = false;
        sink.progress(ProgressStep::Generating);

        let start = self.messages.len().saturating_sub(self.context_messages);
        let prompt = &self.messages[start..];
        sink.progress(ProgressStep::Securing);
        debug!(turns = prompt.len(), "Prompt assembled");
        sink.progress(ProgressStep::Writing);

        let mut recorder = RecordingSink {
            inner: sink,
            text: String::new(),
        };
        let result = self.backend.respond(prompt, &mut recorder).await;
        let RecordingSink { inner: sink, text: partial } = recorder;

        match result {
            Ok(reply) => {
                self.messages.push(Message::assistant(reply.clone()));
                sink.progress(ProgressStep::Completed);
                info!(chars = reply.chars().count(), "Reply recorded");
                Ok(AskOutcome { reply, auto_saved })
            }
            Err(err) => {
                warn!("Reply failed: {err}");
                let content = if partial.is_empty() {
                    err.to_string()
                } else {
                    format!("{partial}\n\n{err}")
                };
                self.messages.push(Message::assistant(content));
                Err(err)
            }
        }
    }

    /// Persist the conversation.
    ///
    /// Returns `None` without touching the store when it is already saved or
    /// has no user turn.
    ///
    /// # Errors
    /// Returns an error if the store write fails; the session stays dirty.
    pub async fn save(&mut self) -> ChatResult<Option<RecordId>> {
        if self.saved {
            return Ok(None);
        }
        let Some(question) = first_question(&self.messages) else {
            return Ok(None);
        };
        let question = question.to_string();

        let id = self.store.save(&question, &self.messages).await?;
        info!("Conversation saved as {id}");
        self.saved = true;
        self.display_name = Some(question);
        self.record_id = Some(id.clone());
        Ok(Some(id))
    }

    /// Save before the conversation is dropped; same rule as [`Self::save`].
    ///
    /// # Errors
    /// Returns an error if the store write fails.
    pub async fn auto_save(&mut self) -> ChatResult<Option<RecordId>> {
        let id = self.save().await?;
        if let Some(id) = &id {
            debug!("Auto-saved previous conversation as {id}");
        }
        Ok(id)
    }

    /// Auto-save, then reset to an empty conversation.
    ///
    /// # Errors
    /// Returns an error if the auto-save fails; the conversation is kept.
    pub async fn clear(&mut self) -> ChatResult<Option<RecordId>> {
        let id = self.auto_save().await?;
        self.reset();
        Ok(id)
    }

    /// Auto-save, then replace the conversation with `record`.
    ///
    /// # Errors
    /// Returns an error if the auto-save fails; the conversation is kept.
    pub async fn load(&mut self, record: SavedHistoryRecord) -> ChatResult<Option<RecordId>> {
        let id = self.auto_save().await?;
        self.created_at = record.created_at().unwrap_or_else(Local::now);
        self.messages = record.messages;
        self.display_name = Some(record.display_name);
        info!("Loaded conversation {}", record.id);
        self.record_id = Some(record.id);
        self.saved = true;
        Ok(id)
    }

    /// Fetch a record from the store and [`Self::load`] it.
    ///
    /// # Errors
    /// [`ChatError::NotFound`] for unknown ids, or any load error.
    pub async fn load_saved(&mut self, id: &RecordId) -> ChatResult<Option<RecordId>> {
        let record = self.store.get(id).await?;
        self.load(record).await
    }

    /// Saved conversations, newest first.
    ///
    /// # Errors
    /// Returns an error if the history directory cannot be read.
    pub async fn list_saved(&self) -> ChatResult<Vec<SavedHistoryRecord>> {
        self.store.list().await
    }

    /// Change a saved record's display name.
    ///
    /// # Errors
    /// [`ChatError::EmptyName`] for a blank name, [`ChatError::NotFound`] for
    /// unknown ids, or a persistence error.
    pub async fn rename_saved(&mut self, id: &RecordId, display_name: &str) -> ChatResult<()> {
        let name = display_name.trim();
        if name.is_empty() {
            return Err(ChatError::EmptyName);
        }
        self.store.rename(id, name).await?;
        if self.record_id.as_ref() == Some(id) {
            self.display_name = Some(name.to_string());
        }
        Ok(())
    }

    /// Delete a saved record.
    ///
    /// Deleting the record this session mirrors leaves the conversation on
    /// screen but unsaved.
    ///
    /// # Errors
    /// [`ChatError::NotFound`] if it is already gone, or a persistence error.
    pub async fn delete_saved(&mut self, id: &RecordId) -> ChatResult<()> {
        self.store.delete(id).await?;
        if self.record_id.as_ref() == Some(id) {
            self.record_id = None;
            self.saved = false;
        }
        info!("Deleted conversation {id}");
        Ok(())
    }

    /// Repeats of an earlier user turn continue the thread; anything else
    /// asked on unsaved turns starts over.
    fn starts_new_thread(&self, query: &str) -> bool {
        !self.messages.is_empty()
            && !self.saved
            && !self
                .messages
                .iter()
                .any(|message| message.is_user() && message.content == query)
    }

    fn reset(&mut self) {
        self.messages.clear();
        self.saved = false;
        self.created_at = Local::now();
        self.display_name = None;
        self.record_id = None;
    }
}

/// Forwards to the caller's sink while remembering the latest partial text.
struct RecordingSink<'a> {
    inner: &'a mut dyn StreamSink,
    text: String,
}

impl StreamSink for RecordingSink<'_> {
    fn partial(&mut self, text: &str) {
        self.text.clear();
        self.text.push_str(text);
        self.inner.partial(text);
    }

    fn complete(&mut self, text: &str) {
        self.inner.complete(text);
    }

    fn progress(&mut self, step: ProgressStep) {
        self.inner.progress(step);
    }
}
