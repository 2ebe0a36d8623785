//! Application state shared across all request handlers.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::config::AppConfig;
use crate::conversation::ConversationSession;
use crate::error::ChatResult;
use crate::history::JsonDirHistoryStore;
use crate::llm::{ChatClient, CompletionBackend};

/// Backend type held by the server session.
pub type SharedBackend = Box<dyn CompletionBackend>;

/// Session type held by the server.
pub type SharedSession = ConversationSession<SharedBackend>;

/// Shared application state.
pub struct AppState {
    /// The single conversation. Held for the whole of an `ask`.
    pub session: Mutex<SharedSession>,
    /// Resolved configuration.
    pub config: AppConfig,
}

impl AppState {
    /// Build the LLM client, the history store and an empty session.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the history
    /// directory cannot be created.
    pub fn new(config: AppConfig) -> ChatResult<Arc<Self>> {
        config.validate()?;
        let client = ChatClient::new(config.llm.clone())?;
        let store = JsonDirHistoryStore::new(config.history.dir.clone())?;
        info!(
            model = %config.llm.model,
            history = %store.dir().display(),
            stream = config.llm.stream,
            "Session ready"
        );

        let session = ConversationSession::new(Box::new(client) as SharedBackend, Arc::new(store))
            .with_context_messages(config.llm.context_messages);
        Ok(Self::with_session(session, config))
    }

    /// Wrap an existing session.
    #[must_use]
    pub fn with_session(session: SharedSession, config: AppConfig) -> Arc<Self> {
        Arc::new(Self {
            session: Mutex::new(session),
            config,
        })
    }
}
