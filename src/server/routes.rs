//! HTTP route handlers for the chat API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::channel::mpsc::{self, UnboundedSender};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;
use tracing::warn;

use crate::conversation::{Message, ProgressStep, SAMPLE_QUESTIONS, SampleCategory};
use crate::error::ChatError;
use crate::history::{RecordId, SavedHistoryRecord};
use crate::llm::StreamSink;

use super::state::{AppState, SharedSession};

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let static_files = ServeDir::new(&state.config.server.static_dir);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/conversation", get(current_conversation))
        .route("/api/samples", get(samples))
        .route("/api/ask", post(ask))
        .route("/api/save", post(save))
        .route("/api/clear", post(clear))
        .route("/api/history", get(list_history))
        .route("/api/history/{id}/load", post(load_history))
        .route("/api/history/{id}", put(rename_history).delete(delete_history))
        .fallback_service(static_files)
        .with_state(state)
}

/// Error body returned by every endpoint.
#[derive(Debug)]
pub struct ApiError(ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match &self.0 {
            ChatError::EmptyQuery | ChatError::EmptyName => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Api { .. } | ChatError::Network(_) => StatusCode::BAD_GATEWAY,
            ChatError::Config(_) | ChatError::Io(_) | ChatError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn record_id(raw: &str) -> Result<RecordId, ApiError> {
    RecordId::parse(raw).ok_or_else(|| ApiError(ChatError::NotFound(raw.to_string())))
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mentor-chat",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn samples() -> Json<&'static [SampleCategory]> {
    Json(SAMPLE_QUESTIONS)
}

/// Snapshot of the live conversation.
#[derive(Debug, Serialize)]
pub struct ConversationView {
    /// Messages in turn order.
    pub messages: Vec<Message>,
    /// Whether they match the last saved snapshot.
    pub saved: bool,
    /// Conversation label, if there is one yet.
    pub display_name: Option<String>,
    /// Record the conversation mirrors.
    pub record_id: Option<RecordId>,
}

impl ConversationView {
    fn of(session: &SharedSession) -> Self {
        Self {
            messages: session.messages().to_vec(),
            saved: session.is_saved(),
            display_name: session.display_name().map(ToString::to_string),
            record_id: session.record_id().cloned(),
        }
    }
}

async fn current_conversation(State(state): State<Arc<AppState>>) -> Json<ConversationView> {
    let session = state.session.lock().await;
    Json(ConversationView::of(&session))
}

/// Question submitted to `/api/ask`.
#[derive(Debug, Deserialize)]
pub struct AskRequest {
    /// The user's question.
    pub query: String,
}

/// Forwards session output to the event stream.
struct EventSink {
    tx: UnboundedSender<Event>,
}

impl EventSink {
    fn send<T: Serialize>(&self, name: &'static str, payload: &T) {
        match Event::default().event(name).json_data(payload) {
            // A closed channel only means the client went away; the reply is still recorded.
            Ok(event) => {
                let _ = self.tx.unbounded_send(event);
            }
            Err(err) => warn!("Cannot encode {name} event: {err}"),
        }
    }
}

impl StreamSink for EventSink {
    fn partial(&mut self, text: &str) {
        self.send("partial", &serde_json::json!({ "text": text }));
    }

    fn progress(&mut self, step: ProgressStep) {
        self.send(
            "progress",
            &serde_json::json!({ "percent": step.percent(), "label": step.label() }),
        );
    }
}

/// Answer a question as a server-sent event stream.
///
/// Emits `progress` and `partial` events, then exactly one `done` or `error`.
async fn ask(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ChatError::EmptyQuery.into());
    }

    let (tx, rx) = mpsc::unbounded();
    tokio::spawn(async move {
        let mut sink = EventSink { tx };
        let mut session = state.session.lock().await;
        match session.ask(&request.query, &mut sink).await {
            Ok(outcome) => sink.send(
                "done",
                &serde_json::json!({ "reply": outcome.reply, "auto_saved": outcome.auto_saved }),
            ),
            Err(err) => sink.send("error", &serde_json::json!({ "message": err.to_string() })),
        }
    });

    Ok(Sse::new(rx.map(Ok)).keep_alive(KeepAlive::default()))
}

/// Result of save and clear.
#[derive(Debug, Serialize)]
pub struct SaveResponse {
    /// Record written, if anything needed saving.
    pub record_id: Option<RecordId>,
}

async fn save(State(state): State<Arc<AppState>>) -> Result<Json<SaveResponse>, ApiError> {
    let record_id = state.session.lock().await.save().await?;
    Ok(Json(SaveResponse { record_id }))
}

async fn clear(State(state): State<Arc<AppState>>) -> Result<Json<SaveResponse>, ApiError> {
    let record_id = state.session.lock().await.clear().await?;
    Ok(Json(SaveResponse { record_id }))
}

/// Query string of `/api/history`.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of records; defaults to the configured list limit.
    pub limit: Option<usize>,
}

/// One row of the history listing.
#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    /// Record id.
    pub id: RecordId,
    /// First question.
    pub question: String,
    /// Full display name.
    pub display_name: String,
    /// Display name shortened for compact lists.
    pub label: String,
    /// Creation timestamp.
    pub timestamp: String,
    /// Number of saved messages.
    pub message_count: usize,
}

impl HistoryEntry {
    fn from_record(record: SavedHistoryRecord, label_max_chars: usize) -> Self {
        Self {
            label: record.short_label(label_max_chars),
            message_count: record.messages.len(),
            id: record.id,
            question: record.question,
            display_name: record.display_name,
            timestamp: record.timestamp,
        }
    }
}

async fn list_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let limit = query.limit.unwrap_or(state.config.history.list_limit);
    let records = state.session.lock().await.list_saved().await?;
    let label_max = state.config.history.label_max_chars;

    Ok(Json(
        records
            .into_iter()
            .take(limit)
            .map(|record| HistoryEntry::from_record(record, label_max))
            .collect(),
    ))
}

async fn load_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConversationView>, ApiError> {
    let id = record_id(&id)?;
    let mut session = state.session.lock().await;
    session.load_saved(&id).await?;
    Ok(Json(ConversationView::of(&session)))
}

/// New label for a saved record.
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    /// Display name to store.
    pub display_name: String,
}

async fn rename_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<RenameRequest>,
) -> Result<StatusCode, ApiError> {
    let id = record_id(&id)?;
    state
        .session
        .lock()
        .await
        .rename_saved(&id, &request.display_name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = record_id(&id)?;
    state.session.lock().await.delete_saved(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::config::AppConfig;
    use crate::conversation::ConversationSession;
    use crate::error::ChatResult;
    use crate::history::JsonDirHistoryStore;
    use crate::llm::{BackendFuture, CompletionBackend};
    use crate::server::state::SharedBackend;

    struct EchoBackend;

    impl CompletionBackend for EchoBackend {
        fn respond<'a>(
            &'a self,
            messages: &'a [Message],
            sink: &'a mut dyn StreamSink,
        ) -> BackendFuture<'a, ChatResult<String>> {
            Box::pin(async move {
                let question = messages.last().map(|m| m.content.clone()).unwrap_or_default();
                let reply = format!("Echo: {question}");
                sink.partial("Echo:");
                sink.partial(&reply);
                Ok(reply)
            })
        }
    }

    fn test_state(dir: &TempDir) -> Arc<AppState> {
        let store = JsonDirHistoryStore::new(dir.path()).unwrap();
        let session = ConversationSession::new(Box::new(EchoBackend) as SharedBackend, Arc::new(store));
        let config = AppConfig::default().with_history_dir(dir.path());
        AppState::with_session(session, config)
    }

    fn json_request(method: Method, uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: Method, uri: &str) -> Request<Body> {
        Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    async fn ask_question(state: &Arc<AppState>, query: &str) -> String {
        let response = create_router(state.clone())
            .oneshot(json_request(Method::POST, "/api/ask", &serde_json::json!({ "query": query })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body_text(response).await
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let response = create_router(test_state(&dir))
            .oneshot(empty_request(Method::GET, "/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_ask_streams_events() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let body = ask_question(&state, "What is a bean?").await;
        assert!(body.contains("event: progress"));
        assert!(body.contains("event: partial"));
        assert!(body.contains("Echo: What is a bean?"));
        assert!(body.contains("event: done"));
        assert!(!body.contains("event: error"));

        let session = state.session.lock().await;
        assert_eq!(session.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_samples_grouped_by_category() {
        let dir = TempDir::new().unwrap();
        let response = create_router(test_state(&dir))
            .oneshot(empty_request(Method::GET, "/api/samples"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let categories = body.as_array().unwrap();
        assert_eq!(categories.len(), SAMPLE_QUESTIONS.len());
        assert_eq!(categories[0]["title"], SAMPLE_QUESTIONS[0].title);
        assert_eq!(categories[1]["questions"][0], SAMPLE_QUESTIONS[1].questions[0]);
    }

    #[tokio::test]
    async fn test_blank_question_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let response = create_router(test_state(&dir))
            .oneshot(json_request(
                Method::POST,
                "/api/ask",
                &serde_json::json!({ "query": "   " }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "please enter a question");
    }

    #[tokio::test]
    async fn test_save_list_rename_delete() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        ask_question(&state, "How do I secure a REST endpoint?").await;

        let response = create_router(state.clone())
            .oneshot(empty_request(Method::POST, "/api/save"))
            .await
            .unwrap();
        let id = body_json(response).await["record_id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = create_router(state.clone())
            .oneshot(empty_request(Method::GET, "/api/history?limit=5"))
            .await
            .unwrap();
        let listing = body_json(response).await;
        assert_eq!(listing.as_array().unwrap().len(), 1);
        assert_eq!(listing[0]["id"], id.as_str());
        assert_eq!(listing[0]["label"], "How do I secure a REST endpoint?");
        assert_eq!(listing[0]["message_count"], 2);

        let response = create_router(state.clone())
            .oneshot(json_request(
                Method::PUT,
                &format!("/api/history/{id}"),
                &serde_json::json!({ "display_name": "REST security" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = create_router(state.clone())
            .oneshot(empty_request(Method::GET, "/api/conversation"))
            .await
            .unwrap();
        let view = body_json(response).await;
        assert_eq!(view["display_name"], "REST security");
        assert_eq!(view["saved"], true);

        let uri = format!("/api/history/{id}");
        let response = create_router(state.clone())
            .oneshot(empty_request(Method::DELETE, &uri))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = create_router(state.clone())
            .oneshot(empty_request(Method::DELETE, &uri))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_clear_auto_saves_and_load_restores() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        ask_question(&state, "Explain streams").await;

        let response = create_router(state.clone())
            .oneshot(empty_request(Method::POST, "/api/clear"))
            .await
            .unwrap();
        let id = body_json(response).await["record_id"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(state.session.lock().await.is_empty());

        let response = create_router(state.clone())
            .oneshot(empty_request(Method::POST, &format!("/api/history/{id}/load")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let view = body_json(response).await;
        assert_eq!(view["messages"].as_array().unwrap().len(), 2);
        assert_eq!(view["saved"], true);
    }

    #[tokio::test]
    async fn test_unknown_or_unsafe_ids_are_not_found() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let response = create_router(state.clone())
            .oneshot(empty_request(Method::POST, "/api/history/missing_20240101_000000/load"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = create_router(state)
            .oneshot(empty_request(Method::DELETE, "/api/history/..%2F..%2Fetc"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
