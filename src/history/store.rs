//! JSON-file-per-record conversation history store.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use chrono::Local;
use serde_json::{Map, Value};
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::conversation::Message;
use crate::error::{ChatError, ChatResult};

use super::record::{
    FILE_STAMP_FORMAT, RecordDocument, RecordId, SavedHistoryRecord, StoredDocument,
    format_timestamp,
};
use super::slug::Slugger;

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Highest numeric suffix tried when a file name is already taken.
const MAX_NAME_SUFFIX: u32 = 100;

/// Trait for conversation history storage.
pub trait HistoryStore: Send + Sync {
    /// Persist a snapshot keyed by its first question and return the new id.
    fn save<'a>(
        &'a self,
        question: &'a str,
        messages: &'a [Message],
    ) -> StoreFuture<'a, ChatResult<RecordId>>;

    /// All readable records, newest first. Unreadable files are skipped.
    fn list(&self) -> StoreFuture<'_, ChatResult<Vec<SavedHistoryRecord>>>;

    /// Load one record.
    fn get<'a>(&'a self, id: &'a RecordId) -> StoreFuture<'a, ChatResult<SavedHistoryRecord>>;

    /// Replace the display name, leaving every other field untouched.
    fn rename<'a>(
        &'a self,
        id: &'a RecordId,
        display_name: &'a str,
    ) -> StoreFuture<'a, ChatResult<()>>;

    /// Remove a record.
    fn delete<'a>(&'a self, id: &'a RecordId) -> StoreFuture<'a, ChatResult<()>>;
}

/// Stores each conversation as `<dir>/<slug>_<YYYYMMDD_HHMMSS>.json`.
pub struct JsonDirHistoryStore {
    dir: PathBuf,
    slugger: Slugger,
}

impl JsonDirHistoryStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    ///
    /// # Errors
    /// Returns an error if the slug patterns fail to compile.
    pub fn new(dir: impl Into<PathBuf>) -> ChatResult<Self> {
        let slugger =
            Slugger::new().map_err(|err| ChatError::Config(format!("slug pattern: {err}")))?;
        Ok(Self {
            dir: dir.into(),
            slugger,
        })
    }

    /// Directory holding the records.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &RecordId) -> PathBuf {
        self.dir.join(id.file_name())
    }

    /// Create `<base>.json`, or `<base>_2.json`, `<base>_3.json`... if taken.
    async fn write_new(&self, base: &str, body: &[u8]) -> ChatResult<RecordId> {
        for attempt in 1..=MAX_NAME_SUFFIX {
            let stem = if attempt == 1 {
                base.to_string()
            } else {
                format!("{base}_{attempt}")
            };
            let Some(id) = RecordId::parse(&stem) else {
                return Err(ChatError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unusable record name: {stem}"),
                )));
            };

            let path = self.path_for(&id);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    write_or_discard(file, &path, body).await?;
                    return Ok(id);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    debug!("history file {} exists, trying next suffix", path.display());
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(ChatError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free file name for {base}"),
        )))
    }
}

/// Write `body` into a freshly created file; on failure the partial file is removed.
async fn write_or_discard<W>(mut file: W, path: &Path, body: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = match file.write_all(body).await {
        Ok(()) => file.flush().await,
        Err(err) => Err(err),
    };
    drop(file);

    if let Err(err) = written {
        if let Err(cleanup) = fs::remove_file(path).await {
            warn!("could not remove partial history file {}: {cleanup}", path.display());
        }
        return Err(err);
    }
    Ok(())
}

impl HistoryStore for JsonDirHistoryStore {
    fn save<'a>(
        &'a self,
        question: &'a str,
        messages: &'a [Message],
    ) -> StoreFuture<'a, ChatResult<RecordId>> {
        Box::pin(async move {
            fs::create_dir_all(&self.dir).await?;

            let now = Local::now();
            let timestamp = format_timestamp(&now);
            let document = RecordDocument {
                question,
                display_name: question,
                timestamp: &timestamp,
                chat_history: messages,
            };
            let body = serde_json::to_vec_pretty(&document)?;

            let base = format!(
                "{}_{}",
                self.slugger.slugify(question),
                now.format(FILE_STAMP_FORMAT)
            );
            let id = self.write_new(&base, &body).await?;

            info!("Saved conversation {} ({} messages)", id, messages.len());
            Ok(id)
        })
    }

    fn list(&self) -> StoreFuture<'_, ChatResult<Vec<SavedHistoryRecord>>> {
        Box::pin(async move {
            let mut entries = match fs::read_dir(&self.dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(err) => return Err(err.into()),
            };

            let mut records = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                    continue;
                }
                let Some(id) = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(RecordId::parse)
                else {
                    continue;
                };

                match read_record(&path, id).await {
                    Ok(record) => records.push(record),
                    Err(err) => warn!("Skipping unreadable history file {}: {err}", path.display()),
                }
            }

            records.sort_by(|a, b| {
                b.timestamp
                    .cmp(&a.timestamp)
                    .then_with(|| b.id.cmp(&a.id))
            });
            Ok(records)
        })
    }

    fn get<'a>(&'a self, id: &'a RecordId) -> StoreFuture<'a, ChatResult<SavedHistoryRecord>> {
        Box::pin(async move {
            read_record(&self.path_for(id), id.clone())
                .await
                .map_err(|err| not_found_as(err, id))
        })
    }

    fn rename<'a>(
        &'a self,
        id: &'a RecordId,
        display_name: &'a str,
    ) -> StoreFuture<'a, ChatResult<()>> {
        Box::pin(async move {
            let path = self.path_for(id);
            let raw = fs::read(&path)
                .await
                .map_err(|err| not_found_as(err.into(), id))?;

            let mut document: Map<String, Value> = serde_json::from_slice(&raw)?;
            document.insert(
                "display_name".to_string(),
                Value::String(display_name.to_string()),
            );
            fs::write(&path, serde_json::to_vec_pretty(&document)?).await?;

            debug!("Renamed conversation {} to: {}", id, display_name);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, id: &'a RecordId) -> StoreFuture<'a, ChatResult<()>> {
        Box::pin(async move {
            fs::remove_file(self.path_for(id))
                .await
                .map_err(|err| not_found_as(err.into(), id))?;
            info!("Deleted conversation {}", id);
            Ok(())
        })
    }
}

async fn read_record(path: &Path, id: RecordId) -> ChatResult<SavedHistoryRecord> {
    let raw = fs::read(path).await?;
    let document: StoredDocument = serde_json::from_slice(&raw)?;
    Ok(document.into_record(id))
}

fn not_found_as(err: ChatError, id: &RecordId) -> ChatError {
    match err {
        ChatError::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {
            ChatError::NotFound(id.to_string())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::user("How to implement JWT in Spring Boot?"),
            Message::assistant("Use Spring Security."),
        ]
    }

    fn store_in(dir: &TempDir) -> JsonDirHistoryStore {
        JsonDirHistoryStore::new(dir.path().join("chat_history")).unwrap()
    }

    #[tokio::test]
    async fn test_save_then_list_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        let messages = sample_messages();

        let id = store
            .save("How to implement JWT in Spring Boot?", &messages)
            .await
            .unwrap();
        assert!(id.as_str().starts_with("How_to_implement_JWT_in_Spring_Boot_"));
        assert!(store.dir().join(id.file_name()).exists());

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].question, "How to implement JWT in Spring Boot?");
        assert_eq!(records[0].display_name, records[0].question);
        assert_eq!(records[0].messages, messages);
    }

    #[tokio::test]
    async fn test_file_layout_uses_document_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);

        let id = store.save("How to??? validate input!!", &sample_messages()).await.unwrap();
        let stem = id.as_str();
        assert!(stem.starts_with("How_to_validate_input_"));
        let stamp = &stem["How_to_validate_input_".len()..];
        assert_eq!(stamp.len(), "20240101_120000".len());

        let raw = std::fs::read_to_string(store.dir().join(id.file_name())).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["question"], "How to??? validate input!!");
        assert_eq!(value["display_name"], "How to??? validate input!!");
        assert!(value["timestamp"].is_string());
        assert_eq!(value["chat_history"][0]["role"], "user");
        assert!(raw.contains("\n  \"question\""));
    }

    #[tokio::test]
    async fn test_same_second_saves_do_not_collide() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);

        let first = store.save("Same question", &sample_messages()).await.unwrap();
        let second = store.save("Same question", &sample_messages()).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_newest_first_and_skips_corrupt_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        std::fs::create_dir_all(store.dir()).unwrap();

        let older = r#"{"question":"old","timestamp":"2024-01-01T10:00:00.000000","chat_history":[]}"#;
        let newer = r#"{"question":"new","timestamp":"2024-06-01T10:00:00.000000","chat_history":[]}"#;
        std::fs::write(store.dir().join("old_20240101_100000.json"), older).unwrap();
        std::fs::write(store.dir().join("new_20240601_100000.json"), newer).unwrap();
        std::fs::write(store.dir().join("broken.json"), "{ not json").unwrap();
        std::fs::write(store.dir().join("notes.txt"), "ignored").unwrap();

        let records = store.list().await.unwrap();
        let questions: Vec<&str> = records.iter().map(|r| r.question.as_str()).collect();
        assert_eq!(questions, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rename_only_changes_display_name() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        let id = store.save("Original question", &sample_messages()).await.unwrap();
        let before = store.get(&id).await.unwrap();

        let path = store.dir().join(id.file_name());
        let mut extended: Map<String, Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        extended.insert("pinned".to_string(), Value::Bool(true));
        std::fs::write(&path, serde_json::to_vec_pretty(&extended).unwrap()).unwrap();

        store.rename(&id, "JWT notes").await.unwrap();

        let after = store.get(&id).await.unwrap();
        assert_eq!(after.display_name, "JWT notes");
        assert_eq!(after.question, before.question);
        assert_eq!(after.timestamp, before.timestamp);
        assert_eq!(after.messages, before.messages);

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["pinned"], Value::Bool(true));

        let listed = store.list().await.unwrap();
        assert_eq!(listed[0].display_name, "JWT notes");
    }

    #[tokio::test]
    async fn test_delete_twice_reports_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        let id = store.save("To delete", &sample_messages()).await.unwrap();

        store.delete(&id).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());

        let second = store.delete(&id).await;
        assert!(matches!(second, Err(ChatError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_record_operations_report_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        let id = RecordId::parse("ghost_20240101_000000").unwrap();

        assert!(matches!(store.get(&id).await, Err(ChatError::NotFound(_))));
        assert!(matches!(
            store.rename(&id, "name").await,
            Err(ChatError::NotFound(_))
        ));
    }

    /// Accepts nothing: every write fails.
    struct BrokenDisk;

    impl AsyncWrite for BrokenDisk {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<io::Result<usize>> {
            std::task::Poll::Ready(Err(io::Error::other("disk full")))
        }

        fn poll_flush(
            self: Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_file_behind() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Half_written_20240101_000000.json");
        std::fs::write(&path, b"").unwrap();

        let result = write_or_discard(BrokenDisk, &path, b"{}").await;

        assert_eq!(result.unwrap_err().to_string(), "disk full");
        assert!(!path.exists());
    }
}
