//! Saved conversation history: one pretty-printed JSON document per record.
//!
//! ```text
//! chat_history/
//! ├── How_to_implement_JWT_in_Spring_Boot_20240501_093000.json
//! └── Explain_streams_20240502_181512.json
//! ```
//!
//! The file stem is the record id. It is derived once from the first question
//! and the creation time, so editing the display name never moves the file.

pub mod record;
pub mod slug;
pub mod store;

pub use record::{RecordId, SavedHistoryRecord};
pub use slug::Slugger;
pub use store::{HistoryStore, JsonDirHistoryStore, StoreFuture};
