//! The in-memory conversation: messages, the saved flag, and the ask, clear,
//! save and load flow that keeps unsaved turns from being lost.

pub mod message;
pub mod progress;
pub mod samples;
pub mod session;

pub use message::{Message, Role, first_question};
pub use progress::ProgressStep;
pub use samples::{SAMPLE_QUESTIONS, SampleCategory, numbered_samples, sample_question};
pub use session::{AskOutcome, ConversationSession, DEFAULT_CONTEXT_MESSAGES};
