//! Receivers of incremental assistant output.

use crate::conversation::ProgressStep;

/// Observer of a reply while it is being produced.
///
/// `partial` receives the cumulative text so far (not the delta), so a
/// renderer can simply replace what it shows. Calls arrive in stream order.
pub trait StreamSink: Send {
    /// Cumulative reply text after a new fragment arrived.
    fn partial(&mut self, text: &str);

    /// Final reply text, called once when the stream ends normally.
    fn complete(&mut self, _text: &str) {}

    /// Coarse progress of the surrounding `ask` operation.
    fn progress(&mut self, _step: ProgressStep) {}
}

impl<F> StreamSink for F
where
    F: FnMut(&str) + Send,
{
    fn partial(&mut self, text: &str) {
        self(text);
    }
}

/// Sink that drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl StreamSink for NullSink {
    fn partial(&mut self, _text: &str) {}
}
