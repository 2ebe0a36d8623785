//! Filesystem-safe slugs derived from the first question of a conversation.

use regex::Regex;

/// Maximum slug length in characters, before the timestamp suffix.
pub const MAX_SLUG_CHARS: usize = 50;

/// Slug used when the question has no word characters at all.
const FALLBACK_SLUG: &str = "chat";

/// Compiled patterns for slug derivation.
#[derive(Clone, Debug)]
pub struct Slugger {
    strip: Regex,
    collapse: Regex,
}

impl Slugger {
    /// Compile the slug patterns.
    ///
    /// # Errors
    /// Returns an error if a pattern fails to compile.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            strip: Regex::new(r"[^\w\s-]")?,
            collapse: Regex::new(r"[-\s]+")?,
        })
    }

    /// Drop punctuation, keep the first 50 characters, join words with `_`.
    #[must_use]
    pub fn slugify(&self, question: &str) -> String {
        let stripped = self.strip.replace_all(question.trim(), "");
        let truncated: String = stripped.chars().take(MAX_SLUG_CHARS).collect();
        let slug = self.collapse.replace_all(&truncated, "_").into_owned();

        if slug.is_empty() {
            FALLBACK_SLUG.to_string()
        } else {
            slug
        }
    }
}
