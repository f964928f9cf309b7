use regex::Regex;

/// Extracts the alphabetic words of a raw message for embedding.
///
/// Cleaning only feeds the vectorization path; template synthesis always
/// works on the raw message text. Passed into the embedder as an owned
/// dependency rather than being baked into any storage type.
pub struct MessageCleaner {
    word_re: Regex,
}

impl MessageCleaner {
    pub fn new() -> Self {
        Self {
            word_re: Regex::new("[a-zA-Z]+").unwrap(),
        }
    }

    /// All alphabetic runs in the message, in order. Digits, punctuation and
    /// whitespace never survive.
    pub fn clean(&self, message: &str) -> Vec<String> {
        self.word_re
            .find_iter(message)
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

impl Default for MessageCleaner {
    fn default() -> Self {
        Self::new()
    }
}
