use thiserror::Error;

/// Longest error or status text ever logged or published.
pub const MAX_TEXT_LEN: usize = 128;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Quote error: {0}")]
    Quote(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Publish error: {0}")]
    Publish(String),
}

impl Error {
    /// Quote failure with the underlying message cut to [`MAX_TEXT_LEN`].
    pub fn quote(msg: impl std::fmt::Display) -> Self {
        Self::Quote(truncate(&msg.to_string(), MAX_TEXT_LEN))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Feed(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Feed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Keep the first `max` characters of `text`.
pub fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let text = "é".repeat(200);
        let out = truncate(&text, MAX_TEXT_LEN);
        assert_eq!(out.chars().count(), 128);
        assert_eq!(truncate("short", MAX_TEXT_LEN), "short");
    }

    #[test]
    fn test_quote_error_is_truncated() {
        let err = Error::quote("x".repeat(500));
        match err {
            Error::Quote(msg) => assert_eq!(msg.len(), 128),
            other => panic!("unexpected {other:?}"),
        }
    }
}
