use thiserror::Error;

/// Errors raised while interpreting protocol input.
#[derive(Debug, Error)]
pub enum Error {
    /// The frame does not start with any known verb prefix.
    #[error("unknown command: {preview}")]
    UnknownVerb { preview: String },

    /// The verb was recognised but fewer fields than required were supplied.
    #[error("invalid {verb} format: expected at least {expected} fields, got {found}")]
    MissingFields {
        verb: &'static str,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn unknown_verb(frame: &str) -> Self {
        let preview: String = frame.chars().take(32).collect();
        Self::UnknownVerb { preview }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
