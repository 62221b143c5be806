use std::error::Error as StdError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported service")]
    UnsupportedService { service: String },

    #[error("API returned status: {status}")]
    Status { status: u16 },

    #[error("failed to extract video ID from URL")]
    InvalidVideoUrl,

    #[error("failed to decrypt payload: {reason}")]
    Decrypt { reason: String },

    #[error("unexpected response: {reason}")]
    UnexpectedResponse { reason: String },

    #[error("prompt cannot be empty")]
    EmptyPrompt,

    #[error("no task ID received")]
    MissingTaskId,

    #[error("task not found")]
    TaskNotFound,

    #[error("unknown status: {0}")]
    UnknownStatus(String),

    #[error("max polling attempts reached")]
    PollExhausted,

    /// The remote service reported a failure of its own.
    #[error("{0}")]
    Remote(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn external<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn unexpected(reason: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn decrypt(reason: impl Into<String>) -> Self {
        Self::Decrypt {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
