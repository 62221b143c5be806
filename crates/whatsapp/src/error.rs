use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid address '{input}': {reason}")]
    InvalidJid { input: String, reason: &'static str },

    #[error("sidecar link is not connected")]
    NotConnected,

    #[error("sidecar request '{method}' timed out")]
    Timeout { method: String },

    #[error("sidecar rejected '{method}': {message}")]
    Rejected { method: String, message: String },

    #[error("pairing code expired before it was scanned")]
    PairingTimeout,

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn invalid_jid(input: &str, reason: &'static str) -> Self {
        Self::InvalidJid {
            input: input.to_owned(),
            reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
