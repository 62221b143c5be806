#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] wabridge_protocol::Error),

    #[error(transparent)]
    Platform(#[from] wabridge_whatsapp::Error),

    #[error(transparent)]
    Media(#[from] wabridge_media::Error),

    #[error(transparent)]
    Service(#[from] wabridge_scrapers::Error),

    #[error("invalid chat history: {0}")]
    History(#[source] serde_json::Error),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
