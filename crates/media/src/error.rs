use std::error::Error as StdError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not an http(s) url: {url}")]
    NotHttp { url: String },

    #[error("fetching {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("upload failed: {0}")]
    Upload(#[source] wabridge_whatsapp::Error),

    #[error("send failed: {0}")]
    Send(#[source] wabridge_whatsapp::Error),

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("{message}")]
    InvalidInput { message: String },
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
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
