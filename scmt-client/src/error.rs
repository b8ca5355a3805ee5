use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to generator failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to parse server reply: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("generator returned {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("reply missing expected field {0}")]
    MissingField(&'static str),

    #[error("certificate conversion failed: {0}")]
    Crypto(#[from] scmt_crypto::CryptoError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
