use thiserror::Error;

/// Errors raised by the `openssl(1)` wrapper.
///
/// This crate treats `openssl` as an opaque primitive provider: every
/// operation either shells out to it or parses bytes it already produced.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("failed to spawn openssl: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("openssl {command} exited with status {status:?}: {output}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        output: String,
    },

    #[error("failed to parse openssl output: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
