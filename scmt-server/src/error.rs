//! Errors produced by the manager, CA backends, and hooks, plus the JSON
//! wire shape the API layer serializes them into: `{"code": N, "error":
//! "slug"}`. The `slug`s below mirror the ones the original service used
//! so existing clients/monitoring that match on them keep working.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bad content length")]
    BadContentLength,

    #[error("failed to parse request body")]
    BadRequestBody,

    #[error("unknown request type")]
    UnknownRequestType,

    #[error("key_bits_should_be_specified")]
    MissingBits,

    #[error("key_hostname_should_be_specified")]
    MissingHostname,

    #[error("no_hostname_specified")]
    NoHostnameSpecified,

    #[error("empty_or_incorrect_algo")]
    BadAlgo,

    #[error("no certificate authority configured for host {0}")]
    NoCa(String),

    #[error("failed to generate key: {0}")]
    KeyGeneration(String),

    #[error("crypto operation failed: {0}")]
    Crypto(#[from] scmt_crypto::CryptoError),

    #[error("storage operation failed: {0}")]
    Storage(#[from] scmt_storage::StorageError),

    #[error("ca rate limited, retry later")]
    RateLimited,

    #[error("challenge validation timed out")]
    ChallengeTimeout,

    #[error("upstream ca request failed: {0}")]
    CaRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ServerError {
    fn code_and_slug(&self) -> (u16, &'static str) {
        match self {
            ServerError::BadContentLength => (500, "bad_content_length"),
            ServerError::BadRequestBody => (500, "failed_to_parse_request_body"),
            ServerError::UnknownRequestType => (500, "unknown_request_type"),
            ServerError::MissingBits => (500, "key_bits_should_be_specified"),
            ServerError::MissingHostname => (500, "key_hostname_should_be_specified"),
            ServerError::NoHostnameSpecified => (500, "no_hostname_specified"),
            ServerError::BadAlgo => (500, "empty_or_incorrect_algo"),
            ServerError::NoCa(_) => (500, "no_ca_for_hostname"),
            ServerError::KeyGeneration(_) => (500, "failed_to_generate_key"),
            ServerError::Crypto(_) => (500, "crypto_error"),
            ServerError::Storage(_) => (500, "storage_error"),
            ServerError::RateLimited => (429, "rate_limited"),
            ServerError::ChallengeTimeout => (500, "challenge_timeout"),
            ServerError::CaRequest(_) => (500, "ca_request_failed"),
            ServerError::Internal(_) => (500, "internal_error"),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (code, slug) = self.code_and_slug();
        tracing::warn!(code, slug, error = %self, "request failed");
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({ "code": code, "error": slug }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
