//! HTTP client for the generator's `POST /call` dispatch. Wraps a
//! `reqwest::Client` around a base URL the same way other polling clients
//! do, trimmed to the two operations this wire protocol exposes.

use crate::error::{ClientError, Result};
use serde_json::{json, Value};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Result of a `cert` call: either the certificate isn't ready yet, or the
/// full chain (and leaf) the manager issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertStatus {
    Pending,
    Available { cert: String, fullchain: String },
}

pub struct ScmtClient {
    http: reqwest::Client,
    generator: String,
}

impl ScmtClient {
    pub fn new(generator: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client builds with default tls backend"),
            generator: generator.into(),
        }
    }

    async fn call(&self, body: Value) -> Result<Value> {
        let url = format!("{}/call", self.generator.trim_end_matches('/'));
        let response = self.http.post(url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::ServerError { status: status.as_u16(), message });
        }

        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Request a fresh private key, returning the PEM the generator handed
    /// back. The generator is the source of truth for key material; this
    /// call doesn't cache anything locally.
    pub async fn request_key(&self, hostname: &str, bits: u32, algo: &str) -> Result<String> {
        let reply = self
            .call(json!({ "type": "key", "bits": bits, "hostname": hostname, "algo": algo }))
            .await?;

        reply
            .get("key")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ClientError::MissingField("key"))
    }

    /// Ask whether a certificate for `hostname` is ready.
    pub async fn request_cert(&self, hostname: &str) -> Result<CertStatus> {
        let reply = self.call(json!({ "type": "cert", "hostname": hostname })).await?;

        let status = reply.get("status").and_then(Value::as_str).ok_or(ClientError::MissingField("status"))?;

        if status != "available" {
            return Ok(CertStatus::Pending);
        }

        let fullchain = reply
            .get("fullchain")
            .and_then(Value::as_str)
            .ok_or(ClientError::MissingField("fullchain"))?
            .to_string();
        let cert = reply.get("cert").and_then(Value::as_str).unwrap_or(fullchain.as_str()).to_string();

        Ok(CertStatus::Available { cert, fullchain })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_url_trims_trailing_slash() {
        let client = ScmtClient::new("https://generator.example/");
        assert_eq!(client.generator, "https://generator.example/");
        assert_eq!(format!("{}/call", client.generator.trim_end_matches('/')), "https://generator.example/call");
    }
}
