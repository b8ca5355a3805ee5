//! ACME v1 certificate authority: hand-rolled JWS envelopes against the
//! Boulder-era `/acme/new-reg`, `/acme/new-authz`, `/acme/new-cert`
//! endpoints. ACME v2's account-URL flow is out of scope -- every request
//! here carries the account JWK directly, the way ACME v1 did.

use super::{CaCore, CertificateAuthority};
use crate::error::{Result, ServerError};
use base64::Engine as _;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// How long to wait for a challenge to validate before giving up on an
/// issuance attempt and letting the manager retry it later.
const CHALLENGE_TIMEOUT: Duration = Duration::from_secs(600);
const CHALLENGE_POLL: Duration = Duration::from_secs(20);
/// Cooldown after a rate-limit response before a fresh domain is allowed
/// to re-attempt issuance.
const RATE_LIMIT_COOLDOWN_SECS: i64 = 43200;

pub struct AcmeCaConfig {
    pub ca_url: String,
    pub account_key_path: std::path::PathBuf,
}

pub struct AcmeCa {
    core: CaCore,
    ca_url: String,
    account_key_path: std::path::PathBuf,
    http: reqwest::Client,
    /// Unix timestamp of the last rate-limit response, or 0 if none yet.
    rate_limit_last: AtomicI64,
}

impl AcmeCa {
    /// Resolve the well-known `"stage"` shorthand to LetsEncrypt's staging
    /// endpoint; anything else is taken as a literal CA base URL.
    pub fn resolve_ca_url(url: Option<&str>) -> String {
        match url {
            None => "https://acme-v01.api.letsencrypt.org".to_string(),
            Some("stage") => "https://acme-staging.api.letsencrypt.org".to_string(),
            Some(other) => other.to_string(),
        }
    }

    /// Construct the CA, generating and registering a fresh account key if
    /// `account_key_path` doesn't already exist.
    pub async fn new(core: CaCore, config: AcmeCaConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ServerError::Internal(format!("failed to build http client: {e}")))?;

        let ca = Self {
            core,
            ca_url: config.ca_url,
            account_key_path: config.account_key_path,
            http,
            rate_limit_last: AtomicI64::new(0),
        };

        if tokio::fs::metadata(&ca.account_key_path).await.is_ok() {
            tracing::info!(path = %ca.account_key_path.display(), ca = ca.ca_url, "account key exists, skipping registration");
            return Ok(ca);
        }

        let (status, body) = ca.register().await?;
        if status != 201 {
            return Err(ServerError::CaRequest(format!(
                "failed to register acme account, status {status}: {body}"
            )));
        }
        tracing::info!(ca = ca.ca_url, "registered new acme account");
        Ok(ca)
    }

    async fn account_key(&self) -> Result<Vec<u8>> {
        if let Ok(key) = tokio::fs::read(&self.account_key_path).await {
            return Ok(key);
        }

        tracing::info!(path = %self.account_key_path.display(), "generating acme account key");
        let key = scmt_crypto::generate_rsa_key(4096).await?;
        if let Some(parent) = self.account_key_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ServerError::Internal(format!("failed to create account key dir: {e}")))?;
        }
        tokio::fs::write(&self.account_key_path, &key)
            .await
            .map_err(|e| ServerError::Internal(format!("failed to write account key: {e}")))?;
        Ok(key)
    }

    fn jwk_header(jwk: &scmt_crypto::Jwk) -> Value {
        json!({ "alg": "RS256", "jwk": jwk })
    }

    /// POST a JWS-enveloped request. ACME v1 errors come back as ordinary
    /// HTTP responses (not transport errors), so this returns the status
    /// code and raw body for the caller to interpret.
    async fn request(&self, url: &str, payload: &Value) -> Result<(u16, Vec<u8>)> {
        let account_key = self.account_key().await?;
        let jwk = scmt_crypto::rsa_account_jwk(&account_key).await?;
        let header = Self::jwk_header(&jwk);

        let payload64 = scmt_crypto::b64url(payload.to_string().as_bytes());

        let nonce = self.fetch_nonce().await?;
        let mut protected = header.clone();
        protected["nonce"] = json!(nonce);
        let protected64 = scmt_crypto::b64url(protected.to_string().as_bytes());

        let signing_input = format!("{protected64}.{payload64}");
        let signature = scmt_crypto::sign_sha256(&account_key, signing_input.as_bytes()).await?;

        let envelope = json!({
            "header": header,
            "protected": protected64,
            "payload": payload64,
            "signature": scmt_crypto::b64url(&signature),
        });

        tracing::debug!(url, "sending acme request");
        let resp = self
            .http
            .post(url)
            .body(envelope.to_string())
            .send()
            .await
            .map_err(|e| ServerError::CaRequest(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .await
            .map_err(|e| ServerError::CaRequest(e.to_string()))?
            .to_vec();
        Ok((status, body))
    }

    async fn fetch_nonce(&self) -> Result<String> {
        let resp = self
            .http
            .get(format!("{}/directory", self.ca_url))
            .send()
            .await
            .map_err(|e| ServerError::CaRequest(e.to_string()))?;

        resp.headers()
            .get("Replay-Nonce")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| ServerError::CaRequest("no Replay-Nonce header in directory response".into()))
    }

    async fn register(&self) -> Result<(u16, Vec<u8>)> {
        self.request(
            &format!("{}/acme/new-reg", self.ca_url),
            &json!({
                "resource": "new-reg",
                "agreement": "https://letsencrypt.org/documents/LE-SA-v1.2-November-15-2017.pdf",
            }),
        )
        .await
    }

    async fn challenge(&self, uri: &str, key_authorization: &str) -> Result<(u16, Vec<u8>)> {
        self.request(
            uri,
            &json!({
                "resource": "challenge",
                "keyAuthorization": key_authorization,
            }),
        )
        .await
    }

    async fn new_cert(&self, csr_der_b64: &str) -> Result<(u16, Vec<u8>)> {
        self.request(
            &format!("{}/acme/new-cert", self.ca_url),
            &json!({
                "resource": "new-cert",
                "csr": csr_der_b64,
            }),
        )
        .await
    }

    async fn sign(&self, hostname: &str, csr: Vec<u8>) -> Result<Vec<u8>> {
        let rate_limited_recently = self.rate_limit_last.load(Ordering::Relaxed)
            > chrono::Utc::now().timestamp() - RATE_LIMIT_COOLDOWN_SECS;
        if !self.certificate_exists(hostname).await? && rate_limited_recently {
            return Err(ServerError::RateLimited);
        }

        tracing::info!(hostname, "signing new CSR");
        let (status, body) = self
            .request(
                &format!("{}/acme/new-authz", self.ca_url),
                &json!({
                    "resource": "new-authz",
                    "identifier": { "type": "dns", "value": hostname },
                }),
            )
            .await?;

        if status != 201 {
            return Err(ServerError::CaRequest(format!(
                "failed to start new authz, status {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }

        let authz: Value = serde_json::from_slice(&body)
            .map_err(|e| ServerError::CaRequest(format!("malformed new-authz response: {e}")))?;

        let hook = self
            .core
            .hook()
            .await
            .ok_or_else(|| ServerError::Internal("no validation hook configured".to_string()))?;

        let challenge_type = hook.get_challenge_type();
        let challenges = authz["challenges"]
            .as_array()
            .ok_or_else(|| ServerError::CaRequest("new-authz response missing challenges".to_string()))?;
        let challenge = challenges
            .iter()
            .find(|c| c["type"] == challenge_type)
            .ok_or_else(|| ServerError::CaRequest(format!("no {challenge_type} challenge offered")))?;

        let account_key = self.account_key().await?;
        let jwk = scmt_crypto::rsa_account_jwk(&account_key).await?;
        let jwk_json = serde_json::to_string(&jwk)
            .map_err(|e| ServerError::Internal(format!("failed to serialize jwk: {e}")))?;
        let thumbprint = scmt_crypto::b64url(&Sha256::digest(jwk_json.as_bytes()));

        let raw_token = challenge["token"]
            .as_str()
            .ok_or_else(|| ServerError::CaRequest("challenge missing token".to_string()))?;
        let token: String = raw_token
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        let key_authorization = format!("{token}.{thumbprint}");
        let challenge_token = scmt_crypto::b64url(&Sha256::digest(key_authorization.as_bytes()));

        hook.deploy_challenge(hostname, &challenge_token, &key_authorization).await?;

        let challenge_uri = challenge["uri"]
            .as_str()
            .ok_or_else(|| ServerError::CaRequest("challenge missing uri".to_string()))?;
        self.challenge(challenge_uri, &key_authorization).await?;

        tracing::info!(hostname, "waiting for challenge verification");
        let deadline = tokio::time::Instant::now() + CHALLENGE_TIMEOUT;
        let mut completed = false;
        while tokio::time::Instant::now() < deadline {
            let resp = match self.http.get(challenge_uri).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!(hostname, error = %e, "failed to poll challenge status");
                    tokio::time::sleep(CHALLENGE_POLL).await;
                    continue;
                }
            };
            let status: Value = match resp.json().await {
                Ok(v) => v,
                Err(_) => {
                    tokio::time::sleep(CHALLENGE_POLL).await;
                    continue;
                }
            };

            if status["status"] == "valid" {
                tracing::info!(hostname, "challenge completed");
                completed = true;
                break;
            }

            tracing::debug!(hostname, status = %status["status"], "challenge not yet valid");
            tokio::time::sleep(CHALLENGE_POLL).await;
        }

        if !completed {
            tracing::warn!(hostname, "challenge verification timed out");
            hook.clean_challenge(hostname, &challenge_token).await?;
            return Err(ServerError::ChallengeTimeout);
        }

        tracing::info!(hostname, "requesting certificate");
        let csr_der = scmt_crypto::csr_to_der(&csr).await?;
        let (status, body) = self.new_cert(&scmt_crypto::b64url(&csr_der)).await?;

        hook.clean_challenge(hostname, &challenge_token).await?;

        if status == 429 {
            if let Ok(info) = serde_json::from_slice::<Value>(&body) {
                if info["type"] == "urn:acme:error:rateLimited" {
                    self.rate_limit_last.store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
                    return Err(ServerError::RateLimited);
                }
            }
        }

        if status != 201 {
            return Err(ServerError::CaRequest(format!(
                "error signing certificate: {status} {}",
                String::from_utf8_lossy(&body)
            )));
        }

        Ok(scmt_crypto::der_to_pem("CERTIFICATE", &body).into_bytes())
    }
}

#[async_trait::async_trait]
impl CertificateAuthority for AcmeCa {
    fn core(&self) -> &CaCore {
        &self.core
    }

    async fn issue_certificate(&self, hostname: &str, force: bool) -> Result<()> {
        if !force && self.core.certificate_exists(hostname).await? {
            tracing::info!(hostname, "certificate already available");
            return Ok(());
        }

        let csr = self.get_csr(hostname).await?;
        let cert = self.sign(hostname, csr).await?;
        self.core.write_cert(hostname, &cert).await?;
        tracing::info!(hostname, "generated certificate");

        self.core.get_full_chain(hostname, true).await?;
        Ok(())
    }
}
