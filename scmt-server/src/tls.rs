//! Bootstraps the API's own HTTPS certificate the same way any other
//! client would: request a key, then poll `cert` until the manager's
//! background worker has actually issued one.

use crate::ca::KeyAlgo;
use crate::error::ServerError;
use crate::manager::{CertStatus, Manager};
use axum_server::tls_rustls::RustlsConfig;
use std::time::Duration;
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Key size for the server's own HTTPS key, hardcoded the way the
/// reference service hardcodes its own listener key independent of
/// whatever `supported_key_algos` exposes to API clients.
const SELF_KEY_BITS: u32 = 2048;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to provision local tls certificate: {0}")]
    Manager(#[from] ServerError),
    #[error("failed to build rustls config: {0}")]
    Rustls(#[from] std::io::Error),
}

/// Block until `ssl_hostname` has an issued certificate, then build a
/// reloadable rustls config from it.
pub async fn bootstrap(manager: &Manager, ssl_hostname: &str) -> Result<RustlsConfig, TlsError> {
    tracing::info!(hostname = ssl_hostname, "provisioning local tls key");
    manager.get_key(ssl_hostname, KeyAlgo::Rsa, SELF_KEY_BITS).await?;

    loop {
        match manager.cert(ssl_hostname, "127.0.0.1").await? {
            CertStatus::Available { fullchain, .. } => {
                tracing::info!(hostname = ssl_hostname, "local tls certificate available");
                let key = manager.get_key(ssl_hostname, KeyAlgo::Rsa, SELF_KEY_BITS).await?;
                return Ok(RustlsConfig::from_pem(fullchain, key).await?);
            }
            CertStatus::Pending => {
                tracing::debug!(hostname = ssl_hostname, "local tls certificate not ready, waiting");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
}
