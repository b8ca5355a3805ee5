//! Certificate authority backends: ACME v1 (`acme`) and an offline private
//! CA (`private`), sharing the storage/staging primitives in `base`.

pub mod acme;
pub mod base;
pub mod private;

use crate::error::Result;
use async_trait::async_trait;
pub use base::CaCore;

/// Key algorithms a host can request via the `key` API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgo {
    Rsa,
    EcSecp384r1,
}

impl KeyAlgo {
    pub const SUPPORTED: &'static [&'static str] = &["RSA", "EC-SECP384R1"];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RSA" => Some(KeyAlgo::Rsa),
            "EC-SECP384R1" => Some(KeyAlgo::EcSecp384r1),
            _ => None,
        }
    }
}

/// Common operations every CA backend exposes to the manager.
///
/// Most of these have a default implementation delegating to [`CaCore`];
/// only `issue_certificate` (how a certificate actually gets signed) and
/// `get_cert_subject` (the CN a CSR is generated against) differ between
/// backends.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    fn core(&self) -> &CaCore;

    fn get_cert_subject(&self, hostname: &str) -> String {
        hostname.to_string()
    }

    async fn issue_certificate(&self, hostname: &str, force: bool) -> Result<()>;

    async fn generate_key(&self, hostname: &str, algo: KeyAlgo, bits: u32) -> Result<Vec<u8>> {
        self.core().generate_key(hostname, algo, bits).await
    }

    async fn certificate_exists(&self, hostname: &str) -> Result<bool> {
        self.core().certificate_exists(hostname).await
    }

    async fn get_cert(&self, hostname: &str, ip: Option<&str>) -> Result<Option<Vec<u8>>> {
        self.core().get_cert(hostname, ip).await
    }

    async fn get_full_chain(&self, hostname: &str, force_reload: bool) -> Result<Vec<u8>> {
        self.core().get_full_chain(hostname, force_reload).await
    }

    async fn register_request(&self, hostname: &str, ip: &str) -> Result<()> {
        self.core().register_request(hostname, ip).await
    }

    async fn have_requests(&self, hostname: &str) -> Result<usize> {
        self.core().have_requests(hostname).await
    }

    async fn cleanup_requests(&self, hostname: &str) -> Result<()> {
        self.core().cleanup_requests(hostname).await
    }

    async fn get_csr(&self, hostname: &str) -> Result<Vec<u8>> {
        let subject = self.get_cert_subject(hostname);
        self.core().get_csr(hostname, &subject).await
    }

    /// Sweep hostnames with no active requests, and renew certificates
    /// nearing expiration. Per-hostname failures are logged and skipped
    /// rather than aborting the whole sweep.
    async fn cleanup_certificates(&self) -> Result<()> {
        let hostnames = self.core().list_hostnames().await?;
        tracing::info!(domain = %self.core().domain, count = hostnames.len(), "running certificate cleanup");

        for hostname in hostnames {
            self.cleanup_requests(&hostname).await?;
            let requests = self.have_requests(&hostname).await.unwrap_or(0);

            if requests == 0 {
                tracing::info!(hostname, "certificate no longer requested, deleting");
                self.core().delete_hostname(&hostname).await?;
                continue;
            }

            let Some(cert) = self.get_cert(&hostname, None).await? else {
                continue;
            };
            let Some(info) = scmt_crypto::x509_info(&cert).await? else {
                continue;
            };
            let Some(not_after) = info.not_after else {
                continue;
            };

            let remaining = not_after - chrono::Utc::now();
            tracing::debug!(hostname, %not_after, requests, "certificate status");

            if remaining < self.core().certificate_expiration {
                tracing::info!(hostname, "certificate needs renewal");
                if let Err(e) = self.issue_certificate(&hostname, true).await {
                    tracing::warn!(hostname, error = %e, "failed to renew certificate");
                }
            }
        }

        tracing::info!(domain = %self.core().domain, "certificate cleanup finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_supported_algos() {
        assert_eq!(KeyAlgo::parse("RSA"), Some(KeyAlgo::Rsa));
        assert_eq!(KeyAlgo::parse("EC-SECP384R1"), Some(KeyAlgo::EcSecp384r1));
    }

    #[test]
    fn parse_rejects_unknown_algos() {
        assert_eq!(KeyAlgo::parse("DSA"), None);
        assert_eq!(KeyAlgo::parse(""), None);
    }

    #[test]
    fn supported_matches_parseable_names() {
        for name in KeyAlgo::SUPPORTED {
            assert!(KeyAlgo::parse(name).is_some());
        }
    }
}
