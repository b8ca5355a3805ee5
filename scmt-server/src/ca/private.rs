//! Offline private CA: signs CSRs locally with `openssl ca` against a
//! pre-provisioned CA key/cert pair, using a per-hostname scratch
//! directory the way the reference implementation's `openssl.cnf`
//! template and index/serial bookkeeping expect.

use super::{CaCore, CertificateAuthority};
use crate::error::{Result, ServerError};
use scmt_crypto::CaSignRequest;
use std::path::PathBuf;

pub struct PrivateCaConfig {
    pub ca_key: PathBuf,
    pub ca_cert: PathBuf,
    pub days: u32,
    /// Template for `openssl.cnf`, with `%KEY_DIR%` substituted for the
    /// per-issuance scratch directory.
    pub openssl_config_template: PathBuf,
    /// Subject template, e.g. `/C=US/O=Example/CN=%COMMONNAME%`.
    pub subject_template: String,
}

pub struct PrivateCa {
    core: CaCore,
    config: PrivateCaConfig,
}

impl PrivateCa {
    pub fn new(core: CaCore, config: PrivateCaConfig) -> Self {
        Self { core, config }
    }

    async fn issue_in_scratch(&self, hostname: &str, scratch_dir: &std::path::Path) -> Result<()> {
        let subject = self.get_cert_subject(hostname);
        let csr = self.core.get_csr(hostname, &subject).await?;

        let csr_path = scratch_dir.join("request.csr");
        tokio::fs::write(&csr_path, &csr)
            .await
            .map_err(|e| ServerError::Internal(format!("failed to stage csr: {e}")))?;

        let openssl_cnf_path = scratch_dir.join("openssl.cnf");
        let template = tokio::fs::read_to_string(&self.config.openssl_config_template)
            .await
            .map_err(|e| ServerError::Internal(format!("failed to read openssl config template: {e}")))?;
        tokio::fs::write(
            &openssl_cnf_path,
            template.replace("%KEY_DIR%", scratch_dir.to_str().unwrap_or_default()),
        )
        .await
        .map_err(|e| ServerError::Internal(format!("failed to write openssl config: {e}")))?;

        tokio::fs::write(scratch_dir.join("index.txt"), "")
            .await
            .map_err(|e| ServerError::Internal(format!("failed to write index.txt: {e}")))?;
        tokio::fs::write(scratch_dir.join("serial"), "00")
            .await
            .map_err(|e| ServerError::Internal(format!("failed to write serial: {e}")))?;

        let out_path = scratch_dir.join("cert.out");
        tracing::info!(hostname, "running openssl ca sign");
        scmt_crypto::ca_sign(&CaSignRequest {
            csr_path: &csr_path,
            out_path: &out_path,
            outdir: scratch_dir,
            ca_key: &self.config.ca_key,
            ca_cert: &self.config.ca_cert,
            openssl_config: &openssl_cnf_path,
            days: self.config.days,
        })
        .await?;

        let cert = tokio::fs::read(&out_path)
            .await
            .map_err(|_| ServerError::Internal(format!("openssl ca did not produce a certificate for {hostname}")))?;

        // A private CA's leaf certificate IS the fullchain -- there is no
        // intermediate to append, so both paths get the same bytes.
        self.core.write_cert(hostname, &cert).await?;
        self.core.write_fullchain(hostname, &cert).await?;

        tracing::info!(hostname, "certificate successfully generated");
        Ok(())
    }
}

#[async_trait::async_trait]
impl CertificateAuthority for PrivateCa {
    fn core(&self) -> &CaCore {
        &self.core
    }

    fn get_cert_subject(&self, hostname: &str) -> String {
        self.config.subject_template.replace("%COMMONNAME%", hostname)
    }

    async fn issue_certificate(&self, hostname: &str, force: bool) -> Result<()> {
        if !force && self.core.certificate_exists(hostname).await? {
            tracing::info!(hostname, "certificate already available");
            return Ok(());
        }

        let scratch_dir = self.core.tmp_dir.join(hostname).join("generate");
        tracing::info!(hostname, scratch = %scratch_dir.display(), "issuing private ca certificate");
        tokio::fs::create_dir_all(&scratch_dir)
            .await
            .map_err(|e| ServerError::Internal(format!("failed to create scratch dir: {e}")))?;

        let result = self.issue_in_scratch(hostname, &scratch_dir).await;

        let _ = tokio::fs::remove_dir_all(&scratch_dir).await;
        result
    }
}
