//! Shared CA-core operations: key generation, CSR/certificate storage
//! paths, request bookkeeping, and chain-building. Both CA backends embed
//! one of these and delegate most of [`super::CertificateAuthority`]'s
//! default methods to it.

use crate::error::{Result, ServerError};
use crate::hooks::ValidationHook;
use scmt_storage::{Storage, StorageError};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

use super::KeyAlgo;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Upper bound on how many `CA Issuers` hops `build_chain` will follow,
/// per the suggested depth in the chain-building design.
const MAX_CHAIN_DEPTH: usize = 8;

/// Timeout for each parent-certificate fetch while building a chain.
const CHAIN_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CaCore {
    pub domain: String,
    pub tmp_dir: PathBuf,
    pub certificate_expiration: chrono::Duration,
    pub request_cleanup: chrono::Duration,
    storage: Arc<dyn Storage>,
    fs_lock: Mutex<()>,
    hook: Mutex<Option<Arc<dyn ValidationHook>>>,
    chain_client: reqwest::Client,
}

impl CaCore {
    pub async fn new(
        domain: impl Into<String>,
        storage: Arc<dyn Storage>,
        tmp_dir: PathBuf,
        certificate_expiration: chrono::Duration,
        request_cleanup: chrono::Duration,
    ) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(&tmp_dir).await?;
        Ok(Self {
            domain: domain.into(),
            tmp_dir,
            certificate_expiration,
            request_cleanup,
            storage,
            fs_lock: Mutex::new(()),
            hook: Mutex::new(None),
            chain_client: reqwest::Client::builder()
                .timeout(CHAIN_FETCH_TIMEOUT)
                .build()
                .expect("reqwest client builds with default tls backend"),
        })
    }

    pub async fn set_hook(&self, hook: Arc<dyn ValidationHook>) {
        *self.hook.lock().await = Some(hook);
    }

    pub async fn hook(&self) -> Option<Arc<dyn ValidationHook>> {
        self.hook.lock().await.clone()
    }

    /// Time-bucketed (30s) scratch file path. Every new bucket sweeps any
    /// chunk directory outside the current-or-previous bucket, bounding how
    /// much scratch state accumulates if cleanup ever falls behind.
    async fn get_temp_path(&self) -> Result<PathBuf> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
        let chunk = now.as_secs() / 30;
        let chunk_dir = self.tmp_dir.join(chunk.to_string());

        {
            let _guard = self.fs_lock.lock().await;
            if !chunk_dir.is_dir() {
                tokio::fs::create_dir_all(&chunk_dir)
                    .await
                    .map_err(|e| ServerError::Internal(format!("failed to create scratch dir: {e}")))?;
                self.cleanup_temp_path(chunk).await;
            }
        }

        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        Ok(chunk_dir.join(format!("{}-{seq}", now.as_nanos())))
    }

    async fn cleanup_temp_path(&self, current_chunk: u64) {
        let allowed = [current_chunk.to_string(), current_chunk.saturating_sub(1).to_string()];
        let Ok(mut entries) = tokio::fs::read_dir(&self.tmp_dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !allowed.contains(&name.to_string()) {
                let _ = tokio::fs::remove_dir_all(entry.path()).await;
            }
        }
    }

    pub fn key_url(&self, hostname: &str) -> String {
        format!("{}/{hostname}/key.pem", self.domain)
    }

    pub fn csr_url(&self, hostname: &str) -> String {
        format!("{}/{hostname}/request.csr", self.domain)
    }

    pub fn crt_url(&self, hostname: &str) -> String {
        format!("{}/{hostname}/cert.pem", self.domain)
    }

    pub fn fullchain_url(&self, hostname: &str) -> String {
        format!("{}/{hostname}/fullchain.pem", self.domain)
    }

    fn request_url(&self, hostname: &str, ip: &str) -> String {
        format!("{}/{hostname}/requests/{ip}", self.domain)
    }

    pub async fn generate_key(&self, hostname: &str, algo: KeyAlgo, bits: u32) -> Result<Vec<u8>> {
        let path = self.key_url(hostname);
        if let Ok(key) = self.storage.read(&path).await {
            return Ok(key);
        }

        tracing::info!(hostname, path, "generating new host key");
        let key = match algo {
            KeyAlgo::Rsa => scmt_crypto::generate_rsa_key(bits).await?,
            KeyAlgo::EcSecp384r1 => scmt_crypto::generate_ec_secp384r1_key().await?,
        };

        self.storage.write(&path, &key).await?;
        Ok(key)
    }

    pub async fn get_csr(&self, hostname: &str, subject: &str) -> Result<Vec<u8>> {
        let path = self.csr_url(hostname);
        if let Ok(csr) = self.storage.read(&path).await {
            return Ok(csr);
        }

        let key = self.storage.read(&self.key_url(hostname)).await?;
        tracing::info!(hostname, path, "generating new CSR");
        let csr = scmt_crypto::generate_csr(&key, subject).await?;
        self.storage.write(&path, &csr).await?;
        Ok(csr)
    }

    pub async fn certificate_exists(&self, hostname: &str) -> Result<bool> {
        Ok(self.storage.exists(&self.fullchain_url(hostname)).await?)
    }

    pub async fn get_cert(&self, hostname: &str, ip: Option<&str>) -> Result<Option<Vec<u8>>> {
        if let Some(ip) = ip {
            self.register_request(hostname, ip).await?;
        }

        match self.storage.read(&self.crt_url(hostname)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_cert(&self, hostname: &str, cert: &[u8]) -> Result<()> {
        self.storage.write(&self.crt_url(hostname), cert).await?;
        Ok(())
    }

    /// Write the fullchain directly, bypassing `build_chain`. Used by CA
    /// backends whose leaf certificate already IS the fullchain.
    pub async fn write_fullchain(&self, hostname: &str, chain: &[u8]) -> Result<()> {
        self.storage.write(&self.fullchain_url(hostname), chain).await?;
        Ok(())
    }

    pub async fn register_request(&self, hostname: &str, ip: &str) -> Result<()> {
        let sanitized: String = ip
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        tracing::debug!(hostname, ip = sanitized, "request registered");
        let timestamp = chrono::Utc::now().timestamp();
        self.storage
            .write(&self.request_url(hostname, &sanitized), timestamp.to_string().as_bytes())
            .await?;
        Ok(())
    }

    pub async fn have_requests(&self, hostname: &str) -> Result<usize> {
        let path = format!("{}/{hostname}/requests", self.domain);
        match self.storage.list(&path).await {
            Ok(ips) => Ok(ips.len()),
            Err(StorageError::NotFound(_)) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn cleanup_requests(&self, hostname: &str) -> Result<()> {
        let path = format!("{}/{hostname}/requests", self.domain);
        let ips = match self.storage.list(&path).await {
            Ok(ips) => ips,
            Err(StorageError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let now = chrono::Utc::now().timestamp();
        for ip in ips {
            let entry_path = format!("{path}/{ip}");
            let timestamp: i64 = match self.storage.read(&entry_path).await {
                Ok(bytes) => match String::from_utf8_lossy(&bytes).trim().parse() {
                    Ok(t) => t,
                    Err(_) => continue,
                },
                Err(StorageError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            if timestamp < now - self.request_cleanup.num_seconds() {
                tracing::info!(hostname, ip, "no requests for a while, forgetting IP");
                self.storage.delete(&entry_path).await?;
            }
        }
        Ok(())
    }

    pub async fn list_hostnames(&self) -> Result<Vec<String>> {
        match self.storage.list(&self.domain).await {
            Ok(hosts) => Ok(hosts),
            Err(StorageError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete_hostname(&self, hostname: &str) -> Result<()> {
        self.storage.delete(&format!("{}/{hostname}", self.domain)).await?;
        Ok(())
    }

    pub async fn get_full_chain(&self, hostname: &str, force_reload: bool) -> Result<Vec<u8>> {
        let path = self.fullchain_url(hostname);
        if !force_reload {
            if let Ok(chain) = self.storage.read(&path).await {
                return Ok(chain);
            }
        }

        tracing::info!(hostname, "loading certificate chain");
        let leaf = self
            .get_cert(hostname, None)
            .await?
            .ok_or_else(|| ServerError::Internal(format!("no certificate on file for {hostname}")))?;
        let chain = self.build_chain(leaf).await?;

        self.storage.write(&path, &chain).await?;
        tracing::info!(hostname, path, "full chain saved");
        Ok(chain)
    }

    /// Follow `CA Issuers` URIs out of each certificate until one doesn't
    /// name a parent, concatenating PEM blocks along the way. Bounded to
    /// [`MAX_CHAIN_DEPTH`] hops and guarded against a repeated subject DN,
    /// so a misconfigured or cyclic AIA chain can't loop forever.
    async fn build_chain(&self, leaf: Vec<u8>) -> Result<Vec<u8>> {
        let mut chain = Vec::new();
        let mut current = Some(leaf);
        let mut seen_subjects: HashSet<String> = HashSet::new();
        let mut depth = 0usize;

        while let Some(crt) = current.take() {
            let Some(info) = scmt_crypto::x509_info(&crt).await? else {
                break;
            };

            if let Some(subject) = &info.subject {
                if !seen_subjects.insert(subject.clone()) {
                    tracing::warn!(subject, "repeated subject DN in chain, stopping to avoid a loop");
                    break;
                }
            }

            depth += 1;
            chain.extend_from_slice(&crt);

            if depth >= MAX_CHAIN_DEPTH {
                tracing::warn!(depth, "chain reached maximum depth, stopping");
                break;
            }

            match info.ca_issuer_uri {
                Some(uri) if !uri.is_empty() => {
                    tracing::debug!(subject = ?info.subject, uri, "loading parent certificate");
                    let bytes = self
                        .chain_client
                        .get(&uri)
                        .send()
                        .await
                        .map_err(|e| ServerError::CaRequest(e.to_string()))?
                        .bytes()
                        .await
                        .map_err(|e| ServerError::CaRequest(e.to_string()))?;
                    let parent_pem = if bytes.starts_with(b"-----BEGIN CERTIFICATE-----") {
                        bytes.to_vec()
                    } else {
                        scmt_crypto::der_to_pem("CERTIFICATE", &bytes).into_bytes()
                    };
                    current = Some(parent_pem);
                }
                _ => {
                    tracing::debug!(subject = ?info.subject, "reached root of chain");
                }
            }
        }

        Ok(chain)
    }
}
