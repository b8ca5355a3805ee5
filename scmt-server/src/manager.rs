//! Routes hostnames to a configured certificate authority, serializes
//! issuance through a FIFO queue and a single background worker, and
//! answers the `key`/`cert` API calls.

use crate::ca::acme::{AcmeCa, AcmeCaConfig};
use crate::ca::base::CaCore;
use crate::ca::private::{PrivateCa, PrivateCaConfig};
use crate::ca::{CertificateAuthority, KeyAlgo};
use crate::error::{Result, ServerError};
use crate::hooks::dns::{DnsHook, DnsHookConfig};
use crate::hooks::http::HttpHook;
use crate::hooks::ValidationHook;
use scmt_storage::Storage;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;

/// Raw per-domain configuration, mirroring an INI section: arbitrary
/// `key = value` pairs, interpreted per the `ca` type.
pub type DomainOptions = HashMap<String, String>;

const CLEANUP_INTERVAL_SECS: i64 = 3600;
const QUEUE_IDLE_SLEEP: Duration = Duration::from_secs(10);

pub enum CertStatus {
    Pending,
    Available { cert: Vec<u8>, fullchain: Vec<u8> },
}

pub struct Manager {
    domains: HashMap<String, Arc<dyn CertificateAuthority>>,
    queue: Mutex<VecDeque<String>>,
    queued: Mutex<HashSet<String>>,
    last_cleanup: AtomicI64,
}

impl Manager {
    /// Build every configured domain's CA (and hook, if any), matching
    /// each domain's `ca` option to a backend. A domain whose `storage`
    /// option names a backend that wasn't registered is skipped with a
    /// warning; every other construction failure (bad CA config, failed
    /// ACME registration, failed hook verification) aborts the build.
    pub async fn build(
        base_dir: &Path,
        domains: &HashMap<String, DomainOptions>,
        storages: &HashMap<String, Arc<dyn Storage>>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(base_dir)
            .await
            .map_err(|e| ServerError::Internal(format!("failed to create base dir: {e}")))?;

        let mut built = HashMap::new();

        for (domain, options) in domains {
            let storage_name = options
                .get("storage")
                .ok_or_else(|| ServerError::Internal(format!("domain {domain} missing storage option")))?;
            let Some(storage) = storages.get(storage_name) else {
                tracing::warn!(domain, storage = storage_name, "unknown storage, skipping domain");
                continue;
            };

            let domain_dir = base_dir.join(domain);
            tokio::fs::create_dir_all(&domain_dir)
                .await
                .map_err(|e| ServerError::Internal(format!("failed to create domain dir: {e}")))?;

            let ca = Self::init_domain(domain, options, storage.clone(), &domain_dir).await?;
            built.insert(domain.clone(), ca);
        }

        Ok(Self {
            domains: built,
            queue: Mutex::new(VecDeque::new()),
            queued: Mutex::new(HashSet::new()),
            last_cleanup: AtomicI64::new(0),
        })
    }

    async fn init_domain(
        domain: &str,
        options: &DomainOptions,
        storage: Arc<dyn Storage>,
        domain_dir: &Path,
    ) -> Result<Arc<dyn CertificateAuthority>> {
        let tmp_dir = PathBuf::from(options.get("tmp").map(String::as_str).unwrap_or("/tmp/scmt"));
        let certificate_expiration = chrono::Duration::seconds(
            options
                .get("certificate_expiration")
                .and_then(|v| v.parse().ok())
                .unwrap_or(86400 * 14),
        );
        let request_cleanup = chrono::Duration::seconds(
            options
                .get("request_cleanup")
                .and_then(|v| v.parse().ok())
                .unwrap_or(2_592_000),
        );

        let core = CaCore::new(domain, storage, tmp_dir, certificate_expiration, request_cleanup)
            .await
            .map_err(|e| ServerError::Internal(format!("failed to initialize ca core for {domain}: {e}")))?;

        let ca: Arc<dyn CertificateAuthority> = match options.get("ca").map(String::as_str) {
            Some("letsencrypt") => {
                let account_key_path = options
                    .get("key")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| domain_dir.join("account.pem"));
                let ca_url = AcmeCa::resolve_ca_url(options.get("url").map(String::as_str));
                Arc::new(AcmeCa::new(core, AcmeCaConfig { ca_url, account_key_path }).await?)
            }
            Some("privateca") => {
                let ca_key = options.get("key").map(PathBuf::from).unwrap_or_else(|| domain_dir.join("ca.pem"));
                let ca_cert = options.get("cert").map(PathBuf::from).unwrap_or_else(|| domain_dir.join("cert.pem"));
                let days = options.get("days").and_then(|v| v.parse().ok()).unwrap_or(365);
                let openssl_config_template = options
                    .get("openssl_config")
                    .map(PathBuf::from)
                    .ok_or_else(|| ServerError::Internal(format!("domain {domain} missing openssl_config option")))?;
                let subject_template = options
                    .get("subject")
                    .cloned()
                    .ok_or_else(|| ServerError::Internal(format!("domain {domain} missing subject option")))?;
                Arc::new(PrivateCa::new(
                    core,
                    PrivateCaConfig {
                        ca_key,
                        ca_cert,
                        days,
                        openssl_config_template,
                        subject_template,
                    },
                ))
            }
            _ => {
                return Err(ServerError::Internal(format!(
                    "domain {domain} has no or an unrecognized ca option"
                )))
            }
        };

        if let Some(hook_name) = options.get("hook") {
            let hook_opts: DomainOptions = options
                .iter()
                .filter_map(|(k, v)| k.strip_prefix("hook.").map(|rest| (rest.to_string(), v.clone())))
                .collect();

            let hook: Arc<dyn ValidationHook> = match hook_name.as_str() {
                "cloudflare" => {
                    let email = hook_opts
                        .get("email")
                        .cloned()
                        .ok_or_else(|| ServerError::Internal("cloudflare hook missing email".to_string()))?;
                    let api_key = hook_opts
                        .get("key")
                        .cloned()
                        .ok_or_else(|| ServerError::Internal("cloudflare hook missing key".to_string()))?;
                    let nameservers: Vec<IpAddr> = hook_opts
                        .get("dns")
                        .map(|v| v.split(',').filter_map(|s| s.trim().parse().ok()).collect())
                        .unwrap_or_default();
                    Arc::new(DnsHook::new(DnsHookConfig { email, api_key, nameservers })?)
                }
                "wellknown" => {
                    let port: u16 = hook_opts
                        .get("port")
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| ServerError::Internal("wellknown hook missing port".to_string()))?;
                    Arc::new(
                        HttpHook::bind(port)
                            .await
                            .map_err(|e| ServerError::Internal(format!("failed to bind wellknown hook: {e}")))?,
                    )
                }
                other => return Err(ServerError::Internal(format!("unknown hook type {other}"))),
            };

            ca.core().set_hook(hook.clone()).await;

            if !hook.verify(domain).await? {
                return Err(ServerError::Internal(format!("hook verification failed for {domain}")));
            }
        }

        tracing::info!(domain, "initialized domain");
        Ok(ca)
    }

    /// Route `hostname` to the domain with the longest matching suffix, so
    /// an overlapping pair like `example.com`/`corp.example.com` resolves
    /// `api.corp.example.com` to the more specific domain rather than
    /// whichever one the (unordered) domain map happens to iterate first.
    pub fn get_ca(&self, hostname: &str) -> Result<Arc<dyn CertificateAuthority>> {
        self.domains
            .iter()
            .filter(|(domain, _)| hostname == domain.as_str() || hostname.ends_with(&format!(".{domain}")))
            .max_by_key(|(domain, _)| domain.len())
            .map(|(_, ca)| ca.clone())
            .ok_or_else(|| ServerError::NoCa(hostname.to_string()))
    }

    pub fn supported_key_algos(&self, _hostname: &str) -> &'static [&'static str] {
        KeyAlgo::SUPPORTED
    }

    pub async fn get_key(&self, hostname: &str, algo: KeyAlgo, bits: u32) -> Result<Vec<u8>> {
        let ca = self.get_ca(hostname)?;
        ca.generate_key(hostname, algo, bits).await
    }

    pub async fn cert(&self, hostname: &str, ip: &str) -> Result<CertStatus> {
        let ca = self.get_ca(hostname)?;
        tracing::info!(hostname, ip, "certificate request");

        if !ca.certificate_exists(hostname).await.unwrap_or(false) {
            tracing::info!(hostname, ip, "certificate not found, queued for issuance");
            self.add_to_queue(hostname).await;
            return Ok(CertStatus::Pending);
        }

        match self.load_cert(&ca, hostname, ip).await {
            Ok(status) => Ok(status),
            Err(e) => {
                tracing::warn!(hostname, error = %e, "failed to load certificate, reporting pending");
                Ok(CertStatus::Pending)
            }
        }
    }

    async fn load_cert(&self, ca: &Arc<dyn CertificateAuthority>, hostname: &str, ip: &str) -> Result<CertStatus> {
        let cert = ca
            .get_cert(hostname, Some(ip))
            .await?
            .ok_or_else(|| ServerError::Internal(format!("certificate marked available but missing for {hostname}")))?;
        let fullchain = ca.get_full_chain(hostname, false).await?;
        Ok(CertStatus::Available { cert, fullchain })
    }

    async fn add_to_queue(&self, hostname: &str) {
        let mut queued = self.queued.lock().await;
        if queued.insert(hostname.to_string()) {
            tracing::info!(hostname, "added to issuance queue");
            self.queue.lock().await.push_back(hostname.to_string());
        }
    }

    async fn get_from_queue(&self) -> Option<String> {
        let hostname = self.queue.lock().await.pop_front()?;
        self.queued.lock().await.remove(&hostname);
        Some(hostname)
    }

    fn due_for_cleanup(&self) -> bool {
        self.last_cleanup.load(Ordering::Relaxed) < chrono::Utc::now().timestamp() - CLEANUP_INTERVAL_SECS
    }

    async fn run_cleanup(&self) {
        tracing::info!("starting certificate cleanup sweep");
        self.last_cleanup.store(chrono::Utc::now().timestamp(), Ordering::Relaxed);

        for (domain, ca) in &self.domains {
            if let Err(e) = ca.cleanup_certificates().await {
                tracing::warn!(domain, error = %e, "failed to clean up certificates");
            }
        }

        tracing::info!("certificate cleanup sweep finished");
    }

    /// Drive the issuance queue forever: an hourly cleanup gate, then a
    /// drain loop sleeping 10s whenever the queue is empty.
    pub async fn run(self: Arc<Self>) {
        tracing::info!("manager worker started");
        loop {
            if self.due_for_cleanup() {
                self.run_cleanup().await;
            }

            let Some(hostname) = self.get_from_queue().await else {
                tokio::time::sleep(QUEUE_IDLE_SLEEP).await;
                continue;
            };

            let ca = match self.get_ca(&hostname) {
                Ok(ca) => ca,
                Err(e) => {
                    tracing::warn!(hostname, error = %e, "no ca for queued hostname");
                    continue;
                }
            };

            match ca.issue_certificate(&hostname, false).await {
                Ok(()) => {
                    if let Err(e) = ca.register_request(&hostname, "127.0.0.1").await {
                        tracing::warn!(hostname, error = %e, "failed to register initial request");
                    }
                }
                Err(e) => tracing::warn!(hostname, error = %e, "failed to issue certificate"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scmt_storage::MemoryStorage;

    fn memory_storages() -> HashMap<String, Arc<dyn Storage>> {
        HashMap::from([("mem".to_string(), Arc::new(MemoryStorage::new()) as Arc<dyn Storage>)])
    }

    #[tokio::test]
    async fn build_skips_domain_with_unknown_storage() {
        let mut domain_opts = DomainOptions::new();
        domain_opts.insert("storage".to_string(), "missing".to_string());
        domain_opts.insert("ca".to_string(), "privateca".to_string());
        let domains = HashMap::from([("example.com".to_string(), domain_opts)]);

        let manager = Manager::build(&std::env::temp_dir().join("scmt-manager-test-1"), &domains, &memory_storages())
            .await
            .unwrap();

        assert!(manager.get_ca("example.com").is_err());
    }

    #[tokio::test]
    async fn build_rejects_unrecognized_ca_type() {
        let mut domain_opts = DomainOptions::new();
        domain_opts.insert("storage".to_string(), "mem".to_string());
        domain_opts.insert("ca".to_string(), "unknownca".to_string());
        let domains = HashMap::from([("example.com".to_string(), domain_opts)]);

        let err = Manager::build(&std::env::temp_dir().join("scmt-manager-test-2"), &domains, &memory_storages())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Internal(_)));
    }

    #[tokio::test]
    async fn get_ca_matches_exact_and_subdomains() {
        let mut domain_opts = DomainOptions::new();
        domain_opts.insert("storage".to_string(), "mem".to_string());
        domain_opts.insert("ca".to_string(), "privateca".to_string());
        domain_opts.insert("openssl_config".to_string(), "/nonexistent.cnf".to_string());
        domain_opts.insert("subject".to_string(), "/CN=%COMMONNAME%".to_string());
        let domains = HashMap::from([("example.com".to_string(), domain_opts)]);

        let manager = Manager::build(&std::env::temp_dir().join("scmt-manager-test-3"), &domains, &memory_storages())
            .await
            .unwrap();

        assert!(manager.get_ca("example.com").is_ok());
        assert!(manager.get_ca("www.example.com").is_ok());
        assert!(manager.get_ca("other.com").is_err());
        assert!(manager.get_ca("notexample.com").is_err());
    }

    fn privateca_opts() -> DomainOptions {
        let mut opts = DomainOptions::new();
        opts.insert("storage".to_string(), "mem".to_string());
        opts.insert("ca".to_string(), "privateca".to_string());
        opts.insert("openssl_config".to_string(), "/nonexistent.cnf".to_string());
        opts.insert("subject".to_string(), "/CN=%COMMONNAME%".to_string());
        opts
    }

    #[tokio::test]
    async fn get_ca_prefers_longest_matching_suffix() {
        let domains = HashMap::from([
            ("example.com".to_string(), privateca_opts()),
            ("corp.example.com".to_string(), privateca_opts()),
        ]);

        let manager = Manager::build(&std::env::temp_dir().join("scmt-manager-test-5"), &domains, &memory_storages())
            .await
            .unwrap();

        let ca = manager.get_ca("api.corp.example.com").unwrap();
        assert_eq!(ca.core().domain, "corp.example.com");

        let ca = manager.get_ca("example.com").unwrap();
        assert_eq!(ca.core().domain, "example.com");

        let ca = manager.get_ca("other.corp.example.com").unwrap();
        assert_eq!(ca.core().domain, "corp.example.com");
    }

    #[tokio::test]
    async fn queue_deduplicates_pending_hostnames() {
        let manager = Manager::build(&std::env::temp_dir().join("scmt-manager-test-4"), &HashMap::new(), &memory_storages())
            .await
            .unwrap();

        manager.add_to_queue("a.example.com").await;
        manager.add_to_queue("a.example.com").await;
        manager.add_to_queue("b.example.com").await;

        assert_eq!(manager.get_from_queue().await.as_deref(), Some("a.example.com"));
        assert_eq!(manager.get_from_queue().await.as_deref(), Some("b.example.com"));
        assert_eq!(manager.get_from_queue().await, None);
    }
}
