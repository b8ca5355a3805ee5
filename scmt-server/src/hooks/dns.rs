//! DNS-01 hook backed by a CloudFlare-shaped REST API: legacy
//! `X-Auth-Email`/`X-Auth-Key` header auth, zone lookup cached by TLD, TXT
//! record CRUD, and propagation polling against configurable nameservers.

use super::ValidationHook;
use crate::error::{Result, ServerError};
use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::TokioResolver;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;

const API_BASE: &str = "https://api.cloudflare.com/client/v4/";
const PROPAGATION_TIMEOUT: Duration = Duration::from_secs(1800);
const PROPAGATION_POLL: Duration = Duration::from_secs(30);
const DEPLOY_SETTLE: Duration = Duration::from_secs(10);

pub struct DnsHookConfig {
    pub email: String,
    pub api_key: String,
    pub nameservers: Vec<IpAddr>,
}

pub struct DnsHook {
    client: reqwest::Client,
    email: String,
    api_key: String,
    zone_cache: RwLock<HashMap<String, String>>,
    resolver: TokioResolver,
}

#[derive(Deserialize)]
struct CfResponse<T> {
    result: T,
    result_info: Option<ResultInfo>,
}

#[derive(Deserialize)]
struct ResultInfo {
    total_pages: u32,
}

#[derive(Deserialize)]
struct ZoneRecord {
    id: String,
}

#[derive(Deserialize, Clone)]
struct DnsRecord {
    id: String,
    name: String,
}

impl DnsHook {
    pub fn new(config: DnsHookConfig) -> Result<Self> {
        let resolver = if config.nameservers.is_empty() {
            TokioResolver::builder_tokio()
                .map_err(|e| ServerError::Internal(format!("failed to build resolver: {e}")))?
                .build()
        } else {
            let mut resolver_config = ResolverConfig::new();
            for ip in &config.nameservers {
                resolver_config.add_name_server(NameServerConfig::new(
                    std::net::SocketAddr::new(*ip, 53),
                    Protocol::Udp,
                ));
            }
            TokioResolver::builder_with_config(resolver_config, TokioConnectionProvider::default()).build()
        };

        Ok(Self {
            client: reqwest::Client::new(),
            email: config.email,
            api_key: config.api_key,
            zone_cache: RwLock::new(HashMap::new()),
            resolver,
        })
    }

    fn headers(&self) -> Result<reqwest::header::HeaderMap> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "X-Auth-Email",
            self.email.parse().map_err(|_| ServerError::Internal("invalid email header".into()))?,
        );
        headers.insert(
            "X-Auth-Key",
            self.api_key.parse().map_err(|_| ServerError::Internal("invalid key header".into()))?,
        );
        Ok(headers)
    }

    /// Registrable-domain heuristic: the last two dot-separated labels.
    /// Good enough for the flat `name.tld` and `name.co.uk`-style zones
    /// CloudFlare-managed domains typically use; it is not a full public
    /// suffix list.
    fn registrable_domain(domain: &str) -> &str {
        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() <= 2 {
            domain
        } else {
            let start = labels.len() - 2;
            let offset: usize = labels[..start].iter().map(|l| l.len() + 1).sum();
            &domain[offset..]
        }
    }

    async fn zone_id(&self, domain: &str) -> Result<String> {
        let tld = Self::registrable_domain(domain).to_string();
        if let Some(id) = self.zone_cache.read().await.get(&tld) {
            return Ok(id.clone());
        }

        let url = format!("{API_BASE}zones?name={tld}");
        let resp: CfResponse<Vec<ZoneRecord>> = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .send()
            .await
            .map_err(|e| ServerError::CaRequest(e.to_string()))?
            .json()
            .await
            .map_err(|e| ServerError::CaRequest(e.to_string()))?;

        let id = resp
            .result
            .first()
            .ok_or_else(|| ServerError::CaRequest(format!("no cloudflare zone found for {tld}")))?
            .id
            .clone();

        tracing::info!(domain, tld, zone_id = id, "resolved zone id");
        self.zone_cache.write().await.insert(tld, id.clone());
        Ok(id)
    }

    async fn txt_record_id(&self, zone_id: &str, name: &str, content: &str) -> Result<Option<String>> {
        let url = format!("{API_BASE}zones/{zone_id}/dns_records?type=TXT&name={name}&content={content}");
        let resp: CfResponse<Vec<ZoneRecord>> = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .send()
            .await
            .map_err(|e| ServerError::CaRequest(e.to_string()))?
            .json()
            .await
            .map_err(|e| ServerError::CaRequest(e.to_string()))?;

        Ok(resp.result.first().map(|r| r.id.clone()))
    }

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<()> {
        let url = format!("{API_BASE}zones/{zone_id}/dns_records/{record_id}");
        self.client
            .delete(&url)
            .headers(self.headers()?)
            .send()
            .await
            .map_err(|e| ServerError::CaRequest(e.to_string()))?
            .error_for_status()
            .map_err(|e| ServerError::CaRequest(e.to_string()))?;
        Ok(())
    }

    async fn records(&self, domain: &str) -> Result<Vec<DnsRecord>> {
        let zone_id = self.zone_id(domain).await?;
        let mut page = 1u32;
        let mut items = Vec::new();

        loop {
            let url = format!("{API_BASE}zones/{zone_id}/dns_records?type=TXT&per_page=100&page={page}");
            let resp: CfResponse<Vec<DnsRecord>> = self
                .client
                .get(&url)
                .headers(self.headers()?)
                .send()
                .await
                .map_err(|e| ServerError::CaRequest(e.to_string()))?
                .json()
                .await
                .map_err(|e| ServerError::CaRequest(e.to_string()))?;

            items.extend(resp.result.iter().cloned());
            let total_pages = resp.result_info.map(|i| i.total_pages).unwrap_or(1);
            page += 1;
            if total_pages <= page {
                break;
            }
        }

        Ok(items)
    }

    async fn propagated(&self, name: &str, token: &str) -> bool {
        let Ok(lookup) = self.resolver.txt_lookup(name).await else {
            return false;
        };
        lookup
            .iter()
            .flat_map(|txt| txt.txt_data().iter())
            .any(|data| data.as_ref() == token.as_bytes())
    }
}

#[async_trait]
impl ValidationHook for DnsHook {
    fn get_challenge_type(&self) -> &'static str {
        "dns-01"
    }

    async fn deploy_challenge(
        &self,
        hostname: &str,
        challenge_token: &str,
        _key_authorization: &str,
    ) -> Result<()> {
        let zone_id = self.zone_id(hostname).await?;
        let name = format!("_acme-challenge.{hostname}");
        tracing::info!(hostname, token = challenge_token, "creating TXT record");

        let url = format!("{API_BASE}zones/{zone_id}/dns_records");
        self.client
            .post(&url)
            .headers(self.headers()?)
            .json(&json!({
                "type": "TXT",
                "name": name,
                "content": challenge_token,
                "ttl": 1,
            }))
            .send()
            .await
            .map_err(|e| ServerError::CaRequest(e.to_string()))?
            .error_for_status()
            .map_err(|e| ServerError::CaRequest(e.to_string()))?;

        sleep(DEPLOY_SETTLE).await;

        let deadline = tokio::time::Instant::now() + PROPAGATION_TIMEOUT;
        let started = tokio::time::Instant::now();
        while tokio::time::Instant::now() < deadline {
            if self.propagated(&name, challenge_token).await {
                tracing::info!(hostname, "TXT record propagated");
                break;
            }
            tracing::debug!(hostname, elapsed = ?started.elapsed(), "DNS not propagated yet, waiting");
            sleep(PROPAGATION_POLL).await;
        }

        Ok(())
    }

    async fn clean_challenge(&self, hostname: &str, challenge_token: &str) -> Result<()> {
        let zone_id = self.zone_id(hostname).await?;
        let name = format!("_acme-challenge.{hostname}");
        if let Some(record_id) = self.txt_record_id(&zone_id, &name, challenge_token).await? {
            self.delete_record(&zone_id, &record_id).await?;
        }
        Ok(())
    }

    async fn verify(&self, hostname: &str) -> Result<bool> {
        let zone_id = self.zone_id(hostname).await?;
        let records = self.records(hostname).await?;
        tracing::info!(hostname, count = records.len(), "cleaning up stale acme challenge records");

        for record in records {
            if record.name.starts_with("_acme-challenge.") {
                tracing::info!(name = record.name, "removing stale acme challenge record");
                self.delete_record(&zone_id, &record.id).await?;
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registrable_domain_strips_subdomains() {
        assert_eq!(DnsHook::registrable_domain("www.example.com"), "example.com");
        assert_eq!(DnsHook::registrable_domain("a.b.c.example.com"), "example.com");
    }

    #[test]
    fn registrable_domain_leaves_bare_domains_alone() {
        assert_eq!(DnsHook::registrable_domain("example.com"), "example.com");
        assert_eq!(DnsHook::registrable_domain("localhost"), "localhost");
    }
}
