//! INI configuration loading. `[general]` holds `dir`/`port`/`ssl`; every
//! other section is either a storage backend definition (`type = storage`,
//! with `backend`/`address`) or a domain, collected verbatim the way the
//! reference `ConfigReader` did.

use crate::manager::DomainOptions;
use clap::Parser;
use ini::{Ini, Properties};
use scmt_storage::{build_storage, ConsulStorageConfig, Storage, StorageBackendConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },
    #[error("config missing required [general] ssl option")]
    MissingSsl,
    #[error("storage section {0} missing backend option")]
    MissingStorageBackend(String),
    #[error("storage section {0} missing address option")]
    MissingStorageAddress(String),
    #[error("unknown storage backend {0} in section {1}")]
    UnknownStorageBackend(String, String),
}

#[derive(Parser, Debug)]
#[command(name = "scmt-server")]
#[command(about = "Certificate issuance and renewal service", long_about = None)]
pub struct Cli {
    /// Path to the INI configuration file.
    #[arg(short, long, env = "SCMT_CONFIG", default_value = "/etc/scmt/server.ini")]
    pub config: PathBuf,

    /// Override the `[general]` port option.
    #[arg(long, env = "SCMT_PORT")]
    pub port: Option<u16>,
}

pub struct ServerConfig {
    pub dir: PathBuf,
    pub port: u16,
    /// Hostname of the certificate used to serve this API over TLS.
    pub ssl: String,
    pub domains: HashMap<String, DomainOptions>,
    pub storages: HashMap<String, Arc<dyn Storage>>,
}

impl ServerConfig {
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        tracing::info!(path = %cli.config.display(), "loading configuration");
        let ini = Ini::load_from_file(&cli.config).map_err(|source| ConfigError::Io {
            path: cli.config.clone(),
            source,
        })?;

        let general = ini.section(Some("general"));
        let dir = general
            .and_then(|s| s.get("dir"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/var/lib/scmt"));

        let mut port = general.and_then(|s| s.get("port")).and_then(|v| v.parse().ok()).unwrap_or(443u16);
        if let Some(cli_port) = cli.port {
            port = cli_port;
        }

        let ssl = general
            .and_then(|s| s.get("ssl"))
            .map(str::to_string)
            .ok_or(ConfigError::MissingSsl)?;

        let mut domains = HashMap::new();
        let mut storage_configs: HashMap<String, StorageBackendConfig> = HashMap::new();

        for (section_name, props) in ini.iter() {
            let Some(name) = section_name else { continue };
            if name == "general" {
                continue;
            }

            if props.get("type") == Some("storage") {
                storage_configs.insert(name.to_string(), parse_storage_section(name, props)?);
                continue;
            }

            let mut options = DomainOptions::new();
            for (key, value) in props.iter() {
                options.insert(key.to_string(), value.to_string());
            }
            domains.insert(name.to_string(), options);
        }

        let storages = storage_configs
            .into_iter()
            .map(|(name, config)| {
                tracing::info!(storage = name, kind = config.backend_type(), "configured storage backend");
                (name, build_storage(&config))
            })
            .collect();

        Ok(Self { dir, port, ssl, domains, storages })
    }
}

fn parse_storage_section(name: &str, props: &Properties) -> Result<StorageBackendConfig, ConfigError> {
    let backend = props.get("backend").ok_or_else(|| ConfigError::MissingStorageBackend(name.to_string()))?;
    match backend {
        "memory" => Ok(StorageBackendConfig::Memory),
        "consul" => {
            let addr = props
                .get("address")
                .ok_or_else(|| ConfigError::MissingStorageAddress(name.to_string()))?
                .to_string();
            let cache_ttl_secs = props.get("cache_ttl_secs").and_then(|v| v.parse().ok()).unwrap_or(10);
            Ok(StorageBackendConfig::Consul(ConsulStorageConfig { addr, cache_ttl_secs }))
        }
        other => Err(ConfigError::UnknownStorageBackend(other.to_string(), name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_ini(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_general_and_domain_sections() {
        let file = write_ini(
            "[general]\ndir = /var/lib/scmt\nport = 8443\nssl = scmt.internal\n\n\
             [main]\ntype = storage\nbackend = memory\n\n\
             [example.com]\nca = letsencrypt\nstorage = main\nhook = wellknown\nhook.port = 8080\n",
        );

        let cfg = ServerConfig::load(Cli { config: file.path().to_path_buf(), port: None }).unwrap();

        assert_eq!(cfg.dir, PathBuf::from("/var/lib/scmt"));
        assert_eq!(cfg.port, 8443);
        assert_eq!(cfg.ssl, "scmt.internal");
        assert!(cfg.storages.contains_key("main"));

        let domain = cfg.domains.get("example.com").unwrap();
        assert_eq!(domain.get("ca").unwrap(), "letsencrypt");
        assert_eq!(domain.get("hook.port").unwrap(), "8080");
    }

    #[test]
    fn cli_port_overrides_file() {
        let file = write_ini("[general]\nssl = scmt.internal\nport = 443\n");
        let cfg = ServerConfig::load(Cli { config: file.path().to_path_buf(), port: Some(9000) }).unwrap();
        assert_eq!(cfg.port, 9000);
    }

    #[test]
    fn missing_ssl_is_an_error() {
        let file = write_ini("[general]\ndir = /tmp\n");
        let err = ServerConfig::load(Cli { config: file.path().to_path_buf(), port: None }).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSsl));
    }

    #[test]
    fn unknown_storage_backend_is_rejected() {
        let file = write_ini("[general]\nssl = scmt.internal\n\n[main]\ntype = storage\nbackend = s3\n");
        let err = ServerConfig::load(Cli { config: file.path().to_path_buf(), port: None }).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStorageBackend(_, _)));
    }

    #[test]
    fn consul_storage_requires_address() {
        let file = write_ini("[general]\nssl = scmt.internal\n\n[main]\ntype = storage\nbackend = consul\n");
        let err = ServerConfig::load(Cli { config: file.path().to_path_buf(), port: None }).unwrap_err();
        assert!(matches!(err, ConfigError::MissingStorageAddress(_)));
    }
}
