//! Reads `/etc/scmt-client.ini` (every section is a service: `hostname`,
//! `key`, `cert`, `generator`, plus the optional `algo`/`outform`/
//! `trigger`/`fallback` keys) and keeps each service's key and certificate
//! in sync with its generator. `--once` runs a single pass and exits;
//! otherwise it loops forever, sleeping 12h between successful passes and
//! 1h after a pass that errors out entirely.

use anyhow::{Context, Result};
use clap::Parser;
use ini::Ini;
use scmt_client::{blocking_load, ServiceConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const LOAD_TIMEOUT: Duration = Duration::from_secs(500);
const DAEMON_INTERVAL: Duration = Duration::from_secs(43200);
const ERROR_RETRY_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Parser, Debug)]
#[command(name = "scmt-client-cli")]
#[command(about = "Keeps service certificates in sync with a scmt server", long_about = None)]
struct Cli {
    /// Path to the client INI configuration file.
    #[arg(short, long, env = "SCMT_CLIENT_CONFIG", default_value = "/etc/scmt-client.ini")]
    config: PathBuf,

    /// Run a single blocking pass and exit, instead of looping forever.
    #[arg(long)]
    once: bool,
}

fn load_services(path: &PathBuf) -> Result<HashMap<String, ServiceConfig>> {
    let ini = Ini::load_from_file(path).with_context(|| format!("failed to read {}", path.display()))?;

    let mut services = HashMap::new();
    for (section_name, props) in ini.iter() {
        let Some(name) = section_name else { continue };

        let options: HashMap<String, String> = props.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let service = ServiceConfig::from_options(&options)
            .with_context(|| format!("invalid configuration for service {name}"))?;
        services.insert(name.to_string(), service);
    }

    Ok(services)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "scmt_client_cli=info".into()))
        .init();

    let cli = Cli::parse();
    let services = load_services(&cli.config)?;
    tracing::info!(count = services.len(), path = %cli.config.display(), "loaded service configuration");

    if cli.once {
        tracing::info!("downloading certificates, single pass");
        blocking_load(&services, LOAD_TIMEOUT).await;
        return Ok(());
    }

    tracing::info!("starting scmt client daemon");
    loop {
        tracing::info!("starting download pass");
        let all_loaded = blocking_load(&services, LOAD_TIMEOUT).await;

        if all_loaded {
            tracing::info!(seconds = DAEMON_INTERVAL.as_secs(), "sleeping until next pass");
            tokio::time::sleep(DAEMON_INTERVAL).await;
        } else {
            tracing::warn!(seconds = ERROR_RETRY_INTERVAL.as_secs(), "pass did not complete, retrying sooner");
            tokio::time::sleep(ERROR_RETRY_INTERVAL).await;
        }
    }
}
