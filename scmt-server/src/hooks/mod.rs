//! Challenge-validation hooks: how a CA backend proves domain control
//! before a certificate authority will sign. Two implementations exist,
//! matching ACME v1's two challenge types.

pub mod dns;
pub mod http;

use crate::error::Result;
use async_trait::async_trait;

/// A pluggable domain-validation mechanism for ACME issuance.
#[async_trait]
pub trait ValidationHook: Send + Sync {
    /// The ACME challenge type this hook satisfies, e.g. `"dns-01"`.
    fn get_challenge_type(&self) -> &'static str;

    /// Publish the challenge response so the CA can observe it.
    ///
    /// `challenge_token` is the SHA-256 digest of `key_authorization` that
    /// DNS-01 publishes as TXT content; HTTP-01 ignores it and instead
    /// serves `key_authorization` back under the raw token from
    /// `key_authorization`'s own prefix, since that's what actually shows
    /// up in the challenge's callback URL path.
    async fn deploy_challenge(
        &self,
        hostname: &str,
        challenge_token: &str,
        key_authorization: &str,
    ) -> Result<()>;

    /// Remove whatever `deploy_challenge` published.
    async fn clean_challenge(&self, hostname: &str, challenge_token: &str) -> Result<()>;

    /// Pre-flight check run once when a domain is configured. Returning
    /// `Ok(false)` fails domain initialization.
    async fn verify(&self, hostname: &str) -> Result<bool>;
}
