//! HTTP-01 hook: a small self-hosted listener serving
//! `/.well-known/acme-challenge/<token>`, backed by an in-memory map kept
//! in sync with whatever the CA backend is currently waiting on.

use super::ValidationHook;
use crate::error::Result;
use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
struct ChallengeMap(Arc<RwLock<HashMap<String, String>>>);

pub struct HttpHook {
    challenges: ChallengeMap,
}

impl HttpHook {
    /// Bind the challenge listener on `port` and return a hook handle.
    /// The listener runs for the lifetime of the process; there is no
    /// equivalent teardown since ACME v1 domains never unregister.
    pub async fn bind(port: u16) -> std::io::Result<Self> {
        let challenges = ChallengeMap::default();
        let app = Router::new()
            .route("/.well-known/acme-challenge/{token}", get(serve_challenge))
            .route("/.well-known/acme-test", get(|| async { "available" }))
            .with_state(challenges.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "http-01 challenge listener bound");

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "http-01 challenge listener stopped");
            }
        });

        Ok(Self { challenges })
    }
}

async fn serve_challenge(
    State(challenges): State<ChallengeMap>,
    Path(token): Path<String>,
) -> std::result::Result<String, StatusCode> {
    challenges
        .0
        .read()
        .await
        .get(&token)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)
}

#[async_trait]
impl ValidationHook for HttpHook {
    fn get_challenge_type(&self) -> &'static str {
        "http-01"
    }

    async fn deploy_challenge(
        &self,
        hostname: &str,
        _challenge_token: &str,
        key_authorization: &str,
    ) -> Result<()> {
        // The CA polls `/.well-known/acme-challenge/<token>`, where <token>
        // is the part of key_authorization before the thumbprint dot --
        // not the pre-hashed `challenge_token` the DNS hook indexes by.
        let token = key_authorization
            .split('.')
            .next()
            .unwrap_or(key_authorization)
            .to_string();
        tracing::info!(hostname, token, "deploying http-01 challenge");
        self.challenges
            .0
            .write()
            .await
            .insert(token, key_authorization.to_string());
        Ok(())
    }

    async fn clean_challenge(&self, _hostname: &str, _challenge_token: &str) -> Result<()> {
        Ok(())
    }

    async fn verify(&self, _hostname: &str) -> Result<bool> {
        Ok(true)
    }
}
