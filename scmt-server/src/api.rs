//! The wire API: `GET /` for a liveness probe, `POST /call` dispatching on a
//! `type` field to the `key` and `cert` operations. Errors are reported as
//! `{"code": N, "error": "slug"}`, matching what existing clients parse.

use crate::ca::KeyAlgo;
use crate::error::{Result, ServerError};
use crate::manager::{CertStatus, Manager};
use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/call", post(dispatch))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": 1 }))
}

async fn dispatch(
    State(state): State<AppState>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Result<Json<Value>> {
    if body.is_empty() {
        return Err(ServerError::BadContentLength);
    }

    let req: Value = serde_json::from_slice(&body).map_err(|_| ServerError::BadRequestBody)?;
    let kind = req.get("type").and_then(Value::as_str).ok_or(ServerError::UnknownRequestType)?;
    let ip = client_ip(&headers, addr);

    match kind {
        "key" => key_call(&state, &req, &ip).await,
        "cert" => cert_call(&state, &req, &ip).await,
        // "sign" is named alongside "key" and "cert" in older client code
        // but has no server-side implementation to dispatch to; treat it
        // the same as any other unrecognized type.
        _ => Err(ServerError::UnknownRequestType),
    }
}

/// Trust `X-Real-IP` only when it parses as an actual IP address;
/// otherwise fall back to the TCP peer address rather than a hardcoded
/// loopback.
fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    if let Some(raw) = headers.get("X-Real-IP").and_then(|v| v.to_str().ok()) {
        if raw.parse::<IpAddr>().is_ok() {
            return raw.to_string();
        }
    }
    addr.ip().to_string()
}

async fn key_call(state: &AppState, req: &Value, ip: &str) -> Result<Json<Value>> {
    let bits_value = req.get("bits").ok_or(ServerError::MissingBits)?;
    let bits: u32 = bits_value
        .as_u64()
        .or_else(|| bits_value.as_str().and_then(|s| s.parse().ok()))
        .ok_or(ServerError::MissingBits)? as u32;

    let hostname = req.get("hostname").and_then(Value::as_str).ok_or(ServerError::MissingHostname)?;

    let algo_str = req.get("algo").and_then(Value::as_str).ok_or(ServerError::BadAlgo)?;
    if !state.manager.supported_key_algos(hostname).contains(&algo_str) {
        return Err(ServerError::BadAlgo);
    }
    let algo = KeyAlgo::parse(algo_str).ok_or(ServerError::BadAlgo)?;

    let key = state
        .manager
        .get_key(hostname, algo, bits)
        .await
        .map_err(|e| ServerError::KeyGeneration(e.to_string()))?;

    tracing::info!(hostname, ip, "key generated");
    Ok(Json(json!({
        "key": String::from_utf8_lossy(&key),
        "code": 200,
    })))
}

async fn cert_call(state: &AppState, req: &Value, ip: &str) -> Result<Json<Value>> {
    let hostname = req
        .get("hostname")
        .and_then(Value::as_str)
        .ok_or(ServerError::NoHostnameSpecified)?;

    match state.manager.cert(hostname, ip).await? {
        CertStatus::Pending => Ok(Json(json!({ "status": "pending" }))),
        CertStatus::Available { cert, fullchain } => Ok(Json(json!({
            "status": "available",
            "cert": String::from_utf8_lossy(&cert),
            "fullchain": String::from_utf8_lossy(&fullchain),
        }))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scmt_storage::MemoryStorage;
    use std::collections::HashMap;

    async fn test_manager() -> Arc<Manager> {
        let storages: HashMap<String, Arc<dyn scmt_storage::Storage>> =
            HashMap::from([("mem".to_string(), Arc::new(MemoryStorage::new()) as Arc<dyn scmt_storage::Storage>)]);
        let manager = Manager::build(&std::env::temp_dir().join("scmt-api-test"), &HashMap::new(), &storages)
            .await
            .unwrap();
        Arc::new(manager)
    }

    #[test]
    fn health_body_matches_wire_contract() {
        let body = serde_json::to_value(json!({ "ok": 1 })).unwrap();
        assert_eq!(body["ok"], 1);
    }

    #[tokio::test]
    async fn key_call_rejects_unknown_algo() {
        let manager = test_manager().await;
        let state = AppState { manager };
        let req = json!({ "hostname": "example.com", "bits": 2048, "algo": "DSA" });
        let err = key_call(&state, &req, "127.0.0.1").await.unwrap_err();
        assert!(matches!(err, ServerError::BadAlgo));
    }

    #[tokio::test]
    async fn key_call_requires_bits() {
        let manager = test_manager().await;
        let state = AppState { manager };
        let req = json!({ "hostname": "example.com", "algo": "RSA" });
        let err = key_call(&state, &req, "127.0.0.1").await.unwrap_err();
        assert!(matches!(err, ServerError::MissingBits));
    }

    #[tokio::test]
    async fn cert_call_requires_hostname() {
        let manager = test_manager().await;
        let state = AppState { manager };
        let req = json!({});
        let err = cert_call(&state, &req, "127.0.0.1").await.unwrap_err();
        assert!(matches!(err, ServerError::NoHostnameSpecified));
    }

    #[tokio::test]
    async fn cert_call_on_unrouted_host_is_no_ca() {
        let manager = test_manager().await;
        let state = AppState { manager };
        let req = json!({ "hostname": "nowhere.example" });
        let err = cert_call(&state, &req, "127.0.0.1").await.unwrap_err();
        assert!(matches!(err, ServerError::NoCa(_)));
    }

    #[test]
    fn client_ip_rejects_unparsable_header() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Real-IP", "not-an-ip".parse().unwrap());
        let addr: SocketAddr = "10.0.0.5:1234".parse().unwrap();
        assert_eq!(client_ip(&headers, addr), "10.0.0.5");
    }

    #[test]
    fn client_ip_trusts_valid_header() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Real-IP", "203.0.113.9".parse().unwrap());
        let addr: SocketAddr = "10.0.0.5:1234".parse().unwrap();
        assert_eq!(client_ip(&headers, addr), "203.0.113.9");
    }
}
