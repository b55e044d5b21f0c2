use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::normalize::{decode_relay_url, normalize_endpoint};
use super::{BootstrapSource, RelayServer, SessionBootstrap, BOOTSTRAP_OK};
use crate::config::BridgeConfig;
use crate::error::{AppError, Result};

/// Raw `/signaling/{camera}` response body
#[derive(Debug, Deserialize)]
struct BootstrapResponse {
    result: Option<String>,
    #[serde(default)]
    cam: String,
    #[serde(rename = "ClientId", default)]
    client_id: String,
    #[serde(rename = "signalingUrl", default)]
    signaling_url: String,
    #[serde(default)]
    servers: Vec<ServerEntry>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    #[serde(alias = "url", default)]
    urls: Option<Endpoints>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    credential: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Endpoints {
    One(String),
    Many(Vec<String>),
}

impl From<ServerEntry> for RelayServer {
    fn from(entry: ServerEntry) -> Self {
        let endpoints = match entry.urls {
            Some(Endpoints::One(url)) => vec![url],
            Some(Endpoints::Many(urls)) => urls,
            None => vec![],
        };
        Self {
            endpoints: endpoints
                .iter()
                .map(|url| normalize_endpoint(url))
                .collect(),
            username: entry.username,
            credential: entry.credential,
        }
    }
}

impl BootstrapResponse {
    fn into_bootstrap(self, camera_id: &str) -> Result<SessionBootstrap> {
        let result = self.result.ok_or(AppError::SignalingRequest)?;
        if result != BOOTSTRAP_OK {
            if let Some(ref error) = self.error {
                warn!("Bridge rejected signaling for {}: {}", camera_id, error);
            }
            return Err(AppError::SignalingRejected(result));
        }
        if self.client_id.is_empty() || self.signaling_url.is_empty() {
            return Err(AppError::SignalingRejected(
                "incomplete bootstrap".to_string(),
            ));
        }

        let relay_servers: Vec<RelayServer> = self
            .servers
            .into_iter()
            .map(RelayServer::from)
            .filter(|server| !server.endpoints.is_empty())
            .collect();

        Ok(SessionBootstrap {
            status: result,
            camera_id: if self.cam.is_empty() {
                camera_id.to_string()
            } else {
                self.cam
            },
            peer_client_id: self.client_id,
            relay_url: decode_relay_url(&self.signaling_url),
            relay_servers,
        })
    }
}

fn bootstrap_url(base_url: &str, camera_id: &str) -> String {
    format!(
        "{}/signaling/{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(camera_id)
    )
}

/// Fetch session bootstrap data for `camera_id` from the bridge at `base_url`
pub async fn fetch_bootstrap(
    client: &reqwest::Client,
    base_url: &str,
    camera_id: &str,
) -> Result<SessionBootstrap> {
    let camera_id = camera_id.trim();
    if camera_id.is_empty() {
        return Err(AppError::BadRequest(
            "camera id must not be empty".to_string(),
        ));
    }

    let url = bootstrap_url(base_url, camera_id);
    debug!("Requesting signaling bootstrap: {}", url);

    let response = client.get(&url).send().await.map_err(|e| {
        warn!("Signaling request {} failed: {}", url, e);
        AppError::SignalingRequest
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!("Signaling request {} returned {}: {}", url, status, body);
        return Err(AppError::SignalingRequest);
    }

    let body = response.json::<BootstrapResponse>().await.map_err(|e| {
        warn!("Invalid signaling response from {}: {}", url, e);
        AppError::SignalingRequest
    })?;

    let bootstrap = body.into_bootstrap(camera_id)?;
    info!(
        "Signaling bootstrap for {}: peer {}, {} relay server(s)",
        bootstrap.camera_id,
        bootstrap.peer_client_id,
        bootstrap.relay_servers.len()
    );
    Ok(bootstrap)
}

/// HTTP bridge client
pub struct BridgeClient {
    client: reqwest::Client,
    base_url: String,
}

impl BridgeClient {
    /// Create a client for the bridge described by `config`
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl BootstrapSource for BridgeClient {
    async fn fetch_bootstrap(&self, camera_id: &str) -> Result<SessionBootstrap> {
        fetch_bootstrap(&self.client, &self.base_url, camera_id).await
    }
}
