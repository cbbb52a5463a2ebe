//! System and health endpoints.

use reqwest::Client;

/// Status and raw body of a response.
///
/// Bodies are kept as text so callers can tell a decode failure apart from
/// a transport failure.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Client for the system endpoints of the API.
pub struct SystemClient {
    base_url: String,
    ws_base_url: String,
    http_client: Client,
}

impl SystemClient {
    pub fn new(base_url: impl Into<String>, ws_base_url: impl Into<String>, http_client: Client) -> Self {
        Self {
            base_url: base_url.into(),
            ws_base_url: ws_base_url.into(),
            http_client,
        }
    }

    async fn get(&self, url: String) -> Result<RawResponse, reqwest::Error> {
        let response = self.http_client.get(&url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(RawResponse { status, body })
    }

    /// `GET /api/v2/system/ready`
    pub async fn readiness(&self) -> Result<RawResponse, reqwest::Error> {
        self.get(format!("{}/api/v2/system/ready", self.base_url)).await
    }

    /// `GET /api/v2/system/ws/ready` on the websocket subservice.
    ///
    /// This is plain HTTP, not a websocket upgrade.
    pub async fn ws_readiness(&self) -> Result<RawResponse, reqwest::Error> {
        self.get(format!("{}/api/v2/system/ws/ready", self.ws_base_url))
            .await
    }

    /// `GET /api/v2/system/diagnostics`
    pub async fn diagnostics(&self) -> Result<RawResponse, reqwest::Error> {
        self.get(format!("{}/api/v2/system/diagnostics", self.base_url))
            .await
    }

    /// `GET /api/v1/health/agents`
    pub async fn agent_health(&self) -> Result<RawResponse, reqwest::Error> {
        self.get(format!("{}/api/v1/health/agents", self.base_url))
            .await
    }
}
