//! Response shapes of the endpoints the suite probes.
//!
//! Every field is optional so "absent" can be reported separately from
//! "present but not ok". A body that does not deserialize at all means the
//! JSON has the wrong shape.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status string every healthy component reports.
pub const OK: &str = "ok";

/// `{ "data": ... }` envelope used across the v2 API.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: Option<T>,
}

/// `GET /api/v2/system/ready`
#[derive(Debug, Deserialize)]
pub struct ReadinessData {
    pub components: Option<ReadinessComponents>,
    /// Flat form reported by older backends.
    pub database_connected: Option<bool>,
    pub redis_connected: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ReadinessComponents {
    pub database: Option<String>,
    pub redis: Option<String>,
}

/// `GET /api/v2/system/ws/ready`, with or without the envelope.
#[derive(Debug, Deserialize)]
pub struct WsReadiness {
    pub data: Option<WsStatus>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WsStatus {
    pub status: Option<String>,
}

impl WsReadiness {
    /// `data.status`, falling back to a top-level `status` when there is no envelope.
    pub fn status(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|data| data.status.as_deref())
            .or(self.status.as_deref())
    }
}

/// `POST /api/v2/auth/signin` body.
#[derive(Serialize)]
pub struct SigninRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

impl std::fmt::Debug for SigninRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigninRequest")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// `POST /api/v2/auth/signin` response data.
#[derive(Debug, Deserialize)]
pub struct SigninData {
    pub tokens: Option<SigninTokens>,
}

#[derive(Deserialize)]
pub struct SigninTokens {
    pub access_token: Option<String>,
}

impl std::fmt::Debug for SigninTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigninTokens")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// `GET /api/v1/health/agents` (no envelope).
#[derive(Debug, Deserialize)]
pub struct AgentHealth {
    pub metrics: Option<AgentMetrics>,
}

#[derive(Debug, Deserialize)]
pub struct AgentMetrics {
    pub total_agents: Option<f64>,
}

/// `GET /api/v2/system/diagnostics` response data.
#[derive(Debug, Deserialize)]
pub struct DiagnosticsData {
    pub dependencies: Option<BTreeMap<String, DependencyStatus>>,
}

#[derive(Debug, Deserialize)]
pub struct DependencyStatus {
    pub status: Option<String>,
}
