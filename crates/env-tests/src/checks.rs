//! The smoke suite's sub-checks and the report they feed.
//!
//! Checks are independent: each one produces its own [`CheckReport`] and a
//! failure in one never stops the others from running.

use crate::fixtures::auth_client::AuthClientError;
use crate::fixtures::system_client::RawResponse;
use crate::fixtures::{AuthClient, SystemClient};
use crate::probe::{ProbeError, SmokeClient};
use crate::schemas::{
    AgentHealth, DiagnosticsData, Envelope, ReadinessData, WsReadiness, OK,
};
use common::poll::PollPolicy;
use serde::de::DeserializeOwned;
use std::fmt;
use tracing::{info, warn};

/// Dependencies whose degradation fails the suite; anything else only warns.
const CORE_DEPENDENCIES: [&str; 2] = ["database", "redis"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Passed,
    Skipped(String),
    Failed(String),
}

/// Outcome of one named check plus anything worth a warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub name: &'static str,
    pub outcome: CheckOutcome,
    pub warnings: Vec<String>,
}

impl CheckReport {
    fn new(name: &'static str, outcome: CheckOutcome) -> Self {
        Self {
            name,
            outcome,
            warnings: Vec::new(),
        }
    }

    fn passed(name: &'static str) -> Self {
        Self::new(name, CheckOutcome::Passed)
    }

    fn failed(name: &'static str, reason: impl Into<String>) -> Self {
        Self::new(name, CheckOutcome::Failed(reason.into()))
    }

    fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, CheckOutcome::Failed(_))
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            CheckOutcome::Passed => write!(f, "PASS  {}", self.name)?,
            CheckOutcome::Skipped(reason) => write!(f, "SKIP  {}: {reason}", self.name)?,
            CheckOutcome::Failed(reason) => write!(f, "FAIL  {}: {reason}", self.name)?,
        }
        for warning in &self.warnings {
            write!(f, "\n      warning: {warning}")?;
        }
        Ok(())
    }
}

/// Every check from one run.
#[derive(Debug, Clone)]
pub struct SuiteReport {
    pub base_url: String,
    pub reachable_status: u16,
    pub checks: Vec<CheckReport>,
}

impl SuiteReport {
    pub fn is_success(&self) -> bool {
        !self.checks.iter().any(CheckReport::is_failed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckReport> {
        self.checks.iter().filter(|check| check.is_failed())
    }

    pub fn check(&self, name: &str) -> Option<&CheckReport> {
        self.checks.iter().find(|check| check.name == name)
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Smoke suite against {} (reachable, status {})",
            self.base_url, self.reachable_status
        )?;
        for check in &self.checks {
            writeln!(f, "  {check}")?;
        }
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(response: &RawResponse) -> Result<T, String> {
    serde_json::from_str(&response.body)
        .map_err(|e| format!("response does not match the expected schema: {e}"))
}

fn describe(value: Option<&str>) -> &str {
    value.unwrap_or("<missing>")
}

fn describe_flag(value: Option<bool>) -> String {
    value.map_or_else(|| "<missing>".to_string(), |flag| flag.to_string())
}

/// Readiness: database and redis must both be `ok`.
///
/// Backends without `components` report flat `*_connected` booleans, possibly
/// only some of them.
pub fn evaluate_readiness(response: &RawResponse) -> CheckReport {
    const NAME: &str = "readiness";

    if response.status != 200 && response.status != 503 {
        return CheckReport::failed(NAME, format!("readiness check returned status {}", response.status));
    }

    let envelope: Envelope<ReadinessData> = match decode(response) {
        Ok(envelope) => envelope,
        Err(reason) => return CheckReport::failed(NAME, reason),
    };
    let Some(data) = envelope.data else {
        return CheckReport::failed(NAME, "readiness response missing data");
    };

    let (database_ok, redis_ok, detail) = match (&data.components, data.database_connected, data.redis_connected) {
        (Some(components), _, _) => (
            components.database.as_deref() == Some(OK),
            components.redis.as_deref() == Some(OK),
            format!(
                "database={}, redis={}",
                describe(components.database.as_deref()),
                describe(components.redis.as_deref())
            ),
        ),
        (None, None, None) => {
            return CheckReport::failed(NAME, "readiness response missing components");
        }
        // Flat revision: whichever booleans are reported must be true.
        (None, database, redis) => (
            database.unwrap_or(true),
            redis.unwrap_or(true),
            format!(
                "database_connected={}, redis_connected={}",
                describe_flag(database),
                describe_flag(redis)
            ),
        ),
    };

    if database_ok && redis_ok {
        info!("Database and Redis connectivity verified ({detail})");
        CheckReport::passed(NAME)
    } else {
        CheckReport::failed(NAME, format!("connectivity not confirmed ({detail})"))
    }
}

/// Websocket subservice reports `healthy`.
pub fn evaluate_ws_readiness(response: &RawResponse) -> CheckReport {
    const NAME: &str = "websocket_health";

    if response.status != 200 {
        return CheckReport::failed(NAME, format!("websocket health check returned status {}", response.status));
    }

    match decode::<WsReadiness>(response) {
        Ok(payload) if payload.status() == Some("healthy") => CheckReport::passed(NAME),
        Ok(payload) => CheckReport::failed(
            NAME,
            format!("websocket service not healthy: status={}", describe(payload.status())),
        ),
        Err(reason) => CheckReport::failed(NAME, reason),
    }
}

/// Core dependencies fail the check, everything else only warns.
pub fn evaluate_diagnostics(response: &RawResponse) -> CheckReport {
    const NAME: &str = "dependency_diagnostics";

    if response.status != 200 && response.status != 503 {
        return CheckReport::failed(NAME, format!("diagnostics check returned status {}", response.status));
    }

    let envelope: Envelope<DiagnosticsData> = match decode(response) {
        Ok(envelope) => envelope,
        Err(reason) => return CheckReport::failed(NAME, reason),
    };
    let Some(dependencies) = envelope.data.and_then(|data| data.dependencies) else {
        return CheckReport::failed(NAME, "diagnostics response missing data.dependencies");
    };

    let mut failures = Vec::new();
    for core in CORE_DEPENDENCIES {
        match dependencies.get(core).map(|dep| dep.status.as_deref()) {
            Some(Some(OK)) => {}
            Some(status) => failures.push(format!("{core} status={}", describe(status))),
            None => failures.push(format!("{core} dependency status missing")),
        }
    }

    let warnings: Vec<String> = dependencies
        .iter()
        .filter(|(name, _)| !CORE_DEPENDENCIES.contains(&name.as_str()))
        .filter(|(_, dep)| dep.status.as_deref() != Some(OK))
        .map(|(name, dep)| format!("{name} status: {}", describe(dep.status.as_deref())))
        .collect();
    for warning in &warnings {
        warn!("{warning}");
    }

    if failures.is_empty() {
        CheckReport::passed(NAME).with_warnings(warnings)
    } else {
        CheckReport::failed(NAME, format!("diagnostics report {}", failures.join(", ")))
            .with_warnings(warnings)
    }
}

/// Agent manager answers; an empty pool is only a warning.
pub fn evaluate_agent_health(response: &RawResponse) -> CheckReport {
    const NAME: &str = "agent_health";

    if response.status != 200 {
        return CheckReport::failed(NAME, format!("agent health check returned status {}", response.status));
    }

    let health: AgentHealth = match decode(response) {
        Ok(health) => health,
        Err(reason) => return CheckReport::failed(NAME, reason),
    };

    let warning = match health.metrics.and_then(|metrics| metrics.total_agents) {
        Some(total) if total > 0.0 => {
            info!("Agent manager integration verified ({total} agents available)");
            None
        }
        Some(_) => Some("no agents available in agent health response".to_string()),
        None => Some("agent health response has no metrics.total_agents".to_string()),
    };

    CheckReport::passed(NAME).with_warnings(warning.into_iter().collect())
}

fn transport_failure(name: &'static str, endpoint: &str, error: &reqwest::Error) -> CheckReport {
    CheckReport::failed(name, format!("{endpoint} not reachable: {error}"))
}

/// Sign in, then call a protected endpoint with the token.
pub async fn check_auth_flow(client: &SmokeClient) -> CheckReport {
    const NAME: &str = "auth_flow";

    let Some((email, password)) = &client.config().credentials else {
        return CheckReport::new(
            NAME,
            CheckOutcome::Skipped("E2E_ADMIN_EMAIL/E2E_ADMIN_PASSWORD not set".to_string()),
        );
    };

    let auth = AuthClient::new(client.base_url(), client.http_client().clone());
    let result = async {
        let token = auth.sign_in(email, password).await?;
        auth.me(&token).await?;
        Ok::<(), AuthClientError>(())
    }
    .await;

    match result {
        Ok(()) => {
            info!("Authentication flow verified");
            CheckReport::passed(NAME)
        }
        Err(e) => CheckReport::failed(NAME, e.to_string()),
    }
}

/// Wait for the target, then run every check.
pub async fn run_suite(client: &SmokeClient) -> Result<SuiteReport, ProbeError> {
    let reachable_status = client.wait_until_reachable().await?;
    Ok(run_checks(client, reachable_status).await)
}

/// Same as [`run_suite`] with an explicit reachability policy.
pub async fn run_suite_with(client: &SmokeClient, policy: PollPolicy) -> Result<SuiteReport, ProbeError> {
    let reachable_status = client.wait_until_reachable_with(policy).await?;
    Ok(run_checks(client, reachable_status).await)
}

async fn run_checks(client: &SmokeClient, reachable_status: u16) -> SuiteReport {
    let system = SystemClient::new(
        client.base_url(),
        client.config().ws_base_url(),
        client.http_client().clone(),
    );

    let mut checks = Vec::new();

    checks.push(match system.readiness().await {
        Ok(response) => evaluate_readiness(&response),
        Err(e) => transport_failure("readiness", "/api/v2/system/ready", &e),
    });

    checks.push(match system.ws_readiness().await {
        Ok(response) => evaluate_ws_readiness(&response),
        Err(e) => transport_failure("websocket_health", "/api/v2/system/ws/ready", &e),
    });

    checks.push(check_auth_flow(client).await);

    checks.push(match system.agent_health().await {
        Ok(response) => evaluate_agent_health(&response),
        Err(e) => transport_failure("agent_health", "/api/v1/health/agents", &e),
    });

    checks.push(match system.diagnostics().await {
        Ok(response) => evaluate_diagnostics(&response),
        Err(e) => transport_failure("dependency_diagnostics", "/api/v2/system/diagnostics", &e),
    });

    let report = SuiteReport {
        base_url: client.base_url().to_string(),
        reachable_status,
        checks,
    };

    if report.is_success() {
        info!("All smoke checks passed");
    } else {
        warn!("Some smoke checks failed");
    }
    report
}
