//! Smoke target configuration and the reachability gate.
//!
//! Nothing else in the suite runs until [`SmokeClient::wait_until_reachable`]
//! has seen the base URL answer with something other than a server error.

use common::poll::{poll_until, PollError, PollPolicy, PollVerdict, WaitCategory};
use common::secret::SecretString;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Per-request timeout for every call the suite makes.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Probe errors.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("BASE_URL environment variable not set; run the suite through `devloop test:*`")]
    MissingBaseUrl,

    #[error("Failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Failed to reach {base_url} after {attempts} attempts. Last error: {last_error}")]
    Unreachable {
        base_url: String,
        attempts: u32,
        last_error: String,
    },
}

/// Target of a smoke run, read from the environment devloop hands the suite.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub base_url: String,
    pub ws_base_url: Option<String>,
    pub credentials: Option<(String, SecretString)>,
}

impl ProbeConfig {
    /// Read `BASE_URL`, `WS_BASE_URL`, `E2E_ADMIN_EMAIL` and `E2E_ADMIN_PASSWORD`.
    pub fn from_env() -> Result<Self, ProbeError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Same as [`Self::from_env`] over an explicit map. Empty values count as unset.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ProbeError> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let base_url = get("BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or(ProbeError::MissingBaseUrl)?;

        let credentials = match (get("E2E_ADMIN_EMAIL"), get("E2E_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some((email, SecretString::from(password))),
            _ => None,
        };

        Ok(Self {
            base_url,
            ws_base_url: get("WS_BASE_URL").map(|url| url.trim_end_matches('/').to_string()),
            credentials,
        })
    }

    /// Base URL for the websocket subservice; the main base URL when unset.
    pub fn ws_base_url(&self) -> &str {
        self.ws_base_url.as_deref().unwrap_or(&self.base_url)
    }
}

/// HTTP access to the target under test.
#[derive(Debug, Clone)]
pub struct SmokeClient {
    config: ProbeConfig,
    http_client: reqwest::Client,
}

impl SmokeClient {
    pub fn new(config: ProbeConfig) -> Result<Self, ProbeError> {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    /// Wait with the standard reachability bound (10 attempts, 2s apart).
    pub async fn wait_until_reachable(&self) -> Result<u16, ProbeError> {
        self.wait_until_reachable_with(WaitCategory::Reachability.policy())
            .await
    }

    /// `GET {base}/` until any status below 500 comes back.
    ///
    /// Redirects are not followed: a 3xx already proves the service is up.
    /// Returns the status that counted as reachable.
    pub async fn wait_until_reachable_with(&self, policy: PollPolicy) -> Result<u16, ProbeError> {
        let url = format!("{}/", self.config.base_url);
        let last_error = Arc::new(Mutex::new(String::from("no attempt made")));
        let reached = Arc::new(Mutex::new(0u16));

        info!("Checking connectivity to: {}", self.config.base_url);

        let result = poll_until(&url, policy, |attempt| {
            let http_client = self.http_client.clone();
            let url = url.clone();
            let last_error = Arc::clone(&last_error);
            let reached = Arc::clone(&reached);
            let max = policy.max_attempts;

            async move {
                let error = match http_client.get(&url).send().await {
                    Ok(response) if response.status().as_u16() < 500 => {
                        *reached.lock().unwrap_or_else(PoisonError::into_inner) =
                            response.status().as_u16();
                        return PollVerdict::Ready;
                    }
                    Ok(response) => format!("status code {}", response.status().as_u16()),
                    Err(e) => e.to_string(),
                };

                if attempt < max {
                    warn!(
                        "Attempt {attempt}/{max} failed ({error}). Retrying in {:?}...",
                        policy.interval
                    );
                }
                *last_error.lock().unwrap_or_else(PoisonError::into_inner) = error;
                PollVerdict::Pending
            }
        })
        .await;

        match result {
            Ok(_) => {
                let status = *reached.lock().unwrap_or_else(PoisonError::into_inner);
                info!(
                    "Success: {} is reachable (Status: {status})",
                    self.config.base_url
                );
                Ok(status)
            }
            Err(PollError::Exhausted { attempts, .. }) => Err(ProbeError::Unreachable {
                base_url: self.config.base_url.clone(),
                attempts,
                last_error: last_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            }),
            Err(PollError::Aborted { reason, .. }) => Err(ProbeError::Unreachable {
                base_url: self.config.base_url.clone(),
                attempts: 0,
                last_error: reason,
            }),
        }
    }
}
