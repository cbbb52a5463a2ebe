//! Environment Smoke Test Suite
//!
//! Black-box HTTP checks against a deployed web stack. The suite is pointed at
//! a target through environment variables that `devloop` sets on the test
//! process only.
//!
//! # Features
//!
//! - `smoke`: health, websocket health, auth flow, agent health and dependency
//!   diagnostics against `BASE_URL`
//!
//! # Environment
//!
//! - `BASE_URL` (required; the suite fails, it does not skip, without it)
//! - `WS_BASE_URL` (websocket subservice, defaults to `BASE_URL`)
//! - `E2E_ADMIN_EMAIL` / `E2E_ADMIN_PASSWORD` (auth flow is skipped unless both are set)
//!
//! # Usage
//!
//! ```bash
//! # From repo root - runs 0 env-tests (no default features)
//! cargo test
//!
//! # Smoke suite against a running stack
//! BASE_URL=http://localhost:8000 cargo test -p env-tests --features smoke -- --nocapture --test-threads=1
//!
//! # Usually invoked through devloop
//! devloop test:localdev
//! ```

pub mod checks;
pub mod fixtures;
pub mod probe;
pub mod schemas;
