//! P0 Smoke Tests: System Health
//!
//! Waits for the target at `BASE_URL` to answer, then runs every sub-check
//! and fails if any of them failed. Warnings are printed but never fail.

#![cfg(feature = "smoke")]

use env_tests::checks::run_suite;
use env_tests::probe::{ProbeConfig, SmokeClient};

/// Helper to create a client for the configured target.
fn smoke_client() -> SmokeClient {
    let config = ProbeConfig::from_env()
        .expect("BASE_URL must be set - run this suite through `devloop test:*`");
    SmokeClient::new(config).expect("Failed to create HTTP client")
}

#[tokio::test]
async fn test_system_health() {
    let client = smoke_client();

    let report = run_suite(&client)
        .await
        .expect("System should become reachable before sub-checks run");

    println!("{report}");

    let failures: Vec<String> = report.failures().map(ToString::to_string).collect();
    assert!(
        failures.is_empty(),
        "{} smoke check(s) failed:\n{}",
        failures.len(),
        failures.join("\n")
    );
}
