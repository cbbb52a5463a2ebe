//! Port-forward supervision.
//!
//! A session owns the `kubectl port-forward` child. The child is killed when
//! the session is stopped or dropped, so early returns never leak a tunnel.

use crate::kube::Kubectl;
use crate::process::ToolCommand;
use common::error::DevloopError;
use common::poll::{poll_until, PollError, PollPolicy, PollVerdict, WaitCategory};
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::Child;
use tracing::{debug, info, instrument, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum PortForwardError {
    #[error("a port-forward to {resource} in namespace {namespace} is already active")]
    AlreadyActive { namespace: String, resource: String },

    #[error("could not allocate a local port: {0}")]
    PortAllocation(#[source] std::io::Error),

    #[error("failed to launch port-forward: {0}")]
    Launch(#[from] DevloopError),

    #[error("port-forward never became ready: {0}")]
    NotReady(#[from] PollError),
}

impl From<PortForwardError> for DevloopError {
    fn from(err: PortForwardError) -> Self {
        match err {
            err @ PortForwardError::AlreadyActive { .. } => DevloopError::Configuration(err.to_string()),
            PortForwardError::PortAllocation(e) => DevloopError::Io(e),
            PortForwardError::Launch(e) => e,
            PortForwardError::NotReady(e) => DevloopError::from(e),
        }
    }
}

/// What to forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub namespace: String,
    /// kubectl resource, e.g. `svc/web-stack-ci-backend-api`.
    pub resource: String,
    pub target_port: u16,
    /// `None` lets the OS pick.
    pub local_port: Option<u16>,
}

impl TunnelSpec {
    pub fn new(namespace: impl Into<String>, resource: impl Into<String>, target_port: u16) -> Self {
        Self {
            namespace: namespace.into(),
            resource: resource.into(),
            target_port,
            local_port: None,
        }
    }
}

/// Ask the OS for a free port on loopback, then release it for kubectl.
///
/// # Errors
///
/// `PortForwardError::PortAllocation` if binding fails.
pub fn allocate_local_port() -> Result<u16, PortForwardError> {
    let listener =
        TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(PortForwardError::PortAllocation)?;
    let port = listener
        .local_addr()
        .map_err(PortForwardError::PortAllocation)?
        .port();
    drop(listener);
    Ok(port)
}

fn active_sessions() -> &'static Mutex<HashSet<(String, String)>> {
    static ACTIVE: OnceLock<Mutex<HashSet<(String, String)>>> = OnceLock::new();
    ACTIVE.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Registration of a `(namespace, resource)` pair; released on drop.
#[derive(Debug)]
struct ActiveKey(String, String);

impl ActiveKey {
    fn claim(namespace: &str, resource: &str) -> Result<Self, PortForwardError> {
        let mut active = active_sessions()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let key = (namespace.to_string(), resource.to_string());
        if !active.insert(key.clone()) {
            return Err(PortForwardError::AlreadyActive {
                namespace: key.0,
                resource: key.1,
            });
        }
        Ok(Self(key.0, key.1))
    }
}

impl Drop for ActiveKey {
    fn drop(&mut self) {
        active_sessions()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(self.0.clone(), self.1.clone()));
    }
}

/// A running, connectable tunnel.
#[derive(Debug)]
pub struct PortForwardSession {
    namespace: String,
    resource: String,
    local_port: u16,
    child: Option<Child>,
    _key: ActiveKey,
}

impl PortForwardSession {
    /// Start `kubectl port-forward` and wait until the local port accepts a
    /// connection.
    ///
    /// # Errors
    ///
    /// `AlreadyActive` for a duplicate pair, `NotReady` when the tunnel exits
    /// or stays closed past the port-forward bound, `Launch` when kubectl
    /// cannot be started.
    #[instrument(skip_all, fields(namespace = %spec.namespace, resource = %spec.resource))]
    pub async fn start(kubectl: &Kubectl, spec: TunnelSpec) -> Result<Self, PortForwardError> {
        let key = ActiveKey::claim(&spec.namespace, &spec.resource)?;
        let local_port = match spec.local_port {
            Some(port) => port,
            None => allocate_local_port()?,
        };
        let command = kubectl.port_forward(&spec.namespace, &spec.resource, local_port, spec.target_port);
        Self::launch(spec, local_port, &command, WaitCategory::PortForward.policy(), key).await
    }

    /// Same as [`Self::start`] with an arbitrary tunnel command and readiness bound.
    #[cfg(test)]
    async fn start_with(
        spec: TunnelSpec,
        local_port: u16,
        command: &ToolCommand,
        policy: PollPolicy,
    ) -> Result<Self, PortForwardError> {
        let key = ActiveKey::claim(&spec.namespace, &spec.resource)?;
        Self::launch(spec, local_port, command, policy, key).await
    }

    async fn launch(
        spec: TunnelSpec,
        local_port: u16,
        command: &ToolCommand,
        policy: PollPolicy,
        key: ActiveKey,
    ) -> Result<Self, PortForwardError> {
        let mut child = command.spawn_background()?;
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, local_port));
        let what = format!("port-forward to {} on 127.0.0.1:{local_port}", spec.resource);

        let ready = {
            let child = &mut child;
            poll_until(&what, policy, |_attempt| {
                let exited = match child.try_wait() {
                    Ok(Some(status)) => Some(format!("tunnel process exited with {status}")),
                    Ok(None) => None,
                    Err(e) => Some(format!("tunnel process state unknown: {e}")),
                };
                async move {
                    if let Some(reason) = exited {
                        return PollVerdict::Abort(reason);
                    }
                    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
                        Ok(Ok(_stream)) => PollVerdict::Ready,
                        Ok(Err(_)) | Err(_) => PollVerdict::Pending,
                    }
                }
            })
            .await
        };

        if let Err(e) = ready {
            // A tunnel that never opened may still be running.
            if let Err(kill_error) = child.kill().await {
                debug!("port-forward already gone: {kill_error}");
            }
            warn!("port-forward to {} torn down: {e}", spec.resource);
            return Err(e.into());
        }

        info!("port-forward ready on 127.0.0.1:{local_port}");
        Ok(Self {
            namespace: spec.namespace,
            resource: spec.resource,
            local_port,
            child: Some(child),
            _key: key,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.local_port())
    }

    /// Kill the tunnel and reap it.
    pub async fn stop(mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!("port-forward already gone: {e}");
            }
            info!(
                "port-forward to {} in {} stopped",
                self.resource, self.namespace
            );
        }
    }
}

impl Drop for PortForwardSession {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Instant;

    fn spec(namespace: &str) -> TunnelSpec {
        TunnelSpec::new(namespace, "svc/backend-api", 8000)
    }

    fn default_policy() -> PollPolicy {
        WaitCategory::PortForward.policy()
    }

    /// Tunnel stand-in that records its pid before becoming `sleep`.
    fn pid_recording_tunnel(pidfile: &Path) -> ToolCommand {
        ToolCommand::new("sh").args([
            "-c".to_string(),
            format!("echo $$ > '{}'; exec sleep 30", pidfile.display()),
        ])
    }

    async fn read_pid(pidfile: &Path) -> String {
        for _ in 0..100 {
            if let Ok(pid) = std::fs::read_to_string(pidfile) {
                if !pid.trim().is_empty() {
                    return pid.trim().to_string();
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("tunnel never wrote {}", pidfile.display());
    }

    fn process_alive(pid: &str) -> bool {
        std::process::Command::new("sh")
            .args(["-c", &format!("kill -0 {pid} 2>/dev/null")])
            .status()
            .unwrap()
            .success()
    }

    #[test]
    fn test_allocated_ports_are_not_fixed() {
        let port = allocate_local_port().unwrap();
        assert_ne!(port, 0);
        assert_ne!(port, 8000);
    }

    #[test]
    fn test_port_forward_command_uses_allocated_port() {
        let port = allocate_local_port().unwrap();
        let cmd = Kubectl::new().port_forward("ci", "svc/backend-api", port, 8000);
        assert!(cmd.display().ends_with(&format!("{port}:8000")));
    }

    #[test]
    fn test_already_active_maps_to_configuration() {
        let err: DevloopError = PortForwardError::AlreadyActive {
            namespace: "ci".to_string(),
            resource: "svc/api".to_string(),
        }
        .into();
        assert!(matches!(err, DevloopError::Configuration(msg) if msg.contains("already active")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ready_once_local_port_accepts() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let session = PortForwardSession::start_with(
            spec("pf-ready"),
            port,
            &ToolCommand::new("sleep").arg("30"),
            default_policy(),
        )
        .await
        .unwrap();

        assert_eq!(session.local_port(), port);
        assert_eq!(session.base_url(), format!("http://localhost:{port}"));
        session.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exited_tunnel_fails_fast() {
        let port = allocate_local_port().unwrap();
        let started = Instant::now();

        let err = PortForwardSession::start_with(spec("pf-exit"), port, &ToolCommand::new("false"), default_policy())
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(15));
        match err {
            PortForwardError::NotReady(PollError::Aborted { reason, .. }) => {
                assert!(reason.contains("exited"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_second_session_for_same_pair_is_rejected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let tunnel = ToolCommand::new("sleep").arg("30");

        let first = PortForwardSession::start_with(spec("pf-dup"), port, &tunnel, default_policy())
            .await
            .unwrap();
        let second = PortForwardSession::start_with(spec("pf-dup"), port, &tunnel, default_policy()).await;
        assert!(matches!(second, Err(PortForwardError::AlreadyActive { .. })));

        // Released once the first session is gone.
        drop(first);
        let third = PortForwardSession::start_with(spec("pf-dup"), port, &tunnel, default_policy())
            .await
            .unwrap();
        third.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_tunnel_process() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("pid");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let session = PortForwardSession::start_with(
            spec("pf-stop"),
            port,
            &pid_recording_tunnel(&pidfile),
            default_policy(),
        )
        .await
        .unwrap();
        let pid = read_pid(&pidfile).await;
        assert!(process_alive(&pid));

        session.stop().await;

        assert!(!process_alive(&pid), "tunnel {pid} survived stop()");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tunnel_that_never_opens_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("pid");
        let port = allocate_local_port().unwrap();

        let err = PortForwardSession::start_with(
            spec("pf-closed"),
            port,
            &pid_recording_tunnel(&pidfile),
            PollPolicy::new(Duration::from_millis(200), 5),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            PortForwardError::NotReady(PollError::Exhausted { attempts: 5, .. })
        ));
        let pid = read_pid(&pidfile).await;
        assert!(!process_alive(&pid), "tunnel {pid} survived a failed start");

        // The pair is free again.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        PortForwardSession::start_with(
            spec("pf-closed"),
            open_port,
            &ToolCommand::new("sleep").arg("30"),
            default_policy(),
        )
        .await
        .unwrap()
        .stop()
        .await;
    }
}
