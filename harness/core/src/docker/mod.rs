pub mod commands;
pub mod network;

use std::{process::Stdio, time::Duration};

use tokio::{process::Command, time::timeout};
use tracing::{info, warn};

use crate::{
    docker::commands::DockerCommandError,
    errors::SessionError,
    session::{EnvOverrides, Session, SessionOptions},
};

const DOCKER_INFO_TIMEOUT: Duration = Duration::from_secs(15);
const LOGS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
/// Failures bootstrapping a session from environment overrides.
pub enum BootstrapError {
    #[error("docker does not appear to be available on this host")]
    DockerUnavailable,
    #[error("failed to create session network {name}: {source}")]
    Network {
        name: String,
        #[source]
        source: DockerCommandError,
    },
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Checks that `docker info` succeeds within a timeout.
pub async fn ensure_docker_available() -> Result<(), BootstrapError> {
    let mut command = Command::new("docker");
    command
        .arg("info")
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let available = timeout(DOCKER_INFO_TIMEOUT, command.status())
        .await
        .ok()
        .and_then(Result::ok)
        .map(|status| status.success())
        .unwrap_or(false);

    if available {
        Ok(())
    } else {
        Err(BootstrapError::DockerUnavailable)
    }
}

/// Builds a session from resolved environment overrides, creating a network
/// named after the session when no override names an existing one.
pub async fn bootstrap_session(overrides: &EnvOverrides) -> Result<Session, BootstrapError> {
    ensure_docker_available().await?;

    let network_id = match &overrides.network_id {
        Some(network) => network.clone(),
        None => {
            let name = format!("{}-net", overrides.session_id);
            info!(network = %name, "creating session network");
            network::create_network(&name)
                .await
                .map_err(|source| BootstrapError::Network { name, source })?
        }
    };

    let options = SessionOptions {
        publish_all_ports: overrides.publish_all_ports,
        ..SessionOptions::default()
    };
    Ok(Session::with_options(
        overrides.session_id.clone(),
        network_id,
        options,
    )?)
}

/// Best-effort dump of a container's logs to stderr for debugging failures.
pub async fn dump_container_logs(container: &str) {
    let mut command = Command::new("docker");
    command.arg("logs").arg(container);

    match timeout(LOGS_TIMEOUT, command.output()).await {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stdout.trim().is_empty() {
                eprintln!("[{container}] logs:\n{stdout}");
            }
            if !stderr.trim().is_empty() {
                eprintln!("[{container}] errors:\n{stderr}");
            }
        }
        Ok(Err(err)) => warn!(container, error = %err, "failed to collect container logs"),
        Err(_) => warn!(container, "collecting container logs timed out"),
    }
}
