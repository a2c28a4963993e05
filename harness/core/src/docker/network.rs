use std::time::Duration;

use crate::docker::commands::{DockerCommandError, run_docker, run_docker_capture};

const NETWORK_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates a docker network and returns its id.
pub async fn create_network(name: &str) -> Result<String, DockerCommandError> {
    let stdout = run_docker_capture(
        &["network", "create", name],
        NETWORK_TIMEOUT,
        "docker network create",
    )
    .await?;
    Ok(stdout.trim().to_owned())
}

/// Removes a docker network by name or id.
pub async fn remove_network(network: &str) -> Result<(), DockerCommandError> {
    run_docker(
        &["network", "rm", network],
        NETWORK_TIMEOUT,
        "docker network rm",
    )
    .await
}
