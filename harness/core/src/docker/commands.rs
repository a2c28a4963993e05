use std::{io, process, time::Duration};

use tokio::{process::Command, time::timeout};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
/// Errors running docker CLI commands.
pub enum DockerCommandError {
    #[error("{command} exited with status {status}")]
    Failed {
        command: String,
        status: process::ExitStatus,
    },
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

/// Runs a docker command, discarding its output.
pub async fn run_docker(
    args: &[&str],
    timeout_duration: Duration,
    description: &str,
) -> Result<(), DockerCommandError> {
    run_docker_capture(args, timeout_duration, description).await?;
    Ok(())
}

/// Runs a docker command and returns its stdout. On failure the captured
/// stderr is logged before the typed error is returned.
pub async fn run_docker_capture(
    args: &[&str],
    timeout_duration: Duration,
    description: &str,
) -> Result<String, DockerCommandError> {
    let mut command = Command::new("docker");
    command.args(args);

    let output = timeout(timeout_duration, command.output())
        .await
        .map_err(|_| DockerCommandError::Timeout {
            command: description.to_owned(),
            timeout: timeout_duration,
        })?
        .map_err(|source| DockerCommandError::Spawn {
            command: description.to_owned(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            warn!(command = description, stderr = %stderr.trim(), "docker command failed");
        }
        return Err(DockerCommandError::Failed {
            command: description.to_owned(),
            status: output.status,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
