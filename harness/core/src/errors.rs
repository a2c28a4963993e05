use std::{io, path::PathBuf};

use crate::{docker::commands::DockerCommandError, ports::PortError, retry::RetryError};

/// Which of the two address maps a lookup went against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressScope {
    Internal,
    HostMapped,
}

impl AddressScope {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::HostMapped => "host-mapped",
        }
    }
}

#[derive(Debug, thiserror::Error)]
/// Session construction, registration and persistence failures.
pub enum SessionError {
    #[error("session id is required")]
    MissingId,
    #[error("network id is required and the bridge network is not supported")]
    InvalidNetwork,
    #[error("service {service:?} already exists with value: {existing:?}")]
    DuplicateService { service: String, existing: String },
    #[error("{scope} service address not registered for {service:?}", scope = scope.label())]
    AddressNotFound {
        scope: AddressScope,
        service: String,
    },
    #[error("session persistence is not supported inside a container")]
    InsideContainer,
    #[error("failed to access session file at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to decode session file at {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode session snapshot: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
/// Failures while starting a component's containers. The first failing step
/// aborts the remaining steps for that component.
pub enum StartError {
    #[error("component {component} has no containers to start")]
    NoContainers { component: String },
    #[error("failed to build image {image}: {source}")]
    Build {
        image: String,
        #[source]
        source: DockerCommandError,
    },
    #[error("failed to allocate host port for service {service}: {source}")]
    PortAllocation {
        service: String,
        #[source]
        source: PortError,
    },
    #[error("failed to run container {container}: {source}")]
    ContainerStart {
        container: String,
        #[source]
        source: DockerCommandError,
    },
    #[error("failed to register service {service}: {source}")]
    Registration {
        service: String,
        #[source]
        source: SessionError,
    },
    #[error("container {container} did not become ready: {source}")]
    ReadinessTimeout {
        container: String,
        #[source]
        source: RetryError,
    },
    #[error("init command failed in container {container}: {source}")]
    InitCommand {
        container: String,
        #[source]
        source: RetryError,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("failed to remove container {container}: {source}")]
/// A single container removal failure. Teardown always returns every failure
/// it encountered rather than stopping at the first.
pub struct TeardownError {
    pub container: String,
    #[source]
    pub source: DockerCommandError,
}

#[derive(Debug, thiserror::Error)]
/// Failures sweeping leftover sessions from a previous run.
pub enum CleanupError {
    #[error("failed to scan {} for session files: {source}", dir.display())]
    Scan {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to load session file {}: {source}", path.display())]
    Session {
        path: PathBuf,
        #[source]
        source: SessionError,
    },
    #[error("failed to list containers: {source}")]
    List {
        #[source]
        source: DockerCommandError,
    },
    #[error("failed to remove container {container}: {source}")]
    Container {
        container: String,
        #[source]
        source: DockerCommandError,
    },
    #[error("failed to remove network {network}: {source}")]
    Network {
        network: String,
        #[source]
        source: DockerCommandError,
    },
    #[error("failed to delete session file {}: {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_render_their_paths() {
        let err = SessionError::Io {
            path: PathBuf::from("/tmp/work/.harness-session"),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(
            err.to_string(),
            "failed to access session file at /tmp/work/.harness-session: gone"
        );

        let err = CleanupError::Scan {
            dir: PathBuf::from("/tmp/work"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(
            err.to_string(),
            "failed to scan /tmp/work for session files: denied"
        );
    }
}
