use std::{fs, path::Path, time::Duration};

use tracing::{info, warn};

use crate::{
    docker::{
        commands::{run_docker, run_docker_capture},
        network::remove_network,
    },
    errors::CleanupError,
    session::Session,
};

const LIST_TIMEOUT: Duration = Duration::from_secs(30);
const REMOVE_TIMEOUT: Duration = Duration::from_secs(60);

const SESSION_FILE_PREFIX: &str = ".harness";

/// Sweeps `dir` for leftover session files and reclaims the containers and
/// networks they describe.
///
/// This is the out-of-band pass for runs that were killed mid-retry: started
/// containers are not reclaimed automatically, only through the persisted
/// session file. Fail-soft throughout; every error is collected, none aborts
/// the sweep.
pub async fn sweep_sessions(dir: impl AsRef<Path>) -> Vec<CleanupError> {
    let dir = dir.as_ref();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(source) => {
            return vec![CleanupError::Scan {
                dir: dir.to_path_buf(),
                source,
            }];
        }
    };

    let mut errors = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_session_file(name) {
            continue;
        }
        errors.extend(cleanup_session_file(entry.path()).await);
    }
    errors
}

/// Reclaims every resource belonging to the session persisted at `path`:
/// containers matched by the `{session id}-` name prefix, the session
/// network, and finally the file itself.
pub async fn cleanup_session_file(path: impl AsRef<Path>) -> Vec<CleanupError> {
    let path = path.as_ref();
    info!(path = %path.display(), "cleaning up session file");

    let session = match Session::from_file(path) {
        Ok(session) => session,
        Err(source) => {
            return vec![CleanupError::Session {
                path: path.to_path_buf(),
                source,
            }];
        }
    };

    let mut errors = Vec::new();

    match run_docker_capture(&["ps", "-a", "--format", "{{.Names}}"], LIST_TIMEOUT, "docker ps")
        .await
    {
        Ok(listing) => {
            for container in listing
                .lines()
                .map(str::trim)
                .filter(|name| belongs_to_session(name, session.id()))
            {
                info!(container, "removing leftover container");
                let removed = run_docker(
                    &["rm", "--force", "--volumes", container],
                    REMOVE_TIMEOUT,
                    "docker rm",
                )
                .await;
                if let Err(source) = removed {
                    errors.push(CleanupError::Container {
                        container: container.to_owned(),
                        source,
                    });
                }
            }
        }
        Err(source) => errors.push(CleanupError::List { source }),
    }

    if let Err(source) = remove_network(session.network_id()).await {
        warn!(network = session.network_id(), "failed to remove session network");
        errors.push(CleanupError::Network {
            network: session.network_id().to_owned(),
            source,
        });
    }

    if let Err(source) = fs::remove_file(path) {
        errors.push(CleanupError::Remove {
            path: path.to_path_buf(),
            source,
        });
    }

    errors
}

fn is_session_file(name: &str) -> bool {
    name.starts_with(SESSION_FILE_PREFIX)
}

fn belongs_to_session(container: &str, session_id: &str) -> bool {
    // `docker ps` prints bare names; the API form carries a leading slash.
    container
        .trim_start_matches('/')
        .starts_with(&format!("{session_id}-"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SESSION_FILE;

    #[test]
    fn recognizes_session_files() {
        assert!(is_session_file(SESSION_FILE));
        assert!(is_session_file(".harness-other"));
        assert!(!is_session_file("harness-session"));
        assert!(!is_session_file("README.md"));
    }

    #[test]
    fn container_matching_is_prefix_scoped() {
        assert!(belongs_to_session("000-redis", "000"));
        assert!(belongs_to_session("/000-redis", "000"));
        assert!(!belongs_to_session("0001-redis", "000"));
        assert!(!belongs_to_session("other-000-redis", "000"));
    }

    #[tokio::test]
    async fn sweeping_an_empty_directory_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sweep_sessions(dir.path()).await.is_empty());
    }

    #[tokio::test]
    async fn an_unreadable_session_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SESSION_FILE);
        fs::write(&path, "not json").unwrap();

        let errors = cleanup_session_file(&path).await;
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], CleanupError::Session { .. }));
        // The file is kept for inspection.
        assert!(path.exists());
    }
}
