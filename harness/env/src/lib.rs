//! Rewritten views of service environments.
//!
//! Once a session's components are up, the rewrite engine translates the
//! internal addresses baked into a container's environment variables into
//! addresses reachable from the host, so the service can be run or debugged
//! outside the docker network against the same dependencies.

pub mod replacement;

use std::{collections::BTreeMap, time::Duration};

use harness_core::{Session, docker::commands::{DockerCommandError, run_docker_capture}};
use tracing::debug;

pub use replacement::{
    ReplacementError, ReplacementRule, RewriteOptions, apply_all, build_rules,
};

const INSPECT_TIMEOUT: Duration = Duration::from_secs(30);
const INSPECT_FORMAT: &str = "{{range .Config.Env}}{{println .}}{{end}}";

/// Host-side variables that never belong to the inspected service.
const SKIPPED_VARS: [&str; 3] = ["PATH", "HOME", "HOSTNAME"];

#[derive(Debug, thiserror::Error)]
/// Failures producing a rewritten environment view.
pub enum EnvInspectError {
    #[error("service with name {service} is not found")]
    UnknownService { service: String },
    #[error("failed to inspect container {container}: {source}")]
    Inspect {
        container: String,
        #[source]
        source: DockerCommandError,
    },
    #[error(transparent)]
    Rules(#[from] ReplacementError),
}

/// Container name for a registered service, `{session id}-{service}`.
///
/// Fails when the service was never registered with the session; there is
/// nothing to inspect then.
pub fn container_name(session: &Session, service: &str) -> Result<String, EnvInspectError> {
    session
        .auto_address(service)
        .map_err(|_| EnvInspectError::UnknownService {
            service: service.to_owned(),
        })?;
    Ok(format!("{}-{service}", session.id()))
}

/// Inspects the environment of a service's container and rewrites every
/// registered internal address into its host-reachable counterpart.
///
/// The container may be stopped; it only has to exist. Caller-supplied
/// `extra_rules` run after the session-derived ones and may chain with them.
pub async fn service_envs(
    session: &Session,
    service: &str,
    extra_rules: &[ReplacementRule],
    options: &RewriteOptions,
) -> Result<BTreeMap<String, String>, EnvInspectError> {
    let container = container_name(session, service)?;
    debug!(container = %container, "inspecting container environment");

    let output = run_docker_capture(
        &["inspect", "-f", INSPECT_FORMAT, &container],
        INSPECT_TIMEOUT,
        "docker inspect",
    )
    .await
    .map_err(|source| EnvInspectError::Inspect {
        container: container.clone(),
        source,
    })?;

    let envs = parse_env_output(&output);

    let mut rules = build_rules(session, options)?;
    rules.extend(extra_rules.iter().cloned());
    Ok(apply_all(&rules, envs))
}

fn parse_env_output(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once('='))
        .filter(|(name, _)| !SKIPPED_VARS.contains(name))
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use harness_core::SessionOptions;

    use super::*;

    fn host_session() -> Session {
        Session::with_options(
            "000",
            "net1",
            SessionOptions {
                in_docker: false,
                publish_all_ports: false,
            },
        )
        .unwrap()
    }

    #[test]
    fn container_names_are_session_prefixed() {
        let session = host_session();
        session
            .register_internal("test-service", "000-test-service:8080")
            .unwrap();
        session
            .register_host_mapped("test-service", "localhost:65071")
            .unwrap();

        assert_eq!(
            container_name(&session, "test-service").unwrap(),
            "000-test-service"
        );
    }

    #[test]
    fn unknown_services_cannot_be_inspected() {
        let err = container_name(&host_session(), "invalid-service-name").unwrap_err();
        assert_eq!(
            err.to_string(),
            "service with name invalid-service-name is not found"
        );
    }

    #[test]
    fn env_output_parsing_skips_host_variables() {
        let output = "PATH=/usr/bin\nHOME=/root\nHOSTNAME=abc\nTEST_SERVICE=test_service\nTEST_SERVICE_SQS_QUEUE=the_queue\nMALFORMED LINE\n";
        let envs = parse_env_output(output);

        assert_eq!(
            envs,
            BTreeMap::from([
                ("TEST_SERVICE".to_owned(), "test_service".to_owned()),
                ("TEST_SERVICE_SQS_QUEUE".to_owned(), "the_queue".to_owned()),
            ])
        );
    }

    #[test]
    fn values_keep_embedded_equals_signs() {
        let envs = parse_env_output("CONN=a=b=c\n");
        assert_eq!(envs["CONN"], "a=b=c");
    }
}
