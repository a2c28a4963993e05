use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use tracing::{debug, info};

use crate::{
    docker::{commands::run_docker, dump_container_logs},
    errors::{StartError, TeardownError},
    ports::free_port,
    probe::ReadinessProbe,
    retry::RetryPolicy,
    session::Session,
};

const IMAGE_BUILD_TIMEOUT: Duration = Duration::from_secs(600);
const CONTAINER_RUN_TIMEOUT: Duration = Duration::from_secs(120);
const CONTAINER_REMOVE_TIMEOUT: Duration = Duration::from_secs(60);
const CONTAINER_EXEC_TIMEOUT: Duration = Duration::from_secs(60);

/// Options for building a container image before it is started.
#[derive(Clone, Debug)]
pub struct BuildOptions {
    pub dockerfile: PathBuf,
    pub context_dir: PathBuf,
    pub build_args: Vec<(String, String)>,
}

/// Options applied when the container is run.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Overrides the image's default command when non-empty.
    pub command: Vec<String>,
    /// Executed inside the running container after it is up, under the
    /// component's retry policy.
    pub init_command: Option<String>,
}

/// Declarative description of one container and its service ports.
pub struct ContainerSpec {
    pub name: String,
    pub repository: String,
    pub tag: String,
    /// Ordered `K=V` entries.
    pub env: Vec<String>,
    /// Service name to container port. Ordered so startup within a component
    /// is deterministic.
    pub service_ports: BTreeMap<String, u16>,
    /// Services whose container port must be published on a fixed host port
    /// instead of an allocated one.
    pub static_service_ports: BTreeMap<String, u16>,
    pub build: Option<BuildOptions>,
    pub run: Option<RunOptions>,
    pub ready: Option<Box<dyn ReadinessProbe>>,
}

impl ContainerSpec {
    pub fn new(
        name: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            repository: repository.into(),
            tag: tag.into(),
            env: Vec::new(),
            service_ports: BTreeMap::new(),
            static_service_ports: BTreeMap::new(),
            build: None,
            run: None,
            ready: None,
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    #[must_use]
    pub fn with_env_var(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    #[must_use]
    pub fn with_service_port(mut self, service: impl Into<String>, container_port: u16) -> Self {
        self.service_ports.insert(service.into(), container_port);
        self
    }

    #[must_use]
    pub fn with_static_port(mut self, service: impl Into<String>, host_port: u16) -> Self {
        self.static_service_ports.insert(service.into(), host_port);
        self
    }

    #[must_use]
    pub fn with_build(mut self, build: BuildOptions) -> Self {
        self.build = Some(build);
        self
    }

    #[must_use]
    pub fn with_run(mut self, run: RunOptions) -> Self {
        self.run = Some(run);
        self
    }

    #[must_use]
    pub fn with_readiness(mut self, probe: impl ReadinessProbe + 'static) -> Self {
        self.ready = Some(Box::new(probe));
        self
    }

    /// Fully-qualified container name for the given session.
    pub fn container_name(&self, session: &Session) -> String {
        format!("{}-{}", session.id(), self.name)
    }
}

/// A named group of containers that starts and tears down together. A
/// component runs in a [`Runtime`](crate::runtime::Runtime) next to others.
#[async_trait::async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    /// Starts the component's containers, registering their addresses with
    /// the session.
    async fn start(&self, session: &Session) -> Result<(), StartError>;

    /// Stops and removes the component's containers, continuing on error and
    /// returning every failure encountered.
    async fn teardown(&self, session: &Session) -> Vec<TeardownError>;

    /// Looks up a container spec by its short (unprefixed) name.
    fn container(&self, name: &str) -> Option<&ContainerSpec>;
}

/// Declarative component starting its containers strictly in the order
/// given: later containers may depend on addresses registered by earlier
/// ones.
pub struct SimpleComponent {
    pub name: String,
    pub containers: Vec<ContainerSpec>,
    pub retry: RetryPolicy,
}

impl SimpleComponent {
    pub fn new(name: impl Into<String>, containers: Vec<ContainerSpec>) -> Self {
        Self {
            name: name.into(),
            containers,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn run_container(&self, session: &Session, spec: &ContainerSpec) -> Result<(), StartError> {
        let image = match &spec.build {
            Some(build) => {
                let image = format!("{}:{}", self.name, session.id());
                build_image(&image, build).await?;
                image
            }
            None => format!("{}:{}", spec.repository, spec.tag),
        };

        let container_name = spec.container_name(session);
        let plan = plan_port_bindings(spec, session)?;

        start_container(session, spec, &container_name, &image, &plan).await?;
        register_addresses(session, spec, &container_name, &plan)?;

        if let Some(probe) = &spec.ready {
            let waited = self.retry.retry(|| probe.probe(session)).await;
            if let Err(source) = waited {
                dump_container_logs(&container_name).await;
                return Err(StartError::ReadinessTimeout {
                    container: container_name,
                    source,
                });
            }
        }

        if let Some(init) = spec.run.as_ref().and_then(|run| run.init_command.as_ref()) {
            debug!(container = %container_name, "running init command");
            self.retry
                .retry(|| {
                    let container = container_name.clone();
                    let init = init.clone();
                    async move {
                        run_docker(
                            &["exec", &container, "bash", "-c", &init],
                            CONTAINER_EXEC_TIMEOUT,
                            "docker exec",
                        )
                        .await
                        .map_err(Into::into)
                    }
                })
                .await
                .map_err(|source| StartError::InitCommand {
                    container: container_name.clone(),
                    source,
                })?;
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl Component for SimpleComponent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, session: &Session) -> Result<(), StartError> {
        if self.containers.is_empty() {
            return Err(StartError::NoContainers {
                component: self.name.clone(),
            });
        }

        for spec in &self.containers {
            info!(component = %self.name, container = %spec.name, "starting container");
            self.run_container(session, spec).await?;
        }

        Ok(())
    }

    async fn teardown(&self, session: &Session) -> Vec<TeardownError> {
        let mut errors = Vec::new();
        for spec in &self.containers {
            let container = spec.container_name(session);
            info!(component = %self.name, container = %container, "removing container");
            let removed = run_docker(
                &["rm", "--force", "--volumes", &container],
                CONTAINER_REMOVE_TIMEOUT,
                "docker rm",
            )
            .await;
            if let Err(source) = removed {
                errors.push(TeardownError { container, source });
            }
        }
        errors
    }

    fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers.iter().find(|spec| spec.name == name)
    }
}

/// One host-to-container port publication.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PortBinding {
    pub host_port: u16,
    pub container_port: u16,
}

/// The host-side port decisions for one container.
#[derive(Debug, Default)]
pub(crate) struct PortPlan {
    pub bindings: Vec<PortBinding>,
    pub host_ports: BTreeMap<String, u16>,
}

/// Decides host ports for every service port of a container.
///
/// Inside the session network no host bindings are created; only the
/// internal container-network address is meaningful there. On the host a
/// static port wins over allocation.
pub(crate) fn plan_port_bindings(
    spec: &ContainerSpec,
    session: &Session,
) -> Result<PortPlan, StartError> {
    let mut plan = PortPlan::default();
    if session.in_docker() {
        return Ok(plan);
    }

    for (service, container_port) in &spec.service_ports {
        let host_port = match spec.static_service_ports.get(service) {
            Some(static_port) => *static_port,
            None => free_port().map_err(|source| StartError::PortAllocation {
                service: service.clone(),
                source,
            })?,
        };
        plan.bindings.push(PortBinding {
            host_port,
            container_port: *container_port,
        });
        plan.host_ports.insert(service.clone(), host_port);
    }

    Ok(plan)
}

async fn build_image(image: &str, build: &BuildOptions) -> Result<(), StartError> {
    info!(image, "building image");
    let mut args: Vec<String> = vec![
        "build".into(),
        "-t".into(),
        image.into(),
        "-f".into(),
        build.dockerfile.display().to_string(),
    ];
    for (key, value) in &build.build_args {
        args.push("--build-arg".into());
        args.push(format!("{key}={value}"));
    }
    args.push(build.context_dir.display().to_string());

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    run_docker(&arg_refs, IMAGE_BUILD_TIMEOUT, "docker build")
        .await
        .map_err(|source| StartError::Build {
            image: image.to_owned(),
            source,
        })
}

async fn start_container(
    session: &Session,
    spec: &ContainerSpec,
    container_name: &str,
    image: &str,
    plan: &PortPlan,
) -> Result<(), StartError> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "-d".into(),
        "--name".into(),
        container_name.into(),
        "--network".into(),
        session.network_id().into(),
    ];
    for entry in &spec.env {
        args.push("-e".into());
        args.push(entry.clone());
    }
    for binding in &plan.bindings {
        args.push("-p".into());
        args.push(format!("{}:{}", binding.host_port, binding.container_port));
    }
    if session.publish_all_ports() {
        args.push("--publish-all".into());
    }
    args.push(image.into());
    if let Some(run) = &spec.run {
        args.extend(run.command.iter().cloned());
    }

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    run_docker(&arg_refs, CONTAINER_RUN_TIMEOUT, "docker run")
        .await
        .map_err(|source| StartError::ContainerStart {
            container: container_name.to_owned(),
            source,
        })
}

fn register_addresses(
    session: &Session,
    spec: &ContainerSpec,
    container_name: &str,
    plan: &PortPlan,
) -> Result<(), StartError> {
    for (service, container_port) in &spec.service_ports {
        session
            .register_internal(service.clone(), format!("{container_name}:{container_port}"))
            .map_err(|source| StartError::Registration {
                service: service.clone(),
                source,
            })?;
    }
    for (service, host_port) in &plan.host_ports {
        session
            .register_host_mapped(service.clone(), format!("localhost:{host_port}"))
            .map_err(|source| StartError::Registration {
                service: service.clone(),
                source,
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionOptions;

    fn session(in_docker: bool) -> Session {
        Session::with_options(
            "000",
            "net1",
            SessionOptions {
                in_docker,
                publish_all_ports: false,
            },
        )
        .unwrap()
    }

    #[test]
    fn no_host_bindings_inside_the_session_network() {
        let spec = ContainerSpec::new("redis", "redis", "6").with_service_port("redis", 6379);
        let plan = plan_port_bindings(&spec, &session(true)).unwrap();
        assert!(plan.bindings.is_empty());
        assert!(plan.host_ports.is_empty());
    }

    #[test]
    fn static_ports_win_over_allocation() {
        let spec = ContainerSpec::new("redis", "redis", "6")
            .with_service_port("redis", 6379)
            .with_static_port("redis", 16379);
        let plan = plan_port_bindings(&spec, &session(false)).unwrap();

        assert_eq!(
            plan.bindings,
            vec![PortBinding {
                host_port: 16379,
                container_port: 6379,
            }]
        );
        assert_eq!(plan.host_ports.get("redis"), Some(&16379));
    }

    #[test]
    fn dynamic_ports_are_allocated_per_service() {
        let spec = ContainerSpec::new("kafka", "kafka", "3")
            .with_service_port("broker", 9092)
            .with_service_port("controller", 9093);
        let plan = plan_port_bindings(&spec, &session(false)).unwrap();

        assert_eq!(plan.bindings.len(), 2);
        assert_eq!(plan.host_ports.len(), 2);
        for binding in &plan.bindings {
            assert!(binding.host_port > 0);
        }
    }

    #[test]
    fn registration_covers_internal_and_host_addresses() {
        let session = session(false);
        let spec = ContainerSpec::new("redis", "redis", "6").with_service_port("redis", 6379);
        let plan = plan_port_bindings(&spec, &session).unwrap();
        register_addresses(&session, &spec, "000-redis", &plan).unwrap();

        assert_eq!(session.internal_address("redis").unwrap(), "000-redis:6379");
        let host = session.host_mapped_address("redis").unwrap();
        assert!(host.starts_with("localhost:"), "unexpected address {host}");
    }

    #[test]
    fn duplicate_service_registration_aborts() {
        let session = session(false);
        session.register_internal("redis", "taken:1").unwrap();

        let spec = ContainerSpec::new("redis", "redis", "6").with_service_port("redis", 6379);
        let plan = plan_port_bindings(&spec, &session).unwrap();
        let err = register_addresses(&session, &spec, "000-redis", &plan).unwrap_err();
        assert!(matches!(err, StartError::Registration { .. }));

        // The first registration stays intact.
        assert_eq!(session.internal_address("redis").unwrap(), "taken:1");
    }

    #[test]
    fn container_lookup_uses_the_short_name() {
        let component = SimpleComponent::new(
            "cache",
            vec![ContainerSpec::new("redis", "redis", "6")],
        );
        assert!(component.container("redis").is_some());
        assert!(component.container("000-redis").is_none());
    }

    #[tokio::test]
    async fn starting_an_empty_component_fails() {
        let component = SimpleComponent::new("empty", Vec::new());
        let err = component.start(&session(false)).await.unwrap_err();
        assert!(matches!(err, StartError::NoContainers { .. }));
    }
}
