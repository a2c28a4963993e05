//! Ephemeral docker test-environment orchestration.
//!
//! A [`Session`](session::Session) carries the identity of one test run and
//! the registry of how every started service can be addressed, both from
//! inside the session's docker network and from the host. Components describe
//! groups of containers declaratively; the [`Runtime`](runtime::Runtime) fans
//! their startup and teardown out concurrently while each component starts
//! its own containers strictly in order.

pub mod cleanup;
pub mod component;
pub mod docker;
pub mod errors;
pub mod ports;
pub mod probe;
pub mod retry;
pub mod runtime;
pub mod session;

pub use component::{BuildOptions, Component, ContainerSpec, RunOptions, SimpleComponent};
pub use errors::{SessionError, StartError, TeardownError};
pub use probe::{HttpProbe, ReadinessProbe, TcpProbe};
pub use retry::{RetryError, RetryPolicy};
pub use runtime::Runtime;
pub use session::{EnvOverrides, SESSION_FILE, Session, SessionOptions};

/// Opaque error type for caller-supplied capabilities such as readiness
/// probes.
pub type DynError = Box<dyn std::error::Error + Send + Sync>;
