use futures::future::BoxFuture;
use reqwest::Client;

use crate::{DynError, session::Session};

/// Readiness contract for a freshly started service.
///
/// Probes are supplied at component-construction time and invoked under the
/// component's retry policy with the shared session, so they can resolve the
/// service address appropriate for the current environment. The harness never
/// hard-codes a specific service's health-check logic; protocol-level pings
/// belong to callers via [`from_fn`].
#[async_trait::async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn probe(&self, session: &Session) -> Result<(), DynError>;
}

/// Readiness via an HTTP GET against the service's auto-selected address;
/// any 2xx response counts as ready.
pub struct HttpProbe {
    service: String,
    path: String,
    client: Client,
}

impl HttpProbe {
    pub fn new(service: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            path: path.into(),
            client: Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl ReadinessProbe for HttpProbe {
    async fn probe(&self, session: &Session) -> Result<(), DynError> {
        let address = session.auto_address(&self.service)?;
        let url = format!("http://{address}{}", self.path);
        self.client
            .get(&url)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Readiness via a plain TCP connect to the service's auto-selected address.
pub struct TcpProbe {
    service: String,
}

impl TcpProbe {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

#[async_trait::async_trait]
impl ReadinessProbe for TcpProbe {
    async fn probe(&self, session: &Session) -> Result<(), DynError> {
        let address = session.auto_address(&self.service)?;
        tokio::net::TcpStream::connect(&address).await?;
        Ok(())
    }
}

/// Adapts an async closure into a [`ReadinessProbe`], for caller-supplied
/// checks such as protocol-client pings.
pub fn from_fn<F>(f: F) -> FnProbe<F>
where
    F: for<'a> Fn(&'a Session) -> BoxFuture<'a, Result<(), DynError>> + Send + Sync,
{
    FnProbe { f }
}

pub struct FnProbe<F> {
    f: F,
}

#[async_trait::async_trait]
impl<F> ReadinessProbe for FnProbe<F>
where
    F: for<'a> Fn(&'a Session) -> BoxFuture<'a, Result<(), DynError>> + Send + Sync,
{
    async fn probe(&self, session: &Session) -> Result<(), DynError> {
        (self.f)(session).await
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use futures::FutureExt as _;

    use super::*;
    use crate::session::SessionOptions;

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

    #[tokio::test]
    async fn tcp_probe_connects_to_the_host_mapped_address() {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let port = listener.local_addr().unwrap().port();

        let session = host_session();
        session.register_internal("redis", "000-redis:6379").unwrap();
        session
            .register_host_mapped("redis", format!("localhost:{port}"))
            .unwrap();

        TcpProbe::new("redis").probe(&session).await.unwrap();
    }

    #[tokio::test]
    async fn probes_fail_for_unregistered_services() {
        let session = host_session();
        assert!(TcpProbe::new("ghost").probe(&session).await.is_err());
        assert!(
            HttpProbe::new("ghost", "/health")
                .probe(&session)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn closure_probes_receive_the_session() {
        let session = host_session();
        session.register_internal("redis", "000-redis:6379").unwrap();

        let probe = from_fn(|session: &Session| {
            async move {
                session.internal_address("redis")?;
                Ok(())
            }
            .boxed()
        });
        probe.probe(&session).await.unwrap();
    }
}
