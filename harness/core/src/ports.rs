use std::{
    io,
    net::{Ipv4Addr, TcpListener as StdTcpListener},
};

#[derive(Debug, thiserror::Error)]
/// Failures allocating a host port.
pub enum PortError {
    #[error("failed to bind an ephemeral listener: {source}")]
    Bind {
        #[source]
        source: io::Error,
    },
    #[error("failed to read back the assigned local address: {source}")]
    Resolve {
        #[source]
        source: io::Error,
    },
}

/// Finds a currently free local TCP port by binding port 0 and reading back
/// the OS-assigned port.
///
/// The listener is dropped before the port is returned, so nothing prevents
/// another process from grabbing the port before the caller binds it. The
/// race is accepted; callers that need a guaranteed port should pass a static
/// service port instead.
pub fn free_port() -> Result<u16, PortError> {
    let listener = StdTcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
        .map_err(|source| PortError::Bind { source })?;
    let port = listener
        .local_addr()
        .map_err(|source| PortError::Resolve { source })?
        .port();
    Ok(port)
}
