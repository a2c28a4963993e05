use std::{
    collections::HashMap,
    env, fs,
    path::Path,
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

use crate::errors::{AddressScope, SessionError};

/// Well-known session snapshot file name, written into the working directory
/// so companion processes and the cleanup sweep can find the run.
pub const SESSION_FILE: &str = ".harness-session";

/// Environment variable carrying a session identity override.
pub const SESSION_ID_VAR: &str = "HARNESS_SESSION_ID";
/// Environment variable carrying a docker network override.
pub const NETWORK_ID_VAR: &str = "HARNESS_NETWORK_ID";
/// Environment variable toggling `--publish-all` on started containers.
pub const PUBLISH_PORTS_VAR: &str = "HARNESS_PUBLISH_PORTS";

const RESERVED_NETWORK: &str = "bridge";
const DEFAULT_SESSION_ID: &str = "000";

/// Identity and address registry for one ephemeral test run.
///
/// The two address maps are the only shared mutable state in the harness;
/// both sit behind one mutex, so registrations racing across concurrently
/// starting components are safe but unordered. Whichever task registers a
/// service name first wins and the loser gets a duplicate-service error.
#[derive(Debug)]
pub struct Session {
    id: String,
    network_id: String,
    in_docker: bool,
    publish_all_ports: bool,
    addresses: Mutex<AddressBook>,
}

#[derive(Debug, Default)]
struct AddressBook {
    internal: HashMap<String, String>,
    host_mapped: HashMap<String, String>,
}

/// Construction-time flags that never change for the lifetime of a session.
#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    /// Whether the orchestrating process runs inside the same docker network
    /// as the containers it starts.
    pub in_docker: bool,
    /// Publish every exposed container port for local debugging.
    pub publish_all_ports: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            in_docker: detect_in_docker(),
            publish_all_ports: false,
        }
    }
}

impl Session {
    /// Prepares a new session, detecting the runtime environment.
    pub fn new(id: impl Into<String>, network_id: impl Into<String>) -> Result<Self, SessionError> {
        Self::with_options(id, network_id, SessionOptions::default())
    }

    /// Prepares a new session with explicit environment flags.
    pub fn with_options(
        id: impl Into<String>,
        network_id: impl Into<String>,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let id = id.into();
        let network_id = network_id.into();

        if id.is_empty() {
            return Err(SessionError::MissingId);
        }
        if network_id.is_empty() || network_id == RESERVED_NETWORK {
            return Err(SessionError::InvalidNetwork);
        }

        Ok(Self {
            id,
            network_id,
            in_docker: options.in_docker,
            publish_all_ports: options.publish_all_ports,
            addresses: Mutex::new(AddressBook::default()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub const fn in_docker(&self) -> bool {
        self.in_docker
    }

    pub const fn publish_all_ports(&self) -> bool {
        self.publish_all_ports
    }

    /// Registers the network-local address for a service. Registering the
    /// same service twice is an error and leaves the first value intact.
    pub fn register_internal(
        &self,
        service: impl Into<String>,
        address: impl Into<String>,
    ) -> Result<(), SessionError> {
        let mut book = self.addresses.lock().expect("session mutex poisoned");
        insert_once(&mut book.internal, service.into(), address.into())
    }

    /// Registers the host-reachable address for a service, symmetric to
    /// [`register_internal`](Self::register_internal) on a separate map.
    pub fn register_host_mapped(
        &self,
        service: impl Into<String>,
        address: impl Into<String>,
    ) -> Result<(), SessionError> {
        let mut book = self.addresses.lock().expect("session mutex poisoned");
        insert_once(&mut book.host_mapped, service.into(), address.into())
    }

    /// Address of a service as seen from inside the session network.
    pub fn internal_address(&self, service: &str) -> Result<String, SessionError> {
        let book = self.addresses.lock().expect("session mutex poisoned");
        lookup(&book.internal, AddressScope::Internal, service)
    }

    /// Address of a service as seen from the host.
    pub fn host_mapped_address(&self, service: &str) -> Result<String, SessionError> {
        let book = self.addresses.lock().expect("session mutex poisoned");
        lookup(&book.host_mapped, AddressScope::HostMapped, service)
    }

    /// Address of a service as reachable from the calling process: internal
    /// when running inside the session network, host-mapped otherwise.
    pub fn auto_address(&self, service: &str) -> Result<String, SessionError> {
        if self.in_docker {
            self.internal_address(service)
        } else {
            self.host_mapped_address(service)
        }
    }

    /// Names of all internally registered services, sorted so callers derive
    /// reproducible rewrite rule orderings from it.
    pub fn service_names(&self) -> Vec<String> {
        let book = self.addresses.lock().expect("session mutex poisoned");
        let mut names: Vec<_> = book.internal.keys().cloned().collect();
        names.sort();
        names
    }

    /// Serializes the session snapshot to `path`.
    ///
    /// Refused inside a container: the snapshot exists for host-side
    /// companion processes and the cleanup sweep.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        if self.in_docker {
            return Err(SessionError::InsideContainer);
        }

        let book = self.addresses.lock().expect("session mutex poisoned");
        let dump = SessionDump {
            id: self.id.clone(),
            network_id: self.network_id.clone(),
            service_addresses: book.internal.clone(),
            host_mapped_service_addresses: book.host_mapped.clone(),
        };
        drop(book);

        let bytes =
            serde_json::to_vec_pretty(&dump).map_err(|source| SessionError::Encode { source })?;
        fs::write(path.as_ref(), bytes).map_err(|source| SessionError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })
    }

    /// Reconstructs a session from a snapshot, detecting the runtime
    /// environment. The environment flags are never stored in the file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        Self::from_file_with_options(path, SessionOptions::default())
    }

    /// Reconstructs a session from a snapshot with explicit environment
    /// flags.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| SessionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let dump: SessionDump =
            serde_json::from_slice(&bytes).map_err(|source| SessionError::Decode {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            id: dump.id,
            network_id: dump.network_id,
            in_docker: options.in_docker,
            publish_all_ports: options.publish_all_ports,
            addresses: Mutex::new(AddressBook {
                internal: dump.service_addresses,
                host_mapped: dump.host_mapped_service_addresses,
            }),
        })
    }
}

fn insert_once(
    map: &mut HashMap<String, String>,
    service: String,
    address: String,
) -> Result<(), SessionError> {
    if let Some(existing) = map.get(&service) {
        return Err(SessionError::DuplicateService {
            service,
            existing: existing.clone(),
        });
    }
    map.insert(service, address);
    Ok(())
}

fn lookup(
    map: &HashMap<String, String>,
    scope: AddressScope,
    service: &str,
) -> Result<String, SessionError> {
    map.get(service)
        .cloned()
        .ok_or_else(|| SessionError::AddressNotFound {
            scope,
            service: service.to_owned(),
        })
}

#[derive(Serialize, Deserialize)]
struct SessionDump {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "NetworkID")]
    network_id: String,
    #[serde(rename = "ServiceAddresses")]
    service_addresses: HashMap<String, String>,
    #[serde(rename = "HostMappedServiceAddresses")]
    host_mapped_service_addresses: HashMap<String, String>,
}

/// Session identity overrides read from the process environment.
///
/// The core never reads these variables implicitly; callers resolve the
/// overrides once and pass the values on explicitly.
#[derive(Clone, Debug)]
pub struct EnvOverrides {
    pub session_id: String,
    pub network_id: Option<String>,
    pub publish_all_ports: bool,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let session_id = env::var(SESSION_ID_VAR)
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_ID.to_owned());
        let network_id = env::var(NETWORK_ID_VAR).ok().filter(|value| !value.is_empty());
        let publish_all_ports = env::var(PUBLISH_PORTS_VAR)
            .ok()
            .and_then(|value| value.parse::<bool>().ok())
            .unwrap_or(false);

        Self {
            session_id,
            network_id,
            publish_all_ports,
        }
    }
}

fn detect_in_docker() -> bool {
    Path::new("/.dockerenv").exists()
}
