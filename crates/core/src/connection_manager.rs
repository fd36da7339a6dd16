use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::endpoint::{AuthToken, Credentials, Endpoint};
use crate::record::{Record, Value};

/// Write-then-delete proof query. A bare handshake would not catch a
/// read-only replica or a user without write permission.
pub const VERIFICATION_QUERY: &str = "CREATE (n) DELETE n RETURN n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub query: String,
    pub access_mode: AccessMode,
    pub database: Option<String>,
}

impl QueryRequest {
    #[must_use]
    pub fn new(query: impl Into<String>, access_mode: AccessMode) -> Self {
        Self {
            query: query.into(),
            access_mode,
            database: None,
        }
    }

    #[must_use]
    pub fn on_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

/// Opaque `{name, message}` pair reported by the driver layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{name}] {message}")]
pub struct DriverError {
    name: String,
    message: String,
}

impl DriverError {
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The graph driver seam.
///
/// `create_driver` must only validate and build the handle; it may not touch
/// the network. Anything it rejects is reported as a malformed endpoint.
#[async_trait]
pub trait DriverBackend: Send + Sync {
    type Driver: Clone + Send + Sync;

    async fn create_driver(
        &self,
        endpoint: &Endpoint,
        auth: &AuthToken,
    ) -> Result<Self::Driver, DriverError>;
    async fn run(
        &self,
        driver: &Self::Driver,
        request: &QueryRequest,
    ) -> Result<Vec<Record>, DriverError>;
    async fn close(&self, driver: Self::Driver);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Verifying,
    Connected,
    Disconnecting,
}

/// Server-dependent feature flags, fixed for the lifetime of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet {
    /// Nodes carry a stable string element id next to the legacy numeric id.
    pub element_id: bool,
}

impl CapabilitySet {
    #[must_use]
    pub fn from_verification(record: &Record) -> Self {
        Self {
            element_id: record
                .get("n")
                .and_then(Value::as_node)
                .is_some_and(|node| node.element_id.is_some()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    MalformedEndpoint,
    VerificationFailed,
    VerificationEmpty,
    AlreadyConnected,
    Superseded,
}

impl fmt::Display for ConnectErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MalformedEndpoint => "malformed endpoint",
            Self::VerificationFailed => "verification failed",
            Self::VerificationEmpty => "verification returned no rows",
            Self::AlreadyConnected => "already connected",
            Self::Superseded => "superseded",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", notification(.driver_error_name.as_deref(), .message))]
pub struct ConnectError {
    pub kind: ConnectErrorKind,
    pub driver_error_name: Option<String>,
    pub message: String,
}

fn notification(driver_error_name: Option<&str>, message: &str) -> String {
    match driver_error_name {
        Some(name) => format!("[{name}] {message}"),
        None => message.to_string(),
    }
}

impl ConnectError {
    fn new(kind: ConnectErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            driver_error_name: None,
            message: message.into(),
        }
    }

    fn from_driver(kind: ConnectErrorKind, error: DriverError) -> Self {
        Self {
            kind,
            driver_error_name: Some(error.name),
            message: error.message,
        }
    }

    pub(crate) fn superseded() -> Self {
        Self::new(
            ConnectErrorKind::Superseded,
            "connection attempt was superseded by a disconnect",
        )
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("connection manager is not connected")]
    NotConnected,
    #[error("query failed: {0}")]
    Driver(#[source] DriverError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub uri: Option<String>,
    pub capabilities: Option<CapabilitySet>,
    pub verification_latency: Option<Duration>,
    pub connected_at: Option<SystemTime>,
}

#[derive(Debug)]
struct ActiveConnection<D> {
    endpoint: Endpoint,
    driver: D,
    capabilities: CapabilitySet,
    verification_latency: Duration,
    connected_at: SystemTime,
}

#[derive(Debug)]
struct Inner<D> {
    state: ConnectionState,
    epoch: u64,
    active: Option<ActiveConnection<D>>,
    last_error: Option<ConnectError>,
}

/// Owns the single driver handle and walks it through
/// `Idle → Connecting → Verifying → Connected → Disconnecting → Idle`.
///
/// Every `connect` and `disconnect` bumps the epoch. An attempt that finds
/// the epoch moved on while it was suspended throws its handle away instead
/// of installing it.
#[derive(Debug)]
pub struct ConnectionManager<B: DriverBackend> {
    backend: B,
    inner: Mutex<Inner<B::Driver>>,
}

impl<B: DriverBackend> ConnectionManager<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            inner: Mutex::new(Inner {
                state: ConnectionState::Idle,
                epoch: 0,
                active: None,
                last_error: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<B::Driver>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    #[must_use]
    pub fn capabilities(&self) -> Option<CapabilitySet> {
        self.lock().active.as_ref().map(|active| active.capabilities)
    }

    #[must_use]
    pub fn last_error(&self) -> Option<ConnectError> {
        self.lock().last_error.clone()
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        let inner = self.lock();
        let active = inner.active.as_ref();
        ConnectionStatus {
            state: inner.state,
            uri: active.map(|active| active.endpoint.uri().to_string()),
            capabilities: active.map(|active| active.capabilities),
            verification_latency: active.map(|active| active.verification_latency),
            connected_at: active.map(|active| active.connected_at),
        }
    }

    pub async fn connect(
        &self,
        endpoint: Endpoint,
        credentials: &Credentials,
    ) -> Result<CapabilitySet, ConnectError> {
        let attempt = {
            let mut inner = self.lock();
            match inner.state {
                ConnectionState::Idle => {}
                ConnectionState::Connected | ConnectionState::Disconnecting => {
                    return Err(ConnectError::new(
                        ConnectErrorKind::AlreadyConnected,
                        "disconnect the active connection before connecting again",
                    ));
                }
                ConnectionState::Connecting | ConnectionState::Verifying => {
                    return Err(ConnectError::new(
                        ConnectErrorKind::AlreadyConnected,
                        "a connection attempt is already in progress",
                    ));
                }
            }
            inner.epoch += 1;
            inner.state = ConnectionState::Connecting;
            inner.last_error = None;
            inner.epoch
        };

        let auth = credentials.auth_token();
        info!(uri = %endpoint.redacted_uri(), auth_scheme = auth.scheme(), "connecting");

        let driver = match self.backend.create_driver(&endpoint, &auth).await {
            Ok(driver) => driver,
            Err(error) => {
                return Err(self.fail_attempt(
                    attempt,
                    ConnectError::from_driver(ConnectErrorKind::MalformedEndpoint, error),
                ));
            }
        };

        if !self.advance(attempt, ConnectionState::Verifying) {
            self.backend.close(driver).await;
            return Err(ConnectError::superseded());
        }

        let started_at = Instant::now();
        let request = QueryRequest::new(VERIFICATION_QUERY, AccessMode::Write);
        let verification = match self.backend.run(&driver, &request).await {
            Ok(records) => verify_records(&records),
            Err(error) => Err(ConnectError::from_driver(
                ConnectErrorKind::VerificationFailed,
                error,
            )),
        };

        let capabilities = match verification {
            Ok(capabilities) => capabilities,
            Err(error) => {
                self.backend.close(driver).await;
                return Err(self.fail_attempt(attempt, error));
            }
        };

        let rejected = {
            let mut inner = self.lock();
            if inner.epoch == attempt {
                inner.state = ConnectionState::Connected;
                inner.active = Some(ActiveConnection {
                    endpoint: endpoint.clone(),
                    driver,
                    capabilities,
                    verification_latency: started_at.elapsed(),
                    connected_at: SystemTime::now(),
                });
                None
            } else {
                Some(driver)
            }
        };

        if let Some(driver) = rejected {
            debug!(
                uri = %endpoint.redacted_uri(),
                "dropping verified connection after disconnect"
            );
            self.backend.close(driver).await;
            return Err(ConnectError::superseded());
        }

        info!(
            uri = %endpoint.redacted_uri(),
            element_id = capabilities.element_id,
            "connected"
        );
        Ok(capabilities)
    }

    /// Closes the active handle. Calling it while idle does nothing; calling
    /// it during an attempt supersedes that attempt. The state stays
    /// `Disconnecting` until the handle is closed, so no new handle can be
    /// created while the old one is still open.
    pub async fn disconnect(&self) {
        let active = {
            let mut inner = self.lock();
            inner.epoch += 1;
            let active = inner.active.take();
            if active.is_some() {
                inner.state = ConnectionState::Disconnecting;
            } else if inner.state != ConnectionState::Disconnecting {
                inner.state = ConnectionState::Idle;
            }
            active
        };

        let Some(active) = active else {
            return;
        };

        info!(uri = %active.endpoint.redacted_uri(), "disconnecting");
        self.backend.close(active.driver).await;

        // Only the call that took the handle leaves `Disconnecting`.
        let mut inner = self.lock();
        if inner.state == ConnectionState::Disconnecting {
            inner.state = ConnectionState::Idle;
        }
    }

    pub async fn run(&self, request: &QueryRequest) -> Result<Vec<Record>, QueryError> {
        let driver = {
            let inner = self.lock();
            match (&inner.state, &inner.active) {
                (ConnectionState::Connected, Some(active)) => active.driver.clone(),
                _ => return Err(QueryError::NotConnected),
            }
        };

        debug!(
            query = %request.query,
            access_mode = ?request.access_mode,
            database = request.database.as_deref(),
            "running query"
        );
        self.backend
            .run(&driver, request)
            .await
            .map_err(QueryError::Driver)
    }

    fn advance(&self, attempt: u64, state: ConnectionState) -> bool {
        let mut inner = self.lock();
        if inner.epoch != attempt {
            return false;
        }
        inner.state = state;
        true
    }

    fn fail_attempt(&self, attempt: u64, error: ConnectError) -> ConnectError {
        let mut inner = self.lock();
        if inner.epoch != attempt {
            return ConnectError::superseded();
        }
        warn!(kind = %error.kind, error = %error, "connection attempt failed");
        inner.state = ConnectionState::Idle;
        inner.last_error = Some(error.clone());
        error
    }
}

fn verify_records(records: &[Record]) -> Result<CapabilitySet, ConnectError> {
    match records {
        [] => Err(ConnectError::new(
            ConnectErrorKind::VerificationEmpty,
            "initial test query wasn't successful",
        )),
        [record] => Ok(CapabilitySet::from_verification(record)),
        _ => Err(ConnectError::new(
            ConnectErrorKind::VerificationFailed,
            format!(
                "initial test query returned {} rows, expected 1",
                records.len()
            ),
        )),
    }
}
