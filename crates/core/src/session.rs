use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogError, CatalogSnapshot, DatabaseCatalog};
use crate::config::ClientConfig;
use crate::connection_manager::{
    AccessMode, CapabilitySet, ConnectError, ConnectionManager, ConnectionState,
    ConnectionStatus, DriverBackend, DriverError, QueryError, QueryRequest,
};
use crate::credential_store::{CredentialStore, KeyValueStore, StoreError};
use crate::endpoint::{Credentials, Endpoint, TransportOptions};
use crate::record::Record;

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("another login is already in progress")]
    LoginInProgress,
    #[error("{0}")]
    Connect(#[from] ConnectError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("query failed: {0}")]
    Query(#[source] DriverError),
}

impl From<QueryError> for SessionError {
    fn from(error: QueryError) -> Self {
        match error {
            QueryError::NotConnected => Self::NotConnected,
            QueryError::Driver(error) => Self::Query(error),
        }
    }
}

struct LoginGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> LoginGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for LoginGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Entry point for UI collaborators. Owns the connection manager, the
/// database catalog and the credential store, and keeps at most one login
/// sequence in flight.
pub struct SessionFacade<B: DriverBackend, S: KeyValueStore> {
    connection: ConnectionManager<B>,
    catalog: tokio::sync::Mutex<DatabaseCatalog>,
    credentials: Mutex<CredentialStore<S>>,
    login_in_flight: AtomicBool,
    default_url: String,
    transport: TransportOptions,
}

impl<B: DriverBackend, S: KeyValueStore> fmt::Debug for SessionFacade<B, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFacade")
            .field("state", &self.connection.state())
            .field("login_in_flight", &self.login_in_flight)
            .field("default_url", &self.default_url)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl<B: DriverBackend, S: KeyValueStore> SessionFacade<B, S> {
    #[must_use]
    pub fn new(connection: ConnectionManager<B>, credentials: CredentialStore<S>) -> Self {
        let defaults = ClientConfig::default();
        Self {
            connection,
            catalog: tokio::sync::Mutex::new(DatabaseCatalog::new()),
            credentials: Mutex::new(credentials),
            login_in_flight: AtomicBool::new(false),
            default_url: defaults.default_url,
            transport: defaults.transport,
        }
    }

    #[must_use]
    pub fn with_client_config(mut self, config: &ClientConfig) -> Self {
        self.default_url.clone_from(&config.default_url);
        self.transport = config.transport.clone();
        self
    }

    fn lock_credentials(&self) -> MutexGuard<'_, CredentialStore<S>> {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    #[must_use]
    pub fn capabilities(&self) -> Option<CapabilitySet> {
        self.connection.capabilities()
    }

    /// URI to pre-fill a login form with: the last host that connected, or
    /// the configured default.
    #[must_use]
    pub fn initial_url(&self) -> String {
        let persisted = self.lock_credentials().host();
        match persisted {
            Ok(Some(host)) => host,
            Ok(None) => self.default_url.clone(),
            Err(error) => {
                warn!(%error, "failed to read persisted host");
                self.default_url.clone()
            }
        }
    }

    #[must_use]
    pub fn endpoint(&self, uri: impl Into<String>) -> Endpoint {
        Endpoint::new(uri).with_options(self.transport.clone())
    }

    pub async fn login(
        &self,
        endpoint: Endpoint,
        credentials: Credentials,
        remember: bool,
    ) -> Result<(), LoginError> {
        let Some(_guard) = LoginGuard::acquire(&self.login_in_flight) else {
            return Err(LoginError::LoginInProgress);
        };
        self.run_login(endpoint, &credentials, remember).await
    }

    /// Replays a remembered login once. The remembered credentials are
    /// removed afterwards whatever the outcome.
    pub async fn try_auto_login(&self) -> bool {
        let Some(_guard) = LoginGuard::acquire(&self.login_in_flight) else {
            debug!("skipping automatic login, another login is in flight");
            return false;
        };

        let loaded = self.lock_credentials().load();
        let session = match loaded {
            Ok(session) => session,
            Err(error) => {
                warn!(%error, "discarding unreadable remembered login");
                self.discard_remembered_login();
                return false;
            }
        };

        let (Some(username), Some(password)) = (session.username, session.password) else {
            return false;
        };
        let host = session.host.unwrap_or_else(|| self.default_url.clone());

        let outcome = self
            .run_login(
                self.endpoint(host),
                &Credentials::basic(username, password),
                false,
            )
            .await;
        self.discard_remembered_login();

        match outcome {
            Ok(()) => {
                info!("automatic login succeeded");
                true
            }
            Err(error) => {
                debug!(%error, "automatic login failed");
                false
            }
        }
    }

    pub async fn logout(&self) {
        self.connection.disconnect().await;
        self.catalog.lock().await.clear();
    }

    /// Refreshes and returns the database list. An unavailable catalog is not
    /// an error; the snapshot just reports `available == false`.
    pub async fn list_databases(&self) -> Result<CatalogSnapshot, SessionError> {
        self.ensure_connected()?;
        let mut catalog = self.catalog.lock().await;
        match catalog.refresh(&self.connection).await {
            Ok(_) => {}
            Err(CatalogError::Unavailable(QueryError::NotConnected)) => {
                return Err(SessionError::NotConnected);
            }
            Err(error) => debug!(%error, "listing databases without a catalog"),
        }
        Ok(catalog.snapshot())
    }

    pub async fn set_active_database(&self, name: &str) -> Result<(), SessionError> {
        self.ensure_connected()?;
        self.catalog.lock().await.set_active(name)?;
        info!(database = name, "active database changed");
        Ok(())
    }

    pub async fn active_database(&self) -> Option<String> {
        self.catalog.lock().await.active().map(str::to_string)
    }

    /// Runs `query` against the active database, or the server default when
    /// no database is selected.
    pub async fn run_admin_query(
        &self,
        query: &str,
        access_mode: AccessMode,
    ) -> Result<Vec<Record>, SessionError> {
        self.ensure_connected()?;
        let mut request = QueryRequest::new(query, access_mode);
        if let Some(database) = self.active_database().await {
            request = request.on_database(database);
        }
        Ok(self.connection.run(&request).await?)
    }

    /// Explicit user action: drop remembered credentials, keep the host.
    pub fn forget_credentials(&self) -> Result<(), StoreError> {
        self.lock_credentials().clear_login()
    }

    async fn run_login(
        &self,
        endpoint: Endpoint,
        credentials: &Credentials,
        remember: bool,
    ) -> Result<(), LoginError> {
        if self.connection.state() != ConnectionState::Idle {
            self.logout().await;
        }

        let host = endpoint.uri().to_string();
        let redacted = endpoint.redacted_uri().into_owned();
        self.connection.connect(endpoint, credentials).await?;
        let epoch = self.connection.epoch();

        {
            let mut catalog = self.catalog.lock().await;
            if let Err(error) = catalog.refresh(&self.connection).await {
                debug!(%error, "continuing without database catalog");
            }
        }

        if self.connection.epoch() != epoch {
            return Err(ConnectError::superseded().into());
        }

        let mut store = self.lock_credentials();
        if let Err(error) = store.save_host(&host) {
            warn!(%error, "failed to persist host");
        }
        if remember {
            // The form input is stored as entered; the replay decides the token.
            let (username, password) = match credentials {
                Credentials::None => ("", ""),
                Credentials::Basic { username, password } => {
                    (username.as_str(), password.as_str())
                }
            };
            if let Err(error) = store.save_login(username, password) {
                warn!(%error, "failed to remember login");
            }
        }

        info!(uri = %redacted, "login complete");
        Ok(())
    }

    fn discard_remembered_login(&self) {
        if let Err(error) = self.lock_credentials().clear_login() {
            warn!(%error, "failed to remove remembered login");
        }
    }

    fn ensure_connected(&self) -> Result<(), SessionError> {
        if self.connection.is_connected() {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }
}
