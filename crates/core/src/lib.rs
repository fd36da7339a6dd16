pub mod catalog;
pub mod config;
pub mod connection_manager;
pub mod credential_store;
pub mod endpoint;
pub mod record;
pub mod session;

#[cfg(test)]
mod testing;

pub use catalog::{CatalogError, CatalogSnapshot, DatabaseCatalog, DatabaseEntry};
pub use config::{ClientConfig, ConfigError};
pub use connection_manager::{
    AccessMode, CapabilitySet, ConnectError, ConnectErrorKind, ConnectionManager,
    ConnectionState, DriverBackend, DriverError, QueryError, QueryRequest,
};
pub use credential_store::{
    CredentialStore, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, StoreError,
};
pub use endpoint::{AuthToken, Credentials, Endpoint, TransportOptions};
pub use record::{Record, Value};
pub use session::{LoginError, SessionError, SessionFacade};
