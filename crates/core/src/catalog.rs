use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::connection_manager::{
    AccessMode, ConnectionManager, DriverBackend, QueryError, QueryRequest,
};
use crate::record::{Record, Value};

pub const LIST_DATABASES_QUERY: &str = "SHOW DATABASES";
pub const SYSTEM_DATABASE: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseEntry {
    pub name: String,
    pub is_default: bool,
    pub is_system: bool,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("database catalog is unavailable: {0}")]
    Unavailable(#[source] QueryError),
    #[error("unknown database `{0}`")]
    UnknownDatabase(String),
}

/// What a database selector needs to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogSnapshot {
    pub entries: Vec<DatabaseEntry>,
    pub active: Option<String>,
    pub available: bool,
}

impl CatalogSnapshot {
    #[must_use]
    pub fn selectable(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|entry| !entry.is_system)
            .map(|entry| entry.name.as_str())
            .collect()
    }

    /// Only worth showing when there is an actual choice to make.
    #[must_use]
    pub fn shows_selector(&self) -> bool {
        self.available && self.selectable().len() > 1
    }
}

/// Logical databases on the connected server plus the `active` pointer,
/// which always names a listed non-system entry or is `None`.
#[derive(Debug, Default)]
pub struct DatabaseCatalog {
    entries: Option<Vec<DatabaseEntry>>,
    active: Option<String>,
}

impl DatabaseCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> &[DatabaseEntry] {
        self.entries.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.entries.is_some()
    }

    #[must_use]
    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            entries: self.entries().to_vec(),
            active: self.active.clone(),
            available: self.is_available(),
        }
    }

    pub fn clear(&mut self) {
        self.entries = None;
        self.active = None;
    }

    /// Re-reads the database list. On failure the catalog is emptied and the
    /// caller should fall back to the server's default database.
    pub async fn refresh<B: DriverBackend>(
        &mut self,
        connection: &ConnectionManager<B>,
    ) -> Result<&[DatabaseEntry], CatalogError> {
        let request =
            QueryRequest::new(LIST_DATABASES_QUERY, AccessMode::Read).on_database(SYSTEM_DATABASE);

        match connection.run(&request).await {
            Ok(records) => {
                self.apply_listing(entries_from_records(&records));
                debug!(
                    databases = self.entries().len(),
                    active = self.active.as_deref(),
                    "database catalog refreshed"
                );
                Ok(self.entries())
            }
            Err(error) => {
                warn!(%error, "database catalog unavailable");
                self.clear();
                Err(CatalogError::Unavailable(error))
            }
        }
    }

    pub fn set_active(&mut self, name: &str) -> Result<(), CatalogError> {
        let selectable = self
            .entries()
            .iter()
            .any(|entry| entry.name == name && !entry.is_system);
        if !selectable {
            return Err(CatalogError::UnknownDatabase(name.to_string()));
        }

        self.active = Some(name.to_string());
        Ok(())
    }

    fn apply_listing(&mut self, entries: Vec<DatabaseEntry>) {
        let still_listed = self.active.as_deref().is_some_and(|active| {
            entries
                .iter()
                .any(|entry| entry.name == active && !entry.is_system)
        });

        if !still_listed {
            self.active = entries
                .iter()
                .find(|entry| entry.is_default && !entry.is_system)
                .map(|entry| entry.name.clone());
        }
        self.entries = Some(entries);
    }
}

fn entries_from_records(records: &[Record]) -> Vec<DatabaseEntry> {
    let mut entries: Vec<DatabaseEntry> = Vec::with_capacity(records.len());
    for record in records {
        let Some(name) = record.get("name").and_then(Value::as_str) else {
            warn!("skipping database row without a name");
            continue;
        };

        let is_system = record
            .get("type")
            .and_then(Value::as_str)
            .map_or(name == SYSTEM_DATABASE, |kind| kind == SYSTEM_DATABASE);
        let is_default =
            !is_system && record.get("default").and_then(Value::as_bool).unwrap_or(false);

        // Clusters report one row per member.
        if let Some(existing) = entries.iter_mut().find(|entry| entry.name == name) {
            existing.is_default |= is_default;
            continue;
        }

        entries.push(DatabaseEntry {
            name: name.to_string(),
            is_default,
            is_system,
        });
    }
    entries
}
