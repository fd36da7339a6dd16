use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const HOST_KEY: &str = "host";
pub const LOGIN_KEY: &str = "login";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read session store at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse session store at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create session store directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize session store: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write session store at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("stored `{key}` value is not valid: {source}")]
    Decode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode `{key}` value: {source}")]
    Encode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// String key/value persistence that outlives the process.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

/// In-process store. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionDocument {
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

/// TOML-backed store; every mutation is written through to disk.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileKeyValueStore {
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                entries: BTreeMap::new(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| StoreError::Read {
            path: path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self {
                path,
                entries: BTreeMap::new(),
            });
        }

        let doc: SessionDocument = toml::from_str(&raw).map_err(|source| StoreError::Parse {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            entries: doc.entries,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), StoreError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| StoreError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let doc = SessionDocument {
            entries: self.entries.clone(),
        };
        let rendered =
            toml::to_string_pretty(&doc).map_err(|source| StoreError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        self.persist()
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        if self.entries.remove(key).is_some() {
            self.persist()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedSession {
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl PersistedSession {
    #[must_use]
    pub fn has_login(&self) -> bool {
        self.username.is_some() || self.password.is_some()
    }
}

#[derive(Serialize, Deserialize)]
struct StoredLogin {
    username: String,
    password: String,
}

/// Typed view over the `host` and `login` keys of a [`KeyValueStore`].
#[derive(Debug)]
pub struct CredentialStore<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> CredentialStore<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Result<PersistedSession, StoreError> {
        let host = self.store.get(HOST_KEY)?;
        let Some(raw_login) = self.store.get(LOGIN_KEY)? else {
            return Ok(PersistedSession {
                host,
                username: None,
                password: None,
            });
        };

        let login: StoredLogin =
            serde_json::from_str(&raw_login).map_err(|source| StoreError::Decode {
                key: LOGIN_KEY,
                source,
            })?;
        Ok(PersistedSession {
            host,
            username: Some(login.username),
            password: Some(login.password),
        })
    }

    pub fn host(&self) -> Result<Option<String>, StoreError> {
        self.store.get(HOST_KEY)
    }

    pub fn save_host(&mut self, host: &str) -> Result<(), StoreError> {
        self.store.set(HOST_KEY, host)
    }

    pub fn save_login(&mut self, username: &str, password: &str) -> Result<(), StoreError> {
        let rendered = serde_json::to_string(&StoredLogin {
            username: username.to_string(),
            password: password.to_string(),
        })
        .map_err(|source| StoreError::Encode {
            key: LOGIN_KEY,
            source,
        })?;
        self.store.set(LOGIN_KEY, &rendered)
    }

    pub fn clear_login(&mut self) -> Result<(), StoreError> {
        self.store.remove(LOGIN_KEY)
    }
}
