use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::endpoint::{Endpoint, TransportOptions, DEFAULT_URL};

const CONFIG_FILE_NAME: &str = "config.toml";
const SESSION_FILE_NAME: &str = "session.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default = "default_url")]
    pub default_url: String,
    #[serde(flatten)]
    pub transport: TransportOptions,
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_url: default_url(),
            transport: TransportOptions::default(),
            store_path: None,
        }
    }
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

impl ClientConfig {
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load_from_path(default_config_dir()?.join(CONFIG_FILE_NAME))
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds an endpoint for `uri` carrying the configured transport options.
    #[must_use]
    pub fn endpoint(&self, uri: impl Into<String>) -> Endpoint {
        Endpoint::new(uri).with_options(self.transport.clone())
    }

    pub fn session_store_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(default_config_dir()?.join(SESSION_FILE_NAME)),
        }
    }
}

pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    if let Some(custom) = env::var_os("BOLTADM_CONFIG_DIR") {
        return Ok(PathBuf::from(custom));
    }

    let base_dir = if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ConfigError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ConfigError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("boltadm"))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::{ClientConfig, ConfigError};

    #[test]
    fn missing_config_file_loads_defaults() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let config = ClientConfig::load_from_path(temp_dir.path().join("config.toml"))
            .expect("missing file should load defaults");
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.default_url, "bolt://localhost:7687");
    }

    #[test]
    fn partial_config_keeps_defaults_for_missing_keys() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            "default_url = \"neo4j://graph.internal:7687\"\nfetch_size = 500\n",
        )
        .expect("failed to write config");

        let config = ClientConfig::load_from_path(&path).expect("config should parse");
        assert_eq!(config.default_url, "neo4j://graph.internal:7687");
        assert_eq!(config.transport.fetch_size, 500);
        assert_eq!(config.transport.max_connections, 16);
        assert!(config.store_path.is_none());

        let endpoint = config.endpoint("bolt://other:7687");
        assert_eq!(endpoint.uri(), "bolt://other:7687");
        assert_eq!(endpoint.options().fetch_size, 500);
    }

    #[test]
    fn invalid_config_reports_path() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "fetch_size = \"lots\"").expect("failed to write config");

        let err = ClientConfig::load_from_path(&path).expect_err("config should not parse");
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn explicit_store_path_wins() {
        let config = ClientConfig {
            store_path: Some(PathBuf::from("/tmp/boltadm-session.toml")),
            ..ClientConfig::default()
        };
        assert_eq!(
            config.session_store_path().expect("store path"),
            PathBuf::from("/tmp/boltadm-session.toml")
        );
    }
}
