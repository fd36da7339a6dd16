use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_URL: &str = "bolt://localhost:7687";

const DEFAULT_MAX_CONNECTIONS: usize = 16;
const DEFAULT_FETCH_SIZE: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportOptions {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
    #[serde(default)]
    pub client_certificate: Option<PathBuf>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            fetch_size: DEFAULT_FETCH_SIZE,
            client_certificate: None,
        }
    }
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_fetch_size() -> usize {
    DEFAULT_FETCH_SIZE
}

/// Where to connect. Built fresh for every login attempt and never mutated
/// once the attempt has started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    uri: String,
    options: TransportOptions,
}

impl Endpoint {
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            options: TransportOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: TransportOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// The URI with any `user:password@` userinfo stripped. Use this
    /// whenever the endpoint is logged.
    #[must_use]
    pub fn redacted_uri(&self) -> Cow<'_, str> {
        redact_userinfo(&self.uri)
    }
}

fn redact_userinfo(uri: &str) -> Cow<'_, str> {
    let authority_start = uri.find("://").map_or(0, |index| index + 3);
    let rest = &uri[authority_start..];
    let authority_end = rest
        .find(|c: char| matches!(c, '/' | '?' | '#'))
        .unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => Cow::Owned(format!("{}{}", &uri[..authority_start], &rest[at + 1..])),
        None => Cow::Borrowed(uri),
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    None,
    Basic { username: String, password: String },
}

impl Credentials {
    #[must_use]
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Maps raw form input to credentials. A half-filled pair is treated as
    /// anonymous rather than sent as a partial basic token.
    #[must_use]
    pub fn from_login_form(username: &str, password: &str) -> Self {
        if username.is_empty() || password.is_empty() {
            Self::None
        } else {
            Self::basic(username, password)
        }
    }

    #[must_use]
    pub fn auth_token(&self) -> AuthToken {
        match self {
            Self::None => AuthToken::None,
            Self::Basic { username, password } => {
                if username.is_empty() || password.is_empty() {
                    AuthToken::None
                } else {
                    AuthToken::Basic {
                        principal: username.clone(),
                        credentials: password.clone(),
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// What the driver layer actually sends during the handshake.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthToken {
    None,
    Basic {
        principal: String,
        credentials: String,
    },
}

impl AuthToken {
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
        }
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("AuthToken::None"),
            Self::Basic { principal, .. } => f
                .debug_struct("AuthToken::Basic")
                .field("principal", principal)
                .field("credentials", &"<redacted>")
                .finish(),
        }
    }
}
