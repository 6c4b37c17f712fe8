//! PostgreSQL plugin options and connection parameter resolution.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, MAX_TIMEOUT, MIN_TIMEOUT, check_duration_range};
use crate::plugin::PluginError;

/// Default server URI.
pub const DEFAULT_URI: &str = "tcp://localhost:5432";

/// Default PostgreSQL port.
pub const DEFAULT_PORT: u16 = 5432;

/// Default user and database.
const DEFAULT_USER: &str = "postgres";
const DEFAULT_DATABASE: &str = "postgres";

/// Default idle time before a pooled connection is closed (5 minutes).
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(300);

/// Default polling period in seconds.
pub const DEFAULT_INTERVAL: u64 = 1;

const MIN_KEEP_ALIVE: Duration = Duration::from_secs(60);
const MAX_KEEP_ALIVE: Duration = Duration::from_secs(900);

/// Socket file prefix used by PostgreSQL for unix domain sockets.
const SOCKET_PREFIX: &str = ".s.PGSQL.";

fn default_uri() -> String {
    DEFAULT_URI.to_string()
}

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL
}

fn default_keep_alive() -> Duration {
    DEFAULT_KEEP_ALIVE
}

/// Named connection preset referenced by the first key parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Session {
    /// Server URI.
    #[serde(default)]
    pub uri: Option<String>,
    /// User name.
    #[serde(default)]
    pub user: Option<String>,
    /// Password.
    #[serde(default)]
    pub password: Option<String>,
    /// Database to connect to.
    #[serde(default)]
    pub database: Option<String>,
}

/// Options recognized by the PostgreSQL plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostgresOptions {
    /// Polling period in seconds.
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Default server URI (`tcp://host:port` or `unix:/path`).
    #[serde(default = "default_uri")]
    pub uri: String,
    /// Default user name.
    #[serde(default = "default_user")]
    pub user: String,
    /// Default password.
    #[serde(default)]
    pub password: String,
    /// Default database.
    #[serde(default = "default_database")]
    pub database: String,
    /// Idle time before a pooled connection is closed (range 60s..900s).
    #[serde(default = "default_keep_alive", with = "humantime_serde")]
    pub keep_alive: Duration,
    /// Query timeout; falls back to the global timeout (range 1s..30s).
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Named connection presets.
    #[serde(default)]
    pub sessions: BTreeMap<String, Session>,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            uri: default_uri(),
            user: default_user(),
            password: String::new(),
            database: default_database(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            timeout: None,
            sessions: BTreeMap::new(),
        }
    }
}

impl PostgresOptions {
    /// Validate ranges and URIs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval == 0 {
            return Err(ConfigError::ValidationError(
                "interval must be positive".to_string(),
            ));
        }
        check_duration_range("keep_alive", self.keep_alive, MIN_KEEP_ALIVE, MAX_KEEP_ALIVE)?;
        if let Some(timeout) = self.timeout {
            check_duration_range("timeout", timeout, MIN_TIMEOUT, MAX_TIMEOUT)?;
        }

        Endpoint::parse(&self.uri)
            .map_err(|e| ConfigError::ValidationError(format!("uri: {}", e)))?;

        for (name, session) in &self.sessions {
            if name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "session name cannot be empty".to_string(),
                ));
            }
            if let Some(uri) = &session.uri {
                Endpoint::parse(uri).map_err(|e| {
                    ConfigError::ValidationError(format!("session '{}': uri: {}", name, e))
                })?;
            }
        }

        Ok(())
    }

    /// Resolve the connection for a call from the common key parameters
    /// `[uri|session, user, password, database]`.
    ///
    /// A first parameter naming a session selects that preset; empty
    /// parameters fall back to the session, then to the plugin defaults.
    pub fn resolve(&self, params: &[String]) -> Result<ConnKey, PluginError> {
        let param = |i: usize| params.get(i).map(String::as_str).filter(|s| !s.is_empty());

        let session = param(0).and_then(|name| self.sessions.get(name));
        let uri: &str = match (session, param(0)) {
            (Some(s), _) => s.uri.as_deref().unwrap_or(&self.uri),
            (None, Some(uri)) => uri,
            (None, None) => &self.uri,
        };
        let endpoint = Endpoint::parse(uri)
            .map_err(|e| PluginError::invalid_params(format!("invalid URI '{}': {}", uri, e)))?;

        let pick = |i: usize, from_session: Option<&String>, default: &String| {
            param(i)
                .map(str::to_string)
                .or_else(|| from_session.cloned())
                .unwrap_or_else(|| default.clone())
        };

        Ok(ConnKey {
            endpoint,
            user: pick(1, session.and_then(|s| s.user.as_ref()), &self.user),
            password: pick(2, session.and_then(|s| s.password.as_ref()), &self.password),
            database: pick(3, session.and_then(|s| s.database.as_ref()), &self.database),
        })
    }
}

/// Network location of a server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP host and port.
    Tcp { host: String, port: u16 },
    /// Unix socket directory and port.
    Unix { dir: PathBuf, port: u16 },
}

impl Endpoint {
    /// Parse `tcp://host[:port]`, `host[:port]` or `unix:/path`.
    ///
    /// A unix path may point at the socket directory or at the socket file
    /// itself (`/var/run/postgresql/.s.PGSQL.5432`).
    pub fn parse(uri: &str) -> Result<Self, String> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err("URI is empty".to_string());
        }

        let normalized = if uri.contains("://") || uri.starts_with("unix:") {
            uri.to_string()
        } else {
            format!("tcp://{}", uri)
        };
        let url = url::Url::parse(&normalized).map_err(|e| e.to_string())?;

        match url.scheme() {
            "tcp" => {
                let host = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| "host is missing".to_string())?;
                if url.path() != "" && url.path() != "/" {
                    return Err(format!("unexpected path '{}'", url.path()));
                }
                Ok(Self::Tcp {
                    host: host.to_string(),
                    port: url.port().unwrap_or(DEFAULT_PORT),
                })
            }
            "unix" => {
                let path = PathBuf::from(url.path());
                if !path.is_absolute() {
                    return Err("unix socket path must be absolute".to_string());
                }
                let socket_port = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_prefix(SOCKET_PREFIX))
                    .map(|p| p.parse::<u16>().map_err(|e| format!("invalid socket port: {}", e)))
                    .transpose()?;
                match socket_port {
                    Some(port) => Ok(Self::Unix {
                        dir: path.parent().map(PathBuf::from).unwrap_or_default(),
                        port,
                    }),
                    None => Ok(Self::Unix {
                        dir: path,
                        port: DEFAULT_PORT,
                    }),
                }
            }
            other => Err(format!("unsupported scheme '{}'", other)),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Self::Unix { dir, port } => {
                write!(f, "unix:{}/{}{}", dir.display(), SOCKET_PREFIX, port)
            }
        }
    }
}

/// Identity of a pooled connection.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnKey {
    /// Server location.
    pub endpoint: Endpoint,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Database.
    pub database: String,
}

impl fmt::Debug for ConnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnKey")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ConnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.user, self.endpoint, self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::ErrorKind;

    fn params(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_endpoint_parse_tcp() {
        assert_eq!(
            Endpoint::parse("tcp://db.example:6432").unwrap(),
            Endpoint::Tcp {
                host: "db.example".into(),
                port: 6432
            }
        );
        assert_eq!(
            Endpoint::parse("localhost").unwrap(),
            Endpoint::Tcp {
                host: "localhost".into(),
                port: DEFAULT_PORT
            }
        );
        assert_eq!(
            Endpoint::parse("127.0.0.1:5433").unwrap(),
            Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port: 5433
            }
        );
    }

    #[test]
    fn test_endpoint_parse_unix() {
        assert_eq!(
            Endpoint::parse("unix:/var/run/postgresql/.s.PGSQL.5433").unwrap(),
            Endpoint::Unix {
                dir: PathBuf::from("/var/run/postgresql"),
                port: 5433
            }
        );
        assert_eq!(
            Endpoint::parse("unix:/var/run/postgresql").unwrap(),
            Endpoint::Unix {
                dir: PathBuf::from("/var/run/postgresql"),
                port: DEFAULT_PORT
            }
        );
    }

    #[test]
    fn test_endpoint_parse_invalid() {
        assert!(Endpoint::parse("").is_err());
        assert!(Endpoint::parse("http://db:5432").is_err());
        assert!(Endpoint::parse("tcp://db:5432/extra").is_err());
        assert!(Endpoint::parse("tcp://db:99999").is_err());
    }

    #[test]
    fn test_options_defaults_valid() {
        let options = PostgresOptions::default();
        assert_eq!(options.uri, DEFAULT_URI);
        assert_eq!(options.keep_alive, DEFAULT_KEEP_ALIVE);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_interval() {
        let options = PostgresOptions::default();
        assert_eq!(options.interval, DEFAULT_INTERVAL);

        let options = PostgresOptions {
            interval: 0,
            ..Default::default()
        };
        assert!(options.validate().unwrap_err().to_string().contains("interval"));
    }

    #[test]
    fn test_options_validate_ranges() {
        let mut options = PostgresOptions {
            keep_alive: Duration::from_secs(10),
            ..Default::default()
        };
        assert!(options.validate().unwrap_err().to_string().contains("keep_alive"));

        options.keep_alive = DEFAULT_KEEP_ALIVE;
        options.timeout = Some(Duration::from_secs(60));
        assert!(options.validate().unwrap_err().to_string().contains("timeout"));

        options.timeout = Some(Duration::from_secs(5));
        options.sessions.insert(
            "bad".into(),
            Session {
                uri: Some("ftp://x".into()),
                ..Default::default()
            },
        );
        assert!(options.validate().unwrap_err().to_string().contains("session 'bad'"));
    }

    #[test]
    fn test_resolve_defaults() {
        let options = PostgresOptions::default();
        let key = options.resolve(&[]).unwrap();
        assert_eq!(key.to_string(), "postgres@tcp://localhost:5432/postgres");
    }

    #[test]
    fn test_resolve_params_override() {
        let options = PostgresOptions::default();
        let key = options
            .resolve(&params(&["tcp://db:5433", "mon", "pw", ""]))
            .unwrap();
        assert_eq!(
            key.endpoint,
            Endpoint::Tcp {
                host: "db".into(),
                port: 5433
            }
        );
        assert_eq!(key.user, "mon");
        assert_eq!(key.password, "pw");
        assert_eq!(key.database, "postgres");
    }

    #[test]
    fn test_resolve_session() {
        let mut options = PostgresOptions::default();
        options.sessions.insert(
            "prod".into(),
            Session {
                uri: Some("tcp://prod:5432".into()),
                user: Some("svc".into()),
                password: Some("secret".into()),
                database: None,
            },
        );

        let key = options.resolve(&params(&["prod"])).unwrap();
        assert_eq!(key.to_string(), "svc@tcp://prod:5432/postgres");
        assert_eq!(key.password, "secret");

        let key = options.resolve(&params(&["prod", "other"])).unwrap();
        assert_eq!(key.user, "other");
    }

    #[test]
    fn test_resolve_invalid_uri() {
        let options = PostgresOptions::default();
        let err = options.resolve(&params(&["ftp://nope"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParams);
    }

    #[test]
    fn test_conn_key_debug_hides_password() {
        let options = PostgresOptions::default();
        let key = options.resolve(&params(&["", "u", "hunter2"])).unwrap();
        assert!(!format!("{:?}", key).contains("hunter2"));
    }
}
