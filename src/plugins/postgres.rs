//! PostgreSQL Plugin
//!
//! Collects server and database metrics over pooled connections.
//!
//! # Keys
//!
//! | Key                  | Value                                  |
//! |----------------------|----------------------------------------|
//! | `pgsql.db.discovery` | JSON discovery document of databases   |
//! | `pgsql.db.size`      | Database size in bytes                 |
//! | `pgsql.uptime`       | Seconds since the server started       |
//!
//! Every key takes up to four parameters,
//! `[uri|session, user, password, database]`. Empty parameters fall back to
//! the named session and then to the plugin options.
//!
//! # Configuration
//!
//! ```yaml
//! plugins:
//!   Postgres:
//!     uri: tcp://localhost:5432
//!     user: zbx_monitor
//!     keep_alive: 5m
//!     sessions:
//!       replica:
//!         uri: unix:/var/run/postgresql
//!         database: app
//! ```

mod client;
mod conn;
mod handlers;
mod options;
mod plugin;

pub use client::{ClientError, ConnectionProvider, PostgresClient, Row};
pub use conn::SqlxConnectionManager;
pub use handlers::{KEY_DB_DISCOVERY, KEY_DB_SIZE, KEY_UPTIME};
pub use options::{ConnKey, DEFAULT_KEEP_ALIVE, DEFAULT_URI, Endpoint, PostgresOptions, Session};
pub use plugin::{PLUGIN_NAME, PostgresPlugin, register};
