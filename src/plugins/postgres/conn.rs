//! Connection manager backed by sqlx pools.
//!
//! Keeps one lazily connected pool per [`ConnKey`]. Pools are created on first
//! use, so starting the plugin never touches the network. A pool with no open
//! connections that went unused for `keep_alive` is dropped when the next pool
//! is created, and the map never holds more than [`MAX_POOLS`] entries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use sqlx::Row as _;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, Postgres};

use crate::plugin::ExportContext;
use crate::plugins::postgres::{
    ClientError, ConnKey, ConnectionProvider, Endpoint, PostgresClient, Row,
};

/// Maximum connections per pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Upper bound on distinct pools kept at once.
pub const MAX_POOLS: usize = 64;

struct PoolEntry {
    pool: PgPool,
    last_used: Instant,
}

impl PoolEntry {
    fn is_idle(&self, keep_alive: Duration) -> bool {
        self.pool.size() == 0 && self.last_used.elapsed() >= keep_alive
    }
}

/// sqlx connection manager.
pub struct SqlxConnectionManager {
    pools: Mutex<HashMap<ConnKey, PoolEntry>>,
    closed: AtomicBool,
    timeout: Duration,
    keep_alive: Duration,
}

impl std::fmt::Debug for SqlxConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxConnectionManager")
            .field("pool_count", &self.pool_count())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl SqlxConnectionManager {
    /// Create a manager.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Upper bound on waiting for a connection
    /// * `keep_alive` - Idle time before a pooled connection is closed
    pub fn new(timeout: Duration, keep_alive: Duration) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            timeout,
            keep_alive,
        }
    }

    /// Number of pools currently held.
    pub fn pool_count(&self) -> usize {
        self.pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn pool_for(&self, key: &ConnKey) -> Result<PgPool, ClientError> {
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        // Checked under the lock so a pool is never created after close.
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        if let Some(entry) = pools.get_mut(key) {
            entry.last_used = Instant::now();
            return Ok(entry.pool.clone());
        }

        let mut evicted: Vec<PgPool> = Vec::new();
        let idle: Vec<ConnKey> = pools
            .iter()
            .filter(|(_, entry)| entry.is_idle(self.keep_alive))
            .map(|(k, _)| k.clone())
            .collect();
        for k in idle {
            evicted.extend(pools.remove(&k).map(|e| e.pool));
        }
        if pools.len() >= MAX_POOLS {
            let oldest = pools
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| k.clone());
            if let Some(k) = oldest {
                evicted.extend(pools.remove(&k).map(|e| e.pool));
            }
        }
        if !evicted.is_empty() {
            tracing::debug!(pool_count = evicted.len(), "Evicting unused connection pools");
            close_pools(evicted);
        }

        tracing::debug!(conn = %key, "Creating connection pool");
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .min_connections(0)
            .acquire_timeout(self.timeout)
            .idle_timeout(self.keep_alive)
            .connect_lazy_with(connect_options(key));
        pools.insert(
            key.clone(),
            PoolEntry {
                pool: pool.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(pool)
    }
}

/// Close `pools` in the background. Closing waits for checked-out
/// connections, so it never blocks the caller.
fn close_pools(pools: Vec<PgPool>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                for pool in pools {
                    pool.close().await;
                }
            });
        }
        Err(_) => drop(pools),
    }
}

fn connect_options(key: &ConnKey) -> PgConnectOptions {
    let options = PgConnectOptions::new()
        .username(&key.user)
        .database(&key.database)
        .application_name("collectkit");
    let options = if key.password.is_empty() {
        options
    } else {
        options.password(&key.password)
    };

    match &key.endpoint {
        Endpoint::Tcp { host, port } => options.host(host).port(*port),
        Endpoint::Unix { dir, port } => options.socket(dir).port(*port),
    }
}

#[async_trait::async_trait]
impl ConnectionProvider for SqlxConnectionManager {
    async fn acquire(
        &self,
        ctx: &ExportContext,
        key: &ConnKey,
    ) -> Result<Box<dyn PostgresClient>, ClientError> {
        let pool = self.pool_for(key)?;
        let conn = ctx.run(pool.acquire()).await??;
        Ok(Box::new(SqlxClient {
            conn: tokio::sync::Mutex::new(conn),
        }))
    }

    fn close(&self) {
        let pools: Vec<PgPool> = {
            let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
            self.closed.store(true, Ordering::Release);
            pools.drain().map(|(_, entry)| entry.pool).collect()
        };
        if pools.is_empty() {
            return;
        }

        tracing::debug!(pool_count = pools.len(), "Closing connection pools");
        close_pools(pools);
    }
}

/// A pooled connection lent to one export call.
struct SqlxClient {
    conn: tokio::sync::Mutex<PoolConnection<Postgres>>,
}

#[async_trait::async_trait]
impl PostgresClient for SqlxClient {
    async fn query_row(
        &self,
        ctx: &ExportContext,
        query: &str,
        args: &[&str],
    ) -> Result<Box<dyn Row>, ClientError> {
        let mut conn = self.conn.lock().await;
        let mut q = sqlx::query(query);
        for arg in args {
            q = q.bind(arg.to_string());
        }
        let row = ctx.run(q.fetch_optional(&mut **conn)).await??;
        Ok(Box::new(SqlxRow(row)))
    }
}

struct SqlxRow(Option<PgRow>);

impl SqlxRow {
    fn row(&self) -> Result<&PgRow, ClientError> {
        self.0.as_ref().ok_or(ClientError::NoRows)
    }
}

impl Row for SqlxRow {
    fn scan_text(&self) -> Result<String, ClientError> {
        let value: Option<String> = self.row()?.try_get(0)?;
        value.ok_or(ClientError::NullValue)
    }

    fn scan_i64(&self) -> Result<i64, ClientError> {
        let value: Option<i64> = self.row()?.try_get(0)?;
        value.ok_or(ClientError::NullValue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn key(endpoint: Endpoint) -> ConnKey {
        ConnKey {
            endpoint,
            user: "mon".into(),
            password: String::new(),
            database: "postgres".into(),
        }
    }

    #[tokio::test]
    async fn test_pools_are_lazy_and_shared() {
        let manager = SqlxConnectionManager::new(Duration::from_secs(1), Duration::from_secs(300));
        let k = key(Endpoint::Tcp {
            host: "127.0.0.1".into(),
            port: 1,
        });

        manager.pool_for(&k).unwrap();
        manager.pool_for(&k).unwrap();
        assert_eq!(manager.pool_count(), 1);

        manager
            .pool_for(&key(Endpoint::Unix {
                dir: PathBuf::from("/tmp"),
                port: 5432,
            }))
            .unwrap();
        assert_eq!(manager.pool_count(), 2);
    }

    #[tokio::test]
    async fn test_idle_pools_are_evicted() {
        let manager = SqlxConnectionManager::new(Duration::from_secs(1), Duration::from_millis(1));
        for port in 1..=3 {
            manager
                .pool_for(&key(Endpoint::Tcp {
                    host: "127.0.0.1".into(),
                    port,
                }))
                .unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.pool_count(), 1);
    }

    #[tokio::test]
    async fn test_pool_count_is_capped() {
        let manager = SqlxConnectionManager::new(Duration::from_secs(1), Duration::from_secs(300));
        let first = key(Endpoint::Tcp {
            host: "127.0.0.1".into(),
            port: 1,
        });
        manager.pool_for(&first).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        for port in 2..=(MAX_POOLS as u16 + 10) {
            manager
                .pool_for(&key(Endpoint::Tcp {
                    host: "127.0.0.1".into(),
                    port,
                }))
                .unwrap();
        }
        assert_eq!(manager.pool_count(), MAX_POOLS);
        assert!(!manager.pools.lock().unwrap().contains_key(&first));
    }

    #[tokio::test]
    async fn test_acquire_unreachable_server_fails() {
        let manager = SqlxConnectionManager::new(Duration::from_secs(1), Duration::from_secs(300));
        // Port 1 on loopback refuses connections.
        let k = key(Endpoint::Tcp {
            host: "127.0.0.1".into(),
            port: 1,
        });
        let ctx = ExportContext::new(Duration::from_secs(2));
        let result = manager.acquire(&ctx, &k).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_close_rejects_new_acquisitions() {
        let manager = SqlxConnectionManager::new(Duration::from_secs(1), Duration::from_secs(300));
        let k = key(Endpoint::Tcp {
            host: "127.0.0.1".into(),
            port: 1,
        });
        manager.pool_for(&k).unwrap();

        manager.close();
        manager.close();
        assert_eq!(manager.pool_count(), 0);

        let ctx = ExportContext::new(Duration::from_secs(1));
        let err = manager.acquire(&ctx, &k).await.err().unwrap();
        assert!(matches!(err, ClientError::Closed));
    }
}
