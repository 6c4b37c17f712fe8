//! Metric handlers.
//!
//! Each handler runs one read-only query against the connection lent by the
//! plugin and classifies the outcome. Whether "no rows" means
//! `EmptyResult` or a hard failure is decided per handler.

use crate::plugin::{ExportContext, Handler, ItemValue, PluginError};
use crate::plugins::postgres::{ClientError, PostgresClient};

/// Database discovery key.
pub const KEY_DB_DISCOVERY: &str = "pgsql.db.discovery";

/// Database size key.
pub const KEY_DB_SIZE: &str = "pgsql.db.size";

/// Server uptime key.
pub const KEY_UPTIME: &str = "pgsql.uptime";

/// Builds the low-level discovery document server side, skipping templates and
/// databases that refuse connections.
const DISCOVERY_QUERY: &str = "\
SELECT json_build_object('data',json_agg(json_build_object('{#DBNAME}',d.datname)))::text
  FROM pg_database d
 WHERE NOT datistemplate
   AND datallowconn;";

const DB_SIZE_QUERY: &str = "\
SELECT pg_database_size(datname::text)
  FROM pg_database
 WHERE datistemplate = false
   AND datname = $1;";

const CURRENT_DB_SIZE_QUERY: &str = "SELECT pg_database_size(current_database());";

const UPTIME_QUERY: &str =
    "SELECT date_part('epoch', now() - pg_postmaster_start_time())::bigint;";

/// Position of the database name in the common key parameters.
const DATABASE_PARAM: usize = 3;

/// Lists connectable, non-template databases as a discovery document.
pub struct DatabasesDiscovery;

#[async_trait::async_trait]
impl Handler<dyn PostgresClient> for DatabasesDiscovery {
    async fn handle(
        &self,
        ctx: &ExportContext,
        conn: &dyn PostgresClient,
        _: &str,
        _: &[String],
    ) -> Result<ItemValue, PluginError> {
        let row = conn
            .query_row(ctx, DISCOVERY_QUERY, &[])
            .await
            .map_err(PluginError::cannot_fetch_data)?;

        match row.scan_text() {
            Ok(json) => Ok(ItemValue::Json(json)),
            Err(ClientError::NoRows) => Err(PluginError::empty_result(ClientError::NoRows)),
            Err(e) => Err(PluginError::cannot_fetch_data(e)),
        }
    }
}

/// Size in bytes of one database, or of the connected one.
pub struct DatabaseSize;

#[async_trait::async_trait]
impl Handler<dyn PostgresClient> for DatabaseSize {
    async fn handle(
        &self,
        ctx: &ExportContext,
        conn: &dyn PostgresClient,
        _: &str,
        params: &[String],
    ) -> Result<ItemValue, PluginError> {
        let database = params
            .get(DATABASE_PARAM)
            .map(String::as_str)
            .filter(|s| !s.is_empty());

        let row = match database {
            Some(name) => conn.query_row(ctx, DB_SIZE_QUERY, &[name]).await,
            None => conn.query_row(ctx, CURRENT_DB_SIZE_QUERY, &[]).await,
        }
        .map_err(PluginError::cannot_fetch_data)?;

        match row.scan_i64() {
            Ok(size) => Ok(ItemValue::Integer(size)),
            // Unknown or template database.
            Err(ClientError::NoRows) => Err(PluginError::empty_result(ClientError::NoRows)),
            Err(e) => Err(PluginError::cannot_fetch_data(e)),
        }
    }
}

/// Seconds since the server started.
pub struct Uptime;

#[async_trait::async_trait]
impl Handler<dyn PostgresClient> for Uptime {
    async fn handle(
        &self,
        ctx: &ExportContext,
        conn: &dyn PostgresClient,
        _: &str,
        _: &[String],
    ) -> Result<ItemValue, PluginError> {
        let row = conn
            .query_row(ctx, UPTIME_QUERY, &[])
            .await
            .map_err(PluginError::cannot_fetch_data)?;

        // The query always yields one row, so a missing row is a failure here.
        row.scan_i64()
            .map(ItemValue::Integer)
            .map_err(PluginError::cannot_fetch_data)
    }
}
