use std::str::FromStr;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

/// Name reported in `pg_stat_activity` for dispatcher connections.
const APPLICATION_NAME: &str = "herald";

/// Create the PostgreSQL pool the record store draws per-dispatch connections from.
///
/// `max_connections` bounds how many dispatch passes can hold a connection at
/// once; pass `AppConfig::db_max_connections` (default 10).
pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let options = PgConnectOptions::from_str(database_url)?.application_name(APPLICATION_NAME);

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;

    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}
