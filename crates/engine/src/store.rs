//! Record store: typed access to the `notification` and `attendee` tables.
//!
//! A dispatch pass works against one pooled connection. [`StoreConnector`]
//! hands it out, and it goes back to the pool when the returned store is
//! dropped, whichever way the pass ends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::sync::Mutex;

use herald_common::error::AppError;
use herald_common::types::{Attendee, Notification};

/// Read/write contract the dispatch engine relies on.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Load one notification. `NotFound` if no row matches.
    async fn get_notification(&self, id: i32) -> Result<Notification, AppError>;

    /// Load every attendee. May be empty.
    async fn list_attendees(&self) -> Result<Vec<Attendee>, AppError>;

    /// Set `status` and `completed_date` together in one statement.
    /// `NotFound` if the notification no longer exists.
    async fn record_completion(
        &self,
        id: i32,
        status_summary: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<(), AppError>;
}

/// Opens a [`RecordStore`] scoped to a single dispatch pass.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn RecordStore>, AppError>;
}

/// Connector handing out connections from a PostgreSQL pool.
#[derive(Clone)]
pub struct PgConnector {
    pool: PgPool,
}

impl PgConnector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StoreConnector for PgConnector {
    async fn acquire(&self) -> Result<Box<dyn RecordStore>, AppError> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgRecordStore::new(conn)))
    }
}

/// PostgreSQL-backed store holding one pooled connection.
pub struct PgRecordStore {
    conn: Mutex<PoolConnection<Postgres>>,
}

impl PgRecordStore {
    pub fn new(conn: PoolConnection<Postgres>) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn get_notification(&self, id: i32) -> Result<Notification, AppError> {
        let mut conn = self.conn.lock().await;

        let notification: Notification = sqlx::query_as(
            "SELECT id, subject, message, status, completed_date FROM notification WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut **conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))?;

        Ok(notification)
    }

    async fn list_attendees(&self) -> Result<Vec<Attendee>, AppError> {
        let mut conn = self.conn.lock().await;

        let attendees: Vec<Attendee> =
            sqlx::query_as("SELECT first_name, email FROM attendee ORDER BY email")
                .fetch_all(&mut **conn)
                .await?;

        Ok(attendees)
    }

    async fn record_completion(
        &self,
        id: i32,
        status_summary: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut conn = self.conn.lock().await;

        let result =
            sqlx::query("UPDATE notification SET status = $1, completed_date = $2 WHERE id = $3")
                .bind(status_summary)
                .bind(completed_at)
                .bind(id)
                .execute(&mut **conn)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Notification {} disappeared before completion",
                id
            )));
        }

        tracing::debug!(notification_id = id, status = status_summary, "Completion recorded");
        Ok(())
    }
}
