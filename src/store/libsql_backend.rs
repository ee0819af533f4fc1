//! libSQL implementation of the `Database` trait.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::Database;
use crate::viewings::model::{FutureViewing, ProcessingStatus};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format: fixed-width RFC 3339 in UTC, so that lexical
/// order in SQL matches chronological order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(ndt.and_utc());
    }
    Err(DatabaseError::Serialization(format!("Invalid timestamp: {s}")))
}

/// SQLite integers are signed; a page past `i64::MAX` is simply empty.
fn sql_int(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn query_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

/// Map a libsql Row to a FutureViewing.
///
/// Column order matches VIEWING_COLUMNS:
/// 0:id, 1:name, 2:age, 3:content, 4:created_at, 5:image_url, 6:status, 7:has_been_viewed
fn row_to_viewing(row: &libsql::Row) -> Result<FutureViewing, DatabaseError> {
    let id_str: String = row.get(0).map_err(query_err)?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Serialization(format!("Invalid viewing id {id_str}: {e}")))?;
    let age: i64 = row.get(2).map_err(query_err)?;
    let created_str: String = row.get(4).map_err(query_err)?;
    let image_url: Option<String> = row.get(5).ok();
    let status_str: String = row.get(6).map_err(query_err)?;
    let viewed: i64 = row.get(7).map_err(query_err)?;

    let status: ProcessingStatus = status_str
        .parse()
        .map_err(DatabaseError::Serialization)?;

    Ok(FutureViewing {
        id,
        name: row.get(1).map_err(query_err)?,
        age: age as i32,
        content: row.get(3).map_err(query_err)?,
        created_at: parse_datetime(&created_str)?,
        image_url,
        status,
        has_been_viewed: viewed != 0,
    })
}

async fn collect_viewings(mut rows: libsql::Rows) -> Result<Vec<FutureViewing>, DatabaseError> {
    let mut viewings = Vec::new();
    while let Some(row) = rows.next().await.map_err(query_err)? {
        viewings.push(row_to_viewing(&row)?);
    }
    Ok(viewings)
}

// ── Trait implementation ────────────────────────────────────────────

const VIEWING_COLUMNS: &str =
    "id, name, age, content, created_at, image_url, status, has_been_viewed";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn insert_viewing(&self, viewing: &FutureViewing) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO future_viewings (id, name, age, content, created_at, image_url, status, has_been_viewed) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    viewing.id.to_string(),
                    viewing.name.as_str(),
                    viewing.age as i64,
                    viewing.content.as_str(),
                    format_datetime(&viewing.created_at),
                    opt_text(viewing.image_url.as_deref()),
                    viewing.status.as_str(),
                    viewing.has_been_viewed as i64,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to insert viewing: {e}")))?;

        debug!(viewing_id = %viewing.id, "Viewing inserted");
        Ok(())
    }

    async fn get_viewing(&self, id: Uuid) -> Result<Option<FutureViewing>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {VIEWING_COLUMNS} FROM future_viewings WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_viewing(&row)?)),
            None => Ok(None),
        }
    }

    async fn complete_viewing(&self, id: Uuid, image_url: &str) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE future_viewings SET status = ?1, image_url = ?2 WHERE id = ?3 AND status = ?4",
                params![
                    ProcessingStatus::Completed.as_str(),
                    image_url,
                    id.to_string(),
                    ProcessingStatus::Pending.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to complete viewing: {e}")))?;
        Ok(changed > 0)
    }

    async fn fail_viewing(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE future_viewings SET status = ?1, image_url = NULL WHERE id = ?2 AND status = ?3",
                params![
                    ProcessingStatus::Failed.as_str(),
                    id.to_string(),
                    ProcessingStatus::Pending.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to fail viewing: {e}")))?;
        Ok(changed > 0)
    }

    async fn list_viewings(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<FutureViewing>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {VIEWING_COLUMNS} FROM future_viewings ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2"
                ),
                params![sql_int(limit), sql_int(offset)],
            )
            .await
            .map_err(query_err)?;

        collect_viewings(rows).await
    }

    async fn take_recent_unseen(
        &self,
        since: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<FutureViewing>, DatabaseError> {
        // Select and mark in one statement so concurrent readers never see the
        // same record as unseen twice.
        let rows = self
            .conn()
            .query(
                &format!(
                    "UPDATE future_viewings SET has_been_viewed = 1
                     WHERE id IN (
                         SELECT id FROM future_viewings
                         WHERE status = ?1 AND created_at >= ?2 AND has_been_viewed = 0
                         ORDER BY created_at DESC, id DESC
                         LIMIT ?3 OFFSET ?4
                     )
                     RETURNING {VIEWING_COLUMNS}"
                ),
                params![
                    ProcessingStatus::Completed.as_str(),
                    format_datetime(&since),
                    sql_int(limit),
                    sql_int(offset),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to take recent viewings: {e}")))?;

        // RETURNING order is unspecified.
        let mut viewings = collect_viewings(rows).await?;
        viewings.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.to_string().cmp(&a.id.to_string()))
        });
        Ok(viewings)
    }
}
