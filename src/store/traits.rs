//! `Database` trait: the async interface for viewing persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::viewings::model::FutureViewing;

/// Backend-agnostic record store.
///
/// Terminal and seen transitions are conditional: a write that would move a
/// record out of a terminal state, or un-see it, is a no-op reported as `false`.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Insert a newly created viewing.
    async fn insert_viewing(&self, viewing: &FutureViewing) -> Result<(), DatabaseError>;

    /// Get a viewing by ID.
    async fn get_viewing(&self, id: Uuid) -> Result<Option<FutureViewing>, DatabaseError>;

    /// Move a pending viewing to `Completed` with its image URL, in one write.
    /// Returns `false` if the viewing is missing or already terminal.
    async fn complete_viewing(&self, id: Uuid, image_url: &str) -> Result<bool, DatabaseError>;

    /// Move a pending viewing to `Failed`.
    /// Returns `false` if the viewing is missing or already terminal.
    async fn fail_viewing(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// All viewings, newest first.
    async fn list_viewings(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<FutureViewing>, DatabaseError>;

    /// Completed, unseen viewings created at or after `since`, newest first,
    /// marked seen in the same statement. The returned records carry
    /// `has_been_viewed = true`.
    async fn take_recent_unseen(
        &self,
        since: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<FutureViewing>, DatabaseError>;
}
