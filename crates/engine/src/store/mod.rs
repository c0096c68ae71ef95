//! Durable notification records.
//!
//! Every record is keyed by a `record_id` derived from
//! `(source_notification_id, recipient_identity)` and is only ever read back
//! through its recipient. Records are created once by dispatch and mutated
//! once, by the open transition.

mod memory;
mod postgres;

pub use memory::MemoryNotificationStore;
pub use postgres::PgNotificationStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::NotificationRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record {0} already exists")]
    DuplicateRecord(Uuid),

    #[error("Record {0} not found")]
    NotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => AppError::NotFound(format!("Notification {} not found", id)),
            StoreError::DuplicateRecord(id) => {
                AppError::Internal(format!("Unexpected duplicate record {}", id))
            }
            StoreError::Database(e) => AppError::Database(e),
        }
    }
}

/// Result of [`NotificationStore::mark_opened`].
#[derive(Debug, Clone)]
pub struct MarkOpened {
    pub record: NotificationRecord,
    pub was_already_opened: bool,
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a new record. Fails with `DuplicateRecord` if the id is taken.
    async fn create(&self, record: NotificationRecord) -> Result<NotificationRecord, StoreError>;

    /// Point lookup scoped to the recipient.
    async fn find_by_recipient_and_id(
        &self,
        recipient_identity: &str,
        record_id: Uuid,
    ) -> Result<Option<NotificationRecord>, StoreError>;

    /// Unopened records for the recipient, most recent first.
    async fn list_pending(
        &self,
        recipient_identity: &str,
    ) -> Result<Vec<NotificationRecord>, StoreError>;

    /// All records for the recipient, most recent first.
    async fn list_all(&self, recipient_identity: &str)
    -> Result<Vec<NotificationRecord>, StoreError>;

    /// Atomically move a record to `opened`.
    ///
    /// An already-opened record is returned unchanged with
    /// `was_already_opened = true`.
    async fn mark_opened(
        &self,
        recipient_identity: &str,
        record_id: Uuid,
    ) -> Result<MarkOpened, StoreError>;
}
