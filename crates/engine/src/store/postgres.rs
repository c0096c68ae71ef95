use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use herald_common::types::NotificationRecord;

use super::{MarkOpened, NotificationStore, StoreError};

/// PostgreSQL-backed store over the `notification_records` table.
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn create(&self, record: NotificationRecord) -> Result<NotificationRecord, StoreError> {
        let inserted: Option<NotificationRecord> = sqlx::query_as(
            r#"
            INSERT INTO notification_records (
                record_id, source_notification_id, source, recipient_identity,
                title, content, priority, severity, category, metadata,
                tracking_enabled, tracking_callback_url, read, opened, opened_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (record_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(record.record_id)
        .bind(&record.source_notification_id)
        .bind(&record.source)
        .bind(&record.recipient_identity)
        .bind(&record.title)
        .bind(&record.content)
        .bind(record.priority)
        .bind(record.severity)
        .bind(&record.category)
        .bind(&record.metadata)
        .bind(record.tracking_enabled)
        .bind(&record.tracking_callback_url)
        .bind(record.read)
        .bind(record.opened)
        .bind(record.opened_at)
        .bind(record.created_at)
        .fetch_optional(&self.pool)
        .await?;

        inserted.ok_or(StoreError::DuplicateRecord(record.record_id))
    }

    async fn find_by_recipient_and_id(
        &self,
        recipient_identity: &str,
        record_id: Uuid,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        let record = sqlx::query_as(
            "SELECT * FROM notification_records WHERE record_id = $1 AND recipient_identity = $2",
        )
        .bind(record_id)
        .bind(recipient_identity)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_pending(
        &self,
        recipient_identity: &str,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let records = sqlx::query_as(
            r#"
            SELECT * FROM notification_records
            WHERE recipient_identity = $1 AND opened = false
            ORDER BY created_at DESC
            "#,
        )
        .bind(recipient_identity)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_all(
        &self,
        recipient_identity: &str,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let records = sqlx::query_as(
            "SELECT * FROM notification_records WHERE recipient_identity = $1 ORDER BY created_at DESC",
        )
        .bind(recipient_identity)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn mark_opened(
        &self,
        recipient_identity: &str,
        record_id: Uuid,
    ) -> Result<MarkOpened, StoreError> {
        // Only one caller can win the `opened = false` guard.
        let transitioned: Option<NotificationRecord> = sqlx::query_as(
            r#"
            UPDATE notification_records
            SET read = true, opened = true, opened_at = NOW()
            WHERE record_id = $1 AND recipient_identity = $2 AND opened = false
            RETURNING *
            "#,
        )
        .bind(record_id)
        .bind(recipient_identity)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(record) = transitioned {
            tracing::debug!(record_id = %record_id, "Notification marked opened");
            return Ok(MarkOpened {
                record,
                was_already_opened: false,
            });
        }

        let existing = self
            .find_by_recipient_and_id(recipient_identity, record_id)
            .await?
            .ok_or(StoreError::NotFound(record_id))?;

        Ok(MarkOpened {
            record: existing,
            was_already_opened: true,
        })
    }
}
