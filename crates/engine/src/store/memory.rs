use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use herald_common::types::NotificationRecord;

use super::{MarkOpened, NotificationStore, StoreError};

#[derive(Debug)]
struct Entry {
    seq: u64,
    record: NotificationRecord,
}

#[derive(Debug, Default)]
struct Inner {
    next_seq: u64,
    records: HashMap<Uuid, Entry>,
}

/// Process-local store. Used by tests and by `STORE_BACKEND=memory`.
#[derive(Debug, Default)]
pub struct MemoryNotificationStore {
    inner: RwLock<Inner>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn collect(
        &self,
        recipient_identity: &str,
        filter: impl Fn(&NotificationRecord) -> bool,
    ) -> Vec<NotificationRecord> {
        let inner = self.inner.read();
        let mut entries: Vec<&Entry> = inner
            .records
            .values()
            .filter(|e| e.record.recipient_identity == recipient_identity && filter(&e.record))
            .collect();
        // Newest first; insertion order breaks timestamp ties.
        entries.sort_by(|a, b| {
            b.record
                .created_at
                .cmp(&a.record.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        entries.into_iter().map(|e| e.record.clone()).collect()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(&self, record: NotificationRecord) -> Result<NotificationRecord, StoreError> {
        let mut inner = self.inner.write();
        if inner.records.contains_key(&record.record_id) {
            return Err(StoreError::DuplicateRecord(record.record_id));
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.records.insert(
            record.record_id,
            Entry {
                seq,
                record: record.clone(),
            },
        );
        Ok(record)
    }

    async fn find_by_recipient_and_id(
        &self,
        recipient_identity: &str,
        record_id: Uuid,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .records
            .get(&record_id)
            .filter(|e| e.record.recipient_identity == recipient_identity)
            .map(|e| e.record.clone()))
    }

    async fn list_pending(
        &self,
        recipient_identity: &str,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        Ok(self.collect(recipient_identity, |r| !r.opened))
    }

    async fn list_all(
        &self,
        recipient_identity: &str,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        Ok(self.collect(recipient_identity, |_| true))
    }

    async fn mark_opened(
        &self,
        recipient_identity: &str,
        record_id: Uuid,
    ) -> Result<MarkOpened, StoreError> {
        let mut inner = self.inner.write();
        let entry = inner
            .records
            .get_mut(&record_id)
            .filter(|e| e.record.recipient_identity == recipient_identity)
            .ok_or(StoreError::NotFound(record_id))?;

        let transitioned = entry.record.open(Utc::now());
        Ok(MarkOpened {
            record: entry.record.clone(),
            was_already_opened: !transitioned,
        })
    }
}
