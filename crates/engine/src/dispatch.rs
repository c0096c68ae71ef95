//! Bulk dispatch.
//!
//! A batch carries one notification and an ordered list of recipients. Each
//! target is handled on its own:
//! 1. Build a `NotificationRecord` and persist it
//! 2. If the recipient holds a live channel, push the record over it
//! 3. Record a per-target outcome
//!
//! A failing target never aborts the batch. Only batch-level validation
//! rejects the whole request, and it does so before anything is written.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{
    DEFAULT_CATEGORY, DEFAULT_SOURCE, META_RECIPIENT_DISPLAY_NAME, META_RECIPIENT_EXTERNAL_ID,
    META_RECIPIENT_IDENTITY, NotificationRecord, Priority, RecordView, record_id_for,
};

use crate::registry::{ConnectionRegistry, PushEvent};
use crate::store::{NotificationStore, StoreError};

/// One recipient of a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchTarget {
    pub identity: Option<String>,
    pub external_id: Option<String>,
    pub display_name: Option<String>,
}

impl DispatchTarget {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            ..Default::default()
        }
    }
}

/// Open-tracking settings shared by every record of a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackingSettings {
    #[serde(default)]
    pub enabled: bool,
    pub callback_url: Option<String>,
}

/// Request body for a bulk dispatch.
///
/// Required fields are optional here so that their absence surfaces as a
/// validation error instead of a body rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchBatch {
    pub source_notification_id: Option<String>,
    pub source: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub tracking: TrackingSettings,
    pub targets: Option<Vec<DispatchTarget>>,
}

/// Why a target ended up where it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeReason {
    /// Persisted and pushed to a live channel.
    Delivered,
    /// Persisted; no live channel took it. Replayed on next connect.
    Stored,
    /// A record for this `(source, recipient)` pair already existed.
    Duplicate,
    MissingIdentity,
    PersistenceFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetOutcome {
    /// Position of the target in the batch.
    pub index: usize,
    pub identity: Option<String>,
    pub reason: OutcomeReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated result of a batch. `delivered.len() + stored_or_failed.len() == total`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub total: usize,
    pub delivered: Vec<TargetOutcome>,
    pub stored_or_failed: Vec<TargetOutcome>,
}

impl DispatchReport {
    fn push(&mut self, outcome: TargetOutcome) {
        if outcome.reason == OutcomeReason::Delivered {
            self.delivered.push(outcome);
        } else {
            self.stored_or_failed.push(outcome);
        }
    }

    fn count(&self, reason: OutcomeReason) -> usize {
        self.stored_or_failed
            .iter()
            .filter(|o| o.reason == reason)
            .count()
    }
}

/// Batch fields after validation, shared by every target.
#[derive(Debug)]
struct Shared {
    source_notification_id: String,
    source: String,
    title: String,
    content: String,
    priority: Priority,
    category: String,
    metadata: serde_json::Map<String, serde_json::Value>,
    tracking_enabled: bool,
    tracking_callback_url: Option<String>,
}

fn required(field: &str, value: Option<String>) -> Result<String, AppError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::Validation(format!("{} is required", field))),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Shared {
    fn validate(batch: DispatchBatch) -> Result<(Self, Vec<DispatchTarget>), AppError> {
        let targets = match batch.targets {
            Some(targets) if !targets.is_empty() => targets,
            _ => {
                return Err(AppError::Validation(
                    "targets must be a non-empty list".to_string(),
                ));
            }
        };

        let source_notification_id =
            required("source_notification_id", batch.source_notification_id)?;
        let title = required("title", batch.title)?;
        let content = required("content", batch.content)?;

        let tracking_callback_url = if batch.tracking.enabled {
            non_blank(batch.tracking.callback_url)
        } else {
            None
        };

        let shared = Self {
            source_notification_id,
            source: non_blank(batch.source).unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            title,
            content,
            priority: batch.priority.unwrap_or_default(),
            category: non_blank(batch.category).unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            metadata: batch.metadata.unwrap_or_default(),
            tracking_enabled: batch.tracking.enabled,
            tracking_callback_url,
        };
        Ok((shared, targets))
    }

    fn record_for(&self, identity: &str, target: &DispatchTarget) -> NotificationRecord {
        let mut metadata = self.metadata.clone();
        metadata.insert(META_RECIPIENT_IDENTITY.to_string(), identity.into());
        metadata.insert(
            META_RECIPIENT_EXTERNAL_ID.to_string(),
            target.external_id.clone().into(),
        );
        metadata.insert(
            META_RECIPIENT_DISPLAY_NAME.to_string(),
            target.display_name.clone().into(),
        );

        NotificationRecord {
            record_id: record_id_for(&self.source_notification_id, identity),
            source_notification_id: self.source_notification_id.clone(),
            source: self.source.clone(),
            recipient_identity: identity.to_string(),
            title: self.title.clone(),
            content: self.content.clone(),
            priority: self.priority,
            severity: self.priority.severity(),
            category: self.category.clone(),
            metadata: serde_json::Value::Object(metadata),
            tracking_enabled: self.tracking_enabled,
            tracking_callback_url: self.tracking_callback_url.clone(),
            read: false,
            opened: false,
            opened_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Persists and fans out batches.
pub struct DispatchEngine {
    store: Arc<dyn NotificationStore>,
    registry: Arc<ConnectionRegistry>,
}

impl DispatchEngine {
    pub fn new(store: Arc<dyn NotificationStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Dispatch a batch, returning one outcome per target in input order.
    pub async fn dispatch(&self, batch: DispatchBatch) -> Result<DispatchReport, AppError> {
        let (shared, targets) = Shared::validate(batch)?;

        let mut report = DispatchReport {
            total: targets.len(),
            ..Default::default()
        };

        for (index, target) in targets.iter().enumerate() {
            let outcome = self.dispatch_one(&shared, index, target).await;
            report.push(outcome);
        }

        tracing::info!(
            source_notification_id = %shared.source_notification_id,
            total = report.total,
            delivered = report.delivered.len(),
            stored = report.count(OutcomeReason::Stored),
            duplicate = report.count(OutcomeReason::Duplicate),
            failed = report.count(OutcomeReason::MissingIdentity)
                + report.count(OutcomeReason::PersistenceFailed),
            "Batch dispatched"
        );

        Ok(report)
    }

    async fn dispatch_one(
        &self,
        shared: &Shared,
        index: usize,
        target: &DispatchTarget,
    ) -> TargetOutcome {
        let Some(identity) = non_blank(target.identity.clone()) else {
            tracing::warn!(
                source_notification_id = %shared.source_notification_id,
                index,
                "Target skipped: missing identity"
            );
            return TargetOutcome {
                index,
                identity: None,
                reason: OutcomeReason::MissingIdentity,
                record_id: None,
                error: Some("identity is required".to_string()),
            };
        };

        let record = shared.record_for(&identity, target);
        let record_id = record.record_id;
        let outcome = |reason: OutcomeReason, error: Option<String>| TargetOutcome {
            index,
            identity: Some(identity.clone()),
            reason,
            record_id: Some(record_id),
            error,
        };

        let record = match self.store.create(record).await {
            Ok(record) => record,
            Err(StoreError::DuplicateRecord(_)) => {
                tracing::debug!(record_id = %record_id, identity = %identity, "Record already dispatched");
                return outcome(OutcomeReason::Duplicate, None);
            }
            Err(e) => {
                tracing::error!(
                    record_id = %record_id,
                    identity = %identity,
                    error = %e,
                    "Failed to persist notification"
                );
                return outcome(OutcomeReason::PersistenceFailed, Some(e.to_string()));
            }
        };

        let Some(channel) = self.registry.lookup(&identity) else {
            return outcome(OutcomeReason::Stored, None);
        };

        match channel.push(PushEvent::Notification(RecordView::from(&record))) {
            Ok(()) => outcome(OutcomeReason::Delivered, None),
            Err(e) => {
                // The record stays pending and is replayed on the next connect.
                tracing::warn!(identity = %identity, error = %e, "Live push failed");
                outcome(OutcomeReason::Stored, None)
            }
        }
    }
}
