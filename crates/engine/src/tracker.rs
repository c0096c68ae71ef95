//! Open tracking.
//!
//! A record moves `unread -> opened` exactly once. The first transition of a
//! tracked record fires one confirmation to the originator's callback URL;
//! every later call is a no-op that returns the record as it is.

use std::sync::Arc;

use tokio::task::JoinHandle;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::NotificationRecord;
use herald_notifier::{CallbackError, ConfirmationSender, OpenConfirmation};

use crate::store::NotificationStore;

/// Result of [`DeliveryTracker::mark_opened`].
#[derive(Debug)]
pub struct OpenOutcome {
    pub record: NotificationRecord,
    pub was_already_opened: bool,
    /// In-flight confirmation, if one was fired. Dropping it detaches the task.
    pub confirmation: Option<JoinHandle<Result<(), CallbackError>>>,
}

pub struct DeliveryTracker {
    store: Arc<dyn NotificationStore>,
    sender: Arc<dyn ConfirmationSender>,
}

impl DeliveryTracker {
    pub fn new(store: Arc<dyn NotificationStore>, sender: Arc<dyn ConfirmationSender>) -> Self {
        Self { store, sender }
    }

    pub async fn mark_opened(
        &self,
        recipient_identity: &str,
        record_id: Uuid,
    ) -> Result<OpenOutcome, AppError> {
        if recipient_identity.trim().is_empty() {
            return Err(AppError::Auth("Recipient identity is required".to_string()));
        }

        let marked = self.store.mark_opened(recipient_identity, record_id).await?;
        if marked.was_already_opened {
            return Ok(OpenOutcome {
                record: marked.record,
                was_already_opened: true,
                confirmation: None,
            });
        }

        tracing::info!(
            record_id = %record_id,
            identity = recipient_identity,
            "Notification opened"
        );

        let confirmation = self.fire_confirmation(&marked.record);
        Ok(OpenOutcome {
            record: marked.record,
            was_already_opened: false,
            confirmation,
        })
    }

    /// Spawn the one confirmation call for a freshly opened record.
    ///
    /// The outcome is logged and otherwise discarded; it never reaches the
    /// caller of `mark_opened`.
    fn fire_confirmation(
        &self,
        record: &NotificationRecord,
    ) -> Option<JoinHandle<Result<(), CallbackError>>> {
        let url = record.confirmation_url()?.to_string();
        let confirmation = OpenConfirmation::for_record(record)?;
        let sender = self.sender.clone();
        let record_id = record.record_id;

        Some(tokio::spawn(async move {
            let result = sender.send(&url, &confirmation).await;
            match &result {
                Ok(()) => tracing::info!(
                    record_id = %record_id,
                    url = %url,
                    "Open confirmation sent"
                ),
                Err(e) => tracing::warn!(
                    record_id = %record_id,
                    url = %url,
                    error = %e,
                    "Open confirmation failed"
                ),
            }
            result
        }))
    }
}
