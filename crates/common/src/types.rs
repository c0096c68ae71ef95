use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for deriving record ids from `(source_notification_id, recipient_identity)`.
const RECORD_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6b1d_2f0e_94a3_4c57_8e21_3d5a_0c7f_b912);

/// Category applied when the originator does not classify a notification.
pub const DEFAULT_CATEGORY: &str = "general";

/// Source label applied when the originator does not name itself.
pub const DEFAULT_SOURCE: &str = "external";

/// Metadata keys the service always writes alongside the originator's payload.
pub const META_RECIPIENT_IDENTITY: &str = "recipient_identity";
pub const META_RECIPIENT_EXTERNAL_ID: &str = "recipient_external_id";
pub const META_RECIPIENT_DISPLAY_NAME: &str = "recipient_display_name";

/// Originator-assigned importance of a notification.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Display severity for this priority. The mapping is fixed.
    pub const fn severity(self) -> Severity {
        match self {
            Priority::High => Severity::Error,
            Priority::Medium => Severity::Warning,
            Priority::Low => Severity::Info,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Severity label shown to recipients, derived from [`Priority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// Deterministic record id for one recipient of one source notification.
///
/// Retrying the same batch yields the same ids, which is what makes
/// `NotificationStore::create` idempotent per `(source, recipient)` pair.
/// The source id is length-prefixed so a `:` in either part cannot make two
/// pairs share a name.
pub fn record_id_for(source_notification_id: &str, recipient_identity: &str) -> Uuid {
    let name = format!(
        "{}:{}:{}",
        source_notification_id.len(),
        source_notification_id,
        recipient_identity
    );
    Uuid::new_v5(&RECORD_ID_NAMESPACE, name.as_bytes())
}

/// A notification addressed to a single recipient, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationRecord {
    pub record_id: Uuid,
    pub source_notification_id: String,
    pub source: String,
    pub recipient_identity: String,
    pub title: String,
    pub content: String,
    pub priority: Priority,
    pub severity: Severity,
    pub category: String,
    pub metadata: serde_json::Value,
    pub tracking_enabled: bool,
    pub tracking_callback_url: Option<String>,
    pub read: bool,
    pub opened: bool,
    pub opened_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Display name the record was addressed to, if the originator supplied one.
    pub fn recipient_display_name(&self) -> Option<&str> {
        self.metadata
            .get(META_RECIPIENT_DISPLAY_NAME)
            .and_then(|v| v.as_str())
    }

    /// Callback URL to confirm an open to, when tracking is on.
    pub fn confirmation_url(&self) -> Option<&str> {
        if self.tracking_enabled {
            self.tracking_callback_url.as_deref()
        } else {
            None
        }
    }

    /// Apply the open transition in place. Returns `false` if already opened.
    pub fn open(&mut self, at: DateTime<Utc>) -> bool {
        if self.opened {
            return false;
        }
        self.read = true;
        self.opened = true;
        self.opened_at = Some(at);
        true
    }
}

/// Public projection of a record, pushed over channels and returned by queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordView {
    pub id: Uuid,
    pub source_notification_id: String,
    pub source: String,
    pub title: String,
    pub content: String,
    pub priority: Priority,
    pub category: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    pub opened: bool,
    pub opened_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub tracking_enabled: bool,
    pub tracking_callback_url: Option<String>,
}

impl From<&NotificationRecord> for RecordView {
    fn from(record: &NotificationRecord) -> Self {
        Self {
            id: record.record_id,
            source_notification_id: record.source_notification_id.clone(),
            source: record.source.clone(),
            title: record.title.clone(),
            content: record.content.clone(),
            priority: record.priority,
            category: record.category.clone(),
            severity: record.severity,
            timestamp: record.created_at,
            read: record.read,
            opened: record.opened,
            opened_at: record.opened_at,
            metadata: record.metadata.clone(),
            tracking_enabled: record.tracking_enabled,
            tracking_callback_url: record.tracking_callback_url.clone(),
        }
    }
}

impl From<NotificationRecord> for RecordView {
    fn from(record: NotificationRecord) -> Self {
        RecordView::from(&record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record() -> NotificationRecord {
        NotificationRecord {
            record_id: record_id_for("rel-1", "a@x"),
            source_notification_id: "rel-1".to_string(),
            source: DEFAULT_SOURCE.to_string(),
            recipient_identity: "a@x".to_string(),
            title: "T".to_string(),
            content: "C".to_string(),
            priority: Priority::default(),
            severity: Priority::default().severity(),
            category: DEFAULT_CATEGORY.to_string(),
            metadata: serde_json::json!({ META_RECIPIENT_DISPLAY_NAME: "Ada" }),
            tracking_enabled: true,
            tracking_callback_url: Some("http://origin/callback".to_string()),
            read: false,
            opened: false,
            opened_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(Priority::High.severity(), Severity::Error);
        assert_eq!(Priority::Medium.severity(), Severity::Warning);
        assert_eq!(Priority::Low.severity(), Severity::Info);
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_priority_wire_format() {
        let p: Priority = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(p, Priority::High);
        assert_eq!(serde_json::to_string(&Severity::Warning).unwrap(), "\"warning\"");
        assert!(serde_json::from_str::<Priority>("\"urgent\"").is_err());
    }

    #[test]
    fn test_record_id_is_deterministic_per_pair() {
        assert_eq!(record_id_for("rel-1", "a@x"), record_id_for("rel-1", "a@x"));
        assert_ne!(record_id_for("rel-1", "a@x"), record_id_for("rel-1", "b@x"));
        assert_ne!(record_id_for("rel-1", "a@x"), record_id_for("rel-2", "a@x"));
    }

    #[test]
    fn test_record_id_separator_in_parts() {
        assert_ne!(record_id_for("rel:1", "u"), record_id_for("rel", "1:u"));
        assert_ne!(record_id_for("a:", "b"), record_id_for("a", ":b"));
        assert_ne!(record_id_for("", "3:a:b"), record_id_for("3:a", "b"));
    }

    #[test]
    fn test_open_sets_timestamp_once() {
        let mut record = make_record();
        let first = Utc::now();
        assert!(record.open(first));
        assert!(record.read && record.opened);
        assert_eq!(record.opened_at, Some(first));

        assert!(!record.open(first + chrono::Duration::seconds(30)));
        assert_eq!(record.opened_at, Some(first));
    }

    #[test]
    fn test_confirmation_url_requires_tracking() {
        let mut record = make_record();
        assert_eq!(record.confirmation_url(), Some("http://origin/callback"));
        record.tracking_enabled = false;
        assert_eq!(record.confirmation_url(), None);
    }

    #[test]
    fn test_view_projection() {
        let record = make_record();
        let view = RecordView::from(&record);
        assert_eq!(view.id, record.record_id);
        assert_eq!(view.timestamp, record.created_at);
        assert_eq!(view.severity, Severity::Warning);
        assert_eq!(record.recipient_display_name(), Some("Ada"));
    }
}
