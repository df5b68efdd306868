//! Boundary types and operations for the growing-chamber host.
//!
//! The panel never talks to devices directly: registries, the persisted
//! config store, the logbook and actuator commands all live behind the
//! host, reached through the [`HostApi`] trait. `client.rs` provides the
//! HTTP implementation; tests substitute an in-memory fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schedule::OptionMap;

// ---------------------------------------------------------------------------
// Registry records
// ---------------------------------------------------------------------------

/// Device registry record, as listed by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub name: String,
    /// Operator-assigned display name, preferred over `name` when set.
    #[serde(default)]
    pub name_by_user: Option<String>,
    /// `(domain, identifier)` pairs tagging which integration owns the
    /// device.
    #[serde(default)]
    pub identifiers: Vec<Vec<String>>,
    #[serde(default)]
    pub primary_config_entry: Option<String>,
}

impl DeviceRecord {
    pub fn display_name(&self) -> &str {
        self.name_by_user.as_deref().unwrap_or(&self.name)
    }

    pub fn belongs_to(&self, domain: &str) -> bool {
        self.identifiers
            .iter()
            .any(|id| id.first().map(String::as_str) == Some(domain))
    }
}

/// Entity registry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_id: String,
    pub unique_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Configuration entry owning one device's persisted option map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    #[serde(default)]
    pub title: String,
}

/// One historical state-change event from the host's logbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogbookEvent {
    pub entity_id: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub message: Option<String>,
    pub when: DateTime<Utc>,
    #[serde(default)]
    pub name: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("host rejected request: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, HostError>;

// ---------------------------------------------------------------------------
// Boundary operations
// ---------------------------------------------------------------------------

/// Request/response operations the panel consumes. The live-state push
/// subscription is not part of this trait: pushes arrive over MQTT in
/// `main.rs` and are fed to the controller as refresh signals.
#[async_trait]
pub trait HostApi: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<DeviceRecord>>;

    async fn list_entities(&self) -> Result<Vec<EntityRecord>>;

    async fn list_config_entries(&self, domain: &str) -> Result<Vec<ConfigEntry>>;

    /// Full persisted option map for one entry. The registry listings are
    /// known to omit options, so this is the only authoritative read.
    async fn get_config(&self, entry_id: &str) -> Result<OptionMap>;

    /// Merge-patch: keys absent from `patch` stay untouched on the host.
    /// The response carries at least the fields that changed.
    async fn update_config(&self, entry_id: &str, patch: OptionMap) -> Result<OptionMap>;

    /// Store a device image; returns the new image version token.
    async fn upload_image(&self, device_id: &str, entry_id: &str, image: Vec<u8>) -> Result<i64>;

    async fn get_events(
        &self,
        start: DateTime<Utc>,
        entity_ids: &[String],
    ) -> Result<Vec<LogbookEvent>>;

    /// Fire-and-forget actuator command.
    async fn toggle(&self, entity_id: &str) -> Result<()>;
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(identifiers: Vec<Vec<String>>) -> DeviceRecord {
        DeviceRecord {
            id: "d1".into(),
            name: "Tent".into(),
            name_by_user: None,
            identifiers,
            primary_config_entry: None,
        }
    }

    #[test]
    fn belongs_to_matches_first_identifier_element() {
        let d = record(vec![vec!["grow_box".into(), "abc".into()]]);
        assert!(d.belongs_to("grow_box"));
        assert!(!d.belongs_to("other"));
    }

    #[test]
    fn belongs_to_handles_empty_identifiers() {
        let d = record(vec![vec![]]);
        assert!(!d.belongs_to("grow_box"));
        assert!(!record(vec![]).belongs_to("grow_box"));
    }

    #[test]
    fn display_name_prefers_operator_name() {
        let mut d = record(vec![]);
        assert_eq!(d.display_name(), "Tent");
        d.name_by_user = Some("My Tent".into());
        assert_eq!(d.display_name(), "My Tent");
    }

    #[test]
    fn logbook_event_deserializes_with_missing_fields() {
        let ev: LogbookEvent = serde_json::from_str(
            r#"{"entity_id":"switch.pump","when":"2025-06-15T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(ev.entity_id, "switch.pump");
        assert_eq!(ev.state, "");
        assert!(ev.message.is_none());
    }
}
