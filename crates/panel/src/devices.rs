//! Joins the three host registries into per-device view models.
//!
//! Registry listings omit persisted options, so every device gets a
//! secondary `get_config` read. Those reads fan out concurrently and are
//! fault-isolated: one device's failure degrades that device to an empty
//! option map and never aborts its siblings.

use futures::future::join_all;
use serde::Serialize;
use tracing::warn;

use crate::host::{ConfigEntry, DeviceRecord, EntityRecord, HostApi, Result};
use crate::schedule::{opt_str, OptionMap};

/// Domain identifier tagging devices this panel manages.
pub const DOMAIN: &str = "grow_box";

// ---------------------------------------------------------------------------
// View model
// ---------------------------------------------------------------------------

/// Entity references resolved from the device's registry entities by
/// unique-id suffix. Absent suffixes are `None`, never an error.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EntityRefs {
    pub phase: Option<String>,
    pub master: Option<String>,
    pub vpd: Option<String>,
    pub pump: Option<String>,
    pub days: Option<String>,
}

/// Unified per-device record the panel operates on.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceView {
    pub id: String,
    pub name: String,
    /// Owning config entry; `None` until the device is bootstrapped on the
    /// host, in which case no draft can exist for it either.
    pub entry_id: Option<String>,
    pub options: OptionMap,
    pub refs: EntityRefs,
}

impl DeviceView {
    /// Entity id stored in an option field (`light_entity`, `temp_sensor`,
    /// ...), if configured.
    pub fn option_entity(&self, key: &str) -> Option<&str> {
        opt_str(&self.options, key)
    }

    /// Pump actuator: the registry reference wins, the `pump_entity`
    /// option is the fallback for externally wired pumps.
    pub fn pump_entity(&self) -> Option<&str> {
        self.refs.pump.as_deref().or_else(|| self.option_entity("pump_entity"))
    }
}

// ---------------------------------------------------------------------------
// Registry join
// ---------------------------------------------------------------------------

const REF_SUFFIXES: [(&str, &str); 5] = [
    ("phase", "_phase"),
    ("master", "_master_switch"),
    ("vpd", "_vpd"),
    ("pump", "_water_pump"),
    ("days", "_days_in_phase"),
];

fn find_ref(entities: &[&EntityRecord], suffix: &str) -> Option<String> {
    entities
        .iter()
        .find(|e| e.unique_id.ends_with(suffix))
        .map(|e| e.entity_id.clone())
}

fn resolve_refs(entities: &[&EntityRecord]) -> EntityRefs {
    let mut refs = EntityRefs::default();
    for (field, suffix) in REF_SUFFIXES {
        let found = find_ref(entities, suffix);
        match field {
            "phase" => refs.phase = found,
            "master" => refs.master = found,
            "vpd" => refs.vpd = found,
            "pump" => refs.pump = found,
            "days" => refs.days = found,
            _ => unreachable!(),
        }
    }
    refs
}

/// Fetch all three registries and join them into view models.
pub async fn fetch_view_models(host: &dyn HostApi, domain: &str) -> Result<Vec<DeviceView>> {
    let devices = host.list_devices().await?;
    let entities = host.list_entities().await?;
    let entries = host.list_config_entries(domain).await?;
    Ok(build_view_models(host, domain, devices, &entities, &entries).await)
}

/// Join raw registry records. Zero matching devices is an empty list, not
/// an error.
pub async fn build_view_models(
    host: &dyn HostApi,
    domain: &str,
    devices: Vec<DeviceRecord>,
    entities: &[EntityRecord],
    entries: &[ConfigEntry],
) -> Vec<DeviceView> {
    let mine: Vec<DeviceRecord> = devices.into_iter().filter(|d| d.belongs_to(domain)).collect();

    // One assembly future per device; config fetches run concurrently and
    // fail independently.
    let futures = mine
        .iter()
        .map(|device| assemble(host, device, entities, entries));
    join_all(futures).await
}

async fn assemble(
    host: &dyn HostApi,
    device: &DeviceRecord,
    entities: &[EntityRecord],
    entries: &[ConfigEntry],
) -> DeviceView {
    let device_entities: Vec<&EntityRecord> = entities
        .iter()
        .filter(|e| e.device_id.as_deref() == Some(device.id.as_str()))
        .collect();

    let entry = device
        .primary_config_entry
        .as_deref()
        .and_then(|eid| entries.iter().find(|e| e.entry_id == eid));

    let options = match entry {
        Some(entry) => match host.get_config(&entry.entry_id).await {
            Ok(map) => map,
            Err(err) => {
                warn!(
                    device = %device.display_name(),
                    entry = %entry.entry_id,
                    error = %err,
                    "config fetch failed — continuing with empty options"
                );
                OptionMap::new()
            }
        },
        None => OptionMap::new(),
    };

    DeviceView {
        id: device.id.clone(),
        name: device.display_name().to_string(),
        entry_id: entry.map(|e| e.entry_id.clone()),
        options,
        refs: resolve_refs(&device_entities),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testhost::FakeHost;
    use serde_json::json;

    #[tokio::test]
    async fn joins_registries_into_view_model() {
        let host = FakeHost::with_one_device();
        let views = fetch_view_models(&host, DOMAIN).await.unwrap();

        assert_eq!(views.len(), 1);
        let v = &views[0];
        assert_eq!(v.id, "dev1");
        assert_eq!(v.name, "Tent A");
        assert_eq!(v.entry_id.as_deref(), Some("entry1"));
        assert_eq!(v.refs.phase.as_deref(), Some("sensor.tent_a_phase"));
        assert_eq!(v.refs.master.as_deref(), Some("switch.tent_a_master"));
        assert_eq!(v.refs.vpd.as_deref(), Some("sensor.tent_a_vpd"));
        assert_eq!(v.refs.pump.as_deref(), Some("switch.tent_a_pump"));
        assert_eq!(v.refs.days.as_deref(), Some("sensor.tent_a_days"));
        // Options only arrive via the secondary fetch.
        assert_eq!(v.options.get("light_start_hour"), Some(&json!(18)));
    }

    #[tokio::test]
    async fn foreign_domain_devices_are_filtered_out() {
        let host = FakeHost::with_one_device();
        host.add_device("dev2", "Vacuum", Some("entry2"), "vacuum_cleaner");

        let views = fetch_view_models(&host, DOMAIN).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].id, "dev1");
    }

    #[tokio::test]
    async fn zero_devices_is_empty_list_not_error() {
        let host = FakeHost::new();
        let views = fetch_view_models(&host, DOMAIN).await.unwrap();
        assert!(views.is_empty());
    }

    #[tokio::test]
    async fn config_fetch_failure_degrades_one_device_only() {
        let host = FakeHost::with_one_device();
        host.add_grow_device("dev2", "Tent B", Some("entry2"));
        host.fail_get_config("entry1");

        let views = fetch_view_models(&host, DOMAIN).await.unwrap();
        assert_eq!(views.len(), 2);

        let a = views.iter().find(|v| v.id == "dev1").unwrap();
        let b = views.iter().find(|v| v.id == "dev2").unwrap();
        assert!(a.options.is_empty());
        assert!(!b.options.is_empty());
    }

    #[tokio::test]
    async fn missing_entry_yields_empty_options_and_no_entry_id() {
        let host = FakeHost::new();
        host.add_grow_device("dev9", "Orphan", None);

        let views = fetch_view_models(&host, DOMAIN).await.unwrap();
        assert_eq!(views.len(), 1);
        assert!(views[0].entry_id.is_none());
        assert!(views[0].options.is_empty());
    }

    #[tokio::test]
    async fn absent_suffixes_resolve_to_none() {
        let host = FakeHost::new();
        host.add_grow_device("dev1", "Bare", Some("entry1"));
        // No entities registered at all.
        let views = fetch_view_models(&host, DOMAIN).await.unwrap();
        let refs = &views[0].refs;
        assert!(refs.phase.is_none());
        assert!(refs.master.is_none());
        assert!(refs.pump.is_none());
    }

    #[test]
    fn first_suffix_match_wins() {
        let a = EntityRecord {
            entity_id: "sensor.one_phase".into(),
            unique_id: "one_phase".into(),
            device_id: Some("d".into()),
        };
        let b = EntityRecord {
            entity_id: "sensor.two_phase".into(),
            unique_id: "two_phase".into(),
            device_id: Some("d".into()),
        };
        let refs = resolve_refs(&[&a, &b]);
        assert_eq!(refs.phase.as_deref(), Some("sensor.one_phase"));
    }

    #[test]
    fn pump_entity_falls_back_to_option() {
        let mut view = DeviceView {
            id: "d".into(),
            name: "T".into(),
            entry_id: None,
            options: [("pump_entity".to_string(), json!("switch.ext_pump"))].into(),
            refs: EntityRefs::default(),
        };
        assert_eq!(view.pump_entity(), Some("switch.ext_pump"));

        view.refs.pump = Some("switch.builtin".into());
        assert_eq!(view.pump_entity(), Some("switch.builtin"));
    }
}
