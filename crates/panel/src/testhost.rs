//! In-memory [`HostApi`] double with programmable failures, shared by the
//! module tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::host::{ConfigEntry, DeviceRecord, EntityRecord, HostApi, HostError, LogbookEvent, Result};
use crate::schedule::OptionMap;

#[derive(Default)]
pub struct FakeHost {
    devices: Mutex<Vec<DeviceRecord>>,
    entities: Mutex<Vec<EntityRecord>>,
    entries: Mutex<Vec<ConfigEntry>>,
    configs: Mutex<HashMap<String, OptionMap>>,
    events: Mutex<Vec<LogbookEvent>>,

    fail_registries: AtomicBool,
    fail_updates: AtomicBool,
    fail_events: AtomicBool,
    failing_configs: Mutex<HashSet<String>>,

    device_list_calls: AtomicUsize,
    update_calls: Mutex<Vec<(String, OptionMap)>>,
    toggled: Mutex<Vec<String>>,
    upload_version: AtomicI64,
}

impl FakeHost {
    pub fn new() -> Self {
        let host = Self::default();
        host.upload_version.store(1, Ordering::SeqCst);
        host
    }

    /// One grow device "Tent A" with all five entity references and a
    /// populated option map — the standard fixture.
    pub fn with_one_device() -> Self {
        let host = Self::new();
        host.add_grow_device("dev1", "Tent A", Some("entry1"));
        host.configs.lock().unwrap().insert(
            "entry1".to_string(),
            [
                ("light_start_hour".to_string(), json!(18)),
                ("current_phase".to_string(), json!("vegetative")),
                ("light_entity".to_string(), json!("light.tent_a")),
                ("temp_sensor".to_string(), json!("sensor.tent_a_temp")),
                ("humidity_sensor".to_string(), json!("sensor.tent_a_hum")),
                ("fan_entity".to_string(), json!("switch.tent_a_fan")),
            ]
            .into(),
        );
        for (entity_id, unique_id) in [
            ("sensor.tent_a_phase", "tent_a_phase"),
            ("switch.tent_a_master", "tent_a_master_switch"),
            ("sensor.tent_a_vpd", "tent_a_vpd"),
            ("switch.tent_a_pump", "tent_a_water_pump"),
            ("sensor.tent_a_days", "tent_a_days_in_phase"),
        ] {
            host.entities.lock().unwrap().push(EntityRecord {
                entity_id: entity_id.to_string(),
                unique_id: unique_id.to_string(),
                device_id: Some("dev1".to_string()),
            });
        }
        host
    }

    pub fn add_device(&self, id: &str, name: &str, entry: Option<&str>, domain: &str) {
        self.devices.lock().unwrap().push(DeviceRecord {
            id: id.to_string(),
            name: name.to_string(),
            name_by_user: None,
            identifiers: vec![vec![domain.to_string(), id.to_string()]],
            primary_config_entry: entry.map(String::from),
        });
    }

    /// Add a grow-domain device; a config entry gets a minimal option map
    /// so the secondary fetch returns something.
    pub fn add_grow_device(&self, id: &str, name: &str, entry: Option<&str>) {
        self.add_device(id, name, entry, crate::devices::DOMAIN);
        if let Some(entry_id) = entry {
            self.entries.lock().unwrap().push(ConfigEntry {
                entry_id: entry_id.to_string(),
                title: name.to_string(),
            });
            self.configs
                .lock()
                .unwrap()
                .entry(entry_id.to_string())
                .or_insert_with(|| [("light_start_hour".to_string(), json!(18))].into());
        }
    }

    pub fn add_event(&self, entity_id: &str, domain: &str, state: &str) {
        self.events.lock().unwrap().push(LogbookEvent {
            entity_id: entity_id.to_string(),
            domain: domain.to_string(),
            state: state.to_string(),
            message: None,
            when: Utc::now(),
            name: None,
        });
    }

    pub fn fail_registries(&self, fail: bool) {
        self.fail_registries.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_events(&self, fail: bool) {
        self.fail_events.store(fail, Ordering::SeqCst);
    }

    pub fn fail_get_config(&self, entry_id: &str) {
        self.failing_configs.lock().unwrap().insert(entry_id.to_string());
    }

    pub fn set_upload_version(&self, version: i64) {
        self.upload_version.store(version, Ordering::SeqCst);
    }

    pub fn device_list_calls(&self) -> usize {
        self.device_list_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> Vec<(String, OptionMap)> {
        self.update_calls.lock().unwrap().clone()
    }

    pub fn toggles(&self) -> Vec<String> {
        self.toggled.lock().unwrap().clone()
    }

    fn check_registries(&self) -> Result<()> {
        if self.fail_registries.load(Ordering::SeqCst) {
            return Err(HostError::Transport("simulated registry outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl HostApi for FakeHost {
    async fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        self.check_registries()?;
        self.device_list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn list_entities(&self) -> Result<Vec<EntityRecord>> {
        self.check_registries()?;
        Ok(self.entities.lock().unwrap().clone())
    }

    async fn list_config_entries(&self, _domain: &str) -> Result<Vec<ConfigEntry>> {
        self.check_registries()?;
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn get_config(&self, entry_id: &str) -> Result<OptionMap> {
        if self.failing_configs.lock().unwrap().contains(entry_id) {
            return Err(HostError::Rejected(format!("config unavailable for {entry_id}")));
        }
        self.configs
            .lock()
            .unwrap()
            .get(entry_id)
            .cloned()
            .ok_or_else(|| HostError::NotFound(entry_id.to_string()))
    }

    async fn update_config(&self, entry_id: &str, patch: OptionMap) -> Result<OptionMap> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(HostError::Transport("simulated network error".into()));
        }
        self.update_calls.lock().unwrap().push((entry_id.to_string(), patch.clone()));

        let mut configs = self.configs.lock().unwrap();
        let stored = configs.entry(entry_id.to_string()).or_default();
        for (k, v) in &patch {
            stored.insert(k.clone(), v.clone());
        }
        // Respond with only the changed keys, post-merge.
        Ok(patch)
    }

    async fn upload_image(&self, _device_id: &str, entry_id: &str, _image: Vec<u8>) -> Result<i64> {
        let version = self.upload_version.load(Ordering::SeqCst);
        let mut configs = self.configs.lock().unwrap();
        if let Some(stored) = configs.get_mut(entry_id) {
            stored.insert("image_version".to_string(), json!(version));
        }
        Ok(version)
    }

    async fn get_events(
        &self,
        start: DateTime<Utc>,
        entity_ids: &[String],
    ) -> Result<Vec<LogbookEvent>> {
        if self.fail_events.load(Ordering::SeqCst) {
            return Err(HostError::Transport("simulated logbook outage".into()));
        }
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.when >= start && entity_ids.contains(&e.entity_id))
            .cloned()
            .collect())
    }

    async fn toggle(&self, entity_id: &str) -> Result<()> {
        self.toggled.lock().unwrap().push(entity_id.to_string());
        Ok(())
    }
}
