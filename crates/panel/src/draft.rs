//! Unsaved operator edits, keyed by config-entry id then option key.
//!
//! A draft value is always more recent than the persisted option it
//! shadows, so reads that need the current effective value consult the
//! draft first. Drafts live only in memory and die with the process.

use serde_json::Value;
use std::collections::HashMap;

use crate::devices::DeviceView;

#[derive(Debug, Default)]
pub struct DraftStore {
    entries: HashMap<String, HashMap<String, Value>>,
}

impl DraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending edit. An explicitly cleared field is written as
    /// the empty-string sentinel, never deleted — "user cleared this" and
    /// "user never touched this" must stay distinguishable.
    pub fn set(&mut self, entry_id: &str, key: &str, value: Value) {
        self.entries
            .entry(entry_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn get(&self, entry_id: &str, key: &str) -> Option<&Value> {
        self.entries.get(entry_id).and_then(|e| e.get(key))
    }

    /// Whole pending map for one entry, if any field was ever edited.
    pub fn entry(&self, entry_id: &str) -> Option<&HashMap<String, Value>> {
        self.entries.get(entry_id)
    }

    pub fn has_edit(&self, entry_id: &str, key: &str) -> bool {
        self.get(entry_id, key).is_some()
    }

    /// Drop the entire per-entry draft in one step (successful save).
    pub fn clear(&mut self, entry_id: &str) {
        self.entries.remove(entry_id);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current effective value for a device field: draft if present, else
    /// the persisted option. The caller supplies its own default when both
    /// are absent.
    pub fn effective<'a>(&'a self, device: &'a DeviceView, key: &str) -> Option<&'a Value> {
        if let Some(entry_id) = device.entry_id.as_deref() {
            if let Some(v) = self.get(entry_id, key) {
                return Some(v);
            }
        }
        device.options.get(key)
    }

    /// Effective value rendered as the string a form field holds.
    pub fn effective_text(&self, device: &DeviceView, key: &str) -> String {
        match self.effective(device, key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
