//! Reconciliation controller and panel-wide state.
//!
//! All panel state lives in one [`PanelState`] behind a shared lock;
//! every mutation path goes through the [`Panel`] controller, which
//! decides per stimulus whether to do nothing, refresh live-value
//! bindings on the mounted form, or rebuild the displayed content.
//!
//! ## Refresh decisions
//!
//! ```text
//!                      ┌─[not initialized]──▶ bootstrap fetch (once, lazy)
//! refresh signal ──────┤
//!                      ├─[editing tab]──────▶ live-binding refresh only
//!                      └─[read-only tab]────▶ full content rebuild
//! ```
//!
//! Explicit operator actions (tab switch, refresh request, save, phase
//! change, upload) are allowed to rebuild destructively — the operator
//! caused them, so there is no focus to lose.

use chrono::{Duration, Local, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::devices::{self, DeviceView, DOMAIN};
use crate::draft::DraftStore;
use crate::host::{HostApi, HostError, LogbookEvent};
use crate::logbook::{self, EventKind};
use crate::render::{self, Content, Control, MountedForm, Tab};
use crate::schedule::OptionMap;

/// Delay before the post-upload reconciliation fetch.
const UPLOAD_REFRESH_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

pub type SharedPanel = Arc<RwLock<PanelState>>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("device has no configuration entry: {0}")]
    NoEntry(String),

    #[error("unknown phase: {0}")]
    UnknownPhase(String),

    #[error("no edit form is mounted")]
    NoForm,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Active tab plus the log view's client-side filters. Changing any of
/// these never touches the draft store.
#[derive(Debug, Clone)]
pub struct Selection {
    pub tab: Tab,
    pub log_device: Option<String>,
    pub log_kind: Option<EventKind>,
}

/// Cached logbook query result. Refresh signals re-render from this
/// cache; the host is queried again only on tab entry and explicit
/// refresh.
#[derive(Debug)]
pub enum LogCache {
    Empty,
    Loaded {
        events: Vec<LogbookEvent>,
        /// entity_id -> owning device id, for the device filter.
        tracked: HashMap<String, String>,
    },
    Failed(String),
}

pub struct PanelState {
    /// Set by the first refresh signal; the bootstrap fetch runs exactly
    /// once unless it fails.
    pub initialized: bool,
    pub devices: Vec<DeviceView>,
    /// Current value of every entity the push subscription has reported.
    pub states: HashMap<String, String>,
    pub drafts: DraftStore,
    pub selection: Selection,
    /// Edit form for the active editing tab, if any. Holds widget
    /// identity across refresh signals.
    pub mounted: Option<MountedForm>,
    /// Last rebuilt content for read-only tabs.
    pub content: Content,
    /// One-shot confirmation shown after a successful save.
    pub toast: Option<String>,
    pub log: LogCache,
    widget_seq: u64,
    fetch_seq: u64,
    committed_seq: u64,
}

impl PanelState {
    fn new() -> Self {
        Self {
            initialized: false,
            devices: Vec::new(),
            states: HashMap::new(),
            drafts: DraftStore::new(),
            selection: Selection { tab: Tab::Overview, log_device: None, log_kind: None },
            mounted: None,
            content: Content::Notice { message: "Waiting for the first state signal.".to_string() },
            toast: None,
            log: LogCache::Empty,
            widget_seq: 0,
            fetch_seq: 0,
            committed_seq: 0,
        }
    }

    /// Mount a fresh edit form for the active tab, or drop the form when
    /// a read-only tab is active. Discards widget identity, so only
    /// explicit-action paths may call this.
    fn remount(&mut self) {
        if self.selection.tab.is_editing() {
            let (form, next) = render::mount(
                self.selection.tab,
                &self.devices,
                &self.drafts,
                &self.states,
                self.widget_seq,
            );
            self.widget_seq = next;
            self.mounted = Some(form);
        } else {
            self.mounted = None;
        }
    }

    fn rebuild_content(&mut self, now: NaiveDateTime) {
        let content = render::render(self, now);
        self.content = content;
    }

    /// Content served to the view layer. Editing tabs mirror the mounted
    /// form directly so typed values are always current.
    pub fn current_content(&self) -> Content {
        if self.selection.tab.is_editing() {
            if let Some(form) = &self.mounted {
                return render::form_content(form);
            }
        }
        self.content.clone()
    }

    #[cfg(test)]
    pub fn force_committed_seq(&mut self, seq: u64) {
        self.committed_seq = seq;
    }
}

/// Snapshot returned to the view layer. The toast is consumed by the
/// read that observes it.
#[derive(Serialize)]
pub struct PanelSnapshot {
    pub tab: Tab,
    pub content: Content,
    pub toast: Option<String>,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Panel {
    host: Arc<dyn HostApi>,
    pub state: SharedPanel,
}

impl Panel {
    pub fn new(host: Arc<dyn HostApi>) -> Self {
        Self { host, state: Arc::new(RwLock::new(PanelState::new())) }
    }

    /// A live-state push arrived. The value lands in the state map; the
    /// signal itself drives the refresh decision.
    pub async fn on_state_push(&self, entity_id: &str, value: &str) {
        {
            let mut st = self.state.write().await;
            st.states.insert(entity_id.to_string(), value.to_string());
        }
        self.refresh_signal().await;
    }

    /// Core refresh decision, run for every external signal.
    pub async fn refresh_signal(&self) {
        let bootstrap = {
            let mut st = self.state.write().await;
            if !st.initialized {
                st.initialized = true;
                true
            } else {
                false
            }
        };

        if bootstrap {
            if let Err(err) = self.full_fetch().await {
                error!(error = %err, "bootstrap fetch failed");
                // Let the next signal retry instead of leaving a dead panel.
                self.state.write().await.initialized = false;
            }
            return;
        }

        let mut st = self.state.write().await;
        if st.selection.tab.is_editing() {
            // Suppression rule: the operator may be typing. Only the
            // live bindings of already-mounted widgets may change.
            let PanelState { mounted, states, .. } = &mut *st;
            if let Some(form) = mounted {
                form.refresh_live(states);
            }
        } else {
            st.rebuild_content(Local::now().naive_local());
        }
    }

    /// Explicit refresh request: re-fetch everything regardless of tab.
    pub async fn force_refresh(&self) -> Result<(), PanelError> {
        self.full_fetch().await?;
        if self.state.read().await.selection.tab == Tab::Log {
            self.fetch_log().await;
            let mut st = self.state.write().await;
            st.rebuild_content(Local::now().naive_local());
        }
        Ok(())
    }

    async fn full_fetch(&self) -> Result<(), PanelError> {
        let seq = {
            let mut st = self.state.write().await;
            st.fetch_seq += 1;
            st.fetch_seq
        };

        let views = devices::fetch_view_models(self.host.as_ref(), DOMAIN).await?;

        let mut st = self.state.write().await;
        if st.committed_seq > seq {
            // A later fetch already committed; this response is stale.
            debug!(seq, committed = st.committed_seq, "stale fetch response dropped");
            return Ok(());
        }
        st.committed_seq = seq;
        debug!(devices = views.len(), "device fetch committed");
        st.devices = views;
        st.remount();
        st.rebuild_content(Local::now().naive_local());
        Ok(())
    }

    /// Switch the active tab. Always rebuilds the new tab's content —
    /// switching is an explicit action — and never touches drafts.
    pub async fn switch_tab(&self, tab: Tab) {
        {
            let mut st = self.state.write().await;
            st.selection.tab = tab;
        }
        if tab == Tab::Log {
            self.fetch_log().await;
        }
        let mut st = self.state.write().await;
        st.remount();
        st.rebuild_content(Local::now().naive_local());
    }

    /// Record an operator edit: draft plus the mounted widget move
    /// together. No re-render — the widget already shows the new value.
    pub async fn set_field(&self, entry_id: &str, key: &str, value: &str) {
        let mut st = self.state.write().await;
        st.drafts.set(entry_id, key, Value::String(value.to_string()));
        let PanelState { mounted, states, .. } = &mut *st;
        if let Some(form) = mounted {
            form.set_value(entry_id, key, value, states);
        }
    }

    /// Commit the visible form for one entry to the host.
    pub async fn save(&self, entry_id: &str) -> Result<(), PanelError> {
        let payload = {
            let st = self.state.read().await;
            let form = st.mounted.as_ref().ok_or(PanelError::NoForm)?;
            merge_save_payload(st.drafts.entry(entry_id), form, entry_id)
        };
        debug!(entry = %entry_id, fields = payload.len(), "saving configuration");

        // A failure here leaves drafts and device state untouched so the
        // edit survives for a retry.
        let returned = self.host.update_config(entry_id, payload).await?;

        let mut st = self.state.write().await;
        if let Some(device) = st.devices.iter_mut().find(|d| d.entry_id.as_deref() == Some(entry_id)) {
            apply_saved_options(device, returned);
        }
        st.drafts.clear(entry_id);
        st.toast = Some("Settings saved".to_string());
        st.remount();
        st.rebuild_content(Local::now().naive_local());
        Ok(())
    }

    /// Immediate-commit phase change. The host recomputes cascaded fields
    /// (day counter, schedule), so a full re-fetch replaces any local
    /// patching; on failure nothing was mutated locally and the rendered
    /// select falls back to the committed phase by itself.
    pub async fn change_phase(&self, device_id: &str, phase: &str) -> Result<(), PanelError> {
        if !crate::schedule::PHASES.contains(&phase) {
            return Err(PanelError::UnknownPhase(phase.to_string()));
        }
        let entry_id = self.entry_of(device_id).await?;

        let mut patch = OptionMap::new();
        patch.insert("current_phase".to_string(), Value::String(phase.to_string()));
        self.host.update_config(&entry_id, patch).await?;

        self.full_fetch().await
    }

    /// Side-channel image write. The returned version token is spliced
    /// into the device's options immediately to cache-bust the displayed
    /// image; a delayed full fetch reconciles any other server-side
    /// effects.
    pub async fn upload_image(&self, device_id: &str, image: Vec<u8>) -> Result<i64, PanelError> {
        let entry_id = self.entry_of(device_id).await?;
        let version = self.host.upload_image(device_id, &entry_id, image).await?;

        {
            let mut st = self.state.write().await;
            if let Some(device) = st.devices.iter_mut().find(|d| d.id == device_id) {
                device.options.insert("image_version".to_string(), Value::from(version));
            }
            st.rebuild_content(Local::now().naive_local());
        }

        let panel = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(UPLOAD_REFRESH_DELAY).await;
            if let Err(err) = panel.full_fetch().await {
                warn!(error = %err, "post-upload refresh failed");
            }
        });
        Ok(version)
    }

    /// Fire-and-forget actuator command.
    pub async fn toggle(&self, entity_id: &str) -> Result<(), PanelError> {
        self.host.toggle(entity_id).await.map_err(Into::into)
    }

    /// Change the log view's client-side filters and re-render from the
    /// cached event list.
    pub async fn set_log_filter(&self, device: Option<String>, kind: Option<EventKind>) {
        let mut st = self.state.write().await;
        st.selection.log_device = device;
        st.selection.log_kind = kind;
        st.rebuild_content(Local::now().naive_local());
    }

    pub async fn snapshot(&self) -> PanelSnapshot {
        let mut st = self.state.write().await;
        PanelSnapshot { tab: st.selection.tab, content: st.current_content(), toast: st.toast.take() }
    }

    async fn fetch_log(&self) {
        let tracked = {
            let st = self.state.read().await;
            logbook::tracked_entities(&st.devices)
        };
        if tracked.is_empty() {
            self.state.write().await.log = LogCache::Loaded { events: Vec::new(), tracked };
            return;
        }

        let ids: Vec<String> = tracked.keys().cloned().collect();
        let start = Utc::now() - Duration::hours(logbook::LOOKBACK_HOURS);
        let result = self.host.get_events(start, &ids).await;

        let mut st = self.state.write().await;
        st.log = match result {
            Ok(events) => LogCache::Loaded { events: logbook::prepare(events), tracked },
            Err(err) => {
                warn!(error = %err, "logbook query failed");
                LogCache::Failed(err.to_string())
            }
        };
    }

    async fn entry_of(&self, device_id: &str) -> Result<String, PanelError> {
        let st = self.state.read().await;
        let device = st
            .devices
            .iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| PanelError::UnknownDevice(device_id.to_string()))?;
        device
            .entry_id
            .clone()
            .ok_or_else(|| PanelError::NoEntry(device_id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Save merge rules
// ---------------------------------------------------------------------------

/// Build the merge-patch for one entry from the draft plus the mounted
/// form. Plain inputs always contribute their live value (the operator
/// may have just typed); pickers contribute only when no draft entry
/// exists, because a remounted picker may have reset itself while the
/// draft still holds the real edit.
pub fn merge_save_payload(
    draft: Option<&HashMap<String, Value>>,
    form: &MountedForm,
    entry_id: &str,
) -> OptionMap {
    let mut updates: OptionMap = draft.cloned().unwrap_or_default();

    for widget in form.widgets().filter(|w| w.entry_id == entry_id) {
        match widget.control {
            Control::Input { .. } => {
                updates.insert(widget.key.clone(), Value::String(widget.value.clone()));
            }
            Control::Picker { .. } => {
                if !updates.contains_key(&widget.key) {
                    updates.insert(widget.key.clone(), Value::String(widget.value.clone()));
                }
            }
        }
    }
    updates
}

/// Apply a save response: patch exactly the returned keys, leaving
/// concurrently-applied fields alone. Never replaces the whole map.
pub fn apply_saved_options(device: &mut DeviceView, returned: OptionMap) {
    for (key, value) in returned {
        device.options.insert(key, value);
    }
}

/// Prompt text shown before committing a phase change.
pub fn phase_change_prompt(device_name: &str, phase_label: &str) -> String {
    format!("Change {device_name} to phase \"{phase_label}\"?")
}

// ===========================================================================
// Tests
// ===========================================================================
