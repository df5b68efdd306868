//! Tab dispatch, the rendered-content model and the mounted edit forms.
//!
//! Rendered content is a serde tree the visual layer consumes verbatim.
//! Edit tabs are different from read-only tabs: their widgets are
//! *mounted* — held in panel state with stable instance ids — so a
//! refresh signal can update live-value bindings without recreating
//! them. Recreating a widget (a new instance id) is exactly the
//! destructive re-render the suppression rule forbids.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::devices::DeviceView;
use crate::draft::DraftStore;
use crate::logbook::{self, EventKind};
use crate::panel::{phase_change_prompt, LogCache, PanelState};
use crate::schedule::{self, Band};

// ---------------------------------------------------------------------------
// Tabs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    Overview,
    Settings,
    Phases,
    Log,
    Info,
}

impl Tab {
    /// Editing tabs hold uncommitted operator input and are protected by
    /// the destructive-re-render suppression rule.
    pub fn is_editing(self) -> bool {
        matches!(self, Tab::Settings | Tab::Phases)
    }
}

// ---------------------------------------------------------------------------
// Content model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Content {
    DeviceGrid { cards: Vec<DeviceCard> },
    Form { scope: Tab, sections: Vec<FormSection> },
    Log(LogContent),
    Info { sections: Vec<InfoSection> },
    Notice { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceCard {
    pub device_id: String,
    pub name: String,
    pub online: bool,
    pub phase: String,
    pub phase_options: Vec<PhaseOption>,
    pub days_in_phase: i64,
    pub light: LightStatus,
    pub fan_on: bool,
    pub pump_on: bool,
    pub gauges: Vec<Gauge>,
    pub image_url: String,
    pub live_camera: bool,
    pub master_entity: Option<String>,
    pub pump_entity: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseOption {
    pub id: String,
    pub label: String,
    /// Shown by the view layer before committing a phase change.
    pub confirm_prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LightStatus {
    pub is_on: bool,
    pub is_scheduled_on: bool,
    pub status: String,
    pub schedule: String,
    pub countdown_minutes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Gauge {
    pub label: String,
    pub unit: &'static str,
    pub value: Option<f64>,
    pub percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Band>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_percent: Option<Band>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogContent {
    pub entries: Vec<LogEntry>,
    pub devices: Vec<LogDeviceOption>,
    pub active_device: Option<String>,
    pub active_kind: Option<EventKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub when: DateTime<Utc>,
    pub entity_id: String,
    pub name: String,
    pub kind: Option<EventKind>,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogDeviceOption {
    pub device_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoSection {
    pub title: String,
    pub lines: Vec<String>,
}

// ---------------------------------------------------------------------------
// Mounted forms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "control", rename_all = "snake_case")]
pub enum Control {
    /// Plain input: its live value always wins over the draft on save.
    Input { input_type: &'static str },
    /// Entity picker: remounting can reset its internal value, so the
    /// draft stays authoritative once the operator touched the field.
    Picker { domains: &'static [&'static str] },
}

#[derive(Debug, Clone, Serialize)]
pub struct Widget {
    /// Instance identity. Stable across refresh signals while the form
    /// stays mounted; a fresh mount allocates fresh ids.
    pub id: u64,
    pub entry_id: String,
    pub key: String,
    pub label: String,
    #[serde(flatten)]
    pub control: Control,
    /// Current widget value (what the operator sees in the field).
    pub value: String,
    /// Live-state binding: the host's current state for the referenced
    /// entity. The only part of a mounted widget a refresh signal updates.
    pub live: Option<String>,
}

impl Widget {
    fn is_picker(&self) -> bool {
        matches!(self.control, Control::Picker { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldGroup {
    pub title: String,
    pub widgets: Vec<Widget>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FormSection {
    pub entry_id: String,
    pub device_id: String,
    pub title: String,
    pub groups: Vec<FieldGroup>,
}

/// The edit form currently held in panel state.
#[derive(Debug, Clone)]
pub struct MountedForm {
    pub scope: Tab,
    pub sections: Vec<FormSection>,
}

impl MountedForm {
    pub fn widgets(&self) -> impl Iterator<Item = &Widget> {
        self.sections
            .iter()
            .flat_map(|s| s.groups.iter())
            .flat_map(|g| g.widgets.iter())
    }

    fn widgets_mut(&mut self) -> impl Iterator<Item = &mut Widget> {
        self.sections
            .iter_mut()
            .flat_map(|s| s.groups.iter_mut())
            .flat_map(|g| g.widgets.iter_mut())
    }

    /// Propagate an operator edit into the mounted widget.
    pub fn set_value(&mut self, entry_id: &str, key: &str, value: &str, states: &HashMap<String, String>) {
        for w in self.widgets_mut() {
            if w.entry_id == entry_id && w.key == key {
                w.value = value.to_string();
                if w.is_picker() {
                    w.live = states.get(value).cloned();
                }
            }
        }
    }

    /// Non-destructive live-value propagation: update bindings on the
    /// already-mounted widgets, leaving identity and values alone.
    pub fn refresh_live(&mut self, states: &HashMap<String, String>) {
        for w in self.widgets_mut() {
            if w.is_picker() && !w.value.is_empty() {
                w.live = states.get(&w.value).cloned();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Form field tables
// ---------------------------------------------------------------------------

struct FieldSpec {
    key: &'static str,
    label: &'static str,
    control: Control,
}

const SENSOR_DOMAINS: &[&str] = &["sensor"];
const SWITCHABLE_DOMAINS: &[&str] = &["switch", "light", "input_boolean"];
const FAN_DOMAINS: &[&str] = &["switch", "fan", "input_boolean"];
const PUMP_DOMAINS: &[&str] = &["switch", "input_boolean"];
const CAMERA_DOMAINS: &[&str] = &["camera"];

fn settings_groups() -> [(&'static str, Vec<FieldSpec>); 3] {
    [
        (
            "Climate & Sensors",
            vec![
                FieldSpec { key: "temp_sensor", label: "Temperature sensor", control: Control::Picker { domains: SENSOR_DOMAINS } },
                FieldSpec { key: "humidity_sensor", label: "Humidity sensor", control: Control::Picker { domains: SENSOR_DOMAINS } },
                FieldSpec { key: "fan_entity", label: "Exhaust fan", control: Control::Picker { domains: FAN_DOMAINS } },
                FieldSpec { key: "target_temp", label: "Target temperature (°C)", control: Control::Input { input_type: "number" } },
                FieldSpec { key: "max_humidity", label: "Max humidity (%)", control: Control::Input { input_type: "number" } },
            ],
        ),
        (
            "Water & Light",
            vec![
                FieldSpec { key: "light_entity", label: "Light source", control: Control::Picker { domains: SWITCHABLE_DOMAINS } },
                FieldSpec { key: "light_start_hour", label: "Light start (hour)", control: Control::Input { input_type: "number" } },
                FieldSpec { key: "pump_entity", label: "Water pump", control: Control::Picker { domains: PUMP_DOMAINS } },
                FieldSpec { key: "moisture_sensor", label: "Soil moisture sensor", control: Control::Picker { domains: SENSOR_DOMAINS } },
                FieldSpec { key: "target_moisture", label: "Target soil moisture (%)", control: Control::Input { input_type: "number" } },
                FieldSpec { key: "pump_duration", label: "Pump duration (s)", control: Control::Input { input_type: "number" } },
            ],
        ),
        (
            "Advanced",
            vec![
                FieldSpec { key: "camera_entity", label: "Camera", control: Control::Picker { domains: CAMERA_DOMAINS } },
                FieldSpec { key: "phase_start_date", label: "Phase start date", control: Control::Input { input_type: "date" } },
            ],
        ),
    ]
}

// ---------------------------------------------------------------------------
// Mounting
// ---------------------------------------------------------------------------

/// Build a fresh edit form for `tab`, allocating widget ids from `seq`.
/// Devices without a config entry get no form section: without an entry id
/// there is nowhere to draft or save to.
pub fn mount(
    tab: Tab,
    devices: &[DeviceView],
    drafts: &DraftStore,
    states: &HashMap<String, String>,
    mut seq: u64,
) -> (MountedForm, u64) {
    let mut sections = Vec::new();

    for device in devices {
        let Some(entry_id) = device.entry_id.clone() else {
            continue;
        };

        let groups = match tab {
            Tab::Phases => vec![phase_group(device, &entry_id, drafts, &mut seq)],
            _ => settings_groups()
                .into_iter()
                .map(|(title, fields)| FieldGroup {
                    title: title.to_string(),
                    widgets: fields
                        .into_iter()
                        .map(|f| mount_widget(device, &entry_id, f, drafts, states, &mut seq))
                        .collect(),
                })
                .collect(),
        };

        sections.push(FormSection {
            entry_id,
            device_id: device.id.clone(),
            title: match tab {
                Tab::Phases => format!("{} — Phase management", device.name),
                _ => format!("{} — Configuration", device.name),
            },
            groups,
        });
    }

    (MountedForm { scope: tab, sections }, seq)
}

fn mount_widget(
    device: &DeviceView,
    entry_id: &str,
    spec: FieldSpec,
    drafts: &DraftStore,
    states: &HashMap<String, String>,
    seq: &mut u64,
) -> Widget {
    *seq += 1;
    let value = drafts.effective_text(device, spec.key);
    let live = match spec.control {
        Control::Picker { .. } if !value.is_empty() => states.get(&value).cloned(),
        _ => None,
    };
    Widget {
        id: *seq,
        entry_id: entry_id.to_string(),
        key: spec.key.to_string(),
        label: spec.label.to_string(),
        control: spec.control,
        value,
        live,
    }
}

fn phase_group(device: &DeviceView, entry_id: &str, drafts: &DraftStore, seq: &mut u64) -> FieldGroup {
    let widgets = schedule::PHASES
        .iter()
        .map(|phase| {
            *seq += 1;
            let key = format!("{phase}_hours");
            let mut value = drafts.effective_text(device, &key);
            if value.is_empty() {
                value = schedule::light_hours(&device.options, phase).to_string();
            }
            Widget {
                id: *seq,
                entry_id: entry_id.to_string(),
                key,
                label: format!("{} (daily light hours)", schedule::phase_label(phase)),
                control: Control::Input { input_type: "number" },
                value,
                live: None,
            }
        })
        .collect();

    FieldGroup { title: "Daily light hours per phase".to_string(), widgets }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render the active tab. The single dispatch point for all content.
pub fn render(state: &PanelState, now: NaiveDateTime) -> Content {
    match state.selection.tab {
        Tab::Overview => render_overview(&state.devices, &state.states, now),
        Tab::Settings | Tab::Phases => match &state.mounted {
            Some(form) => form_content(form),
            None => Content::Notice { message: "No configurable devices found.".to_string() },
        },
        Tab::Log => render_log(state),
        Tab::Info => render_info(),
    }
}

pub fn form_content(form: &MountedForm) -> Content {
    Content::Form { scope: form.scope, sections: form.sections.clone() }
}

fn state_of<'a>(states: &'a HashMap<String, String>, entity: Option<&str>) -> Option<&'a str> {
    entity.and_then(|e| states.get(e)).map(String::as_str)
}

fn state_is_on(states: &HashMap<String, String>, entity: Option<&str>) -> bool {
    state_of(states, entity) == Some("on")
}

/// Numeric reading of an entity. Absent entities and non-numeric states
/// (including `unavailable`/`unknown`) are "no data", never zero.
fn state_number(states: &HashMap<String, String>, entity: Option<&str>) -> Option<f64> {
    state_of(states, entity).and_then(|s| s.parse().ok())
}

fn render_overview(devices: &[DeviceView], states: &HashMap<String, String>, now: NaiveDateTime) -> Content {
    if devices.is_empty() {
        return Content::Notice {
            message: "No growing chambers found. Add a device first.".to_string(),
        };
    }
    let cards = devices.iter().map(|d| device_card(d, states, now)).collect();
    Content::DeviceGrid { cards }
}

fn device_card(device: &DeviceView, states: &HashMap<String, String>, now: NaiveDateTime) -> DeviceCard {
    let phase = schedule::effective_phase(&device.options, state_of(states, device.refs.phase.as_deref()));

    let light_on = state_is_on(states, device.option_entity("light_entity"));
    let window = schedule::light_window(&device.options, &phase, light_on, now);

    let days_in_phase = state_of(states, device.refs.days.as_deref())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    let vpd_band = schedule::vpd_target(&phase);
    let gauges = build_gauges(device, states, vpd_band);

    let image_version = schedule::opt_number(&device.options, "image_version").unwrap_or(0.0) as i64;
    let camera = device.option_entity("camera_entity");
    let live_camera = matches!(camera, Some(c) if states.contains_key(c));
    let image_url = match (live_camera, camera) {
        (true, Some(c)) => format!("/camera/{c}"),
        _ => format!("/images/{}.jpg?v={image_version}", device.id),
    };

    DeviceCard {
        device_id: device.id.clone(),
        name: device.name.clone(),
        online: state_is_on(states, device.refs.master.as_deref()),
        phase_options: schedule::PHASES
            .iter()
            .map(|p| PhaseOption {
                id: p.to_string(),
                label: schedule::phase_label(p).to_string(),
                confirm_prompt: phase_change_prompt(&device.name, schedule::phase_label(p)),
            })
            .collect(),
        phase,
        days_in_phase,
        light: LightStatus {
            is_on: window.is_on,
            is_scheduled_on: window.is_scheduled_on,
            status: window.status,
            schedule: window.boundary_label,
            countdown_minutes: window.remaining_or_until.num_minutes(),
        },
        fan_on: state_is_on(states, device.option_entity("fan_entity")),
        pump_on: state_is_on(states, device.pump_entity()),
        gauges,
        image_url,
        live_camera,
        master_entity: device.refs.master.clone(),
        pump_entity: device.pump_entity().map(String::from),
    }
}

fn build_gauges(device: &DeviceView, states: &HashMap<String, String>, vpd_band: Option<Band>) -> Vec<Gauge> {
    let mut gauges = vec![
        gauge("Temperature", "°C", state_number(states, device.option_entity("temp_sensor")), 10.0, 45.0, None),
        gauge("Humidity", "%", state_number(states, device.option_entity("humidity_sensor")), 30.0, 80.0, None),
        gauge("VPD", "kPa", state_number(states, device.refs.vpd.as_deref()), 0.0, 3.0, vpd_band),
    ];
    if device.option_entity("moisture_sensor").is_some() {
        gauges.push(gauge(
            "Soil moisture",
            "%",
            state_number(states, device.option_entity("moisture_sensor")),
            0.0,
            100.0,
            None,
        ));
    }
    gauges
}

fn gauge(label: &str, unit: &'static str, value: Option<f64>, min: f64, max: f64, target: Option<Band>) -> Gauge {
    let target_percent = target.map(|band| Band {
        min: schedule::gauge_percent(Some(band.min), min, max).unwrap_or(0.0),
        max: schedule::gauge_percent(Some(band.max), min, max).unwrap_or(0.0),
    });
    Gauge {
        label: label.to_string(),
        unit,
        value,
        percent: schedule::gauge_percent(value, min, max),
        target,
        target_percent,
    }
}

fn render_log(state: &PanelState) -> Content {
    let devices = state
        .devices
        .iter()
        .map(|d| LogDeviceOption { device_id: d.id.clone(), name: d.name.clone() })
        .collect();

    let (entries, error) = match &state.log {
        LogCache::Empty => (Vec::new(), None),
        LogCache::Failed(message) => (Vec::new(), Some(message.clone())),
        LogCache::Loaded { events, tracked } => {
            let filtered = logbook::apply_filters(
                events,
                tracked,
                state.selection.log_device.as_deref(),
                state.selection.log_kind,
            );
            let entries = filtered
                .into_iter()
                .map(|ev| LogEntry {
                    when: ev.when,
                    entity_id: ev.entity_id.clone(),
                    name: ev.name.clone().unwrap_or_else(|| ev.entity_id.clone()),
                    kind: logbook::classify(&ev.entity_id, &ev.domain),
                    detail: ev
                        .message
                        .clone()
                        .unwrap_or_else(|| format!("State: {}", ev.state)),
                })
                .collect();
            (entries, None)
        }
    };

    Content::Log(LogContent {
        entries,
        devices,
        active_device: state.selection.log_device.clone(),
        active_kind: state.selection.log_kind,
        error,
    })
}

fn render_info() -> Content {
    let vpd_lines = schedule::PHASES
        .iter()
        .map(|p| {
            // Every recognized phase has a band.
            let band = schedule::vpd_target(p).unwrap_or(Band { min: 0.0, max: 0.0 });
            format!("{}: {:.1} - {:.1} kPa", schedule::phase_label(p), band.min, band.max)
        })
        .collect();

    Content::Info {
        sections: vec![
            InfoSection {
                title: "VPD target bands".to_string(),
                lines: vpd_lines,
            },
            InfoSection {
                title: "Controls".to_string(),
                lines: vec![
                    "Master: main switch for the automation. Off pauses all control.".to_string(),
                    "Pump: manual watering; the pump stops after the configured duration.".to_string(),
                    "Image: upload a current photo of the chamber.".to_string(),
                ],
            },
            InfoSection {
                title: "Light schedule".to_string(),
                lines: vec![
                    "The light window opens at the configured start hour.".to_string(),
                    "Window length follows the daily hours of the active phase.".to_string(),
                ],
            },
        ],
    }
}

// ===========================================================================
// Tests
// ===========================================================================
