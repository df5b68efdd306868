//! Light-schedule and climate-target math for the device cards.
//!
//! Everything here is a pure function of a device's option map plus an
//! injected wall-clock instant, so derived status is recomputed on every
//! render pass and never cached between refresh signals.

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Flat, schema-less persisted option map of one device.
pub type OptionMap = HashMap<String, Value>;

// ---------------------------------------------------------------------------
// Phase tables
// ---------------------------------------------------------------------------

/// Recognized grow phases, in lifecycle order.
pub const PHASES: [&str; 5] = ["seedling", "vegetative", "flowering", "drying", "curing"];

/// Default daily light hours per recognized phase.
const PHASE_LIGHT_HOURS: [(&str, f64); 5] = [
    ("seedling", 18.0),
    ("vegetative", 18.0),
    ("flowering", 12.0),
    ("drying", 0.0),
    ("curing", 0.0),
];

/// Light hours applied when the phase string is not recognized.
const FALLBACK_LIGHT_HOURS: f64 = 12.0;

/// Hour of day (local) the light window opens when not configured.
pub const DEFAULT_LIGHT_START_HOUR: u32 = 18;

/// Phase the panel assumes when neither options nor live state name one.
pub const DEFAULT_PHASE: &str = "vegetative";

pub fn phase_label(phase: &str) -> &str {
    match phase {
        "seedling" => "Seedling",
        "vegetative" => "Vegetative",
        "flowering" => "Flowering",
        "drying" => "Drying",
        "curing" => "Curing",
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Option coercion
// ---------------------------------------------------------------------------

/// Read an option as a number. Options arrive as JSON numbers or as the
/// strings an input field produced; empty strings and unparseable values
/// count as absent.
pub fn opt_number(options: &OptionMap, key: &str) -> Option<f64> {
    match options.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read an option as a non-empty string.
pub fn opt_str<'a>(options: &'a OptionMap, key: &str) -> Option<&'a str> {
    match options.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Phase resolution
// ---------------------------------------------------------------------------

/// Effective phase of a device: the persisted `current_phase` option wins
/// over the live phase-entity state (which can lag a just-saved change),
/// and an untouched device defaults to vegetative.
pub fn effective_phase(options: &OptionMap, live_phase: Option<&str>) -> String {
    if let Some(p) = opt_str(options, "current_phase") {
        return p.to_string();
    }
    match live_phase {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => DEFAULT_PHASE.to_string(),
    }
}

/// Daily light hours for a phase: per-phase override option
/// (`"<phase>_hours"`), then the built-in table, then the fallback.
pub fn light_hours(options: &OptionMap, phase: &str) -> f64 {
    if let Some(v) = opt_number(options, &format!("{phase}_hours")) {
        return v.max(0.0);
    }
    PHASE_LIGHT_HOURS
        .iter()
        .find(|(p, _)| *p == phase)
        .map(|(_, h)| *h)
        .unwrap_or(FALLBACK_LIGHT_HOURS)
}

/// Configured start hour of the light window, clamped to a valid
/// hour-of-day. Out-of-range or unparseable values fall back to the
/// default rather than producing a nonsense window.
pub fn light_start_hour(options: &OptionMap) -> u32 {
    match opt_number(options, "light_start_hour") {
        Some(v) if (0.0..=23.0).contains(&v) => v as u32,
        _ => DEFAULT_LIGHT_START_HOUR,
    }
}

// ---------------------------------------------------------------------------
// Light window
// ---------------------------------------------------------------------------

/// Computed light-schedule status of one device at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct LightWindow {
    /// Actual relay state.
    pub is_on: bool,
    /// Whether `now` falls inside the scheduled window.
    pub is_scheduled_on: bool,
    /// Window boundaries as "18:00 - 12:00".
    pub boundary_label: String,
    /// Time to end-of-window when inside, to next start when outside.
    pub remaining_or_until: Duration,
    /// Operator-facing status line for the card.
    pub status: String,
}

/// Compute the light window for a device.
///
/// The window is `[start_hour, start_hour + duration)` on the local clock.
/// When `now` is before the start hour, the window that matters opened
/// yesterday and may still be running through midnight, so the start is
/// shifted back one day before membership is tested.
pub fn light_window(options: &OptionMap, phase: &str, actual_on: bool, now: NaiveDateTime) -> LightWindow {
    let start_hour = light_start_hour(options);
    let duration_hours = light_hours(options, phase);

    let mut start = now.date().and_time(NaiveTime::MIN) + Duration::hours(i64::from(start_hour));
    if now.hour() < start_hour {
        start -= Duration::days(1);
    }
    let duration = Duration::milliseconds((duration_hours * 3_600_000.0) as i64);
    let end = start + duration;

    let is_scheduled_on = now >= start && now < end;
    let remaining_or_until = if is_scheduled_on {
        end - now
    } else {
        start + Duration::days(1) - now
    };

    let (h, m) = hours_minutes(remaining_or_until);
    let status = match (is_scheduled_on, actual_on) {
        (true, true) => format!("On ({h}h {m}m remaining)"),
        (true, false) => "Off (should be ON)".to_string(),
        (false, true) => "On (should be OFF)".to_string(),
        (false, false) => format!("Off (starts in {h}h {m}m)"),
    };

    LightWindow {
        is_on: actual_on,
        is_scheduled_on,
        boundary_label: boundary_label(start_hour, duration_hours),
        remaining_or_until,
        status,
    }
}

fn boundary_label(start_hour: u32, duration_hours: f64) -> String {
    let end_total = f64::from(start_hour) + duration_hours;
    let end_h = (end_total.floor() as i64).rem_euclid(24);
    let end_m = (end_total.fract() * 60.0).floor() as i64;
    format!("{start_hour}:00 - {end_h}:{end_m:02}")
}

fn hours_minutes(d: Duration) -> (i64, i64) {
    let mins = d.num_minutes().max(0);
    (mins / 60, mins % 60)
}

// ---------------------------------------------------------------------------
// VPD target bands
// ---------------------------------------------------------------------------

/// Closed numeric range, used for VPD targets and gauge overlays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

/// Target vapor-pressure-deficit band for a phase, in kPa. Unrecognized
/// phases have no target.
pub fn vpd_target(phase: &str) -> Option<Band> {
    let (min, max) = match phase {
        "seedling" => (0.4, 0.8),
        "vegetative" => (0.8, 1.2),
        "flowering" => (1.2, 1.6),
        "drying" => (0.8, 1.0),
        "curing" => (0.5, 0.7),
        _ => return None,
    };
    Some(Band { min, max })
}

// ---------------------------------------------------------------------------
// Gauges
// ---------------------------------------------------------------------------

/// Map a raw value into a 0..=100 bar percentage for the domain
/// `[min, max]`, clamped at both ends. An absent value stays absent —
/// "no data" must never render as zero.
pub fn gauge_percent(value: Option<f64>, min: f64, max: f64) -> Option<f64> {
    let range = max - min;
    if range <= 0.0 {
        return None; // degenerate domain
    }
    value.map(|v| ((v - min) / range * 100.0).clamp(0.0, 100.0))
}

// ===========================================================================
// Tests
// ===========================================================================
