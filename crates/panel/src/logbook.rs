//! Event-log view helpers: tracked-entity collection, noise filtering,
//! ordering and the best-effort event-type classification.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::devices::DeviceView;
use crate::host::LogbookEvent;

/// Fixed history lookback for the log view.
pub const LOOKBACK_HOURS: i64 = 48;

/// Best-effort taxonomy for log filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Light,
    Pump,
    Fan,
    Phase,
}

// ---------------------------------------------------------------------------
// Tracked entities
// ---------------------------------------------------------------------------

/// Entity ids worth querying history for, mapped back to their owning
/// device for the device filter.
pub fn tracked_entities(devices: &[DeviceView]) -> HashMap<String, String> {
    let mut tracked = HashMap::new();
    for d in devices {
        let mut add = |entity: Option<&str>| {
            if let Some(id) = entity {
                tracked.entry(id.to_string()).or_insert_with(|| d.id.clone());
            }
        };
        add(d.option_entity("light_entity"));
        add(d.pump_entity());
        add(d.option_entity("fan_entity"));
        add(d.refs.phase.as_deref());
    }
    tracked
}

// ---------------------------------------------------------------------------
// Filtering & classification
// ---------------------------------------------------------------------------

/// States (and one message) that carry no operator-relevant information.
fn is_noise(ev: &LogbookEvent) -> bool {
    matches!(ev.state.as_str(), "unavailable" | "unknown" | "")
        || ev.message.as_deref() == Some("became unavailable")
}

/// Drop noise and sort newest-first.
pub fn prepare(mut events: Vec<LogbookEvent>) -> Vec<LogbookEvent> {
    events.retain(|e| !is_noise(e));
    events.sort_by(|a, b| b.when.cmp(&a.when));
    events
}

/// Classify an event by substring heuristics on its entity id and domain.
/// Best-effort: misclassification is possible; callers must treat `None`
/// as "unclassified", not as an error.
pub fn classify(entity_id: &str, domain: &str) -> Option<EventKind> {
    if domain == "light" {
        Some(EventKind::Light)
    } else if entity_id.contains("pump") {
        Some(EventKind::Pump)
    } else if entity_id.contains("fan") {
        Some(EventKind::Fan)
    } else if (domain == "sensor" && entity_id.contains("phase")) || entity_id.contains("grow") {
        Some(EventKind::Phase)
    } else {
        None
    }
}

/// Apply the log view's client-side filters. Events whose entity is not in
/// the tracked map pass the device filter (better to over-show than to
/// silently drop history).
pub fn apply_filters<'a>(
    events: &'a [LogbookEvent],
    tracked: &HashMap<String, String>,
    device: Option<&str>,
    kind: Option<EventKind>,
) -> Vec<&'a LogbookEvent> {
    events
        .iter()
        .filter(|ev| match (device, tracked.get(&ev.entity_id)) {
            (Some(want), Some(owner)) => owner == want,
            _ => true,
        })
        .filter(|ev| match kind {
            Some(want) => classify(&ev.entity_id, &ev.domain) == Some(want),
            None => true,
        })
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================
