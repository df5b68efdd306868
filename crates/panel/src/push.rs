//! Live-state push topics.
//!
//! The host publishes every entity's current value on `state/<entity_id>`
//! whenever it changes. The panel treats each publish as a refresh signal;
//! core logic never inspects a per-entity delta.

/// Extract the entity id from "state/<entity_id>".
pub fn entity_from_topic(topic: &str) -> Option<&str> {
    let rest = topic.strip_prefix("state/")?;
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    Some(rest)
}

/// Decode a state payload. Values are plain UTF-8 strings.
pub fn parse_state(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).trim().to_string()
}

// ===========================================================================
// Tests
// ===========================================================================
