//! Port identifiers and routing edges.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[allow(clippy::expect_used)]
static SLOT_PORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^slot(\d+)(in|out)(?:put)?([a-z])$").expect("SLOT_PORT is a valid regex")
});
#[allow(clippy::expect_used)]
static PHYSICAL_PORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(in|out)(?:put)?(\d+)$").expect("PHYSICAL_PORT is a valid regex")
});
#[allow(clippy::expect_used)]
static CANONICAL_SLOT_PORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Slot(\d+)([A-Za-z]\w*)$").expect("CANONICAL_SLOT_PORT is a valid regex")
});

/// A normalized port identifier.
///
/// Normalization strips whitespace and canonicalizes the case of the well-known
/// spellings (`slot1outa` -> `Slot1OutA`, `in1` -> `Input1`, `dio` -> `DIO`). Anything
/// else is kept verbatim; whether it names a real port is decided by the validator
/// against the platform descriptor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PortId(String);

impl PortId {
    pub fn new(raw: &str) -> Self {
        PortId(normalize_port(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a slot port into `(slot, suffix)`, e.g. `Slot2OutA` -> `(2, "OutA")`.
    pub fn slot_port(&self) -> Option<(u8, &str)> {
        let caps = CANONICAL_SLOT_PORT.captures(&self.0)?;
        let slot = caps.get(1)?.as_str().parse::<u8>().ok()?;
        Some((slot, caps.get(2)?.as_str()))
    }
}

fn normalize_port(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();

    if let Some(caps) = SLOT_PORT.captures(&compact) {
        let direction = if caps[2].eq_ignore_ascii_case("in") { "In" } else { "Out" };
        return format!(
            "Slot{}{}{}",
            &caps[1],
            direction,
            caps[3].to_ascii_uppercase()
        );
    }
    if let Some(caps) = PHYSICAL_PORT.captures(&compact) {
        let direction = if caps[1].eq_ignore_ascii_case("in") {
            "Input"
        } else {
            "Output"
        };
        return format!("{}{}", direction, &caps[2]);
    }
    if compact.eq_ignore_ascii_case("dio") {
        return "DIO".to_string();
    }
    compact
}

impl From<String> for PortId {
    fn from(raw: String) -> Self {
        PortId::new(&raw)
    }
}

impl From<&str> for PortId {
    fn from(raw: &str) -> Self {
        PortId::new(raw)
    }
}

impl From<PortId> for String {
    fn from(port: PortId) -> Self {
        port.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One directed routing edge.
///
/// A value type: two connections with the same normalized endpoints are equal no
/// matter how they were spelled in the source document. Extra keys such as
/// `description` are ignored on deserialization.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MokuConnection {
    pub source: PortId,
    pub destination: PortId,
}

impl MokuConnection {
    pub fn new(source: impl Into<PortId>, destination: impl Into<PortId>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

impl fmt::Display for MokuConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}
