//! Structured comparison of a current and a desired configuration.
//!
//! The diff is set-based. Slots are matched by slot number; a slot present on both
//! sides counts as changed only when its instrument kind differs. Settings and
//! control registers are not compared because retrieved state carries them only on a
//! best-effort basis, and comparing them would report differences that are artifacts
//! of the read. Routing is compared as a set of normalized `(source, destination)`
//! pairs. Input order never influences the result, and every bucket is sorted.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::model::{ConfigurationView, InstrumentKind, MokuConnection, SlotConfig};

/// A slot whose instrument kind differs between current and desired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotChange {
    pub slot: u8,
    pub current: InstrumentKind,
    pub desired: InstrumentKind,
}

/// Differences between two configurations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateDiff {
    /// In desired only, with the desired slot configuration
    pub slots_added: Vec<(u8, SlotConfig)>,
    /// In current only, with the current slot configuration
    pub slots_removed: Vec<(u8, SlotConfig)>,
    pub slots_changed: Vec<SlotChange>,
    pub routing_added: Vec<MokuConnection>,
    pub routing_removed: Vec<MokuConnection>,
    pub routing_unchanged: Vec<MokuConnection>,
    /// No slot or routing differences (unchanged routing is irrelevant)
    pub identical: bool,
}

/// Compare `current` against `desired`.
pub fn diff<C, D>(current: &C, desired: &D) -> StateDiff
where
    C: ConfigurationView + ?Sized,
    D: ConfigurationView + ?Sized,
{
    let current_slots = current.slots();
    let desired_slots = desired.slots();

    let slots_added: Vec<(u8, SlotConfig)> = desired_slots
        .iter()
        .filter(|(slot, _)| !current_slots.contains_key(slot))
        .map(|(&slot, config)| (slot, config.clone()))
        .collect();

    let slots_removed: Vec<(u8, SlotConfig)> = current_slots
        .iter()
        .filter(|(slot, _)| !desired_slots.contains_key(slot))
        .map(|(&slot, config)| (slot, config.clone()))
        .collect();

    let slots_changed: Vec<SlotChange> = current_slots
        .iter()
        .filter_map(|(&slot, current_config)| {
            let desired_config = desired_slots.get(&slot)?;
            (current_config.instrument != desired_config.instrument).then(|| SlotChange {
                slot,
                current: current_config.instrument.clone(),
                desired: desired_config.instrument.clone(),
            })
        })
        .collect();

    let current_routes: BTreeSet<&MokuConnection> = current.routing().iter().collect();
    let desired_routes: BTreeSet<&MokuConnection> = desired.routing().iter().collect();

    let routing_added: Vec<MokuConnection> = desired_routes
        .difference(&current_routes)
        .map(|&conn| conn.clone())
        .collect();
    let routing_removed: Vec<MokuConnection> = current_routes
        .difference(&desired_routes)
        .map(|&conn| conn.clone())
        .collect();
    let routing_unchanged: Vec<MokuConnection> = current_routes
        .intersection(&desired_routes)
        .map(|&conn| conn.clone())
        .collect();

    let identical = slots_added.is_empty()
        && slots_removed.is_empty()
        && slots_changed.is_empty()
        && routing_added.is_empty()
        && routing_removed.is_empty();

    StateDiff {
        slots_added,
        slots_removed,
        slots_changed,
        routing_added,
        routing_removed,
        routing_unchanged,
        identical,
    }
}

impl StateDiff {
    /// Total number of differences across all buckets that affect `identical`.
    pub fn change_count(&self) -> usize {
        self.slots_added.len()
            + self.slots_removed.len()
            + self.slots_changed.len()
            + self.routing_added.len()
            + self.routing_removed.len()
    }
}

impl fmt::Display for StateDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.identical {
            writeln!(f, "Device matches desired configuration")?;
        } else {
            writeln!(
                f,
                "Device differs from desired configuration ({} change(s)):",
                self.change_count()
            )?;
        }
        for (slot, config) in &self.slots_added {
            write!(f, "  + slot {slot}: {}", config.instrument)?;
            if let Some(bitstream) = &config.bitstream {
                let name = bitstream.file_name().unwrap_or(bitstream.as_os_str());
                write!(f, " ({})", name.to_string_lossy())?;
            }
            writeln!(f)?;
        }
        for (slot, config) in &self.slots_removed {
            writeln!(f, "  - slot {slot}: {}", config.instrument)?;
        }
        for change in &self.slots_changed {
            writeln!(f, "  ~ slot {}: {} -> {}", change.slot, change.current, change.desired)?;
        }
        for conn in &self.routing_added {
            writeln!(f, "  + route {conn}")?;
        }
        for conn in &self.routing_removed {
            writeln!(f, "  - route {conn}")?;
        }
        for conn in &self.routing_unchanged {
            writeln!(f, "    route {conn}")?;
        }
        Ok(())
    }
}
