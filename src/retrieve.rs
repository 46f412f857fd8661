//! State retrieval: turning a device's introspection responses into an
//! [`ObservedConfiguration`].
//!
//! Retrieval is split in two:
//!
//! - [`read_raw_state`] talks to a session and collects the raw responses. At
//!   [`ReadLevel::Detailed`] it additionally asks each slot for whatever settings its
//!   instrument kind can report, through the session's capability traits.
//! - [`retrieve`] / [`retrieve_state`] are pure transformations of those responses.
//!
//! Retrieved state is best-effort by nature. A capability the session or instrument
//! lacks is recorded as [`Probe::NotSupported`]; a probe that fails is recorded as
//! [`Probe::Failed`] and logged. Neither is an error, and neither populates settings.

use chrono::Utc;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::device::{DeviceSession, RawConnection, CONTROL_REGISTER_COUNT};
use crate::error::DeviceError;
use crate::model::{
    Capability, Configuration, InstrumentKind, MokuConnection, ObservedConfiguration, SlotConfig,
};
use crate::platform::Platform;
use crate::validate::{validate, ValidationPurpose};

/// How much to read from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReadLevel {
    /// Instruments and routing only
    #[default]
    Basic,
    /// Also front-end/output settings and control registers
    Detailed,
}

impl ReadLevel {
    fn as_number(self) -> u8 {
        match self {
            ReadLevel::Basic => 1,
            ReadLevel::Detailed => 2,
        }
    }
}

/// Outcome of asking a device for an optional piece of state.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    Available(T),
    NotSupported,
    Failed(String),
}

impl<T> Probe<T> {
    pub fn available(&self) -> Option<&T> {
        match self {
            Probe::Available(value) => Some(value),
            _ => None,
        }
    }
}

impl<T> Default for Probe<T> {
    fn default() -> Self {
        Probe::NotSupported
    }
}

/// Everything probed for one slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotIntrospection {
    pub frontend: Probe<serde_json::Value>,
    pub output: Probe<serde_json::Value>,
    pub control_registers: Probe<BTreeMap<u8, i64>>,
}

/// Raw responses collected from a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDeviceState {
    pub instruments: Vec<String>,
    pub connections: Vec<RawConnection>,
    pub introspection: BTreeMap<u8, SlotIntrospection>,
    pub level: ReadLevel,
}

/// Build an observed configuration from instrument and connection lists alone.
pub fn retrieve(
    instruments: &[String],
    connections: &[RawConnection],
    platform: &Platform,
) -> ObservedConfiguration {
    retrieve_state(
        &RawDeviceState {
            instruments: instruments.to_vec(),
            connections: connections.to_vec(),
            ..Default::default()
        },
        platform,
    )
}

/// Build an observed configuration from a full raw read.
///
/// Slot `n` corresponds to `instruments[n - 1]`; blank entries are unoccupied slots.
/// Zero occupied slots is a valid result.
pub fn retrieve_state(raw: &RawDeviceState, platform: &Platform) -> ObservedConfiguration {
    let mut config = Configuration::new(platform.clone());

    for (slot, name) in occupied_slots(&raw.instruments) {
        let mut slot_config = SlotConfig::new(InstrumentKind::parse(name));
        if let Some(probed) = raw.introspection.get(&slot) {
            if let Some(frontend) = probed.frontend.available() {
                slot_config.settings.insert("frontend".into(), frontend.clone());
            }
            if let Some(output) = probed.output.available() {
                slot_config.settings.insert("output".into(), output.clone());
            }
            if let Some(registers) = probed.control_registers.available() {
                let non_zero: BTreeMap<u8, i64> = registers
                    .iter()
                    .filter(|(_, value)| **value != 0)
                    .map(|(&index, &value)| (index, value))
                    .collect();
                if !non_zero.is_empty() {
                    slot_config.control_registers = Some(non_zero);
                }
            }
        }
        config.slots.insert(slot, slot_config);
    }

    config.routing = raw
        .connections
        .iter()
        .map(|conn| MokuConnection::new(conn.source.as_str(), conn.destination.as_str()))
        .collect();

    config.metadata.insert("exported_at", Utc::now().to_rfc3339());
    config.metadata.insert("source", "device_read");
    config.metadata.insert("read_level", raw.level.as_number());

    for problem in validate(&config, ValidationPurpose::Inspect) {
        warn!(%problem, "device reported a configuration that does not validate");
    }

    ObservedConfiguration::new(config)
}

/// Collect raw state from a session.
///
/// # Errors
///
/// Only the instrument and connection listings can fail the read; settings probes are
/// best-effort.
pub fn read_raw_state<S: DeviceSession + ?Sized>(
    session: &mut S,
    level: ReadLevel,
) -> Result<RawDeviceState, DeviceError> {
    let instruments = session.list_instruments()?;
    let connections = session.list_connections()?;
    info!(
        instruments = instruments.iter().filter(|i| !i.trim().is_empty()).count(),
        connections = connections.len(),
        "read device state"
    );

    let mut introspection = BTreeMap::new();
    if level == ReadLevel::Detailed {
        for (slot, name) in occupied_slots(&instruments) {
            let kind = InstrumentKind::parse(name);
            introspection.insert(slot, probe_slot(session, slot, &kind));
        }
    }

    Ok(RawDeviceState {
        instruments,
        connections,
        introspection,
        level,
    })
}

/// Read and retrieve in one step.
pub fn read_observed<S: DeviceSession + ?Sized>(
    session: &mut S,
    platform: &Platform,
    level: ReadLevel,
) -> Result<ObservedConfiguration, DeviceError> {
    let raw = read_raw_state(session, level)?;
    Ok(retrieve_state(&raw, platform))
}

/// Non-blank entries of an instrument listing, paired with their slot numbers.
///
/// Entries past slot 255 cannot name a slot and are skipped with a warning.
fn occupied_slots(instruments: &[String]) -> impl Iterator<Item = (u8, &String)> + '_ {
    instruments
        .iter()
        .enumerate()
        .filter(|(_, name)| !name.trim().is_empty())
        .filter_map(|(index, name)| match u8::try_from(index + 1) {
            Ok(slot) => Some((slot, name)),
            Err(_) => {
                warn!(
                    position = index + 1,
                    instrument = %name,
                    "instrument listed past the last addressable slot, skipped"
                );
                None
            }
        })
}

fn probe_slot<S: DeviceSession + ?Sized>(
    session: &mut S,
    slot: u8,
    kind: &InstrumentKind,
) -> SlotIntrospection {
    let mut probed = SlotIntrospection::default();

    if kind.supports(Capability::FrontendIntrospection) {
        if let Some(frontend) = session.frontend_introspection() {
            probed.frontend = settle(slot, "frontend", frontend.read_frontend(slot));
            probed.output = settle(slot, "output", frontend.read_output(slot));
        } else {
            debug!(slot, %kind, "session does not support front-end introspection");
        }
    }

    if kind.supports(Capability::ControlRegisters) {
        if let Some(registers) = session.control_registers() {
            let mut values = BTreeMap::new();
            let mut last_error = None;
            for index in 0..CONTROL_REGISTER_COUNT {
                match registers.read_control_register(slot, index) {
                    Ok(value) => {
                        values.insert(index, value);
                    }
                    Err(err) => last_error = Some(err),
                }
            }
            probed.control_registers = match (values.is_empty(), last_error) {
                (true, Some(err)) => settle(slot, "control register", Err(err)),
                _ => Probe::Available(values),
            };
        } else {
            debug!(slot, %kind, "session does not support control registers");
        }
    }

    probed
}

fn settle<T>(slot: u8, what: &str, result: Result<T, DeviceError>) -> Probe<T> {
    match result {
        Ok(value) => Probe::Available(value),
        Err(err) => {
            warn!(slot, error = %err, "{what} probe failed");
            Probe::Failed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceControl, InstrumentParams, SimulatedDevice};
    use crate::model::{ConfigurationView, PortId};
    use crate::platform::PlatformPreset;
    use tracing_test::traced_test;

    const ADDR: &str = "10.0.0.7";

    fn go() -> Platform {
        PlatformPreset::MokuGo.platform()
    }

    #[test]
    fn test_idle_device_retrieves_empty_configuration() {
        let observed = retrieve(&[String::new(), String::new()], &[], &go());
        assert!(observed.slots().is_empty());
        assert!(observed.routing().is_empty());
        assert_eq!(observed.metadata().get("source"), Some(&serde_json::json!("device_read")));
    }

    #[test]
    fn test_slots_follow_list_position() {
        let instruments = vec![String::new(), "Oscilloscope".to_string()];
        let connections = vec![RawConnection::new("slot2outa", "output1")];
        let observed = retrieve(&instruments, &connections, &go());

        assert_eq!(observed.slots().len(), 1);
        assert_eq!(observed.slots()[&2].instrument, InstrumentKind::Oscilloscope);
        assert!(observed.slots()[&2].settings.is_empty());
        assert_eq!(observed.routing()[0].source, PortId::new("Slot2OutA"));
    }

    #[test]
    #[traced_test]
    fn test_oversized_instrument_list_is_truncated() {
        let idle = retrieve(&vec![String::new(); 300], &[], &go());
        assert!(idle.slots().is_empty());

        let mut instruments = vec![String::new(); 300];
        instruments[0] = "Oscilloscope".to_string();
        instruments[254] = "Oscilloscope".to_string();
        instruments[255] = "Oscilloscope".to_string();
        let observed = retrieve(&instruments, &[], &go());

        assert_eq!(observed.slots().keys().copied().collect::<Vec<_>>(), vec![1, 255]);
        assert!(logs_contain("instrument listed past the last addressable slot"));
    }

    #[test]
    fn test_zero_registers_are_dropped() {
        let mut raw = RawDeviceState {
            instruments: vec!["CloudCompile".into()],
            level: ReadLevel::Detailed,
            ..Default::default()
        };
        raw.introspection.insert(
            1,
            SlotIntrospection {
                control_registers: Probe::Available(BTreeMap::from([(0, 0), (1, 7)])),
                ..Default::default()
            },
        );
        let observed = retrieve_state(&raw, &go());
        assert_eq!(
            observed.slots()[&1].control_registers,
            Some(BTreeMap::from([(1, 7)]))
        );
        assert_eq!(observed.metadata().get("read_level"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn test_basic_read_skips_probes() {
        let device = SimulatedDevice::new(ADDR, PlatformPreset::MokuGo);
        device.install(1, &InstrumentKind::Oscilloscope).unwrap();
        let mut session = device.connect(ADDR, 2, false).unwrap();

        let raw = read_raw_state(&mut session, ReadLevel::Basic).unwrap();
        assert!(raw.introspection.is_empty());
    }

    #[test]
    fn test_detailed_read_collects_settings() {
        let device = SimulatedDevice::new(ADDR, PlatformPreset::MokuGo);
        let mut session = device.connect(ADDR, 2, false).unwrap();
        session
            .apply_instrument(
                1,
                &InstrumentKind::CloudCompile,
                &InstrumentParams {
                    bitstream: Some("probe.tar".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        session
            .apply_instrument(2, &InstrumentKind::Oscilloscope, &InstrumentParams::default())
            .unwrap();
        device.set_register(1, 5, 99).unwrap();

        let observed = read_observed(&mut session, &go(), ReadLevel::Detailed).unwrap();
        assert_eq!(
            observed.slots()[&1].control_registers,
            Some(BTreeMap::from([(5, 99)]))
        );
        assert!(observed.slots()[&1].settings.is_empty());
        assert!(observed.slots()[&2].settings.contains_key("frontend"));
        assert!(observed.slots()[&2].settings.contains_key("output"));
    }

    #[test]
    fn test_missing_capability_is_not_supported() {
        let device = SimulatedDevice::new(ADDR, PlatformPreset::MokuGo);
        device.install(1, &InstrumentKind::Oscilloscope).unwrap();
        device.disable_frontend_introspection().unwrap();
        let mut session = device.connect(ADDR, 2, false).unwrap();

        let raw = read_raw_state(&mut session, ReadLevel::Detailed).unwrap();
        assert_eq!(raw.introspection[&1].frontend, Probe::NotSupported);
        assert_eq!(raw.introspection[&1].control_registers, Probe::NotSupported);
    }

    #[test]
    #[traced_test]
    fn test_failed_probe_is_logged_not_raised() {
        let device = SimulatedDevice::new(ADDR, PlatformPreset::MokuGo);
        device.install(1, &InstrumentKind::Oscilloscope).unwrap();
        device.break_frontend_introspection().unwrap();
        let mut session = device.connect(ADDR, 2, false).unwrap();

        let observed = read_observed(&mut session, &go(), ReadLevel::Detailed).unwrap();
        assert!(observed.slots()[&1].settings.is_empty());
        assert!(logs_contain("frontend probe failed"));
    }
}
