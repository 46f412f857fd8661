//! Deployment executor.
//!
//! Applies a desired configuration to an open session once the policy has decided to
//! proceed. Steps run strictly in order:
//!
//! 1. Clear slots that are occupied on the device but absent from the desired state.
//! 2. Deploy every desired slot in ascending slot order: instantiate the instrument,
//!    then write its control registers.
//! 3. Replace the routing set.
//!
//! Routing comes last so that every slot port it references exists. Nothing is rolled
//! back on failure; the returned [`PartialDeploymentFailure`] names the failing stage
//! and the slots already applied.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::device::{DeviceSession, InstrumentParams, RawConnection};
use crate::diff::StateDiff;
use crate::error::{DeployStage, DeviceError, PartialDeploymentFailure};
use crate::model::{Capability, ConfigurationView, DesiredConfiguration, SlotConfig};

/// What the executor did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeploymentReport {
    pub cleared_slots: Vec<u8>,
    pub applied_slots: Vec<u8>,
    pub registers_written: usize,
    pub routes_applied: usize,
    /// Nothing was sent because the device already matched
    pub skipped: bool,
}

/// Apply `desired` through `session`.
///
/// With an identical `diff` the call is a no-op unless `force` is set, in which case
/// the full configuration is re-applied.
///
/// # Errors
///
/// The first device failure, wrapped with the stage it occurred in.
pub fn execute<S: DeviceSession + ?Sized>(
    session: &mut S,
    diff: &StateDiff,
    desired: &DesiredConfiguration,
    force: bool,
) -> Result<DeploymentReport, PartialDeploymentFailure> {
    let mut report = DeploymentReport::default();

    if diff.identical && !force {
        info!("device already matches desired configuration, nothing to deploy");
        report.skipped = true;
        return Ok(report);
    }

    for (slot, _) in &diff.slots_removed {
        debug!(slot, "clearing slot");
        session
            .clear_instrument(*slot)
            .map_err(|source| failure(DeployStage::ClearSlot(*slot), &report, source))?;
        report.cleared_slots.push(*slot);
    }

    for (&slot, slot_config) in desired.slots() {
        debug!(slot, instrument = %slot_config.instrument, "deploying slot");
        let written = deploy_slot(session, slot, slot_config)
            .map_err(|source| failure(DeployStage::Slot(slot), &report, source))?;
        report.registers_written += written;
        report.applied_slots.push(slot);
    }

    let routing: Vec<RawConnection> = desired.routing().iter().map(RawConnection::from).collect();
    debug!(count = routing.len(), "applying routing");
    session
        .apply_routing(&routing)
        .map_err(|source| failure(DeployStage::Routing, &report, source))?;
    report.routes_applied = routing.len();

    info!(
        slots = report.applied_slots.len(),
        cleared = report.cleared_slots.len(),
        routes = report.routes_applied,
        "deployment complete"
    );
    Ok(report)
}

fn deploy_slot<S: DeviceSession + ?Sized>(
    session: &mut S,
    slot: u8,
    config: &SlotConfig,
) -> Result<usize, DeviceError> {
    session.apply_instrument(slot, &config.instrument, &InstrumentParams::from(config))?;

    let registers = match &config.control_registers {
        Some(registers) if !registers.is_empty() => registers,
        _ => return Ok(0),
    };
    if !config.instrument.supports(Capability::ControlRegisters) {
        warn!(
            slot,
            instrument = %config.instrument,
            "ignoring control registers for instrument without registers"
        );
        return Ok(0);
    }
    let writer = session.control_registers().ok_or_else(|| {
        DeviceError::Rejected(format!("session cannot write control registers for slot {slot}"))
    })?;
    for (&index, &value) in registers {
        writer.write_control_register(slot, index, value)?;
    }
    Ok(registers.len())
}

fn failure(
    stage: DeployStage,
    report: &DeploymentReport,
    source: DeviceError,
) -> PartialDeploymentFailure {
    warn!(%stage, applied = ?report.applied_slots, error = %source, "deployment failed");
    PartialDeploymentFailure {
        stage,
        applied_slots: report.applied_slots.clone(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceControl, SimulatedDevice};
    use crate::diff::diff;
    use crate::model::{Configuration, InstrumentKind, MokuConnection, ObservedConfiguration};
    use crate::platform::PlatformPreset;

    const ADDR: &str = "10.0.0.2";

    fn desired() -> DesiredConfiguration {
        let config = Configuration::new(PlatformPreset::MokuGo.platform())
            .with_slot(
                1,
                SlotConfig::cloud_compile("probe.tar")
                    .with_register(0, 7)
                    .with_register(3, -1),
            )
            .with_slot(2, SlotConfig::new(InstrumentKind::Oscilloscope))
            .with_connection(MokuConnection::new("Input1", "Slot1InA"))
            .with_connection(MokuConnection::new("Slot1OutA", "Slot2InA"));
        DesiredConfiguration::new(config).unwrap()
    }

    fn idle_diff(desired: &DesiredConfiguration) -> StateDiff {
        diff(&ObservedConfiguration::empty(PlatformPreset::MokuGo.platform()), desired)
    }

    fn open(device: &SimulatedDevice) -> crate::device::SimulatedSession {
        device.connect(ADDR, 2, false).unwrap()
    }

    #[test]
    fn test_full_deployment_order() {
        let device = SimulatedDevice::new(ADDR, PlatformPreset::MokuGo);
        let mut session = open(&device);
        let desired = desired();

        let report = execute(&mut session, &idle_diff(&desired), &desired, false).unwrap();
        assert_eq!(report.applied_slots, vec![1, 2]);
        assert_eq!(report.registers_written, 2);
        assert_eq!(report.routes_applied, 2);
        assert!(!report.skipped);

        let state = device.snapshot().unwrap();
        assert_eq!(state.instruments, vec!["CloudCompile".to_string(), "Oscilloscope".to_string()]);
        assert_eq!(state.registers[&1][&0], 7);
        assert_eq!(state.connections.len(), 2);
    }

    #[test]
    fn test_identical_diff_is_noop_unless_forced() {
        let device = SimulatedDevice::new(ADDR, PlatformPreset::MokuGo);
        let mut session = open(&device);
        let desired = desired();
        let same = diff(&desired, &desired);

        let report = execute(&mut session, &same, &desired, false).unwrap();
        assert!(report.skipped);
        assert_eq!(device.snapshot().unwrap().instruments, vec![String::new(), String::new()]);

        let report = execute(&mut session, &same, &desired, true).unwrap();
        assert!(!report.skipped);
        assert_eq!(report.applied_slots, vec![1, 2]);
    }

    #[test]
    fn test_slot_failure_reports_applied_slots() {
        let device = SimulatedDevice::new(ADDR, PlatformPreset::MokuGo);
        device.fail_slot(2).unwrap();
        let mut session = open(&device);
        let desired = desired();

        let err = execute(&mut session, &idle_diff(&desired), &desired, false).unwrap_err();
        assert_eq!(err.stage, DeployStage::Slot(2));
        assert_eq!(err.applied_slots, vec![1]);
        // slot 1 stays deployed, routing was never touched
        let state = device.snapshot().unwrap();
        assert_eq!(state.instruments[0], "CloudCompile");
        assert!(state.connections.is_empty());
    }

    #[test]
    fn test_routing_failure_after_all_slots() {
        let device = SimulatedDevice::new(ADDR, PlatformPreset::MokuGo);
        device.fail_routing().unwrap();
        let mut session = open(&device);
        let desired = desired();

        let err = execute(&mut session, &idle_diff(&desired), &desired, false).unwrap_err();
        assert_eq!(err.stage, DeployStage::Routing);
        assert_eq!(err.applied_slots, vec![1, 2]);
    }

    #[test]
    fn test_removed_slots_are_cleared_first() {
        let device = SimulatedDevice::new(ADDR, PlatformPreset::MokuPro);
        device.install(3, &InstrumentKind::SpectrumAnalyzer).unwrap();
        let mut session = device.connect(ADDR, 3, false).unwrap();

        let config = Configuration::new(PlatformPreset::MokuPro.platform())
            .with_slot(1, SlotConfig::new(InstrumentKind::Oscilloscope));
        let desired = DesiredConfiguration::new(config).unwrap();
        let mut current = Configuration::new(PlatformPreset::MokuPro.platform());
        current.slots.insert(3, SlotConfig::new(InstrumentKind::SpectrumAnalyzer));

        let report = execute(&mut session, &diff(&current, &desired), &desired, false).unwrap();
        assert_eq!(report.cleared_slots, vec![3]);
        assert_eq!(device.snapshot().unwrap().instruments[2], "");
    }
}
