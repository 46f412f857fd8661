//! End-to-end reconciliation.
//!
//! Connect, read the current state, diff it against the desired configuration, apply
//! the policy, and deploy when the decision is to proceed. The session opened here is
//! always released, on success and on every error path.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::deploy::{execute, DeploymentReport};
use crate::device::{DeviceControl, DeviceSession};
use crate::diff::{diff, StateDiff};
use crate::error::{DeviceError, MokuError, MokuResult};
use crate::model::{ConfigurationView, DesiredConfiguration, ObservedConfiguration};
use crate::platform::{Platform, PlatformPreset};
use crate::policy::{decide, resolve_prompt, Confirm, Decision, ReconcileMode};
use crate::retrieve::{read_observed, ReadLevel};

/// Knobs for a single reconciliation run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    pub mode: ReconcileMode,
    /// Take over a session held by another client
    pub force_connect: bool,
    pub read_level: ReadLevel,
}

/// Everything a reconciliation run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub observed: ObservedConfiguration,
    pub diff: StateDiff,
    pub decision: Decision,
    /// Present when the executor ran
    pub deployment: Option<DeploymentReport>,
}

/// Drives reconciliation against one device.
pub struct Reconciler<'a, D: DeviceControl> {
    device: &'a D,
    address: String,
    options: ReconcileOptions,
}

impl<'a, D: DeviceControl> Reconciler<'a, D> {
    pub fn new(device: &'a D, address: &str, options: ReconcileOptions) -> Self {
        Self {
            device,
            address: address.to_string(),
            options,
        }
    }

    /// Reconcile the device towards `desired`.
    ///
    /// # Errors
    ///
    /// - `MokuError::Device` when connecting or reading fails; `DeviceError::Busy` is
    ///   reported once without retrying.
    /// - `MokuError::PartialDeployment` when the executor fails midway.
    ///
    /// An abort is not an error: it is returned as `Decision::Abort` in the report.
    pub fn run(
        &self,
        desired: &DesiredConfiguration,
        confirm: &mut dyn Confirm,
    ) -> MokuResult<ReconcileReport> {
        let platform = desired.platform();
        info!(
            address = %self.address,
            platform = %platform.name,
            mode = %self.options.mode,
            "starting reconciliation"
        );
        let mut session = self
            .device
            .connect(&self.address, platform.platform_id, self.options.force_connect)?;

        let result = self.reconcile_session(&mut session, desired, confirm);
        release(&mut session);
        result
    }

    fn reconcile_session(
        &self,
        session: &mut D::Session,
        desired: &DesiredConfiguration,
        confirm: &mut dyn Confirm,
    ) -> MokuResult<ReconcileReport> {
        let observed = read_observed(session, desired.platform(), self.options.read_level)?;
        let diff = diff(&observed, desired);
        debug!(identical = diff.identical, changes = diff.change_count(), "computed diff");

        let decision = resolve_prompt(decide(self.options.mode, &diff), &diff, confirm);
        info!(?decision, "reconciliation decision");

        let deployment = match decision {
            Decision::Proceed => {
                let force = self.options.mode == ReconcileMode::Force;
                Some(execute(session, &diff, desired, force)?)
            }
            Decision::Report | Decision::Abort(_) => None,
            // resolve_prompt never leaves a prompt unresolved
            Decision::Prompt => None,
        };

        Ok(ReconcileReport {
            observed,
            diff,
            decision,
            deployment,
        })
    }
}

/// Connect without knowing the platform, trying each preset's platform id in turn.
///
/// # Errors
///
/// Anything other than a platform mismatch stops the probe immediately. If no preset
/// matches, the last mismatch is returned.
pub fn connect_probing_platform<D: DeviceControl>(
    device: &D,
    address: &str,
    force: bool,
) -> MokuResult<(D::Session, Platform)> {
    let mut last_error = None;
    for preset in PlatformPreset::PROBE_ORDER {
        let platform = preset.platform();
        match device.connect(address, platform.platform_id, force) {
            Ok(session) => {
                info!(address, platform = %platform.name, "connected");
                return Ok((session, platform));
            }
            Err(err @ DeviceError::PlatformMismatch { .. }) => {
                debug!(address, platform = %platform.name, "platform id rejected");
                last_error = Some(err);
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(match last_error {
        Some(err) => err.into(),
        None => MokuError::UnknownPlatform(address.to_string()),
    })
}

/// Connect, read the device state and release the session.
pub fn read_device<D: DeviceControl>(
    device: &D,
    address: &str,
    level: ReadLevel,
    force: bool,
) -> MokuResult<ObservedConfiguration> {
    let (mut session, platform) = connect_probing_platform(device, address, force)?;
    let result = read_observed(&mut session, &platform, level);
    release(&mut session);
    Ok(result?)
}

fn release<S: DeviceSession>(session: &mut S) {
    if let Err(err) = session.release() {
        warn!(error = %err, "failed to release device session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimulatedDevice;
    use crate::model::{Configuration, InstrumentKind, SlotConfig};
    use crate::policy::{AbortReason, FixedAnswer};

    const ADDR: &str = "192.168.73.1";

    fn desired() -> DesiredConfiguration {
        let config = Configuration::new(PlatformPreset::MokuGo.platform())
            .with_slot(1, SlotConfig::new(InstrumentKind::Oscilloscope));
        DesiredConfiguration::new(config).unwrap()
    }

    fn options(mode: ReconcileMode) -> ReconcileOptions {
        ReconcileOptions {
            mode,
            ..ReconcileOptions::default()
        }
    }

    #[test]
    fn test_safe_mode_aborts_and_releases() {
        let device = SimulatedDevice::new(ADDR, PlatformPreset::MokuGo);
        let report = Reconciler::new(&device, ADDR, options(ReconcileMode::Safe))
            .run(&desired(), &mut FixedAnswer::yes())
            .unwrap();

        assert_eq!(report.decision, Decision::Abort(AbortReason::Mismatch));
        assert!(report.deployment.is_none());
        let state = device.snapshot().unwrap();
        assert_eq!(state.owner, None);
        assert_eq!(state.instruments[0], "");
    }

    #[test]
    fn test_busy_is_surfaced_once() {
        let device = SimulatedDevice::new(ADDR, PlatformPreset::MokuGo);
        device.hold_by_other_client().unwrap();

        let err = Reconciler::new(&device, ADDR, options(ReconcileMode::Force))
            .run(&desired(), &mut FixedAnswer::yes())
            .unwrap_err();
        assert!(err.is_device_busy());
    }

    #[test]
    fn test_session_released_after_partial_failure() {
        let device = SimulatedDevice::new(ADDR, PlatformPreset::MokuGo);
        device.fail_slot(1).unwrap();

        let err = Reconciler::new(&device, ADDR, options(ReconcileMode::Force))
            .run(&desired(), &mut FixedAnswer::yes())
            .unwrap_err();
        assert!(matches!(err, MokuError::PartialDeployment(_)));
        assert_eq!(device.snapshot().unwrap().owner, None);
    }

    #[test]
    fn test_probe_finds_platform() {
        let device = SimulatedDevice::new(ADDR, PlatformPreset::MokuPro);
        let (mut session, platform) = connect_probing_platform(&device, ADDR, false).unwrap();
        assert_eq!(platform.name, "Moku:Pro");
        session.release().unwrap();
    }

    #[test]
    fn test_probe_stops_on_unreachable() {
        let device = SimulatedDevice::new(ADDR, PlatformPreset::MokuGo);
        let err = connect_probing_platform(&device, "10.9.9.9", false).unwrap_err();
        assert!(matches!(err, MokuError::Device(DeviceError::Unreachable { .. })));
    }
}
