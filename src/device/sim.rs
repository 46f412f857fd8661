//! Simulated device backend.
//!
//! Models a single device at a fixed address: its slots, routing, single-writer
//! ownership and the best-effort read-back APIs. State can be persisted to a JSON file
//! so successive CLI invocations observe each other's changes.
//!
//! Fault injection (`fail_slot`, `fail_routing`, ...) exists so the executor's
//! no-rollback semantics can be exercised deterministically.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::{
    DeviceControl, DeviceSession, InstrumentParams, RawConnection, SupportsControlRegisters,
    SupportsFrontendIntrospection,
};
use crate::error::{DeviceError, MokuError, MokuResult};
use crate::model::InstrumentKind;
use crate::platform::PlatformPreset;

/// Owner id used for a session held by some other client.
const FOREIGN_OWNER: u64 = 0;

/// Persistent state of a simulated device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedState {
    pub address: String,
    pub platform_id: u8,
    /// One entry per slot, empty when unoccupied
    pub instruments: Vec<String>,
    #[serde(default)]
    pub connections: Vec<RawConnection>,
    #[serde(default)]
    pub owner: Option<u64>,
    #[serde(default)]
    pub bitstreams: BTreeMap<u8, PathBuf>,
    #[serde(default)]
    pub frontend: BTreeMap<u8, serde_json::Value>,
    #[serde(default)]
    pub registers: BTreeMap<u8, BTreeMap<u8, i64>>,
    #[serde(default)]
    next_session: u64,
}

impl SimulatedState {
    /// An idle device.
    pub fn idle(address: &str, preset: PlatformPreset) -> Self {
        let platform = preset.platform();
        Self {
            address: address.to_string(),
            platform_id: platform.platform_id,
            instruments: vec![String::new(); usize::from(platform.slots)],
            connections: Vec::new(),
            owner: None,
            bitstreams: BTreeMap::new(),
            frontend: BTreeMap::new(),
            registers: BTreeMap::new(),
            next_session: 0,
        }
    }

    fn slot_index(&self, slot: u8) -> Result<usize, DeviceError> {
        let index = usize::from(slot).wrapping_sub(1);
        if slot == 0 || index >= self.instruments.len() {
            return Err(DeviceError::NoSuchSlot { slot });
        }
        Ok(index)
    }

    fn instrument_in(&self, slot: u8) -> Result<&str, DeviceError> {
        let index = self.slot_index(slot)?;
        Ok(self.instruments[index].as_str())
    }
}

#[derive(Debug, Default)]
struct Faults {
    failing_slots: BTreeSet<u8>,
    fail_routing: bool,
    no_frontend_introspection: bool,
    broken_frontend_introspection: bool,
    unreachable: bool,
}

#[derive(Debug)]
struct Inner {
    state: SimulatedState,
    path: Option<PathBuf>,
    faults: Faults,
}

impl Inner {
    fn persist(&self) -> Result<(), DeviceError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.state)
            .map_err(|e| DeviceError::Rejected(format!("cannot encode simulated state: {e}")))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                DeviceError::Rejected(format!("cannot persist simulated state: {e}"))
            })?;
        }
        fs::write(path, json)
            .map_err(|e| DeviceError::Rejected(format!("cannot persist simulated state: {e}")))
    }
}

/// In-memory (optionally file-backed) device.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    inner: Arc<Mutex<Inner>>,
}

impl SimulatedDevice {
    /// An idle in-memory device.
    pub fn new(address: &str, preset: PlatformPreset) -> Self {
        Self::from_state(SimulatedState::idle(address, preset))
    }

    pub fn from_state(state: SimulatedState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state,
                path: None,
                faults: Faults::default(),
            })),
        }
    }

    /// Open a file-backed device, creating an idle one if `path` does not exist yet.
    pub fn open(path: &Path, address: &str, preset: PlatformPreset) -> MokuResult<Self> {
        let state = if path.exists() {
            let text = fs::read_to_string(path)?;
            serde_json::from_str(&text).map_err(|e| MokuError::Load {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        } else {
            debug!(path = %path.display(), "creating idle simulated device");
            SimulatedState::idle(address, preset)
        };
        let device = Self::from_state(state);
        device.lock()?.path = Some(path.to_path_buf());
        Ok(device)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, DeviceError> {
        self.inner
            .lock()
            .map_err(|_| DeviceError::Rejected("simulated device state is poisoned".into()))
    }

    /// Copy of the current device state.
    pub fn snapshot(&self) -> Result<SimulatedState, DeviceError> {
        Ok(self.lock()?.state.clone())
    }

    /// Place an instrument directly, bypassing any session.
    pub fn install(&self, slot: u8, kind: &InstrumentKind) -> Result<(), DeviceError> {
        let mut inner = self.lock()?;
        let index = inner.state.slot_index(slot)?;
        inner.state.instruments[index] = kind.name().to_string();
        inner.persist()
    }

    /// Replace the routing set directly, bypassing any session.
    pub fn wire(&self, connections: Vec<RawConnection>) -> Result<(), DeviceError> {
        let mut inner = self.lock()?;
        inner.state.connections = connections;
        inner.persist()
    }

    /// Preload front-end settings reported for `slot`.
    pub fn set_frontend(&self, slot: u8, frontend: serde_json::Value) -> Result<(), DeviceError> {
        self.lock()?.state.frontend.insert(slot, frontend);
        Ok(())
    }

    /// Preload a control register value for `slot`.
    pub fn set_register(&self, slot: u8, index: u8, value: i64) -> Result<(), DeviceError> {
        self.lock()?
            .state
            .registers
            .entry(slot)
            .or_default()
            .insert(index, value);
        Ok(())
    }

    /// Mark the device as owned by another client.
    pub fn hold_by_other_client(&self) -> Result<(), DeviceError> {
        let mut inner = self.lock()?;
        inner.state.owner = Some(FOREIGN_OWNER);
        inner.persist()
    }

    /// Make instantiation in `slot` fail.
    pub fn fail_slot(&self, slot: u8) -> Result<(), DeviceError> {
        self.lock()?.faults.failing_slots.insert(slot);
        Ok(())
    }

    pub fn fail_routing(&self) -> Result<(), DeviceError> {
        self.lock()?.faults.fail_routing = true;
        Ok(())
    }

    /// Sessions will not offer front-end introspection at all.
    pub fn disable_frontend_introspection(&self) -> Result<(), DeviceError> {
        self.lock()?.faults.no_frontend_introspection = true;
        Ok(())
    }

    /// Sessions offer front-end introspection, but every read fails.
    pub fn break_frontend_introspection(&self) -> Result<(), DeviceError> {
        self.lock()?.faults.broken_frontend_introspection = true;
        Ok(())
    }

    pub fn set_unreachable(&self) -> Result<(), DeviceError> {
        self.lock()?.faults.unreachable = true;
        Ok(())
    }
}

impl DeviceControl for SimulatedDevice {
    type Session = SimulatedSession;

    fn connect(
        &self,
        address: &str,
        platform_id: u8,
        force: bool,
    ) -> Result<SimulatedSession, DeviceError> {
        let mut inner = self.lock()?;
        if inner.faults.unreachable || inner.state.address != address {
            return Err(DeviceError::Unreachable {
                address: address.to_string(),
            });
        }
        if inner.state.platform_id != platform_id {
            return Err(DeviceError::PlatformMismatch {
                expected: platform_id,
                actual: inner.state.platform_id,
            });
        }
        if let Some(owner) = inner.state.owner {
            if !force {
                return Err(DeviceError::Busy {
                    address: address.to_string(),
                });
            }
            warn!(address, previous_owner = owner, "forcing takeover of device session");
        }

        inner.state.next_session += 1;
        let id = inner.state.next_session;
        inner.state.owner = Some(id);
        inner.persist()?;
        debug!(address, session = id, "simulated session opened");

        Ok(SimulatedSession {
            device: self.clone(),
            id,
        })
    }
}

/// A session on a [`SimulatedDevice`].
#[derive(Debug)]
pub struct SimulatedSession {
    device: SimulatedDevice,
    id: u64,
}

impl SimulatedSession {
    fn owned(&self) -> Result<MutexGuard<'_, Inner>, DeviceError> {
        let inner = self.device.lock()?;
        if inner.state.owner != Some(self.id) {
            return Err(DeviceError::SessionClosed);
        }
        Ok(inner)
    }
}

impl DeviceSession for SimulatedSession {
    fn list_instruments(&mut self) -> Result<Vec<String>, DeviceError> {
        Ok(self.owned()?.state.instruments.clone())
    }

    fn list_connections(&mut self) -> Result<Vec<RawConnection>, DeviceError> {
        Ok(self.owned()?.state.connections.clone())
    }

    fn apply_instrument(
        &mut self,
        slot: u8,
        kind: &InstrumentKind,
        params: &InstrumentParams,
    ) -> Result<(), DeviceError> {
        let mut inner = self.owned()?;
        let index = inner.state.slot_index(slot)?;
        if inner.faults.failing_slots.contains(&slot) {
            return Err(DeviceError::Rejected(format!(
                "instrument {kind} could not be instantiated in slot {slot}"
            )));
        }
        if !kind.is_known() {
            return Err(DeviceError::Rejected(format!("unsupported instrument '{kind}'")));
        }
        if kind.spec().requires_bitstream && params.bitstream.is_none() {
            return Err(DeviceError::Rejected(format!("{kind} requires a bitstream")));
        }

        inner.state.instruments[index] = kind.name().to_string();
        inner.state.registers.remove(&slot);
        match &params.bitstream {
            Some(path) => inner.state.bitstreams.insert(slot, path.clone()),
            None => inner.state.bitstreams.remove(&slot),
        };
        match params.settings.get("frontend") {
            Some(frontend) => inner.state.frontend.insert(slot, frontend.clone()),
            None => inner.state.frontend.remove(&slot),
        };
        inner.persist()
    }

    fn clear_instrument(&mut self, slot: u8) -> Result<(), DeviceError> {
        let mut inner = self.owned()?;
        let index = inner.state.slot_index(slot)?;
        inner.state.instruments[index] = String::new();
        inner.state.registers.remove(&slot);
        inner.state.bitstreams.remove(&slot);
        inner.state.frontend.remove(&slot);
        inner.persist()
    }

    fn apply_routing(&mut self, connections: &[RawConnection]) -> Result<(), DeviceError> {
        let mut inner = self.owned()?;
        if inner.faults.fail_routing {
            return Err(DeviceError::Rejected("routing configuration rejected".into()));
        }
        inner.state.connections = connections.to_vec();
        inner.persist()
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        let mut inner = self.device.lock()?;
        if inner.state.owner == Some(self.id) {
            inner.state.owner = None;
            inner.persist()?;
            debug!(session = self.id, "simulated session released");
        }
        Ok(())
    }

    fn frontend_introspection(&mut self) -> Option<&mut dyn SupportsFrontendIntrospection> {
        let supported = self
            .device
            .lock()
            .map(|inner| !inner.faults.no_frontend_introspection)
            .unwrap_or(false);
        if supported {
            Some(self)
        } else {
            None
        }
    }

    fn control_registers(&mut self) -> Option<&mut dyn SupportsControlRegisters> {
        Some(self)
    }
}

impl SupportsFrontendIntrospection for SimulatedSession {
    fn read_frontend(&mut self, slot: u8) -> Result<serde_json::Value, DeviceError> {
        let inner = self.owned()?;
        if inner.faults.broken_frontend_introspection {
            return Err(DeviceError::Rejected("front-end read timed out".into()));
        }
        if inner.state.instrument_in(slot)?.is_empty() {
            return Err(DeviceError::Rejected(format!("slot {slot} is empty")));
        }
        Ok(inner.state.frontend.get(&slot).cloned().unwrap_or_else(|| {
            serde_json::json!({ "impedance": "1MOhm", "coupling": "DC", "attenuation": "0dB" })
        }))
    }

    fn read_output(&mut self, slot: u8) -> Result<serde_json::Value, DeviceError> {
        let inner = self.owned()?;
        if inner.faults.broken_frontend_introspection {
            return Err(DeviceError::Rejected("output read timed out".into()));
        }
        if inner.state.instrument_in(slot)?.is_empty() {
            return Err(DeviceError::Rejected(format!("slot {slot} is empty")));
        }
        Ok(serde_json::json!({ "gain": "0dB" }))
    }
}

impl SupportsControlRegisters for SimulatedSession {
    fn read_control_register(&mut self, slot: u8, index: u8) -> Result<i64, DeviceError> {
        let inner = self.owned()?;
        if InstrumentKind::parse(inner.state.instrument_in(slot)?) != InstrumentKind::CloudCompile {
            return Err(DeviceError::Rejected(format!("slot {slot} has no control registers")));
        }
        Ok(inner
            .state
            .registers
            .get(&slot)
            .and_then(|regs| regs.get(&index))
            .copied()
            .unwrap_or(0))
    }

    fn write_control_register(
        &mut self,
        slot: u8,
        index: u8,
        value: i64,
    ) -> Result<(), DeviceError> {
        let mut inner = self.owned()?;
        if InstrumentKind::parse(inner.state.instrument_in(slot)?) != InstrumentKind::CloudCompile {
            return Err(DeviceError::Rejected(format!("slot {slot} has no control registers")));
        }
        inner.state.registers.entry(slot).or_default().insert(index, value);
        inner.persist()
    }
}
