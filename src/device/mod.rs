//! Device control API.
//!
//! These traits are the seam between the reconciliation engine and the vendor SDK.
//! Every call is blocking; the engine never issues overlapping calls and performs no
//! retries. Read-back of instrument settings is modelled as optional capability
//! traits: a session that cannot introspect front-ends simply returns `None` from
//! [`DeviceSession::frontend_introspection`], which the state retriever records as
//! "not supported" rather than as an error.
//!
//! [`SimulatedDevice`] implements the API in memory (optionally persisted to a JSON
//! file) and backs both the CLI and the test-suite.

mod sim;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::DeviceError;
use crate::model::{InstrumentKind, MokuConnection, SlotConfig};

pub use sim::{SimulatedDevice, SimulatedSession, SimulatedState};

/// Number of user control registers exposed by a CloudCompile slot.
pub const CONTROL_REGISTER_COUNT: u8 = 32;

/// A connection as reported by the device, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawConnection {
    pub source: String,
    pub destination: String,
}

impl RawConnection {
    pub fn new(source: &str, destination: &str) -> Self {
        Self {
            source: source.to_string(),
            destination: destination.to_string(),
        }
    }
}

impl From<&MokuConnection> for RawConnection {
    fn from(conn: &MokuConnection) -> Self {
        Self::new(conn.source.as_str(), conn.destination.as_str())
    }
}

/// Parameters handed to the device when instantiating an instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentParams {
    pub bitstream: Option<PathBuf>,
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl From<&SlotConfig> for InstrumentParams {
    fn from(slot: &SlotConfig) -> Self {
        Self {
            bitstream: slot.bitstream.clone(),
            settings: slot.settings.clone(),
        }
    }
}

/// Opens control sessions on a device.
pub trait DeviceControl {
    type Session: DeviceSession;

    /// Connect to the device at `address`.
    ///
    /// # Errors
    ///
    /// `DeviceError::Busy` when another session owns the device and `force` is false.
    /// With `force`, the existing owner is disconnected.
    fn connect(
        &self,
        address: &str,
        platform_id: u8,
        force: bool,
    ) -> Result<Self::Session, DeviceError>;
}

/// An open, single-writer control session.
pub trait DeviceSession {
    /// One entry per slot; an empty string marks an unoccupied slot.
    fn list_instruments(&mut self) -> Result<Vec<String>, DeviceError>;

    fn list_connections(&mut self) -> Result<Vec<RawConnection>, DeviceError>;

    fn apply_instrument(
        &mut self,
        slot: u8,
        kind: &InstrumentKind,
        params: &InstrumentParams,
    ) -> Result<(), DeviceError>;

    fn clear_instrument(&mut self, slot: u8) -> Result<(), DeviceError>;

    /// Replace the full routing set.
    fn apply_routing(&mut self, connections: &[RawConnection]) -> Result<(), DeviceError>;

    fn release(&mut self) -> Result<(), DeviceError>;

    fn frontend_introspection(&mut self) -> Option<&mut dyn SupportsFrontendIntrospection> {
        None
    }

    fn control_registers(&mut self) -> Option<&mut dyn SupportsControlRegisters> {
        None
    }
}

/// Read-back of front-end and output settings.
pub trait SupportsFrontendIntrospection {
    fn read_frontend(&mut self, slot: u8) -> Result<serde_json::Value, DeviceError>;

    fn read_output(&mut self, slot: u8) -> Result<serde_json::Value, DeviceError>;
}

/// Access to user control registers.
pub trait SupportsControlRegisters {
    fn read_control_register(&mut self, slot: u8, index: u8) -> Result<i64, DeviceError>;

    fn write_control_register(&mut self, slot: u8, index: u8, value: i64)
        -> Result<(), DeviceError>;
}
