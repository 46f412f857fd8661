//! Custom error types for the crate.
//!
//! This module defines the primary error type, `MokuError`, together with the
//! structural `ValidationError` and the device-side `DeviceError`. Using the
//! `thiserror` crate, it provides a centralized and consistent way to handle the
//! different failure classes that can occur between loading a configuration and
//! applying it to hardware.
//!
//! ## Error Hierarchy
//!
//! - **`Validation`**: One or more structural defects in a configuration. These are
//!   always collected exhaustively by the validator and surfaced together; a single
//!   `MokuError::Validation` carries the full list.
//! - **`Device`**: Wraps `DeviceError`, the failures reported by the device control
//!   API. `DeviceError::Busy` is the distinguished "another session holds the device"
//!   condition and is recoverable only through a forced takeover.
//! - **`PartialDeployment`**: A device failure after the reconciliation policy had
//!   already decided to proceed. Earlier steps are left in place.
//! - **`Load`**, **`Json`**, **`Yaml`**, **`Io`**: Reading and parsing documents,
//!   snapshots and the device cache.
//! - **`Settings`**: Wraps errors from `figment` while extracting `AppSettings`.
//!
//! A reconciliation abort is deliberately absent from this list: refusing to touch a
//! mismatched device is a successful outcome, modelled as
//! [`crate::policy::Decision::Abort`].

use std::path::PathBuf;
use thiserror::Error;

use crate::model::PortId;

/// Convenience alias for results using the crate error type.
pub type MokuResult<T> = std::result::Result<T, MokuError>;

#[derive(Error, Debug)]
pub enum MokuError {
    #[error("Configuration has {} validation error(s)", .0.len())]
    Validation(Vec<ValidationError>),

    #[error("Unknown platform '{0}'. Available platforms: moku_go, moku_lab, moku_pro, moku_delta")]
    UnknownPlatform(String),

    #[error("Failed to load '{path}': {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("Bitstream for slot {slot} not found: {}", .path.display())]
    BitstreamNotFound { slot: u8, path: PathBuf },

    #[error("Slot {0} is not part of the configuration")]
    SlotNotConfigured(u8),

    #[error("Device '{0}' not found. Add it with 'devices add' or use an IP address")]
    UnknownDevice(String),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error(transparent)]
    PartialDeployment(#[from] PartialDeploymentFailure),

    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),

    #[error("Settings validation error: {0}")]
    SettingsValidation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl MokuError {
    /// True when another session holds the device.
    pub fn is_device_busy(&self) -> bool {
        matches!(self, MokuError::Device(DeviceError::Busy { .. }))
    }
}

impl From<figment::Error> for MokuError {
    fn from(err: figment::Error) -> Self {
        MokuError::Settings(Box::new(err))
    }
}

/// Which side of a routing edge an endpoint sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointRole {
    Source,
    Destination,
}

impl std::fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointRole::Source => f.write_str("source"),
            EndpointRole::Destination => f.write_str("destination"),
        }
    }
}

/// A structural defect in a configuration.
///
/// Validation never stops at the first defect; callers always receive the full list.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Slot {slot} is out of range (platform has {slot_count} slot(s))")]
    SlotOutOfRange { slot: i64, slot_count: u8 },

    #[error("Routing[{index}]: {role} '{endpoint}' does not resolve to a platform port or an occupied slot port")]
    UnknownEndpoint {
        index: usize,
        role: EndpointRole,
        endpoint: PortId,
    },

    #[error("Routing[{index}]: destination '{destination}' is already driven by routing[{first_index}]")]
    DuplicateDestination {
        index: usize,
        first_index: usize,
        destination: PortId,
    },

    #[error("Slot {slot}: CloudCompile requires a bitstream for deployment")]
    MissingBitstream { slot: u8 },

    #[error("Slot {slot}: unknown instrument '{name}'")]
    UnknownInstrument { slot: u8, name: String },

    #[error("Deployment configuration must occupy at least one slot")]
    NoSlots,
}

/// Failures reported by the device control API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Device {address} is busy: a connection already exists (use --force to take over)")]
    Busy { address: String },

    #[error("Device {address} is not reachable")]
    Unreachable { address: String },

    #[error("Device reports platform id {actual}, expected {expected}")]
    PlatformMismatch { expected: u8, actual: u8 },

    #[error("Slot {slot} does not exist on this device")]
    NoSuchSlot { slot: u8 },

    #[error("Device rejected operation: {0}")]
    Rejected(String),

    #[error("Device session is closed")]
    SessionClosed,
}

/// The step of a deployment that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStage {
    /// Removing an instrument the desired state no longer contains.
    ClearSlot(u8),
    /// Instantiating an instrument (and writing its control registers).
    Slot(u8),
    /// Applying the routing set, which always happens last.
    Routing,
}

impl std::fmt::Display for DeployStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeployStage::ClearSlot(slot) => write!(f, "clearing slot {slot}"),
            DeployStage::Slot(slot) => write!(f, "deploying slot {slot}"),
            DeployStage::Routing => f.write_str("applying routing"),
        }
    }
}

/// A device failure after the policy decided to proceed.
///
/// Nothing is rolled back: `applied_slots` lists the slots already deployed when the
/// failure occurred, and they stay on the device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Partial deployment failure while {stage}: {source} (already applied slots: {applied_slots:?})")]
pub struct PartialDeploymentFailure {
    pub stage: DeployStage,
    pub applied_slots: Vec<u8>,
    pub source: DeviceError,
}
