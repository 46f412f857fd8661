//! The configuration aggregate and its two flavours.
//!
//! A [`Configuration`] is plain data. It becomes trusted only by wrapping it:
//!
//! - [`DesiredConfiguration`] is validated for deployment and occupies at least one
//!   slot. It is the target handed to the differ and the executor.
//! - [`ObservedConfiguration`] is whatever the device reported. An idle device has no
//!   occupied slots, which is valid here and nowhere else.
//!
//! Both are immutable and exposed to the differ through [`ConfigurationView`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::port::MokuConnection;
use super::slot::SlotConfig;
use crate::error::{MokuError, MokuResult};
use crate::platform::Platform;
use crate::validate::{validate, ValidationPurpose};

/// Free-form provenance attached to a configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(pub BTreeMap<String, serde_json::Value>);

impl Metadata {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Record when and where this configuration came from. Existing keys supplied by
    /// the document itself are kept.
    pub fn stamp(&mut self, timestamp_key: &str, origin: &str) {
        self.0
            .entry(timestamp_key.to_string())
            .or_insert_with(|| Utc::now().to_rfc3339().into());
        self.0
            .entry("origin".to_string())
            .or_insert_with(|| origin.into());
    }
}

/// Unvalidated configuration data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub platform: Platform,
    #[serde(default)]
    pub slots: BTreeMap<u8, SlotConfig>,
    #[serde(default)]
    pub routing: Vec<MokuConnection>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Slot keys from a document that cannot name a slot at all (negative or above
    /// 255). Kept so validation can report them alongside everything else.
    #[serde(skip)]
    pub unaddressable_slots: Vec<i64>,
}

impl Configuration {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            slots: BTreeMap::new(),
            routing: Vec::new(),
            metadata: Metadata::default(),
            unaddressable_slots: Vec::new(),
        }
    }

    pub fn with_slot(mut self, slot: u8, config: SlotConfig) -> Self {
        self.slots.insert(slot, config);
        self
    }

    pub fn with_connection(mut self, connection: MokuConnection) -> Self {
        self.routing.push(connection);
        self
    }

    /// Return a copy whose slot `slot` points at `bitstream`.
    ///
    /// The slot must already be configured; the original is left untouched.
    pub fn with_bitstream_override(
        &self,
        slot: u8,
        bitstream: impl Into<PathBuf>,
    ) -> MokuResult<Self> {
        let mut next = self.clone();
        let entry = next
            .slots
            .get_mut(&slot)
            .ok_or(MokuError::SlotNotConfigured(slot))?;
        entry.bitstream = Some(bitstream.into());
        Ok(next)
    }
}

/// Read-only view shared by desired and observed configurations.
pub trait ConfigurationView {
    fn platform(&self) -> &Platform;
    fn slots(&self) -> &BTreeMap<u8, SlotConfig>;
    fn routing(&self) -> &[MokuConnection];
    fn metadata(&self) -> &Metadata;

    fn unaddressable_slots(&self) -> &[i64] {
        &[]
    }
}

impl ConfigurationView for Configuration {
    fn platform(&self) -> &Platform {
        &self.platform
    }

    fn slots(&self) -> &BTreeMap<u8, SlotConfig> {
        &self.slots
    }

    fn routing(&self) -> &[MokuConnection] {
        &self.routing
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn unaddressable_slots(&self) -> &[i64] {
        &self.unaddressable_slots
    }
}

/// The state an operator wants deployed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DesiredConfiguration(Configuration);

impl DesiredConfiguration {
    /// Validate `config` for deployment.
    ///
    /// # Errors
    ///
    /// Returns `MokuError::Validation` carrying every defect found, including
    /// `NoSlots` when nothing would be deployed.
    pub fn new(config: Configuration) -> MokuResult<Self> {
        let errors = validate(&config, ValidationPurpose::Deploy);
        if errors.is_empty() {
            Ok(Self(config))
        } else {
            Err(MokuError::Validation(errors))
        }
    }

    /// Re-target one slot's bitstream, producing a new validated aggregate.
    pub fn with_bitstream_override(
        &self,
        slot: u8,
        bitstream: impl Into<PathBuf>,
    ) -> MokuResult<Self> {
        Self::new(self.0.with_bitstream_override(slot, bitstream)?)
    }

    pub fn as_configuration(&self) -> &Configuration {
        &self.0
    }

    pub fn into_inner(self) -> Configuration {
        self.0
    }
}

/// The state retrieved from a live device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ObservedConfiguration(Configuration);

impl ObservedConfiguration {
    /// Wrap device-reported data. No slot-count requirement applies.
    pub fn new(config: Configuration) -> Self {
        Self(config)
    }

    /// An idle device on `platform`.
    pub fn empty(platform: Platform) -> Self {
        Self(Configuration::new(platform))
    }

    pub fn as_configuration(&self) -> &Configuration {
        &self.0
    }

    pub fn into_inner(self) -> Configuration {
        self.0
    }
}

macro_rules! delegate_view {
    ($ty:ty) => {
        impl ConfigurationView for $ty {
            fn platform(&self) -> &Platform {
                &self.0.platform
            }

            fn slots(&self) -> &BTreeMap<u8, SlotConfig> {
                &self.0.slots
            }

            fn routing(&self) -> &[MokuConnection] {
                &self.0.routing
            }

            fn metadata(&self) -> &Metadata {
                &self.0.metadata
            }

            fn unaddressable_slots(&self) -> &[i64] {
                &self.0.unaddressable_slots
            }
        }
    };
}

delegate_view!(DesiredConfiguration);
delegate_view!(ObservedConfiguration);
