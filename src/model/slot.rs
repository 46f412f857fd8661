use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::instrument::InstrumentKind;

/// One occupied slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Instrument hosted by the slot
    pub instrument: InstrumentKind,
    /// Compiled bitstream package; required for CloudCompile deployments only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitstream: Option<PathBuf>,
    /// Control register index -> value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_registers: Option<BTreeMap<u8, i64>>,
    /// Instrument-specific options (front-end, waveform output, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl SlotConfig {
    pub fn new(instrument: InstrumentKind) -> Self {
        Self {
            instrument,
            bitstream: None,
            control_registers: None,
            settings: BTreeMap::new(),
        }
    }

    pub fn cloud_compile(bitstream: impl Into<PathBuf>) -> Self {
        Self::new(InstrumentKind::CloudCompile).with_bitstream(bitstream)
    }

    pub fn with_bitstream(mut self, bitstream: impl Into<PathBuf>) -> Self {
        self.bitstream = Some(bitstream.into());
        self
    }

    pub fn with_register(mut self, index: u8, value: i64) -> Self {
        self.control_registers
            .get_or_insert_with(BTreeMap::new)
            .insert(index, value);
        self
    }

    pub fn with_setting(mut self, key: &str, value: serde_json::Value) -> Self {
        self.settings.insert(key.to_string(), value);
        self
    }

    /// True when a non-empty bitstream reference is present.
    pub fn has_bitstream(&self) -> bool {
        self.bitstream
            .as_ref()
            .is_some_and(|path| !path.as_os_str().is_empty())
    }
}
