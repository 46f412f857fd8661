//! Hardware platform descriptors.
//!
//! A [`Platform`] describes one physical product variant: how many slots it has, which
//! physical ports it exposes and which port suffixes a slot may carry. The slot-port
//! grammar (`Slot{n}{suffix}`) is driven entirely by the suffix lists stored here, so
//! adding a variant never requires touching the validator.

use serde::{Deserialize, Serialize};

use crate::error::{MokuError, MokuResult};

/// Immutable descriptor of a hardware variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    /// Display name (e.g. "Moku:Go")
    pub name: String,
    /// Numeric id passed to the device control API on connect
    #[serde(default = "default_platform_id")]
    pub platform_id: u8,
    /// Fabric clock rate in MHz
    pub clock_mhz: f64,
    /// Number of reconfigurable slots
    pub slots: u8,
    #[serde(default)]
    pub analog_inputs: Vec<String>,
    #[serde(default)]
    pub analog_outputs: Vec<String>,
    #[serde(default)]
    pub digital_inputs: Vec<String>,
    #[serde(default)]
    pub digital_outputs: Vec<String>,
    /// Suffixes of slot input ports, e.g. `InA` for `Slot1InA`
    #[serde(default = "default_slot_inputs")]
    pub slot_inputs: Vec<String>,
    /// Suffixes of slot output ports, e.g. `OutA` for `Slot1OutA`
    #[serde(default = "default_slot_outputs")]
    pub slot_outputs: Vec<String>,
}

// Inline platforms without an explicit id connect as the Go family.
fn default_platform_id() -> u8 {
    2
}

fn default_slot_inputs() -> Vec<String> {
    suffixes("In", 2)
}

fn default_slot_outputs() -> Vec<String> {
    suffixes("Out", 2)
}

fn numbered(prefix: &str, count: usize) -> Vec<String> {
    (1..=count).map(|n| format!("{prefix}{n}")).collect()
}

fn suffixes(prefix: &str, count: usize) -> Vec<String> {
    ['A', 'B', 'C', 'D']
        .iter()
        .take(count)
        .map(|c| format!("{prefix}{c}"))
        .collect()
}

/// The closed set of named presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformPreset {
    MokuGo,
    MokuLab,
    MokuPro,
    MokuDelta,
}

impl PlatformPreset {
    /// All presets, in the order platform ids are probed when connecting blind.
    pub const PROBE_ORDER: [PlatformPreset; 4] = [
        PlatformPreset::MokuGo,
        PlatformPreset::MokuLab,
        PlatformPreset::MokuPro,
        PlatformPreset::MokuDelta,
    ];

    /// Configuration-file key (`moku_go`, ...)
    pub fn key(self) -> &'static str {
        match self {
            PlatformPreset::MokuGo => "moku_go",
            PlatformPreset::MokuLab => "moku_lab",
            PlatformPreset::MokuPro => "moku_pro",
            PlatformPreset::MokuDelta => "moku_delta",
        }
    }

    /// Resolve a preset from its key or display name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim().to_ascii_lowercase();
        Self::PROBE_ORDER.into_iter().find(|preset| {
            preset.key() == wanted || preset.platform().name.to_ascii_lowercase() == wanted
        })
    }

    /// Resolve a preset from the numeric platform id.
    pub fn from_id(platform_id: u8) -> Option<Self> {
        Self::PROBE_ORDER
            .into_iter()
            .find(|preset| preset.platform().platform_id == platform_id)
    }

    /// Build the descriptor for this preset.
    pub fn platform(self) -> Platform {
        match self {
            PlatformPreset::MokuGo => Platform {
                name: "Moku:Go".to_string(),
                platform_id: 2,
                clock_mhz: 31.25,
                slots: 2,
                analog_inputs: numbered("Input", 2),
                analog_outputs: numbered("Output", 2),
                digital_inputs: vec!["DIO".to_string()],
                digital_outputs: vec!["DIO".to_string()],
                slot_inputs: suffixes("In", 2),
                slot_outputs: suffixes("Out", 2),
            },
            PlatformPreset::MokuLab => Platform {
                name: "Moku:Lab".to_string(),
                platform_id: 1,
                clock_mhz: 125.0,
                slots: 2,
                analog_inputs: numbered("Input", 2),
                analog_outputs: numbered("Output", 2),
                digital_inputs: Vec::new(),
                digital_outputs: Vec::new(),
                slot_inputs: suffixes("In", 2),
                slot_outputs: suffixes("Out", 2),
            },
            PlatformPreset::MokuPro => Platform {
                name: "Moku:Pro".to_string(),
                platform_id: 3,
                clock_mhz: 312.5,
                slots: 4,
                analog_inputs: numbered("Input", 4),
                analog_outputs: numbered("Output", 4),
                digital_inputs: Vec::new(),
                digital_outputs: Vec::new(),
                slot_inputs: suffixes("In", 4),
                slot_outputs: suffixes("Out", 4),
            },
            PlatformPreset::MokuDelta => Platform {
                name: "Moku:Delta".to_string(),
                platform_id: 4,
                clock_mhz: 312.5,
                slots: 3,
                analog_inputs: numbered("Input", 8),
                analog_outputs: numbered("Output", 8),
                digital_inputs: vec!["DIO".to_string()],
                digital_outputs: vec!["DIO".to_string()],
                slot_inputs: suffixes("In", 4),
                slot_outputs: suffixes("Out", 4),
            },
        }
    }
}

impl Platform {
    /// Look up a named preset, failing with `UnknownPlatform`.
    pub fn preset(name: &str) -> MokuResult<Platform> {
        PlatformPreset::from_name(name)
            .map(PlatformPreset::platform)
            .ok_or_else(|| MokuError::UnknownPlatform(name.to_string()))
    }

    /// True if `port` is a physical port usable as a routing source.
    pub fn is_physical_source(&self, port: &str) -> bool {
        self.analog_inputs.iter().any(|p| p == port)
            || self.digital_inputs.iter().any(|p| p == port)
    }

    /// True if `port` is a physical port usable as a routing destination.
    pub fn is_physical_destination(&self, port: &str) -> bool {
        self.analog_outputs.iter().any(|p| p == port)
            || self.digital_outputs.iter().any(|p| p == port)
    }

    /// True if `slot` lies within `[1, slots]`.
    pub fn has_slot(&self, slot: u8) -> bool {
        (1..=self.slots).contains(&slot)
    }
}

/// How a document names its platform: a preset key or a full inline descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlatformSpec {
    Named(String),
    Inline(Platform),
}

impl PlatformSpec {
    /// Resolve to a concrete descriptor.
    pub fn resolve(&self) -> MokuResult<Platform> {
        match self {
            PlatformSpec::Named(name) => Platform::preset(name),
            PlatformSpec::Inline(platform) => Ok(platform.clone()),
        }
    }
}
