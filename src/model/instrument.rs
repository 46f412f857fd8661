//! Instrument kinds and their per-kind handler records.
//!
//! Every behaviour that depends on the kind of instrument in a slot (does it need a
//! bitstream, which slot ports does it expose, what can be read back from it) lives in
//! a single [`KindSpec`] resolved once through [`InstrumentKind::spec`], instead of
//! being re-derived from the instrument name wherever it is needed.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::platform::Platform;

/// The instrument hosted by a slot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InstrumentKind {
    /// User logic loaded from a compiled bitstream
    CloudCompile,
    Oscilloscope,
    WaveformGenerator,
    SpectrumAnalyzer,
    PidController,
    LockInAmp,
    /// Reported by a device but not known to this crate
    Unknown(String),
}

/// Read-back capabilities an instrument kind may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Front-end (impedance, coupling, attenuation) and output settings
    FrontendIntrospection,
    /// User control registers CR0..CR31
    ControlRegisters,
}

/// Which of the platform's slot-port suffixes a kind exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortExposure {
    /// Every suffix the platform defines
    All,
    /// Only the first `n` suffixes in platform order
    First(usize),
}

impl PortExposure {
    fn admits(self, suffixes: &[String], suffix: &str) -> bool {
        let limit = match self {
            PortExposure::All => suffixes.len(),
            PortExposure::First(n) => n.min(suffixes.len()),
        };
        suffixes[..limit].iter().any(|s| s == suffix)
    }
}

/// Per-kind handler record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSpec {
    pub requires_bitstream: bool,
    pub inputs: PortExposure,
    pub outputs: PortExposure,
    pub capabilities: &'static [Capability],
}

const CLOUD_COMPILE: KindSpec = KindSpec {
    requires_bitstream: true,
    inputs: PortExposure::All,
    outputs: PortExposure::All,
    capabilities: &[Capability::ControlRegisters],
};

const OSCILLOSCOPE: KindSpec = KindSpec {
    requires_bitstream: false,
    inputs: PortExposure::First(2),
    outputs: PortExposure::First(2),
    capabilities: &[Capability::FrontendIntrospection],
};

const FRONTEND_INSTRUMENT: KindSpec = KindSpec {
    requires_bitstream: false,
    inputs: PortExposure::All,
    outputs: PortExposure::All,
    capabilities: &[Capability::FrontendIntrospection],
};

const OPAQUE: KindSpec = KindSpec {
    requires_bitstream: false,
    inputs: PortExposure::All,
    outputs: PortExposure::All,
    capabilities: &[],
};

impl InstrumentKind {
    /// Every kind known to this crate.
    pub const KNOWN: [InstrumentKind; 6] = [
        InstrumentKind::CloudCompile,
        InstrumentKind::Oscilloscope,
        InstrumentKind::WaveformGenerator,
        InstrumentKind::SpectrumAnalyzer,
        InstrumentKind::PidController,
        InstrumentKind::LockInAmp,
    ];

    pub fn name(&self) -> &str {
        match self {
            InstrumentKind::CloudCompile => "CloudCompile",
            InstrumentKind::Oscilloscope => "Oscilloscope",
            InstrumentKind::WaveformGenerator => "WaveformGenerator",
            InstrumentKind::SpectrumAnalyzer => "SpectrumAnalyzer",
            InstrumentKind::PidController => "PIDController",
            InstrumentKind::LockInAmp => "LockInAmp",
            InstrumentKind::Unknown(name) => name,
        }
    }

    /// Parse a device or document spelling. Never fails; unrecognised names become
    /// `Unknown`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        Self::KNOWN
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(trimmed))
            .unwrap_or_else(|| InstrumentKind::Unknown(trimmed.to_string()))
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, InstrumentKind::Unknown(_))
    }

    pub fn spec(&self) -> KindSpec {
        match self {
            InstrumentKind::CloudCompile => CLOUD_COMPILE,
            InstrumentKind::Oscilloscope => OSCILLOSCOPE,
            InstrumentKind::WaveformGenerator
            | InstrumentKind::SpectrumAnalyzer
            | InstrumentKind::PidController
            | InstrumentKind::LockInAmp => FRONTEND_INSTRUMENT,
            InstrumentKind::Unknown(_) => OPAQUE,
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.spec().capabilities.contains(&capability)
    }

    /// True if a slot hosting this kind on `platform` has an input port `suffix`.
    pub fn exposes_input(&self, platform: &Platform, suffix: &str) -> bool {
        self.spec().inputs.admits(&platform.slot_inputs, suffix)
    }

    /// True if a slot hosting this kind on `platform` has an output port `suffix`.
    pub fn exposes_output(&self, platform: &Platform, suffix: &str) -> bool {
        self.spec().outputs.admits(&platform.slot_outputs, suffix)
    }
}

impl From<String> for InstrumentKind {
    fn from(raw: String) -> Self {
        InstrumentKind::parse(&raw)
    }
}

impl From<InstrumentKind> for String {
    fn from(kind: InstrumentKind) -> Self {
        kind.name().to_string()
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
