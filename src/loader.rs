//! Reading configuration documents and device snapshots.
//!
//! Documents are YAML (`.yaml`, `.yml`) or JSON (anything else) with top-level
//! `platform`, `slots`, `routing` and `metadata` keys. `platform` is either a preset
//! key such as `moku_go` or a full inline descriptor. Unknown keys are ignored.
//!
//! Relative bitstream paths are resolved against the directory containing the
//! document, so a configuration can be loaded from any working directory.

use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{MokuError, MokuResult};
use crate::model::{
    Configuration, ConfigurationView, DesiredConfiguration, Metadata, MokuConnection,
    ObservedConfiguration, SlotConfig,
};
use crate::platform::{PlatformPreset, PlatformSpec};

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    platform: PlatformSpec,
    #[serde(default)]
    slots: BTreeMap<i64, SlotConfig>,
    #[serde(default)]
    routing: Vec<MokuConnection>,
    #[serde(default)]
    metadata: Metadata,
}

/// Text format of a document, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                DocumentFormat::Yaml
            }
            _ => DocumentFormat::Json,
        }
    }
}

/// Parse a document from text.
///
/// `base_dir`, when given, anchors relative bitstream paths.
pub fn parse_configuration(
    text: &str,
    format: DocumentFormat,
    base_dir: Option<&Path>,
) -> MokuResult<Configuration> {
    let document: ConfigDocument = match format {
        DocumentFormat::Yaml => serde_yaml::from_str(text)?,
        DocumentFormat::Json => serde_json::from_str(text)?,
    };

    let mut slots = BTreeMap::new();
    let mut unaddressable_slots = Vec::new();
    for (key, slot_config) in document.slots {
        match u8::try_from(key) {
            Ok(slot) => {
                slots.insert(slot, slot_config);
            }
            Err(_) => unaddressable_slots.push(key),
        }
    }
    if let Some(base) = base_dir {
        for slot in slots.values_mut() {
            if let Some(bitstream) = slot.bitstream.as_mut() {
                if bitstream.is_relative() && !bitstream.as_os_str().is_empty() {
                    *bitstream = base.join(&*bitstream);
                }
            }
        }
    }

    Ok(Configuration {
        platform: document.platform.resolve()?,
        slots,
        routing: document.routing,
        metadata: document.metadata,
        unaddressable_slots,
    })
}

/// Load a configuration document without validating it.
///
/// # Errors
///
/// `MokuError::Load` when the file cannot be read or parsed, and
/// `MokuError::UnknownPlatform` for an unrecognized preset name.
pub fn load_configuration(path: &Path) -> MokuResult<Configuration> {
    let mut config = read_document(path)?;
    config.metadata.stamp("loaded_at", "config_file");
    config
        .metadata
        .insert("source_path", path.display().to_string());
    debug!(
        path = %path.display(),
        slots = config.slots.len(),
        routes = config.routing.len(),
        "loaded configuration"
    );
    Ok(config)
}

/// Load a configuration and validate it for deployment.
pub fn load_desired(path: &Path) -> MokuResult<DesiredConfiguration> {
    DesiredConfiguration::new(load_configuration(path)?)
}

/// Load a snapshot previously written by a device read.
pub fn load_snapshot(path: &Path) -> MokuResult<ObservedConfiguration> {
    Ok(ObservedConfiguration::new(read_document(path)?))
}

fn read_document(path: &Path) -> MokuResult<Configuration> {
    let text = fs::read_to_string(path).map_err(|e| MokuError::Load {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let base_dir = path.parent().filter(|dir| !dir.as_os_str().is_empty());
    parse_configuration(&text, DocumentFormat::from_path(path), base_dir).map_err(|e| match e {
        MokuError::UnknownPlatform(_) => e,
        other => MokuError::Load {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    })
}

/// Bitstreams referenced by `config` that do not exist on disk, as `(slot, path)`.
pub fn missing_bitstreams<C: ConfigurationView + ?Sized>(config: &C) -> Vec<(u8, PathBuf)> {
    config
        .slots()
        .iter()
        .filter_map(|(&slot, slot_config)| {
            let path = slot_config.bitstream.as_ref()?;
            (!path.as_os_str().is_empty() && !path.exists()).then(|| (slot, path.clone()))
        })
        .collect()
}

/// Fail on the first missing bitstream, or only warn when `warn_only` is set.
///
/// # Errors
///
/// `MokuError::BitstreamNotFound` for the lowest-numbered slot with a missing file.
pub fn check_bitstreams<C: ConfigurationView + ?Sized>(
    config: &C,
    warn_only: bool,
) -> MokuResult<()> {
    let missing = missing_bitstreams(config);
    for (slot, path) in &missing {
        warn!(slot, path = %path.display(), "bitstream not found");
    }
    match missing.into_iter().next() {
        Some((slot, path)) if !warn_only => Err(MokuError::BitstreamNotFound { slot, path }),
        _ => Ok(()),
    }
}

/// A minimal Moku:Go configuration deploying one bitstream.
///
/// The slot's two outputs are routed to the two physical outputs.
pub fn single_bitstream(
    slot: u8,
    bitstream: &Path,
    target: &str,
) -> MokuResult<DesiredConfiguration> {
    let bitstream = if bitstream.is_relative() {
        std::env::current_dir()?.join(bitstream)
    } else {
        bitstream.to_path_buf()
    };

    let mut config = Configuration::new(PlatformPreset::MokuGo.platform())
        .with_slot(slot, SlotConfig::cloud_compile(bitstream))
        .with_connection(MokuConnection::new(format!("Slot{slot}OutA"), "Output1"))
        .with_connection(MokuConnection::new(format!("Slot{slot}OutB"), "Output2"));
    config.metadata.insert("deployed_at", Utc::now().to_rfc3339());
    config.metadata.insert("target_ip", target);
    DesiredConfiguration::new(config)
}
