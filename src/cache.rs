//! Cache of known devices.
//!
//! The cache is an explicit value with a `load -> mutate -> save` lifecycle; callers
//! pass it to the operations that need it. It is keyed by IP address and persisted as
//! pretty-printed JSON, by default at `~/.moku-deploy/device_cache.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{MokuError, MokuResult};

/// One known device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub zeroconf_name: Option<String>,
    #[serde(default)]
    pub canonical_name: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    pub last_seen: DateTime<Utc>,
}

fn default_port() -> u16 {
    80
}

impl DeviceInfo {
    pub fn new(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            port: default_port(),
            zeroconf_name: None,
            canonical_name: None,
            serial_number: None,
            last_seen: Utc::now(),
        }
    }

    /// Name for display, falling back to the IP address.
    pub fn display_name(&self) -> &str {
        self.canonical_name.as_deref().unwrap_or(&self.ip)
    }

    fn matches(&self, identifier: &str) -> bool {
        self.ip == identifier
            || self
                .canonical_name
                .as_deref()
                .is_some_and(|name| name.eq_ignore_ascii_case(identifier))
            || self.serial_number.as_deref() == Some(identifier)
            || self.zeroconf_name.as_deref() == Some(identifier)
    }
}

/// Devices keyed by IP address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceCache {
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceInfo>,
}

impl DeviceCache {
    /// `~/.moku-deploy/device_cache.json`, or a relative path when no home directory
    /// is known.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_default()
            .join(".moku-deploy")
            .join("device_cache.json")
    }

    /// Load the cache from `path`.
    ///
    /// A missing file is an empty cache. An unreadable or corrupt file is also treated
    /// as empty, with a warning, so a damaged cache never blocks a deployment.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "no device cache yet");
            return Self::default();
        }
        let parsed = fs::read_to_string(path)
            .map_err(MokuError::from)
            .and_then(|text| serde_json::from_str::<DeviceCache>(&text).map_err(MokuError::from));
        match parsed {
            Ok(cache) => cache,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not load device cache");
                Self::default()
            }
        }
    }

    /// Write the cache to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> MokuResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!(path = %path.display(), devices = self.devices.len(), "saved device cache");
        Ok(())
    }

    /// Insert or replace a device, keyed by IP.
    pub fn add_device(&mut self, device: DeviceInfo) {
        self.devices.insert(device.ip.clone(), device);
    }

    /// Remove the device matching `identifier`, returning it.
    pub fn remove(&mut self, identifier: &str) -> Option<DeviceInfo> {
        let ip = self.find_by_identifier(identifier)?.ip.clone();
        self.devices.remove(&ip)
    }

    /// Look a device up by IP, name (case-insensitive), serial number or zeroconf name.
    pub fn find_by_identifier(&self, identifier: &str) -> Option<&DeviceInfo> {
        let identifier = identifier.trim();
        self.devices
            .get(identifier)
            .or_else(|| self.devices.values().find(|device| device.matches(identifier)))
    }

    /// Resolve `identifier` to an IP address.
    ///
    /// # Errors
    ///
    /// `MokuError::UnknownDevice` when the identifier is neither cached nor an IPv4
    /// address.
    pub fn resolve_address(&self, identifier: &str) -> MokuResult<String> {
        if let Some(device) = self.find_by_identifier(identifier) {
            return Ok(device.ip.clone());
        }
        let trimmed = identifier.trim();
        if trimmed.parse::<Ipv4Addr>().is_ok() {
            return Ok(trimmed.to_string());
        }
        Err(MokuError::UnknownDevice(identifier.to_string()))
    }
}

/// Render the time since `then` as `Ns ago`, `Nm ago`, `Nh ago` or `Nd ago`.
pub fn humanize_since(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds().max(0);
    match seconds {
        s if s < 60 => format!("{s}s ago"),
        s if s < 3_600 => format!("{}m ago", s / 60),
        s if s < 86_400 => format!("{}h ago", s / 3_600),
        s => format!("{}d ago", s / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn lilo() -> DeviceInfo {
        DeviceInfo {
            canonical_name: Some("Lilo".into()),
            serial_number: Some("MG106B".into()),
            zeroconf_name: Some("Lilo._moku._tcp.local.".into()),
            ..DeviceInfo::new("192.168.1.100")
        }
    }

    #[test]
    fn test_lookup_by_every_identifier() {
        let mut cache = DeviceCache::default();
        cache.add_device(lilo());

        for id in ["192.168.1.100", "lilo", "LILO", "MG106B", "Lilo._moku._tcp.local."] {
            assert_eq!(
                cache.find_by_identifier(id).map(|d| d.ip.as_str()),
                Some("192.168.1.100"),
                "{id}"
            );
        }
        assert!(cache.find_by_identifier("Stitch").is_none());
    }

    #[test]
    fn test_resolve_address() {
        let mut cache = DeviceCache::default();
        cache.add_device(lilo());

        assert_eq!(cache.resolve_address("Lilo").unwrap(), "192.168.1.100");
        assert_eq!(cache.resolve_address("10.0.0.7").unwrap(), "10.0.0.7");
        assert!(matches!(
            cache.resolve_address("Stitch"),
            Err(MokuError::UnknownDevice(_))
        ));
        assert!(cache.resolve_address("10.0.0").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("device_cache.json");

        let mut cache = DeviceCache::default();
        cache.add_device(lilo());
        cache.save(&path).unwrap();

        let loaded = DeviceCache::load(&path);
        assert_eq!(loaded, cache);
    }

    #[test]
    fn test_corrupt_cache_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("device_cache.json");
        fs::write(&path, "not json").unwrap();

        assert!(DeviceCache::load(&path).devices.is_empty());
        assert!(DeviceCache::load(&dir.path().join("absent.json")).devices.is_empty());
    }

    #[test]
    fn test_remove_by_name() {
        let mut cache = DeviceCache::default();
        cache.add_device(lilo());
        assert_eq!(cache.remove("lilo").map(|d| d.ip), Some("192.168.1.100".to_string()));
        assert!(cache.devices.is_empty());
        assert!(cache.remove("lilo").is_none());
    }

    #[test]
    fn test_humanize_since() {
        let now = Utc::now();
        assert_eq!(humanize_since(now - Duration::seconds(42), now), "42s ago");
        assert_eq!(humanize_since(now - Duration::minutes(5), now), "5m ago");
        assert_eq!(humanize_since(now - Duration::hours(3), now), "3h ago");
        assert_eq!(humanize_since(now - Duration::days(9), now), "9d ago");
        assert_eq!(humanize_since(now + Duration::seconds(5), now), "0s ago");
    }
}
