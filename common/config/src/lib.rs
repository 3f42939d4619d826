// Licensed under the Apache-2.0 license

//! Typed build configuration for the metadata generators.
//!
//! The build system emits a flat text file, either Kconfig style
//! (`SB_CONFIG_FOO=0x1000`) or a generated header (`#define foo 0x1000`).
//! [`BuildConfig`] extracts the raw key/value pairs and [`PartitionLayout`]
//! turns them into a validated layout up front, so a missing or malformed
//! key is reported before anything is written.

mod manifest;

pub use manifest::PartitionManifest;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Partitions described by the metadata table, in embedding order.
pub const DEFAULT_PARTITIONS: &[&str] = &["firmware_loader", "softdevice"];

/// The metadata table is placed right after this partition by default.
pub const INSTALLER_PARTITION: &str = "installer";

const KCONFIG_PREFIXES: &[&str] = &["CONFIG_", "SB_CONFIG_"];
const DEFINE_PREFIX: &str = "#define";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read configuration file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed configuration line {line} in {path}: {text:?}")]
    MalformedLine {
        path: PathBuf,
        line: usize,
        text: String,
    },
    #[error("Missing configuration key {key}")]
    MissingKey { key: String },
    #[error("Invalid value {value:?} for {key}: expected a hexadecimal integer")]
    InvalidHex { key: String, value: String },
    #[error("Region {key} at 0x{start:x} with size 0x{size:x} exceeds the 32-bit address space")]
    RegionOverflow { key: String, start: u32, size: u32 },
    #[error("Invalid partition manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Raw key/value pairs extracted from a build configuration file.
#[derive(Debug, Default, Clone)]
pub struct BuildConfig {
    values: BTreeMap<String, String>,
}

impl BuildConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        Self::parse(text, Path::new("<memory>"))
    }

    fn parse(text: &str, path: &Path) -> Result<Self> {
        let mut values = BTreeMap::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim_end();
            let malformed = || ConfigError::MalformedLine {
                path: path.to_path_buf(),
                line: index + 1,
                text: line.to_string(),
            };
            if let Some(rest) = line.strip_prefix(DEFINE_PREFIX) {
                // "#define KEY value"; "#defineX" is not a define.
                if !rest.starts_with(char::is_whitespace) {
                    continue;
                }
                let rest = rest.trim();
                if rest.is_empty() {
                    return Err(malformed());
                }
                // A bare "#define KEY" is a presence marker.
                let (key, value) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                values.insert(key.to_string(), value.trim().to_string());
            } else if KCONFIG_PREFIXES.iter().any(|p| line.starts_with(p)) {
                let (key, value) = line.split_once('=').ok_or_else(malformed)?;
                values.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Ok(Self { values })
    }

    /// Looks `key` up verbatim, then with the Kconfig prefixes prepended.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .or_else(|| {
                KCONFIG_PREFIXES
                    .iter()
                    .find_map(|p| self.values.get(&format!("{p}{key}")))
            })
            .map(String::as_str)
    }

    /// A presence marker counts whenever the key is defined, whatever its value.
    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn hex(&self, key: &str) -> Result<Option<u32>> {
        self.get(key).map(|value| parse_hex(key, value)).transpose()
    }

    pub fn require_hex(&self, key: &str) -> Result<u32> {
        self.hex(key)?.ok_or_else(|| ConfigError::MissingKey {
            key: key.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Parses a hexadecimal integer as emitted by the build system. The `0x`
/// prefix and C integer suffixes (`U`, `UL`) are optional.
pub fn parse_hex(key: &str, value: &str) -> Result<u32> {
    let invalid = || ConfigError::InvalidHex {
        key: key.to_string(),
        value: value.to_string(),
    };
    let trimmed = value.trim().trim_matches('"');
    let trimmed = trimmed.trim_end_matches(['u', 'U', 'l', 'L']);
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if !digits.starts_with(|c: char| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    u32::from_str_radix(digits, 16).map_err(|_| invalid())
}

/// A contiguous region of flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: u32,
    pub size: u32,
}

impl Region {
    /// First address past the region, if it is addressable.
    pub fn end(&self) -> Option<u32> {
        self.start.checked_add(self.size)
    }
}

/// One sub-image location. `address` and `size` are only meaningful when
/// `present` is set; absent entries are left out of the serialized table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PartitionEntry {
    pub name: String,
    #[serde(default)]
    pub address: u32,
    #[serde(default)]
    pub size: u32,
    #[serde(default = "default_present")]
    pub present: bool,
}

fn default_present() -> bool {
    true
}

impl PartitionEntry {
    pub fn present(name: impl Into<String>, address: u32, size: u32) -> Self {
        Self {
            name: name.into(),
            address,
            size,
            present: true,
        }
    }

    pub fn absent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: 0,
            size: 0,
            present: false,
        }
    }
}

/// Validated partition layout for one build.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartitionLayout {
    pub entries: Vec<PartitionEntry>,
    pub installer: Option<Region>,
}

impl PartitionLayout {
    /// Resolves each named partition from `config`, in the order given.
    pub fn from_config(config: &BuildConfig, names: &[&str]) -> Result<Self> {
        let entries = names
            .iter()
            .map(|name| {
                if !config.is_set(&format!("{name}_PARTITION_PRESENT")) {
                    return Ok(PartitionEntry::absent(*name));
                }
                let region = read_region(config, name)?;
                Ok(PartitionEntry::present(*name, region.start, region.size))
            })
            .collect::<Result<Vec<_>>>()?;

        let installer = match config.get(&format!("{INSTALLER_PARTITION}_PARTITION_START")) {
            Some(_) => Some(read_region(config, INSTALLER_PARTITION)?),
            None => None,
        };

        Ok(Self { entries, installer })
    }

    pub fn present_entries(&self) -> impl Iterator<Item = &PartitionEntry> {
        self.entries.iter().filter(|e| e.present)
    }
}

fn read_region(config: &BuildConfig, name: &str) -> Result<Region> {
    let start_key = format!("{name}_PARTITION_START");
    let start = config.require_hex(&start_key)?;
    let size = config.require_hex(&format!("{name}_PARTITION_SIZE"))?;
    let region = Region { start, size };
    if region.end().is_none() {
        return Err(ConfigError::RegionOverflow {
            key: start_key,
            start,
            size,
        });
    }
    Ok(region)
}
