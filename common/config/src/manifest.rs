// Licensed under the Apache-2.0 license

use crate::{ConfigError, PartitionEntry, PartitionLayout, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Explicit partition list, for builds that do not go through the
/// generated configuration file.
///
/// ```toml
/// metadata_address = 0x10000
///
/// [[partition]]
/// name = "firmware_loader"
/// address = 0x8f000
/// size = 0x8000
///
/// [[partition]]
/// name = "softdevice"
/// present = false
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PartitionManifest {
    pub metadata_address: Option<u32>,
    #[serde(rename = "partition", default)]
    pub partitions: Vec<PartitionEntry>,
}

impl PartitionManifest {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Self::parse(text, Path::new("<memory>"))
    }

    fn parse(text: &str, path: &Path) -> Result<Self> {
        let manifest: Self = toml::from_str(text).map_err(|e| ConfigError::Manifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        for entry in manifest.partitions.iter().filter(|e| e.present) {
            if entry.address.checked_add(entry.size).is_none() {
                return Err(ConfigError::RegionOverflow {
                    key: entry.name.clone(),
                    start: entry.address,
                    size: entry.size,
                });
            }
        }
        Ok(manifest)
    }

    pub fn layout(&self) -> PartitionLayout {
        PartitionLayout {
            entries: self.partitions.clone(),
            installer: None,
        }
    }
}
