// Licensed under the Apache-2.0 license

//! Partition metadata table.
//!
//! ```text
//! +-------+------------------+---------------------------+----------+
//! | count | 31 reserved (0)  | count x 64 byte entries   | CRC-32   |
//! +-------+------------------+---------------------------+----------+
//! ```
//!
//! Each entry is the partition's load address and size (little-endian)
//! followed by 56 reserved bytes. The CRC-32 covers everything before it.

use crate::container::{persist_outputs, FlashContainer};
use crate::error::{Result, TrustError};
use crc32fast::Hasher;
use flash_image::{
    metadata_table_size, MetadataEntry, MetadataHeader, MetadataTrailer, MetadataView,
    MAX_METADATA_ENTRIES, METADATA_HEADER_SIZE,
};
use fw_trust_config::{PartitionLayout, INSTALLER_PARTITION};
use log::{debug, info};
use std::path::Path;
use zerocopy::IntoBytes;

pub use fw_trust_config::PartitionEntry;

pub fn calculate_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// A serialized, checksummed table. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataTable {
    entries: Vec<PartitionEntry>,
    checksum: u32,
    bytes: Vec<u8>,
}

impl MetadataTable {
    /// Serializes the present entries in order. Absent entries are skipped.
    pub fn build<'a>(entries: impl IntoIterator<Item = &'a PartitionEntry>) -> Result<Self> {
        let entries: Vec<PartitionEntry> = entries
            .into_iter()
            .filter(|e| e.present)
            .cloned()
            .collect();
        let count = u8::try_from(entries.len()).map_err(|_| {
            TrustError::config(
                "partitions",
                format!(
                    "{} present partitions, at most {MAX_METADATA_ENTRIES} fit in the table",
                    entries.len()
                ),
            )
        })?;

        let mut bytes = Vec::with_capacity(metadata_table_size(entries.len()));
        bytes.extend_from_slice(MetadataHeader::new(count).as_bytes());
        for entry in &entries {
            bytes.extend_from_slice(MetadataEntry::new(entry.address, entry.size).as_bytes());
        }
        let checksum = calculate_checksum(&bytes);
        bytes.extend_from_slice(MetadataTrailer::new(checksum).as_bytes());

        Ok(Self {
            entries,
            checksum,
            bytes,
        })
    }

    /// Reads a table back, checking its length and checksum. Partition names
    /// are not stored on flash, so parsed entries carry empty names.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let view = MetadataView::parse(bytes).ok_or_else(|| {
            TrustError::parse(
                "<metadata>",
                format!("{} bytes is too short for the advertised entry count", bytes.len()),
            )
        })?;
        let expected = view.trailer.checksum.get();
        let actual = calculate_checksum(view.checksummed_bytes());
        if expected != actual {
            return Err(TrustError::ChecksumMismatch { expected, actual });
        }
        let entries = view
            .entries
            .iter()
            .map(|e| PartitionEntry::present("", e.address.get(), e.size.get()))
            .collect();
        Ok(Self {
            entries,
            checksum: actual,
            bytes: bytes[..view.len()].to_vec(),
        })
    }

    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }

    pub fn entry_count(&self) -> u8 {
        self.bytes[0]
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

/// Where the table goes in flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataPlacement {
    Fixed(u32),
    /// Immediately after the installer partition.
    AfterInstaller,
}

pub fn resolve_placement(placement: MetadataPlacement, layout: &PartitionLayout) -> Result<u32> {
    match placement {
        MetadataPlacement::Fixed(address) => Ok(address),
        MetadataPlacement::AfterInstaller => {
            let installer = layout.installer.ok_or_else(|| {
                TrustError::config(
                    format!("{INSTALLER_PARTITION}_PARTITION_START"),
                    "required to place the metadata after the installer",
                )
            })?;
            installer.end().ok_or_else(|| {
                TrustError::config(
                    format!("{INSTALLER_PARTITION}_PARTITION_SIZE"),
                    "installer partition ends past the 32-bit address space",
                )
            })
        }
    }
}

pub struct MetadataRequest<'a> {
    pub layout: &'a PartitionLayout,
    pub placement: MetadataPlacement,
    pub output: &'a Path,
}

#[derive(Debug, Clone)]
pub struct GeneratedMetadata {
    pub table: MetadataTable,
    pub address: u32,
    pub container: FlashContainer,
}

/// Builds the table for `request.layout` and writes it as an Intel Hex file
/// holding only the table at the resolved address.
pub fn generate_metadata(request: &MetadataRequest) -> Result<GeneratedMetadata> {
    let address = resolve_placement(request.placement, request.layout)?;
    let table = MetadataTable::build(&request.layout.entries)?;
    for entry in table.entries() {
        debug!("{}: 0x{:08x} + 0x{:x}", entry.name, entry.address, entry.size);
    }
    let container = FlashContainer::from_binary(table.as_bytes(), address)?;
    let hex = container.to_hex_string()?;
    persist_outputs(&[(request.output, hex.as_bytes())])?;
    info!(
        "Wrote {} partition metadata entries at 0x{address:08x} to {}",
        table.entry_count(),
        request.output.display()
    );
    Ok(GeneratedMetadata {
        table,
        address,
        container,
    })
}

/// Reads and checks the table stored at `address` in `container`.
pub fn metadata_verify(container: &FlashContainer, address: u32) -> Result<MetadataTable> {
    let header = container.read(address, METADATA_HEADER_SIZE).ok_or_else(|| {
        TrustError::parse("<metadata>", format!("no metadata header at 0x{address:08x}"))
    })?;
    let size = metadata_table_size(header[0] as usize);
    let bytes = container.read(address, size).ok_or_else(|| {
        TrustError::parse(
            "<metadata>",
            format!("metadata at 0x{address:08x} is shorter than {size} bytes"),
        )
    })?;
    MetadataTable::parse(bytes)
}
