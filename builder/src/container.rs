// Licensed under the Apache-2.0 license

//! Sparse flash container: byte ranges tagged with absolute load addresses,
//! read from and written to Intel Hex or raw binary files.

use crate::error::{Result, TrustError};
use ihex::Record;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::ops::Range;
use std::path::Path;
use tempfile::NamedTempFile;

/// Bytes per Intel Hex data record.
const HEX_RECORD_LEN: usize = 16;

/// Filler for gaps between segments when flattening to a binary.
pub const ERASED_BYTE: u8 = 0xff;

const ADDRESS_SPACE_END: u64 = 1 << 32;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashContainer {
    segments: BTreeMap<u32, Vec<u8>>,
}

impl FlashContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_binary(bytes: &[u8], base: u32) -> Result<Self> {
        let mut container = Self::new();
        container.insert_segment(base, bytes)?;
        Ok(container)
    }

    pub fn from_hex_str(text: &str) -> Result<Self> {
        Self::decode_hex(text).map_err(|reason| TrustError::parse("<hex>", reason))
    }

    /// Loads `path` as Intel Hex when it has a hex extension, otherwise as a
    /// raw binary based at address zero.
    pub fn load(path: &Path) -> Result<Self> {
        if is_hex_path(path) {
            let text = fs::read_to_string(path).map_err(|e| TrustError::io(path, e))?;
            Self::decode_hex(&text).map_err(|reason| TrustError::parse(path, reason))
        } else {
            let bytes = fs::read(path).map_err(|e| TrustError::io(path, e))?;
            Self::from_binary(&bytes, 0)
        }
    }

    fn decode_hex(text: &str) -> std::result::Result<Self, String> {
        let mut container = Self::new();
        let mut base = 0u32;
        for record in ihex::Reader::new(text) {
            match record.map_err(|e| e.to_string())? {
                Record::Data { offset, value } => {
                    let address = base.wrapping_add(offset as u32);
                    container
                        .insert_segment(address, &value)
                        .map_err(|e| e.to_string())?;
                }
                Record::ExtendedLinearAddress(upper) => base = (upper as u32) << 16,
                Record::ExtendedSegmentAddress(segment) => base = (segment as u32) << 4,
                Record::EndOfFile => break,
                // Entry points are not part of the flash content.
                Record::StartLinearAddress(_) | Record::StartSegmentAddress { .. } => {}
            }
        }
        Ok(container)
    }

    /// Adds `data` at `address`, merging with adjacent segments. Fails if any
    /// byte of the new range is already occupied.
    pub fn insert_segment(&mut self, address: u32, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let start = address as u64;
        let end = start + data.len() as u64;
        if end > ADDRESS_SPACE_END {
            return Err(TrustError::config(
                "address",
                format!(
                    "{} bytes at 0x{address:08x} extend past the 32-bit address space",
                    data.len()
                ),
            ));
        }
        if let Some(range) = self.occupied_ranges().find(|r| r.start < end && start < r.end) {
            return Err(TrustError::Overlap {
                offset: address,
                len: data.len(),
                start: range.start,
                end: range.end,
            });
        }

        let mut base = address;
        let mut merged = data.to_vec();
        let previous = self
            .segments
            .range(..address)
            .next_back()
            .map(|(&s, bytes)| (s, s as u64 + bytes.len() as u64));
        if let Some((prev_start, prev_end)) = previous {
            if prev_end == start {
                if let Some(mut prev) = self.segments.remove(&prev_start) {
                    prev.extend_from_slice(&merged);
                    merged = prev;
                    base = prev_start;
                }
            }
        }
        if end < ADDRESS_SPACE_END {
            if let Some(next) = self.segments.remove(&(end as u32)) {
                merged.extend_from_slice(&next);
            }
        }
        self.segments.insert(base, merged);
        Ok(())
    }

    /// Copies every segment of `other` into this container.
    pub fn merge(&mut self, other: &FlashContainer) -> Result<()> {
        for (address, data) in other.segments() {
            self.insert_segment(address, data)?;
        }
        Ok(())
    }

    pub fn segments(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.segments.iter().map(|(&a, d)| (a, d.as_slice()))
    }

    pub fn occupied_ranges(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        self.segments
            .iter()
            .map(|(&a, d)| a as u64..a as u64 + d.len() as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn min_address(&self) -> Option<u32> {
        self.segments.keys().next().copied()
    }

    /// Address of the last occupied byte.
    pub fn max_address(&self) -> Option<u32> {
        self.segments
            .iter()
            .next_back()
            .map(|(&a, d)| a + (d.len() as u32 - 1))
    }

    /// Returns `len` contiguous bytes at `address`, if all of them are
    /// occupied by a single segment.
    pub fn read(&self, address: u32, len: usize) -> Option<&[u8]> {
        let (&start, data) = self.segments.range(..=address).next_back()?;
        let offset = (address - start) as usize;
        data.get(offset..offset.checked_add(len)?)
    }

    /// Flattens the container, starting at the lowest occupied address.
    pub fn to_binary(&self) -> Vec<u8> {
        let Some(base) = self.min_address() else {
            return Vec::new();
        };
        let mut image = Vec::new();
        for (address, data) in self.segments() {
            let offset = (address - base) as usize;
            image.resize(offset, ERASED_BYTE);
            image.extend_from_slice(data);
        }
        image
    }

    pub fn to_hex_string(&self) -> Result<String> {
        let mut records = Vec::new();
        let mut upper = None;
        for (start, data) in self.segments() {
            let mut address = start as u64;
            for chunk in HexChunks::new(start, data) {
                let chunk_upper = (address >> 16) as u16;
                if upper != Some(chunk_upper) {
                    records.push(Record::ExtendedLinearAddress(chunk_upper));
                    upper = Some(chunk_upper);
                }
                records.push(Record::Data {
                    offset: (address & 0xffff) as u16,
                    value: chunk.to_vec(),
                });
                address += chunk.len() as u64;
            }
        }
        records.push(Record::EndOfFile);
        ihex::create_object_file_representation(&records)
            .map_err(|e| TrustError::parse("<hex>", e))
    }

    pub fn write_hex(&self, path: &Path) -> Result<()> {
        let text = self.to_hex_string()?;
        persist_outputs(&[(path, text.as_bytes())])
    }

    pub fn write_binary(&self, path: &Path) -> Result<()> {
        persist_outputs(&[(path, self.to_binary().as_slice())])
    }
}

/// Splits a segment into data records that never cross a 64 KiB boundary.
struct HexChunks<'a> {
    address: u64,
    remaining: &'a [u8],
}

impl<'a> HexChunks<'a> {
    fn new(address: u32, data: &'a [u8]) -> Self {
        Self {
            address: address as u64,
            remaining: data,
        }
    }
}

impl<'a> Iterator for HexChunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        let room = 0x1_0000 - (self.address & 0xffff) as usize;
        let take = self.remaining.len().min(HEX_RECORD_LEN).min(room);
        let (chunk, rest) = self.remaining.split_at(take);
        self.remaining = rest;
        self.address += take as u64;
        Some(chunk)
    }
}

pub fn is_hex_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(OsStr::to_str),
        Some("hex" | "ihex" | "ihx")
    )
}

/// Writes every output to a temporary file next to its destination, then
/// renames them into place. Nothing is renamed unless every file was staged,
/// and a failed rename restores the outputs already placed by this call.
pub fn persist_outputs(outputs: &[(&Path, &[u8])]) -> Result<()> {
    let mut staged = Vec::with_capacity(outputs.len());
    for &(path, bytes) in outputs {
        let dir = output_dir(path);
        let mut file = NamedTempFile::new_in(dir).map_err(|e| TrustError::io(path, e))?;
        file.write_all(bytes).map_err(|e| TrustError::io(path, e))?;
        file.as_file()
            .sync_all()
            .map_err(|e| TrustError::io(path, e))?;
        staged.push((path, file));
    }

    let mut placed: Vec<(&Path, Option<NamedTempFile>)> = Vec::new();
    for (path, file) in staged {
        let backup = match set_aside(path) {
            Ok(backup) => backup,
            Err(err) => {
                roll_back(placed);
                return Err(err);
            }
        };
        if let Err(e) = file.persist(path) {
            if let Some(backup) = backup {
                restore(path, backup);
            }
            roll_back(placed);
            return Err(TrustError::io(path, e.error));
        }
        placed.push((path, backup));
    }
    for (path, _) in &placed {
        debug!("Wrote {}", path.display());
    }
    Ok(())
}

fn output_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Moves an existing destination file into a temporary backup.
fn set_aside(path: &Path) -> Result<Option<NamedTempFile>> {
    if !path.is_file() {
        return Ok(None);
    }
    let backup = NamedTempFile::new_in(output_dir(path)).map_err(|e| TrustError::io(path, e))?;
    fs::rename(path, backup.path()).map_err(|e| TrustError::io(path, e))?;
    Ok(Some(backup))
}

fn restore(path: &Path, backup: NamedTempFile) {
    if let Err(e) = backup.persist(path) {
        warn!("Unable to restore {}: {}", path.display(), e.error);
    }
}

fn roll_back(placed: Vec<(&Path, Option<NamedTempFile>)>) {
    for (path, backup) in placed.into_iter().rev() {
        match backup {
            Some(backup) => restore(path, backup),
            None => {
                if let Err(e) = fs::remove_file(path) {
                    warn!("Unable to remove {}: {e}", path.display());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_coalesce() {
        let mut container = FlashContainer::new();
        container.insert_segment(0x10, &[1, 2]).unwrap();
        container.insert_segment(0x14, &[5]).unwrap();
        container.insert_segment(0x12, &[3, 4]).unwrap();
        assert_eq!(
            container.segments().collect::<Vec<_>>(),
            vec![(0x10, &[1u8, 2, 3, 4, 5][..])]
        );
        assert_eq!(container.min_address(), Some(0x10));
        assert_eq!(container.max_address(), Some(0x14));
    }

    #[test]
    fn test_overlap_rejected() {
        let mut container = FlashContainer::from_binary(&[0u8; 32], 0x1000).unwrap();
        match container.insert_segment(0x101f, &[1, 2]) {
            Err(TrustError::Overlap { offset, start, end, .. }) => {
                assert_eq!(offset, 0x101f);
                assert_eq!(start, 0x1000);
                assert_eq!(end, 0x1020);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        // Touching the end is fine.
        container.insert_segment(0x1020, &[1]).unwrap();
        assert_eq!(container.segments().count(), 1);
    }

    #[test]
    fn test_past_address_space() {
        let mut container = FlashContainer::new();
        assert!(container.insert_segment(0xffff_fffe, &[1, 2]).is_ok());
        assert!(matches!(
            container.insert_segment(0xffff_fff0, &[0; 32]),
            Err(TrustError::Configuration { .. })
        ));
    }

    #[test]
    fn test_to_binary_fills_gaps() {
        let mut container = FlashContainer::new();
        container.insert_segment(0x100, &[0xaa]).unwrap();
        container.insert_segment(0x103, &[0xbb]).unwrap();
        assert_eq!(container.to_binary(), vec![0xaa, 0xff, 0xff, 0xbb]);
        assert!(FlashContainer::new().to_binary().is_empty());
    }

    #[test]
    fn test_read() {
        let container = FlashContainer::from_binary(&[1, 2, 3, 4], 0x20).unwrap();
        assert_eq!(container.read(0x21, 2), Some(&[2u8, 3][..]));
        assert_eq!(container.read(0x23, 2), None);
        assert_eq!(container.read(0x10, 1), None);
    }

    #[test]
    fn test_hex_across_64k_boundary() {
        let data: Vec<u8> = (0..40u8).collect();
        let container = FlashContainer::from_binary(&data, 0xfff0).unwrap();
        let text = container.to_hex_string().unwrap();
        assert!(text.to_uppercase().contains(":020000040001F9"));
        let decoded = FlashContainer::from_hex_str(&text).unwrap();
        assert_eq!(decoded, container);
    }

    #[test]
    fn test_hex_extended_segment_address() {
        // Segment 0x1000 -> base 0x10000.
        let text = ":020000021000EC\n:0400000001020304F2\n:00000001FF\n";
        let container = FlashContainer::from_hex_str(text).unwrap();
        assert_eq!(container.read(0x10000, 4), Some(&[1u8, 2, 3, 4][..]));
    }

    #[test]
    fn test_hex_bad_checksum() {
        let text = ":0400000001020304F3\n:00000001FF\n";
        assert!(matches!(
            FlashContainer::from_hex_str(text),
            Err(TrustError::Parse { .. })
        ));
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let hex_path = dir.path().join("image.hex");
        let bin_path = dir.path().join("image.bin");
        let mut container = FlashContainer::from_binary(b"firmware", 0x8000).unwrap();
        container.insert_segment(0x9000, b"tail").unwrap();

        container.write_hex(&hex_path).unwrap();
        container.write_binary(&bin_path).unwrap();

        assert_eq!(FlashContainer::load(&hex_path).unwrap(), container);
        let flat = FlashContainer::load(&bin_path).unwrap();
        assert_eq!(flat.min_address(), Some(0));
        assert_eq!(flat.to_binary(), container.to_binary());
    }

    #[test]
    fn test_persist_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("missing").join("out.bin");
        let container = FlashContainer::from_binary(&[1], 0).unwrap();
        assert!(matches!(
            container.write_binary(&target),
            Err(TrustError::Io { .. })
        ));
        assert!(!target.exists());
    }

    #[test]
    fn test_failed_persist_leaves_no_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let hex = dir.path().join("out.hex");
        let blocked = dir.path().join("out.bin");
        fs::create_dir(&blocked).unwrap();

        let result = persist_outputs(&[
            (hex.as_path(), &b"new"[..]),
            (blocked.as_path(), &b"new"[..]),
        ]);
        assert!(matches!(result, Err(TrustError::Io { .. })));
        assert!(!hex.exists());
        assert!(blocked.is_dir());
    }

    #[test]
    fn test_failed_persist_restores_previous_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let hex = dir.path().join("out.hex");
        let blocked = dir.path().join("out.bin");
        fs::write(&hex, b"previous").unwrap();
        fs::create_dir(&blocked).unwrap();

        let result = persist_outputs(&[
            (hex.as_path(), &b"new"[..]),
            (blocked.as_path(), &b"new"[..]),
        ]);
        assert!(result.is_err());
        assert_eq!(fs::read(&hex).unwrap(), b"previous");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
