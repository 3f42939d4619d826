// Licensed under the Apache-2.0 license
#![no_std]

//! On-flash layouts shared by the host-side generators and the device-side
//! parsers: the partition metadata table and the validation block header.
//!
//! Every multi-byte field is little-endian regardless of the host.

use zerocopy::{
    byteorder::{LittleEndian, U32},
    FromBytes, Immutable, IntoBytes, KnownLayout,
};

pub const METADATA_HEADER_SIZE: usize = core::mem::size_of::<MetadataHeader>();
pub const METADATA_ENTRY_SIZE: usize = core::mem::size_of::<MetadataEntry>();
pub const METADATA_TRAILER_SIZE: usize = core::mem::size_of::<MetadataTrailer>();

/// The entry count is stored in a single byte.
pub const MAX_METADATA_ENTRIES: usize = u8::MAX as usize;

pub const VALIDATION_MAGIC_WORDS: usize = 3;
pub const VALIDATION_MAGIC_SIZE: usize = core::mem::size_of::<ValidationMagic>();

/// Total serialized size of a metadata table holding `entries` partitions.
pub const fn metadata_table_size(entries: usize) -> usize {
    METADATA_HEADER_SIZE + METADATA_ENTRY_SIZE * entries + METADATA_TRAILER_SIZE
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MetadataHeader {
    pub entry_count: u8,
    pub reserved: [u8; 31],
}

impl MetadataHeader {
    pub fn new(entry_count: u8) -> Self {
        Self {
            entry_count,
            reserved: [0; 31],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MetadataEntry {
    pub address: U32<LittleEndian>,
    pub size: U32<LittleEndian>,
    pub reserved: [u8; 56],
}

impl MetadataEntry {
    pub fn new(address: u32, size: u32) -> Self {
        Self {
            address: address.into(),
            size: size.into(),
            reserved: [0; 56],
        }
    }
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MetadataTrailer {
    pub checksum: U32<LittleEndian>,
}

impl MetadataTrailer {
    pub fn new(checksum: u32) -> Self {
        Self {
            checksum: checksum.into(),
        }
    }
}

/// Borrowed view over a serialized metadata table.
///
/// Parsing only checks that the buffer is long enough for the advertised
/// entry count; the caller is responsible for validating the checksum over
/// [`MetadataView::checksummed_bytes`].
pub struct MetadataView<'a> {
    pub header: &'a MetadataHeader,
    pub entries: &'a [MetadataEntry],
    pub trailer: &'a MetadataTrailer,
    raw: &'a [u8],
}

impl<'a> MetadataView<'a> {
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        let (header, rest) = MetadataHeader::ref_from_prefix(bytes).ok()?;
        let count = header.entry_count as usize;
        let (entries, rest) = <[MetadataEntry]>::ref_from_prefix_with_elems(rest, count).ok()?;
        let (trailer, _) = MetadataTrailer::ref_from_prefix(rest).ok()?;
        Some(Self {
            header,
            entries,
            trailer,
            raw: &bytes[..metadata_table_size(count)],
        })
    }

    /// Bytes covered by the trailing checksum.
    pub fn checksummed_bytes(&self) -> &'a [u8] {
        &self.raw[..self.raw.len() - METADATA_TRAILER_SIZE]
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sync pattern that prefixes a validation block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ValidationMagic {
    pub words: [U32<LittleEndian>; VALIDATION_MAGIC_WORDS],
}

impl ValidationMagic {
    pub fn new(words: [u32; VALIDATION_MAGIC_WORDS]) -> Self {
        Self {
            words: words.map(U32::new),
        }
    }

    pub fn values(&self) -> [u32; VALIDATION_MAGIC_WORDS] {
        self.words.map(|w| w.get())
    }

    /// Linear scan for the first occurrence of this pattern in `image`.
    pub fn find_in(&self, image: &[u8]) -> Option<usize> {
        let needle = self.as_bytes();
        image
            .windows(VALIDATION_MAGIC_SIZE)
            .position(|window| window == needle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(METADATA_HEADER_SIZE, 32);
        assert_eq!(METADATA_ENTRY_SIZE, 64);
        assert_eq!(METADATA_TRAILER_SIZE, 4);
        assert_eq!(VALIDATION_MAGIC_SIZE, 12);
        assert_eq!(metadata_table_size(0), 36);
        assert_eq!(metadata_table_size(2), 164);
    }

    #[test]
    fn test_entry_is_little_endian() {
        let entry = MetadataEntry::new(0x0008_f000, 0x8000);
        assert_eq!(&entry.as_bytes()[..8], &[0x00, 0xf0, 0x08, 0x00, 0x00, 0x80, 0x00, 0x00]);
        assert!(entry.as_bytes()[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_view_rejects_truncated_table() {
        let mut table = [0u8; 100];
        table[0] = 2;
        assert!(MetadataView::parse(&table).is_none());
    }

    #[test]
    fn test_magic_scan() {
        let magic = ValidationMagic::new([0x281e_e6de, 0x8651_8483, 79362]);
        let mut image = [0xffu8; 64];
        image[20..32].copy_from_slice(magic.as_bytes());
        assert_eq!(magic.find_in(&image), Some(20));
        assert_eq!(magic.find_in(&image[21..]), None);
        assert_eq!(magic.values(), [0x281e_e6de, 0x8651_8483, 79362]);
    }
}
