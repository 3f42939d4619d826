// Licensed under the Apache-2.0 license

//! Host-side generation of the trust metadata consumed by the bootloader:
//! the partition metadata table and the signed validation block.

pub mod container;
mod error;
pub mod hash;
pub mod keygen;
pub mod metadata;
pub mod pipeline;
pub mod scheme;
pub mod sign;
pub mod validation;

pub use container::FlashContainer;
pub use error::{Result, TrustError};
pub use hash::HashAlgorithm;
pub use keygen::{KeyPair, PrivateKey, PublicKey, PublicKeyFormat};
pub use metadata::{
    generate_metadata, metadata_verify, MetadataPlacement, MetadataRequest, MetadataTable,
    PartitionEntry,
};
pub use scheme::{SignatureAlgorithm, SigningScheme};
pub use sign::{sign, sign_image, SignatureRecord};
pub use validation::{
    append_validation_data, find_validation_block, parse_magic_value, verify, AppendRequest,
    ValidationBlock,
};
