// Licensed under the Apache-2.0 license

//! Validation blocks: a magic sync pattern followed by the public key and the
//! signature, embedded into the image so the bootloader can find them by
//! scanning for the pattern.

use crate::container::{persist_outputs, FlashContainer};
use crate::error::{Result, TrustError};
use crate::keygen::PublicKey;
use crate::scheme::SignatureAlgorithm;
use flash_image::{ValidationMagic, VALIDATION_MAGIC_SIZE, VALIDATION_MAGIC_WORDS};
use log::{debug, info};
use std::path::Path;
use zerocopy::{FromBytes, IntoBytes};

const WORD_SIZE: u32 = 4;

/// Parses `A,B,C` where each word is hex with a `0x` prefix or decimal.
pub fn parse_magic_value(text: &str) -> Result<[u32; VALIDATION_MAGIC_WORDS]> {
    let words = text
        .split(',')
        .map(|word| {
            let word = word.trim();
            let parsed = match word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
                Some(digits) => u32::from_str_radix(digits, 16),
                None => word.parse::<u32>(),
            };
            parsed.map_err(|_| {
                TrustError::config("magic-value", format!("{word:?} is not a 32-bit integer"))
            })
        })
        .collect::<Result<Vec<u32>>>()?;
    words.try_into().map_err(|words: Vec<u32>| {
        TrustError::config(
            "magic-value",
            format!(
                "expected {VALIDATION_MAGIC_WORDS} comma separated words, got {}",
                words.len()
            ),
        )
    })
}

pub fn verify(public_key: &PublicKey, message: &[u8], signature: &[u8]) -> Result<bool> {
    public_key
        .algorithm()
        .scheme()
        .verify(public_key, message, signature)
}

/// Brings a signature into the fixed-width block encoding. ECDSA signatures
/// may also be given in DER.
pub fn normalize_signature(algorithm: SignatureAlgorithm, signature: &[u8]) -> Result<Vec<u8>> {
    let expected = algorithm.scheme().key_sizes().signature;
    if signature.len() == expected {
        return Ok(signature.to_vec());
    }
    match algorithm {
        SignatureAlgorithm::EcdsaP256Sha256 => p256::ecdsa::Signature::from_der(signature)
            .map(|s| s.to_bytes().to_vec())
            .map_err(|e| TrustError::MalformedSignature(e.to_string())),
        SignatureAlgorithm::Ed25519Sha512 => Err(TrustError::MalformedSignature(format!(
            "{algorithm} signatures are {expected} bytes, got {}",
            signature.len()
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationBlock {
    pub magic: [u32; VALIDATION_MAGIC_WORDS],
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

impl ValidationBlock {
    pub fn new(
        magic: [u32; VALIDATION_MAGIC_WORDS],
        public_key: &PublicKey,
        signature: &[u8],
    ) -> Result<Self> {
        Ok(Self {
            magic,
            public_key: public_key.to_raw(),
            signature: normalize_signature(public_key.algorithm(), signature)?,
        })
    }

    pub fn encoded_len(&self) -> usize {
        VALIDATION_MAGIC_SIZE + self.public_key.len() + self.signature.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.extend_from_slice(ValidationMagic::new(self.magic).as_bytes());
        bytes.extend_from_slice(&self.public_key);
        bytes.extend_from_slice(&self.signature);
        bytes
    }

    /// Decodes a block at the start of `bytes`. The algorithm is not stored
    /// in the block, so it has to be supplied.
    pub fn parse(bytes: &[u8], algorithm: SignatureAlgorithm) -> Result<Self> {
        let sizes = algorithm.scheme().key_sizes();
        let (magic, rest) = ValidationMagic::ref_from_prefix(bytes)
            .map_err(|_| TrustError::parse("<image>", "validation block magic is truncated"))?;
        let needed = sizes.public_key + sizes.signature;
        if rest.len() < needed {
            return Err(TrustError::parse(
                "<image>",
                format!(
                    "{algorithm} validation block needs {needed} bytes after the magic, {} remain",
                    rest.len()
                ),
            ));
        }
        let (public_key, rest) = rest.split_at(sizes.public_key);
        Ok(Self {
            magic: magic.values(),
            public_key: public_key.to_vec(),
            signature: rest[..sizes.signature].to_vec(),
        })
    }

    pub fn public_key(&self, algorithm: SignatureAlgorithm) -> Result<PublicKey> {
        PublicKey::from_raw(&self.public_key, algorithm)
    }
}

/// Scans a flattened image for `magic` and decodes the block that follows,
/// returning its offset within `image`.
pub fn find_validation_block(
    image: &[u8],
    magic: [u32; VALIDATION_MAGIC_WORDS],
    algorithm: SignatureAlgorithm,
) -> Result<Option<(usize, ValidationBlock)>> {
    let Some(position) = ValidationMagic::new(magic).find_in(image) else {
        return Ok(None);
    };
    let block = ValidationBlock::parse(&image[position..], algorithm)?;
    Ok(Some((position, block)))
}

/// First word-aligned address past the last occupied byte.
pub fn default_offset(container: &FlashContainer) -> Result<u32> {
    let Some(max) = container.max_address() else {
        return Ok(0);
    };
    (max / WORD_SIZE)
        .checked_add(1)
        .and_then(|words| words.checked_mul(WORD_SIZE))
        .ok_or_else(|| TrustError::config("offset", "image ends at the top of the address space"))
}

/// Copies `container` and adds `bytes` as a new segment. Without an explicit
/// offset the segment goes right after the existing content.
pub(crate) fn embed_block(
    container: &FlashContainer,
    offset: Option<u32>,
    bytes: &[u8],
) -> Result<(FlashContainer, u32)> {
    let offset = match offset {
        Some(offset) => offset,
        None => default_offset(container)?,
    };
    let mut embedded = container.clone();
    embedded.insert_segment(offset, bytes)?;
    debug!("Placed {} byte block at 0x{offset:08x}", bytes.len());
    Ok((embedded, offset))
}

#[derive(Debug, Clone)]
pub struct AppendRequest<'a> {
    pub input: &'a FlashContainer,
    pub public_key: &'a PublicKey,
    pub signature: &'a [u8],
    pub magic: [u32; VALIDATION_MAGIC_WORDS],
    pub offset: Option<u32>,
    pub output_hex: Option<&'a Path>,
    pub output_bin: Option<&'a Path>,
    /// Check the signature against the image before writing anything.
    pub verify: bool,
}

#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub container: FlashContainer,
    pub offset: u32,
    pub block: ValidationBlock,
}

pub fn append_validation_data(request: &AppendRequest) -> Result<AppendOutcome> {
    if request.output_hex.is_none() && request.output_bin.is_none() {
        return Err(TrustError::io(
            "<output>",
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "no hex or binary output was requested",
            ),
        ));
    }
    if request.verify {
        let message = request.input.to_binary();
        if !verify(request.public_key, &message, request.signature)? {
            return Err(TrustError::VerificationFailure);
        }
    }
    let block = ValidationBlock::new(request.magic, request.public_key, request.signature)?;
    let (container, offset) = embed_block(request.input, request.offset, &block.to_bytes())?;

    let hex = match request.output_hex {
        Some(_) => Some(container.to_hex_string()?),
        None => None,
    };
    let bin = request.output_bin.map(|_| container.to_binary());
    let mut outputs = Vec::new();
    if let (Some(path), Some(text)) = (request.output_hex, hex.as_ref()) {
        outputs.push((path, text.as_bytes()));
    }
    if let (Some(path), Some(bytes)) = (request.output_bin, bin.as_ref()) {
        outputs.push((path, bytes.as_slice()));
    }
    persist_outputs(&outputs)?;
    info!(
        "Appended {} validation data at 0x{offset:08x} ({} bytes)",
        request.public_key.algorithm(),
        block.encoded_len()
    );
    Ok(AppendOutcome {
        container,
        offset,
        block,
    })
}
