// Licensed under the Apache-2.0 license

use anyhow::{Context, Result};
use fw_trust_builder::keygen::read_public_key;
use fw_trust_builder::{
    append_validation_data, parse_magic_value, AppendRequest, FlashContainer, SignatureAlgorithm,
};
use std::fs;
use std::path::Path;

pub(crate) struct Args<'a> {
    pub algorithm: SignatureAlgorithm,
    pub signature: &'a Path,
    pub input: &'a Path,
    pub public_key: &'a Path,
    pub magic_value: &'a str,
    pub offset: Option<u32>,
    pub output_hex: Option<&'a Path>,
    pub output_bin: Option<&'a Path>,
    pub verify: bool,
}

pub(crate) fn append(args: &Args) -> Result<()> {
    let magic = parse_magic_value(args.magic_value)?;
    let public_key = read_public_key(args.public_key, args.algorithm)
        .with_context(|| format!("Failed to load public key {}", args.public_key.display()))?;
    let signature = fs::read(args.signature)
        .with_context(|| format!("Unable to read {}", args.signature.display()))?;
    let input = FlashContainer::load(args.input)
        .with_context(|| format!("Failed to load image {}", args.input.display()))?;

    let outcome = append_validation_data(&AppendRequest {
        input: &input,
        public_key: &public_key,
        signature: &signature,
        magic,
        offset: args.offset,
        output_hex: args.output_hex,
        output_bin: args.output_bin,
        verify: args.verify,
    })
    .context("Failed to append validation data")?;
    println!(
        "Validation data ({} bytes) placed at 0x{:08x}",
        outcome.block.encoded_len(),
        outcome.offset
    );
    Ok(())
}
