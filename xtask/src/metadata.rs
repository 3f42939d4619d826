// Licensed under the Apache-2.0 license

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use clap_num::maybe_hex;
use fw_trust_builder::{
    generate_metadata, metadata_verify, FlashContainer, MetadataPlacement, MetadataRequest,
};
use fw_trust_config::{BuildConfig, PartitionLayout, PartitionManifest, DEFAULT_PARTITIONS};
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum MetadataCommands {
    /// Build the partition metadata table and write it as Intel Hex
    Generate {
        /// Generated build configuration (.config or a header of #defines)
        #[arg(long, value_name = "FILE", conflicts_with = "manifest")]
        config: Option<PathBuf>,

        /// Partitions to describe, in table order
        #[arg(long = "partition", value_name = "NAME")]
        partitions: Vec<String>,

        /// TOML partition manifest, instead of a build configuration
        #[arg(long, value_name = "TOML")]
        manifest: Option<PathBuf>,

        /// Table address; defaults to the end of the installer partition
        #[arg(long, value_parser=maybe_hex::<u32>)]
        address: Option<u32>,

        #[arg(long, value_name = "HEX")]
        output: PathBuf,
    },
    /// Check the table stored at an address of an image
    Verify {
        #[arg(long)]
        input: PathBuf,

        #[arg(long, value_parser=maybe_hex::<u32>)]
        address: u32,
    },
}

pub(crate) fn run(command: &MetadataCommands) -> Result<()> {
    match command {
        MetadataCommands::Generate {
            config,
            partitions,
            manifest,
            address,
            output,
        } => generate(
            config.as_deref(),
            partitions,
            manifest.as_deref(),
            *address,
            output,
        ),
        MetadataCommands::Verify { input, address } => verify(input, *address),
    }
}

pub(crate) fn generate(
    config: Option<&Path>,
    partitions: &[String],
    manifest: Option<&Path>,
    address: Option<u32>,
    output: &Path,
) -> Result<()> {
    let (layout, manifest_address) = match (config, manifest) {
        (Some(config), None) => {
            let build_config = BuildConfig::from_file(config)
                .with_context(|| format!("Failed to read {}", config.display()))?;
            let names: Vec<&str> = if partitions.is_empty() {
                DEFAULT_PARTITIONS.to_vec()
            } else {
                partitions.iter().map(String::as_str).collect()
            };
            (PartitionLayout::from_config(&build_config, &names)?, None)
        }
        (None, Some(manifest)) => {
            let manifest = PartitionManifest::from_file(manifest)?;
            (manifest.layout(), manifest.metadata_address)
        }
        _ => bail!("Exactly one of --config or --manifest is required"),
    };
    let placement = match address.or(manifest_address) {
        Some(address) => MetadataPlacement::Fixed(address),
        None => MetadataPlacement::AfterInstaller,
    };
    let generated = generate_metadata(&MetadataRequest {
        layout: &layout,
        placement,
        output,
    })
    .context("Failed to generate partition metadata")?;
    println!(
        "Metadata with {} entries written to {} at 0x{:08x}",
        generated.table.entry_count(),
        output.display(),
        generated.address
    );
    Ok(())
}

pub(crate) fn verify(input: &Path, address: u32) -> Result<()> {
    let container = FlashContainer::load(input)?;
    let table = metadata_verify(&container, address)
        .with_context(|| format!("No valid metadata at 0x{address:08x} in {}", input.display()))?;
    for (index, entry) in table.entries().iter().enumerate() {
        println!(
            "  [{index}] address 0x{:08x} size 0x{:08x}",
            entry.address, entry.size
        );
    }
    println!("Metadata is valid! (crc32 0x{:08x})", table.checksum());
    Ok(())
}
