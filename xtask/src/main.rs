// Licensed under the Apache-2.0 license

use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use fw_trust_builder::{HashAlgorithm, PublicKeyFormat, SignatureAlgorithm, TrustError};
use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::path::PathBuf;

mod keys;
mod metadata;
mod validation_data;

use metadata::MetadataCommands;

/// Exit status for a signature that does not match.
const EXIT_VERIFICATION_FAILED: i32 = 2;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Xtask {
    /// Log debug details
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    xtask: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Partition metadata table
    Metadata {
        #[command(subcommand)]
        subcommand: MetadataCommands,
    },
    /// Generate a signing key pair
    Keygen {
        /// ecdsa-p256-sha256 or ed25519
        #[arg(long)]
        algorithm: SignatureAlgorithm,

        /// Output path for the private key PEM
        #[arg(long, value_name = "PEM")]
        private: PathBuf,

        /// Output path for the public key
        #[arg(long, value_name = "FILE")]
        public: Option<PathBuf>,

        /// Public key encoding: pem or raw
        #[arg(long, default_value = "pem")]
        public_format: PublicKeyFormat,
    },
    /// Write the digest of an image
    Hash {
        /// sha256 or sha512
        #[arg(long)]
        algorithm: HashAlgorithm,

        /// Image file (.hex or raw binary)
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output: PathBuf,
    },
    /// Sign a digest, or a message for schemes without a digest step
    Sign {
        #[arg(long)]
        algorithm: SignatureAlgorithm,

        /// Private key PEM
        #[arg(long)]
        key: PathBuf,

        #[arg(long)]
        input: PathBuf,

        /// Output path for the raw signature
        #[arg(long)]
        output: PathBuf,

        /// Treat the input as the image and hash it first if the scheme needs a digest
        #[arg(long, default_value_t = false)]
        image: bool,
    },
    /// Check a signature over an image
    Verify {
        #[arg(long)]
        algorithm: SignatureAlgorithm,

        /// Public key, PEM or raw
        #[arg(long)]
        public_key: PathBuf,

        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        signature: PathBuf,
    },
    /// Embed a validation block (magic, public key, signature) into an image
    ValidationData {
        #[arg(long)]
        algorithm: SignatureAlgorithm,

        #[arg(long)]
        signature: PathBuf,

        /// Image file (.hex or raw binary)
        #[arg(long)]
        input: PathBuf,

        /// Public key, PEM or raw
        #[arg(long)]
        public_key: PathBuf,

        /// Three comma separated words, e.g. 0x281ee6de,0x86518483,79362
        #[arg(long)]
        magic_value: String,

        /// Address of the block; defaults to the first word after the image
        #[arg(long, value_parser=maybe_hex::<u32>)]
        offset: Option<u32>,

        #[arg(long)]
        output_hex: Option<PathBuf>,

        #[arg(long)]
        output_bin: Option<PathBuf>,

        /// Verify the signature against the image before embedding it
        #[arg(long, default_value_t = false)]
        verify: bool,
    },
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<TrustError>() {
        Some(e) if e.is_verification_failure() => EXIT_VERIFICATION_FAILED,
        _ => 1,
    }
}

fn main() {
    let cli = Xtask::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = SimpleLogger::new().with_level(level).init();

    let result = match &cli.xtask {
        Commands::Metadata { subcommand } => metadata::run(subcommand),
        Commands::Keygen {
            algorithm,
            private,
            public,
            public_format,
        } => keys::keygen(*algorithm, private, public.as_deref(), *public_format),
        Commands::Hash {
            algorithm,
            input,
            output,
        } => keys::hash(*algorithm, input, output),
        Commands::Sign {
            algorithm,
            key,
            input,
            output,
            image,
        } => keys::sign(*algorithm, key, input, output, *image),
        Commands::Verify {
            algorithm,
            public_key,
            input,
            signature,
        } => keys::verify(*algorithm, public_key, input, signature),
        Commands::ValidationData {
            algorithm,
            signature,
            input,
            public_key,
            magic_value,
            offset,
            output_hex,
            output_bin,
            verify,
        } => validation_data::append(&validation_data::Args {
            algorithm: *algorithm,
            signature,
            input,
            public_key,
            magic_value,
            offset: *offset,
            output_hex: output_hex.as_deref(),
            output_bin: output_bin.as_deref(),
            verify: *verify,
        }),
    };
    result.unwrap_or_else(|e| {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    });
}
