// Licensed under the Apache-2.0 license

use fw_trust_config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building partition metadata or validation data.
#[derive(Error, Debug)]
pub enum TrustError {
    #[error("Configuration error for {key}: {reason}")]
    Configuration { key: String, reason: String },
    #[error("Unable to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),
    #[error("Signature verification failed")]
    VerificationFailure,
    #[error(
        "Data at 0x{offset:08x} ({len} bytes) overlaps existing content at 0x{start:08x}..0x{end:08x}"
    )]
    Overlap {
        offset: u32,
        len: usize,
        start: u64,
        end: u64,
    },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Checksum mismatch: stored 0x{expected:08x}, computed 0x{actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

pub type Result<T> = std::result::Result<T, TrustError>;

impl TrustError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True for a signature that decoded fine but did not match.
    pub fn is_verification_failure(&self) -> bool {
        matches!(self, Self::VerificationFailure)
    }
}

impl From<ConfigError> for TrustError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Unreadable { path, source } => Self::parse(path, source),
            ConfigError::MalformedLine { path, line, text } => {
                Self::parse(path, format!("line {line} is not a key/value pair: {text:?}"))
            }
            ConfigError::Manifest { path, reason } => Self::Parse { path, reason },
            ConfigError::MissingKey { key } => Self::config(key, "required key is missing"),
            ConfigError::InvalidHex { key, value } => {
                Self::config(key, format!("{value:?} is not a hexadecimal integer"))
            }
            ConfigError::RegionOverflow { key, start, size } => Self::config(
                key,
                format!("0x{start:x} + 0x{size:x} exceeds the 32-bit address space"),
            ),
        }
    }
}
