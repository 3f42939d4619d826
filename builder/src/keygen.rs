// Licensed under the Apache-2.0 license

use crate::container::persist_outputs;
use crate::error::{Result, TrustError};
use crate::scheme::SignatureAlgorithm;
use log::info;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding,
};
use rand::rngs::OsRng;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

const PEM_PREFIX: &[u8] = b"-----BEGIN";
const SEC1_UNCOMPRESSED_TAG: u8 = 0x04;

pub enum PrivateKey {
    EcdsaP256(p256::SecretKey),
    Ed25519(ed25519_dalek::SigningKey),
}

impl PrivateKey {
    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            Self::EcdsaP256(_) => SignatureAlgorithm::EcdsaP256Sha256,
            Self::Ed25519(_) => SignatureAlgorithm::Ed25519Sha512,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            Self::EcdsaP256(secret) => PublicKey::EcdsaP256(secret.public_key()),
            Self::Ed25519(signing_key) => PublicKey::Ed25519(signing_key.verifying_key()),
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({}, [REDACTED])", self.algorithm())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    EcdsaP256(p256::PublicKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl PublicKey {
    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            Self::EcdsaP256(_) => SignatureAlgorithm::EcdsaP256Sha256,
            Self::Ed25519(_) => SignatureAlgorithm::Ed25519Sha512,
        }
    }

    /// Encoding used inside a validation block: `X || Y` for P-256, the
    /// compressed point for Ed25519.
    pub fn to_raw(&self) -> Vec<u8> {
        match self {
            Self::EcdsaP256(public) => public.to_encoded_point(false).as_bytes()[1..].to_vec(),
            Self::Ed25519(verifying_key) => verifying_key.to_bytes().to_vec(),
        }
    }

    pub fn from_raw(bytes: &[u8], algorithm: SignatureAlgorithm) -> Result<Self> {
        let expected = algorithm.scheme().key_sizes().public_key;
        if bytes.len() != expected {
            return Err(TrustError::InvalidKey(format!(
                "{algorithm} public keys are {expected} bytes, got {}",
                bytes.len()
            )));
        }
        match algorithm {
            SignatureAlgorithm::EcdsaP256Sha256 => {
                let mut sec1 = Vec::with_capacity(bytes.len() + 1);
                sec1.push(SEC1_UNCOMPRESSED_TAG);
                sec1.extend_from_slice(bytes);
                p256::PublicKey::from_sec1_bytes(&sec1)
                    .map(Self::EcdsaP256)
                    .map_err(|_| TrustError::InvalidKey("point is not on the P-256 curve".into()))
            }
            SignatureAlgorithm::Ed25519Sha512 => {
                let mut raw = [0u8; ed25519_dalek::PUBLIC_KEY_LENGTH];
                raw.copy_from_slice(bytes);
                ed25519_dalek::VerifyingKey::from_bytes(&raw)
                    .map(Self::Ed25519)
                    .map_err(|e| TrustError::InvalidKey(e.to_string()))
            }
        }
    }
}

#[derive(Debug)]
pub struct KeyPair {
    pub algorithm: SignatureAlgorithm,
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Fresh key pair from the operating system's CSPRNG.
    pub fn generate(algorithm: SignatureAlgorithm) -> Self {
        let private_key = match algorithm {
            SignatureAlgorithm::EcdsaP256Sha256 => {
                PrivateKey::EcdsaP256(p256::SecretKey::random(&mut OsRng))
            }
            SignatureAlgorithm::Ed25519Sha512 => {
                PrivateKey::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng))
            }
        };
        Self::from_private_key(private_key)
    }

    pub fn from_private_key(private_key: PrivateKey) -> Self {
        Self {
            algorithm: private_key.algorithm(),
            public_key: private_key.public_key(),
            private_key,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublicKeyFormat {
    #[default]
    Pem,
    Raw,
}

impl FromStr for PublicKeyFormat {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pem" => Ok(Self::Pem),
            "raw" | "bin" => Ok(Self::Raw),
            other => Err(TrustError::config(
                "public-format",
                format!("expected pem or raw, got {other:?}"),
            )),
        }
    }
}

/// SEC1 `EC PRIVATE KEY` for P-256, PKCS#8 `PRIVATE KEY` for Ed25519.
pub fn export_private_pem(key: &PrivateKey) -> Result<Vec<u8>> {
    let pem = match key {
        PrivateKey::EcdsaP256(secret) => secret.to_sec1_pem(LineEnding::LF).ok(),
        PrivateKey::Ed25519(signing_key) => signing_key.to_pkcs8_pem(LineEnding::LF).ok(),
    }
    .ok_or_else(|| TrustError::InvalidKey("private key could not be PEM encoded".into()))?;
    Ok(pem.as_bytes().to_vec())
}

pub fn export_public(key: &PublicKey, format: PublicKeyFormat) -> Result<Vec<u8>> {
    match format {
        PublicKeyFormat::Raw => Ok(key.to_raw()),
        PublicKeyFormat::Pem => {
            let pem = match key {
                PublicKey::EcdsaP256(public) => public.to_public_key_pem(LineEnding::LF),
                PublicKey::Ed25519(verifying_key) => {
                    verifying_key.to_public_key_pem(LineEnding::LF)
                }
            }
            .map_err(|e| TrustError::InvalidKey(e.to_string()))?;
            Ok(pem.into_bytes())
        }
    }
}

/// Accepts SEC1 or PKCS#8 for P-256 and PKCS#8 for Ed25519.
pub fn load_private_pem(pem: &str) -> Result<PrivateKey> {
    let pem = pem.trim();
    if let Ok(secret) = p256::SecretKey::from_sec1_pem(pem) {
        return Ok(PrivateKey::EcdsaP256(secret));
    }
    if let Ok(secret) = p256::SecretKey::from_pkcs8_pem(pem) {
        return Ok(PrivateKey::EcdsaP256(secret));
    }
    ed25519_dalek::SigningKey::from_pkcs8_pem(pem)
        .map(PrivateKey::Ed25519)
        .map_err(|_| {
            TrustError::InvalidKey("not a P-256 or Ed25519 private key in PEM form".into())
        })
}

pub fn load_public_pem(pem: &str) -> Result<PublicKey> {
    let pem = pem.trim();
    if let Ok(public) = p256::PublicKey::from_public_key_pem(pem) {
        return Ok(PublicKey::EcdsaP256(public));
    }
    ed25519_dalek::VerifyingKey::from_public_key_pem(pem)
        .map(PublicKey::Ed25519)
        .map_err(|_| {
            TrustError::InvalidKey("not a P-256 or Ed25519 public key in PEM form".into())
        })
}

/// Public key bytes in either PEM or raw block encoding. The key must belong
/// to `algorithm`.
pub fn load_public_key(bytes: &[u8], algorithm: SignatureAlgorithm) -> Result<PublicKey> {
    let trimmed = bytes.trim_ascii_start();
    let key = if trimmed.starts_with(PEM_PREFIX) {
        let text = std::str::from_utf8(trimmed)
            .map_err(|_| TrustError::InvalidKey("PEM data is not UTF-8".into()))?;
        load_public_pem(text)?
    } else {
        PublicKey::from_raw(bytes, algorithm)?
    };
    ensure_algorithm(key.algorithm(), algorithm)?;
    Ok(key)
}

pub fn read_private_key(path: &Path, algorithm: SignatureAlgorithm) -> Result<PrivateKey> {
    let pem = fs::read_to_string(path).map_err(|e| TrustError::io(path, e))?;
    let key = load_private_pem(&pem)?;
    ensure_algorithm(key.algorithm(), algorithm)?;
    Ok(key)
}

pub fn read_public_key(path: &Path, algorithm: SignatureAlgorithm) -> Result<PublicKey> {
    let bytes = fs::read(path).map_err(|e| TrustError::io(path, e))?;
    load_public_key(&bytes, algorithm)
}

fn ensure_algorithm(actual: SignatureAlgorithm, expected: SignatureAlgorithm) -> Result<()> {
    if actual != expected {
        return Err(TrustError::InvalidKey(format!(
            "expected a {expected} key, found {actual}"
        )));
    }
    Ok(())
}

/// Writes the private key PEM and, if requested, the public key. Either both
/// files appear or neither does.
pub fn write_key_files(
    pair: &KeyPair,
    private_path: &Path,
    public_path: Option<&Path>,
    format: PublicKeyFormat,
) -> Result<()> {
    let private_pem = export_private_pem(&pair.private_key)?;
    let public = export_public(&pair.public_key, format)?;
    let mut outputs = vec![(private_path, private_pem.as_slice())];
    if let Some(public_path) = public_path {
        outputs.push((public_path, public.as_slice()));
    }
    persist_outputs(&outputs)?;
    info!(
        "Generated {} key pair in {}",
        pair.algorithm,
        private_path.display()
    );
    Ok(())
}
