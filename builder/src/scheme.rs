// Licensed under the Apache-2.0 license

//! Signature schemes supported in validation blocks.
//!
//! The set is closed: [`SignatureAlgorithm`] names every scheme and
//! [`SignatureAlgorithm::scheme`] hands out the matching [`SigningScheme`]
//! implementation. Command line strings are parsed once into the enum.

use crate::error::{Result, TrustError};
use crate::hash::{self, HashAlgorithm};
use crate::keygen::{PrivateKey, PublicKey};
use ecdsa::signature::hazmat::{PrehashVerifier, RandomizedPrehashSigner};
use ed25519_dalek::{Signer as _, Verifier as _};
use rand::rngs::OsRng;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    EcdsaP256Sha256,
    Ed25519Sha512,
}

impl SignatureAlgorithm {
    pub const ALL: [SignatureAlgorithm; 2] = [Self::EcdsaP256Sha256, Self::Ed25519Sha512];

    pub fn scheme(self) -> &'static dyn SigningScheme {
        match self {
            Self::EcdsaP256Sha256 => &EcdsaP256,
            Self::Ed25519Sha512 => &Ed25519,
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EcdsaP256Sha256 => "ecdsa-p256-sha256",
            Self::Ed25519Sha512 => "ed25519",
        })
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "ecdsa" | "ecdsa-p256" | "ecdsa-p256-sha256" | "p256" => Ok(Self::EcdsaP256Sha256),
            "ed25519" | "ed25519-sha512" => Ok(Self::Ed25519Sha512),
            other => Err(TrustError::config(
                "algorithm",
                format!("unsupported signature algorithm {other:?}"),
            )),
        }
    }
}

/// What a scheme expects as signing input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestRequirement {
    /// The caller hashes the message and passes the digest.
    Prehashed(HashAlgorithm),
    /// The scheme consumes the raw message.
    Message,
}

/// Encoded sizes of the key and signature in a validation block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySizes {
    pub public_key: usize,
    pub signature: usize,
}

pub trait SigningScheme: Sync {
    fn algorithm(&self) -> SignatureAlgorithm;

    fn digest_requirement(&self) -> DigestRequirement;

    fn key_sizes(&self) -> KeySizes;

    /// Signs `input`, which is a digest or a message per
    /// [`SigningScheme::digest_requirement`]. Returns the fixed-width
    /// signature encoding.
    fn sign(&self, key: &PrivateKey, input: &[u8]) -> Result<Vec<u8>>;

    /// Checks `signature` over the raw `message`. `Ok(false)` means the
    /// signature decoded but does not match.
    fn verify(&self, key: &PublicKey, message: &[u8], signature: &[u8]) -> Result<bool>;
}

fn key_mismatch(expected: SignatureAlgorithm, actual: SignatureAlgorithm) -> TrustError {
    TrustError::InvalidKey(format!("{actual} key cannot be used with {expected}"))
}

pub struct EcdsaP256;

impl SigningScheme for EcdsaP256 {
    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::EcdsaP256Sha256
    }

    fn digest_requirement(&self) -> DigestRequirement {
        DigestRequirement::Prehashed(HashAlgorithm::Sha256)
    }

    fn key_sizes(&self) -> KeySizes {
        KeySizes {
            public_key: 64,
            signature: 64,
        }
    }

    fn sign(&self, key: &PrivateKey, digest: &[u8]) -> Result<Vec<u8>> {
        let PrivateKey::EcdsaP256(secret) = key else {
            return Err(key_mismatch(self.algorithm(), key.algorithm()));
        };
        let expected = HashAlgorithm::Sha256.digest_len();
        if digest.len() != expected {
            return Err(TrustError::InvalidKey(format!(
                "expected a {expected} byte SHA-256 digest, got {} bytes",
                digest.len()
            )));
        }
        let signing_key = p256::ecdsa::SigningKey::from(secret);
        let signature: p256::ecdsa::Signature = signing_key
            .sign_prehash_with_rng(&mut OsRng, digest)
            .map_err(|e| TrustError::InvalidKey(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }

    fn verify(&self, key: &PublicKey, message: &[u8], signature: &[u8]) -> Result<bool> {
        let PublicKey::EcdsaP256(public) = key else {
            return Err(key_mismatch(self.algorithm(), key.algorithm()));
        };
        let signature = if signature.len() == self.key_sizes().signature {
            match p256::ecdsa::Signature::from_slice(signature) {
                Ok(signature) => signature,
                // Right width, but r or s is zero or not below the group order.
                Err(_) => return Ok(false),
            }
        } else {
            p256::ecdsa::Signature::from_der(signature)
                .map_err(|e| TrustError::MalformedSignature(e.to_string()))?
        };
        let digest = hash::digest(message, HashAlgorithm::Sha256);
        let verifying_key = p256::ecdsa::VerifyingKey::from(public);
        Ok(verifying_key.verify_prehash(&digest, &signature).is_ok())
    }
}

pub struct Ed25519;

impl SigningScheme for Ed25519 {
    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::Ed25519Sha512
    }

    fn digest_requirement(&self) -> DigestRequirement {
        DigestRequirement::Message
    }

    fn key_sizes(&self) -> KeySizes {
        KeySizes {
            public_key: ed25519_dalek::PUBLIC_KEY_LENGTH,
            signature: ed25519_dalek::SIGNATURE_LENGTH,
        }
    }

    fn sign(&self, key: &PrivateKey, message: &[u8]) -> Result<Vec<u8>> {
        let PrivateKey::Ed25519(signing_key) = key else {
            return Err(key_mismatch(self.algorithm(), key.algorithm()));
        };
        Ok(signing_key.sign(message).to_bytes().to_vec())
    }

    fn verify(&self, key: &PublicKey, message: &[u8], signature: &[u8]) -> Result<bool> {
        let PublicKey::Ed25519(verifying_key) = key else {
            return Err(key_mismatch(self.algorithm(), key.algorithm()));
        };
        let signature = ed25519_dalek::Signature::from_slice(signature).map_err(|_| {
            TrustError::MalformedSignature(format!(
                "Ed25519 signatures are {} bytes, got {}",
                ed25519_dalek::SIGNATURE_LENGTH,
                signature.len()
            ))
        })?;
        Ok(verifying_key.verify(message, &signature).is_ok())
    }
}
