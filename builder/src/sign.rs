// Licensed under the Apache-2.0 license

use crate::error::{Result, TrustError};
use crate::hash;
use crate::keygen::PrivateKey;
use crate::scheme::{DigestRequirement, SignatureAlgorithm};
use log::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    pub algorithm: SignatureAlgorithm,
    /// Digest that was signed; `None` for schemes that sign the message.
    pub digest: Option<Vec<u8>>,
    pub signature: Vec<u8>,
}

/// Signs `input` with `key`. For prehashed schemes `input` is the digest,
/// otherwise it is the raw message.
pub fn sign(
    key: &PrivateKey,
    algorithm: SignatureAlgorithm,
    input: &[u8],
) -> Result<SignatureRecord> {
    if key.algorithm() != algorithm {
        return Err(TrustError::InvalidKey(format!(
            "{} key cannot produce {algorithm} signatures",
            key.algorithm()
        )));
    }
    let scheme = algorithm.scheme();
    let signature = scheme.sign(key, input)?;
    let digest = match scheme.digest_requirement() {
        DigestRequirement::Prehashed(_) => Some(input.to_vec()),
        DigestRequirement::Message => None,
    };
    debug!("Produced {} byte {algorithm} signature", signature.len());
    Ok(SignatureRecord {
        algorithm,
        digest,
        signature,
    })
}

/// Signs image content, hashing it first when the scheme needs a digest.
pub fn sign_image(
    key: &PrivateKey,
    algorithm: SignatureAlgorithm,
    content: &[u8],
) -> Result<SignatureRecord> {
    match algorithm.scheme().digest_requirement() {
        DigestRequirement::Prehashed(hash_algorithm) => {
            sign(key, algorithm, &hash::digest(content, hash_algorithm))
        }
        DigestRequirement::Message => sign(key, algorithm, content),
    }
}
