// Licensed under the Apache-2.0 license

//! Signing flow as a chain of states. Each transition consumes the previous
//! state, so an image cannot be embedded before it has been signed.
//!
//! `Unsigned -> Digested -> Signed -> (Verified) -> Embedded`

use crate::container::FlashContainer;
use crate::error::{Result, TrustError};
use crate::hash;
use crate::keygen::{PrivateKey, PublicKey};
use crate::scheme::{DigestRequirement, SignatureAlgorithm};
use crate::sign::{self, SignatureRecord};
use crate::validation::{self, embed_block, ValidationBlock};
use flash_image::VALIDATION_MAGIC_WORDS;

pub struct Unsigned {
    image: FlashContainer,
    algorithm: SignatureAlgorithm,
}

pub struct Digested {
    image: FlashContainer,
    algorithm: SignatureAlgorithm,
    message: Vec<u8>,
    digest: Option<Vec<u8>>,
}

pub struct Signed {
    image: FlashContainer,
    message: Vec<u8>,
    record: SignatureRecord,
}

pub struct Verified {
    signed: Signed,
    public_key: PublicKey,
}

#[derive(Debug)]
pub struct Embedded {
    pub image: FlashContainer,
    pub offset: u32,
    pub block: ValidationBlock,
    pub record: SignatureRecord,
}

impl Unsigned {
    pub fn new(image: FlashContainer, algorithm: SignatureAlgorithm) -> Self {
        Self { image, algorithm }
    }

    /// Flattens the image and hashes it if the scheme signs a digest.
    pub fn digest(self) -> Digested {
        let message = self.image.to_binary();
        let digest = match self.algorithm.scheme().digest_requirement() {
            DigestRequirement::Prehashed(algorithm) => Some(hash::digest(&message, algorithm)),
            DigestRequirement::Message => None,
        };
        Digested {
            image: self.image,
            algorithm: self.algorithm,
            message,
            digest,
        }
    }
}

impl Digested {
    pub fn digest(&self) -> Option<&[u8]> {
        self.digest.as_deref()
    }

    pub fn sign(self, key: &PrivateKey) -> Result<Signed> {
        let input = self.digest.as_deref().unwrap_or(&self.message);
        let record = sign::sign(key, self.algorithm, input)?;
        Ok(Signed {
            image: self.image,
            message: self.message,
            record,
        })
    }
}

impl Signed {
    pub fn record(&self) -> &SignatureRecord {
        &self.record
    }

    pub fn verify(self, public_key: PublicKey) -> Result<Verified> {
        if !validation::verify(&public_key, &self.message, &self.record.signature)? {
            return Err(TrustError::VerificationFailure);
        }
        Ok(Verified {
            signed: self,
            public_key,
        })
    }

    /// Embeds without checking the signature against `public_key`.
    pub fn embed(
        self,
        public_key: &PublicKey,
        magic: [u32; VALIDATION_MAGIC_WORDS],
        offset: Option<u32>,
    ) -> Result<Embedded> {
        let block = ValidationBlock::new(magic, public_key, &self.record.signature)?;
        let (image, offset) = embed_block(&self.image, offset, &block.to_bytes())?;
        Ok(Embedded {
            image,
            offset,
            block,
            record: self.record,
        })
    }
}

impl Verified {
    pub fn embed(
        self,
        magic: [u32; VALIDATION_MAGIC_WORDS],
        offset: Option<u32>,
    ) -> Result<Embedded> {
        self.signed.embed(&self.public_key, magic, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen::KeyPair;
    use crate::validation::find_validation_block;

    const MAGIC: [u32; 3] = [0x281e_e6de, 0x8651_8483, 79362];

    #[test]
    fn test_full_flow() {
        for algorithm in SignatureAlgorithm::ALL {
            let pair = KeyPair::generate(algorithm);
            let image = FlashContainer::from_binary(&[0x5a; 1000], 0x8000).unwrap();

            let digested = Unsigned::new(image, algorithm).digest();
            assert_eq!(
                digested.digest().is_some(),
                algorithm == SignatureAlgorithm::EcdsaP256Sha256
            );
            let embedded = digested
                .sign(&pair.private_key)
                .unwrap()
                .verify(pair.public_key.clone())
                .unwrap()
                .embed(MAGIC, None)
                .unwrap();
            assert_eq!(embedded.offset, 0x8000 + 1000);

            let binary = embedded.image.to_binary();
            let (position, block) = find_validation_block(&binary, MAGIC, algorithm)
                .unwrap()
                .unwrap();
            assert_eq!(position, 1000);
            let key = block.public_key(algorithm).unwrap();
            assert!(validation::verify(&key, &binary[..1000], &block.signature).unwrap());
        }
    }

    #[test]
    fn test_rerun_is_independent() {
        let pair = KeyPair::generate(SignatureAlgorithm::Ed25519Sha512);
        let image = FlashContainer::from_binary(b"payload", 0).unwrap();
        let first = Unsigned::new(image.clone(), SignatureAlgorithm::Ed25519Sha512)
            .digest()
            .sign(&pair.private_key)
            .unwrap();
        let second = Unsigned::new(image, SignatureAlgorithm::Ed25519Sha512)
            .digest()
            .sign(&pair.private_key)
            .unwrap();
        assert_eq!(first.record(), second.record());
    }

    #[test]
    fn test_verify_with_other_key_fails() {
        let pair = KeyPair::generate(SignatureAlgorithm::EcdsaP256Sha256);
        let other = KeyPair::generate(SignatureAlgorithm::EcdsaP256Sha256);
        let image = FlashContainer::from_binary(b"payload", 0).unwrap();
        let signed = Unsigned::new(image, SignatureAlgorithm::EcdsaP256Sha256)
            .digest()
            .sign(&pair.private_key)
            .unwrap();
        assert!(matches!(
            signed.verify(other.public_key),
            Err(TrustError::VerificationFailure)
        ));
    }
}
