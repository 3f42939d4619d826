// Licensed under the Apache-2.0 license

use anyhow::{Context, Result};
use fw_trust_builder::container::persist_outputs;
use fw_trust_builder::hash::{self, HashAlgorithm};
use fw_trust_builder::keygen::{read_private_key, read_public_key, write_key_files};
use fw_trust_builder::{
    sign_image, FlashContainer, KeyPair, PublicKeyFormat, SignatureAlgorithm, TrustError,
};
use std::fs;
use std::path::Path;

/// Image content as signed and verified: hex files are flattened first.
pub(crate) fn load_message(path: &Path) -> Result<Vec<u8>> {
    let container = FlashContainer::load(path)
        .with_context(|| format!("Failed to load image {}", path.display()))?;
    Ok(container.to_binary())
}

pub(crate) fn keygen(
    algorithm: SignatureAlgorithm,
    private: &Path,
    public: Option<&Path>,
    format: PublicKeyFormat,
) -> Result<()> {
    let pair = KeyPair::generate(algorithm);
    write_key_files(&pair, private, public, format)?;
    println!("Private key written to {}", private.display());
    if let Some(public) = public {
        println!("Public key written to {}", public.display());
    }
    Ok(())
}

pub(crate) fn hash(algorithm: HashAlgorithm, input: &Path, output: &Path) -> Result<()> {
    let container = FlashContainer::load(input)?;
    let digest = hash::digest_container(&container, algorithm);
    persist_outputs(&[(output, digest.as_slice())])?;
    println!("{algorithm} {}", hex::encode(&digest));
    Ok(())
}

pub(crate) fn sign(
    algorithm: SignatureAlgorithm,
    key: &Path,
    input: &Path,
    output: &Path,
    image: bool,
) -> Result<()> {
    let private_key = read_private_key(key, algorithm)
        .with_context(|| format!("Failed to load private key {}", key.display()))?;
    let message = load_message(input)?;
    let record = if image {
        sign_image(&private_key, algorithm, &message)?
    } else {
        fw_trust_builder::sign(&private_key, algorithm, &message)?
    };
    persist_outputs(&[(output, record.signature.as_slice())])?;
    println!("{algorithm} signature written to {}", output.display());
    Ok(())
}

pub(crate) fn verify(
    algorithm: SignatureAlgorithm,
    public_key: &Path,
    input: &Path,
    signature: &Path,
) -> Result<()> {
    let public_key = read_public_key(public_key, algorithm)?;
    let message = load_message(input)?;
    let signature =
        fs::read(signature).with_context(|| format!("Unable to read {}", signature.display()))?;
    if !fw_trust_builder::verify(&public_key, &message, &signature)? {
        return Err(TrustError::VerificationFailure)
            .with_context(|| format!("{algorithm} signature does not match {}", input.display()));
    }
    println!("Signature is valid!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify_commands() {
        let dir = tempfile::tempdir().unwrap();
        let private = dir.path().join("private.pem");
        let public = dir.path().join("public.pem");
        let image = dir.path().join("app.bin");
        let digest = dir.path().join("app.sha256");
        let signature = dir.path().join("app.sig");
        fs::write(&image, b"application").unwrap();

        let algorithm = SignatureAlgorithm::EcdsaP256Sha256;
        keygen(algorithm, &private, Some(&public), PublicKeyFormat::Pem).unwrap();
        hash(HashAlgorithm::Sha256, &image, &digest).unwrap();
        assert_eq!(fs::read(&digest).unwrap().len(), 32);

        sign(algorithm, &private, &digest, &signature, false).unwrap();
        verify(algorithm, &public, &image, &signature).unwrap();

        fs::write(&image, b"applicatioN").unwrap();
        let err = verify(algorithm, &public, &image, &signature).unwrap_err();
        assert!(err
            .downcast_ref::<TrustError>()
            .is_some_and(TrustError::is_verification_failure));
    }

    #[test]
    fn test_ecdsa_sign_rejects_undigested_input() {
        let dir = tempfile::tempdir().unwrap();
        let private = dir.path().join("private.pem");
        let image = dir.path().join("app.bin");
        let signature = dir.path().join("app.sig");
        fs::write(&image, b"not a digest").unwrap();

        let algorithm = SignatureAlgorithm::EcdsaP256Sha256;
        keygen(algorithm, &private, None, PublicKeyFormat::Pem).unwrap();
        assert!(sign(algorithm, &private, &image, &signature, false).is_err());
        sign(algorithm, &private, &image, &signature, true).unwrap();
        assert_eq!(fs::read(&signature).unwrap().len(), 64);
    }

    #[test]
    fn test_ed25519_signs_hex_content() {
        let dir = tempfile::tempdir().unwrap();
        let private = dir.path().join("private.pem");
        let public = dir.path().join("public.raw");
        let image = dir.path().join("app.hex");
        let signature = dir.path().join("app.sig");
        FlashContainer::from_binary(b"hex encoded app", 0x1000)
            .unwrap()
            .write_hex(&image)
            .unwrap();

        let algorithm = SignatureAlgorithm::Ed25519Sha512;
        keygen(algorithm, &private, Some(&public), PublicKeyFormat::Raw).unwrap();
        sign(algorithm, &private, &image, &signature, false).unwrap();
        verify(algorithm, &public, &image, &signature).unwrap();
    }
}
