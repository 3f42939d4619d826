// Licensed under the Apache-2.0 license

use fw_trust_builder::hash::{self, HashAlgorithm};
use fw_trust_builder::keygen::{read_private_key, read_public_key, write_key_files};
use fw_trust_builder::{
    append_validation_data, find_validation_block, parse_magic_value, sign, sign_image, verify,
    AppendRequest, FlashContainer, KeyPair, PublicKeyFormat, SignatureAlgorithm, TrustError,
};

const MAGIC: &str = "0x281ee6de,0x86518483,79362";

fn sample_image() -> FlashContainer {
    let mut image = FlashContainer::new();
    let code: Vec<u8> = (0..=255u8).cycle().take(0x1234).collect();
    image.insert_segment(0x0, &code).unwrap();
    // A second segment on the far side of a 64 KiB boundary.
    image.insert_segment(0x1_0000, b"vector table").unwrap();
    image
}

#[test]
fn test_ecdsa_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let private = dir.path().join("private.pem");
    let public = dir.path().join("public.pem");
    let input = dir.path().join("zephyr.hex");
    let output_hex = dir.path().join("signed.hex");
    let output_bin = dir.path().join("signed.bin");

    let algorithm = SignatureAlgorithm::EcdsaP256Sha256;
    write_key_files(
        &KeyPair::generate(algorithm),
        &private,
        Some(&public),
        PublicKeyFormat::Pem,
    )
    .unwrap();
    sample_image().write_hex(&input).unwrap();

    let image = FlashContainer::load(&input).unwrap();
    let digest = hash::digest_container(&image, HashAlgorithm::Sha256);
    let key = read_private_key(&private, algorithm).unwrap();
    let record = sign(&key, algorithm, &digest).unwrap();
    let public_key = read_public_key(&public, algorithm).unwrap();

    let magic = parse_magic_value(MAGIC).unwrap();
    let outcome = append_validation_data(&AppendRequest {
        input: &image,
        public_key: &public_key,
        signature: &record.signature,
        magic,
        offset: None,
        output_hex: Some(&output_hex),
        output_bin: Some(&output_bin),
        verify: true,
    })
    .unwrap();
    assert_eq!(outcome.offset, 0x1_000c);
    assert_eq!(outcome.block.to_bytes().len(), 140);

    let binary = std::fs::read(&output_bin).unwrap();
    let (position, block) = find_validation_block(&binary, magic, algorithm)
        .unwrap()
        .unwrap();
    assert_eq!(position, 0x1_000c);
    let embedded_key = block.public_key(algorithm).unwrap();
    assert_eq!(embedded_key, public_key);
    assert!(verify(&embedded_key, &image.to_binary(), &block.signature).unwrap());

    let signed_hex = FlashContainer::load(&output_hex).unwrap();
    assert_eq!(signed_hex.to_binary(), binary);
}

#[test]
fn test_ed25519_end_to_end_raw_public_key() {
    let dir = tempfile::tempdir().unwrap();
    let private = dir.path().join("private.pem");
    let public = dir.path().join("public.raw");
    let output_hex = dir.path().join("signed.hex");

    let algorithm = SignatureAlgorithm::Ed25519Sha512;
    write_key_files(
        &KeyPair::generate(algorithm),
        &private,
        Some(&public),
        PublicKeyFormat::Raw,
    )
    .unwrap();
    assert_eq!(std::fs::read(&public).unwrap().len(), 32);

    let image = sample_image();
    let key = read_private_key(&private, algorithm).unwrap();
    let record = sign_image(&key, algorithm, &image.to_binary()).unwrap();
    let public_key = read_public_key(&public, algorithm).unwrap();

    let outcome = append_validation_data(&AppendRequest {
        input: &image,
        public_key: &public_key,
        signature: &record.signature,
        magic: parse_magic_value(MAGIC).unwrap(),
        offset: Some(0x2_0000),
        output_hex: Some(&output_hex),
        output_bin: None,
        verify: true,
    })
    .unwrap();
    assert_eq!(outcome.offset, 0x2_0000);
    assert_eq!(outcome.block.to_bytes().len(), 108);

    let signed = FlashContainer::load(&output_hex).unwrap();
    assert_eq!(
        signed.read(0x2_0000, 108),
        Some(outcome.block.to_bytes().as_slice())
    );
}

#[test]
fn test_tampered_image_fails_verification() {
    let algorithm = SignatureAlgorithm::Ed25519Sha512;
    let pair = KeyPair::generate(algorithm);
    let image = sample_image();
    let record = sign_image(&pair.private_key, algorithm, &image.to_binary()).unwrap();

    let mut tampered = image.to_binary();
    tampered[0x100] ^= 0x01;
    assert!(!verify(&pair.public_key, &tampered, &record.signature).unwrap());

    let dir = tempfile::tempdir().unwrap();
    let output_bin = dir.path().join("signed.bin");
    let tampered = FlashContainer::from_binary(&tampered, 0).unwrap();
    let result = append_validation_data(&AppendRequest {
        input: &tampered,
        public_key: &pair.public_key,
        signature: &record.signature,
        magic: parse_magic_value(MAGIC).unwrap(),
        offset: None,
        output_hex: None,
        output_bin: Some(&output_bin),
        verify: true,
    });
    assert!(matches!(result, Err(TrustError::VerificationFailure)));
    assert!(!output_bin.exists());
}

#[test]
fn test_append_leaves_no_output_when_a_write_fails() {
    let algorithm = SignatureAlgorithm::Ed25519Sha512;
    let pair = KeyPair::generate(algorithm);
    let image = sample_image();
    let record = sign_image(&pair.private_key, algorithm, &image.to_binary()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let output_hex = dir.path().join("out.hex");
    let output_bin = dir.path().join("out.bin");
    std::fs::create_dir(&output_bin).unwrap();

    let result = append_validation_data(&AppendRequest {
        input: &image,
        public_key: &pair.public_key,
        signature: &record.signature,
        magic: parse_magic_value(MAGIC).unwrap(),
        offset: None,
        output_hex: Some(&output_hex),
        output_bin: Some(&output_bin),
        verify: true,
    });
    assert!(matches!(result, Err(TrustError::Io { .. })));
    assert!(!output_hex.exists());
}
