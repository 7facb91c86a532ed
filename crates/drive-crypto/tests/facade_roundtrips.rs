//! Round-trip tests for the Drive crypto façade over the mock provider.

use drive_core::VerificationStatus;
use drive_crypto::{DriveCrypto, OpenPgpProvider};
use drive_testkit::MockPgpProvider;
use std::sync::Arc;

fn crypto() -> (Arc<MockPgpProvider>, DriveCrypto) {
    let provider = Arc::new(MockPgpProvider::new());
    let facade = DriveCrypto::new(provider.clone());
    (provider, facade)
}

#[tokio::test]
async fn generated_key_decrypts_with_parent_keys() {
    let (provider, crypto) = crypto();
    let (address_private, address_public) = provider.make_key().await;
    let (parent_private, parent_public) = provider.make_key().await;

    let (armored, decrypted) = crypto
        .generate_key(&[parent_public], &address_private)
        .await
        .unwrap();

    let reopened = crypto
        .decrypt_key(
            &armored.key,
            &armored.passphrase,
            Some(&armored.passphrase_signature),
            &[parent_private],
            &[address_public],
        )
        .await
        .unwrap();

    assert_eq!(reopened.key, decrypted.key);
    assert_eq!(reopened.verified, VerificationStatus::SignedAndValid);
    assert_eq!(
        reopened.passphrase_session_key,
        decrypted.passphrase_session_key
    );
}

#[tokio::test]
async fn node_name_reencrypts_under_returned_session_key() {
    let (provider, crypto) = crypto();
    let (address_private, address_public) = provider.make_key().await;
    let (node_private, node_public) = provider.make_key().await;

    let armored = crypto
        .encrypt_node_name("report.pdf", None, Some(&node_public), &address_private)
        .await
        .unwrap();
    let decrypted = crypto
        .decrypt_node_name(&armored, &[node_private], &[address_public.clone()])
        .await
        .unwrap();
    assert_eq!(decrypted.name, "report.pdf");
    assert_eq!(decrypted.verified, VerificationStatus::SignedAndValid);

    // Rename path: re-encrypt under the recovered session key.
    let renamed = crypto
        .encrypt_node_name(
            "report.pdf",
            Some(&decrypted.session_key),
            None,
            &address_private,
        )
        .await
        .unwrap();
    let reopened = crypto
        .decrypt_node_name_with_session_key(&renamed, &decrypted.session_key, &[address_public])
        .await
        .unwrap();
    assert_eq!(reopened.name, "report.pdf");
    assert_eq!(reopened.verified, VerificationStatus::SignedAndValid);
}

#[tokio::test]
async fn encrypt_node_name_requires_a_key() {
    let (provider, crypto) = crypto();
    let (signing, _) = provider.make_key().await;
    let result = crypto
        .encrypt_node_name("x", None, None, &signing)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn manifest_signature_roundtrips() {
    let (provider, crypto) = crypto();
    let (address_private, address_public) = provider.make_key().await;

    let manifest: Vec<u8> = (0u8..80).collect();
    let signature = crypto
        .sign_manifest(&manifest, &address_private)
        .await
        .unwrap();
    let verified = crypto
        .verify_manifest(&manifest, &signature, &[address_public.clone()])
        .await
        .unwrap();
    assert_eq!(verified, VerificationStatus::SignedAndValid);

    let mut tampered = manifest.clone();
    tampered[0] ^= 1;
    let verified = crypto
        .verify_manifest(&tampered, &signature, &[address_public])
        .await
        .unwrap();
    assert_eq!(verified, VerificationStatus::SignedAndInvalid);
}

#[tokio::test]
async fn hash_key_accepts_node_or_address_signature() {
    let (provider, crypto) = crypto();
    let (address_private, address_public) = provider.make_key().await;
    let (node_private, node_public) = provider.make_key().await;

    // Normal case: signed by the node key.
    let generated = crypto.generate_hash_key(&node_private).await.unwrap();
    let (key, verified) = crypto
        .decrypt_node_hash_key(&generated.armored, &node_private, &[])
        .await
        .unwrap();
    assert_eq!(key, generated.key);
    assert_eq!(verified, VerificationStatus::SignedAndValid);

    // Legacy case: signed by the address key instead.
    let legacy = provider
        .encrypt_and_sign(
            &generated.key.0,
            &[node_public],
            Some(&address_private),
            None,
        )
        .await
        .unwrap();
    let (_, verified) = crypto
        .decrypt_node_hash_key(&legacy.armored, &node_private, &[address_public])
        .await
        .unwrap();
    assert_eq!(verified, VerificationStatus::SignedAndValid);

    // No matching key at all: invalid, but not an error.
    let (_, verified) = crypto
        .decrypt_node_hash_key(&legacy.armored, &node_private, &[])
        .await
        .unwrap();
    assert_eq!(verified, VerificationStatus::SignedAndInvalid);
}

#[tokio::test]
async fn blocks_decrypt_and_verify_through_encrypted_signature() {
    let (provider, crypto) = crypto();
    let (address_private, address_public) = provider.make_key().await;
    let session_key = provider.generate_session_key().await.unwrap();

    let data = b"twelve bytes";
    let block = crypto
        .encrypt_block(data, &session_key, &address_private)
        .await
        .unwrap();
    let decrypted = crypto
        .decrypt_block(
            &block.ciphertext,
            Some(&block.encrypted_signature),
            &session_key,
            &[address_public],
        )
        .await
        .unwrap();

    assert_eq!(decrypted.data, data);
    assert_eq!(decrypted.verified, VerificationStatus::SignedAndValid);
}

#[tokio::test]
async fn thumbnail_blocks_use_embedded_signatures() {
    let (provider, crypto) = crypto();
    let (address_private, address_public) = provider.make_key().await;
    let session_key = provider.generate_session_key().await.unwrap();

    let encrypted = crypto
        .encrypt_thumbnail_block(b"tiny image", &session_key, &address_private)
        .await
        .unwrap();
    let decrypted = crypto
        .decrypt_thumbnail_block(&encrypted, &session_key, &[address_public])
        .await
        .unwrap();
    assert_eq!(decrypted.data, b"tiny image");
    assert_eq!(decrypted.verified, VerificationStatus::SignedAndValid);
}
