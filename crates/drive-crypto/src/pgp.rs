//! OpenPGP capability contract
//!
//! The operation set an OpenPGP implementation must supply. Key handles are
//! opaque to the SDK: `material` is whatever the provider needs to find its
//! own key again, and is never interpreted here.
//!
//! Verification never fails an operation. A bad or missing signature is
//! reported through [`VerificationStatus`] in the result; an `Err` means the
//! operation itself could not run (malformed armor, no matching key).

use crate::contexts::SigningContext;
use async_trait::async_trait;
use drive_core::{DriveError, VerificationStatus};
use serde::{Deserialize, Serialize};

/// ASCII-armored OpenPGP private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmoredKey(pub String);

/// ASCII-armored OpenPGP message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmoredMessage(pub String);

/// ASCII-armored detached OpenPGP signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmoredSignature(pub String);

/// Binary OpenPGP key packet: a session key encrypted to recipient keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPacket(pub Vec<u8>);

/// Folder-scoped HMAC key for lookup hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashKey(pub Vec<u8>);

/// Handle to an unlocked private key held by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKey {
    /// Provider-assigned identifier, stable for one key.
    pub key_id: String,
    /// Provider-defined material. Never interpreted by the SDK.
    pub material: Vec<u8>,
}

/// Handle to a public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    /// Provider-assigned identifier, matching the private half.
    pub key_id: String,
    /// Provider-defined material.
    pub material: Vec<u8>,
}

/// Symmetric session key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKey {
    /// Raw key bytes.
    pub bytes: Vec<u8>,
    /// Symmetric algorithm label, e.g. `aes256`.
    pub algorithm: String,
}

impl SessionKey {
    /// Wrap raw bytes with the default algorithm label.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            algorithm: "aes256".to_string(),
        }
    }
}

/// Result of a public-key encryption.
#[derive(Debug, Clone)]
pub struct EncryptedMessage {
    /// The armored message.
    pub armored: ArmoredMessage,
    /// The session key the message was encrypted under.
    pub session_key: SessionKey,
}

/// Result of decrypting an armored message.
#[derive(Debug, Clone)]
pub struct DecryptedMessage {
    /// Decrypted payload.
    pub data: Vec<u8>,
    /// Session key recovered from the message.
    pub session_key: SessionKey,
    /// Outcome of verifying the embedded signature.
    pub verified: VerificationStatus,
}

/// Result of a session-key encryption with an optional detached signature.
#[derive(Debug, Clone)]
pub struct SessionEncrypted {
    /// Ciphertext bytes.
    pub ciphertext: Vec<u8>,
    /// Plain armored detached signature over the cleartext, when a signing
    /// key was supplied. Callers decide whether to encrypt it.
    pub detached_signature: Option<ArmoredSignature>,
}

/// Decrypted bytes with a verification outcome.
#[derive(Debug, Clone)]
pub struct DecryptedBytes {
    /// Decrypted payload.
    pub data: Vec<u8>,
    /// Outcome of verifying the embedded signature.
    pub verified: VerificationStatus,
}

/// The externally supplied OpenPGP operation set.
#[async_trait]
pub trait OpenPgpProvider: Send + Sync {
    /// Cryptographically secure random bytes.
    async fn random_bytes(&self, count: usize) -> Result<Vec<u8>, DriveError>;

    /// Generate a new private key locked by `passphrase`.
    async fn generate_key(&self, passphrase: &str) -> Result<ArmoredKey, DriveError>;

    /// Unlock an armored private key.
    async fn unlock_key(
        &self,
        key: &ArmoredKey,
        passphrase: &str,
    ) -> Result<PrivateKey, DriveError>;

    /// Public half of an unlocked key.
    fn public_key(&self, key: &PrivateKey) -> Result<PublicKey, DriveError>;

    /// Generate a fresh session key.
    async fn generate_session_key(&self) -> Result<SessionKey, DriveError>;

    /// Encrypt `data` to `encryption_keys`, optionally signing with an
    /// embedded signature, and return the session key used.
    async fn encrypt_and_sign(
        &self,
        data: &[u8],
        encryption_keys: &[PublicKey],
        signing_key: Option<&PrivateKey>,
        context: Option<&SigningContext>,
    ) -> Result<EncryptedMessage, DriveError>;

    /// Encrypt `data` under an existing session key into an armored message
    /// with an embedded signature. Used to re-encrypt fields of existing
    /// nodes without re-wrapping the session key.
    async fn encrypt_and_sign_with_session_key(
        &self,
        data: &[u8],
        session_key: &SessionKey,
        signing_key: &PrivateKey,
        context: Option<&SigningContext>,
    ) -> Result<ArmoredMessage, DriveError>;

    /// Decrypt an armored message and verify its embedded signature against
    /// `verification_keys`.
    async fn decrypt_and_verify(
        &self,
        message: &ArmoredMessage,
        decryption_keys: &[PrivateKey],
        verification_keys: &[PublicKey],
        context: Option<&SigningContext>,
    ) -> Result<DecryptedMessage, DriveError>;

    /// Decrypt an armored message whose session key is already known, such
    /// as one produced by
    /// [`encrypt_and_sign_with_session_key`](Self::encrypt_and_sign_with_session_key),
    /// and verify its embedded signature.
    async fn decrypt_armored_with_session_key(
        &self,
        message: &ArmoredMessage,
        session_key: &SessionKey,
        verification_keys: &[PublicKey],
        context: Option<&SigningContext>,
    ) -> Result<DecryptedBytes, DriveError>;

    /// Encrypt a session key to recipient keys as a binary key packet.
    async fn encrypt_session_key(
        &self,
        session_key: &SessionKey,
        encryption_keys: &[PublicKey],
    ) -> Result<KeyPacket, DriveError>;

    /// Decrypt a binary key packet.
    async fn decrypt_session_key(
        &self,
        packet: &KeyPacket,
        decryption_keys: &[PrivateKey],
    ) -> Result<SessionKey, DriveError>;

    /// Encrypt raw bytes under a session key, optionally producing a plain
    /// detached signature over the cleartext.
    async fn encrypt_with_session_key(
        &self,
        data: &[u8],
        session_key: &SessionKey,
        signing_key: Option<&PrivateKey>,
    ) -> Result<SessionEncrypted, DriveError>;

    /// Decrypt raw bytes under a session key. No verification.
    async fn decrypt_with_session_key(
        &self,
        ciphertext: &[u8],
        session_key: &SessionKey,
    ) -> Result<Vec<u8>, DriveError>;

    /// Encrypt raw bytes under a session key with an embedded signature.
    /// Used for thumbnails, which carry no separate signature file.
    async fn encrypt_embedded_with_session_key(
        &self,
        data: &[u8],
        session_key: &SessionKey,
        signing_key: Option<&PrivateKey>,
    ) -> Result<Vec<u8>, DriveError>;

    /// Decrypt bytes produced by
    /// [`encrypt_embedded_with_session_key`](Self::encrypt_embedded_with_session_key)
    /// and verify the embedded signature.
    async fn decrypt_embedded_with_session_key(
        &self,
        ciphertext: &[u8],
        session_key: &SessionKey,
        verification_keys: &[PublicKey],
    ) -> Result<DecryptedBytes, DriveError>;

    /// Produce an armored detached signature.
    async fn sign_detached(
        &self,
        data: &[u8],
        signing_key: &PrivateKey,
        context: Option<&SigningContext>,
    ) -> Result<ArmoredSignature, DriveError>;

    /// Verify an armored detached signature.
    ///
    /// When `context` is supplied and marked critical, a signature lacking
    /// that context tag must report [`VerificationStatus::SignedAndInvalid`].
    async fn verify_detached(
        &self,
        data: &[u8],
        signature: &ArmoredSignature,
        verification_keys: &[PublicKey],
        context: Option<&SigningContext>,
    ) -> Result<VerificationStatus, DriveError>;
}
