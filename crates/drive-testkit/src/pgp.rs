//! Deterministic mock OpenPGP provider
//!
//! Not cryptography. Keys are seeded byte strings, "encryption" is an
//! XOR keystream derived with SHA-256, and signatures are digests anyone
//! holding the public half can recompute. What the mock does preserve is
//! every contract the SDK relies on: decryption requires the right private
//! key, verification requires the right public key, signature contexts are
//! enforced critically, and session keys round-trip through key packets.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use drive_core::{DriveError, VerificationStatus};
use drive_crypto::{
    ArmoredKey, ArmoredMessage, ArmoredSignature, DecryptedBytes, DecryptedMessage,
    EncryptedMessage, KeyPacket, OpenPgpProvider, PrivateKey, PublicKey, SessionEncrypted,
    SessionKey, SigningContext,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

fn sha256(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

/// XOR `data` with a keystream derived from `key`.
fn keystream_xor(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut counter = 0u64;
    while out.len() < data.len() {
        let block = sha256(&[key, &counter.to_le_bytes()]);
        for byte in block {
            if out.len() == data.len() {
                break;
            }
            out.push(byte ^ data[out.len()]);
        }
        counter += 1;
    }
    out
}

fn public_material(secret: &[u8]) -> Vec<u8> {
    sha256(&[b"mock-public", secret])
}

#[derive(Serialize, Deserialize)]
struct MockSignature {
    key_id: String,
    context: Option<String>,
    digest: String,
}

#[derive(Serialize, Deserialize)]
struct KeyWrap {
    key_id: String,
    wrapped: String,
}

#[derive(Serialize, Deserialize)]
struct MockMessage {
    wraps: Vec<KeyWrap>,
    payload: String,
    algorithm: String,
    signature: Option<MockSignature>,
}

#[derive(Serialize, Deserialize)]
struct MockLockedKey {
    key_id: String,
    locked_secret: String,
    passphrase_check: String,
}

#[derive(Serialize, Deserialize)]
struct SessionPayload {
    payload: String,
    signature: Option<MockSignature>,
}

/// Seeded mock implementation of [`OpenPgpProvider`].
pub struct MockPgpProvider {
    seed: u64,
    counter: Mutex<u64>,
}

impl MockPgpProvider {
    /// Provider with the default seed.
    pub fn new() -> Self {
        Self::with_seed(42)
    }

    /// Provider with a specific seed, for fixtures that must not collide.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            counter: Mutex::new(0),
        }
    }

    fn next_bytes(&self, count: usize) -> Vec<u8> {
        let mut counter = self.counter.lock();
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            let block = sha256(&[&self.seed.to_le_bytes(), &counter.to_le_bytes()]);
            *counter += 1;
            out.extend_from_slice(&block[..usize::min(32, count - out.len())]);
        }
        out
    }

    fn sign_digest(public: &[u8], data: &[u8], context: Option<&str>) -> String {
        let context_bytes = context.unwrap_or("").as_bytes();
        hex_encode(&sha256(&[b"mock-signature", public, context_bytes, data]))
    }

    fn make_signature(
        key: &PrivateKey,
        data: &[u8],
        context: Option<&SigningContext>,
    ) -> MockSignature {
        let public = public_material(&key.material);
        let context_value = context.map(|ctx| ctx.value.clone());
        MockSignature {
            key_id: key.key_id.clone(),
            context: context_value.clone(),
            digest: Self::sign_digest(&public, data, context_value.as_deref()),
        }
    }

    fn verify_signature(
        signature: &MockSignature,
        data: &[u8],
        verification_keys: &[PublicKey],
        expected_context: Option<&SigningContext>,
    ) -> VerificationStatus {
        if let Some(expected) = expected_context {
            if expected.critical && signature.context.as_deref() != Some(expected.value.as_str()) {
                return VerificationStatus::SignedAndInvalid;
            }
        }
        for key in verification_keys {
            let digest = Self::sign_digest(&key.material, data, signature.context.as_deref());
            if digest == signature.digest {
                return VerificationStatus::SignedAndValid;
            }
        }
        VerificationStatus::SignedAndInvalid
    }

    fn unwrap_session_key(
        message_wraps: &[KeyWrap],
        decryption_keys: &[PrivateKey],
        algorithm: &str,
    ) -> Result<SessionKey, DriveError> {
        for key in decryption_keys {
            let public = public_material(&key.material);
            for wrap in message_wraps {
                if wrap.key_id == key.key_id {
                    let wrapped = BASE64
                        .decode(&wrap.wrapped)
                        .map_err(|err| DriveError::decryption(format!("bad wrap: {err}")))?;
                    return Ok(SessionKey {
                        bytes: keystream_xor(&public, &wrapped),
                        algorithm: algorithm.to_string(),
                    });
                }
            }
        }
        Err(DriveError::decryption("no matching decryption key"))
    }
}

impl Default for MockPgpProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn encode_armored<T: Serialize>(kind: &str, value: &T) -> Result<String, DriveError> {
    let json = serde_json::to_vec(value)
        .map_err(|err| DriveError::decryption(format!("encode {kind}: {err}")))?;
    Ok(format!("mock-{kind}:{}", BASE64.encode(json)))
}

fn decode_armored<T: for<'de> Deserialize<'de>>(kind: &str, text: &str) -> Result<T, DriveError> {
    let payload = text
        .strip_prefix(&format!("mock-{kind}:"))
        .ok_or_else(|| DriveError::decryption(format!("not a mock {kind}")))?;
    let json = BASE64
        .decode(payload)
        .map_err(|err| DriveError::decryption(format!("bad {kind} armor: {err}")))?;
    serde_json::from_slice(&json)
        .map_err(|err| DriveError::decryption(format!("bad {kind} payload: {err}")))
}

#[async_trait]
impl OpenPgpProvider for MockPgpProvider {
    async fn random_bytes(&self, count: usize) -> Result<Vec<u8>, DriveError> {
        Ok(self.next_bytes(count))
    }

    async fn generate_key(&self, passphrase: &str) -> Result<ArmoredKey, DriveError> {
        let secret = self.next_bytes(32);
        let key_id = hex_encode(&self.next_bytes(8));
        let lock_key = sha256(&[b"mock-lock", passphrase.as_bytes()]);
        let locked = MockLockedKey {
            key_id,
            locked_secret: BASE64.encode(keystream_xor(&lock_key, &secret)),
            passphrase_check: hex_encode(&sha256(&[b"mock-check", passphrase.as_bytes()])),
        };
        Ok(ArmoredKey(encode_armored("key", &locked)?))
    }

    async fn unlock_key(
        &self,
        key: &ArmoredKey,
        passphrase: &str,
    ) -> Result<PrivateKey, DriveError> {
        let locked: MockLockedKey = decode_armored("key", &key.0)?;
        let check = hex_encode(&sha256(&[b"mock-check", passphrase.as_bytes()]));
        if check != locked.passphrase_check {
            return Err(DriveError::decryption("wrong key passphrase"));
        }
        let lock_key = sha256(&[b"mock-lock", passphrase.as_bytes()]);
        let wrapped = BASE64
            .decode(&locked.locked_secret)
            .map_err(|err| DriveError::decryption(format!("bad locked key: {err}")))?;
        Ok(PrivateKey {
            key_id: locked.key_id,
            material: keystream_xor(&lock_key, &wrapped),
        })
    }

    fn public_key(&self, key: &PrivateKey) -> Result<PublicKey, DriveError> {
        Ok(PublicKey {
            key_id: key.key_id.clone(),
            material: public_material(&key.material),
        })
    }

    async fn generate_session_key(&self) -> Result<SessionKey, DriveError> {
        Ok(SessionKey::new(self.next_bytes(32)))
    }

    async fn encrypt_and_sign(
        &self,
        data: &[u8],
        encryption_keys: &[PublicKey],
        signing_key: Option<&PrivateKey>,
        context: Option<&SigningContext>,
    ) -> Result<EncryptedMessage, DriveError> {
        if encryption_keys.is_empty() {
            return Err(DriveError::validation("no encryption keys"));
        }
        let session_key = self.generate_session_key().await?;
        let wraps = encryption_keys
            .iter()
            .map(|key| KeyWrap {
                key_id: key.key_id.clone(),
                wrapped: BASE64.encode(keystream_xor(&key.material, &session_key.bytes)),
            })
            .collect();
        let message = MockMessage {
            wraps,
            payload: BASE64.encode(keystream_xor(&session_key.bytes, data)),
            algorithm: session_key.algorithm.clone(),
            signature: signing_key.map(|key| Self::make_signature(key, data, context)),
        };
        Ok(EncryptedMessage {
            armored: ArmoredMessage(encode_armored("message", &message)?),
            session_key,
        })
    }

    async fn encrypt_and_sign_with_session_key(
        &self,
        data: &[u8],
        session_key: &SessionKey,
        signing_key: &PrivateKey,
        context: Option<&SigningContext>,
    ) -> Result<ArmoredMessage, DriveError> {
        let message = MockMessage {
            wraps: Vec::new(),
            payload: BASE64.encode(keystream_xor(&session_key.bytes, data)),
            algorithm: session_key.algorithm.clone(),
            signature: Some(Self::make_signature(signing_key, data, context)),
        };
        Ok(ArmoredMessage(encode_armored("message", &message)?))
    }

    async fn decrypt_and_verify(
        &self,
        message: &ArmoredMessage,
        decryption_keys: &[PrivateKey],
        verification_keys: &[PublicKey],
        context: Option<&SigningContext>,
    ) -> Result<DecryptedMessage, DriveError> {
        let parsed: MockMessage = decode_armored("message", &message.0)?;
        let session_key = if parsed.wraps.is_empty() {
            // Message encrypted directly under a known session key; the mock
            // cannot recover it, so decryption keys must not be required.
            return Err(DriveError::decryption(
                "message has no key packets; decrypt with its session key",
            ));
        } else {
            Self::unwrap_session_key(&parsed.wraps, decryption_keys, &parsed.algorithm)?
        };
        let payload = BASE64
            .decode(&parsed.payload)
            .map_err(|err| DriveError::decryption(format!("bad payload: {err}")))?;
        let data = keystream_xor(&session_key.bytes, &payload);
        let verified = match &parsed.signature {
            Some(signature) => {
                Self::verify_signature(signature, &data, verification_keys, context)
            }
            None => VerificationStatus::NotSigned,
        };
        Ok(DecryptedMessage {
            data,
            session_key,
            verified,
        })
    }

    async fn decrypt_armored_with_session_key(
        &self,
        message: &ArmoredMessage,
        session_key: &SessionKey,
        verification_keys: &[PublicKey],
        context: Option<&SigningContext>,
    ) -> Result<DecryptedBytes, DriveError> {
        let parsed: MockMessage = decode_armored("message", &message.0)?;
        let payload = BASE64
            .decode(&parsed.payload)
            .map_err(|err| DriveError::decryption(format!("bad payload: {err}")))?;
        let data = keystream_xor(&session_key.bytes, &payload);
        let verified = match &parsed.signature {
            Some(signature) => {
                Self::verify_signature(signature, &data, verification_keys, context)
            }
            None => VerificationStatus::NotSigned,
        };
        Ok(DecryptedBytes { data, verified })
    }

    async fn encrypt_session_key(
        &self,
        session_key: &SessionKey,
        encryption_keys: &[PublicKey],
    ) -> Result<KeyPacket, DriveError> {
        if encryption_keys.is_empty() {
            return Err(DriveError::validation("no encryption keys"));
        }
        let wraps: Vec<KeyWrap> = encryption_keys
            .iter()
            .map(|key| KeyWrap {
                key_id: key.key_id.clone(),
                wrapped: BASE64.encode(keystream_xor(&key.material, &session_key.bytes)),
            })
            .collect();
        let json = serde_json::to_vec(&wraps)
            .map_err(|err| DriveError::decryption(format!("encode key packet: {err}")))?;
        Ok(KeyPacket(json))
    }

    async fn decrypt_session_key(
        &self,
        packet: &KeyPacket,
        decryption_keys: &[PrivateKey],
    ) -> Result<SessionKey, DriveError> {
        let wraps: Vec<KeyWrap> = serde_json::from_slice(&packet.0)
            .map_err(|err| DriveError::decryption(format!("bad key packet: {err}")))?;
        Self::unwrap_session_key(&wraps, decryption_keys, "aes256")
    }

    async fn encrypt_with_session_key(
        &self,
        data: &[u8],
        session_key: &SessionKey,
        signing_key: Option<&PrivateKey>,
    ) -> Result<SessionEncrypted, DriveError> {
        let payload = SessionPayload {
            payload: BASE64.encode(keystream_xor(&session_key.bytes, data)),
            signature: None,
        };
        let detached_signature = match signing_key {
            Some(key) => {
                let signature = Self::make_signature(key, data, None);
                Some(ArmoredSignature(encode_armored("signature", &signature)?))
            }
            None => None,
        };
        let json = serde_json::to_vec(&payload)
            .map_err(|err| DriveError::decryption(format!("encode block: {err}")))?;
        Ok(SessionEncrypted {
            ciphertext: json,
            detached_signature,
        })
    }

    async fn decrypt_with_session_key(
        &self,
        ciphertext: &[u8],
        session_key: &SessionKey,
    ) -> Result<Vec<u8>, DriveError> {
        let payload: SessionPayload = serde_json::from_slice(ciphertext)
            .map_err(|err| DriveError::decryption(format!("bad block: {err}")))?;
        let raw = BASE64
            .decode(&payload.payload)
            .map_err(|err| DriveError::decryption(format!("bad block payload: {err}")))?;
        Ok(keystream_xor(&session_key.bytes, &raw))
    }

    async fn encrypt_embedded_with_session_key(
        &self,
        data: &[u8],
        session_key: &SessionKey,
        signing_key: Option<&PrivateKey>,
    ) -> Result<Vec<u8>, DriveError> {
        let payload = SessionPayload {
            payload: BASE64.encode(keystream_xor(&session_key.bytes, data)),
            signature: signing_key.map(|key| Self::make_signature(key, data, None)),
        };
        serde_json::to_vec(&payload)
            .map_err(|err| DriveError::decryption(format!("encode thumbnail: {err}")))
    }

    async fn decrypt_embedded_with_session_key(
        &self,
        ciphertext: &[u8],
        session_key: &SessionKey,
        verification_keys: &[PublicKey],
    ) -> Result<DecryptedBytes, DriveError> {
        let payload: SessionPayload = serde_json::from_slice(ciphertext)
            .map_err(|err| DriveError::decryption(format!("bad thumbnail: {err}")))?;
        let raw = BASE64
            .decode(&payload.payload)
            .map_err(|err| DriveError::decryption(format!("bad thumbnail payload: {err}")))?;
        let data = keystream_xor(&session_key.bytes, &raw);
        let verified = match &payload.signature {
            Some(signature) => Self::verify_signature(signature, &data, verification_keys, None),
            None => VerificationStatus::NotSigned,
        };
        Ok(DecryptedBytes { data, verified })
    }

    async fn sign_detached(
        &self,
        data: &[u8],
        signing_key: &PrivateKey,
        context: Option<&SigningContext>,
    ) -> Result<ArmoredSignature, DriveError> {
        let signature = Self::make_signature(signing_key, data, context);
        Ok(ArmoredSignature(encode_armored("signature", &signature)?))
    }

    async fn verify_detached(
        &self,
        data: &[u8],
        signature: &ArmoredSignature,
        verification_keys: &[PublicKey],
        context: Option<&SigningContext>,
    ) -> Result<VerificationStatus, DriveError> {
        let parsed: MockSignature = decode_armored("signature", &signature.0)?;
        Ok(Self::verify_signature(&parsed, data, verification_keys, context))
    }
}

impl MockPgpProvider {
    /// Generate an unlocked keypair directly, for fixtures.
    pub async fn make_key(&self) -> (PrivateKey, PublicKey) {
        let secret = self.next_bytes(32);
        let key_id = hex_encode(&self.next_bytes(8));
        let private = PrivateKey {
            key_id: key_id.clone(),
            material: secret,
        };
        let public = PublicKey {
            key_id,
            material: public_material(&private.material),
        };
        (private, public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drive_crypto::DriveCrypto;
    use std::sync::Arc;

    #[tokio::test]
    async fn encrypt_decrypt_roundtrip_with_signature() {
        let provider = Arc::new(MockPgpProvider::new());
        let (private, public) = provider.make_key().await;

        let encrypted = provider
            .encrypt_and_sign(b"hello", &[public.clone()], Some(&private), None)
            .await
            .unwrap();
        let decrypted = provider
            .decrypt_and_verify(&encrypted.armored, &[private], &[public], None)
            .await
            .unwrap();

        assert_eq!(decrypted.data, b"hello");
        assert_eq!(decrypted.verified, VerificationStatus::SignedAndValid);
        assert_eq!(decrypted.session_key, encrypted.session_key);
    }

    #[tokio::test]
    async fn wrong_verification_key_reports_invalid() {
        let provider = Arc::new(MockPgpProvider::new());
        let (private, _public) = provider.make_key().await;
        let (_other_private, other_public) = provider.make_key().await;

        let encrypted = provider
            .encrypt_and_sign(
                b"data",
                &[provider.public_key(&private).unwrap()],
                Some(&private),
                None,
            )
            .await
            .unwrap();
        let decrypted = provider
            .decrypt_and_verify(&encrypted.armored, &[private], &[other_public], None)
            .await
            .unwrap();

        assert_eq!(decrypted.verified, VerificationStatus::SignedAndInvalid);
    }

    #[tokio::test]
    async fn missing_critical_context_is_rejected() {
        let provider = Arc::new(MockPgpProvider::new());
        let crypto = DriveCrypto::new(provider.clone());
        let (inviter_private, inviter_public) = provider.make_key().await;
        let (_member_private, member_public) = provider.make_key().await;
        let session_key = provider.generate_session_key().await.unwrap();

        // Signature without any context must not verify as an invitation.
        let packet = provider
            .encrypt_session_key(&session_key, &[member_public])
            .await
            .unwrap();
        let bare_signature = provider
            .sign_detached(&packet.0, &inviter_private, None)
            .await
            .unwrap();
        let verified = crypto
            .verify_invitation(&packet, &bare_signature, &[inviter_public.clone()])
            .await
            .unwrap();
        assert_eq!(verified, VerificationStatus::SignedAndInvalid);

        // A properly tagged invitation verifies.
        let invitation = crypto
            .encrypt_invitation(
                &session_key,
                &[provider.public_key(&inviter_private).unwrap()],
                &inviter_private,
            )
            .await
            .unwrap();
        let verified = crypto
            .verify_invitation(&invitation.key_packet, &invitation.signature, &[inviter_public])
            .await
            .unwrap();
        assert_eq!(verified, VerificationStatus::SignedAndValid);
    }

    #[tokio::test]
    async fn generated_key_unlocks_only_with_its_passphrase() {
        let provider = MockPgpProvider::new();
        let armored = provider.generate_key("correct horse").await.unwrap();
        assert!(provider.unlock_key(&armored, "correct horse").await.is_ok());
        assert!(provider.unlock_key(&armored, "wrong").await.is_err());
    }
}
