//! High-level Drive crypto operations
//!
//! The façade ties the OpenPGP capability to the Drive key hierarchy: every
//! node owns a private key locked by a random passphrase that is itself
//! encrypted to the parent (or share) key; folders additionally own a hash
//! key; files own a content session key signed by the node key.

use crate::contexts::SigningContext;
use crate::pgp::{
    ArmoredKey, ArmoredMessage, ArmoredSignature, DecryptedBytes, HashKey, KeyPacket,
    OpenPgpProvider, PrivateKey, PublicKey, SessionEncrypted, SessionKey,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use drive_core::{DriveError, VerificationStatus};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

/// Size of a generated node passphrase before base64 encoding.
const PASSPHRASE_BYTES: usize = 32;

/// Size of a generated folder hash key.
const HASH_KEY_BYTES: usize = 32;

/// Armored pieces of a freshly generated node key, as sent to the server.
#[derive(Debug, Clone)]
pub struct ArmoredNodeKey {
    /// The locked private key.
    pub key: ArmoredKey,
    /// The passphrase, encrypted to the parent (or share) key.
    pub passphrase: ArmoredMessage,
    /// Detached signature over the cleartext passphrase.
    pub passphrase_signature: ArmoredSignature,
}

/// Decrypted counterparts kept by the client after key generation.
#[derive(Debug, Clone)]
pub struct DecryptedNodeKey {
    /// The cleartext passphrase, base64-encoded for legacy compatibility.
    pub passphrase: String,
    /// The unlocked private key.
    pub key: PrivateKey,
    /// Session key of the encrypted passphrase message.
    pub passphrase_session_key: SessionKey,
}

/// Result of decrypting an existing node or share key.
#[derive(Debug, Clone)]
pub struct DecryptedKey {
    /// The unlocked private key.
    pub key: PrivateKey,
    /// The cleartext passphrase, kept for re-wrapping on move.
    pub passphrase: String,
    /// Session key of the passphrase message.
    pub passphrase_session_key: SessionKey,
    /// Verification of the passphrase signature.
    pub verified: VerificationStatus,
}

/// Encrypted passphrase pieces produced for an existing key.
#[derive(Debug, Clone)]
pub struct EncryptedPassphrase {
    /// The encrypted passphrase message.
    pub passphrase: ArmoredMessage,
    /// Detached signature over the cleartext passphrase.
    pub signature: ArmoredSignature,
    /// Session key the passphrase was encrypted under.
    pub session_key: SessionKey,
}

/// A freshly generated folder hash key.
#[derive(Debug, Clone)]
pub struct GeneratedHashKey {
    /// Encrypted and signed form, as sent to the server.
    pub armored: ArmoredMessage,
    /// Cleartext key for immediate use.
    pub key: HashKey,
}

/// Result of decrypting a node name.
#[derive(Debug, Clone)]
pub struct DecryptedName {
    /// The cleartext name. Strict UTF-8.
    pub name: String,
    /// Session key of the name message, reusable for renames.
    pub session_key: SessionKey,
    /// Verification of the embedded signature.
    pub verified: VerificationStatus,
}

/// An encrypted content block with its encrypted detached signature.
#[derive(Debug, Clone)]
pub struct EncryptedBlock {
    /// Ciphertext to upload.
    pub ciphertext: Vec<u8>,
    /// Detached signature over the cleartext, itself encrypted to the
    /// session key.
    pub encrypted_signature: Vec<u8>,
}

/// An invitation to a share: the share session key wrapped for the invitee
/// plus the inviter's context-tagged signature.
#[derive(Debug, Clone)]
pub struct Invitation {
    /// Share session key encrypted to the invitee.
    pub key_packet: KeyPacket,
    /// Inviter signature over the key packet.
    pub signature: ArmoredSignature,
}

/// Strict UTF-8 decode of a decrypted payload.
fn strict_utf8(bytes: Vec<u8>, what: &str) -> Result<String, DriveError> {
    String::from_utf8(bytes)
        .map_err(|err| DriveError::decryption(format!("{what} is not valid UTF-8: {err}")))
}

/// Deterministic lookup hash of a name under a folder hash key.
///
/// HMAC-SHA-256 of the UTF-8 name, hex-encoded. The server stores these to
/// detect name collisions without learning names.
pub fn generate_lookup_hash(name: &str, parent_hash_key: &HashKey) -> Result<String, DriveError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(&parent_hash_key.0)
        .map_err(|err| DriveError::decryption(format!("invalid hash key: {err}")))?;
    mac.update(name.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// High-level Drive crypto operations over an injected OpenPGP provider.
#[derive(Clone)]
pub struct DriveCrypto {
    provider: Arc<dyn OpenPgpProvider>,
}

impl DriveCrypto {
    /// Wrap an OpenPGP provider.
    pub fn new(provider: Arc<dyn OpenPgpProvider>) -> Self {
        Self { provider }
    }

    /// Access the underlying provider.
    pub fn provider(&self) -> &Arc<dyn OpenPgpProvider> {
        &self.provider
    }

    /// Generate a node key: a random base64 passphrase, a key locked by it,
    /// and the passphrase encrypted to `encryption_keys` and signed by
    /// `signing_key`.
    pub async fn generate_key(
        &self,
        encryption_keys: &[PublicKey],
        signing_key: &PrivateKey,
    ) -> Result<(ArmoredNodeKey, DecryptedNodeKey), DriveError> {
        let passphrase = BASE64.encode(self.provider.random_bytes(PASSPHRASE_BYTES).await?);
        let locked = self.provider.generate_key(&passphrase).await?;
        let key = self.provider.unlock_key(&locked, &passphrase).await?;
        let encrypted = self
            .encrypt_passphrase(&passphrase, encryption_keys, signing_key)
            .await?;

        Ok((
            ArmoredNodeKey {
                key: locked,
                passphrase: encrypted.passphrase,
                passphrase_signature: encrypted.signature,
            },
            DecryptedNodeKey {
                passphrase,
                key,
                passphrase_session_key: encrypted.session_key,
            },
        ))
    }

    /// Encrypt and sign a key passphrase for new recipients.
    pub async fn encrypt_passphrase(
        &self,
        passphrase: &str,
        encryption_keys: &[PublicKey],
        signing_key: &PrivateKey,
    ) -> Result<EncryptedPassphrase, DriveError> {
        let encrypted = self
            .provider
            .encrypt_and_sign(passphrase.as_bytes(), encryption_keys, None, None)
            .await?;
        let signature = self
            .provider
            .sign_detached(passphrase.as_bytes(), signing_key, None)
            .await?;
        Ok(EncryptedPassphrase {
            passphrase: encrypted.armored,
            signature,
            session_key: encrypted.session_key,
        })
    }

    /// Decrypt a node or share key: decrypt the passphrase with the parent
    /// keys, verify its detached signature, and unlock the key.
    ///
    /// A bad signature does not fail the operation; it is reported in
    /// `verified`.
    pub async fn decrypt_key(
        &self,
        key: &ArmoredKey,
        passphrase: &ArmoredMessage,
        passphrase_signature: Option<&ArmoredSignature>,
        decryption_keys: &[PrivateKey],
        verification_keys: &[PublicKey],
    ) -> Result<DecryptedKey, DriveError> {
        let decrypted = self
            .provider
            .decrypt_and_verify(passphrase, decryption_keys, &[], None)
            .await?;
        let passphrase_text = strict_utf8(decrypted.data, "key passphrase")?;

        let verified = match passphrase_signature {
            Some(signature) => {
                self.provider
                    .verify_detached(
                        passphrase_text.as_bytes(),
                        signature,
                        verification_keys,
                        None,
                    )
                    .await?
            }
            None => VerificationStatus::NotSigned,
        };

        let unlocked = self.provider.unlock_key(key, &passphrase_text).await?;
        Ok(DecryptedKey {
            key: unlocked,
            passphrase: passphrase_text,
            passphrase_session_key: decrypted.session_key,
            verified,
        })
    }

    /// Decrypt a key whose passphrase carries no signature. Used only for
    /// invitations, where the share key arrives before membership exists.
    pub async fn decrypt_unsigned_key(
        &self,
        key: &ArmoredKey,
        passphrase: &ArmoredMessage,
        decryption_keys: &[PrivateKey],
    ) -> Result<PrivateKey, DriveError> {
        let decrypted = self
            .provider
            .decrypt_and_verify(passphrase, decryption_keys, &[], None)
            .await?;
        let passphrase_text = strict_utf8(decrypted.data, "key passphrase")?;
        self.provider.unlock_key(key, &passphrase_text).await
    }

    /// Wrap a session key for new recipients.
    pub async fn encrypt_session_key(
        &self,
        session_key: &SessionKey,
        encryption_keys: &[PublicKey],
    ) -> Result<KeyPacket, DriveError> {
        self.provider
            .encrypt_session_key(session_key, encryption_keys)
            .await
    }

    /// Unwrap a binary key packet.
    pub async fn decrypt_session_key(
        &self,
        packet: &KeyPacket,
        decryption_keys: &[PrivateKey],
    ) -> Result<SessionKey, DriveError> {
        self.provider
            .decrypt_session_key(packet, decryption_keys)
            .await
    }

    /// Recover the session key of an armored message.
    pub async fn decrypt_session_key_from_message(
        &self,
        message: &ArmoredMessage,
        decryption_keys: &[PrivateKey],
    ) -> Result<SessionKey, DriveError> {
        let decrypted = self
            .provider
            .decrypt_and_verify(message, decryption_keys, &[], None)
            .await?;
        Ok(decrypted.session_key)
    }

    /// Unwrap a content key packet and verify its detached signature over
    /// the session key bytes.
    pub async fn decrypt_and_verify_session_key(
        &self,
        packet: &KeyPacket,
        signature: Option<&ArmoredSignature>,
        decryption_keys: &[PrivateKey],
        verification_keys: &[PublicKey],
    ) -> Result<(SessionKey, VerificationStatus), DriveError> {
        let session_key = self
            .provider
            .decrypt_session_key(packet, decryption_keys)
            .await?;
        let verified = match signature {
            Some(signature) => {
                self.provider
                    .verify_detached(&session_key.bytes, signature, verification_keys, None)
                    .await?
            }
            None => VerificationStatus::NotSigned,
        };
        Ok((session_key, verified))
    }

    /// Encrypt an armored signature to a session key, hiding the signer.
    pub async fn encrypt_signature(
        &self,
        signature: &ArmoredSignature,
        session_key: &SessionKey,
    ) -> Result<Vec<u8>, DriveError> {
        let encrypted = self
            .provider
            .encrypt_with_session_key(signature.0.as_bytes(), session_key, None)
            .await?;
        Ok(encrypted.ciphertext)
    }

    /// Generate a folder hash key: 32 random bytes, encrypted to the node
    /// key and signed by it.
    pub async fn generate_hash_key(
        &self,
        node_key: &PrivateKey,
    ) -> Result<GeneratedHashKey, DriveError> {
        let bytes = self.provider.random_bytes(HASH_KEY_BYTES).await?;
        let node_public = self.provider.public_key(node_key)?;
        let encrypted = self
            .provider
            .encrypt_and_sign(&bytes, &[node_public], Some(node_key), None)
            .await?;
        Ok(GeneratedHashKey {
            armored: encrypted.armored,
            key: HashKey(bytes),
        })
    }

    /// Decrypt a folder hash key.
    ///
    /// Legacy tolerance: the signature may come from the node key or from
    /// the signing address key; either verifying is enough.
    pub async fn decrypt_node_hash_key(
        &self,
        armored: &ArmoredMessage,
        node_key: &PrivateKey,
        address_keys: &[PublicKey],
    ) -> Result<(HashKey, VerificationStatus), DriveError> {
        let node_public = self.provider.public_key(node_key)?;
        let mut verification_keys = vec![node_public];
        verification_keys.extend_from_slice(address_keys);

        let decrypted = self
            .provider
            .decrypt_and_verify(
                armored,
                std::slice::from_ref(node_key),
                &verification_keys,
                None,
            )
            .await?;
        Ok((HashKey(decrypted.data), decrypted.verified))
    }

    /// Encrypt a node name.
    ///
    /// Either `session_key` (re-encrypt for an existing node) or
    /// `encryption_key` (new node) must be supplied.
    pub async fn encrypt_node_name(
        &self,
        name: &str,
        session_key: Option<&SessionKey>,
        encryption_key: Option<&PublicKey>,
        signing_key: &PrivateKey,
    ) -> Result<ArmoredMessage, DriveError> {
        match (session_key, encryption_key) {
            (Some(session_key), _) => {
                self.provider
                    .encrypt_and_sign_with_session_key(
                        name.as_bytes(),
                        session_key,
                        signing_key,
                        None,
                    )
                    .await
            }
            (None, Some(encryption_key)) => {
                let encrypted = self
                    .provider
                    .encrypt_and_sign(
                        name.as_bytes(),
                        std::slice::from_ref(encryption_key),
                        Some(signing_key),
                        None,
                    )
                    .await?;
                Ok(encrypted.armored)
            }
            (None, None) => Err(DriveError::validation(
                "encrypt_node_name requires a session key or an encryption key",
            )),
        }
    }

    /// Decrypt a node name. Never fails on a bad signature.
    pub async fn decrypt_node_name(
        &self,
        armored: &ArmoredMessage,
        decryption_keys: &[PrivateKey],
        verification_keys: &[PublicKey],
    ) -> Result<DecryptedName, DriveError> {
        let decrypted = self
            .provider
            .decrypt_and_verify(armored, decryption_keys, verification_keys, None)
            .await?;
        Ok(DecryptedName {
            name: strict_utf8(decrypted.data, "node name")?,
            session_key: decrypted.session_key,
            verified: decrypted.verified,
        })
    }

    /// Decrypt a node name re-encrypted under a known session key, as
    /// produced by a rename.
    pub async fn decrypt_node_name_with_session_key(
        &self,
        armored: &ArmoredMessage,
        session_key: &SessionKey,
        verification_keys: &[PublicKey],
    ) -> Result<DecryptedName, DriveError> {
        let decrypted = self
            .provider
            .decrypt_armored_with_session_key(armored, session_key, verification_keys, None)
            .await?;
        Ok(DecryptedName {
            name: strict_utf8(decrypted.data, "node name")?,
            session_key: session_key.clone(),
            verified: decrypted.verified,
        })
    }

    /// Decrypt an armored text payload (extended attributes and similar),
    /// reporting verification without failing on it.
    pub async fn decrypt_armored_text(
        &self,
        armored: &ArmoredMessage,
        decryption_keys: &[PrivateKey],
        verification_keys: &[PublicKey],
    ) -> Result<(String, VerificationStatus), DriveError> {
        let decrypted = self
            .provider
            .decrypt_and_verify(armored, decryption_keys, verification_keys, None)
            .await?;
        let text = strict_utf8(decrypted.data, "attributes payload")?;
        Ok((text, decrypted.verified))
    }

    /// Encrypt and sign an armored text payload under a node key.
    pub async fn encrypt_armored_text(
        &self,
        text: &str,
        encryption_key: &PublicKey,
        signing_key: &PrivateKey,
    ) -> Result<ArmoredMessage, DriveError> {
        let encrypted = self
            .provider
            .encrypt_and_sign(
                text.as_bytes(),
                std::slice::from_ref(encryption_key),
                Some(signing_key),
                None,
            )
            .await?;
        Ok(encrypted.armored)
    }

    /// Encrypt a content block: session-key ciphertext plus a detached
    /// signature over the cleartext, itself encrypted to the session key.
    pub async fn encrypt_block(
        &self,
        data: &[u8],
        session_key: &SessionKey,
        signing_key: &PrivateKey,
    ) -> Result<EncryptedBlock, DriveError> {
        let encrypted = self
            .encrypt_and_sign_detached(data, session_key, signing_key)
            .await?;
        let signature = encrypted.detached_signature.ok_or_else(|| {
            DriveError::decryption("provider did not produce a detached signature")
        })?;
        let encrypted_signature = self.encrypt_signature(&signature, session_key).await?;
        Ok(EncryptedBlock {
            ciphertext: encrypted.ciphertext,
            encrypted_signature,
        })
    }

    /// Session-key encryption with a plain detached signature, for callers
    /// that stream ciphertext and store the signature separately.
    pub async fn encrypt_and_sign_detached(
        &self,
        data: &[u8],
        session_key: &SessionKey,
        signing_key: &PrivateKey,
    ) -> Result<SessionEncrypted, DriveError> {
        self.provider
            .encrypt_with_session_key(data, session_key, Some(signing_key))
            .await
    }

    /// Decrypt a content block and verify its detached signature.
    ///
    /// The signature arrives encrypted to the session key and is decrypted
    /// before verification. A missing signature reports `NotSigned`.
    pub async fn decrypt_block(
        &self,
        ciphertext: &[u8],
        encrypted_signature: Option<&[u8]>,
        session_key: &SessionKey,
        verification_keys: &[PublicKey],
    ) -> Result<DecryptedBytes, DriveError> {
        let data = self
            .provider
            .decrypt_with_session_key(ciphertext, session_key)
            .await?;

        let verified = match encrypted_signature {
            Some(encrypted_signature) => {
                let signature_bytes = self
                    .provider
                    .decrypt_with_session_key(encrypted_signature, session_key)
                    .await?;
                let signature = ArmoredSignature(strict_utf8(signature_bytes, "block signature")?);
                self.provider
                    .verify_detached(&data, &signature, verification_keys, None)
                    .await?
            }
            None => VerificationStatus::NotSigned,
        };

        Ok(DecryptedBytes { data, verified })
    }

    /// Encrypt a thumbnail block. Thumbnails carry an embedded signature
    /// rather than a separate signature file.
    pub async fn encrypt_thumbnail_block(
        &self,
        data: &[u8],
        session_key: &SessionKey,
        signing_key: &PrivateKey,
    ) -> Result<Vec<u8>, DriveError> {
        self.provider
            .encrypt_embedded_with_session_key(data, session_key, Some(signing_key))
            .await
    }

    /// Decrypt a thumbnail block using its embedded signature.
    pub async fn decrypt_thumbnail_block(
        &self,
        ciphertext: &[u8],
        session_key: &SessionKey,
        verification_keys: &[PublicKey],
    ) -> Result<DecryptedBytes, DriveError> {
        self.provider
            .decrypt_embedded_with_session_key(ciphertext, session_key, verification_keys)
            .await
    }

    /// Sign a block-hash manifest, armored detached.
    pub async fn sign_manifest(
        &self,
        manifest: &[u8],
        signing_key: &PrivateKey,
    ) -> Result<ArmoredSignature, DriveError> {
        self.provider.sign_detached(manifest, signing_key, None).await
    }

    /// Verify a manifest signature.
    pub async fn verify_manifest(
        &self,
        manifest: &[u8],
        signature: &ArmoredSignature,
        verification_keys: &[PublicKey],
    ) -> Result<VerificationStatus, DriveError> {
        self.provider
            .verify_detached(manifest, signature, verification_keys, None)
            .await
    }

    /// Build an invitation: wrap the share session key for the invitee and
    /// sign the packet with the inviter key under the inviter context.
    pub async fn encrypt_invitation(
        &self,
        share_session_key: &SessionKey,
        invitee_keys: &[PublicKey],
        inviter_key: &PrivateKey,
    ) -> Result<Invitation, DriveError> {
        let key_packet = self
            .provider
            .encrypt_session_key(share_session_key, invitee_keys)
            .await?;
        let signature = self
            .provider
            .sign_detached(&key_packet.0, inviter_key, Some(&SigningContext::inviter()))
            .await?;
        Ok(Invitation {
            key_packet,
            signature,
        })
    }

    /// Verify the inviter signature on an invitation. The inviter context is
    /// critical: a signature without it is invalid.
    pub async fn verify_invitation(
        &self,
        key_packet: &KeyPacket,
        signature: &ArmoredSignature,
        inviter_keys: &[PublicKey],
    ) -> Result<VerificationStatus, DriveError> {
        self.provider
            .verify_detached(
                &key_packet.0,
                signature,
                inviter_keys,
                Some(&SigningContext::inviter()),
            )
            .await
    }

    /// Accept an invitation: countersign the key packet with the member key
    /// under the member context.
    pub async fn accept_invitation(
        &self,
        key_packet: &KeyPacket,
        member_key: &PrivateKey,
    ) -> Result<ArmoredSignature, DriveError> {
        self.provider
            .sign_detached(&key_packet.0, member_key, Some(&SigningContext::member()))
            .await
    }

    /// Verify a member acceptance signature.
    pub async fn verify_invitation_acceptance(
        &self,
        key_packet: &KeyPacket,
        signature: &ArmoredSignature,
        member_keys: &[PublicKey],
    ) -> Result<VerificationStatus, DriveError> {
        self.provider
            .verify_detached(
                &key_packet.0,
                signature,
                member_keys,
                Some(&SigningContext::member()),
            )
            .await
    }

    /// Sign an external invitation: the invitee email bound to the key
    /// packet under the external-invitation context.
    pub async fn encrypt_external_invitation(
        &self,
        invitee_email: &str,
        key_packet: &KeyPacket,
        inviter_key: &PrivateKey,
    ) -> Result<ArmoredSignature, DriveError> {
        let mut data = Vec::with_capacity(invitee_email.len() + 1 + key_packet.0.len());
        data.extend_from_slice(invitee_email.as_bytes());
        data.push(0);
        data.extend_from_slice(&key_packet.0);
        self.provider
            .sign_detached(
                &data,
                inviter_key,
                Some(&SigningContext::external_invitation()),
            )
            .await
    }

    /// Deterministic lookup hash of a name under a folder hash key.
    pub fn generate_lookup_hash(
        &self,
        name: &str,
        parent_hash_key: &HashKey,
    ) -> Result<String, DriveError> {
        generate_lookup_hash(name, parent_hash_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_hash_is_deterministic_and_hex() {
        let key = HashKey(vec![7u8; 32]);
        let first = generate_lookup_hash("a.txt", &key).unwrap();
        let second = generate_lookup_hash("a.txt", &key).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn lookup_hash_depends_on_name_and_key() {
        let key = HashKey(vec![7u8; 32]);
        let other_key = HashKey(vec![8u8; 32]);
        let base = generate_lookup_hash("a.txt", &key).unwrap();
        assert_ne!(base, generate_lookup_hash("b.txt", &key).unwrap());
        assert_ne!(base, generate_lookup_hash("a.txt", &other_key).unwrap());
    }
}
