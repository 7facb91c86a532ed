//! Drive-specific cryptography over an injected OpenPGP capability
//!
//! OpenPGP primitives are not implemented here. The host supplies an
//! [`OpenPgpProvider`]; this crate layers the Drive key hierarchy on top:
//! node keys locked by encrypted passphrases, folder hash keys, content
//! session keys, block and manifest signing, and the share-invitation
//! signature contexts.
//!
//! Two rules hold throughout:
//! - Decryption helpers never raise on a bad signature. Verification state
//!   travels in the result as a [`VerificationStatus`].
//! - UTF-8 decoding of decrypted payloads is strict; invalid sequences fail
//!   as decryption errors.

pub mod account;
pub mod contexts;
pub mod facade;
pub mod pgp;

pub use account::{AccountProvider, Address};
pub use contexts::{
    SigningContext, CONTEXT_SHARE_MEMBER_EXTERNAL_INVITATION, CONTEXT_SHARE_MEMBER_INVITER,
    CONTEXT_SHARE_MEMBER_MEMBER,
};
pub use facade::{
    generate_lookup_hash, ArmoredNodeKey, DecryptedKey, DecryptedName, DecryptedNodeKey,
    DriveCrypto, EncryptedBlock, GeneratedHashKey, Invitation,
};
pub use pgp::{
    ArmoredKey, ArmoredMessage, ArmoredSignature, DecryptedBytes, DecryptedMessage,
    EncryptedMessage, HashKey, KeyPacket, OpenPgpProvider, PrivateKey, PublicKey, SessionEncrypted,
    SessionKey,
};
