//! Host account capability: address and key lookup
//!
//! The account provider resolves signing addresses and their keys. It is
//! owned by the host; the SDK only consumes the lookups listed here.

use crate::pgp::{PrivateKey, PublicKey};
use async_trait::async_trait;
use drive_core::{AddressId, DriveError};

/// A signing address of the authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Address identifier.
    pub address_id: AddressId,
    /// Email of the address.
    pub email: String,
}

/// Address and key lookup supplied by the host account layer.
#[async_trait]
pub trait AccountProvider: Send + Sync {
    /// The user's default signing address.
    async fn default_address(&self) -> Result<Address, DriveError>;

    /// Resolve an address by identifier.
    async fn address(&self, address_id: &AddressId) -> Result<Address, DriveError>;

    /// The unlocked private key of an address.
    async fn address_private_key(&self, address_id: &AddressId)
        -> Result<PrivateKey, DriveError>;

    /// Public keys registered for an email, own or foreign.
    ///
    /// An unknown email resolves to an empty list, not an error; signature
    /// verification then reports the author as unverifiable.
    async fn public_keys_for_email(&self, email: &str) -> Result<Vec<PublicKey>, DriveError>;
}
