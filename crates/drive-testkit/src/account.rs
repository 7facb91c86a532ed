//! In-memory account provider

use async_trait::async_trait;
use drive_core::{AddressId, DriveError};
use drive_crypto::{AccountProvider, Address, PrivateKey, PublicKey};
use parking_lot::RwLock;
use std::collections::HashMap;

/// In-memory [`AccountProvider`] holding one default address plus any
/// number of foreign emails.
pub struct MockAccountProvider {
    default_address: Address,
    address_keys: RwLock<HashMap<AddressId, PrivateKey>>,
    email_keys: RwLock<HashMap<String, Vec<PublicKey>>>,
}

impl MockAccountProvider {
    /// Provider with a default address and its unlocked key.
    pub fn new(email: impl Into<String>, key: PrivateKey, public: PublicKey) -> Self {
        let email = email.into();
        let address_id = AddressId::new(format!("address-{email}"));
        let default_address = Address {
            address_id: address_id.clone(),
            email: email.clone(),
        };
        let provider = Self {
            default_address,
            address_keys: RwLock::new(HashMap::new()),
            email_keys: RwLock::new(HashMap::new()),
        };
        provider.address_keys.write().insert(address_id, key);
        provider.email_keys.write().insert(email, vec![public]);
        provider
    }

    /// Register public keys for a foreign email.
    pub fn add_email_keys(&self, email: impl Into<String>, keys: Vec<PublicKey>) {
        self.email_keys.write().insert(email.into(), keys);
    }
}

#[async_trait]
impl AccountProvider for MockAccountProvider {
    async fn default_address(&self) -> Result<Address, DriveError> {
        Ok(self.default_address.clone())
    }

    async fn address(&self, address_id: &AddressId) -> Result<Address, DriveError> {
        if *address_id == self.default_address.address_id {
            Ok(self.default_address.clone())
        } else {
            Err(DriveError::not_found(format!("address {address_id}")))
        }
    }

    async fn address_private_key(
        &self,
        address_id: &AddressId,
    ) -> Result<PrivateKey, DriveError> {
        self.address_keys
            .read()
            .get(address_id)
            .cloned()
            .ok_or_else(|| DriveError::not_found(format!("address key {address_id}")))
    }

    async fn public_keys_for_email(&self, email: &str) -> Result<Vec<PublicKey>, DriveError> {
        Ok(self.email_keys.read().get(email).cloned().unwrap_or_default())
    }
}
