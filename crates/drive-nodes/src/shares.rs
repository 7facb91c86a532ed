//! Share and volume resolver
//!
//! Owns share-level key material and the mapping from volume to signing
//! address. Share keys are decrypted lazily on first use and cached in the
//! crypto cache; the `SharedWithMeUpdated` event invalidates them.

use crate::cache::{share_key_key, volume_key, CachedShareKey, VolumeRecord};
use crate::dto::{ShareDto, ShareResponse, SharesResponse};
use drive_api::ApiClient;
use drive_core::cache::{get_json, set_json};
use drive_core::{
    AbortSignal, DriveError, EntityCache, MetricContext, NodeId, NodeUid, ShareId, VolumeId,
};
use drive_crypto::{
    AccountProvider, Address, ArmoredKey, ArmoredMessage, ArmoredSignature, DriveCrypto,
    PrivateKey,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Session handed back by the external public-link SRP handshake. The core
/// only persists it; the handshake itself is the host's concern.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PublicLinkSession {
    /// Session identifier issued by the handshake.
    pub session_uid: String,
    /// Access token authorizing public-link requests.
    pub access_token: String,
}

/// Root identifiers of the authenticated user's own tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MyFilesIds {
    /// The user's main volume.
    pub volume_id: VolumeId,
    /// The share granting access to it.
    pub share_id: ShareId,
    /// The root folder node.
    pub root_node_id: NodeId,
}

impl MyFilesIds {
    /// UID of the root folder.
    pub fn root_uid(&self) -> NodeUid {
        NodeUid::new(self.volume_id.clone(), self.root_node_id.clone())
    }
}

/// Share-level key material and volume → address resolution.
pub struct SharesService {
    api: Arc<ApiClient>,
    crypto: DriveCrypto,
    account: Arc<dyn AccountProvider>,
    entity_cache: Arc<dyn EntityCache>,
    crypto_cache: Arc<dyn EntityCache>,
    my_files: Mutex<Option<MyFilesIds>>,
    known_shares: Mutex<HashSet<ShareId>>,
}

impl SharesService {
    /// Build the resolver.
    pub fn new(
        api: Arc<ApiClient>,
        crypto: DriveCrypto,
        account: Arc<dyn AccountProvider>,
        entity_cache: Arc<dyn EntityCache>,
        crypto_cache: Arc<dyn EntityCache>,
    ) -> Self {
        Self {
            api,
            crypto,
            account,
            entity_cache,
            crypto_cache,
            my_files: Mutex::new(None),
            known_shares: Mutex::new(HashSet::new()),
        }
    }

    /// Root volume and share identifiers of the authenticated user.
    pub async fn get_my_files_ids(&self, abort: &AbortSignal) -> Result<MyFilesIds, DriveError> {
        if let Some(ids) = self.my_files.lock().clone() {
            return Ok(ids);
        }

        let response: SharesResponse = self
            .api
            .get_json("drive/v2/shares?Type=main", abort)
            .await?;
        let share = response
            .shares
            .into_iter()
            .next()
            .ok_or_else(|| DriveError::not_found("no main share"))?;

        self.remember_share(&share).await?;
        let ids = MyFilesIds {
            volume_id: VolumeId::new(share.volume_id.clone()),
            share_id: ShareId::new(share.share_id.clone()),
            root_node_id: NodeId::new(share.link_id.clone()),
        };
        *self.my_files.lock() = Some(ids.clone());
        Ok(ids)
    }

    /// Fetch one share's encrypted metadata and key material.
    pub async fn load_encrypted_share(
        &self,
        share_id: &ShareId,
        abort: &AbortSignal,
    ) -> Result<ShareDto, DriveError> {
        let response: ShareResponse = self
            .api
            .get_json(&format!("drive/v2/shares/{share_id}"), abort)
            .await?;
        self.remember_share(&response.share).await?;
        Ok(response.share)
    }

    /// The unlocked share key, decrypted lazily and cached.
    pub async fn share_key(
        &self,
        share_id: &ShareId,
        abort: &AbortSignal,
    ) -> Result<CachedShareKey, DriveError> {
        let cache_key = share_key_key(share_id);
        if let Some(cached) = get_json::<CachedShareKey>(self.crypto_cache.as_ref(), &cache_key).await
        {
            return Ok(cached);
        }

        let share = self.load_encrypted_share(share_id, abort).await?;
        let armored_key = share
            .key
            .ok_or_else(|| DriveError::decryption("share record has no key"))?;
        let passphrase = share
            .passphrase
            .ok_or_else(|| DriveError::decryption("share record has no passphrase"))?;

        let address_key = self
            .account
            .address_private_key(&drive_core::AddressId::new(share.address_id.clone()))
            .await?;
        let creator_keys = self
            .account
            .public_keys_for_email(&share.creator_email)
            .await
            .unwrap_or_default();

        let decrypted = self
            .crypto
            .decrypt_key(
                &ArmoredKey(armored_key),
                &ArmoredMessage(passphrase),
                share
                    .passphrase_signature
                    .map(ArmoredSignature)
                    .as_ref(),
                std::slice::from_ref(&address_key),
                &creator_keys,
            )
            .await?;

        let cached = CachedShareKey {
            key: decrypted.key,
            passphrase: decrypted.passphrase,
            passphrase_session_key: decrypted.passphrase_session_key,
        };
        set_json(self.crypto_cache.as_ref(), &cache_key, &cached)
            .await
            .ok();
        Ok(cached)
    }

    /// The persisted record of a volume, when known.
    pub async fn volume_record(
        &self,
        volume_id: &VolumeId,
        abort: &AbortSignal,
    ) -> Result<VolumeRecord, DriveError> {
        if let Some(record) =
            get_json::<VolumeRecord>(self.entity_cache.as_ref(), &volume_key(volume_id)).await
        {
            return Ok(record);
        }
        // The own volume can always be re-discovered.
        let ids = self.get_my_files_ids(abort).await?;
        if ids.volume_id == *volume_id {
            return get_json(self.entity_cache.as_ref(), &volume_key(volume_id))
                .await
                .ok_or_else(|| DriveError::not_found(format!("volume {volume_id}")));
        }
        Err(DriveError::not_found(format!("volume {volume_id}")))
    }

    /// The signing identity for mutations on a volume: its address and the
    /// unlocked address key.
    pub async fn volume_email_key(
        &self,
        volume_id: &VolumeId,
        abort: &AbortSignal,
    ) -> Result<(Address, PrivateKey), DriveError> {
        let record = self.volume_record(volume_id, abort).await?;
        let address_id = drive_core::AddressId::new(record.address_id);
        let address = self.account.address(&address_id).await?;
        let key = self.account.address_private_key(&address_id).await?;
        Ok((address, key))
    }

    /// Ownership class of a volume, used to tag telemetry.
    pub async fn volume_metric_context(
        &self,
        volume_id: &VolumeId,
        abort: &AbortSignal,
    ) -> MetricContext {
        match self.get_my_files_ids(abort).await {
            Ok(ids) if ids.volume_id == *volume_id => MetricContext::OwnVolume,
            Ok(_) => {
                // A volume we can resolve through a share is a member share;
                // anything else was reached through a public link.
                if get_json::<VolumeRecord>(self.entity_cache.as_ref(), &volume_key(volume_id))
                    .await
                    .is_some()
                {
                    MetricContext::Shared
                } else {
                    MetricContext::SharedPublic
                }
            }
            Err(_) => MetricContext::SharedPublic,
        }
    }

    /// Drop cached share keys after a `SharedWithMeUpdated` event.
    pub async fn invalidate_shared_with_me(&self) {
        let keys: Vec<String> = {
            let known = self.known_shares.lock();
            known.iter().map(share_key_key).collect()
        };
        if keys.is_empty() {
            return;
        }
        debug!(count = keys.len(), "evicting cached share keys");
        let _ = self.crypto_cache.remove_entities(&keys).await;
    }

    /// Persist the session returned by a public-link handshake.
    pub async fn store_public_link_session(
        &self,
        token: &str,
        session: &PublicLinkSession,
    ) -> Result<(), DriveError> {
        set_json(
            self.entity_cache.as_ref(),
            &format!("publicLinkSession-{token}"),
            session,
        )
        .await
        .map_err(|err| DriveError::server(err.to_string()))
    }

    /// The persisted public-link session for a token, when one exists.
    pub async fn public_link_session(&self, token: &str) -> Option<PublicLinkSession> {
        get_json(
            self.entity_cache.as_ref(),
            &format!("publicLinkSession-{token}"),
        )
        .await
    }

    async fn remember_share(&self, share: &ShareDto) -> Result<(), DriveError> {
        self.known_shares
            .lock()
            .insert(ShareId::new(share.share_id.clone()));
        let record = VolumeRecord {
            volume_id: share.volume_id.clone(),
            share_id: share.share_id.clone(),
            root_node_id: share.link_id.clone(),
            creator_email: share.creator_email.clone(),
            address_id: share.address_id.clone(),
        };
        set_json(
            self.entity_cache.as_ref(),
            &volume_key(&VolumeId::new(share.volume_id.clone())),
            &record,
        )
        .await
        .ok();
        Ok(())
    }
}
