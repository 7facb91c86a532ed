//! Cache key layouts and cached entry shapes
//!
//! Two host-supplied caches back the node surface: the entities cache holds
//! serialized decrypted nodes and volume records, the crypto cache holds key
//! material. Keys are stable strings; entries are JSON; a corrupt entry is
//! evicted on detection (see `drive_core::cache::get_json`).

use drive_core::{MaybeNode, NodeUid, ShareId, VolumeId};
use drive_crypto::{HashKey, PrivateKey, SessionKey};
use serde::{Deserialize, Serialize};

/// Entities-cache key of a decrypted node.
pub fn node_entity_key(uid: &NodeUid) -> String {
    uid.to_string()
}

/// Entities-cache key of a volume record.
pub fn volume_key(volume_id: &VolumeId) -> String {
    format!("volume-{volume_id}")
}

/// Crypto-cache key of a node's key material.
pub fn node_keys_key(uid: &NodeUid) -> String {
    format!("nodeKeys-{uid}")
}

/// Crypto-cache key of a share key.
pub fn share_key_key(share_id: &ShareId) -> String {
    format!("shareKey-{share_id}")
}

/// Cached node entry. Wraps the result surface so degraded nodes are cached
/// too and do not hit the decryption path on every read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedNode {
    /// The decrypted node or its degraded remainder.
    pub node: MaybeNode,
    /// Entries flagged stale are re-fetched on the next read.
    #[serde(default)]
    pub stale: bool,
}

/// Serialized volume record, as persisted under `volume-{vol}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRecord {
    pub volume_id: String,
    pub share_id: String,
    pub root_node_id: String,
    pub creator_email: String,
    pub address_id: String,
}

/// Cached key material of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedNodeKeys {
    /// The unlocked node key.
    pub key: PrivateKey,
    /// Cleartext passphrase, needed to re-wrap on move.
    pub passphrase: String,
    /// Session key of the passphrase message.
    pub passphrase_session_key: SessionKey,
    /// Session key of the name message, needed to re-encrypt on rename.
    #[serde(default)]
    pub name_session_key: Option<SessionKey>,
    /// Folder hash key, when this node is a folder and it decrypted.
    #[serde(default)]
    pub hash_key: Option<HashKey>,
    /// Content session key, when this node is a file and it decrypted.
    #[serde(default)]
    pub content_key: Option<SessionKey>,
}

/// Cached share key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedShareKey {
    /// The unlocked share key.
    pub key: PrivateKey,
    /// Cleartext passphrase.
    pub passphrase: String,
    /// Session key of the passphrase message.
    pub passphrase_session_key: SessionKey,
}
