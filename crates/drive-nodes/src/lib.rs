//! Node access, management, and the share/volume resolver
//!
//! The tree surface of the SDK. Encrypted link records come in through the
//! API client, are decrypted by the node crypto service with per-field
//! verification bookkeeping, and are served through cache-first reads and
//! pipelined iterators. Mutations pre-check name collisions with lookup
//! hashes and batch bulk operations with per-item results.

pub mod access;
pub mod cache;
pub mod crypto_service;
pub mod dto;
pub mod management;
pub mod shares;

pub use access::{NodeAccess, DECRYPT_CONCURRENCY, FETCH_BATCH, PAGE_SIZE};
pub use cache::{CachedNode, CachedNodeKeys, CachedShareKey, VolumeRecord};
pub use crypto_service::{DecryptedNodeRecord, NodeCryptoService};
pub use management::validate_node_name;
pub use shares::{MyFilesIds, PublicLinkSession, SharesService};
