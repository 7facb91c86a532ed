//! A scripted Drive backend with real encrypted fixtures
//!
//! Builds a share, a root folder, and any number of folders and files whose
//! key material is produced through the same crypto façade the production
//! code uses. Registers scripted routes for the share, fetch, listing, and
//! block endpoints so the full node and transfer surfaces run against it.

use crate::account::MockAccountProvider;
use crate::cache::MemoryCache;
use crate::fetcher::{json_ok, ScriptedFetcher};
use crate::pgp::MockPgpProvider;
use crate::telemetry::RecordingTelemetry;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use drive_api::ApiClient;
use drive_core::{DriveConfig, NodeUid, RevisionUid, SdkEventBus, VolumeId};
use drive_crypto::{DriveCrypto, HashKey, OpenPgpProvider, PrivateKey, PublicKey, SessionKey};
use drive_nodes::dto::{
    BlockDto, FilePropertiesDto, FolderPropertiesDto, LinkDto, RevisionDto, LINK_STATE_ACTIVE,
    LINK_TYPE_FILE, LINK_TYPE_FOLDER, REVISION_STATE_ACTIVE,
};
use drive_nodes::{NodeAccess, NodeCryptoService, SharesService};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Fixed creation time used by fixtures; safely after 2024-01-01.
pub const FIXTURE_CREATE_TIME: i64 = 1_750_000_000;

/// Key material the world retains per fixture node.
#[derive(Clone)]
pub struct FixtureKeys {
    /// The node's unlocked private key.
    pub private_key: PrivateKey,
    /// The node's public key.
    pub public_key: PublicKey,
    /// Folder hash key, for folders.
    pub hash_key: Option<HashKey>,
    /// Content session key, for files.
    pub content_key: Option<SessionKey>,
}

/// A scripted Drive backend.
pub struct DriveWorld {
    /// The mock OpenPGP provider.
    pub provider: Arc<MockPgpProvider>,
    /// Façade over the provider.
    pub crypto: DriveCrypto,
    /// The scripted fetcher behind the API client.
    pub fetcher: Arc<ScriptedFetcher>,
    /// API client wired to the fetcher.
    pub api: Arc<ApiClient>,
    /// Account provider holding the default address.
    pub account: Arc<MockAccountProvider>,
    /// Entities cache.
    pub entity_cache: Arc<MemoryCache>,
    /// Crypto cache.
    pub crypto_cache: Arc<MemoryCache>,
    /// SDK events bus.
    pub bus: Arc<SdkEventBus>,
    /// Recording telemetry sink.
    pub telemetry: Arc<RecordingTelemetry>,
    /// Email of the default signing address.
    pub email: String,
    /// Unlocked default address key.
    pub address_key: PrivateKey,
    /// Public half of the address key.
    pub address_public: PublicKey,
    /// The single volume of this world.
    pub volume_id: VolumeId,
    /// UID of the root folder.
    pub root_uid: NodeUid,
    links: Arc<Mutex<HashMap<String, LinkDto>>>,
    keys: Arc<Mutex<HashMap<String, FixtureKeys>>>,
    next_id: Mutex<u64>,
}

impl DriveWorld {
    /// Build a world with a share and an empty root folder.
    pub async fn new() -> Self {
        let provider = Arc::new(MockPgpProvider::new());
        let crypto = DriveCrypto::new(provider.clone());
        let fetcher = Arc::new(ScriptedFetcher::new());
        let bus = Arc::new(SdkEventBus::new());
        let telemetry = Arc::new(RecordingTelemetry::new());
        let api = Arc::new(ApiClient::new(
            fetcher.clone(),
            DriveConfig::for_testing(),
            bus.clone(),
            telemetry.clone(),
        ));

        let email = "user@drive.test".to_string();
        let (address_key, address_public) = provider.make_key().await;
        let account = Arc::new(MockAccountProvider::new(
            email.clone(),
            address_key.clone(),
            address_public.clone(),
        ));

        // Share key, locked by a passphrase encrypted to the address key.
        let (share_armored, share_decrypted) = crypto
            .generate_key(std::slice::from_ref(&address_public), &address_key)
            .await
            .expect("share key");
        let share_public = provider.public_key(&share_decrypted.key).expect("share pub");

        // Root folder, keyed under the share key.
        let (root_armored, root_decrypted) = crypto
            .generate_key(std::slice::from_ref(&share_public), &address_key)
            .await
            .expect("root key");
        let root_public = provider.public_key(&root_decrypted.key).expect("root pub");
        let root_hash_key = crypto
            .generate_hash_key(&root_decrypted.key)
            .await
            .expect("root hash key");
        let root_name = crypto
            .encrypt_node_name("My files", None, Some(&root_public), &address_key)
            .await
            .expect("root name");

        let root_link = LinkDto {
            link_id: "root".to_string(),
            parent_link_id: None,
            link_type: LINK_TYPE_FOLDER,
            name: root_name.0,
            name_signature_email: Some(email.clone()),
            signature_email: Some(email.clone()),
            hash: None,
            state: LINK_STATE_ACTIVE,
            create_time: FIXTURE_CREATE_TIME,
            trash_time: None,
            mime_type: None,
            node_key: root_armored.key.0,
            node_passphrase: root_armored.passphrase.0,
            node_passphrase_signature: Some(root_armored.passphrase_signature.0),
            is_shared: false,
            member_role: drive_nodes::dto::ROLE_ADMIN,
            folder_properties: Some(FolderPropertiesDto {
                node_hash_key: root_hash_key.armored.0,
                xattr: None,
            }),
            file_properties: None,
        };

        let links: Arc<Mutex<HashMap<String, LinkDto>>> = Arc::new(Mutex::new(HashMap::new()));
        links.lock().insert("root".to_string(), root_link);
        let keys: Arc<Mutex<HashMap<String, FixtureKeys>>> = Arc::new(Mutex::new(HashMap::new()));
        keys.lock().insert(
            "root".to_string(),
            FixtureKeys {
                private_key: root_decrypted.key,
                public_key: root_public,
                hash_key: Some(root_hash_key.key),
                content_key: None,
            },
        );

        let world = Self {
            provider,
            crypto,
            fetcher,
            api,
            account,
            entity_cache: Arc::new(MemoryCache::new()),
            crypto_cache: Arc::new(MemoryCache::new()),
            bus,
            telemetry,
            email: email.clone(),
            address_key,
            address_public,
            volume_id: VolumeId::new("vol-1"),
            root_uid: NodeUid::new("vol-1", "root"),
            links,
            keys,
            next_id: Mutex::new(0),
        };

        world.register_routes(
            share_armored.key.0,
            share_armored.passphrase.0,
            share_armored.passphrase_signature.0,
        );
        world
    }

    fn register_routes(
        &self,
        share_key: String,
        share_passphrase: String,
        share_passphrase_signature: String,
    ) {
        let email = self.email.clone();
        let address_id = format!("address-{email}");
        let share = serde_json::json!({
            "ShareID": "share-1",
            "VolumeID": "vol-1",
            "LinkID": "root",
            "CreatorEmail": email,
            "AddressID": address_id,
        });
        let mut full_share = share.clone();
        full_share["Key"] = serde_json::json!(share_key);
        full_share["Passphrase"] = serde_json::json!(share_passphrase);
        full_share["PassphraseSignature"] = serde_json::json!(share_passphrase_signature);

        self.fetcher.on_json(
            "GET",
            "drive/v2/shares?Type=main",
            serde_json::json!({"Code": 1000, "Shares": [share]}).to_string(),
        );
        self.fetcher.on_json(
            "GET",
            "drive/v2/shares/share-1",
            serde_json::json!({"Code": 1000, "Share": full_share}).to_string(),
        );

        // Link fetch resolves ids out of the shared map.
        let links = Arc::clone(&self.links);
        self.fetcher.on("POST", "links/fetch", move |request| {
            let body: serde_json::Value = request
                .body
                .as_deref()
                .and_then(|body| serde_json::from_slice(body).ok())
                .unwrap_or_default();
            let wanted: Vec<String> = body["LinkIDs"]
                .as_array()
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| id.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            let links = links.lock();
            let found: Vec<serde_json::Value> = wanted
                .iter()
                .filter_map(|id| links.get(id))
                .filter_map(|link| serde_json::to_value(link).ok())
                .collect();
            Ok(json_ok(
                &serde_json::json!({"Code": 1000, "Links": found}).to_string(),
            ))
        });

        // Folder children listing.
        let links = Arc::clone(&self.links);
        self.fetcher.on("GET", "/children", move |request| {
            let parent = request
                .url
                .split("/folders/")
                .nth(1)
                .and_then(|rest| rest.split('/').next())
                .unwrap_or_default()
                .to_string();
            let links = links.lock();
            let children: Vec<serde_json::Value> = links
                .values()
                .filter(|link| link.parent_link_id.as_deref() == Some(parent.as_str()))
                .filter_map(|link| serde_json::to_value(link).ok())
                .collect();
            Ok(json_ok(
                &serde_json::json!({"Code": 1000, "Links": children, "More": false}).to_string(),
            ))
        });

        // Trash listing.
        let links = Arc::clone(&self.links);
        self.fetcher.on("GET", "/trash", move |_| {
            let links = links.lock();
            let trashed: Vec<serde_json::Value> = links
                .values()
                .filter(|link| link.trash_time.is_some())
                .filter_map(|link| serde_json::to_value(link).ok())
                .collect();
            Ok(json_ok(
                &serde_json::json!({"Code": 1000, "Links": trashed, "More": false}).to_string(),
            ))
        });

        // By default every probed hash is available.
        self.fetcher.on("POST", "checkAvailableHashes", |request| {
            let body: serde_json::Value = request
                .body
                .as_deref()
                .and_then(|body| serde_json::from_slice(body).ok())
                .unwrap_or_default();
            Ok(json_ok(
                &serde_json::json!({
                    "Code": 1000,
                    "AvailableHashes": body["Hashes"],
                    "PendingHashes": [],
                })
                .to_string(),
            ))
        });
    }

    /// The node access surface wired to this world.
    pub fn access(&self) -> NodeAccess {
        let shares = Arc::new(SharesService::new(
            self.api.clone(),
            self.crypto.clone(),
            self.account.clone(),
            self.entity_cache.clone(),
            self.crypto_cache.clone(),
        ));
        let crypto_service = Arc::new(NodeCryptoService::new(
            self.crypto.clone(),
            self.account.clone(),
            self.api.clone(),
        ));
        NodeAccess::new(
            self.api.clone(),
            self.crypto.clone(),
            crypto_service,
            shares,
            self.entity_cache.clone(),
            self.crypto_cache.clone(),
        )
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut counter = self.next_id.lock();
        *counter += 1;
        format!("{prefix}-{}", *counter)
    }

    /// Fixture key material of a node.
    pub fn fixture_keys(&self, link_id: &str) -> FixtureKeys {
        self.keys.lock().get(link_id).cloned().expect("fixture keys")
    }

    /// A copy of a link record.
    pub fn link(&self, link_id: &str) -> LinkDto {
        self.links.lock().get(link_id).cloned().expect("fixture link")
    }

    /// Mutate a link record in place, e.g. to corrupt a field.
    pub fn mutate_link(&self, link_id: &str, mutate: impl FnOnce(&mut LinkDto)) {
        let mut links = self.links.lock();
        let link = links.get_mut(link_id).expect("fixture link");
        mutate(link);
    }

    /// Add an encrypted folder fixture. Returns its UID.
    pub async fn add_folder(&self, parent_id: &str, name: &str) -> NodeUid {
        let parent = self.fixture_keys(parent_id);
        let link_id = self.next_id("folder");

        let (armored, decrypted) = self
            .crypto
            .generate_key(std::slice::from_ref(&parent.public_key), &self.address_key)
            .await
            .expect("folder key");
        let public = self.provider.public_key(&decrypted.key).expect("folder pub");
        let hash_key = self
            .crypto
            .generate_hash_key(&decrypted.key)
            .await
            .expect("folder hash key");
        let encrypted_name = self
            .crypto
            .encrypt_node_name(name, None, Some(&public), &self.address_key)
            .await
            .expect("folder name");
        let lookup_hash = drive_crypto::generate_lookup_hash(
            name,
            parent.hash_key.as_ref().expect("parent hash key"),
        )
        .expect("lookup hash");

        let link = LinkDto {
            link_id: link_id.clone(),
            parent_link_id: Some(parent_id.to_string()),
            link_type: LINK_TYPE_FOLDER,
            name: encrypted_name.0,
            name_signature_email: Some(self.email.clone()),
            signature_email: Some(self.email.clone()),
            hash: Some(lookup_hash),
            state: LINK_STATE_ACTIVE,
            create_time: FIXTURE_CREATE_TIME,
            trash_time: None,
            mime_type: None,
            node_key: armored.key.0,
            node_passphrase: armored.passphrase.0,
            node_passphrase_signature: Some(armored.passphrase_signature.0),
            is_shared: false,
            member_role: drive_nodes::dto::ROLE_INHERITED,
            folder_properties: Some(FolderPropertiesDto {
                node_hash_key: hash_key.armored.0,
                xattr: None,
            }),
            file_properties: None,
        };

        self.links.lock().insert(link_id.clone(), link);
        self.keys.lock().insert(
            link_id.clone(),
            FixtureKeys {
                private_key: decrypted.key,
                public_key: public,
                hash_key: Some(hash_key.key),
                content_key: None,
            },
        );
        NodeUid::new(self.volume_id.clone(), link_id)
    }

    /// Add an encrypted file fixture with content blocks served from
    /// scripted storage routes. Returns the node and revision UIDs.
    ///
    /// `claimed_sha1`/`claimed_size` land in the extended attributes as
    /// given, so integrity mismatches can be staged; pass the real values
    /// for a well-formed file.
    pub async fn add_file(
        &self,
        parent_id: &str,
        name: &str,
        content: &[u8],
        block_size: usize,
        claimed_sha1: Option<String>,
        claimed_size: Option<u64>,
    ) -> (NodeUid, RevisionUid) {
        let parent = self.fixture_keys(parent_id);
        let link_id = self.next_id("file");
        let revision_id = self.next_id("rev");

        let (armored, decrypted) = self
            .crypto
            .generate_key(std::slice::from_ref(&parent.public_key), &self.address_key)
            .await
            .expect("file key");
        let public = self.provider.public_key(&decrypted.key).expect("file pub");
        let encrypted_name = self
            .crypto
            .encrypt_node_name(name, None, Some(&public), &self.address_key)
            .await
            .expect("file name");
        let lookup_hash = drive_crypto::generate_lookup_hash(
            name,
            parent.hash_key.as_ref().expect("parent hash key"),
        )
        .expect("lookup hash");

        // Content key: session key wrapped to the node key, signed by it.
        let content_key = self
            .provider
            .generate_session_key()
            .await
            .expect("content key");
        let packet = self
            .crypto
            .encrypt_session_key(&content_key, std::slice::from_ref(&public))
            .await
            .expect("content key packet");
        let packet_signature = self
            .provider
            .sign_detached(&content_key.bytes, &decrypted.key, None)
            .await
            .expect("content key signature");

        // Blocks.
        let mut blocks = Vec::new();
        for (index, chunk) in content.chunks(block_size.max(1)).enumerate() {
            let encrypted = self
                .crypto
                .encrypt_block(chunk, &content_key, &self.address_key)
                .await
                .expect("block");
            let url = format!(
                "https://storage.test/blocks/{link_id}/{revision_id}/{index}"
            );
            let ciphertext = encrypted.ciphertext.clone();
            self.fetcher.on(
                "GET",
                format!("/blocks/{link_id}/{revision_id}/{index}"),
                move |_| {
                    Ok(drive_core::HttpResponse {
                        status: 200,
                        headers: Vec::new(),
                        body: ciphertext.clone(),
                    })
                },
            );
            blocks.push(BlockDto {
                index: index as u64 + 1,
                bare_url: url,
                token: format!("token-{index}"),
                enc_signature: Some(BASE64.encode(&encrypted.encrypted_signature)),
                size: encrypted.ciphertext.len() as u64,
            });
        }

        // Extended attributes with the claimed digest and size.
        let mut common = serde_json::Map::new();
        common.insert("ModificationTime".to_string(), serde_json::json!(1_700_000_001));
        if let Some(size) = claimed_size {
            common.insert("Size".to_string(), serde_json::json!(size));
        }
        if let Some(sha1) = claimed_sha1 {
            common.insert(
                "Digests".to_string(),
                serde_json::json!({ "SHA1": sha1 }),
            );
        }
        let xattr_json = serde_json::json!({ "Common": common }).to_string();
        let xattr = self
            .crypto
            .encrypt_armored_text(&xattr_json, &public, &self.address_key)
            .await
            .expect("xattr");

        let revision = RevisionDto {
            revision_id: revision_id.clone(),
            state: REVISION_STATE_ACTIVE,
            create_time: FIXTURE_CREATE_TIME,
            signature_email: Some(self.email.clone()),
            xattr: Some(xattr.0),
            size: Some(blocks.iter().map(|block| block.size).sum()),
            blocks: blocks.clone(),
        };

        // The revision endpoint serves the block list.
        let revision_json = serde_json::to_value(&revision).expect("revision json");
        self.fetcher.on_json(
            "GET",
            format!("files/{link_id}/revisions/{revision_id}"),
            serde_json::json!({"Code": 1000, "Revision": revision_json}).to_string(),
        );

        let link = LinkDto {
            link_id: link_id.clone(),
            parent_link_id: Some(parent_id.to_string()),
            link_type: LINK_TYPE_FILE,
            name: encrypted_name.0,
            name_signature_email: Some(self.email.clone()),
            signature_email: Some(self.email.clone()),
            hash: Some(lookup_hash),
            state: LINK_STATE_ACTIVE,
            create_time: FIXTURE_CREATE_TIME,
            trash_time: None,
            mime_type: Some("application/octet-stream".to_string()),
            node_key: armored.key.0,
            node_passphrase: armored.passphrase.0,
            node_passphrase_signature: Some(armored.passphrase_signature.0),
            is_shared: false,
            member_role: drive_nodes::dto::ROLE_INHERITED,
            folder_properties: None,
            file_properties: Some(FilePropertiesDto {
                content_key_packet: BASE64.encode(&packet.0),
                content_key_packet_signature: Some(packet_signature.0),
                active_revision: Some(revision),
            }),
        };

        self.links.lock().insert(link_id.clone(), link);
        self.keys.lock().insert(
            link_id.clone(),
            FixtureKeys {
                private_key: decrypted.key,
                public_key: public,
                hash_key: None,
                content_key: Some(content_key),
            },
        );
        let node_uid = NodeUid::new(self.volume_id.clone(), link_id.clone());
        let revision_uid = RevisionUid::new(self.volume_id.clone(), link_id, revision_id);
        (node_uid, revision_uid)
    }
}
