//! Tree mutations
//!
//! Rename, move, trash, restore, delete, and folder creation. Bulk
//! operations chunk their input into server-accepted batches and yield one
//! `NodeResult` per node as replies return; a partial failure never aborts
//! a batch. Rename and move pre-check the destination lookup hash and fail
//! with a validation error on collision, before any server state changes.

use crate::access::{NodeAccess, FETCH_BATCH};
use crate::dto::{
    CheckHashesRequest, CheckHashesResponse, CreateFolderRequest, CreateFolderResponse,
    MoveLinkDto, MoveMultipleRequest, MultipleRequest, MultipleResponse, RenameRequest,
};
use drive_api::envelope::{CODE_OK, CODE_OK_ASYNC, CODE_OK_MANY};
use drive_core::{AbortSignal, DriveError, NodeResult, NodeUid, VolumeId};
use drive_crypto::generate_lookup_hash;
use futures::stream::{self, Stream, StreamExt};
use tracing::debug;

/// Longest accepted node name, in bytes of UTF-8.
const MAX_NAME_LENGTH: usize = 255;

#[derive(Clone, Copy)]
enum BulkOp {
    Trash,
    Restore,
    Delete,
}

impl BulkOp {
    fn path(self, volume_id: &VolumeId) -> String {
        let suffix = match self {
            Self::Trash => "trash_multiple",
            Self::Restore => "restore_multiple",
            Self::Delete => "delete_multiple",
        };
        format!("drive/v2/volumes/{volume_id}/{suffix}")
    }
}

/// Validate a node name: non-empty, no slashes, bounded length.
pub fn validate_node_name(name: &str) -> Result<(), DriveError> {
    if name.is_empty() {
        return Err(DriveError::validation("name must not be empty"));
    }
    if name.contains('/') {
        return Err(DriveError::validation("name must not contain '/'"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(DriveError::validation(format!(
            "name exceeds {MAX_NAME_LENGTH} bytes"
        )));
    }
    Ok(())
}

fn is_ok_code(code: u64) -> bool {
    matches!(code, CODE_OK | CODE_OK_MANY | CODE_OK_ASYNC)
}

impl NodeAccess {
    /// Probe which lookup hashes are free under a parent folder.
    pub async fn check_available_hashes(
        &self,
        parent_uid: &NodeUid,
        hashes: Vec<String>,
        client_uid: Option<String>,
        abort: &AbortSignal,
    ) -> Result<CheckHashesResponse, DriveError> {
        let request = CheckHashesRequest {
            hashes,
            client_uid,
        };
        self.api
            .post_json(
                &format!(
                    "drive/v2/volumes/{}/links/{}/checkAvailableHashes",
                    parent_uid.volume_id, parent_uid.node_id
                ),
                &request,
                abort,
            )
            .await
    }

    /// Rename a node in place. The UID is stable across the rename.
    pub async fn rename_node(
        &self,
        uid: &NodeUid,
        new_name: &str,
        abort: &AbortSignal,
    ) -> Result<(), DriveError> {
        validate_node_name(new_name)?;

        let link = self
            .fetch_links(&uid.volume_id, std::slice::from_ref(&uid.node_id), abort)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DriveError::not_found(format!("node {uid}")))?;
        let parent_id = link
            .parent_link_id
            .clone()
            .ok_or_else(|| DriveError::validation("root folders cannot be renamed"))?;
        let parent_uid = NodeUid::new(uid.volume_id.clone(), parent_id);

        let parent_keys = self.node_keys(&parent_uid, abort).await?;
        let parent_hash_key = parent_keys
            .hash_key
            .ok_or_else(|| DriveError::decryption("parent hash key is unavailable"))?;
        let new_hash = generate_lookup_hash(new_name, &parent_hash_key)?;

        let availability = self
            .check_available_hashes(&parent_uid, vec![new_hash.clone()], None, abort)
            .await?;
        if !availability.available_hashes.contains(&new_hash) {
            return Err(DriveError::validation(format!(
                "name {new_name:?} is already in use"
            )));
        }

        let keys = self.node_keys(uid, abort).await?;
        let name_session_key = keys.name_session_key.ok_or_else(|| {
            DriveError::decryption("name session key is unavailable; node name did not decrypt")
        })?;
        let (address, address_key) = self
            .shares()
            .volume_email_key(&uid.volume_id, abort)
            .await?;

        let encrypted_name = self
            .crypto
            .encrypt_node_name(new_name, Some(&name_session_key), None, &address_key)
            .await?;

        let request = RenameRequest {
            name: encrypted_name.0,
            name_signature_email: address.email,
            hash: new_hash,
            original_hash: link.hash,
        };
        let _: serde_json::Value = self
            .api
            .put_json(
                &format!(
                    "drive/v2/volumes/{}/links/{}/rename",
                    uid.volume_id, uid.node_id
                ),
                &request,
                abort,
            )
            .await?;

        self.mark_stale(uid).await;
        Ok(())
    }

    /// Move nodes under a new parent. Yields one result per node; UIDs are
    /// stable across the move.
    pub fn move_nodes(
        &self,
        uids: Vec<NodeUid>,
        new_parent_uid: &NodeUid,
        abort: &AbortSignal,
    ) -> impl Stream<Item = NodeResult> + Send + 'static {
        let this = self.clone();
        let new_parent = new_parent_uid.clone();
        let abort = abort.clone();

        let chunks: Vec<Vec<NodeUid>> = uids
            .chunks(FETCH_BATCH)
            .map(<[NodeUid]>::to_vec)
            .collect();

        stream::unfold(chunks.into_iter(), move |mut chunks| {
            let this = this.clone();
            let new_parent = new_parent.clone();
            let abort = abort.clone();
            async move {
                let chunk = chunks.next()?;
                let results = this.move_chunk(chunk, &new_parent, &abort).await;
                Some((stream::iter(results), chunks))
            }
        })
        .flatten()
    }

    async fn move_chunk(
        &self,
        uids: Vec<NodeUid>,
        new_parent: &NodeUid,
        abort: &AbortSignal,
    ) -> Vec<NodeResult> {
        let mut results: Vec<NodeResult> = Vec::with_capacity(uids.len());

        // Resolve destination material once per chunk.
        let prepared = async {
            let parent_keys = self.node_keys(new_parent, abort).await?;
            let parent_hash_key = parent_keys
                .hash_key
                .clone()
                .ok_or_else(|| DriveError::decryption("destination hash key is unavailable"))?;
            let parent_public = self
                .crypto
                .provider()
                .public_key(&parent_keys.key)?;
            let signer = self
                .shares()
                .volume_email_key(&new_parent.volume_id, abort)
                .await?;
            Ok::<_, DriveError>((parent_hash_key, parent_public, signer))
        }
        .await;

        let (parent_hash_key, parent_public, (address, address_key)) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                return uids
                    .into_iter()
                    .map(|uid| NodeResult {
                        uid,
                        outcome: Err(err.clone()),
                    })
                    .collect();
            }
        };

        let mut moves: Vec<MoveLinkDto> = Vec::new();
        let mut moved_uids: Vec<NodeUid> = Vec::new();
        let mut hashes: Vec<String> = Vec::new();

        for uid in uids {
            if uid.volume_id != new_parent.volume_id {
                results.push(NodeResult {
                    uid,
                    outcome: Err(DriveError::validation(
                        "cross-volume moves are not supported",
                    )),
                });
                continue;
            }

            let prepared = async {
                let node = self
                    .get_node(&uid, abort)
                    .await?
                    .map_err(|_| DriveError::decryption("node name did not decrypt"))?;
                let keys = self.node_keys(&uid, abort).await?;
                let hash = generate_lookup_hash(&node.name, &parent_hash_key)?;
                let passphrase = self
                    .crypto
                    .encrypt_passphrase(
                        &keys.passphrase,
                        std::slice::from_ref(&parent_public),
                        &address_key,
                    )
                    .await?;
                Ok::<_, DriveError>(MoveLinkDto {
                    link_id: uid.node_id.to_string(),
                    hash,
                    node_passphrase: passphrase.passphrase.0,
                    node_passphrase_signature: passphrase.signature.0,
                    signature_email: address.email.clone(),
                })
            }
            .await;

            match prepared {
                Ok(move_link) => {
                    hashes.push(move_link.hash.clone());
                    moves.push(move_link);
                    moved_uids.push(uid);
                }
                Err(err) => results.push(NodeResult {
                    uid,
                    outcome: Err(err),
                }),
            }
        }

        if moves.is_empty() {
            return results;
        }

        // Destination collision pre-check: colliding names fail locally and
        // are excluded from the server call.
        match self
            .check_available_hashes(new_parent, hashes, None, abort)
            .await
        {
            Ok(availability) => {
                let mut kept = Vec::with_capacity(moves.len());
                let mut kept_uids = Vec::with_capacity(moved_uids.len());
                for (move_link, uid) in moves.into_iter().zip(moved_uids) {
                    if availability.available_hashes.contains(&move_link.hash) {
                        kept.push(move_link);
                        kept_uids.push(uid);
                    } else {
                        results.push(NodeResult {
                            uid,
                            outcome: Err(DriveError::validation(
                                "a node with this name already exists at the destination",
                            )),
                        });
                    }
                }
                moves = kept;
                moved_uids = kept_uids;
            }
            Err(err) => {
                for uid in moved_uids {
                    results.push(NodeResult {
                        uid,
                        outcome: Err(err.clone()),
                    });
                }
                return results;
            }
        }

        if moves.is_empty() {
            return results;
        }

        let request = MoveMultipleRequest {
            parent_link_id: new_parent.node_id.to_string(),
            links: moves,
        };
        match self
            .api
            .post_json::<_, MultipleResponse>(
                &format!("drive/v2/volumes/{}/links/move_multiple", new_parent.volume_id),
                &request,
                abort,
            )
            .await
        {
            Ok(response) => {
                for item in response.responses {
                    let uid = NodeUid::new(new_parent.volume_id.clone(), item.link_id);
                    let outcome = if is_ok_code(item.response.code) {
                        Ok(())
                    } else {
                        Err(DriveError::api_code(
                            item.response.code,
                            item.response.error.unwrap_or_default(),
                        ))
                    };
                    if outcome.is_ok() {
                        self.mark_stale(&uid).await;
                    }
                    results.push(NodeResult { uid, outcome });
                }
            }
            Err(err) => {
                for uid in moved_uids {
                    results.push(NodeResult {
                        uid,
                        outcome: Err(err.clone()),
                    });
                }
            }
        }

        results
    }

    /// Move nodes to the trash.
    pub fn trash_nodes(
        &self,
        uids: Vec<NodeUid>,
        abort: &AbortSignal,
    ) -> impl Stream<Item = NodeResult> + Send + 'static {
        self.bulk_by_ids(uids, BulkOp::Trash, abort)
    }

    /// Restore trashed nodes.
    pub fn restore_nodes(
        &self,
        uids: Vec<NodeUid>,
        abort: &AbortSignal,
    ) -> impl Stream<Item = NodeResult> + Send + 'static {
        self.bulk_by_ids(uids, BulkOp::Restore, abort)
    }

    /// Permanently delete nodes. Irreversible.
    pub fn delete_nodes(
        &self,
        uids: Vec<NodeUid>,
        abort: &AbortSignal,
    ) -> impl Stream<Item = NodeResult> + Send + 'static {
        self.bulk_by_ids(uids, BulkOp::Delete, abort)
    }

    fn bulk_by_ids(
        &self,
        uids: Vec<NodeUid>,
        op: BulkOp,
        abort: &AbortSignal,
    ) -> impl Stream<Item = NodeResult> + Send + 'static {
        // Consecutive same-volume runs become batches.
        let mut batches: Vec<(VolumeId, Vec<NodeUid>)> = Vec::new();
        for uid in uids {
            match batches.last_mut() {
                Some((volume, batch))
                    if *volume == uid.volume_id && batch.len() < FETCH_BATCH =>
                {
                    batch.push(uid);
                }
                _ => batches.push((uid.volume_id.clone(), vec![uid])),
            }
        }

        let this = self.clone();
        let abort = abort.clone();
        stream::unfold(batches.into_iter(), move |mut batches| {
            let this = this.clone();
            let abort = abort.clone();
            async move {
                let (volume_id, batch) = batches.next()?;
                let results = this.bulk_chunk(volume_id, batch, op, &abort).await;
                Some((stream::iter(results), batches))
            }
        })
        .flatten()
    }

    async fn bulk_chunk(
        &self,
        volume_id: VolumeId,
        uids: Vec<NodeUid>,
        op: BulkOp,
        abort: &AbortSignal,
    ) -> Vec<NodeResult> {
        let request = MultipleRequest {
            link_ids: uids.iter().map(|uid| uid.node_id.to_string()).collect(),
        };
        let response = self
            .api
            .post_json::<_, MultipleResponse>(&op.path(&volume_id), &request, abort)
            .await;

        match response {
            Ok(response) => {
                debug!(volume = %volume_id, count = response.responses.len(), "bulk reply");
                let mut results = Vec::with_capacity(uids.len());
                for item in response.responses {
                    let uid = NodeUid::new(volume_id.clone(), item.link_id);
                    let outcome = if is_ok_code(item.response.code) {
                        Ok(())
                    } else {
                        Err(DriveError::api_code(
                            item.response.code,
                            item.response.error.unwrap_or_default(),
                        ))
                    };
                    if outcome.is_ok() {
                        match op {
                            // Deleted nodes lose all cached material;
                            // trashed and restored nodes are re-fetched on
                            // the next read.
                            BulkOp::Delete => self.evict(&uid).await,
                            BulkOp::Trash | BulkOp::Restore => self.mark_stale(&uid).await,
                        }
                    }
                    results.push(NodeResult { uid, outcome });
                }
                results
            }
            Err(err) => uids
                .into_iter()
                .map(|uid| NodeResult {
                    uid,
                    outcome: Err(err.clone()),
                })
                .collect(),
        }
    }

    /// Create a folder under a parent, returning its UID.
    pub async fn create_folder(
        &self,
        parent_uid: &NodeUid,
        name: &str,
        abort: &AbortSignal,
    ) -> Result<NodeUid, DriveError> {
        validate_node_name(name)?;

        let parent_keys = self.node_keys(parent_uid, abort).await?;
        let parent_hash_key = parent_keys
            .hash_key
            .clone()
            .ok_or_else(|| DriveError::decryption("parent hash key is unavailable"))?;
        let parent_public = self.crypto.provider().public_key(&parent_keys.key)?;
        let (address, address_key) = self
            .shares()
            .volume_email_key(&parent_uid.volume_id, abort)
            .await?;

        let hash = generate_lookup_hash(name, &parent_hash_key)?;
        let availability = self
            .check_available_hashes(parent_uid, vec![hash.clone()], None, abort)
            .await?;
        if !availability.available_hashes.contains(&hash) {
            return Err(DriveError::validation(format!(
                "name {name:?} is already in use"
            )));
        }

        let (armored_key, decrypted_key) = self
            .crypto
            .generate_key(std::slice::from_ref(&parent_public), &address_key)
            .await?;
        let hash_key = self.crypto.generate_hash_key(&decrypted_key.key).await?;
        let node_public = self.crypto.provider().public_key(&decrypted_key.key)?;
        let encrypted_name = self
            .crypto
            .encrypt_node_name(name, None, Some(&node_public), &address_key)
            .await?;

        let request = CreateFolderRequest {
            parent_link_id: parent_uid.node_id.to_string(),
            name: encrypted_name.0,
            hash,
            node_key: armored_key.key.0,
            node_passphrase: armored_key.passphrase.0,
            node_passphrase_signature: armored_key.passphrase_signature.0,
            node_hash_key: hash_key.armored.0,
            signature_email: address.email,
        };
        let response: CreateFolderResponse = self
            .api
            .post_json(
                &format!("drive/v2/volumes/{}/folders", parent_uid.volume_id),
                &request,
                abort,
            )
            .await?;

        Ok(NodeUid::new(
            parent_uid.volume_id.clone(),
            response.folder.id,
        ))
    }
}
