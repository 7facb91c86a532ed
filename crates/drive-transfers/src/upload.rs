//! The upload engine
//!
//! Chunked encrypt-sign-commit pipeline: probe the name's lookup hash (with
//! numbered ` (n)` variants on collision, reclaiming our own pending
//! drafts), create the draft, fetch the per-revision verification code,
//! then stream 4 MiB cleartext blocks through encryption, verifier-token
//! derivation, token requests, and bounded-parallel storage POSTs. The
//! commit signs the manifest of block hashes and stores the encrypted
//! extended attributes.

use crate::controller::{wait_unpaused, MergedAbort, TransferController, UploadController};
use crate::download::ProgressCallback;
use crate::integrity::IntegrityAccumulator;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use drive_core::{
    AbortSignal, DriveError, MetricContext, NodeUid, RevisionId, TelemetryEvent,
};
use drive_crypto::{HashKey, PrivateKey, PublicKey, SessionKey};
use drive_nodes::{validate_node_name, NodeAccess};
use futures::stream::{Stream, StreamExt};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, warn};

/// Cleartext block size.
pub const UPLOAD_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Bounded parallelism of block POSTs within one upload.
pub const UPLOAD_BLOCK_CONCURRENCY: usize = 4;

/// Blocks per token request.
const TOKEN_BATCH: usize = 8;

/// Name variants probed per availability call.
const HASH_CANDIDATE_BATCH: usize = 10;

/// Bound on probed name variants before giving up.
const MAX_NAME_VARIANTS: usize = 50;

/// Bound on restarts when a chosen name is taken by another client between
/// the probe and the draft creation.
const MAX_NAME_RESTARTS: usize = 3;

/// API code for an entity that already exists (name race lost).
const API_CODE_ALREADY_EXISTS: u64 = 2500;

/// Caller-supplied metadata of an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadMetadata {
    /// Media type stored on the node.
    pub media_type: Option<String>,
    /// Expected cleartext size, for progress and telemetry.
    pub expected_size: Option<u64>,
    /// Claimed modification time stored in the extended attributes.
    pub modification_time: Option<i64>,
}

/// One thumbnail riding along with an upload.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    /// Thumbnail type discriminant (1 = preview).
    pub thumbnail_type: u8,
    /// Cleartext thumbnail bytes.
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub(crate) enum UploadTarget {
    NewFile { parent_uid: NodeUid, name: String },
    NewRevision { node_uid: NodeUid },
}

// Wire shapes of the upload path.

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateFileRequest {
    #[serde(rename = "ParentLinkID")]
    parent_link_id: String,
    name: String,
    hash: String,
    node_key: String,
    node_passphrase: String,
    node_passphrase_signature: String,
    content_key_packet: String,
    content_key_packet_signature: String,
    signature_email: String,
    name_signature_email: String,
    #[serde(rename = "MIMEType", skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
    #[serde(rename = "ClientUID")]
    client_uid: String,
}

#[derive(Deserialize)]
struct CreateFileResponse {
    #[serde(rename = "File")]
    file: CreatedFileDto,
}

#[derive(Deserialize)]
struct CreatedFileDto {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "RevisionID")]
    revision_id: String,
}

#[derive(Deserialize)]
struct CreateRevisionResponse {
    #[serde(rename = "Revision")]
    revision: CreatedRevisionDto,
}

#[derive(Deserialize)]
struct CreatedRevisionDto {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Deserialize)]
struct VerificationResponse {
    #[serde(rename = "VerificationCode")]
    verification_code: String,
}

#[derive(Serialize)]
struct BlockTokenRequest {
    #[serde(rename = "VolumeID")]
    volume_id: String,
    #[serde(rename = "LinkID")]
    link_id: String,
    #[serde(rename = "RevisionID")]
    revision_id: String,
    #[serde(rename = "Blocks")]
    blocks: Vec<BlockMetaDto>,
    #[serde(rename = "Thumbnails")]
    thumbnails: Vec<ThumbnailMetaDto>,
}

#[derive(Serialize)]
struct BlockMetaDto {
    #[serde(rename = "Index")]
    index: u64,
    #[serde(rename = "Hash")]
    hash: String,
    #[serde(rename = "Size")]
    size: u64,
    #[serde(rename = "EncSignature")]
    enc_signature: String,
    #[serde(rename = "Verifier")]
    verifier: VerifierDto,
}

#[derive(Serialize)]
struct VerifierDto {
    #[serde(rename = "Token")]
    token: String,
}

#[derive(Serialize)]
struct ThumbnailMetaDto {
    #[serde(rename = "Type")]
    thumbnail_type: u8,
    #[serde(rename = "Hash")]
    hash: String,
    #[serde(rename = "Size")]
    size: u64,
}

#[derive(Deserialize)]
struct BlockTokenResponse {
    #[serde(rename = "UploadLinks", default)]
    upload_links: Vec<UploadLinkDto>,
    #[serde(rename = "ThumbnailLinks", default)]
    thumbnail_links: Vec<UploadLinkDto>,
}

#[derive(Deserialize, Clone)]
struct UploadLinkDto {
    #[serde(rename = "Index", default)]
    index: u64,
    #[serde(rename = "BareURL")]
    bare_url: String,
    #[serde(rename = "Token")]
    token: String,
}

#[derive(Serialize)]
struct CommitRequest {
    #[serde(rename = "ManifestSignature")]
    manifest_signature: String,
    #[serde(rename = "SignatureEmail")]
    signature_email: String,
    #[serde(rename = "XAttr")]
    xattr: String,
}

/// Insert a ` (n)` counter before the extension.
fn name_variant(name: &str, variant: usize) -> String {
    if variant == 0 {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 => {
            format!("{} ({variant}){}", &name[..dot], &name[dot..])
        }
        _ => format!("{name} ({variant})"),
    }
}

/// Verifier token binding a block index and its cleartext to the
/// per-revision verification code.
fn verifier_token(code: &[u8], index: u64, cleartext: &[u8]) -> Result<String, DriveError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(code)
        .map_err(|err| DriveError::decryption(format!("bad verification code: {err}")))?;
    mac.update(&index.to_le_bytes());
    mac.update(&Sha256::digest(cleartext));
    Ok(hex::encode(mac.finalize().into_bytes()))
}

struct PreparedBlock {
    index: u64,
    ciphertext: Vec<u8>,
    hash: Vec<u8>,
    enc_signature: Vec<u8>,
    verifier: String,
    cleartext_size: u64,
}

struct Draft {
    node_uid: NodeUid,
    revision_id: RevisionId,
    node_key: PrivateKey,
    node_public: PublicKey,
    content_key: SessionKey,
    created_file: bool,
}

/// Single-shot handle over one file or revision upload.
pub struct FileUploader {
    pub(crate) access: NodeAccess,
    pub(crate) semaphore: Arc<Semaphore>,
    pub(crate) target: UploadTarget,
    pub(crate) metadata: UploadMetadata,
    pub(crate) client_uid: String,
    pub(crate) context: MetricContext,
}

impl FileUploader {
    /// Stream `source` into a new committed revision. The controller's
    /// `completion()` yields the node UID.
    pub fn write_stream<S>(
        self,
        source: S,
        thumbnails: Vec<Thumbnail>,
        on_progress: Option<ProgressCallback>,
        abort: &AbortSignal,
    ) -> UploadController
    where
        S: Stream<Item = Result<Vec<u8>, DriveError>> + Send + Unpin + 'static,
    {
        TransferController::spawn(abort, move |paused, merged| {
            let api = self.access.api().clone();
            let context = self.context;
            let expected_size = self.metadata.expected_size;
            async move {
                let mut uploaded: u64 = 0;
                let result =
                    run_upload(self, source, thumbnails, on_progress, paused, merged, &mut uploaded)
                        .await;
                match &result {
                    Ok(_) => api.record(TelemetryEvent::Upload {
                        context,
                        uploaded_size: uploaded,
                        expected_size,
                        error: None,
                    }),
                    Err(err) => {
                        if let Some(kind) = err.telemetry_kind() {
                            api.record(TelemetryEvent::Upload {
                                context,
                                uploaded_size: uploaded,
                                expected_size,
                                error: Some(kind),
                            });
                        }
                    }
                }
                result
            }
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_upload<S>(
    uploader: FileUploader,
    mut source: S,
    thumbnails: Vec<Thumbnail>,
    on_progress: Option<ProgressCallback>,
    mut paused: watch::Receiver<bool>,
    merged: MergedAbort,
    uploaded: &mut u64,
) -> Result<NodeUid, DriveError>
where
    S: Stream<Item = Result<Vec<u8>, DriveError>> + Send + Unpin + 'static,
{
    merged.check()?;
    let _permit = uploader
        .semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| DriveError::server("upload queue closed"))?;
    let abort = merged.signal();

    let volume_id = match &uploader.target {
        UploadTarget::NewFile { parent_uid, .. } => parent_uid.volume_id.clone(),
        UploadTarget::NewRevision { node_uid } => node_uid.volume_id.clone(),
    };
    let (address, address_key) = uploader
        .access
        .shares()
        .volume_email_key(&volume_id, &abort)
        .await?;

    // Name probing and draft creation, restarted when another client wins
    // the name race between probe and create.
    let mut draft: Option<Draft> = None;
    for restart in 0..MAX_NAME_RESTARTS {
        match create_draft(&uploader, &address.email, &address_key, &abort).await {
            Ok(created) => {
                draft = Some(created);
                break;
            }
            Err(DriveError::ApiCode { code, .. }) if code == API_CODE_ALREADY_EXISTS => {
                warn!(restart, "name taken between probe and draft; restarting");
            }
            Err(err) => return Err(err),
        }
    }
    let draft = draft.ok_or_else(|| {
        DriveError::validation("could not settle on an available name")
    })?;

    let result = stream_and_commit(
        &uploader,
        &draft,
        &address.email,
        &address_key,
        &mut source,
        thumbnails,
        &on_progress,
        &mut paused,
        &merged,
        uploaded,
    )
    .await;

    if let Err(err) = result {
        // Best-effort draft cleanup; the upload error wins.
        cleanup_draft(&uploader.access, &draft).await;
        return Err(err);
    }

    Ok(draft.node_uid)
}

async fn create_draft(
    uploader: &FileUploader,
    signature_email: &str,
    address_key: &PrivateKey,
    abort: &AbortSignal,
) -> Result<Draft, DriveError> {
    let access = &uploader.access;
    let crypto = access.crypto();

    match &uploader.target {
        UploadTarget::NewRevision { node_uid } => {
            let keys = access.node_keys(node_uid, abort).await?;
            let content_key = keys.content_key.clone().ok_or_else(|| {
                DriveError::decryption("content key is unavailable; file cannot take revisions")
            })?;
            let node_public = crypto.provider().public_key(&keys.key)?;
            let response: CreateRevisionResponse = access
                .api()
                .post_json(
                    &format!(
                        "drive/v2/volumes/{}/files/{}/revisions",
                        node_uid.volume_id, node_uid.node_id
                    ),
                    &serde_json::json!({}),
                    abort,
                )
                .await?;
            Ok(Draft {
                node_uid: node_uid.clone(),
                revision_id: RevisionId::new(response.revision.id),
                node_key: keys.key,
                node_public,
                content_key,
                created_file: false,
            })
        }
        UploadTarget::NewFile { parent_uid, name } => {
            validate_node_name(name)?;
            let parent_keys = access.node_keys(parent_uid, abort).await?;
            let parent_hash_key = parent_keys
                .hash_key
                .clone()
                .ok_or_else(|| DriveError::decryption("parent hash key is unavailable"))?;
            let parent_public = crypto.provider().public_key(&parent_keys.key)?;

            let (chosen_name, reclaimed) = choose_name(
                uploader,
                parent_uid,
                name,
                &parent_hash_key,
                abort,
            )
            .await?;

            if let Some(draft_uid) = reclaimed {
                // Our own pending draft holds the hash; pick it back up.
                let keys = access.node_keys(&draft_uid.0, abort).await?;
                let content_key = keys.content_key.clone().ok_or_else(|| {
                    DriveError::decryption("reclaimed draft has no content key")
                })?;
                let node_public = crypto.provider().public_key(&keys.key)?;
                return Ok(Draft {
                    node_uid: draft_uid.0,
                    revision_id: draft_uid.1,
                    node_key: keys.key,
                    node_public,
                    content_key,
                    created_file: false,
                });
            }

            let hash = drive_crypto::generate_lookup_hash(&chosen_name, &parent_hash_key)?;
            let (armored, decrypted) = crypto
                .generate_key(std::slice::from_ref(&parent_public), address_key)
                .await?;
            let node_public = crypto.provider().public_key(&decrypted.key)?;
            let content_key = crypto.provider().generate_session_key().await?;
            let packet = crypto
                .encrypt_session_key(&content_key, std::slice::from_ref(&node_public))
                .await?;
            let packet_signature = crypto
                .provider()
                .sign_detached(&content_key.bytes, &decrypted.key, None)
                .await?;
            let encrypted_name = crypto
                .encrypt_node_name(&chosen_name, None, Some(&node_public), address_key)
                .await?;

            let request = CreateFileRequest {
                parent_link_id: parent_uid.node_id.to_string(),
                name: encrypted_name.0,
                hash,
                node_key: armored.key.0,
                node_passphrase: armored.passphrase.0,
                node_passphrase_signature: armored.passphrase_signature.0,
                content_key_packet: BASE64.encode(&packet.0),
                content_key_packet_signature: packet_signature.0,
                signature_email: signature_email.to_string(),
                name_signature_email: signature_email.to_string(),
                mime_type: uploader.metadata.media_type.clone(),
                client_uid: uploader.client_uid.clone(),
            };
            let response: CreateFileResponse = access
                .api()
                .post_json(
                    &format!("drive/v2/volumes/{}/files", parent_uid.volume_id),
                    &request,
                    abort,
                )
                .await?;

            Ok(Draft {
                node_uid: NodeUid::new(parent_uid.volume_id.clone(), response.file.id),
                revision_id: RevisionId::new(response.file.revision_id),
                node_key: decrypted.key,
                node_public,
                content_key,
                created_file: true,
            })
        }
    }
}

/// Probe name candidates in batches. Returns the chosen name, or our own
/// pending draft to reclaim.
async fn choose_name(
    uploader: &FileUploader,
    parent_uid: &NodeUid,
    desired: &str,
    parent_hash_key: &HashKey,
    abort: &AbortSignal,
) -> Result<(String, Option<(NodeUid, RevisionId)>), DriveError> {
    let mut variant = 0usize;
    while variant < MAX_NAME_VARIANTS {
        let batch_end = usize::min(variant + HASH_CANDIDATE_BATCH, MAX_NAME_VARIANTS);
        let candidates: Vec<String> = (variant..batch_end)
            .map(|n| name_variant(desired, n))
            .collect();
        let hashes: Vec<String> = candidates
            .iter()
            .map(|name| drive_crypto::generate_lookup_hash(name, parent_hash_key))
            .collect::<Result<_, _>>()?;

        let response = uploader
            .access
            .check_available_hashes(
                parent_uid,
                hashes.clone(),
                Some(uploader.client_uid.clone()),
                abort,
            )
            .await?;

        // Reclaim our own pending draft when one holds a candidate hash.
        for pending in &response.pending_hashes {
            if pending.client_uid.as_deref() == Some(uploader.client_uid.as_str()) {
                if let (Some(link_id), Some(revision_id), Some(position)) = (
                    pending.draft_link_id.clone(),
                    pending.draft_revision_id.clone(),
                    hashes.iter().position(|hash| *hash == pending.hash),
                ) {
                    debug!(name = %candidates[position], "reclaiming pending draft");
                    return Ok((
                        candidates[position].clone(),
                        Some((
                            NodeUid::new(parent_uid.volume_id.clone(), link_id),
                            RevisionId::new(revision_id),
                        )),
                    ));
                }
            }
        }

        for (candidate, hash) in candidates.iter().zip(&hashes) {
            if response.available_hashes.contains(hash) {
                return Ok((candidate.clone(), None));
            }
        }
        variant = batch_end;
    }

    Err(DriveError::validation(format!(
        "no available name variant for {desired:?} within {MAX_NAME_VARIANTS} tries"
    )))
}

#[allow(clippy::too_many_arguments)]
async fn stream_and_commit<S>(
    uploader: &FileUploader,
    draft: &Draft,
    signature_email: &str,
    address_key: &PrivateKey,
    source: &mut S,
    thumbnails: Vec<Thumbnail>,
    on_progress: &Option<ProgressCallback>,
    paused: &mut watch::Receiver<bool>,
    merged: &MergedAbort,
    uploaded: &mut u64,
) -> Result<(), DriveError>
where
    S: Stream<Item = Result<Vec<u8>, DriveError>> + Send + Unpin + 'static,
{
    let access = &uploader.access;
    let crypto = access.crypto();
    let abort = merged.signal();

    // Per-revision verification code challenging each block.
    let verification: VerificationResponse = access
        .api()
        .get_json(
            &format!(
                "drive/v2/volumes/{}/links/{}/revisions/{}/verification",
                draft.node_uid.volume_id, draft.node_uid.node_id, draft.revision_id
            ),
            &abort,
        )
        .await?;
    let verification_code = BASE64
        .decode(&verification.verification_code)
        .map_err(|err| DriveError::decryption(format!("bad verification code: {err}")))?;

    let mut accumulator = IntegrityAccumulator::new();
    let mut block_hashes: Vec<Vec<u8>> = Vec::new();
    let mut block_sizes: Vec<u64> = Vec::new();
    let mut pending: Vec<PreparedBlock> = Vec::new();
    let mut index: u64 = 0;
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = source.next().await {
        buffer.extend_from_slice(&chunk?);
        while buffer.len() >= UPLOAD_BLOCK_SIZE {
            let cleartext: Vec<u8> = buffer.drain(..UPLOAD_BLOCK_SIZE).collect();
            index += 1;
            prepare_block(
                uploader,
                draft,
                address_key,
                &verification_code,
                index,
                cleartext,
                &mut accumulator,
                &mut pending,
            )
            .await?;
            if pending.len() >= TOKEN_BATCH {
                flush_blocks(
                    uploader,
                    draft,
                    &mut pending,
                    &mut block_hashes,
                    &mut block_sizes,
                    paused,
                    merged,
                    uploaded,
                    on_progress,
                    &accumulator,
                )
                .await?;
            }
        }
    }

    if !buffer.is_empty() {
        index += 1;
        let cleartext = std::mem::take(&mut buffer);
        prepare_block(
            uploader,
            draft,
            address_key,
            &verification_code,
            index,
            cleartext,
            &mut accumulator,
            &mut pending,
        )
        .await?;
    }
    if !pending.is_empty() {
        flush_blocks(
            uploader,
            draft,
            &mut pending,
            &mut block_hashes,
            &mut block_sizes,
            paused,
            merged,
            uploaded,
            on_progress,
            &accumulator,
        )
        .await?;
    }

    // Thumbnails ride in their own token request, manifested first.
    let mut thumbnail_hashes: Vec<Vec<u8>> = Vec::new();
    if !thumbnails.is_empty() {
        upload_thumbnails(uploader, draft, address_key, thumbnails, merged, &mut thumbnail_hashes)
            .await?;
    }

    // Commit: manifest signature plus encrypted extended attributes.
    let (sha1, total_size) = accumulator.finalize();

    let mut manifest: Vec<u8> = Vec::new();
    for hash in &thumbnail_hashes {
        manifest.extend_from_slice(hash);
    }
    for hash in &block_hashes {
        manifest.extend_from_slice(hash);
    }
    let manifest_signature = crypto.sign_manifest(&manifest, address_key).await?;

    let mut common = serde_json::Map::new();
    if let Some(modification_time) = uploader.metadata.modification_time {
        common.insert(
            "ModificationTime".to_string(),
            serde_json::json!(modification_time),
        );
    }
    common.insert("Size".to_string(), serde_json::json!(total_size));
    common.insert("BlockSizes".to_string(), serde_json::json!(block_sizes));
    common.insert(
        "Digests".to_string(),
        serde_json::json!({ "SHA1": sha1 }),
    );
    let xattr_json = serde_json::json!({ "Common": common }).to_string();
    let xattr = crypto
        .encrypt_armored_text(&xattr_json, &draft.node_public, address_key)
        .await?;

    let request = CommitRequest {
        manifest_signature: manifest_signature.0,
        signature_email: signature_email.to_string(),
        xattr: xattr.0,
    };
    let _: serde_json::Value = access
        .api()
        .put_json(
            &format!(
                "drive/v2/volumes/{}/files/{}/revisions/{}",
                draft.node_uid.volume_id, draft.node_uid.node_id, draft.revision_id
            ),
            &request,
            &abort,
        )
        .await?;

    access.mark_stale(&draft.node_uid).await;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn prepare_block(
    uploader: &FileUploader,
    draft: &Draft,
    address_key: &PrivateKey,
    verification_code: &[u8],
    index: u64,
    cleartext: Vec<u8>,
    accumulator: &mut IntegrityAccumulator,
    pending: &mut Vec<PreparedBlock>,
) -> Result<(), DriveError> {
    accumulator.update(&cleartext);
    let encrypted = uploader
        .access
        .crypto()
        .encrypt_block(&cleartext, &draft.content_key, address_key)
        .await?;
    let verifier = verifier_token(verification_code, index, &cleartext)?;
    pending.push(PreparedBlock {
        index,
        hash: Sha256::digest(&encrypted.ciphertext).to_vec(),
        ciphertext: encrypted.ciphertext,
        enc_signature: encrypted.encrypted_signature,
        verifier,
        cleartext_size: cleartext.len() as u64,
    });
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn flush_blocks(
    uploader: &FileUploader,
    draft: &Draft,
    pending: &mut Vec<PreparedBlock>,
    block_hashes: &mut Vec<Vec<u8>>,
    block_sizes: &mut Vec<u64>,
    paused: &mut watch::Receiver<bool>,
    merged: &MergedAbort,
    uploaded: &mut u64,
    on_progress: &Option<ProgressCallback>,
    accumulator: &IntegrityAccumulator,
) -> Result<(), DriveError> {
    wait_unpaused(paused, merged).await?;
    let abort = merged.signal();
    let blocks: Vec<PreparedBlock> = std::mem::take(pending);

    let request = BlockTokenRequest {
        volume_id: draft.node_uid.volume_id.to_string(),
        link_id: draft.node_uid.node_id.to_string(),
        revision_id: draft.revision_id.to_string(),
        blocks: blocks
            .iter()
            .map(|block| BlockMetaDto {
                index: block.index,
                hash: BASE64.encode(&block.hash),
                size: block.ciphertext.len() as u64,
                enc_signature: BASE64.encode(&block.enc_signature),
                verifier: VerifierDto {
                    token: block.verifier.clone(),
                },
            })
            .collect(),
        thumbnails: Vec::new(),
    };
    let response: BlockTokenResponse = uploader
        .access
        .api()
        .post_json("drive/blocks", &request, &abort)
        .await?;

    // Bounded-parallel storage POSTs; each block retries per the transport
    // matrix inside the client.
    let api = uploader.access.api().clone();
    let uploads: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = Result<u64, DriveError>> + Send + '_>>> = blocks
        .iter()
        .map(|block| {
            let api = api.clone();
            let abort = abort.clone();
            let link = response
                .upload_links
                .iter()
                .find(|link| link.index == block.index)
                .cloned();
            let fut: std::pin::Pin<Box<dyn std::future::Future<Output = Result<u64, DriveError>> + Send + '_>> =
                Box::pin(async move {
                    let link = link.ok_or_else(|| {
                        DriveError::server(format!("no upload token for block {}", block.index))
                    })?;
                    api.post_blob(&link.bare_url, &link.token, &block.ciphertext, &abort)
                        .await?;
                    Ok::<u64, DriveError>(block.ciphertext.len() as u64)
                });
            fut
        })
        .collect();
    let mut results = futures::stream::iter(uploads).buffer_unordered(UPLOAD_BLOCK_CONCURRENCY);
    while let Some(result) = results.next().await {
        *uploaded += result?;
    }
    drop(results);

    for block in &blocks {
        block_hashes.push(block.hash.clone());
        block_sizes.push(block.cleartext_size);
    }
    if let Some(on_progress) = on_progress {
        on_progress(accumulator.size());
    }
    Ok(())
}

async fn upload_thumbnails(
    uploader: &FileUploader,
    draft: &Draft,
    address_key: &PrivateKey,
    thumbnails: Vec<Thumbnail>,
    merged: &MergedAbort,
    thumbnail_hashes: &mut Vec<Vec<u8>>,
) -> Result<(), DriveError> {
    let abort = merged.signal();
    let crypto = uploader.access.crypto();

    let mut encrypted: Vec<(u8, Vec<u8>, Vec<u8>)> = Vec::with_capacity(thumbnails.len());
    for thumbnail in &thumbnails {
        let ciphertext = crypto
            .encrypt_thumbnail_block(&thumbnail.data, &draft.content_key, address_key)
            .await?;
        let hash = Sha256::digest(&ciphertext).to_vec();
        encrypted.push((thumbnail.thumbnail_type, ciphertext, hash));
    }

    let request = BlockTokenRequest {
        volume_id: draft.node_uid.volume_id.to_string(),
        link_id: draft.node_uid.node_id.to_string(),
        revision_id: draft.revision_id.to_string(),
        blocks: Vec::new(),
        thumbnails: encrypted
            .iter()
            .map(|(thumbnail_type, ciphertext, hash)| ThumbnailMetaDto {
                thumbnail_type: *thumbnail_type,
                hash: BASE64.encode(hash),
                size: ciphertext.len() as u64,
            })
            .collect(),
    };
    let response: BlockTokenResponse = uploader
        .access
        .api()
        .post_json("drive/blocks", &request, &abort)
        .await?;

    for ((_, ciphertext, hash), link) in encrypted.iter().zip(response.thumbnail_links.iter()) {
        uploader
            .access
            .api()
            .post_blob(&link.bare_url, &link.token, ciphertext, &abort)
            .await?;
        thumbnail_hashes.push(hash.clone());
    }
    Ok(())
}

/// Best-effort removal of an uncommitted draft.
async fn cleanup_draft(access: &NodeAccess, draft: &Draft) {
    let abort = AbortSignal::none();
    if draft.created_file {
        let request = serde_json::json!({
            "LinkIDs": [draft.node_uid.node_id.to_string()],
        });
        let result: Result<serde_json::Value, _> = access
            .api()
            .post_json(
                &format!("drive/v2/volumes/{}/delete_multiple", draft.node_uid.volume_id),
                &request,
                &abort,
            )
            .await;
        if let Err(err) = result {
            warn!(%err, "draft cleanup failed");
        }
    } else {
        let result: Result<serde_json::Value, _> = access
            .api()
            .delete_json(
                &format!(
                    "drive/v2/volumes/{}/files/{}/revisions/{}",
                    draft.node_uid.volume_id, draft.node_uid.node_id, draft.revision_id
                ),
                &abort,
            )
            .await;
        if let Err(err) = result {
            warn!(%err, "draft revision cleanup failed");
        }
    }
}
