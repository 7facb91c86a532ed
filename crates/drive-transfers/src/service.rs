//! Transfer engine entry points
//!
//! Builds single-shot downloader and uploader handles over the node access
//! surface. Per-direction semaphores cap simultaneous transfers
//! process-wide, sized from the configuration's queue limits.

use crate::download::{DownloadShared, FileDownloader};
use crate::upload::{FileUploader, UploadMetadata, UploadTarget};
use drive_core::{AbortSignal, DriveError, ExtendedAttributes, NodeUid, RevisionUid};
use drive_crypto::{AccountProvider, ArmoredMessage};
use drive_nodes::{validate_node_name, NodeAccess};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// The transfer engine.
pub struct Transfers {
    access: NodeAccess,
    account: Arc<dyn AccountProvider>,
    client_uid: String,
    download_semaphore: Arc<Semaphore>,
    upload_semaphore: Arc<Semaphore>,
}

impl Transfers {
    /// Build the engine. Queue limits come from the client configuration.
    pub fn new(access: NodeAccess, account: Arc<dyn AccountProvider>, client_uid: String) -> Self {
        let config = access.api().config();
        let download_semaphore = Arc::new(Semaphore::new(config.download_queue_limit.max(1)));
        let upload_semaphore = Arc::new(Semaphore::new(config.upload_queue_limit.max(1)));
        Self {
            access,
            account,
            client_uid,
            download_semaphore,
            upload_semaphore,
        }
    }

    /// Downloader for a file's active revision.
    pub async fn get_file_downloader(
        &self,
        node_uid: &NodeUid,
        abort: &AbortSignal,
    ) -> Result<FileDownloader, DriveError> {
        let revision_uid = match self.access.get_node(node_uid, abort).await? {
            Ok(node) => node.active_revision().map(|revision| revision.uid.clone()),
            Err(drive_core::NodeMiss::Degraded(degraded)) => degraded
                .active_revision
                .as_ref()
                .map(|revision| revision.uid.clone()),
            Err(drive_core::NodeMiss::Missing { uid }) => {
                return Err(DriveError::not_found(format!("node {uid}")));
            }
        };
        let revision_uid = revision_uid
            .ok_or_else(|| DriveError::not_found(format!("{node_uid} has no active revision")))?;
        self.get_file_revision_downloader(&revision_uid, abort).await
    }

    /// Downloader for one specific revision.
    pub async fn get_file_revision_downloader(
        &self,
        revision_uid: &RevisionUid,
        abort: &AbortSignal,
    ) -> Result<FileDownloader, DriveError> {
        let node_uid = revision_uid.node_uid();
        let keys = self.access.node_keys(&node_uid, abort).await?;
        let content_key = keys.content_key.clone().ok_or_else(|| {
            DriveError::decryption(format!("content key of {node_uid} is unavailable"))
        })?;

        let dto = self.access.revision_with_blocks(revision_uid, abort).await?;
        let verification_keys = match &dto.signature_email {
            Some(email) => self
                .account
                .public_keys_for_email(email)
                .await
                .unwrap_or_default(),
            None => Vec::new(),
        };

        // The author's claims, straight from the revision's extended
        // attributes; verified only at end of stream.
        let mut claimed_sha1 = None;
        let mut claimed_size = None;
        let mut claimed_block_sizes = None;
        if let Some(xattr) = &dto.xattr {
            if let Ok((text, _)) = self
                .access
                .crypto()
                .decrypt_armored_text(
                    &ArmoredMessage(xattr.clone()),
                    std::slice::from_ref(&keys.key),
                    &verification_keys,
                )
                .await
            {
                if let Ok(attributes) = serde_json::from_str::<ExtendedAttributes>(&text) {
                    claimed_sha1 = attributes.claimed_digests().sha1;
                    claimed_size = attributes.claimed_size();
                    claimed_block_sizes = attributes
                        .common
                        .as_ref()
                        .and_then(|common| common.block_sizes.clone());
                }
            }
        }

        let context = self
            .access
            .shares()
            .volume_metric_context(&revision_uid.volume_id, abort)
            .await;

        Ok(FileDownloader {
            shared: Arc::new(DownloadShared {
                api: self.access.api().clone(),
                crypto: self.access.crypto().clone(),
                content_key,
                verification_keys,
            }),
            semaphore: Arc::clone(&self.download_semaphore),
            blocks: dto.blocks,
            claimed_sha1,
            claimed_size,
            claimed_block_sizes,
            context,
        })
    }

    /// Uploader creating a new file under `parent_uid`.
    pub async fn get_file_uploader(
        &self,
        parent_uid: &NodeUid,
        name: &str,
        metadata: UploadMetadata,
        abort: &AbortSignal,
    ) -> Result<FileUploader, DriveError> {
        validate_node_name(name)?;
        let context = self
            .access
            .shares()
            .volume_metric_context(&parent_uid.volume_id, abort)
            .await;
        Ok(FileUploader {
            access: self.access.clone(),
            semaphore: Arc::clone(&self.upload_semaphore),
            target: UploadTarget::NewFile {
                parent_uid: parent_uid.clone(),
                name: name.to_string(),
            },
            metadata,
            client_uid: self.client_uid.clone(),
            context,
        })
    }

    /// Uploader creating a new revision of an existing file.
    pub async fn get_file_revision_uploader(
        &self,
        node_uid: &NodeUid,
        metadata: UploadMetadata,
        abort: &AbortSignal,
    ) -> Result<FileUploader, DriveError> {
        let context = self
            .access
            .shares()
            .volume_metric_context(&node_uid.volume_id, abort)
            .await;
        Ok(FileUploader {
            access: self.access.clone(),
            semaphore: Arc::clone(&self.upload_semaphore),
            target: UploadTarget::NewRevision {
                node_uid: node_uid.clone(),
            },
            metadata,
            client_uid: self.client_uid.clone(),
            context,
        })
    }
}
