//! Tree navigation
//!
//! Cache-first node reads, recursive key resolution (a node key decrypts
//! with its parent's key; roots decrypt with the share key), and the
//! streaming iterators. Decryption inside iterators is pipelined with a
//! bounded fan-out and yields in completion order; one bad record degrades
//! itself, never the iteration.

use crate::cache::{node_entity_key, node_keys_key, CachedNode, CachedNodeKeys};
use crate::crypto_service::NodeCryptoService;
use crate::dto::{
    FetchLinksRequest, LinkDto, LinksResponse, RevisionDto, RevisionResponse, RevisionsResponse,
    ThumbnailDto, ThumbnailsRequest, ThumbnailsResponse,
};
use crate::shares::SharesService;
use drive_api::ApiClient;
use drive_core::cache::{get_json, set_json};
use drive_core::{
    concurrent_map, AbortSignal, DriveError, EntityCache, MaybeMissingNode, MaybeNode, NodeId,
    NodeMiss, NodeUid, Revision, RevisionUid, VolumeId,
};
use drive_crypto::{DriveCrypto, PrivateKey};
use futures::future::BoxFuture;
use futures::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use tracing::debug;

/// Bounded fan-out applied to record decryption inside iterators.
pub const DECRYPT_CONCURRENCY: usize = 10;

/// Maximum node ids per fetch batch.
pub const FETCH_BATCH: usize = 50;

/// Page size requested from listing endpoints.
pub const PAGE_SIZE: usize = 150;

enum PageState {
    Start,
    Next(String),
    Done,
}

/// The tree access surface.
#[derive(Clone)]
pub struct NodeAccess {
    pub(crate) api: Arc<ApiClient>,
    pub(crate) crypto: DriveCrypto,
    pub(crate) crypto_service: Arc<NodeCryptoService>,
    pub(crate) shares: Arc<SharesService>,
    pub(crate) entity_cache: Arc<dyn EntityCache>,
    pub(crate) crypto_cache: Arc<dyn EntityCache>,
}

impl NodeAccess {
    /// Build the access surface.
    pub fn new(
        api: Arc<ApiClient>,
        crypto: DriveCrypto,
        crypto_service: Arc<NodeCryptoService>,
        shares: Arc<SharesService>,
        entity_cache: Arc<dyn EntityCache>,
        crypto_cache: Arc<dyn EntityCache>,
    ) -> Self {
        Self {
            api,
            crypto,
            crypto_service,
            shares,
            entity_cache,
            crypto_cache,
        }
    }

    /// The share and volume resolver backing this surface.
    pub fn shares(&self) -> &Arc<SharesService> {
        &self.shares
    }

    /// The API client backing this surface.
    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    /// The crypto façade backing this surface.
    pub fn crypto(&self) -> &DriveCrypto {
        &self.crypto
    }

    /// Root folder of the user's own tree.
    pub async fn get_my_files_root_folder(
        &self,
        abort: &AbortSignal,
    ) -> Result<MaybeNode, DriveError> {
        let ids = self.shares.get_my_files_ids(abort).await?;
        match self.get_node(&ids.root_uid(), abort).await? {
            Ok(node) => Ok(Ok(node)),
            Err(NodeMiss::Degraded(degraded)) => Ok(Err(degraded)),
            Err(NodeMiss::Missing { uid }) => {
                Err(DriveError::not_found(format!("root folder {uid}")))
            }
        }
    }

    /// Look one node up by UID. Reads the cache first; a miss or a stale
    /// entry triggers a re-fetch.
    pub async fn get_node(
        &self,
        uid: &NodeUid,
        abort: &AbortSignal,
    ) -> Result<MaybeMissingNode, DriveError> {
        if let Some(cached) =
            get_json::<CachedNode>(self.entity_cache.as_ref(), &node_entity_key(uid)).await
        {
            if !cached.stale {
                return Ok(cached.node.map_err(NodeMiss::Degraded));
            }
        }

        let links = self
            .fetch_links(&uid.volume_id, std::slice::from_ref(&uid.node_id), abort)
            .await?;
        match links.into_iter().next() {
            None => Ok(Err(NodeMiss::Missing { uid: uid.clone() })),
            Some(link) => {
                let node = self
                    .decrypt_and_cache(link, &uid.volume_id, abort)
                    .await?;
                Ok(node.map_err(NodeMiss::Degraded))
            }
        }
    }

    /// Iterate many nodes by UID. Fetches in batches and decrypts with a
    /// bounded fan-out; results arrive in completion order. UIDs the server
    /// does not know come back as `Missing`.
    pub fn iterate_nodes(
        &self,
        uids: Vec<NodeUid>,
        abort: &AbortSignal,
    ) -> impl Stream<Item = Result<MaybeMissingNode, DriveError>> + Send + 'static {
        enum PreItem {
            Link(VolumeId, Box<LinkDto>),
            Missing(NodeUid),
            Failed(DriveError),
        }

        // Consecutive same-volume runs become fetch batches.
        let mut batches: Vec<(VolumeId, Vec<NodeId>)> = Vec::new();
        for uid in uids {
            match batches.last_mut() {
                Some((volume, ids))
                    if *volume == uid.volume_id && ids.len() < FETCH_BATCH =>
                {
                    ids.push(uid.node_id);
                }
                _ => batches.push((uid.volume_id, vec![uid.node_id])),
            }
        }

        let this = self.clone();
        let abort_pages = abort.clone();
        let pages = stream::unfold(batches.into_iter(), move |mut batches| {
            let this = this.clone();
            let abort = abort_pages.clone();
            async move {
                let (volume_id, node_ids) = batches.next()?;
                let items = match this.fetch_links(&volume_id, &node_ids, &abort).await {
                    Ok(links) => {
                        let mut items: Vec<PreItem> = Vec::with_capacity(node_ids.len());
                        for node_id in &node_ids {
                            match links.iter().find(|link| link.link_id == node_id.as_str()) {
                                Some(link) => items.push(PreItem::Link(
                                    volume_id.clone(),
                                    Box::new(link.clone()),
                                )),
                                None => items.push(PreItem::Missing(NodeUid::new(
                                    volume_id.clone(),
                                    node_id.clone(),
                                ))),
                            }
                        }
                        items
                    }
                    Err(err) => vec![PreItem::Failed(err)],
                };
                Some((stream::iter(items), batches))
            }
        })
        .flatten();

        let this = self.clone();
        let abort = abort.clone();
        concurrent_map(pages, DECRYPT_CONCURRENCY, move |item| {
            let this = this.clone();
            let abort = abort.clone();
            async move {
                match item {
                    PreItem::Link(volume_id, link) => this
                        .decrypt_and_cache(*link, &volume_id, &abort)
                        .await
                        .map(|node| node.map_err(NodeMiss::Degraded)),
                    PreItem::Missing(uid) => Ok(Err(NodeMiss::Missing { uid })),
                    PreItem::Failed(err) => Err(err),
                }
            }
        })
    }

    /// Iterate the children of a folder.
    pub fn iterate_folder_children(
        &self,
        parent_uid: &NodeUid,
        abort: &AbortSignal,
    ) -> impl Stream<Item = Result<MaybeNode, DriveError>> + Send + 'static {
        let volume_id = parent_uid.volume_id.clone();
        let path = format!(
            "drive/v2/volumes/{}/folders/{}/children",
            parent_uid.volume_id, parent_uid.node_id
        );
        self.iterate_listing(path, volume_id, abort)
    }

    /// Iterate the trashed nodes of the user's own volume.
    pub fn iterate_trashed_nodes(
        &self,
        abort: &AbortSignal,
    ) -> impl Stream<Item = Result<MaybeNode, DriveError>> + Send + 'static {
        let this = self.clone();
        let abort = abort.clone();
        // The volume is only known once the root ids resolve, so the
        // listing is wrapped in a lazily flattened one-shot stream.
        stream::once(async move {
            match this.shares.get_my_files_ids(&abort).await {
                Ok(ids) => {
                    let path = format!("drive/v2/volumes/{}/trash", ids.volume_id);
                    this.iterate_listing(path, ids.volume_id, &abort).boxed()
                }
                Err(err) => stream::iter(vec![Err(err)]).boxed(),
            }
        })
        .flatten()
    }

    /// Paged listing endpoint → decrypted node stream.
    fn iterate_listing(
        &self,
        path: String,
        volume_id: VolumeId,
        abort: &AbortSignal,
    ) -> impl Stream<Item = Result<MaybeNode, DriveError>> + Send + 'static {
        let this = self.clone();
        let abort_pages = abort.clone();
        let pages = stream::unfold(PageState::Start, move |state| {
            let this = this.clone();
            let abort = abort_pages.clone();
            let path = path.clone();
            async move {
                let anchor = match state {
                    PageState::Start => None,
                    PageState::Next(anchor) => Some(anchor),
                    PageState::Done => return None,
                };
                let mut url = format!("{path}?PageSize={PAGE_SIZE}");
                if let Some(anchor) = &anchor {
                    url.push_str(&format!("&AnchorID={anchor}"));
                }
                match this.api.get_json::<LinksResponse>(&url, &abort).await {
                    Ok(response) => {
                        let next = match (response.more, response.anchor_id) {
                            (true, Some(anchor)) => PageState::Next(anchor),
                            _ => PageState::Done,
                        };
                        let items: Vec<Result<LinkDto, DriveError>> =
                            response.links.into_iter().map(Ok).collect();
                        Some((stream::iter(items), next))
                    }
                    Err(err) => Some((stream::iter(vec![Err(err)]), PageState::Done)),
                }
            }
        })
        .flatten();

        let this = self.clone();
        let abort = abort.clone();
        concurrent_map(pages, DECRYPT_CONCURRENCY, move |item| {
            let this = this.clone();
            let abort = abort.clone();
            let volume_id = volume_id.clone();
            async move {
                match item {
                    Ok(link) => this.decrypt_and_cache(link, &volume_id, &abort).await,
                    Err(err) => Err(err),
                }
            }
        })
    }

    /// Key material of a node, decrypting (and caching) on demand.
    pub fn node_keys<'a>(
        &'a self,
        uid: &'a NodeUid,
        abort: &'a AbortSignal,
    ) -> BoxFuture<'a, Result<CachedNodeKeys, DriveError>> {
        Box::pin(async move {
            if let Some(cached) =
                get_json::<CachedNodeKeys>(self.crypto_cache.as_ref(), &node_keys_key(uid)).await
            {
                return Ok(cached);
            }

            let links = self
                .fetch_links(&uid.volume_id, std::slice::from_ref(&uid.node_id), abort)
                .await?;
            let link = links
                .into_iter()
                .next()
                .ok_or_else(|| DriveError::not_found(format!("node {uid}")))?;
            self.decrypt_and_cache(link, &uid.volume_id, abort).await?;

            get_json::<CachedNodeKeys>(self.crypto_cache.as_ref(), &node_keys_key(uid))
                .await
                .ok_or_else(|| {
                    DriveError::decryption(format!("key material of {uid} is unavailable"))
                })
        })
    }

    /// The unlocked private key of a node.
    pub async fn node_private_key(
        &self,
        uid: &NodeUid,
        abort: &AbortSignal,
    ) -> Result<PrivateKey, DriveError> {
        Ok(self.node_keys(uid, abort).await?.key)
    }

    /// Decrypt one fetched record, updating both caches.
    pub(crate) async fn decrypt_and_cache(
        &self,
        link: LinkDto,
        volume_id: &VolumeId,
        abort: &AbortSignal,
    ) -> Result<MaybeNode, DriveError> {
        let parent_key = self.parent_key_for_link(&link, volume_id, abort).await?;
        let default_share_email = self
            .shares
            .volume_record(volume_id, abort)
            .await
            .ok()
            .map(|record| record.creator_email);

        let record = self
            .crypto_service
            .decrypt_node(&link, volume_id, &parent_key, default_share_email.as_deref())
            .await;

        let uid = NodeUid::new(volume_id.clone(), link.link_id.clone());
        if let Some(keys) = &record.keys {
            set_json(self.crypto_cache.as_ref(), &node_keys_key(&uid), keys)
                .await
                .ok();
        }
        set_json(
            self.entity_cache.as_ref(),
            &node_entity_key(&uid),
            &CachedNode {
                node: record.node.clone(),
                stale: false,
            },
        )
        .await
        .ok();

        Ok(record.node)
    }

    /// The parent decryption key of a record: the parent node's key, or the
    /// share key for roots.
    async fn parent_key_for_link(
        &self,
        link: &LinkDto,
        volume_id: &VolumeId,
        abort: &AbortSignal,
    ) -> Result<PrivateKey, DriveError> {
        match &link.parent_link_id {
            Some(parent) => {
                let parent_uid = NodeUid::new(volume_id.clone(), parent.clone());
                self.node_private_key(&parent_uid, abort).await
            }
            None => {
                let record = self.shares.volume_record(volume_id, abort).await?;
                let share_key = self
                    .shares
                    .share_key(&drive_core::ShareId::new(record.share_id), abort)
                    .await?;
                Ok(share_key.key)
            }
        }
    }

    /// Fetch encrypted records by id. Unknown ids are simply absent from
    /// the result.
    pub(crate) async fn fetch_links(
        &self,
        volume_id: &VolumeId,
        node_ids: &[NodeId],
        abort: &AbortSignal,
    ) -> Result<Vec<LinkDto>, DriveError> {
        let request = FetchLinksRequest {
            link_ids: node_ids.iter().map(|id| id.to_string()).collect(),
        };
        let response: LinksResponse = self
            .api
            .post_json(
                &format!("drive/v2/volumes/{volume_id}/links/fetch"),
                &request,
                abort,
            )
            .await?;
        Ok(response.links)
    }

    /// All revisions of a file, newest first as the server returns them.
    pub async fn list_revisions(
        &self,
        node_uid: &NodeUid,
        abort: &AbortSignal,
    ) -> Result<Vec<Revision>, DriveError> {
        let keys = self.node_keys(node_uid, abort).await?;
        let response: RevisionsResponse = self
            .api
            .get_json(
                &format!(
                    "drive/v2/volumes/{}/files/{}/revisions",
                    node_uid.volume_id, node_uid.node_id
                ),
                abort,
            )
            .await?;

        let mut revisions = Vec::with_capacity(response.revisions.len());
        for dto in &response.revisions {
            let mut errors = Vec::new();
            revisions.push(
                self.crypto_service
                    .decrypt_revision(dto, node_uid, &keys.key, false, &mut errors)
                    .await,
            );
        }
        Ok(revisions)
    }

    /// Restore a superseded revision as the active one.
    pub async fn restore_revision(
        &self,
        revision_uid: &RevisionUid,
        abort: &AbortSignal,
    ) -> Result<(), DriveError> {
        let _: serde_json::Value = self
            .api
            .post_json(
                &format!(
                    "drive/v2/volumes/{}/files/{}/revisions/{}/restore",
                    revision_uid.volume_id, revision_uid.node_id, revision_uid.revision_id
                ),
                &serde_json::json!({}),
                abort,
            )
            .await?;
        self.mark_stale(&revision_uid.node_uid()).await;
        Ok(())
    }

    /// Fetch one revision with its block list.
    pub async fn revision_with_blocks(
        &self,
        revision_uid: &RevisionUid,
        abort: &AbortSignal,
    ) -> Result<RevisionDto, DriveError> {
        let response: RevisionResponse = self
            .api
            .get_json(
                &format!(
                    "drive/v2/volumes/{}/files/{}/revisions/{}",
                    revision_uid.volume_id, revision_uid.node_id, revision_uid.revision_id
                ),
                abort,
            )
            .await?;
        Ok(response.revision)
    }

    /// Look up thumbnails of the given type for a set of nodes.
    pub async fn get_thumbnails(
        &self,
        volume_id: &VolumeId,
        node_ids: Vec<NodeId>,
        thumbnail_type: u8,
        abort: &AbortSignal,
    ) -> Result<Vec<ThumbnailDto>, DriveError> {
        let request = ThumbnailsRequest {
            link_ids: node_ids.into_iter().map(|id| id.0).collect(),
            thumbnail_type,
        };
        let response: ThumbnailsResponse = self
            .api
            .post_json(
                &format!("drive/v2/volumes/{volume_id}/thumbnails"),
                &request,
                abort,
            )
            .await?;
        Ok(response.thumbnails)
    }

    /// Flag a cached entity stale so the next read re-fetches.
    pub async fn mark_stale(&self, uid: &NodeUid) {
        let key = node_entity_key(uid);
        if let Some(mut cached) = get_json::<CachedNode>(self.entity_cache.as_ref(), &key).await {
            cached.stale = true;
            set_json(self.entity_cache.as_ref(), &key, &cached).await.ok();
        }
    }

    /// Evict a node from both caches.
    pub async fn evict(&self, uid: &NodeUid) {
        debug!(uid = %uid, "evicting node");
        let _ = self
            .entity_cache
            .remove_entities(&[node_entity_key(uid)])
            .await;
        let _ = self
            .crypto_cache
            .remove_entities(&[node_keys_key(uid)])
            .await;
    }
}
