//! The Drive client façade
//!
//! Wires the subsystems together from a configuration and the host-supplied
//! capabilities (HTTP fetcher, OpenPGP provider, account lookup, caches,
//! telemetry) and exposes the public SDK surface: the node tree, sharing
//! primitives, block transfers, tree events, and diagnostics.

use drive_api::ApiClient;
use drive_core::{
    AbortSignal, DriveConfig, DriveError, EntityCache, HttpFetcher, MaybeMissingNode, MaybeNode,
    NodeResult, NodeUid, Revision, RevisionUid, SdkEvent, SdkEventBus, SdkEventSubscription,
    TelemetrySink,
};
use drive_crypto::{AccountProvider, DriveCrypto, OpenPgpProvider};
use drive_diagnostics::{DiagnosticEvent, DiagnosticWalker, DiagnosticsOptions};
use drive_events::{
    EventEngine, EventEngineConfig, InMemoryEventIdProvider, LatestEventIdProvider, ScopeId,
    TreeEventListener, TreeEventSubscription,
};
use drive_nodes::{MyFilesIds, NodeAccess, NodeCryptoService, SharesService};
use drive_transfers::{
    FileDownloader, FileUploader, Transfers, UploadMetadata,
};
use futures::stream::Stream;
use std::sync::Arc;

pub use drive_core::telemetry::NoopTelemetry;

/// Builder collecting the host-supplied capabilities.
pub struct DriveClientBuilder {
    config: DriveConfig,
    fetcher: Arc<dyn HttpFetcher>,
    pgp: Arc<dyn OpenPgpProvider>,
    account: Arc<dyn AccountProvider>,
    entity_cache: Arc<dyn EntityCache>,
    crypto_cache: Arc<dyn EntityCache>,
    telemetry: Arc<dyn TelemetrySink>,
    event_ids: Arc<dyn LatestEventIdProvider>,
    event_config: EventEngineConfig,
}

impl DriveClientBuilder {
    /// Start a builder from the mandatory capabilities.
    pub fn new(
        config: DriveConfig,
        fetcher: Arc<dyn HttpFetcher>,
        pgp: Arc<dyn OpenPgpProvider>,
        account: Arc<dyn AccountProvider>,
        entity_cache: Arc<dyn EntityCache>,
        crypto_cache: Arc<dyn EntityCache>,
    ) -> Self {
        Self {
            config,
            fetcher,
            pgp,
            account,
            entity_cache,
            crypto_cache,
            telemetry: Arc::new(NoopTelemetry),
            event_ids: Arc::new(InMemoryEventIdProvider::new()),
            event_config: EventEngineConfig::default(),
        }
    }

    /// Install a telemetry sink.
    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Install a persistent event cursor store.
    pub fn event_id_provider(mut self, provider: Arc<dyn LatestEventIdProvider>) -> Self {
        self.event_ids = provider;
        self
    }

    /// Override the event polling cadence.
    pub fn event_config(mut self, config: EventEngineConfig) -> Self {
        self.event_config = config;
        self
    }

    /// Build the client.
    pub async fn build(self) -> Result<DriveClient, DriveError> {
        let mut config = self.config;
        // The client uid distinguishes this installation for draft reclaim.
        let client_uid = match &config.client_uid {
            Some(client_uid) => client_uid.clone(),
            None => {
                let generated = hex::encode(self.pgp.random_bytes(8).await?);
                config.client_uid = Some(generated.clone());
                generated
            }
        };

        let events_bus = Arc::new(SdkEventBus::new());
        let api = Arc::new(ApiClient::new(
            self.fetcher,
            config.clone(),
            events_bus.clone(),
            self.telemetry,
        ));
        let crypto = DriveCrypto::new(self.pgp);
        let shares = Arc::new(SharesService::new(
            api.clone(),
            crypto.clone(),
            self.account.clone(),
            self.entity_cache.clone(),
            self.crypto_cache.clone(),
        ));
        let crypto_service = Arc::new(NodeCryptoService::new(
            crypto.clone(),
            self.account.clone(),
            api.clone(),
        ));
        let access = NodeAccess::new(
            api.clone(),
            crypto.clone(),
            crypto_service,
            shares,
            self.entity_cache,
            self.crypto_cache,
        );
        let transfers = Arc::new(Transfers::new(
            access.clone(),
            self.account.clone(),
            client_uid,
        ));
        let event_engine = EventEngine::new(access.clone(), self.event_ids, self.event_config);
        let walker = DiagnosticWalker::new(access.clone(), transfers.clone());

        Ok(DriveClient {
            config,
            events_bus,
            api,
            crypto,
            access,
            transfers,
            event_engine,
            walker,
        })
    }
}

/// The Drive SDK client.
pub struct DriveClient {
    config: DriveConfig,
    events_bus: Arc<SdkEventBus>,
    api: Arc<ApiClient>,
    crypto: DriveCrypto,
    access: NodeAccess,
    transfers: Arc<Transfers>,
    event_engine: EventEngine,
    walker: DiagnosticWalker,
}

impl DriveClient {
    /// The active configuration.
    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// The crypto façade, for hosts composing their own flows.
    pub fn crypto(&self) -> &DriveCrypto {
        &self.crypto
    }

    /// The underlying API client.
    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    /// The tree access surface.
    pub fn access(&self) -> &NodeAccess {
        &self.access
    }

    /// The transfer engine.
    pub fn transfers(&self) -> &Arc<Transfers> {
        &self.transfers
    }

    /// Listen for SDK lifecycle events.
    pub fn subscribe_sdk_events(
        &self,
        listener: impl Fn(SdkEvent) + Send + Sync + 'static,
    ) -> SdkEventSubscription {
        self.events_bus.subscribe(listener)
    }

    // Tree surface.

    /// Root volume and share identifiers of the authenticated user.
    pub async fn get_my_files_ids(&self, abort: &AbortSignal) -> Result<MyFilesIds, DriveError> {
        self.access.shares().get_my_files_ids(abort).await
    }

    /// Root folder of the user's own tree.
    pub async fn get_my_files_root_folder(
        &self,
        abort: &AbortSignal,
    ) -> Result<MaybeNode, DriveError> {
        self.access.get_my_files_root_folder(abort).await
    }

    /// Look one node up by UID.
    pub async fn get_node(
        &self,
        uid: &NodeUid,
        abort: &AbortSignal,
    ) -> Result<MaybeMissingNode, DriveError> {
        self.access.get_node(uid, abort).await
    }

    /// Iterate many nodes by UID.
    pub fn iterate_nodes(
        &self,
        uids: Vec<NodeUid>,
        abort: &AbortSignal,
    ) -> impl Stream<Item = Result<MaybeMissingNode, DriveError>> + Send + 'static {
        self.access.iterate_nodes(uids, abort)
    }

    /// Iterate the children of a folder.
    pub fn iterate_folder_children(
        &self,
        parent_uid: &NodeUid,
        abort: &AbortSignal,
    ) -> impl Stream<Item = Result<MaybeNode, DriveError>> + Send + 'static {
        self.access.iterate_folder_children(parent_uid, abort)
    }

    /// Iterate the trashed nodes of the user's own volume.
    pub fn iterate_trashed_nodes(
        &self,
        abort: &AbortSignal,
    ) -> impl Stream<Item = Result<MaybeNode, DriveError>> + Send + 'static {
        self.access.iterate_trashed_nodes(abort)
    }

    /// Rename a node in place.
    pub async fn rename_node(
        &self,
        uid: &NodeUid,
        new_name: &str,
        abort: &AbortSignal,
    ) -> Result<(), DriveError> {
        self.access.rename_node(uid, new_name, abort).await
    }

    /// Move nodes under a new parent.
    pub fn move_nodes(
        &self,
        uids: Vec<NodeUid>,
        new_parent_uid: &NodeUid,
        abort: &AbortSignal,
    ) -> impl Stream<Item = NodeResult> + Send + 'static {
        self.access.move_nodes(uids, new_parent_uid, abort)
    }

    /// Move nodes to the trash.
    pub fn trash_nodes(
        &self,
        uids: Vec<NodeUid>,
        abort: &AbortSignal,
    ) -> impl Stream<Item = NodeResult> + Send + 'static {
        self.access.trash_nodes(uids, abort)
    }

    /// Restore trashed nodes.
    pub fn restore_nodes(
        &self,
        uids: Vec<NodeUid>,
        abort: &AbortSignal,
    ) -> impl Stream<Item = NodeResult> + Send + 'static {
        self.access.restore_nodes(uids, abort)
    }

    /// Permanently delete nodes. Irreversible.
    pub fn delete_nodes(
        &self,
        uids: Vec<NodeUid>,
        abort: &AbortSignal,
    ) -> impl Stream<Item = NodeResult> + Send + 'static {
        self.access.delete_nodes(uids, abort)
    }

    /// Create a folder under a parent.
    pub async fn create_folder(
        &self,
        parent_uid: &NodeUid,
        name: &str,
        abort: &AbortSignal,
    ) -> Result<NodeUid, DriveError> {
        self.access.create_folder(parent_uid, name, abort).await
    }

    /// All revisions of a file.
    pub async fn list_revisions(
        &self,
        node_uid: &NodeUid,
        abort: &AbortSignal,
    ) -> Result<Vec<Revision>, DriveError> {
        self.access.list_revisions(node_uid, abort).await
    }

    /// Restore a superseded revision as the active one.
    pub async fn restore_revision(
        &self,
        revision_uid: &RevisionUid,
        abort: &AbortSignal,
    ) -> Result<(), DriveError> {
        self.access.restore_revision(revision_uid, abort).await
    }

    // Transfers.

    /// Downloader for a file's active revision.
    pub async fn get_file_downloader(
        &self,
        node_uid: &NodeUid,
        abort: &AbortSignal,
    ) -> Result<FileDownloader, DriveError> {
        self.transfers.get_file_downloader(node_uid, abort).await
    }

    /// Downloader for one specific revision.
    pub async fn get_file_revision_downloader(
        &self,
        revision_uid: &RevisionUid,
        abort: &AbortSignal,
    ) -> Result<FileDownloader, DriveError> {
        self.transfers
            .get_file_revision_downloader(revision_uid, abort)
            .await
    }

    /// Uploader creating a new file.
    pub async fn get_file_uploader(
        &self,
        parent_uid: &NodeUid,
        name: &str,
        metadata: UploadMetadata,
        abort: &AbortSignal,
    ) -> Result<FileUploader, DriveError> {
        self.transfers
            .get_file_uploader(parent_uid, name, metadata, abort)
            .await
    }

    /// Uploader creating a new revision of an existing file.
    pub async fn get_file_revision_uploader(
        &self,
        node_uid: &NodeUid,
        metadata: UploadMetadata,
        abort: &AbortSignal,
    ) -> Result<FileUploader, DriveError> {
        self.transfers
            .get_file_revision_uploader(node_uid, metadata, abort)
            .await
    }

    // Events.

    /// Subscribe to one scope's tree events.
    pub fn subscribe_to_tree_events(
        &self,
        scope: ScopeId,
        listener: Arc<dyn TreeEventListener>,
    ) -> TreeEventSubscription {
        self.event_engine.subscribe_to_tree_events(scope, listener)
    }

    /// Subscribe to the account-wide core scope.
    pub fn subscribe_to_drive_events(
        &self,
        listener: Arc<dyn TreeEventListener>,
    ) -> TreeEventSubscription {
        self.event_engine.subscribe_to_drive_events(listener)
    }

    // Diagnostics.

    /// Walk the user's own tree, emitting findings.
    pub async fn verify_my_files(
        &self,
        options: DiagnosticsOptions,
        abort: &AbortSignal,
    ) -> Result<impl Stream<Item = DiagnosticEvent> + Send + 'static, DriveError> {
        self.walker.verify_my_files(options, abort).await
    }

    /// Walk a specific folder tree, emitting findings.
    pub fn verify_node_tree(
        &self,
        root_uid: &NodeUid,
        options: DiagnosticsOptions,
        abort: &AbortSignal,
    ) -> impl Stream<Item = DiagnosticEvent> + Send + 'static {
        self.walker.verify_node_tree(root_uid, options, abort)
    }
}
