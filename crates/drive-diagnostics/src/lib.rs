//! Tree-walking integrity verification
//!
//! Walks a folder tree depth-first through the public iteration surface and
//! emits a typed stream of findings: degraded nodes, unverifiable authors,
//! malformed or missing claimed digests, and (optionally) full content and
//! thumbnail verification. The full walker multiplexes the diagnostic
//! stream with live signal streams, ending the combined stream when the
//! traversal finishes.

use drive_core::{
    zip_streams, AbortSignal, Author, DriveError, MaybeNode, NodeType, NodeUid, SdkEvent,
    TelemetryEvent, ZipItem, ZipMode,
};
use drive_nodes::NodeAccess;
use drive_transfers::{is_well_formed_sha1, Transfers};
use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tracing::debug;

/// Thumbnail type requested during thumbnail verification.
const THUMBNAIL_TYPE_PREVIEW: u8 = 1;

/// Server message for a file that simply has no thumbnail; not a failure.
const NO_THUMBNAIL_MESSAGE: &str = "Node has no thumbnail";

/// What the walker verifies beyond metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticsOptions {
    /// Download and digest-check every file's content.
    pub verify_content: bool,
    /// Probe preview thumbnails.
    pub verify_thumbnails: bool,
}

/// Which author field a finding refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorField {
    /// The node-key author.
    Key,
    /// The name author.
    Name,
    /// The content (or content-key) author.
    Content,
}

/// One finding of the walker.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    /// The node failed decryption and is served degraded.
    DegradedNode {
        /// The node concerned.
        uid: NodeUid,
        /// Its per-node errors.
        errors: Vec<DriveError>,
    },
    /// An author could not be confirmed.
    UnverifiedAuthor {
        /// The node concerned.
        uid: NodeUid,
        /// Which author field.
        field: AuthorField,
        /// The claimed email, when recorded.
        claimed_author: Option<String>,
        /// What failed.
        error: String,
    },
    /// The claimed SHA-1 is not 40 hex digits.
    ExtendedAttributesError {
        /// The node concerned.
        uid: NodeUid,
        /// The malformed claim.
        detail: String,
    },
    /// A file's extended attributes lack a claimed digest.
    ExtendedAttributesMissingField {
        /// The node concerned.
        uid: NodeUid,
        /// The absent field.
        missing_field: String,
    },
    /// Computed content digest or size differs from the claim.
    ContentIntegrityError {
        /// The node concerned.
        uid: NodeUid,
        /// Mismatch detail.
        detail: String,
    },
    /// Content verification could not run to completion.
    ContentDownloadError {
        /// The node concerned.
        uid: NodeUid,
        /// The failure.
        error: DriveError,
    },
    /// A file has no active revision to verify.
    ContentFileMissingRevision {
        /// The node concerned.
        uid: NodeUid,
    },
    /// The thumbnail lookup reported a failure.
    ThumbnailsError {
        /// The node concerned.
        uid: NodeUid,
        /// The reported failure.
        error: String,
    },
    /// The traversal itself failed under a folder; the walk continues with
    /// the remaining tree.
    TraversalError {
        /// The failure.
        error: DriveError,
    },
}

/// A live signal interleaved with the diagnostic stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WalkerSignal {
    /// A telemetry record observed during the walk.
    Telemetry(TelemetryEvent),
    /// An SDK event observed during the walk.
    Sdk(SdkEvent),
}

/// Item of the combined walker stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WalkerItem {
    /// A finding of the traversal.
    Diagnostic(DiagnosticEvent),
    /// A live signal.
    Signal(WalkerSignal),
}

/// Sink that discards bytes; the downloader's integrity gate does the work.
struct NullSink;

impl AsyncWrite for NullSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// The tree-walking verifier.
#[derive(Clone)]
pub struct DiagnosticWalker {
    access: NodeAccess,
    transfers: Arc<Transfers>,
}

impl DiagnosticWalker {
    /// Build a walker over the public access and transfer surfaces.
    pub fn new(access: NodeAccess, transfers: Arc<Transfers>) -> Self {
        Self { access, transfers }
    }

    /// Walk the user's own tree from its root.
    pub async fn verify_my_files(
        &self,
        options: DiagnosticsOptions,
        abort: &AbortSignal,
    ) -> Result<impl Stream<Item = DiagnosticEvent> + Send + 'static, DriveError> {
        let ids = self.access.shares().get_my_files_ids(abort).await?;
        Ok(self.verify_node_tree(&ids.root_uid(), options, abort))
    }

    /// Walk a folder tree depth-first, emitting findings per node.
    pub fn verify_node_tree(
        &self,
        root_uid: &NodeUid,
        options: DiagnosticsOptions,
        abort: &AbortSignal,
    ) -> impl Stream<Item = DiagnosticEvent> + Send + 'static {
        let walker = self.clone();
        let abort = abort.clone();
        let stack = vec![root_uid.clone()];

        stream::unfold(stack, move |mut stack| {
            let walker = walker.clone();
            let abort = abort.clone();
            async move {
                let folder = stack.pop()?;
                debug!(folder = %folder, "walking folder");
                let mut events: Vec<DiagnosticEvent> = Vec::new();

                let children: Vec<Result<MaybeNode, DriveError>> = walker
                    .access
                    .iterate_folder_children(&folder, &abort)
                    .collect()
                    .await;
                for child in children {
                    match child {
                        Ok(maybe) => {
                            if let Some(child_folder) = folder_uid(&maybe) {
                                stack.push(child_folder);
                            }
                            walker
                                .check_node(&maybe, options, &abort, &mut events)
                                .await;
                        }
                        Err(error) => events.push(DiagnosticEvent::TraversalError { error }),
                    }
                }
                Some((stream::iter(events), stack))
            }
        })
        .flatten()
    }

    /// The full walker: the traversal multiplexed with live telemetry and
    /// SDK-event streams. The combined stream ends when the traversal does;
    /// until then, whichever side has an item ready is yielded.
    pub fn verify_node_tree_with_signals<T, E>(
        &self,
        root_uid: &NodeUid,
        options: DiagnosticsOptions,
        telemetry: T,
        sdk_events: E,
        abort: &AbortSignal,
    ) -> impl Stream<Item = WalkerItem> + Send + 'static
    where
        T: Stream<Item = TelemetryEvent> + Send + Unpin + 'static,
        E: Stream<Item = SdkEvent> + Send + Unpin + 'static,
    {
        let diagnostics = self.verify_node_tree(root_uid, options, abort).boxed();
        // Both side streams drain into one signal stream; the primary
        // traversal ends the combined stream.
        let signals = zip_streams(telemetry, sdk_events, ZipMode::DrainBoth)
            .map(|item| match item {
                ZipItem::Left(event) => WalkerSignal::Telemetry(event),
                ZipItem::Right(event) => WalkerSignal::Sdk(event),
            })
            .boxed();
        zip_streams(diagnostics, signals, ZipMode::StopOnFirstDone).map(|item| match item {
            ZipItem::Left(event) => WalkerItem::Diagnostic(event),
            ZipItem::Right(signal) => WalkerItem::Signal(signal),
        })
    }

    async fn check_node(
        &self,
        maybe: &MaybeNode,
        options: DiagnosticsOptions,
        abort: &AbortSignal,
        events: &mut Vec<DiagnosticEvent>,
    ) {
        match maybe {
            Err(degraded) => {
                events.push(DiagnosticEvent::DegradedNode {
                    uid: degraded.uid.clone(),
                    errors: degraded.errors.clone(),
                });
                push_author(events, &degraded.uid, AuthorField::Key, &degraded.key_author);
                push_author(events, &degraded.uid, AuthorField::Name, &degraded.name_author);
            }
            Ok(node) => {
                push_author(events, &node.uid, AuthorField::Key, &node.key_author);
                push_author(events, &node.uid, AuthorField::Name, &node.name_author);

                let Some(file) = node.file() else {
                    return;
                };
                push_author(events, &node.uid, AuthorField::Content, &file.content_key_author);

                match &file.active_revision {
                    Some(revision) => {
                        push_author(
                            events,
                            &node.uid,
                            AuthorField::Content,
                            &revision.content_author,
                        );
                        match &revision.claimed_digests.sha1 {
                            Some(claimed) if !is_well_formed_sha1(claimed) => {
                                events.push(DiagnosticEvent::ExtendedAttributesError {
                                    uid: node.uid.clone(),
                                    detail: format!("claimed sha1 {claimed:?} is malformed"),
                                });
                            }
                            Some(_) => {}
                            None => {
                                events.push(DiagnosticEvent::ExtendedAttributesMissingField {
                                    uid: node.uid.clone(),
                                    missing_field: "sha1".to_string(),
                                });
                            }
                        }

                        if options.verify_content {
                            self.verify_content(&node.uid, &revision.uid, abort, events)
                                .await;
                        }
                    }
                    None => {
                        if options.verify_content {
                            events.push(DiagnosticEvent::ContentFileMissingRevision {
                                uid: node.uid.clone(),
                            });
                        }
                    }
                }

                if options.verify_thumbnails {
                    self.verify_thumbnails(&node.uid, abort, events).await;
                }
            }
        }
    }

    async fn verify_content(
        &self,
        uid: &NodeUid,
        revision_uid: &drive_core::RevisionUid,
        abort: &AbortSignal,
        events: &mut Vec<DiagnosticEvent>,
    ) {
        let downloader = match self
            .transfers
            .get_file_revision_downloader(revision_uid, abort)
            .await
        {
            Ok(downloader) => downloader,
            Err(error) => {
                events.push(DiagnosticEvent::ContentDownloadError {
                    uid: uid.clone(),
                    error,
                });
                return;
            }
        };

        let controller = downloader.write_to_stream(NullSink, None, abort);
        match controller.completion().await {
            Ok(_) => {}
            Err(DriveError::Integrity { message }) => {
                events.push(DiagnosticEvent::ContentIntegrityError {
                    uid: uid.clone(),
                    detail: message,
                });
            }
            Err(error) => {
                events.push(DiagnosticEvent::ContentDownloadError {
                    uid: uid.clone(),
                    error,
                });
            }
        }
    }

    async fn verify_thumbnails(
        &self,
        uid: &NodeUid,
        abort: &AbortSignal,
        events: &mut Vec<DiagnosticEvent>,
    ) {
        let result = self
            .access
            .get_thumbnails(
                &uid.volume_id,
                vec![uid.node_id.clone()],
                THUMBNAIL_TYPE_PREVIEW,
                abort,
            )
            .await;
        match result {
            Ok(thumbnails) => {
                for thumbnail in thumbnails {
                    if let Some(error) = thumbnail.error {
                        if error != NO_THUMBNAIL_MESSAGE {
                            events.push(DiagnosticEvent::ThumbnailsError {
                                uid: uid.clone(),
                                error,
                            });
                        }
                    }
                }
            }
            Err(error) => {
                events.push(DiagnosticEvent::ThumbnailsError {
                    uid: uid.clone(),
                    error: error.to_string(),
                });
            }
        }
    }
}

fn folder_uid(maybe: &MaybeNode) -> Option<NodeUid> {
    match maybe {
        Ok(node) if node.node_type == NodeType::Folder => Some(node.uid.clone()),
        Err(degraded) if degraded.node_type == Some(NodeType::Folder) => {
            Some(degraded.uid.clone())
        }
        _ => None,
    }
}

fn push_author(
    events: &mut Vec<DiagnosticEvent>,
    uid: &NodeUid,
    field: AuthorField,
    author: &Author,
) {
    if let Err(error) = author {
        events.push(DiagnosticEvent::UnverifiedAuthor {
            uid: uid.clone(),
            field,
            claimed_author: error.claimed_author.clone(),
            error: error.error.clone(),
        });
    }
}
