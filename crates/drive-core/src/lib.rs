//! Core types and capability traits for the Drive SDK
//!
//! This crate holds everything the rest of the SDK builds on: composite
//! identifiers, the node/revision entity model with its degraded-result
//! surface, the closed error taxonomy, abort tokens, the SDK events bus,
//! telemetry types, the host-supplied capability traits (HTTP fetcher and
//! entity caches), and the stream combinators used by the iteration and
//! diagnostic pipelines.

pub mod abort;
pub mod cache;
pub mod config;
pub mod entities;
pub mod error;
pub mod events_bus;
pub mod http;
pub mod identifiers;
pub mod stream;
pub mod telemetry;

pub use abort::{AbortController, AbortSignal};
pub use cache::{CacheError, EntityCache};
pub use config::DriveConfig;
pub use entities::{
    Author, AuthorError, ClaimedAuthor, ClaimedDigests, DegradedNode, ExtendedAttributes,
    FileInfo, FolderInfo, MaybeMissingNode, MaybeNode, MemberRole, Node, NodeInfo, NodeMiss,
    NodeResult, NodeType, Revision, RevisionState, VerificationStatus,
};
pub use error::{DriveError, Result};
pub use events_bus::{SdkEvent, SdkEventBus, SdkEventSubscription};
pub use http::{
    ByteStream, FetchError, HttpFetcher, HttpMethod, HttpRequest, HttpResponse, StreamingResponse,
};
pub use identifiers::{
    AddressId, NodeId, NodeUid, RevisionId, RevisionUid, ShareId, UidParseError, VolumeId,
};
pub use stream::{concurrent_map, zip_streams, ZipItem, ZipMode, ZipStreams};
pub use telemetry::{
    MetricContext, NoopTelemetry, TelemetryErrorKind, TelemetryEvent, TelemetrySink,
    VerificationField,
};

/// Platform tag reported in the `x-pm-drive-sdk-version` header.
pub const SDK_PLATFORM: &str = "rust";

/// SDK version reported in the `x-pm-drive-sdk-version` header.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
