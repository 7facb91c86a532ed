//! Telemetry events and the host-supplied sink
//!
//! The SDK reports transfer outcomes, retry cross-overs, and per-field
//! crypto failures through a single sink capability. Recording is
//! fire-and-forget; a sink must never block.

use serde::{Deserialize, Serialize};

/// Closed error taxonomy used in transfer telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelemetryErrorKind {
    /// Rate limiting, including a tripped 429 breaker.
    RateLimited,
    /// OpenPGP decryption or signature failure.
    DecryptionError,
    /// Digest/size mismatch or verifier rejection.
    IntegrityError,
    /// Non-2xx response in the 4xx class.
    Http4xx,
    /// Non-2xx response in the 5xx class.
    Http5xx,
    /// Server-reported failure through the typed envelope.
    ServerError,
    /// Offline, timeout, or other transport fault.
    NetworkError,
    /// Anything else.
    Unknown,
}

impl TelemetryErrorKind {
    /// Wire label of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::DecryptionError => "decryption_error",
            Self::IntegrityError => "integrity_error",
            Self::Http4xx => "4xx",
            Self::Http5xx => "5xx",
            Self::ServerError => "server_error",
            Self::NetworkError => "network_error",
            Self::Unknown => "unknown",
        }
    }
}

/// Ownership class of a volume, used to tag transfer telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricContext {
    /// The user's own volume.
    OwnVolume,
    /// A volume shared with the user.
    Shared,
    /// A volume reached through a public link.
    SharedPublic,
}

impl MetricContext {
    /// Wire label of this context.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OwnVolume => "own_volume",
            Self::Shared => "shared",
            Self::SharedPublic => "shared_public",
        }
    }
}

/// Node field a crypto failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationField {
    /// The node's private key and passphrase.
    NodeKey,
    /// The encrypted node name.
    NodeName,
    /// A folder's hash key.
    NodeHashKey,
    /// Extended attributes of the node or its active revision.
    NodeExtendedAttributes,
    /// A file's content-key session key.
    NodeContentKey,
}

impl VerificationField {
    /// Wire label of this field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NodeKey => "nodeKey",
            Self::NodeName => "nodeName",
            Self::NodeHashKey => "nodeHashKey",
            Self::NodeExtendedAttributes => "nodeExtendedAttributes",
            Self::NodeContentKey => "nodeContentKey",
        }
    }
}

/// One telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    /// A download completed or failed.
    Download {
        /// Ownership class of the source volume.
        context: MetricContext,
        /// Bytes delivered to the sink.
        downloaded_size: u64,
        /// Claimed cleartext size, when the author recorded one.
        claimed_file_size: Option<u64>,
        /// Failure class; `None` for success. Aborts and validation
        /// failures are never reported.
        error: Option<TelemetryErrorKind>,
    },
    /// An upload completed or failed.
    Upload {
        /// Ownership class of the destination volume.
        context: MetricContext,
        /// Ciphertext bytes sent.
        uploaded_size: u64,
        /// Expected cleartext size, when known up front.
        expected_size: Option<u64>,
        /// Failure class; `None` for success.
        error: Option<TelemetryErrorKind>,
    },
    /// A request succeeded after one or more failed attempts.
    ApiRetrySucceeded {
        /// Request URL.
        url: String,
        /// Number of failed attempts before the success.
        failed_attempts: u32,
    },
    /// A signature was missing or invalid while decrypting a node field.
    VerificationError {
        /// The field concerned.
        field: VerificationField,
        /// Whether the record predates 2024 (legacy tolerance window).
        from_before_2024: bool,
        /// Whether the signing address matches the default share's creator.
        address_matching_default_share: bool,
    },
    /// An exception was raised while decrypting a node field.
    DecryptionError {
        /// The field concerned.
        field: VerificationField,
        /// Failure detail.
        error: String,
        /// Whether the record predates 2024.
        from_before_2024: bool,
    },
}

/// Host-supplied telemetry sink.
pub trait TelemetrySink: Send + Sync {
    /// Record one event. Must not block.
    fn record(&self, event: TelemetryEvent);
}

/// Sink that drops every event. Used when observability is disabled.
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record(&self, _event: TelemetryEvent) {}
}
