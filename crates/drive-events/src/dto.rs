//! Event scopes, public event values, and the wire shapes behind them

use drive_core::{NodeUid, VolumeId};
use serde::Deserialize;
use std::fmt;

/// An event cursor domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeId {
    /// Account-wide scope: invitation and shared-with-me updates.
    Core,
    /// One volume's tree.
    Volume(VolumeId),
}

impl ScopeId {
    /// Poll path of this scope, relative to the API base.
    pub(crate) fn events_path(&self, cursor: &str) -> String {
        match self {
            Self::Core => format!("drive/v2/events/{cursor}"),
            Self::Volume(volume_id) => {
                format!("drive/v2/volumes/{volume_id}/events/{cursor}")
            }
        }
    }

    /// Path returning the current head cursor of this scope.
    pub(crate) fn latest_path(&self) -> String {
        match self {
            Self::Core => "drive/v2/events/latest".to_string(),
            Self::Volume(volume_id) => {
                format!("drive/v2/volumes/{volume_id}/events/latest")
            }
        }
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core => write!(f, "core"),
            Self::Volume(volume_id) => write!(f, "volume-{volume_id}"),
        }
    }
}

/// A server-authored tree event, as delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum DriveEvent {
    /// A node appeared in the scope.
    NodeCreated {
        /// The created node.
        uid: NodeUid,
        /// Its parent, when the server included it.
        parent_uid: Option<NodeUid>,
        /// Whether the node is trashed.
        is_trashed: bool,
        /// Whether the node is shared.
        is_shared: bool,
    },
    /// A node changed.
    NodeUpdated {
        /// The updated node.
        uid: NodeUid,
        /// Its parent, when the server included it.
        parent_uid: Option<NodeUid>,
        /// Whether the node is trashed.
        is_trashed: bool,
        /// Whether the node is shared.
        is_shared: bool,
    },
    /// A node was removed.
    NodeDeleted {
        /// The deleted node.
        uid: NodeUid,
        /// Its parent, when the server included it.
        parent_uid: Option<NodeUid>,
    },
    /// Cached state for the scope is stale; consumers must re-list.
    TreeRefresh {
        /// The scope concerned.
        scope: ScopeId,
    },
    /// The scope itself is gone; the subscription ends.
    TreeRemove {
        /// The scope concerned.
        scope: ScopeId,
    },
    /// The cursor advanced without per-node updates.
    FastForward {
        /// The scope concerned.
        scope: ScopeId,
    },
    /// The shared-with-me view changed. Core scope only.
    SharedWithMeUpdated,
}

/// Wire event type: node created.
pub(crate) const EVENT_TYPE_CREATE: u8 = 1;
/// Wire event type: node updated.
pub(crate) const EVENT_TYPE_UPDATE: u8 = 2;
/// Wire event type: node deleted.
pub(crate) const EVENT_TYPE_DELETE: u8 = 3;
/// Wire event type: shared-with-me changed (core scope only).
pub(crate) const EVENT_TYPE_SHARED_WITH_ME: u8 = 4;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EventLinkDto {
    #[serde(rename = "LinkID")]
    pub link_id: String,
    #[serde(rename = "ParentLinkID", default)]
    pub parent_link_id: Option<String>,
    #[serde(rename = "IsTrashed", default)]
    pub is_trashed: bool,
    #[serde(rename = "IsShared", default)]
    pub is_shared: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EventDto {
    #[serde(rename = "EventType")]
    pub event_type: u8,
    #[serde(rename = "Link", default)]
    pub link: Option<EventLinkDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EventsResponse {
    #[serde(rename = "EventID")]
    pub event_id: String,
    #[serde(rename = "Events", default)]
    pub events: Vec<EventDto>,
    #[serde(rename = "Refresh", default)]
    pub refresh: bool,
    #[serde(rename = "More", default)]
    pub more: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LatestEventResponse {
    #[serde(rename = "EventID")]
    pub event_id: String,
}
