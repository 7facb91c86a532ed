//! Node and revision entities with the degraded-result surface
//!
//! The public API never throws on a single-node decryption failure. Every
//! lookup yields `Result<Node, DegradedNode>`: a degraded node keeps its
//! identity and whatever fields survived, plus the per-field errors. Every
//! derivable field carries an [`Author`] provenance recording who signed it
//! and whether the signature held.

use crate::error::DriveError;
use crate::identifiers::{NodeUid, RevisionUid};
use serde::{Deserialize, Serialize};

/// Outcome of one signature verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    /// No signature was present.
    NotSigned,
    /// A signature was present and valid.
    SignedAndValid,
    /// A signature was present and did not verify.
    SignedAndInvalid,
}

impl VerificationStatus {
    /// Whether this status represents a valid signature.
    pub fn is_valid(self) -> bool {
        matches!(self, Self::SignedAndValid)
    }
}

/// The claimed author of a derivable field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimedAuthor {
    /// Signed by the address with this email.
    Email(String),
    /// Uploaded by a non-logged-in user through a public link.
    Anonymous,
}

/// Why an author could not be confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorError {
    /// The email the payload claims, when one was recorded.
    pub claimed_author: Option<String>,
    /// What failed: missing signature, invalid signature, or key lookup.
    pub error: String,
}

/// Provenance of a derivable field: a confirmed author, or the failure that
/// prevented confirmation.
pub type Author = std::result::Result<ClaimedAuthor, AuthorError>;

/// Whether a node is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    /// Leaf node with content revisions.
    File,
    /// Interior node with children.
    Folder,
}

/// Membership role granted on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberRole {
    /// Read-only access.
    Viewer,
    /// Read-write access.
    Editor,
    /// Full control including membership management.
    Admin,
    /// Role is inherited from an ancestor. Root nodes always carry a
    /// concrete role.
    Inherited,
}

/// Lifecycle state of a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevisionState {
    /// The revision serving the file's current content.
    Active,
    /// An older revision kept for history.
    Superseded,
}

/// Digests claimed by the author in extended attributes.
///
/// Untrusted until verified against computed values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedDigests {
    /// Hex-encoded SHA-1 of the cleartext content, when claimed.
    pub sha1: Option<String>,
}

/// Digest block inside extended attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestAttributes {
    /// Hex-encoded SHA-1 of the cleartext.
    #[serde(rename = "SHA1", skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
}

/// The `Common` section of extended attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommonExtendedAttributes {
    /// Claimed modification time, unix seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modification_time: Option<i64>,
    /// Claimed total cleartext size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Claimed cleartext block sizes, in block order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_sizes: Option<Vec<u64>>,
    /// Claimed content digests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digests: Option<DigestAttributes>,
}

/// Decrypted extended attributes of a node or revision.
///
/// The payload is author-controlled JSON; anything malformed degrades the
/// owning node instead of failing its enclosing iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendedAttributes {
    /// The well-known `Common` section.
    #[serde(rename = "Common", skip_serializing_if = "Option::is_none")]
    pub common: Option<CommonExtendedAttributes>,
}

impl ExtendedAttributes {
    /// Claimed digests, when the author recorded any.
    pub fn claimed_digests(&self) -> ClaimedDigests {
        ClaimedDigests {
            sha1: self
                .common
                .as_ref()
                .and_then(|common| common.digests.as_ref())
                .and_then(|digests| digests.sha1.clone()),
        }
    }

    /// Claimed cleartext size, when recorded.
    pub fn claimed_size(&self) -> Option<u64> {
        self.common.as_ref().and_then(|common| common.size)
    }

    /// Claimed modification time, when recorded.
    pub fn claimed_modification_time(&self) -> Option<i64> {
        self.common
            .as_ref()
            .and_then(|common| common.modification_time)
    }
}

/// An immutable content version of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Composite identifier of this revision.
    pub uid: RevisionUid,
    /// Whether this revision is active or superseded.
    pub state: RevisionState,
    /// Server-recorded creation time, unix seconds.
    pub creation_time: i64,
    /// Provenance of the content signature.
    pub content_author: Author,
    /// Claimed cleartext size; untrusted until verified.
    pub claimed_size: Option<u64>,
    /// Claimed modification time; untrusted until verified.
    pub claimed_modification_time: Option<i64>,
    /// Claimed digests; untrusted until verified.
    pub claimed_digests: ClaimedDigests,
    /// Full decrypted extended attributes, when present and well-formed.
    pub extended_attributes: Option<ExtendedAttributes>,
}

/// File-specific derived state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Provenance of the content-key signature.
    pub content_key_author: Author,
    /// The active revision, when one was decryptable.
    pub active_revision: Option<Revision>,
    /// Server-recorded media type, when known.
    pub media_type: Option<String>,
}

/// Folder-specific derived state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderInfo {
    /// Whether the folder's hash key decrypted successfully. The key itself
    /// stays in the crypto cache.
    pub hash_key_available: bool,
    /// Decrypted folder extended attributes, when present and well-formed.
    pub extended_attributes: Option<ExtendedAttributes>,
}

/// Type-specific derived state of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeInfo {
    /// File payload.
    File(FileInfo),
    /// Folder payload.
    Folder(FolderInfo),
}

/// A fully decrypted file or folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable composite identifier.
    pub uid: NodeUid,
    /// Parent UID; `None` only for roots.
    pub parent_uid: Option<NodeUid>,
    /// File or folder.
    pub node_type: NodeType,
    /// Decrypted node name.
    pub name: String,
    /// Provenance of the node-key signature.
    pub key_author: Author,
    /// Provenance of the name signature. Tracked separately from the key
    /// author.
    pub name_author: Author,
    /// Role granted directly on this node.
    pub direct_member_role: MemberRole,
    /// Whether this node is shared.
    pub is_shared: bool,
    /// Trash time, unix seconds, when trashed.
    pub trash_time: Option<i64>,
    /// Server-recorded creation time, unix seconds.
    pub creation_time: i64,
    /// Type-specific derived state.
    pub info: NodeInfo,
}

impl Node {
    /// File payload, when this node is a file.
    pub fn file(&self) -> Option<&FileInfo> {
        match &self.info {
            NodeInfo::File(info) => Some(info),
            NodeInfo::Folder(_) => None,
        }
    }

    /// Folder payload, when this node is a folder.
    pub fn folder(&self) -> Option<&FolderInfo> {
        match &self.info {
            NodeInfo::Folder(info) => Some(info),
            NodeInfo::File(_) => None,
        }
    }

    /// The active revision of a file node.
    pub fn active_revision(&self) -> Option<&Revision> {
        self.file().and_then(|info| info.active_revision.as_ref())
    }
}

/// A node where at least one essential field failed decryption or
/// verification, but which remains partly usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradedNode {
    /// Stable composite identifier.
    pub uid: NodeUid,
    /// Parent UID, when known.
    pub parent_uid: Option<NodeUid>,
    /// File or folder, when the record said so.
    pub node_type: Option<NodeType>,
    /// The name, or the error that prevented decrypting it.
    pub name: std::result::Result<String, DriveError>,
    /// Provenance of the node-key signature.
    pub key_author: Author,
    /// Provenance of the name signature.
    pub name_author: Author,
    /// Role granted directly on this node, when known.
    pub direct_member_role: Option<MemberRole>,
    /// Whether this node is shared.
    pub is_shared: bool,
    /// Trash time, unix seconds, when trashed.
    pub trash_time: Option<i64>,
    /// Server-recorded creation time, unix seconds.
    pub creation_time: i64,
    /// The active revision of a file node, when it survived decryption.
    pub active_revision: Option<Revision>,
    /// Failures that are not tied to a single field.
    pub errors: Vec<DriveError>,
}

/// Public lookup result: a decrypted node or its degraded remainder.
pub type MaybeNode = std::result::Result<Node, DegradedNode>;

/// Non-`Ok` outcome of an explicit UID lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeMiss {
    /// The node exists but could not be fully decrypted.
    Degraded(DegradedNode),
    /// No node exists under the requested UID.
    Missing {
        /// The UID that was looked up.
        uid: NodeUid,
    },
}

/// Result of an explicit UID lookup, distinguishing missing nodes.
pub type MaybeMissingNode = std::result::Result<Node, NodeMiss>;

/// Per-node outcome of a bulk management operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    /// The node the outcome applies to.
    pub uid: NodeUid,
    /// Success, or the per-item failure. A partial failure never aborts the
    /// batch.
    pub outcome: std::result::Result<(), DriveError>,
}

/// UID of either side of a [`MaybeNode`].
pub fn maybe_node_uid(node: &MaybeNode) -> &NodeUid {
    match node {
        Ok(node) => &node.uid,
        Err(degraded) => &degraded.uid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xattrs_json() -> &'static str {
        r#"{"Common":{"ModificationTime":1700000000,"Size":12,"BlockSizes":[12],"Digests":{"SHA1":"0123456789abcdef0123456789abcdef01234567"}}}"#
    }

    #[test]
    fn extended_attributes_parse_common_section() {
        let xattrs: ExtendedAttributes = serde_json::from_str(xattrs_json()).unwrap();
        assert_eq!(xattrs.claimed_size(), Some(12));
        assert_eq!(xattrs.claimed_modification_time(), Some(1700000000));
        assert_eq!(
            xattrs.claimed_digests().sha1.as_deref(),
            Some("0123456789abcdef0123456789abcdef01234567")
        );
    }

    #[test]
    fn missing_digests_claim_nothing() {
        let xattrs: ExtendedAttributes =
            serde_json::from_str(r#"{"Common":{"Size":4}}"#).unwrap();
        assert_eq!(xattrs.claimed_digests().sha1, None);
        assert_eq!(xattrs.claimed_size(), Some(4));
    }
}
