//! Identifier types for volumes, shares, nodes, and revisions
//!
//! Nodes are identified by a composite `NodeUid` of `(volume, node)` and
//! revisions by a `RevisionUid` of `(volume, node, revision)`. Both have a
//! canonical `~`-separated string form whose parse/format pair is bijective:
//! parsing rejects anything `format` cannot have produced.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator used in the canonical string form of composite identifiers.
const UID_SEPARATOR: char = '~';

/// Error returned when parsing a composite identifier fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UidParseError {
    /// The string does not split into the expected number of components.
    #[error("malformed uid {value:?}: expected {expected} `~`-separated components")]
    WrongArity {
        /// The offending input.
        value: String,
        /// Number of components the identifier kind requires.
        expected: usize,
    },
    /// One of the components is empty.
    #[error("malformed uid {value:?}: empty component")]
    EmptyComponent {
        /// The offending input.
        value: String,
    },
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new identifier from a server-issued string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id! {
    /// Volume identifier issued by the server.
    VolumeId
}

string_id! {
    /// Node identifier, unique within a volume.
    NodeId
}

string_id! {
    /// Revision identifier, unique within a node.
    RevisionId
}

string_id! {
    /// Share identifier issued by the server.
    ShareId
}

string_id! {
    /// Address identifier for a signing address of the account.
    AddressId
}

/// Composite identifier of a node: `(volumeId, nodeId)`.
///
/// Serialized as `"{volumeId}~{nodeId}"`. A node UID is stable: renames and
/// moves never mint a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeUid {
    /// Volume the node lives in.
    pub volume_id: VolumeId,
    /// Node identifier within the volume.
    pub node_id: NodeId,
}

impl NodeUid {
    /// Create a UID from its components.
    pub fn new(volume_id: impl Into<VolumeId>, node_id: impl Into<NodeId>) -> Self {
        Self {
            volume_id: volume_id.into(),
            node_id: node_id.into(),
        }
    }
}

impl fmt::Display for NodeUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.volume_id, UID_SEPARATOR, self.node_id)
    }
}

impl FromStr for NodeUid {
    type Err = UidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let components = split_uid(s, 2)?;
        Ok(NodeUid::new(components[0], components[1]))
    }
}

impl TryFrom<String> for NodeUid {
    type Error = UidParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<NodeUid> for String {
    fn from(uid: NodeUid) -> Self {
        uid.to_string()
    }
}

/// Composite identifier of a revision: `(volumeId, nodeId, revisionId)`.
///
/// Serialized as `"{volumeId}~{nodeId}~{revisionId}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionUid {
    /// Volume the revision's node lives in.
    pub volume_id: VolumeId,
    /// Node the revision belongs to.
    pub node_id: NodeId,
    /// Revision identifier within the node.
    pub revision_id: RevisionId,
}

impl RevisionUid {
    /// Create a revision UID from its components.
    pub fn new(
        volume_id: impl Into<VolumeId>,
        node_id: impl Into<NodeId>,
        revision_id: impl Into<RevisionId>,
    ) -> Self {
        Self {
            volume_id: volume_id.into(),
            node_id: node_id.into(),
            revision_id: revision_id.into(),
        }
    }

    /// UID of the node this revision belongs to.
    pub fn node_uid(&self) -> NodeUid {
        NodeUid {
            volume_id: self.volume_id.clone(),
            node_id: self.node_id.clone(),
        }
    }
}

impl fmt::Display for RevisionUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.volume_id,
            self.node_id,
            self.revision_id,
            sep = UID_SEPARATOR
        )
    }
}

impl FromStr for RevisionUid {
    type Err = UidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let components = split_uid(s, 3)?;
        Ok(RevisionUid::new(components[0], components[1], components[2]))
    }
}

impl TryFrom<String> for RevisionUid {
    type Error = UidParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<RevisionUid> for String {
    fn from(uid: RevisionUid) -> Self {
        uid.to_string()
    }
}

/// Split a canonical UID string into exactly `expected` non-empty components.
///
/// Splitting on the separator enforces bijectivity: a component containing
/// the separator would change the arity and be rejected.
fn split_uid(s: &str, expected: usize) -> Result<Vec<&str>, UidParseError> {
    let components: Vec<&str> = s.split(UID_SEPARATOR).collect();
    if components.len() != expected {
        return Err(UidParseError::WrongArity {
            value: s.to_string(),
            expected,
        });
    }
    if components.iter().any(|component| component.is_empty()) {
        return Err(UidParseError::EmptyComponent {
            value: s.to_string(),
        });
    }
    Ok(components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn node_uid_roundtrips_through_string_form() {
        let uid = NodeUid::new("vol-1", "node-9");
        let parsed: NodeUid = uid.to_string().parse().unwrap();
        assert_eq!(parsed, uid);
    }

    #[test]
    fn revision_uid_roundtrips_through_string_form() {
        let uid = RevisionUid::new("vol-1", "node-9", "rev-3");
        let parsed: RevisionUid = uid.to_string().parse().unwrap();
        assert_eq!(parsed, uid);
    }

    #[test]
    fn parse_rejects_wrong_arity() {
        assert_matches!(
            "only-one".parse::<NodeUid>(),
            Err(UidParseError::WrongArity { expected: 2, .. })
        );
        assert_matches!(
            "a~b~c".parse::<NodeUid>(),
            Err(UidParseError::WrongArity { expected: 2, .. })
        );
        assert_matches!(
            "a~b".parse::<RevisionUid>(),
            Err(UidParseError::WrongArity { expected: 3, .. })
        );
    }

    #[test]
    fn parse_rejects_empty_components() {
        assert_matches!(
            "~node".parse::<NodeUid>(),
            Err(UidParseError::EmptyComponent { .. })
        );
        assert_matches!(
            "vol~".parse::<NodeUid>(),
            Err(UidParseError::EmptyComponent { .. })
        );
        assert_matches!(
            "vol~node~".parse::<RevisionUid>(),
            Err(UidParseError::EmptyComponent { .. })
        );
    }

    #[test]
    fn serde_uses_canonical_string_form() {
        let uid = NodeUid::new("v", "n");
        let json = serde_json::to_string(&uid).unwrap();
        assert_eq!(json, "\"v~n\"");
        let back: NodeUid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, uid);
    }
}
