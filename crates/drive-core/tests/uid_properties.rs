//! Property tests for composite identifier parse/format bijectivity.

use drive_core::{NodeUid, RevisionUid};
use proptest::prelude::*;

/// Server identifiers are URL-safe base64-ish strings; never empty, never
/// containing the `~` separator.
fn id_component() -> impl Strategy<Value = String> {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-=";
    prop::collection::vec(prop::sample::select(CHARSET.to_vec()), 1..24)
        .prop_map(|bytes| String::from_utf8(bytes).unwrap())
}

proptest! {
    #[test]
    fn node_uid_roundtrips(volume in id_component(), node in id_component()) {
        let uid = NodeUid::new(volume, node);
        let parsed: NodeUid = uid.to_string().parse().unwrap();
        prop_assert_eq!(parsed, uid);
    }

    #[test]
    fn revision_uid_roundtrips(
        volume in id_component(),
        node in id_component(),
        revision in id_component(),
    ) {
        let uid = RevisionUid::new(volume, node, revision);
        let parsed: RevisionUid = uid.to_string().parse().unwrap();
        prop_assert_eq!(parsed, uid);
    }

    #[test]
    fn node_uid_parse_never_accepts_extra_separators(
        volume in id_component(),
        node in id_component(),
        extra in id_component(),
    ) {
        let malformed = format!("{volume}~{node}~{extra}");
        prop_assert!(malformed.parse::<NodeUid>().is_err());
    }
}
