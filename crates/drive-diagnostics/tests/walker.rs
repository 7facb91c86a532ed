//! Diagnostic walker findings against the scripted world.

use drive_core::AbortSignal;
use drive_diagnostics::{
    DiagnosticEvent, DiagnosticWalker, DiagnosticsOptions, WalkerItem,
};
use drive_testkit::{json_ok, DriveWorld};
use drive_transfers::{IntegrityAccumulator, Transfers};
use futures::stream::{self, StreamExt};
use std::sync::Arc;

fn sha1_hex(data: &[u8]) -> String {
    let mut accumulator = IntegrityAccumulator::new();
    accumulator.update(data);
    accumulator.finalize().0
}

fn walker(world: &DriveWorld) -> DiagnosticWalker {
    let access = world.access();
    let transfers = Arc::new(Transfers::new(
        access.clone(),
        world.account.clone(),
        "test-client".to_string(),
    ));
    DiagnosticWalker::new(access, transfers)
}

#[tokio::test]
async fn clean_tree_produces_no_findings() {
    let world = DriveWorld::new().await;
    let content = b"verified content";
    world
        .add_file(
            "root",
            "good.bin",
            content,
            content.len(),
            Some(sha1_hex(content)),
            Some(content.len() as u64),
        )
        .await;

    let events: Vec<DiagnosticEvent> = walker(&world)
        .verify_my_files(
            DiagnosticsOptions {
                verify_content: true,
                verify_thumbnails: false,
            },
            &AbortSignal::none(),
        )
        .await
        .unwrap()
        .collect()
        .await;

    assert!(events.is_empty(), "unexpected findings: {events:?}");
}

#[tokio::test]
async fn missing_sha1_is_reported_and_content_still_verifies() {
    let world = DriveWorld::new().await;
    let content = b"content without digest";
    let (file_uid, _) = world
        .add_file(
            "root",
            "nodigest.bin",
            content,
            content.len(),
            None,
            Some(content.len() as u64),
        )
        .await;

    let events: Vec<DiagnosticEvent> = walker(&world)
        .verify_my_files(
            DiagnosticsOptions {
                verify_content: true,
                verify_thumbnails: false,
            },
            &AbortSignal::none(),
        )
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(
        events,
        vec![DiagnosticEvent::ExtendedAttributesMissingField {
            uid: file_uid,
            missing_field: "sha1".to_string(),
        }]
    );
    // The content pass ran: blocks were fetched.
    assert!(world.fetcher.request_count("storage.test/blocks") > 0);
}

#[tokio::test]
async fn malformed_sha1_is_an_extended_attributes_error() {
    let world = DriveWorld::new().await;
    let content = b"payload";
    let (file_uid, _) = world
        .add_file(
            "root",
            "bad.bin",
            content,
            content.len(),
            Some("not-a-sha1".to_string()),
            Some(content.len() as u64),
        )
        .await;

    let events: Vec<DiagnosticEvent> = walker(&world)
        .verify_my_files(DiagnosticsOptions::default(), &AbortSignal::none())
        .await
        .unwrap()
        .collect()
        .await;

    assert!(events.iter().any(|event| matches!(
        event,
        DiagnosticEvent::ExtendedAttributesError { uid, .. } if *uid == file_uid
    )));
}

#[tokio::test]
async fn integrity_mismatch_surfaces_through_content_verification() {
    let world = DriveWorld::new().await;
    let content = b"actual content";
    let (file_uid, _) = world
        .add_file(
            "root",
            "tampered.bin",
            content,
            content.len(),
            Some(sha1_hex(b"claimed content")),
            Some(content.len() as u64),
        )
        .await;

    let events: Vec<DiagnosticEvent> = walker(&world)
        .verify_my_files(
            DiagnosticsOptions {
                verify_content: true,
                verify_thumbnails: false,
            },
            &AbortSignal::none(),
        )
        .await
        .unwrap()
        .collect()
        .await;

    assert!(events.iter().any(|event| matches!(
        event,
        DiagnosticEvent::ContentIntegrityError { uid, .. } if *uid == file_uid
    )));
}

#[tokio::test]
async fn degraded_nodes_are_reported_with_their_authors() {
    let world = DriveWorld::new().await;
    let (file_uid, _) = world
        .add_file("root", "broken.bin", b"x", 16, None, Some(1))
        .await;
    world.mutate_link(&file_uid.node_id.0, |link| {
        link.name = "mock-message:garbage!!!".to_string();
    });

    let events: Vec<DiagnosticEvent> = walker(&world)
        .verify_my_files(DiagnosticsOptions::default(), &AbortSignal::none())
        .await
        .unwrap()
        .collect()
        .await;

    assert!(events.iter().any(|event| matches!(
        event,
        DiagnosticEvent::DegradedNode { uid, .. } if *uid == file_uid
    )));
}

#[tokio::test]
async fn walker_descends_into_subfolders() {
    let world = DriveWorld::new().await;
    let documents = world.add_folder("root", "Documents").await;
    let (nested_uid, _) = world
        .add_file(
            &documents.node_id.0,
            "nested.bin",
            b"data",
            16,
            Some("zz".to_string()),
            Some(4),
        )
        .await;

    let events: Vec<DiagnosticEvent> = walker(&world)
        .verify_my_files(DiagnosticsOptions::default(), &AbortSignal::none())
        .await
        .unwrap()
        .collect()
        .await;

    assert!(events.iter().any(|event| matches!(
        event,
        DiagnosticEvent::ExtendedAttributesError { uid, .. } if *uid == nested_uid
    )));
}

#[tokio::test]
async fn thumbnail_failures_are_reported_except_missing_thumbnails() {
    let world = DriveWorld::new().await;
    let (with_error, _) = world
        .add_file("root", "a.bin", b"a", 16, Some(sha1_hex(b"a")), Some(1))
        .await;
    let (without_thumb, _) = world
        .add_file("root", "b.bin", b"b", 16, Some(sha1_hex(b"b")), Some(1))
        .await;

    let error_id = with_error.node_id.to_string();
    let missing_id = without_thumb.node_id.to_string();
    world.fetcher.on("POST", "/thumbnails", move |request| {
        let body: serde_json::Value =
            serde_json::from_slice(request.body.as_deref().unwrap_or_default()).unwrap();
        let wanted = body["LinkIDs"][0].as_str().unwrap_or_default().to_string();
        let entry = if wanted == error_id {
            serde_json::json!({"LinkID": wanted, "Error": "decryption failed"})
        } else if wanted == missing_id {
            serde_json::json!({"LinkID": wanted, "Error": "Node has no thumbnail"})
        } else {
            serde_json::json!({"LinkID": wanted})
        };
        Ok(json_ok(
            &serde_json::json!({"Code": 1000, "Thumbnails": [entry]}).to_string(),
        ))
    });

    let events: Vec<DiagnosticEvent> = walker(&world)
        .verify_my_files(
            DiagnosticsOptions {
                verify_content: false,
                verify_thumbnails: true,
            },
            &AbortSignal::none(),
        )
        .await
        .unwrap()
        .collect()
        .await;

    let thumbnail_errors: Vec<_> = events
        .iter()
        .filter(|event| matches!(event, DiagnosticEvent::ThumbnailsError { .. }))
        .collect();
    assert_eq!(thumbnail_errors.len(), 1);
    assert!(matches!(
        thumbnail_errors[0],
        DiagnosticEvent::ThumbnailsError { uid, .. } if *uid == with_error
    ));
}

#[tokio::test]
async fn signal_zipping_ends_with_the_traversal() {
    let world = DriveWorld::new().await;
    world
        .add_file("root", "a.bin", b"a", 16, Some("zz".to_string()), Some(1))
        .await;

    let telemetry = stream::iter(Vec::<drive_core::TelemetryEvent>::new());
    // A live SDK-event stream that never ends: the traversal finishing must
    // end the combined stream anyway.
    let sdk_events = stream::pending::<drive_core::SdkEvent>();

    let items: Vec<WalkerItem> = walker(&world)
        .verify_node_tree_with_signals(
            &world.root_uid,
            DiagnosticsOptions::default(),
            telemetry,
            sdk_events,
            &AbortSignal::none(),
        )
        .collect()
        .await;

    assert!(items.iter().any(|item| matches!(
        item,
        WalkerItem::Diagnostic(DiagnosticEvent::ExtendedAttributesError { .. })
    )));
}
