//! Node access and management against the scripted world.

use assert_matches::assert_matches;
use drive_core::{
    AbortSignal, ClaimedAuthor, DriveError, MemberRole, NodeMiss, NodeType, NodeUid,
    TelemetryEvent,
};
use drive_testkit::{json_ok, DriveWorld};
use futures::StreamExt;

#[tokio::test]
async fn root_folder_decrypts_with_verified_authors() {
    let world = DriveWorld::new().await;
    let access = world.access();

    let root = access
        .get_my_files_root_folder(&AbortSignal::none())
        .await
        .unwrap()
        .expect("root should not be degraded");

    assert_eq!(root.name, "My files");
    assert_eq!(root.node_type, NodeType::Folder);
    assert_eq!(root.parent_uid, None);
    assert_eq!(root.direct_member_role, MemberRole::Admin);
    assert_eq!(
        root.key_author,
        Ok(ClaimedAuthor::Email(world.email.clone()))
    );
    assert_eq!(
        root.name_author,
        Ok(ClaimedAuthor::Email(world.email.clone()))
    );
    assert!(root.folder().unwrap().hash_key_available);
}

#[tokio::test]
async fn folder_children_iterate_with_pipelined_decryption() {
    let world = DriveWorld::new().await;
    world.add_folder("root", "Documents").await;
    world
        .add_file("root", "a.txt", b"file a", 1024, None, Some(6))
        .await;
    world
        .add_file("root", "b.txt", b"file b", 1024, None, Some(6))
        .await;

    let access = world.access();
    let children: Vec<_> = access
        .iterate_folder_children(&world.root_uid, &AbortSignal::none())
        .collect()
        .await;

    assert_eq!(children.len(), 3);
    let mut names: Vec<String> = children
        .into_iter()
        .map(|child| child.unwrap().expect("not degraded").name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["Documents", "a.txt", "b.txt"]);
}

#[tokio::test]
async fn corrupted_name_degrades_only_that_node() {
    let world = DriveWorld::new().await;
    world.add_folder("root", "Documents").await;
    let (file_uid, _) = world
        .add_file("root", "broken.txt", b"data", 1024, None, Some(4))
        .await;
    world.mutate_link(&file_uid.node_id.0, |link| {
        link.name = "mock-message:not-base64!!!".to_string();
    });

    let access = world.access();
    let children: Vec<_> = access
        .iterate_folder_children(&world.root_uid, &AbortSignal::none())
        .collect()
        .await;

    assert_eq!(children.len(), 2);
    let degraded: Vec<_> = children
        .iter()
        .filter_map(|child| child.as_ref().unwrap().as_ref().err())
        .collect();
    assert_eq!(degraded.len(), 1);
    assert_eq!(degraded[0].uid, file_uid);
    assert!(degraded[0].name.is_err());
    // The failure was reported to telemetry as a decryption error.
    assert!(world
        .telemetry
        .events()
        .iter()
        .any(|event| matches!(event, TelemetryEvent::DecryptionError { .. })));
}

#[tokio::test]
async fn get_node_reads_the_cache_on_the_second_lookup() {
    let world = DriveWorld::new().await;
    let (file_uid, _) = world
        .add_file("root", "a.txt", b"data", 1024, None, Some(4))
        .await;

    let access = world.access();
    let first = access.get_node(&file_uid, &AbortSignal::none()).await.unwrap();
    assert!(first.is_ok());
    let fetches = world.fetcher.request_count("links/fetch");

    let second = access.get_node(&file_uid, &AbortSignal::none()).await.unwrap();
    assert!(second.is_ok());
    assert_eq!(world.fetcher.request_count("links/fetch"), fetches);
}

#[tokio::test]
async fn unknown_uid_is_reported_missing() {
    let world = DriveWorld::new().await;
    let access = world.access();

    let uid = NodeUid::new("vol-1", "no-such-node");
    let result = access.get_node(&uid, &AbortSignal::none()).await.unwrap();
    assert_matches!(result, Err(NodeMiss::Missing { uid: missing }) if missing == uid);
}

#[tokio::test]
async fn bulk_trash_reports_per_node_outcomes() {
    let world = DriveWorld::new().await;
    let (n1, _) = world
        .add_file("root", "one.txt", b"1", 16, None, Some(1))
        .await;
    let n2 = NodeUid::new("vol-1", "missing-node");
    let (n3, _) = world
        .add_file("root", "three.txt", b"3", 16, None, Some(1))
        .await;

    let n1_id = n1.node_id.to_string();
    let n2_id = n2.node_id.to_string();
    let n3_id = n3.node_id.to_string();
    world.fetcher.on("POST", "trash_multiple", move |_| {
        Ok(json_ok(
            &serde_json::json!({
                "Code": 1001,
                "Responses": [
                    {"LinkID": n1_id, "Response": {"Code": 1000}},
                    {"LinkID": n2_id, "Response": {"Code": 2501, "Error": "not found"}},
                    {"LinkID": n3_id, "Response": {"Code": 1000}},
                ],
            })
            .to_string(),
        ))
    });

    let access = world.access();
    let results: Vec<_> = access
        .trash_nodes(vec![n1.clone(), n2.clone(), n3.clone()], &AbortSignal::none())
        .collect()
        .await;

    assert_eq!(results.len(), 3);
    let failures: Vec<_> = results
        .iter()
        .filter(|result| result.outcome.is_err())
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].uid, n2);
    assert_matches!(failures[0].outcome, Err(DriveError::NotFound { .. }));
}

#[tokio::test]
async fn rename_collision_fails_with_validation_before_any_mutation() {
    let world = DriveWorld::new().await;
    let (file_uid, _) = world
        .add_file("root", "a.txt", b"data", 16, None, Some(4))
        .await;

    // Every hash is taken.
    world.fetcher.on("POST", "checkAvailableHashes", |_| {
        Ok(json_ok(
            &serde_json::json!({"Code": 1000, "AvailableHashes": [], "PendingHashes": []})
                .to_string(),
        ))
    });

    let access = world.access();
    let result = access
        .rename_node(&file_uid, "b.txt", &AbortSignal::none())
        .await;
    assert_matches!(result, Err(DriveError::Validation { .. }));
    assert_eq!(world.fetcher.request_count("/rename"), 0);
}

#[tokio::test]
async fn rename_reencrypts_under_the_name_session_key() {
    let world = DriveWorld::new().await;
    let (file_uid, _) = world
        .add_file("root", "a.txt", b"data", 16, None, Some(4))
        .await;

    world.fetcher.on("PUT", "/rename", |_| {
        Ok(json_ok(&serde_json::json!({"Code": 1000}).to_string()))
    });

    let access = world.access();
    access
        .rename_node(&file_uid, "b.txt", &AbortSignal::none())
        .await
        .unwrap();
    assert_eq!(world.fetcher.request_count("/rename"), 1);
}

#[tokio::test]
async fn rename_rejects_invalid_names() {
    let world = DriveWorld::new().await;
    let access = world.access();
    let uid = NodeUid::new("vol-1", "whatever");

    for bad in ["", "a/b", &"x".repeat(300)] {
        let result = access.rename_node(&uid, bad, &AbortSignal::none()).await;
        assert_matches!(result, Err(DriveError::Validation { .. }));
    }
}

#[tokio::test]
async fn create_folder_returns_the_new_uid() {
    let world = DriveWorld::new().await;
    world.fetcher.on("POST", "/folders", |request| {
        // Folder creation; the children listing route also matches POST
        // bodies, so double-check the URL shape.
        assert!(request.url.ends_with("/folders"));
        Ok(json_ok(
            &serde_json::json!({"Code": 1000, "Folder": {"ID": "new-folder"}}).to_string(),
        ))
    });

    let access = world.access();
    let uid = access
        .create_folder(&world.root_uid, "Reports", &AbortSignal::none())
        .await
        .unwrap();
    assert_eq!(uid, NodeUid::new("vol-1", "new-folder"));
}

#[tokio::test]
async fn delete_evicts_cached_state() {
    let world = DriveWorld::new().await;
    let (file_uid, _) = world
        .add_file("root", "a.txt", b"data", 16, None, Some(4))
        .await;

    let access = world.access();
    let _ = access.get_node(&file_uid, &AbortSignal::none()).await.unwrap();
    assert!(world.entity_cache.contains_key(&file_uid.to_string()));

    let file_id = file_uid.node_id.to_string();
    world.fetcher.on("POST", "delete_multiple", move |_| {
        Ok(json_ok(
            &serde_json::json!({
                "Code": 1000,
                "Responses": [{"LinkID": file_id, "Response": {"Code": 1000}}],
            })
            .to_string(),
        ))
    });

    let results: Vec<_> = access
        .delete_nodes(vec![file_uid.clone()], &AbortSignal::none())
        .collect()
        .await;
    assert!(results[0].outcome.is_ok());
    assert!(!world.entity_cache.contains_key(&file_uid.to_string()));
}
