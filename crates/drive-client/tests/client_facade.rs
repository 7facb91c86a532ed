//! Facade smoke tests: the wired client serves the tree surface end to end.

use drive_client::DriveClientBuilder;
use drive_core::{AbortSignal, DriveConfig, SdkEvent};
use drive_testkit::DriveWorld;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;

async fn client_for(world: &DriveWorld) -> drive_client::DriveClient {
    DriveClientBuilder::new(
        DriveConfig::for_testing(),
        world.fetcher.clone(),
        world.provider.clone(),
        world.account.clone(),
        world.entity_cache.clone(),
        world.crypto_cache.clone(),
    )
    .telemetry(world.telemetry.clone())
    .build()
    .await
    .unwrap()
}

#[tokio::test]
async fn client_serves_the_tree_surface() {
    let world = DriveWorld::new().await;
    world.add_folder("root", "Documents").await;
    world
        .add_file("root", "a.txt", b"file a", 1024, None, Some(6))
        .await;

    let client = client_for(&world).await;
    let root = client
        .get_my_files_root_folder(&AbortSignal::none())
        .await
        .unwrap()
        .expect("root decrypts");
    assert_eq!(root.name, "My files");

    let children: Vec<_> = client
        .iterate_folder_children(&root.uid, &AbortSignal::none())
        .collect()
        .await;
    assert_eq!(children.len(), 2);
}

#[tokio::test]
async fn client_generates_a_client_uid_when_missing() {
    let world = DriveWorld::new().await;
    let mut config = DriveConfig::for_testing();
    config.client_uid = None;

    let client = DriveClientBuilder::new(
        config,
        world.fetcher.clone(),
        world.provider.clone(),
        world.account.clone(),
        world.entity_cache.clone(),
        world.crypto_cache.clone(),
    )
    .build()
    .await
    .unwrap();

    let client_uid = client.config().client_uid.clone().unwrap();
    assert_eq!(client_uid.len(), 16);
    assert!(client_uid.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn sdk_event_subscription_reaches_the_host() {
    let world = DriveWorld::new().await;
    let client = client_for(&world).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_inner = Arc::clone(&seen);
    let _subscription = client.subscribe_sdk_events(move |event| seen_inner.lock().push(event));

    client.api().events().emit(SdkEvent::TransfersPaused);
    assert_eq!(seen.lock().as_slice(), &[SdkEvent::TransfersPaused]);
}
