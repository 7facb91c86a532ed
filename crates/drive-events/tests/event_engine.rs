//! Event engine behavior against the scripted world.

use async_trait::async_trait;
use drive_core::{AbortSignal, DriveError};
use drive_events::{
    DriveEvent, EventEngine, EventEngineConfig, InMemoryEventIdProvider, LatestEventIdProvider,
    ScopeId, TreeEventListener,
};
use drive_testkit::{json_ok, DriveWorld};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct ChannelListener {
    tx: mpsc::UnboundedSender<DriveEvent>,
}

#[async_trait]
impl TreeEventListener for ChannelListener {
    async fn on_event(&self, event: &DriveEvent) -> Result<(), DriveError> {
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

struct FailingListener;

#[async_trait]
impl TreeEventListener for FailingListener {
    async fn on_event(&self, _event: &DriveEvent) -> Result<(), DriveError> {
        Err(DriveError::network("listener exploded"))
    }
}

fn page(event_id: &str, events: serde_json::Value) -> String {
    serde_json::json!({
        "Code": 1000,
        "EventID": event_id,
        "Events": events,
        "More": false,
        "Refresh": false,
    })
    .to_string()
}

#[tokio::test(start_paused = true)]
async fn update_then_delete_is_delivered_in_order_and_evicts_the_cache() {
    let world = DriveWorld::new().await;
    let (n1, _) = world
        .add_file("root", "a.txt", b"data", 16, None, Some(4))
        .await;
    let access = world.access();
    let _ = access.get_node(&n1, &AbortSignal::none()).await.unwrap();
    assert!(world.entity_cache.contains_key(&n1.to_string()));

    let scope = ScopeId::Volume(world.volume_id.clone());
    let provider = Arc::new(InMemoryEventIdProvider::new());
    provider.set_latest_event_id(&scope, "C").await;

    let n1_id = n1.node_id.to_string();
    world.fetcher.on_json(
        "GET",
        "events/C",
        page(
            "C2",
            serde_json::json!([
                {"EventType": 2, "Link": {"LinkID": n1_id, "ParentLinkID": "root"}},
                {"EventType": 3, "Link": {"LinkID": n1_id, "ParentLinkID": "root"}},
            ]),
        ),
    );
    world
        .fetcher
        .on_json("GET", "events/C2", page("C2", serde_json::json!([])));

    let engine = EventEngine::new(access, provider.clone(), EventEngineConfig::for_testing());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription =
        engine.subscribe_to_tree_events(scope.clone(), Arc::new(ChannelListener { tx }));

    let first = rx.recv().await.unwrap();
    assert!(matches!(first, DriveEvent::NodeUpdated { ref uid, .. } if *uid == n1));
    let second = rx.recv().await.unwrap();
    assert!(matches!(second, DriveEvent::NodeDeleted { ref uid, .. } if *uid == n1));

    // The deletion evicted the cached entity and the cursor advanced.
    assert!(!world.entity_cache.contains_key(&n1.to_string()));
    assert_eq!(
        provider.latest_event_id(&scope).await.as_deref(),
        Some("C2")
    );
}

#[tokio::test(start_paused = true)]
async fn listener_failures_do_not_stop_delivery() {
    let world = DriveWorld::new().await;
    let access = world.access();
    let scope = ScopeId::Volume(world.volume_id.clone());
    let provider = Arc::new(InMemoryEventIdProvider::new());
    provider.set_latest_event_id(&scope, "C").await;

    world.fetcher.on_json(
        "GET",
        "events/C",
        page(
            "C2",
            serde_json::json!([
                {"EventType": 1, "Link": {"LinkID": "fresh", "ParentLinkID": "root"}},
            ]),
        ),
    );
    world
        .fetcher
        .on_json("GET", "events/C2", page("C2", serde_json::json!([])));

    let engine = EventEngine::new(access, provider, EventEngineConfig::for_testing());
    let _failing = engine.subscribe_to_tree_events(scope.clone(), Arc::new(FailingListener));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription =
        engine.subscribe_to_tree_events(scope, Arc::new(ChannelListener { tx }));

    let event = rx.recv().await.unwrap();
    assert!(matches!(event, DriveEvent::NodeCreated { .. }));
}

#[tokio::test(start_paused = true)]
async fn cursor_only_advance_is_a_fast_forward() {
    let world = DriveWorld::new().await;
    let access = world.access();
    let scope = ScopeId::Volume(world.volume_id.clone());
    let provider = Arc::new(InMemoryEventIdProvider::new());
    provider.set_latest_event_id(&scope, "C").await;

    world
        .fetcher
        .on_json("GET", "events/C", page("C9", serde_json::json!([])));
    world
        .fetcher
        .on_json("GET", "events/C9", page("C9", serde_json::json!([])));

    let engine = EventEngine::new(access, provider.clone(), EventEngineConfig::for_testing());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription =
        engine.subscribe_to_tree_events(scope.clone(), Arc::new(ChannelListener { tx }));

    let event = rx.recv().await.unwrap();
    assert!(matches!(event, DriveEvent::FastForward { .. }));
    assert_eq!(
        provider.latest_event_id(&scope).await.as_deref(),
        Some("C9")
    );
}

#[tokio::test(start_paused = true)]
async fn cancelling_the_subscription_stops_polling() {
    let world = DriveWorld::new().await;
    let access = world.access();
    let scope = ScopeId::Volume(world.volume_id.clone());
    let provider = Arc::new(InMemoryEventIdProvider::new());
    provider.set_latest_event_id(&scope, "C").await;

    world
        .fetcher
        .on_json("GET", "events/C", page("C", serde_json::json!([])));

    let engine = EventEngine::new(access, provider, EventEngineConfig::for_testing());
    let (tx, _rx) = mpsc::unbounded_channel();
    let subscription =
        engine.subscribe_to_tree_events(scope, Arc::new(ChannelListener { tx }));

    tokio::time::sleep(Duration::from_millis(200)).await;
    drop(subscription);
    // Let any in-flight page finish, then confirm the poller is quiet.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let settled = world.fetcher.request_count("events/C");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(world.fetcher.request_count("events/C"), settled);
}

#[tokio::test(start_paused = true)]
async fn shared_with_me_update_invalidates_share_keys() {
    let world = DriveWorld::new().await;
    let access = world.access();
    // Loading the root decrypts and caches the share key.
    let _ = access
        .get_my_files_root_folder(&AbortSignal::none())
        .await
        .unwrap();
    assert!(world.crypto_cache.contains_key("shareKey-share-1"));

    let provider = Arc::new(InMemoryEventIdProvider::new());
    provider.set_latest_event_id(&ScopeId::Core, "C").await;
    world.fetcher.on_json(
        "GET",
        "drive/v2/events/C",
        page("C2", serde_json::json!([{"EventType": 4}])),
    );
    world.fetcher.on_json(
        "GET",
        "drive/v2/events/C2",
        page("C2", serde_json::json!([])),
    );

    let engine = EventEngine::new(access, provider, EventEngineConfig::for_testing());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = engine.subscribe_to_drive_events(Arc::new(ChannelListener { tx }));

    let event = rx.recv().await.unwrap();
    assert_eq!(event, DriveEvent::SharedWithMeUpdated);
    assert!(!world.crypto_cache.contains_key("shareKey-share-1"));
}

#[tokio::test(start_paused = true)]
async fn removed_scope_delivers_tree_remove_and_unsubscribes() {
    let world = DriveWorld::new().await;
    let access = world.access();
    let scope = ScopeId::Volume(world.volume_id.clone());
    let provider = Arc::new(InMemoryEventIdProvider::new());
    provider.set_latest_event_id(&scope, "C").await;

    world.fetcher.on("GET", "events/C", |_| {
        Ok(json_ok(
            &serde_json::json!({"Code": 2501, "Error": "volume gone"}).to_string(),
        ))
    });

    let engine = EventEngine::new(access, provider, EventEngineConfig::for_testing());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription =
        engine.subscribe_to_tree_events(scope.clone(), Arc::new(ChannelListener { tx }));

    let event = rx.recv().await.unwrap();
    assert!(matches!(event, DriveEvent::TreeRemove { .. }));

    // The poller stopped for good.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = world.fetcher.request_count("events/C");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(world.fetcher.request_count("events/C"), settled);
}
