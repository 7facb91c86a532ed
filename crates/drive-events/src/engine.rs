//! The polling engine

use crate::dto::{
    DriveEvent, EventDto, EventsResponse, LatestEventResponse, ScopeId, EVENT_TYPE_CREATE,
    EVENT_TYPE_DELETE, EVENT_TYPE_SHARED_WITH_ME, EVENT_TYPE_UPDATE,
};
use async_trait::async_trait;
use drive_core::{AbortSignal, DriveError, NodeUid};
use drive_nodes::NodeAccess;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Cadence and backoff configuration.
#[derive(Debug, Clone)]
pub struct EventEngineConfig {
    /// Poll interval for the core scope and own volumes.
    pub poll_interval: Duration,
    /// Base poll interval for foreign volumes.
    pub foreign_poll_interval: Duration,
    /// Cap on the degraded interval.
    pub max_poll_interval: Duration,
}

impl Default for EventEngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            foreign_poll_interval: Duration::from_secs(60),
            max_poll_interval: Duration::from_secs(600),
        }
    }
}

impl EventEngineConfig {
    /// Short intervals for tests.
    pub fn for_testing() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            foreign_poll_interval: Duration::from_millis(100),
            max_poll_interval: Duration::from_millis(400),
        }
    }
}

/// Persisted cursor store supplied by the host.
#[async_trait]
pub trait LatestEventIdProvider: Send + Sync {
    /// The persisted cursor of a scope, when one exists.
    async fn latest_event_id(&self, scope: &ScopeId) -> Option<String>;

    /// Persist the cursor of a scope.
    async fn set_latest_event_id(&self, scope: &ScopeId, event_id: &str);
}

/// Cursor store for hosts without persistence.
#[derive(Default)]
pub struct InMemoryEventIdProvider {
    cursors: Mutex<HashMap<String, String>>,
}

impl InMemoryEventIdProvider {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LatestEventIdProvider for InMemoryEventIdProvider {
    async fn latest_event_id(&self, scope: &ScopeId) -> Option<String> {
        self.cursors.lock().get(&scope.to_string()).cloned()
    }

    async fn set_latest_event_id(&self, scope: &ScopeId, event_id: &str) {
        self.cursors
            .lock()
            .insert(scope.to_string(), event_id.to_string());
    }
}

/// A tree event consumer. Invocations for one scope are serialized.
#[async_trait]
pub trait TreeEventListener: Send + Sync {
    /// Handle one event. Errors are logged and skipped.
    async fn on_event(&self, event: &DriveEvent) -> Result<(), DriveError>;
}

type ListenerTable = Arc<Mutex<Vec<(u64, Arc<dyn TreeEventListener>)>>>;

struct ScopeState {
    listeners: ListenerTable,
    cancel: watch::Sender<bool>,
}

type ScopeTable = Arc<Mutex<HashMap<String, ScopeState>>>;

/// Everything a per-scope poll task needs, detached from the engine's own
/// lifetime.
#[derive(Clone)]
struct ScopeRunner {
    access: NodeAccess,
    id_provider: Arc<dyn LatestEventIdProvider>,
    config: EventEngineConfig,
    scopes: ScopeTable,
}

/// The event engine. One poll task per subscribed scope.
pub struct EventEngine {
    runner: ScopeRunner,
    scopes: ScopeTable,
    next_listener_id: AtomicU64,
}

impl EventEngine {
    /// Build the engine. Nothing polls until the first subscription.
    pub fn new(
        access: NodeAccess,
        id_provider: Arc<dyn LatestEventIdProvider>,
        config: EventEngineConfig,
    ) -> Self {
        let scopes: ScopeTable = Arc::new(Mutex::new(HashMap::new()));
        Self {
            runner: ScopeRunner {
                access,
                id_provider,
                config,
                scopes: Arc::clone(&scopes),
            },
            scopes,
            next_listener_id: AtomicU64::new(0),
        }
    }

    /// Subscribe to one scope's tree events, starting its poller when it is
    /// the scope's first subscription.
    pub fn subscribe_to_tree_events(
        &self,
        scope: ScopeId,
        listener: Arc<dyn TreeEventListener>,
    ) -> TreeEventSubscription {
        let scope_key = scope.to_string();
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);

        let mut scopes = self.scopes.lock();
        match scopes.get(&scope_key) {
            Some(state) => {
                state.listeners.lock().push((id, listener));
            }
            None => {
                let listeners: ListenerTable = Arc::new(Mutex::new(vec![(id, listener)]));
                let (cancel_tx, cancel_rx) = watch::channel(false);
                scopes.insert(
                    scope_key.clone(),
                    ScopeState {
                        listeners: Arc::clone(&listeners),
                        cancel: cancel_tx,
                    },
                );
                let runner = self.runner.clone();
                tokio::spawn(runner.run_scope(scope, listeners, cancel_rx));
            }
        }

        TreeEventSubscription {
            scopes: Arc::downgrade(&self.scopes),
            scope_key,
            id,
        }
    }

    /// Subscribe to the account-wide core scope.
    pub fn subscribe_to_drive_events(
        &self,
        listener: Arc<dyn TreeEventListener>,
    ) -> TreeEventSubscription {
        self.subscribe_to_tree_events(ScopeId::Core, listener)
    }
}

impl ScopeRunner {
    fn remove_scope(&self, scope_key: &str) {
        if let Some(state) = self.scopes.lock().remove(scope_key) {
            let _ = state.cancel.send(true);
        }
    }

    async fn run_scope(
        self,
        scope: ScopeId,
        listeners: ListenerTable,
        mut cancel: watch::Receiver<bool>,
    ) {
        let scope_key = scope.to_string();
        let abort = AbortSignal::none();
        debug!(scope = %scope_key, "event poller starting");

        // Resolve the starting cursor: persisted, or the server's head.
        let mut cursor = match self.id_provider.latest_event_id(&scope).await {
            Some(cursor) => cursor,
            None => loop {
                if *cancel.borrow() {
                    return;
                }
                match self
                    .access
                    .api()
                    .get_json::<LatestEventResponse>(&scope.latest_path(), &abort)
                    .await
                {
                    Ok(latest) => break latest.event_id,
                    Err(err) => {
                        warn!(scope = %scope_key, %err, "latest cursor fetch failed");
                        if self.pause(self.config.poll_interval, &mut cancel).await {
                            return;
                        }
                    }
                }
            },
        };

        let foreign = match &scope {
            ScopeId::Core => false,
            ScopeId::Volume(volume_id) => self
                .access
                .shares()
                .get_my_files_ids(&abort)
                .await
                .map(|ids| ids.volume_id != *volume_id)
                .unwrap_or(true),
        };
        let base_interval = if foreign {
            self.config.foreign_poll_interval
        } else {
            self.config.poll_interval
        };
        let mut interval = base_interval;

        loop {
            if *cancel.borrow() {
                break;
            }

            match self
                .access
                .api()
                .get_json::<EventsResponse>(&scope.events_path(&cursor), &abort)
                .await
            {
                Ok(page) => {
                    let advanced = page.event_id != cursor;
                    let fast_forward = advanced && page.events.is_empty() && !page.refresh;

                    if page.refresh {
                        let event = DriveEvent::TreeRefresh {
                            scope: scope.clone(),
                        };
                        self.deliver(&listeners, &event).await;
                    }
                    for dto in &page.events {
                        if let Some(event) = convert_event(dto, &scope) {
                            self.apply_to_cache(&event).await;
                            self.deliver(&listeners, &event).await;
                        }
                    }
                    if fast_forward {
                        // Cursor-only advance; no cached state is touched.
                        let event = DriveEvent::FastForward {
                            scope: scope.clone(),
                        };
                        self.deliver(&listeners, &event).await;
                    }
                    if advanced {
                        cursor = page.event_id.clone();
                        self.id_provider.set_latest_event_id(&scope, &cursor).await;
                    }

                    if page.more {
                        continue;
                    }
                    interval = if !page.events.is_empty() || !foreign {
                        base_interval
                    } else {
                        // Degrade the cadence of idle foreign volumes.
                        (interval * 2).min(self.config.max_poll_interval)
                    };
                }
                Err(DriveError::NotFound { .. }) => {
                    let event = DriveEvent::TreeRemove {
                        scope: scope.clone(),
                    };
                    self.deliver(&listeners, &event).await;
                    self.remove_scope(&scope_key);
                    break;
                }
                Err(DriveError::Aborted) => break,
                Err(err) => {
                    warn!(scope = %scope_key, %err, "event poll failed");
                    interval = (interval * 2).min(self.config.max_poll_interval);
                }
            }

            if self.pause(jittered(interval), &mut cancel).await {
                break;
            }
        }
        debug!(scope = %scope_key, "event poller stopped");
    }

    /// Sleep, waking early on cancellation. Returns `true` when cancelled.
    async fn pause(&self, delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            () = tokio::time::sleep(delay) => *cancel.borrow(),
            _ = cancel.changed() => *cancel.borrow(),
        }
    }

    async fn deliver(&self, listeners: &ListenerTable, event: &DriveEvent) {
        let snapshot: Vec<Arc<dyn TreeEventListener>> = listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            if let Err(err) = listener.on_event(event).await {
                warn!(%err, "event listener failed");
            }
        }
    }

    async fn apply_to_cache(&self, event: &DriveEvent) {
        match event {
            DriveEvent::NodeCreated { uid, .. } => {
                self.access.mark_stale(uid).await;
            }
            DriveEvent::NodeUpdated {
                uid, is_trashed, ..
            } => {
                if *is_trashed {
                    self.access.evict(uid).await;
                } else {
                    self.access.mark_stale(uid).await;
                }
            }
            DriveEvent::NodeDeleted { uid, .. } => {
                self.access.evict(uid).await;
            }
            DriveEvent::SharedWithMeUpdated => {
                self.access.shares().invalidate_shared_with_me().await;
            }
            DriveEvent::TreeRefresh { .. }
            | DriveEvent::TreeRemove { .. }
            | DriveEvent::FastForward { .. } => {}
        }
    }
}

fn convert_event(dto: &EventDto, scope: &ScopeId) -> Option<DriveEvent> {
    if dto.event_type == EVENT_TYPE_SHARED_WITH_ME {
        return matches!(scope, ScopeId::Core).then_some(DriveEvent::SharedWithMeUpdated);
    }

    let ScopeId::Volume(volume_id) = scope else {
        return None;
    };
    let link = dto.link.as_ref()?;
    let uid = NodeUid::new(volume_id.clone(), link.link_id.clone());
    let parent_uid = link
        .parent_link_id
        .clone()
        .map(|parent| NodeUid::new(volume_id.clone(), parent));

    match dto.event_type {
        EVENT_TYPE_CREATE => Some(DriveEvent::NodeCreated {
            uid,
            parent_uid,
            is_trashed: link.is_trashed,
            is_shared: link.is_shared,
        }),
        EVENT_TYPE_UPDATE => Some(DriveEvent::NodeUpdated {
            uid,
            parent_uid,
            is_trashed: link.is_trashed,
            is_shared: link.is_shared,
        }),
        EVENT_TYPE_DELETE => Some(DriveEvent::NodeDeleted { uid, parent_uid }),
        _ => None,
    }
}

/// Per-subscription jitter keeps a fleet of clients from polling in phase.
fn jittered(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9f64..1.1f64);
    base.mul_f64(factor)
}

/// Handle keeping one listener subscribed. Dropping it unsubscribes; the
/// last unsubscribe of a scope stops its poller after the current page.
pub struct TreeEventSubscription {
    scopes: Weak<Mutex<HashMap<String, ScopeState>>>,
    scope_key: String,
    id: u64,
}

impl Drop for TreeEventSubscription {
    fn drop(&mut self) {
        let Some(scopes) = self.scopes.upgrade() else {
            return;
        };
        let mut scopes = scopes.lock();
        let Some(state) = scopes.get(&self.scope_key) else {
            return;
        };
        let mut listeners = state.listeners.lock();
        listeners.retain(|(listener_id, _)| *listener_id != self.id);
        let empty = listeners.is_empty();
        drop(listeners);
        if empty {
            // Stop polling after the current page.
            let _ = state.cancel.send(true);
            scopes.remove(&self.scope_key);
        }
    }
}
