//! Tree event polling
//!
//! One cooperative poller per subscribed scope: the account-wide `core`
//! scope plus one per volume the user participates in. Each poller keeps a
//! server cursor (persisted through a pluggable provider), applies cache
//! invalidation before fan-out, and delivers events to listeners serially.
//! Listener failures are logged and skipped; they never stop the engine.

pub mod dto;
pub mod engine;

pub use dto::{DriveEvent, ScopeId};
pub use engine::{
    EventEngine, EventEngineConfig, InMemoryEventIdProvider, LatestEventIdProvider,
    TreeEventListener, TreeEventSubscription,
};
