//! Deterministic test doubles for the Drive SDK
//!
//! Everything here is seeded and reproducible: the mock OpenPGP provider
//! produces stable key material and reversible "encryption" so tests can
//! build encrypted fixtures through the same façade the production code
//! uses, then decrypt and assert on them.

pub mod account;
pub mod cache;
pub mod fetcher;
pub mod pgp;
pub mod telemetry;
pub mod world;

pub use account::MockAccountProvider;
pub use cache::MemoryCache;
pub use fetcher::{json_ok, ScriptedFetcher};
pub use pgp::MockPgpProvider;
pub use telemetry::RecordingTelemetry;
pub use world::{DriveWorld, FixtureKeys};
