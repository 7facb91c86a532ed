//! Typed HTTP client for the Drive API
//!
//! Wraps the host-supplied fetcher with the Drive request conventions:
//! envelope decoding, the retry matrix, two process-wide circuit breakers,
//! SDK event emission, and the credential-less blob transports used for
//! block transfers.

pub mod breaker;
pub mod client;
pub mod envelope;
pub mod retry;

pub use breaker::CircuitBreaker;
pub use client::ApiClient;
pub use envelope::{ApiEnvelope, CODE_NOT_FOUND, CODE_OK, CODE_OK_ASYNC, CODE_OK_MANY};
