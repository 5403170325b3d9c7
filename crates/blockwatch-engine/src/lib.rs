//! Subscription match engine for blockwatch.
//!
//! The engine scans every transaction of every connected block against the
//! persisted subscription indices, pre-filtered by an in-memory Bloom
//! filter, and fans out "requests satisfied" events to subscribed clients.
//! A rescan driver replays historical blocks through the same pipeline.

mod engine;
mod notify;
mod requests;
mod rescan;
mod service;

pub use engine::WatchEngine;
pub use notify::{
    EventSubscription, NotificationHub, SatisfiedEvent, WatchEvent, DEFAULT_CHANNEL_CAPACITY,
};
pub use service::WatchService;

/// Errors surfaced by the engine's write paths.
///
/// Read-side failures on the block-scan hot path are logged and treated as
/// filter false positives instead of being propagated, so a single bad
/// record cannot halt ingest.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Storage failure.
    #[error(transparent)]
    Store(#[from] blockwatch_store::Error),

    /// Request failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] blockwatch_store::InvalidRequest),

    /// The chain view has no block at the requested height.
    #[error("no block at height {0}")]
    BlockNotFound(u32),
}

/// Engine result type.
pub type Result<T> = std::result::Result<T, Error>;
