//! Persistent multi-index storage for blockwatch subscriptions.
//!
//! One ordered key-value space, shared with the host node's indexer
//! namespace, holds three record families plus bookkeeping rows:
//!
//! | Prefix | Key | Value |
//! |--------|-----|-------|
//! | `s` | 32-byte script SHA-256 | [`ScriptRecord`] |
//! | `o` | 32-byte txid ++ u32 big-endian index | [`OutpointRecord`] |
//! | `i` | 32-byte request id | [`Request`] |
//! | `V` | — | schema version |
//! | `u` | u32 big-endian height | per-block spend-evidence undo data |
//!
//! The big-endian outpoint index keeps the `o` range sorted by `(txid, vout)`.

mod db;
mod records;
mod store;
mod undo;

pub use db::{Database, StoreBatch};
pub use records::{
    outpoint_key, script_hash, zero_outpoint, InvalidRequest, OutpointRecord, Request,
    ScriptRecord,
};
pub use store::WatchStore;
pub use undo::SpendUndo;

/// Current on-disk schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Single-byte key prefixes of the shared indexer key space.
pub mod keys {
    /// Script hash -> [`crate::ScriptRecord`].
    pub const SCRIPT: u8 = b's';
    /// Outpoint -> [`crate::OutpointRecord`].
    pub const OUTPOINT: u8 = b'o';
    /// Request id -> [`crate::Request`].
    pub const REQUEST: u8 = b'i';
    /// Schema version row.
    pub const VERSION: u8 = b'V';
    /// Height -> spend-evidence undo data.
    pub const UNDO: u8 = b'u';
}

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// RocksDB error.
    #[error("rocksdb error: {0}")]
    Rocksdb(#[from] rocksdb::Error),

    /// A stored record failed to decode.
    #[error("codec error: {0}")]
    Codec(String),

    /// Undo-row serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The on-disk schema is newer than this build understands.
    #[error("schema version mismatch: on-disk {on_disk}, supported {supported}")]
    SchemaVersion {
        /// Version found in the store.
        on_disk: u32,
        /// Version this build writes.
        supported: u32,
    },
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Store result type.
pub type Result<T> = std::result::Result<T, Error>;
