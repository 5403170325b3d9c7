//! Primitives shared across the blockwatch services.

use bitcoin::hashes::Hash;
use bitcoin::{Block, BlockHash};
use futures::stream::BoxStream;

/// Consensus cap on the size of a scriptPubKey, in bytes.
///
/// Subscriptions referencing a larger script are rejected up front.
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Client-chosen 32-byte identifier of a subscription request.
///
/// The bytes are opaque to the engine and stored in canonical order.
/// [`std::fmt::Display`] and [`RequestId::from_hex`] use the reversed
/// ("display-endian") hex convention that Bitcoin applies to 32-byte ids
/// on the wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId([u8; 32]);

impl RequestId {
    /// Wraps raw id bytes in canonical order.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the id bytes in canonical order.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parses a display-endian hex string.
    pub fn from_hex(s: &str) -> Result<Self, ParseIdError> {
        let raw = hex::decode(s).map_err(|_| ParseIdError)?;
        let mut bytes: [u8; 32] = raw.try_into().map_err(|_| ParseIdError)?;
        bytes.reverse();
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut bytes = self.0;
        bytes.reverse();
        f.write_str(&hex::encode(bytes))
    }
}

impl std::fmt::Debug for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RequestId({self})")
    }
}

/// Error returned when a request id is not 32 bytes of hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseIdError;

impl std::fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("request id must be 32 bytes of hex")
    }
}

impl std::error::Error for ParseIdError {}

/// Identifies a block on the main chain by its height and hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMeta {
    /// Block height.
    pub height: u32,
    /// Block hash.
    pub hash: BlockHash,
}

impl std::fmt::Display for BlockMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{},{}", self.height, self.hash)
    }
}

impl Default for BlockMeta {
    fn default() -> Self {
        Self {
            height: 0,
            hash: BlockHash::all_zeros(),
        }
    }
}

/// Read-only view of the host node's main chain.
///
/// All calls are synchronous and cheap; the chain is owned by the host node
/// and treated as thread-safe from this system's perspective.
pub trait ChainView: Send + Sync {
    /// Returns the current chain tip.
    fn tip(&self) -> BlockMeta;

    /// Returns the hash of the main-chain block at the given height.
    fn block_hash_at(&self, height: u32) -> Option<BlockHash>;

    /// Returns the main-chain block at the given height.
    fn block_at(&self, height: u32) -> Option<Block>;

    /// Returns the chain entry for the given block hash, if on the main chain.
    fn entry(&self, hash: &BlockHash) -> Option<BlockMeta>;
}

/// A main-chain update delivered by the host node.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// A block was connected to the main chain.
    Connected {
        /// Height and hash of the connected block.
        meta: BlockMeta,
        /// The connected block.
        block: Block,
    },
    /// A block was disconnected during a reorganization.
    Disconnected {
        /// Height and hash of the disconnected block.
        meta: BlockMeta,
        /// The disconnected block.
        block: Block,
    },
}

/// Source of live chain connect/disconnect notifications.
pub trait BlockEvents {
    /// Returns a stream of chain events, starting from the moment of the call.
    fn block_event_stream(&self) -> BoxStream<'static, ChainEvent>;
}

/// An indexer driven by chain connect/disconnect events.
pub trait BlockIndexer {
    /// Error produced by the indexer.
    type Error: std::error::Error;

    /// Processes a newly connected main-chain block.
    fn on_block_connect(&self, meta: &BlockMeta, block: &Block) -> Result<(), Self::Error>;

    /// Undoes the effects of a block disconnected during a reorg.
    fn on_block_disconnect(&self, meta: &BlockMeta, block: &Block) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_hex_roundtrip() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        bytes[31] = 0x01;
        let id = RequestId::from_bytes(bytes);

        let display = id.to_string();
        assert!(display.starts_with("01"), "display form is byte-reversed");
        assert!(display.ends_with("ab"));

        let parsed = RequestId::from_hex(&display).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn request_id_rejects_bad_hex() {
        assert!(RequestId::from_hex("zz").is_err());
        assert!(RequestId::from_hex("0011").is_err());
    }

    #[test]
    fn block_meta_display() {
        let meta = BlockMeta::default();
        assert!(meta.to_string().starts_with("#0,"));
    }
}
