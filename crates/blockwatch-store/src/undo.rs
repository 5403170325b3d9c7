//! Per-block undo data for spend evidence.
//!
//! When a connected block marks watched outpoints as spent, the prior
//! `nextout` value of each touched record is saved under the block's
//! height. Disconnecting the block during a reorg restores those values.

use serde::{Deserialize, Serialize};

use bitcoin::OutPoint;

/// Undo data for one block's spend-evidence updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpendUndo {
    /// `(watched outpoint, nextout value before this block)` pairs.
    pub entries: Vec<(OutPoint, OutPoint)>,
}

impl SpendUndo {
    /// Creates empty undo data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the prior nextout of a watched outpoint.
    pub fn record(&mut self, prevout: OutPoint, prior_nextout: OutPoint) {
        self.entries.push((prevout, prior_nextout));
    }

    /// Whether any updates were recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes to bytes for storage.
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("SpendUndo serialization should not fail")
    }

    /// Deserializes from stored bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::zero_outpoint;
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;

    #[test]
    fn spend_undo_roundtrip() {
        let mut undo = SpendUndo::new();
        let prevout = OutPoint {
            txid: Txid::from_byte_array([3u8; 32]),
            vout: 1,
        };
        undo.record(prevout, zero_outpoint());
        assert!(!undo.is_empty());

        let decoded = SpendUndo::decode(&undo.encode()).unwrap();
        assert_eq!(decoded.entries, undo.entries);
    }
}
