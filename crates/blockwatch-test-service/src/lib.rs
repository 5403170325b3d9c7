//! Deterministic chain scaffolding for blockwatch tests.
//!
//! [`MockChain`] implements the consumed chain interfaces over an in-memory
//! block list; the builder functions construct minimal blocks and
//! transactions without touching consensus rules.

use bitcoin::absolute::LockTime;
use bitcoin::blockdata::block::{Header, Version as BlockVersion};
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version as TxVersion;
use bitcoin::{
    Amount, Block, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
    TxMerkleNode, TxOut, Witness,
};
use blockwatch_primitives::{BlockEvents, BlockMeta, ChainEvent, ChainView};
use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};

/// In-memory main chain: a growable block list plus live event delivery.
#[derive(Default)]
pub struct MockChain {
    blocks: RwLock<Vec<Block>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ChainEvent>>>,
}

impl MockChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a block to the tip and notifies subscribers.
    pub fn push_block(&self, block: Block) -> BlockMeta {
        let meta = {
            let mut blocks = self.blocks.write();
            blocks.push(block.clone());
            BlockMeta {
                height: (blocks.len() - 1) as u32,
                hash: block.block_hash(),
            }
        };
        self.broadcast(ChainEvent::Connected {
            meta,
            block,
        });
        meta
    }

    /// Removes the tip block and notifies subscribers, simulating a reorg.
    pub fn disconnect_tip(&self) -> Option<(BlockMeta, Block)> {
        let popped = {
            let mut blocks = self.blocks.write();
            let block = blocks.pop()?;
            let meta = BlockMeta {
                height: blocks.len() as u32,
                hash: block.block_hash(),
            };
            (meta, block)
        };
        self.broadcast(ChainEvent::Disconnected {
            meta: popped.0,
            block: popped.1.clone(),
        });
        Some(popped)
    }

    fn broadcast(&self, event: ChainEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }
}

impl ChainView for MockChain {
    fn tip(&self) -> BlockMeta {
        let blocks = self.blocks.read();
        match blocks.last() {
            Some(block) => BlockMeta {
                height: (blocks.len() - 1) as u32,
                hash: block.block_hash(),
            },
            None => BlockMeta::default(),
        }
    }

    fn block_hash_at(&self, height: u32) -> Option<BlockHash> {
        self.blocks
            .read()
            .get(height as usize)
            .map(|b| b.block_hash())
    }

    fn block_at(&self, height: u32) -> Option<Block> {
        self.blocks.read().get(height as usize).cloned()
    }

    fn entry(&self, hash: &BlockHash) -> Option<BlockMeta> {
        self.blocks
            .read()
            .iter()
            .enumerate()
            .find(|(_, block)| block.block_hash() == *hash)
            .map(|(height, _)| BlockMeta {
                height: height as u32,
                hash: *hash,
            })
    }
}

impl BlockEvents for MockChain {
    fn block_event_stream(&self) -> BoxStream<'static, ChainEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().push(tx);
        rx.boxed()
    }
}

/// Builds a block holding `txs`, with `nonce` varying the header hash.
pub fn build_block(nonce: u32, txs: Vec<Transaction>) -> Block {
    Block {
        header: Header {
            version: BlockVersion::TWO,
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::all_zeros(),
            time: 0,
            bits: CompactTarget::from_consensus(0x207f_ffff),
            nonce,
        },
        txdata: txs,
    }
}

/// Builds a transaction spending `prevout` into one output carrying
/// `script_pubkey`.
pub fn spend_tx(prevout: OutPoint, script_pubkey: ScriptBuf, value: u64) -> Transaction {
    Transaction {
        version: TxVersion::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: prevout,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey,
        }],
    }
}

/// An arbitrary funding outpoint, unique per `(byte, vout)`.
pub fn funding_outpoint(byte: u8, vout: u32) -> OutPoint {
    OutPoint {
        txid: bitcoin::Txid::from_byte_array([byte; 32]),
        vout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_query() {
        let chain = MockChain::new();
        assert_eq!(chain.tip().height, 0);

        let block = build_block(1, vec![spend_tx(funding_outpoint(1, 0), ScriptBuf::new(), 1)]);
        let meta = chain.push_block(block.clone());

        assert_eq!(meta.height, 0);
        assert_eq!(chain.tip(), meta);
        assert_eq!(chain.block_at(0).unwrap().block_hash(), meta.hash);
        assert_eq!(chain.block_hash_at(0), Some(meta.hash));
        assert_eq!(chain.entry(&meta.hash), Some(meta));
        assert_eq!(chain.block_at(1), None);
    }

    #[test]
    fn disconnect_pops_tip() {
        let chain = MockChain::new();
        let meta = chain.push_block(build_block(1, vec![]));

        let (popped, _) = chain.disconnect_tip().unwrap();
        assert_eq!(popped, meta);
        assert!(chain.disconnect_tip().is_none());
    }
}
