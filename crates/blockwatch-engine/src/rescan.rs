//! Rescan driver: replays historical blocks through the scan pipeline.

use crate::engine::WatchEngine;
use crate::{Error, Result};
use blockwatch_primitives::{BlockMeta, ChainView};
use std::sync::atomic::Ordering;

impl WatchEngine {
    /// Replays `from_height ..= tip` through the match engine using the
    /// engine's own filter. Returns the number of blocks scanned.
    pub fn rescan<C: ChainView + ?Sized>(&self, chain: &C, from_height: u32) -> Result<u32> {
        self.rescan_with(chain, from_height, |item| self.filter_contains(item))
    }

    /// Replays `from_height ..= tip` with a caller-supplied membership
    /// predicate in place of the filter.
    ///
    /// Registering a request against old history uses this to target only
    /// the new request's keys, so historical matches of unrelated requests
    /// are not re-announced.
    pub fn rescan_with<C: ChainView + ?Sized>(
        &self,
        chain: &C,
        from_height: u32,
        has: impl Fn(&[u8]) -> bool,
    ) -> Result<u32> {
        self.rescan_abort.store(false, Ordering::SeqCst);

        let tip = chain.tip();
        tracing::info!(from_height, tip_height = tip.height, "starting rescan");

        let mut scanned = 0u32;
        for height in from_height..=tip.height {
            if self.rescan_abort.load(Ordering::SeqCst) {
                tracing::info!(height, scanned, "rescan cancelled");
                break;
            }

            let block = chain.block_at(height).ok_or(Error::BlockNotFound(height))?;
            let meta = BlockMeta {
                height,
                hash: block.block_hash(),
            };
            self.scan_block_with(&meta, &block, &has)?;
            scanned += 1;
        }

        tracing::info!(from_height, scanned, "rescan complete");
        Ok(scanned)
    }

    /// Requests cancellation of an in-flight rescan at the next block
    /// boundary.
    pub fn cancel_rescan(&self) {
        self.rescan_abort.store(true, Ordering::SeqCst);
    }
}
