//! Per-block scanning against the subscription indices.

use crate::notify::{NotificationHub, SatisfiedEvent, WatchEvent};
use crate::{Error, Result};
use bitcoin::{Block, OutPoint};
use blockwatch_filter::{FilterParams, WatchFilter};
use blockwatch_primitives::{BlockIndexer, BlockMeta, RequestId};
use blockwatch_store::{outpoint_key, script_hash, SpendUndo, StoreBatch, WatchStore};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

/// Match engine over a [`WatchStore`].
///
/// Writers (request registration, block ingest, wipe) serialize on a
/// process-wide lock; reads run lock-free against the store. The Bloom
/// filter is updated only after the corresponding records are durably
/// committed, so it never advertises a record that is not on disk.
pub struct WatchEngine {
    store: Arc<WatchStore>,
    filter: RwLock<WatchFilter>,
    filter_params: FilterParams,
    hub: NotificationHub,
    pub(crate) write_lock: Mutex<()>,
    pub(crate) rescan_abort: AtomicBool,
}

impl WatchEngine {
    /// Creates an engine over `store` with a filter sized by `params`.
    ///
    /// The filter starts empty; call [`WatchEngine::open`] to populate it
    /// from the persisted indices.
    pub fn new(store: Arc<WatchStore>, params: FilterParams) -> Self {
        Self {
            store,
            filter: RwLock::new(WatchFilter::new(params)),
            filter_params: params,
            hub: NotificationHub::default(),
            write_lock: Mutex::new(()),
            rescan_abort: AtomicBool::new(false),
        }
    }

    /// Rebuilds the Bloom filter from every persisted script and outpoint
    /// record. Required on startup and after [`WatchEngine::wipe`].
    pub fn open(&self) -> Result<()> {
        let started = Instant::now();
        let _guard = self.write_lock.lock();

        let scripts = self.store.scripts()?;
        let outpoints = self.store.outpoints()?;

        let mut filter = WatchFilter::new(self.filter_params);
        for rec in &scripts {
            filter.insert(rec.script.as_bytes());
        }
        for rec in &outpoints {
            filter.insert(&outpoint_key(&rec.prevout));
        }
        let items = filter.len();
        *self.filter.write() = filter;

        tracing::info!(
            scripts = scripts.len(),
            outpoints = outpoints.len(),
            items,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rebuilt watch filter"
        );

        Ok(())
    }

    /// The underlying store.
    pub fn store(&self) -> &WatchStore {
        &self.store
    }

    /// The notification hub for this engine's relay topic.
    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    /// Tests an item against the in-memory filter.
    pub fn filter_contains(&self, item: &[u8]) -> bool {
        self.filter.read().contains(item)
    }

    pub(crate) fn filter_insert(&self, item: &[u8]) {
        self.filter.write().insert(item);
    }

    /// Scans a connected block: emits satisfied events and persists spend
    /// evidence plus its undo row.
    pub fn scan_block(&self, meta: &BlockMeta, block: &Block) -> Result<()> {
        self.scan_block_inner(meta, block, None, true)
    }

    /// Scans a block with a caller-supplied membership predicate instead of
    /// the engine filter. Used by targeted rescans; no undo row is written.
    pub(crate) fn scan_block_with(
        &self,
        meta: &BlockMeta,
        block: &Block,
        has: &dyn Fn(&[u8]) -> bool,
    ) -> Result<()> {
        self.scan_block_inner(meta, block, Some(has), false)
    }

    fn scan_block_inner(
        &self,
        meta: &BlockMeta,
        block: &Block,
        has: Option<&dyn Fn(&[u8]) -> bool>,
        persist_undo: bool,
    ) -> Result<()> {
        let mut spends: Vec<(OutPoint, OutPoint)> = Vec::new();

        for tx in &block.txdata {
            let txid = tx.compute_txid();
            let mut satisfied: BTreeSet<RequestId> = BTreeSet::new();

            // Inputs first: does this transaction spend a watched outpoint?
            for (vin, input) in tx.input.iter().enumerate() {
                let prevout = input.previous_output;
                let key = outpoint_key(&prevout);
                let hit = match has {
                    Some(f) => f(&key),
                    None => self.filter.read().contains(&key),
                };
                if !hit {
                    continue;
                }

                match self.store.get_outpoint(&prevout) {
                    Ok(Some(rec)) => {
                        if rec.requests.is_empty() {
                            tracing::warn!(%prevout, "outpoint record with empty request set");
                            continue;
                        }
                        satisfied.extend(rec.requests.iter().copied());
                        spends.push((
                            prevout,
                            OutPoint {
                                txid,
                                vout: vin as u32,
                            },
                        ));
                    }
                    // Filter false positive.
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(%prevout, error = %e, "skipping unreadable outpoint record");
                    }
                }
            }

            // Then outputs: does this transaction create a watched script?
            for output in &tx.output {
                let script = &output.script_pubkey;
                let hit = match has {
                    Some(f) => f(script.as_bytes()),
                    None => self.filter.read().contains(script.as_bytes()),
                };
                if !hit {
                    continue;
                }

                let hash = script_hash(script);
                match self.store.get_script(&hash) {
                    Ok(Some(rec)) => {
                        if rec.requests.is_empty() {
                            tracing::warn!(hash = %hex_fmt(&hash), "script record with empty request set");
                            continue;
                        }
                        satisfied.extend(rec.requests.iter().copied());
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(hash = %hex_fmt(&hash), error = %e, "skipping unreadable script record");
                    }
                }
            }

            if !satisfied.is_empty() {
                let event = SatisfiedEvent {
                    txid,
                    height: meta.height,
                    satisfied: satisfied.into_iter().collect(),
                };
                tracing::debug!(
                    %txid,
                    height = meta.height,
                    requests = event.satisfied.len(),
                    "requests satisfied"
                );
                self.hub.publish(WatchEvent::RequestsSatisfied(event));
            }
        }

        if !spends.is_empty() {
            self.record_spends(meta, &spends, persist_undo)?;
        }

        Ok(())
    }

    /// Commits nextout evidence for the watched outpoints spent in a block,
    /// together with an undo row when requested.
    fn record_spends(
        &self,
        meta: &BlockMeta,
        spends: &[(OutPoint, OutPoint)],
        persist_undo: bool,
    ) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut batch = StoreBatch::default();
        let mut undo = SpendUndo::new();

        for (prevout, nextout) in spends {
            if let Some(prior) = self.store.set_nextout(&mut batch, prevout, *nextout)? {
                undo.record(*prevout, prior);
            }
        }
        if persist_undo && !undo.is_empty() {
            self.store.put_undo(&mut batch, meta.height, &undo);
        }
        if !batch.is_empty() {
            self.store.commit(batch)?;
            tracing::debug!(block = %meta, spends = undo.entries.len(), "recorded spend evidence");
        }

        Ok(())
    }

    /// Unwinds the spend evidence recorded when `meta` was connected.
    ///
    /// Events delivered while the block was on the main chain are not
    /// retracted; a later block independently satisfying a request emits
    /// normally.
    pub fn unindex_block(&self, meta: &BlockMeta) -> Result<()> {
        let _guard = self.write_lock.lock();

        let Some(undo) = self.store.get_undo(meta.height)? else {
            tracing::debug!(block = %meta, "no spend evidence recorded for disconnected block");
            return Ok(());
        };

        let mut batch = StoreBatch::default();
        for (prevout, prior) in &undo.entries {
            self.store.set_nextout(&mut batch, prevout, *prior)?;
        }
        self.store.delete_undo(&mut batch, meta.height);
        self.store.commit(batch)?;

        tracing::info!(
            block = %meta,
            restored = undo.entries.len(),
            "unwound spend evidence for disconnected block"
        );
        Ok(())
    }
}

impl BlockIndexer for WatchEngine {
    type Error = Error;

    fn on_block_connect(&self, meta: &BlockMeta, block: &Block) -> Result<()> {
        self.scan_block(meta, block)
    }

    fn on_block_disconnect(&self, meta: &BlockMeta, _block: &Block) -> Result<()> {
        self.unindex_block(meta)
    }
}

fn hex_fmt(bytes: &[u8; 32]) -> String {
    hex::encode(bytes)
}
