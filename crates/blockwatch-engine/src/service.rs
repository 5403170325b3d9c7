//! Live ingest loop driven by the host node's chain events.

use crate::engine::WatchEngine;
use blockwatch_primitives::{BlockEvents, BlockIndexer, ChainEvent, ChainView};
use futures::StreamExt;
use std::sync::Arc;

/// Drives a [`WatchEngine`] from a chain's connect/disconnect stream.
pub struct WatchService<C> {
    engine: Arc<WatchEngine>,
    chain: Arc<C>,
}

impl<C> WatchService<C>
where
    C: ChainView + BlockEvents + Send + Sync + 'static,
{
    /// Creates a service over an engine and its chain.
    pub fn new(engine: Arc<WatchEngine>, chain: Arc<C>) -> Self {
        Self { engine, chain }
    }

    /// Rebuilds the filter, then processes chain events until the stream
    /// ends.
    ///
    /// Per-block failures are logged and skipped so one bad block cannot
    /// halt ingest; an engine that fails to open does not run.
    pub async fn run(self) {
        if let Err(e) = self.engine.open() {
            tracing::error!(error = %e, "failed to open watch engine, service will not run");
            return;
        }

        let mut events = self.chain.block_event_stream();
        tracing::info!(tip = %self.chain.tip(), "watch service started");

        while let Some(event) = events.next().await {
            match event {
                ChainEvent::Connected { meta, block } => {
                    if let Err(e) = self.engine.on_block_connect(&meta, &block) {
                        tracing::error!(block = %meta, error = %e, "failed to process connected block");
                    }
                }
                ChainEvent::Disconnected { meta, block } => {
                    if let Err(e) = self.engine.on_block_disconnect(&meta, &block) {
                        tracing::error!(block = %meta, error = %e, "failed to process disconnected block");
                    }
                }
            }
        }

        tracing::info!("chain event stream ended, watch service stopping");
    }
}
