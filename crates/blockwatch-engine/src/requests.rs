//! Request write path: registration, deletion, wipe.

use crate::engine::WatchEngine;
use crate::Result;
use blockwatch_primitives::RequestId;
use blockwatch_store::{outpoint_key, OutpointRecord, Request, ScriptRecord, StoreBatch};
use std::time::{SystemTime, UNIX_EPOCH};

impl WatchEngine {
    /// Persists a request atomically with its derived index entries and
    /// returns the stored request together with the merged reverse-index
    /// records.
    ///
    /// The timestamp is assigned here; any value on the way in is ignored.
    /// A request with an id that already exists overwrites the stored one.
    /// The filter is updated only after the batch commits, so there is a
    /// brief window in which a just-persisted request can miss a block;
    /// rescan is the prescribed repair.
    pub fn add_request(
        &self,
        mut req: Request,
    ) -> Result<(Request, Option<OutpointRecord>, Option<ScriptRecord>)> {
        let _guard = self.write_lock.lock();

        req.timestamp = unix_time();
        let mut batch = StoreBatch::default();
        self.store().put_request(&mut batch, &req);

        let outpoint_rec = match req.spends {
            Some(prevout) => Some(
                self.store()
                    .put_outpoint(&mut batch, &OutpointRecord::new(prevout, req.id))?,
            ),
            None => None,
        };
        let script_rec = match &req.pays {
            Some(script) => Some(
                self.store()
                    .put_script(&mut batch, &ScriptRecord::new(script.clone(), req.id))?,
            ),
            None => None,
        };

        self.store().commit(batch)?;

        if let Some(prevout) = &req.spends {
            self.filter_insert(&outpoint_key(prevout));
        }
        if let Some(script) = &req.pays {
            self.filter_insert(script.as_bytes());
        }

        tracing::info!(
            id = %req.id,
            spends = req.spends.is_some(),
            pays = req.pays.is_some(),
            "registered watch request"
        );

        Ok((req, outpoint_rec, script_rec))
    }

    /// Removes a request row, returning whether it existed.
    ///
    /// Reverse-index entries keep referencing the id; stale references are
    /// harmless to the scan path and disappear on wipe.
    pub fn delete_request(&self, id: &RequestId) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let existed = self.store().delete_request(id)?;
        if existed {
            tracing::info!(%id, "deleted watch request");
        }
        Ok(existed)
    }

    /// Deletes every record row in one batch, returning the number of
    /// deleted keys.
    ///
    /// The in-memory filter is left stale; call [`WatchEngine::open`] (or
    /// restart) to rebuild it before further ingest.
    pub fn wipe(&self) -> Result<usize> {
        let _guard = self.write_lock.lock();
        Ok(self.store().wipe()?)
    }
}

fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
