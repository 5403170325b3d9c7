//! Typed index accessors over the shared key space.

use crate::records::{key_to_outpoint, outpoint_key, OutpointRecord, Request, ScriptRecord};
use crate::undo::SpendUndo;
use crate::{keys, Database, Error, Result, StoreBatch, SCHEMA_VERSION};
use bitcoin::OutPoint;
use blockwatch_primitives::RequestId;
use std::path::Path;

/// Persistent multi-index store for subscription requests.
///
/// `put_script` and `put_outpoint` have union semantics: writing a record
/// whose key already exists extends the stored request set instead of
/// replacing it, and re-writing the same `(key, id)` pair is idempotent.
#[derive(Debug)]
pub struct WatchStore {
    db: Database,
}

impl WatchStore {
    /// Opens (or creates) the store at the given path and verifies the
    /// schema version.
    pub fn open(path: &Path) -> Result<Self> {
        let store = Self {
            db: Database::open(path)?,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Opens an empty in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            db: Database::open_in_memory(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        match self.db.get(&[keys::VERSION])? {
            Some(bytes) if bytes.len() == 4 => {
                let on_disk = u32::from_le_bytes(bytes.try_into().expect("length checked"));
                if on_disk > SCHEMA_VERSION {
                    return Err(Error::SchemaVersion {
                        on_disk,
                        supported: SCHEMA_VERSION,
                    });
                }
                Ok(())
            }
            Some(bytes) => Err(Error::Codec(format!(
                "schema version row has {} bytes",
                bytes.len()
            ))),
            None => {
                tracing::debug!(version = SCHEMA_VERSION, "stamping schema version");
                self.db
                    .put(&[keys::VERSION], &SCHEMA_VERSION.to_le_bytes())
            }
        }
    }

    /// Commits a batch of buffered writes atomically.
    pub fn commit(&self, batch: StoreBatch) -> Result<()> {
        self.db.write(batch)
    }

    // ---- script index ----

    /// Loads the script record stored under `hash`.
    pub fn get_script(&self, hash: &[u8; 32]) -> Result<Option<ScriptRecord>> {
        match self.db.get(&script_key(hash))? {
            Some(bytes) => Ok(Some(ScriptRecord::decode(*hash, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether a script record exists under `hash`.
    pub fn has_script(&self, hash: &[u8; 32]) -> Result<bool> {
        Ok(self.db.get(&script_key(hash))?.is_some())
    }

    /// Buffers a script record write, merging request sets with any record
    /// already stored under the same hash. Returns the merged record.
    pub fn put_script(&self, batch: &mut StoreBatch, rec: &ScriptRecord) -> Result<ScriptRecord> {
        let merged = match self.get_script(&rec.hash)? {
            Some(mut existing) => {
                existing.requests.extend(rec.requests.iter().copied());
                existing
            }
            None => rec.clone(),
        };
        batch.put(script_key(&merged.hash).to_vec(), merged.encode());
        Ok(merged)
    }

    /// Removes the script record stored under `hash`.
    pub fn delete_script(&self, hash: &[u8; 32]) -> Result<()> {
        self.db.delete(&script_key(hash))
    }

    /// Returns every stored script record in key order.
    pub fn scripts(&self) -> Result<Vec<ScriptRecord>> {
        let mut out = Vec::new();
        for (key, value) in self.db.scan_prefix(&[keys::SCRIPT])? {
            let hash: [u8; 32] = key[1..]
                .try_into()
                .map_err(|_| Error::Codec(format!("script key of {} bytes", key.len())))?;
            out.push(ScriptRecord::decode(hash, &value)?);
        }
        Ok(out)
    }

    // ---- outpoint index ----

    /// Loads the outpoint record stored under `prevout`.
    pub fn get_outpoint(&self, prevout: &OutPoint) -> Result<Option<OutpointRecord>> {
        match self.db.get(&outpoint_store_key(prevout))? {
            Some(bytes) => Ok(Some(OutpointRecord::decode(*prevout, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether an outpoint record exists under `prevout`.
    pub fn has_outpoint(&self, prevout: &OutPoint) -> Result<bool> {
        Ok(self.db.get(&outpoint_store_key(prevout))?.is_some())
    }

    /// Buffers an outpoint record write, merging request sets with any
    /// record already stored under the same prevout. Returns the merged
    /// record.
    pub fn put_outpoint(
        &self,
        batch: &mut StoreBatch,
        rec: &OutpointRecord,
    ) -> Result<OutpointRecord> {
        let merged = match self.get_outpoint(&rec.prevout)? {
            Some(mut existing) => {
                existing.requests.extend(rec.requests.iter().copied());
                existing
            }
            None => rec.clone(),
        };
        batch.put(outpoint_store_key(&merged.prevout).to_vec(), merged.encode());
        Ok(merged)
    }

    /// Removes the outpoint record stored under `prevout`.
    pub fn delete_outpoint(&self, prevout: &OutPoint) -> Result<()> {
        self.db.delete(&outpoint_store_key(prevout))
    }

    /// Returns every stored outpoint record in key order.
    pub fn outpoints(&self) -> Result<Vec<OutpointRecord>> {
        let mut out = Vec::new();
        for (key, value) in self.db.scan_prefix(&[keys::OUTPOINT])? {
            let body: [u8; 36] = key[1..]
                .try_into()
                .map_err(|_| Error::Codec(format!("outpoint key of {} bytes", key.len())))?;
            out.push(OutpointRecord::decode(key_to_outpoint(&body), &value)?);
        }
        Ok(out)
    }

    /// Buffers a nextout update for the record under `prevout`, returning
    /// the value it held before. Returns `None` (and buffers nothing) when
    /// no record exists.
    pub fn set_nextout(
        &self,
        batch: &mut StoreBatch,
        prevout: &OutPoint,
        nextout: OutPoint,
    ) -> Result<Option<OutPoint>> {
        let Some(mut rec) = self.get_outpoint(prevout)? else {
            return Ok(None);
        };
        let prior = rec.nextout;
        rec.nextout = nextout;
        batch.put(outpoint_store_key(prevout).to_vec(), rec.encode());
        Ok(Some(prior))
    }

    // ---- request index ----

    /// Loads the request stored under `id`.
    pub fn get_request(&self, id: &RequestId) -> Result<Option<Request>> {
        match self.db.get(&request_key(id))? {
            Some(bytes) => Ok(Some(Request::decode(*id, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether a request exists under `id`.
    pub fn has_request(&self, id: &RequestId) -> Result<bool> {
        Ok(self.db.get(&request_key(id))?.is_some())
    }

    /// Buffers a request write. An existing request under the same id is
    /// overwritten.
    pub fn put_request(&self, batch: &mut StoreBatch, req: &Request) {
        batch.put(request_key(&req.id).to_vec(), req.encode());
    }

    /// Removes the request stored under `id`, returning whether it existed.
    ///
    /// Reverse-index entries referencing the id are left in place.
    pub fn delete_request(&self, id: &RequestId) -> Result<bool> {
        let existed = self.has_request(id)?;
        if existed {
            self.db.delete(&request_key(id))?;
        }
        Ok(existed)
    }

    /// Returns every stored request in id order.
    pub fn requests(&self) -> Result<Vec<Request>> {
        let mut out = Vec::new();
        for (key, value) in self.db.scan_prefix(&[keys::REQUEST])? {
            let id: [u8; 32] = key[1..]
                .try_into()
                .map_err(|_| Error::Codec(format!("request key of {} bytes", key.len())))?;
            out.push(Request::decode(RequestId::from_bytes(id), &value)?);
        }
        Ok(out)
    }

    /// Returns the request with the lexicographically greatest id.
    pub fn latest_request(&self) -> Result<Option<Request>> {
        self.latest_request_under(&RequestId::from_bytes([0xff; 32]))
    }

    /// Returns the request with the greatest id ≤ `id_max`, by
    /// lexicographic order on the 32-byte id.
    pub fn latest_request_under(&self, id_max: &RequestId) -> Result<Option<Request>> {
        match self
            .db
            .last_at_or_before(&[keys::REQUEST], &request_key(id_max))?
        {
            Some((key, value)) => {
                let id: [u8; 32] = key[1..]
                    .try_into()
                    .map_err(|_| Error::Codec(format!("request key of {} bytes", key.len())))?;
                Ok(Some(Request::decode(RequestId::from_bytes(id), &value)?))
            }
            None => Ok(None),
        }
    }

    // ---- spend-evidence undo ----

    /// Loads the undo data recorded for `height`.
    pub fn get_undo(&self, height: u32) -> Result<Option<SpendUndo>> {
        match self.db.get(&undo_key(height))? {
            Some(bytes) => Ok(Some(SpendUndo::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Buffers an undo-data write for `height`.
    pub fn put_undo(&self, batch: &mut StoreBatch, height: u32, undo: &SpendUndo) {
        batch.put(undo_key(height).to_vec(), undo.encode());
    }

    /// Buffers deletion of the undo data for `height`.
    pub fn delete_undo(&self, batch: &mut StoreBatch, height: u32) {
        batch.delete(undo_key(height).to_vec());
    }

    // ---- maintenance ----

    /// Deletes every record row in a single batch, returning the number of
    /// deleted keys. The schema version row is kept.
    ///
    /// Any in-memory filter built over this store is stale afterwards and
    /// must be rebuilt before further ingest.
    pub fn wipe(&self) -> Result<usize> {
        let mut batch = StoreBatch::default();
        for prefix in [keys::SCRIPT, keys::OUTPOINT, keys::REQUEST, keys::UNDO] {
            for (key, _) in self.db.scan_prefix(&[prefix])? {
                batch.delete(key);
            }
        }
        let deleted = batch.len();
        self.db.write(batch)?;
        tracing::info!(deleted, "wiped watch store");
        Ok(deleted)
    }
}

fn script_key(hash: &[u8; 32]) -> [u8; 33] {
    let mut key = [0u8; 33];
    key[0] = keys::SCRIPT;
    key[1..].copy_from_slice(hash);
    key
}

fn outpoint_store_key(prevout: &OutPoint) -> [u8; 37] {
    let mut key = [0u8; 37];
    key[0] = keys::OUTPOINT;
    key[1..].copy_from_slice(&outpoint_key(prevout));
    key
}

fn request_key(id: &RequestId) -> [u8; 33] {
    let mut key = [0u8; 33];
    key[0] = keys::REQUEST;
    key[1..].copy_from_slice(id.as_bytes());
    key
}

fn undo_key(height: u32) -> [u8; 5] {
    let mut key = [0u8; 5];
    key[0] = keys::UNDO;
    key[1..].copy_from_slice(&height.to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::zero_outpoint;
    use bitcoin::hashes::Hash;
    use bitcoin::{ScriptBuf, Txid};

    fn rid(byte: u8) -> RequestId {
        RequestId::from_bytes([byte; 32])
    }

    fn outpoint(byte: u8, vout: u32) -> OutPoint {
        OutPoint {
            txid: Txid::from_byte_array([byte; 32]),
            vout,
        }
    }

    fn store() -> WatchStore {
        WatchStore::open_in_memory().unwrap()
    }

    #[test]
    fn open_on_disk_stamps_and_rechecks_schema() {
        let dir = tempfile::tempdir().unwrap();
        drop(WatchStore::open(dir.path()).unwrap());
        // Second open sees the stamped version and succeeds.
        WatchStore::open(dir.path()).unwrap();
    }

    #[test]
    fn put_script_unions_and_is_idempotent() {
        let store = store();
        let script = ScriptBuf::from_bytes(vec![0x51]);

        let mut batch = StoreBatch::default();
        store
            .put_script(&mut batch, &ScriptRecord::new(script.clone(), rid(1)))
            .unwrap();
        store.commit(batch).unwrap();

        let mut batch = StoreBatch::default();
        let merged = store
            .put_script(&mut batch, &ScriptRecord::new(script.clone(), rid(2)))
            .unwrap();
        store.commit(batch).unwrap();
        assert_eq!(merged.requests.len(), 2);

        // Same (key, id) pair again: no growth.
        let mut batch = StoreBatch::default();
        let merged = store
            .put_script(&mut batch, &ScriptRecord::new(script.clone(), rid(2)))
            .unwrap();
        store.commit(batch).unwrap();
        assert_eq!(merged.requests.len(), 2);

        let stored = store
            .get_script(&crate::records::script_hash(&script))
            .unwrap()
            .unwrap();
        assert_eq!(stored.requests.len(), 2);
        assert!(stored.requests.contains(&rid(1)));
        assert!(stored.requests.contains(&rid(2)));
    }

    #[test]
    fn put_outpoint_unions_regardless_of_order() {
        let store = store();
        let prevout = outpoint(0xfa, 0);

        for ids in [[rid(1), rid(2)], [rid(2), rid(1)]] {
            let mut batch = StoreBatch::default();
            for id in ids {
                store
                    .put_outpoint(&mut batch, &OutpointRecord::new(prevout, id))
                    .unwrap();
                store.commit(std::mem::take(&mut batch)).unwrap();
            }
            let stored = store.get_outpoint(&prevout).unwrap().unwrap();
            assert_eq!(
                stored.requests.iter().copied().collect::<Vec<_>>(),
                vec![rid(1), rid(2)]
            );
        }
    }

    #[test]
    fn set_nextout_records_prior_value() {
        let store = store();
        let prevout = outpoint(3, 1);
        let spender = outpoint(4, 0);

        let mut batch = StoreBatch::default();
        store
            .put_outpoint(&mut batch, &OutpointRecord::new(prevout, rid(1)))
            .unwrap();
        store.commit(batch).unwrap();

        let mut batch = StoreBatch::default();
        let prior = store.set_nextout(&mut batch, &prevout, spender).unwrap();
        store.commit(batch).unwrap();
        assert_eq!(prior, Some(zero_outpoint()));

        let stored = store.get_outpoint(&prevout).unwrap().unwrap();
        assert_eq!(stored.nextout, spender);
        assert!(stored.is_spent());

        // Unknown outpoint: nothing to update.
        let mut batch = StoreBatch::default();
        assert_eq!(
            store
                .set_nextout(&mut batch, &outpoint(9, 9), spender)
                .unwrap(),
            None
        );
        assert!(batch.is_empty());
    }

    #[test]
    fn has_and_delete_accessors() {
        let store = store();
        let script = ScriptBuf::from_bytes(vec![0x51]);
        let hash = crate::records::script_hash(&script);
        let prevout = outpoint(2, 0);

        assert!(!store.has_script(&hash).unwrap());
        assert!(!store.has_outpoint(&prevout).unwrap());
        assert!(!store.has_request(&rid(1)).unwrap());

        let mut batch = StoreBatch::default();
        store
            .put_script(&mut batch, &ScriptRecord::new(script.clone(), rid(1)))
            .unwrap();
        store
            .put_outpoint(&mut batch, &OutpointRecord::new(prevout, rid(1)))
            .unwrap();
        let req = Request::new(rid(1), [0u8; 20], 0, Some(prevout), None).unwrap();
        store.put_request(&mut batch, &req);
        store.commit(batch).unwrap();

        assert!(store.has_script(&hash).unwrap());
        assert!(store.has_outpoint(&prevout).unwrap());
        assert!(store.has_request(&rid(1)).unwrap());

        store.delete_script(&hash).unwrap();
        store.delete_outpoint(&prevout).unwrap();
        assert!(!store.has_script(&hash).unwrap());
        assert!(!store.has_outpoint(&prevout).unwrap());
        assert!(store.has_request(&rid(1)).unwrap());
    }

    #[test]
    fn latest_request_under_is_lexicographic() {
        let store = store();
        for byte in [0x10u8, 0x20, 0x30] {
            let req = Request::new(rid(byte), [0u8; 20], 0, Some(outpoint(byte, 0)), None).unwrap();
            let mut batch = StoreBatch::default();
            store.put_request(&mut batch, &req);
            store.commit(batch).unwrap();
        }

        assert_eq!(store.latest_request().unwrap().unwrap().id, rid(0x30));
        assert_eq!(
            store.latest_request_under(&rid(0x2f)).unwrap().unwrap().id,
            rid(0x20)
        );
        assert_eq!(
            store.latest_request_under(&rid(0x20)).unwrap().unwrap().id,
            rid(0x20)
        );
        assert!(store.latest_request_under(&rid(0x0f)).unwrap().is_none());
    }

    #[test]
    fn delete_request_leaves_reverse_indices() {
        let store = store();
        let prevout = outpoint(1, 0);
        let req = Request::new(rid(1), [0u8; 20], 0, Some(prevout), None).unwrap();

        let mut batch = StoreBatch::default();
        store.put_request(&mut batch, &req);
        store
            .put_outpoint(&mut batch, &OutpointRecord::new(prevout, rid(1)))
            .unwrap();
        store.commit(batch).unwrap();

        assert!(store.delete_request(&rid(1)).unwrap());
        assert!(!store.delete_request(&rid(1)).unwrap());
        assert!(store.get_request(&rid(1)).unwrap().is_none());
        assert!(store.get_outpoint(&prevout).unwrap().is_some());
    }

    #[test]
    fn wipe_clears_all_record_rows() {
        let store = store();
        let script = ScriptBuf::from_bytes(vec![0x51]);
        let prevout = outpoint(1, 0);
        let req = Request::new(
            rid(1),
            [0u8; 20],
            0,
            Some(prevout),
            Some(script.clone()),
        )
        .unwrap();

        let mut batch = StoreBatch::default();
        store.put_request(&mut batch, &req);
        store
            .put_outpoint(&mut batch, &OutpointRecord::new(prevout, rid(1)))
            .unwrap();
        store
            .put_script(&mut batch, &ScriptRecord::new(script.clone(), rid(1)))
            .unwrap();
        store.commit(batch).unwrap();

        let deleted = store.wipe().unwrap();
        assert_eq!(deleted, 3);

        assert!(store.get_request(&rid(1)).unwrap().is_none());
        assert!(store.get_outpoint(&prevout).unwrap().is_none());
        assert!(store.scripts().unwrap().is_empty());
        assert!(store.outpoints().unwrap().is_empty());
        assert!(store.requests().unwrap().is_empty());
        assert!(store.latest_request().unwrap().is_none());
    }
}
