//! Record types and their binary codecs.
//!
//! All encodings are single-pass and deterministic: integers are
//! little-endian, hashes are stored in their canonical 32-byte order, and
//! variable-length scripts carry a Bitcoin CompactSize length prefix.
//! Decoding is parameterised by the storage key; the key portion of a
//! record is never duplicated in its value bytes.

use crate::{Error, Result};
use bitcoin::consensus::encode::VarInt;
use bitcoin::consensus::{Decodable, Encodable};
use bitcoin::hashes::{sha256, Hash};
use bitcoin::{OutPoint, Script, ScriptBuf, Txid};
use blockwatch_primitives::{RequestId, MAX_SCRIPT_SIZE};
use std::collections::BTreeSet;

/// The all-zero outpoint, used to encode "absent" in fixed-width slots.
///
/// Distinct from [`OutPoint::null`], whose index is `u32::MAX`.
pub fn zero_outpoint() -> OutPoint {
    OutPoint {
        txid: Txid::all_zeros(),
        vout: 0,
    }
}

fn is_zero_outpoint(outpoint: &OutPoint) -> bool {
    outpoint.vout == 0 && outpoint.txid == Txid::all_zeros()
}

/// Converts an outpoint to its 36-byte storage key body.
///
/// Format: txid (32 bytes, canonical order) followed by the output index in
/// big-endian, so outputs of one transaction sort by index.
pub fn outpoint_key(outpoint: &OutPoint) -> [u8; 36] {
    let mut key = [0u8; 36];
    key[..32].copy_from_slice(&outpoint.txid.to_byte_array());
    key[32..].copy_from_slice(&outpoint.vout.to_be_bytes());
    key
}

/// Parses a 36-byte storage key body back to an outpoint.
pub fn key_to_outpoint(key: &[u8; 36]) -> OutPoint {
    let mut txid = [0u8; 32];
    txid.copy_from_slice(&key[..32]);
    let vout = u32::from_be_bytes(key[32..].try_into().expect("slice length is 4"));
    OutPoint {
        txid: Txid::from_byte_array(txid),
        vout,
    }
}

/// SHA-256 of a scriptPubKey, the storage key of its [`ScriptRecord`].
pub fn script_hash(script: &Script) -> [u8; 32] {
    sha256::Hash::hash(script.as_bytes()).to_byte_array()
}

/// A request failing up-front validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidRequest {
    /// Neither an outpoint nor a script was supplied.
    #[error("request must reference an outpoint or a script")]
    NoTarget,

    /// The supplied script exceeds [`MAX_SCRIPT_SIZE`].
    #[error("script of {0} bytes exceeds the {MAX_SCRIPT_SIZE}-byte maximum")]
    ScriptTooLarge(usize),
}

/// A client subscription: notify when `spends` is consumed and/or an output
/// carrying `pays` appears on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Client-chosen identifier; the `i` storage key.
    pub id: RequestId,
    /// Opaque 20-byte payload echoed back in notifications.
    pub address: [u8; 20],
    /// Application-defined threshold, not interpreted by the engine.
    pub value: u64,
    /// Outpoint whose spend satisfies the request.
    pub spends: Option<OutPoint>,
    /// scriptPubKey whose on-chain appearance satisfies the request.
    pub pays: Option<ScriptBuf>,
    /// Seconds since epoch, assigned when the request is persisted.
    pub timestamp: u32,
}

impl Request {
    /// Builds a validated request with an unset timestamp.
    pub fn new(
        id: RequestId,
        address: [u8; 20],
        value: u64,
        spends: Option<OutPoint>,
        pays: Option<ScriptBuf>,
    ) -> std::result::Result<Self, InvalidRequest> {
        if spends.is_none() && pays.as_ref().map_or(true, |s| s.is_empty()) {
            return Err(InvalidRequest::NoTarget);
        }
        if let Some(script) = &pays {
            if script.len() > MAX_SCRIPT_SIZE {
                return Err(InvalidRequest::ScriptTooLarge(script.len()));
            }
        }
        Ok(Self {
            id,
            address,
            value,
            spends,
            pays: pays.filter(|s| !s.is_empty()),
            timestamp: 0,
        })
    }

    /// Encodes the value bytes; the id is carried in the key.
    pub fn encode(&self) -> Vec<u8> {
        let spends = self.spends.unwrap_or_else(zero_outpoint);
        let pays = self.pays.as_ref().map(|s| s.as_bytes()).unwrap_or(&[]);

        let mut buf = Vec::with_capacity(77 + pays.len());
        buf.extend_from_slice(&self.address);
        buf.extend_from_slice(&self.value.to_le_bytes());
        buf.extend_from_slice(&spends.txid.to_byte_array());
        buf.extend_from_slice(&spends.vout.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        write_script(&mut buf, pays);
        buf
    }

    /// Decodes the value bytes stored under `id`.
    pub fn decode(id: RequestId, mut bytes: &[u8]) -> Result<Self> {
        let bytes = &mut bytes;
        let address: [u8; 20] = take(bytes, 20)?.try_into().expect("length checked");
        let value = read_u64(bytes)?;
        let spends = read_outpoint(bytes)?;
        let timestamp = read_u32(bytes)?;
        let script = read_script(bytes)?;
        expect_end(bytes)?;

        Ok(Self {
            id,
            address,
            value,
            spends: (!is_zero_outpoint(&spends)).then_some(spends),
            pays: (!script.is_empty()).then(|| ScriptBuf::from_bytes(script)),
            timestamp,
        })
    }
}

/// Reverse index from a scriptPubKey to the requests referencing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRecord {
    /// SHA-256 of `script`; the `s` storage key.
    pub hash: [u8; 32],
    /// The raw scriptPubKey.
    pub script: ScriptBuf,
    /// Requests referencing this script. Non-empty for any persisted record.
    pub requests: BTreeSet<RequestId>,
}

impl ScriptRecord {
    /// Builds a record for `script` referenced by a single request.
    pub fn new(script: ScriptBuf, id: RequestId) -> Self {
        Self {
            hash: script_hash(&script),
            script,
            requests: BTreeSet::from([id]),
        }
    }

    /// Encodes the value bytes; the script hash is carried in the key.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(13 + self.requests.len() * 32 + self.script.len());
        write_request_set(&mut buf, &self.requests);
        write_script(&mut buf, self.script.as_bytes());
        buf
    }

    /// Decodes the value bytes stored under `hash`.
    pub fn decode(hash: [u8; 32], mut bytes: &[u8]) -> Result<Self> {
        let bytes = &mut bytes;
        let requests = read_request_set(bytes)?;
        let script = read_script(bytes)?;
        expect_end(bytes)?;

        Ok(Self {
            hash,
            script: ScriptBuf::from_bytes(script),
            requests,
        })
    }
}

/// Reverse index from an outpoint to the requests watching it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutpointRecord {
    /// The watched outpoint; the `o` storage key.
    pub prevout: OutPoint,
    /// The spending `(txid, input-index)` once observed, else the zero
    /// outpoint.
    pub nextout: OutPoint,
    /// Requests watching this outpoint. Non-empty for any persisted record.
    pub requests: BTreeSet<RequestId>,
}

impl OutpointRecord {
    /// Builds a record for `prevout` watched by a single request.
    pub fn new(prevout: OutPoint, id: RequestId) -> Self {
        Self {
            prevout,
            nextout: zero_outpoint(),
            requests: BTreeSet::from([id]),
        }
    }

    /// Whether a spend of this outpoint has been observed.
    pub fn is_spent(&self) -> bool {
        !is_zero_outpoint(&self.nextout)
    }

    /// Encodes the value bytes; the prevout is carried in the key.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(40 + self.requests.len() * 32);
        buf.extend_from_slice(&self.nextout.txid.to_byte_array());
        buf.extend_from_slice(&self.nextout.vout.to_le_bytes());
        write_request_set(&mut buf, &self.requests);
        buf
    }

    /// Decodes the value bytes stored under `prevout`.
    pub fn decode(prevout: OutPoint, mut bytes: &[u8]) -> Result<Self> {
        let bytes = &mut bytes;
        let nextout = read_outpoint(bytes)?;
        let requests = read_request_set(bytes)?;
        expect_end(bytes)?;

        Ok(Self {
            prevout,
            nextout,
            requests,
        })
    }
}

fn write_request_set(buf: &mut Vec<u8>, requests: &BTreeSet<RequestId>) {
    buf.extend_from_slice(&(requests.len() as u32).to_le_bytes());
    for id in requests {
        buf.extend_from_slice(id.as_bytes());
    }
}

fn read_request_set(bytes: &mut &[u8]) -> Result<BTreeSet<RequestId>> {
    let count = read_u32(bytes)?;
    let mut requests = BTreeSet::new();
    for _ in 0..count {
        let id: [u8; 32] = take(bytes, 32)?.try_into().expect("length checked");
        requests.insert(RequestId::from_bytes(id));
    }
    Ok(requests)
}

fn write_script(buf: &mut Vec<u8>, script: &[u8]) {
    VarInt(script.len() as u64)
        .consensus_encode(buf)
        .expect("writing to a Vec cannot fail");
    buf.extend_from_slice(script);
}

fn read_script(bytes: &mut &[u8]) -> Result<Vec<u8>> {
    let len = VarInt::consensus_decode(bytes)
        .map_err(|e| Error::Codec(format!("bad script length: {e}")))?
        .0 as usize;
    if len > MAX_SCRIPT_SIZE {
        return Err(Error::Codec(format!("script length {len} out of range")));
    }
    Ok(take(bytes, len)?.to_vec())
}

fn read_outpoint(bytes: &mut &[u8]) -> Result<OutPoint> {
    let txid: [u8; 32] = take(bytes, 32)?.try_into().expect("length checked");
    let vout = read_u32(bytes)?;
    Ok(OutPoint {
        txid: Txid::from_byte_array(txid),
        vout,
    })
}

fn read_u32(bytes: &mut &[u8]) -> Result<u32> {
    Ok(u32::from_le_bytes(
        take(bytes, 4)?.try_into().expect("length checked"),
    ))
}

fn read_u64(bytes: &mut &[u8]) -> Result<u64> {
    Ok(u64::from_le_bytes(
        take(bytes, 8)?.try_into().expect("length checked"),
    ))
}

fn take<'a>(bytes: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if bytes.len() < n {
        return Err(Error::Codec(format!(
            "record truncated: wanted {n} bytes, {} left",
            bytes.len()
        )));
    }
    let (head, tail) = bytes.split_at(n);
    *bytes = tail;
    Ok(head)
}

fn expect_end(bytes: &&[u8]) -> Result<()> {
    if bytes.is_empty() {
        Ok(())
    } else {
        Err(Error::Codec(format!(
            "{} trailing bytes after record",
            bytes.len()
        )))
    }
}
