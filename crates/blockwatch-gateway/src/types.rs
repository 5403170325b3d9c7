//! Wire types and display-endian hex translation.

use crate::ApiError;
use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, ScriptBuf, Txid};
use blockwatch_primitives::RequestId;
use blockwatch_store::{OutpointRecord, Request, ScriptRecord};
use serde::{Deserialize, Serialize};

/// Formats 32 canonical-order bytes as display-endian hex.
pub fn display_hex(bytes: &[u8; 32]) -> String {
    let mut reversed = *bytes;
    reversed.reverse();
    hex::encode(reversed)
}

/// Parses display-endian hex into 32 canonical-order bytes.
pub fn parse_display_hex(s: &str) -> Result<[u8; 32], ApiError> {
    let raw = hex::decode(s).map_err(|_| ApiError::BadRequest(format!("bad hex: {s}")))?;
    let mut bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| ApiError::BadRequest("expected 32 bytes of hex".into()))?;
    bytes.reverse();
    Ok(bytes)
}

pub fn parse_request_id(s: &str) -> Result<RequestId, ApiError> {
    RequestId::from_hex(s).map_err(|e| ApiError::BadRequest(e.to_string()))
}

pub fn parse_txid(s: &str) -> Result<Txid, ApiError> {
    Ok(Txid::from_byte_array(parse_display_hex(s)?))
}

fn parse_script(s: &str) -> Result<ScriptBuf, ApiError> {
    let raw = hex::decode(s).map_err(|_| ApiError::BadRequest("bad script hex".into()))?;
    Ok(ScriptBuf::from_bytes(raw))
}

fn parse_address(s: &str) -> Result<[u8; 20], ApiError> {
    let raw = hex::decode(s).map_err(|_| ApiError::BadRequest("bad address hex".into()))?;
    raw.try_into()
        .map_err(|_| ApiError::BadRequest("address must be 20 bytes of hex".into()))
}

/// An outpoint on the wire: display-endian txid plus index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutpointJson {
    pub hash: String,
    pub index: u32,
}

impl OutpointJson {
    pub fn from_outpoint(outpoint: &OutPoint) -> Self {
        Self {
            hash: outpoint.txid.to_string(),
            index: outpoint.vout,
        }
    }

    pub fn to_outpoint(&self) -> Result<OutPoint, ApiError> {
        Ok(OutPoint {
            txid: parse_txid(&self.hash)?,
            vout: self.index,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestJson {
    pub id: String,
    pub address: String,
    pub value: u64,
    pub spends: Option<OutpointJson>,
    pub pays: Option<String>,
    pub timestamp: u32,
}

impl RequestJson {
    pub fn from_request(req: &Request) -> Self {
        Self {
            id: req.id.to_string(),
            address: hex::encode(req.address),
            value: req.value,
            spends: req.spends.as_ref().map(OutpointJson::from_outpoint),
            pays: req.pays.as_ref().map(|s| hex::encode(s.as_bytes())),
            timestamp: req.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutpointRecordJson {
    pub prevout: OutpointJson,
    pub nextout: OutpointJson,
    pub requests: Vec<String>,
}

impl OutpointRecordJson {
    pub fn from_record(rec: &OutpointRecord) -> Self {
        Self {
            prevout: OutpointJson::from_outpoint(&rec.prevout),
            nextout: OutpointJson::from_outpoint(&rec.nextout),
            requests: rec.requests.iter().map(|id| id.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptRecordJson {
    pub hash: String,
    pub script: String,
    pub requests: Vec<String>,
}

impl ScriptRecordJson {
    pub fn from_record(rec: &ScriptRecord) -> Self {
        Self {
            hash: display_hex(&rec.hash),
            script: hex::encode(rec.script.as_bytes()),
            requests: rec.requests.iter().map(|id| id.to_string()).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub latest: Option<RequestJson>,
    pub height: u32,
    pub tip: String,
}

#[derive(Debug, Deserialize)]
pub struct RescanBody {
    pub height: u32,
}

#[derive(Debug, Serialize)]
pub struct RescanResponse {
    pub from: u32,
    pub scanned: u32,
}

#[derive(Debug, Deserialize)]
pub struct PutRequestBody {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub value: u64,
    pub spends: Option<OutpointJson>,
    pub pays: Option<String>,
    /// When present, replay history from this height against the new
    /// request only.
    pub height: Option<u32>,
}

impl PutRequestBody {
    /// Validates the body into a core [`Request`].
    pub fn into_request(self) -> Result<Request, ApiError> {
        let id = parse_request_id(&self.id)?;
        let address = parse_address(&self.address)?;
        let spends = self.spends.as_ref().map(OutpointJson::to_outpoint).transpose()?;
        let pays = self.pays.as_deref().map(parse_script).transpose()?;
        Ok(Request::new(id, address, self.value, spends, pays)?)
    }
}

#[derive(Debug, Serialize)]
pub struct PutRequestResponse {
    pub request: RequestJson,
    pub outpoint: Option<OutpointRecordJson>,
    pub script: Option<ScriptRecordJson>,
    pub rescan: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequestBody {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_hex_reverses_bytes() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xcd;
        bytes[31] = 0x12;

        let hex = display_hex(&bytes);
        assert!(hex.starts_with("12"));
        assert!(hex.ends_with("cd"));
        assert_eq!(parse_display_hex(&hex).unwrap(), bytes);
    }

    #[test]
    fn parse_display_hex_rejects_bad_input() {
        assert!(parse_display_hex("xyz").is_err());
        assert!(parse_display_hex("0011").is_err());
    }

    #[test]
    fn outpoint_json_roundtrip() {
        let outpoint = OutPoint {
            txid: Txid::from_byte_array([0xab; 32]),
            vout: 3,
        };
        let json = OutpointJson::from_outpoint(&outpoint);
        assert_eq!(json.to_outpoint().unwrap(), outpoint);
    }

    #[test]
    fn put_body_validation() {
        let body = PutRequestBody {
            id: "11".repeat(32),
            address: "22".repeat(20),
            value: 5,
            spends: None,
            pays: Some("76a914c22a601f8a1f4cc20bdc595447b6aeaf4b6cd31288ac".into()),
            height: None,
        };
        let req = body.into_request().unwrap();
        assert_eq!(req.value, 5);
        assert!(req.pays.is_some());

        let empty = PutRequestBody {
            id: "11".repeat(32),
            address: "22".repeat(20),
            value: 0,
            spends: None,
            pays: None,
            height: None,
        };
        assert!(matches!(
            empty.into_request(),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn request_json_uses_display_endian_id() {
        let mut id = [0u8; 32];
        id[31] = 0xee;
        let req = Request::new(
            RequestId::from_bytes(id),
            [1u8; 20],
            0,
            None,
            Some(ScriptBuf::from_bytes(vec![0x51])),
        )
        .unwrap();

        let json = RequestJson::from_request(&req);
        assert!(json.id.starts_with("ee"));
        assert_eq!(json.pays.as_deref(), Some("51"));
    }
}
