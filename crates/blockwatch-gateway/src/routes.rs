//! REST route handlers.

use crate::types::{
    parse_request_id, parse_txid, InfoResponse, OutpointRecordJson, PutRequestBody,
    PutRequestResponse, RequestJson, RescanBody, RescanResponse, ScriptRecordJson,
    DeleteRequestBody,
};
use crate::{ApiError, AppState};
use axum::extract::{Path, State};
use axum::Json;
use bitcoin::{OutPoint, ScriptBuf};
use blockwatch_store::{outpoint_key, script_hash};
use serde_json::{json, Value};
use std::sync::Arc;

/// `GET /relay` — latest request plus chain tip.
pub async fn info(State(state): State<Arc<AppState>>) -> Result<Json<InfoResponse>, ApiError> {
    let latest = state.engine.store().latest_request()?;
    let tip = state.chain.tip();
    Ok(Json(InfoResponse {
        latest: latest.as_ref().map(RequestJson::from_request),
        height: tip.height,
        tip: tip.hash.to_string(),
    }))
}

/// `GET /relay/latest/:max_id` — latest request with id ≤ `max_id`.
pub async fn latest_under(
    State(state): State<Arc<AppState>>,
    Path(max_id): Path<String>,
) -> Result<Json<RequestJson>, ApiError> {
    let max_id = parse_request_id(&max_id)?;
    let req = state
        .engine
        .store()
        .latest_request_under(&max_id)?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(RequestJson::from_request(&req)))
}

/// `POST /relay/rescan` — replay history from a height through the engine.
pub async fn rescan(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RescanBody>,
) -> Result<Json<RescanResponse>, ApiError> {
    let engine = state.engine.clone();
    let chain = state.chain.clone();
    let scanned = tokio::task::spawn_blocking(move || engine.rescan(chain.as_ref(), body.height))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(RescanResponse {
        from: body.height,
        scanned,
    }))
}

/// `GET /relay/outpoint/:hash/:index` — outpoint record or 404.
pub async fn get_outpoint(
    State(state): State<Arc<AppState>>,
    Path((hash, index)): Path<(String, u32)>,
) -> Result<Json<OutpointRecordJson>, ApiError> {
    let prevout = OutPoint {
        txid: parse_txid(&hash)?,
        vout: index,
    };
    let rec = state
        .engine
        .store()
        .get_outpoint(&prevout)?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(OutpointRecordJson::from_record(&rec)))
}

/// `GET /relay/script/:script` — script record or 404.
pub async fn get_script(
    State(state): State<Arc<AppState>>,
    Path(script): Path<String>,
) -> Result<Json<ScriptRecordJson>, ApiError> {
    let raw = hex::decode(&script).map_err(|_| ApiError::BadRequest("bad script hex".into()))?;
    let hash = script_hash(&ScriptBuf::from_bytes(raw));
    let rec = state
        .engine
        .store()
        .get_script(&hash)?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(ScriptRecordJson::from_record(&rec)))
}

/// `GET /relay/request/:id` — request or 404.
pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RequestJson>, ApiError> {
    let id = parse_request_id(&id)?;
    let req = state
        .engine
        .store()
        .get_request(&id)?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(RequestJson::from_request(&req)))
}

/// `GET /relay/request` — all requests.
pub async fn list_requests(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RequestJson>>, ApiError> {
    let requests = state.engine.store().requests()?;
    Ok(Json(requests.iter().map(RequestJson::from_request).collect()))
}

/// `PUT /relay/request` — register a request, optionally rescanning history
/// against it.
pub async fn put_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PutRequestBody>,
) -> Result<Json<PutRequestResponse>, ApiError> {
    let from_height = body.height;
    let req = body.into_request()?;
    let (req, outpoint, script) = state.engine.add_request(req)?;

    // A targeted rescan tests only the new request's keys, so historical
    // matches of unrelated requests are not re-announced.
    let mut rescan = false;
    if let Some(from) = from_height {
        let mut keys: Vec<Vec<u8>> = Vec::new();
        if let Some(prevout) = &req.spends {
            keys.push(outpoint_key(prevout).to_vec());
        }
        if let Some(script) = &req.pays {
            keys.push(script.as_bytes().to_vec());
        }

        let engine = state.engine.clone();
        let chain = state.chain.clone();
        let replayed = tokio::task::spawn_blocking(move || {
            engine.rescan_with(chain.as_ref(), from, move |item| {
                keys.iter().any(|key| key == item)
            })
        })
        .await;

        match replayed {
            Ok(Ok(_)) => rescan = true,
            Ok(Err(e)) => tracing::warn!(error = %e, from, "targeted rescan failed"),
            Err(e) => tracing::warn!(error = %e, from, "targeted rescan task failed"),
        }
    }

    Ok(Json(PutRequestResponse {
        request: RequestJson::from_request(&req),
        outpoint: outpoint.as_ref().map(OutpointRecordJson::from_record),
        script: script.as_ref().map(ScriptRecordJson::from_record),
        rescan,
    }))
}

/// `DELETE /relay/request` — remove a request row.
pub async fn delete_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DeleteRequestBody>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_request_id(&body.id)?;
    let deleted = state.engine.delete_request(&id)?;
    Ok(Json(json!({ "deleted": deleted })))
}

/// `DELETE /relay` — wipe every record and rebuild the filter.
pub async fn wipe(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let wiped = state.engine.wipe()?;
    state.engine.open()?;
    Ok(Json(json!({ "wiped": wiped })))
}
