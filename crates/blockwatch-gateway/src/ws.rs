//! WebSocket endpoint: in-band auth, then relay-topic subscription.
//!
//! Protocol, all JSON text frames:
//! - `{"type":"auth","key":"…"}` — must succeed before watching unless
//!   authentication is disabled;
//! - `{"type":"watch","channel":"relay"}` — join the relay topic;
//! - `{"type":"unwatch","channel":"relay"}` — leave it.
//!
//! While watching, the client receives
//! `{"channel":"relay","event":"requests satisfied","data":{…}}` frames.
//! Delivery is best-effort: a client that cannot keep up lags on its own
//! subscription and never blocks block ingest.

use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use blockwatch_engine::{EventSubscription, SatisfiedEvent, WatchEvent};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientMessage {
    Auth { key: String },
    Watch { channel: String },
    Unwatch { channel: String },
}

/// `GET /ws` — upgrade to the notification socket.
pub async fn upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle(state, socket))
}

async fn handle(state: Arc<AppState>, mut socket: WebSocket) {
    let mut authed = state.auth.disabled();
    let mut sub: Option<EventSubscription> = None;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(msg)) = incoming else { break };
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };

                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Auth { key }) => {
                        if state.auth.verify(&key) {
                            authed = true;
                            if !send(&mut socket, json!({ "type": "auth", "result": "ok" })).await {
                                break;
                            }
                        } else {
                            tracing::warn!("websocket auth failed");
                            let _ = send(&mut socket, json!({ "error": "auth failed" })).await;
                            break;
                        }
                    }
                    Ok(ClientMessage::Watch { channel }) => {
                        let reply = if channel != "relay" {
                            json!({ "error": format!("unknown channel: {channel}") })
                        } else if !authed {
                            json!({ "error": "auth required" })
                        } else {
                            sub = Some(state.engine.hub().subscribe());
                            json!({ "type": "watch", "channel": "relay" })
                        };
                        if !send(&mut socket, reply).await {
                            break;
                        }
                    }
                    Ok(ClientMessage::Unwatch { channel }) => {
                        if channel == "relay" {
                            sub = None;
                        }
                        if !send(&mut socket, json!({ "type": "unwatch", "channel": channel })).await {
                            break;
                        }
                    }
                    Err(e) => {
                        if !send(&mut socket, json!({ "error": format!("bad message: {e}") })).await {
                            break;
                        }
                    }
                }
            }
            event = next_event(&mut sub) => {
                let Some(WatchEvent::RequestsSatisfied(event)) = event else { break };
                if !send(&mut socket, satisfied_frame(&event)).await {
                    break;
                }
            }
        }
    }
}

/// Waits on the subscription when there is one; pends forever otherwise so
/// the select loop only wakes for socket traffic.
async fn next_event(sub: &mut Option<EventSubscription>) -> Option<WatchEvent> {
    match sub {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

fn satisfied_frame(event: &SatisfiedEvent) -> Value {
    json!({
        "channel": "relay",
        "event": "requests satisfied",
        "data": {
            "txid": event.txid.to_string(),
            "height": event.height,
            "satisfied": event.satisfied.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        }
    })
}

async fn send(socket: &mut WebSocket, value: Value) -> bool {
    socket.send(Message::Text(value.to_string())).await.is_ok()
}
