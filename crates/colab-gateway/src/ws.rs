//! WebSocket endpoint for workspace collaboration clients (spec §6).
//!
//! Flow: client connects to `/ws`, sends `auth` first; every other
//! frame is routed through `colab_core::Dispatcher`. Outbound frames
//! are drained from the connection's `Outbound` queue by a writer task
//! running alongside the reader loop.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use colab_core::Connection;

use crate::state::AppState;

/// GET /ws — upgrade to WebSocket.
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let mut conn = Connection::new();

    // Drains `conn.outbound` and writes each frame to the socket. Once the
    // queue closes, sends a real `Close` frame carrying whatever code was
    // recorded by `close_with_code` (admission rejection, reconnect
    // takeover) — spec §4.A, §4.E require an actual protocol-level close,
    // not just a JSON payload naming the code.
    let writer = {
        let outbound = conn.outbound.clone();
        tokio::spawn(async move {
            while let Some(msg) = outbound.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to serialize outbound frame");
                        continue;
                    }
                };
                if ws_sink.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
            if let Some((code, reason)) = outbound.take_close_code() {
                let _ = ws_sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
            }
        })
    };

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(raw) => {
                    if let Some(4003) = state.dispatcher.dispatch(&mut conn, raw).await {
                        break;
                    }
                }
                Err(_) => {
                    conn.outbound.push(serde_json::json!({
                        "type": "error",
                        "code": "malformed",
                        "message": "invalid JSON"
                    }));
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.dispatcher.handle_disconnect(&conn).await;
    conn.outbound.close();
    // Await rather than abort: a pending close code (admission rejection,
    // reconnect takeover) must still flush as a real `Close` frame.
    let _ = writer.await;
}
