// =============================================================================
// WebSocket Handler — Push-based session updates
// =============================================================================
//
// Clients connect to `/api/v1/sessions/{id}/ws` and receive:
//   1. An immediate SessionSnapshot on connect.
//   2. A fresh SessionSnapshot every time the session task publishes.
//
// Any text frame from the client is treated as a heartbeat. The connection
// closes when the client leaves or the session is deleted.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::app_state::{AppState, SessionError};
use crate::session::SessionSnapshot;

/// Axum handler for the WebSocket upgrade request.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, SessionError> {
    let updates = state.subscribe_session(&id)?;
    info!(session_id = %id, "WebSocket connection accepted — upgrading");
    Ok(ws.on_upgrade(move |socket| handle_ws_connection(socket, id, updates)))
}

/// Manages a single WebSocket connection lifecycle.
///
/// Runs two concurrent branches via `tokio::select!`:
///   1. **Push** — forward every published snapshot.
///   2. **Recv** — process incoming client frames (Ping, Close, heartbeat).
async fn handle_ws_connection(
    socket: WebSocket,
    session_id: String,
    mut updates: watch::Receiver<SessionSnapshot>,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut sequence: u64 = 0;

    let initial = updates.borrow_and_update().clone();
    if let Err(e) = send_snapshot(&mut sender, &initial, &mut sequence).await {
        warn!(session_id = %session_id, error = %e, "Failed to send initial WebSocket snapshot");
        return;
    }

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    info!(session_id = %session_id, "session ended — closing WebSocket");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if let Err(e) = send_snapshot(&mut sender, &snapshot, &mut sequence).await {
                    debug!(error = %e, "WebSocket send failed — disconnecting");
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!(msg = %text, "WebSocket text message received (heartbeat)");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(session_id = %session_id, "WebSocket Close frame received — disconnecting");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => {
                        info!(session_id = %session_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }
}

/// Serialize and send one snapshot, tagged with a per-connection sequence.
async fn send_snapshot<S>(
    sender: &mut S,
    snapshot: &SessionSnapshot,
    sequence: &mut u64,
) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    *sequence += 1;

    let envelope = serde_json::json!({
        "seq": *sequence,
        "snapshot": snapshot,
    });

    match serde_json::to_string(&envelope) {
        Ok(json) => {
            sender.send(Message::Text(json)).await?;
            debug!(
                generation = snapshot.generation,
                seq = *sequence,
                "WebSocket snapshot sent"
            );
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Failed to serialize snapshot");
            Ok(())
        }
    }
}
