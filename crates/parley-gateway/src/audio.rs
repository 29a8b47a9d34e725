//! Caller audio over WebSocket — binary PCM frames in both directions.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use parley_core::error::ParleyError;
use parley_core::types::SessionId;
use parley_media::RoomEdge;

use crate::state::GatewayState;

/// Bridge a caller socket to a session's room until either side goes away.
///
/// Binary messages carry 16kHz mono 16-bit little-endian PCM. When the
/// caller disconnects the session is ended; when the session ends first the
/// socket is closed.
pub async fn bridge_audio(
    state: Arc<GatewayState>,
    session_id: SessionId,
    edge: RoomEdge,
    ws: WebSocket,
) {
    info!(%session_id, "Audio stream attached");
    #[cfg(feature = "metrics")]
    crate::metrics::record_audio_connect();

    let (mut ws_tx, mut ws_rx) = ws.split();
    let RoomEdge {
        inbound,
        mut outbound,
    } = edge;

    let send_task = tokio::spawn(async move {
        while let Some(audio) = outbound.recv().await {
            if ws_tx
                .send(Message::Binary(audio.to_le_bytes().into()))
                .await
                .is_err()
            {
                return;
            }
        }
        // Room closed: the session is over
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    while let Some(msg_result) = ws_rx.next().await {
        match msg_result {
            Ok(Message::Binary(bytes)) => {
                if inbound.send(bytes.to_vec()).is_err() {
                    debug!(%session_id, "Room closed, dropping caller audio");
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!(%session_id, "Caller closed audio stream");
                break;
            }
            Ok(Message::Text(_)) => {
                warn!(%session_id, "Ignoring text frame on audio stream");
            }
            Ok(_) => {}
            Err(e) => {
                error!(%session_id, %e, "Audio stream error");
                break;
            }
        }
    }

    send_task.abort();
    #[cfg(feature = "metrics")]
    crate::metrics::record_audio_disconnect();

    match state.registry.end(&session_id).await {
        Ok(()) => {
            info!(%session_id, "Caller hung up, session ended");
            #[cfg(feature = "metrics")]
            crate::metrics::record_session_ended("hangup");
        }
        Err(ParleyError::NotFound(_)) => debug!(%session_id, "Session already ended"),
        Err(e) => warn!(%session_id, error = %e, "Failed to end session"),
    }
}
