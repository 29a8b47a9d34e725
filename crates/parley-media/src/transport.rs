//! Media Transport Adapter — moves audio frames between a caller and a session.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use parley_core::error::{ParleyError, Result};
use parley_core::types::SessionId;

use crate::audio::AudioBuffer;

/// Transport-side binding of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomHandle {
    pub session_id: SessionId,
    pub room_id: String,
}

/// A media transport carrying caller audio in and synthesized audio out.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    fn id(&self) -> &str;

    /// Open a room for a session.
    async fn open_session(&self, session_id: &SessionId) -> Result<RoomHandle>;

    /// Queue outbound audio for the caller.
    async fn send_audio(&self, room: &RoomHandle, audio: AudioBuffer) -> Result<()>;

    /// Subscribe to inbound audio frames (raw 16-bit LE PCM). A room has one subscriber.
    fn on_audio(&self, room: &RoomHandle) -> Result<mpsc::UnboundedReceiver<Vec<u8>>>;

    /// Close the room. Closing an unknown room is a no-op.
    async fn close(&self, room: &RoomHandle) -> Result<()>;
}

/// External side of a room: push caller frames in, pull session audio out.
pub struct RoomEdge {
    pub inbound: mpsc::UnboundedSender<Vec<u8>>,
    pub outbound: mpsc::UnboundedReceiver<AudioBuffer>,
}

struct Room {
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbound_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    outbound_tx: mpsc::UnboundedSender<AudioBuffer>,
    outbound_rx: Option<mpsc::UnboundedReceiver<AudioBuffer>>,
}

/// In-memory transport: every room is a pair of channels whose external
/// edge is handed to whoever carries the caller's audio (WebSocket, tests).
#[derive(Default)]
pub struct ChannelTransport {
    rooms: Mutex<HashMap<String, Room>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the external edge of a room. Each room can be attached once.
    pub fn attach(&self, room_id: &str) -> Result<RoomEdge> {
        let mut rooms = self.lock()?;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| ParleyError::NotFound(format!("room {room_id}")))?;
        let outbound = room
            .outbound_rx
            .take()
            .ok_or_else(|| ParleyError::Transport(format!("room {room_id} already attached")))?;
        Ok(RoomEdge {
            inbound: room.inbound_tx.clone(),
            outbound,
        })
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Room>>> {
        self.rooms
            .lock()
            .map_err(|_| ParleyError::Transport("room table poisoned".to_string()))
    }
}

#[async_trait]
impl MediaTransport for ChannelTransport {
    fn id(&self) -> &str {
        "channel"
    }

    async fn open_session(&self, session_id: &SessionId) -> Result<RoomHandle> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let room_id = format!("room-{session_id}");

        self.lock()?.insert(
            room_id.clone(),
            Room {
                inbound_tx,
                inbound_rx: Some(inbound_rx),
                outbound_tx,
                outbound_rx: Some(outbound_rx),
            },
        );
        info!(%session_id, %room_id, "Room opened");

        Ok(RoomHandle {
            session_id: session_id.clone(),
            room_id,
        })
    }

    async fn send_audio(&self, room: &RoomHandle, audio: AudioBuffer) -> Result<()> {
        let rooms = self.lock()?;
        let entry = rooms
            .get(&room.room_id)
            .ok_or_else(|| ParleyError::Transport(format!("room {} is closed", room.room_id)))?;
        entry
            .outbound_tx
            .send(audio)
            .map_err(|_| ParleyError::Transport(format!("room {} has no listener", room.room_id)))
    }

    fn on_audio(&self, room: &RoomHandle) -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
        let mut rooms = self.lock()?;
        let entry = rooms
            .get_mut(&room.room_id)
            .ok_or_else(|| ParleyError::Transport(format!("room {} is closed", room.room_id)))?;
        entry.inbound_rx.take().ok_or_else(|| {
            ParleyError::Transport(format!("room {} already has a subscriber", room.room_id))
        })
    }

    async fn close(&self, room: &RoomHandle) -> Result<()> {
        if self.lock()?.remove(&room.room_id).is_some() {
            info!(room_id = %room.room_id, "Room closed");
        } else {
            debug!(room_id = %room.room_id, "Room already closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_room_round_trip() {
        let transport = ChannelTransport::new();
        let id = SessionId::new();
        let room = transport.open_session(&id).await.unwrap();
        assert_eq!(room.session_id, id);

        let mut inbound = transport.on_audio(&room).unwrap();
        let mut edge = transport.attach(&room.room_id).unwrap();

        edge.inbound.send(vec![1, 2, 3, 4]).unwrap();
        assert_eq!(inbound.recv().await.unwrap(), vec![1, 2, 3, 4]);

        let audio = AudioBuffer::new(vec![7; 320], 16_000);
        transport.send_audio(&room, audio.clone()).await.unwrap();
        assert_eq!(edge.outbound.recv().await.unwrap(), audio);
    }

    #[tokio::test]
    async fn test_single_subscriber_and_single_edge() {
        let transport = ChannelTransport::new();
        let room = transport.open_session(&SessionId::new()).await.unwrap();
        assert!(transport.on_audio(&room).is_ok());
        assert!(transport.on_audio(&room).is_err());
        assert!(transport.attach(&room.room_id).is_ok());
        assert!(transport.attach(&room.room_id).is_err());
        assert!(matches!(
            transport.attach("room-unknown"),
            Err(ParleyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_close_stops_audio() {
        let transport = ChannelTransport::new();
        let room = transport.open_session(&SessionId::new()).await.unwrap();
        let mut edge = transport.attach(&room.room_id).unwrap();

        transport
            .send_audio(&room, AudioBuffer::new(vec![1; 10], 16_000))
            .await
            .unwrap();
        transport.close(&room).await.unwrap();
        assert_eq!(transport.room_count(), 0);

        // Audio queued before close is still delivered, then the edge sees the end
        assert!(edge.outbound.recv().await.is_some());
        assert!(edge.outbound.recv().await.is_none());

        let err = transport
            .send_audio(&room, AudioBuffer::new(vec![1; 10], 16_000))
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::Transport(_)));

        // Idempotent
        transport.close(&room).await.unwrap();
    }
}
