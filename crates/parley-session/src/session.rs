//! A live session and the handles the registry keeps for it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use parley_core::types::SessionId;
use parley_media::{MediaTransport, RoomHandle};

use crate::turn::{TurnEvent, TurnSnapshot};

/// Last-activity record shared between a session and its turn machine.
#[derive(Debug, Clone)]
pub struct Activity {
    last: Arc<Mutex<Instant>>,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn touch(&self) {
        if let Ok(mut last) = self.last.lock() {
            *last = Instant::now();
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// One continuous voice interaction, owned by the registry.
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub room: RoomHandle,
    pub voice_id: String,
    pub language: Option<String>,
    pub(crate) activity: Activity,
    pub(crate) status: watch::Receiver<TurnSnapshot>,
    pub(crate) events: broadcast::Sender<TurnEvent>,
    pub(crate) cancel: CancellationToken,
    pub(crate) task: JoinHandle<()>,
}

impl Session {
    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    pub fn snapshot(&self) -> TurnSnapshot {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.events.subscribe()
    }

    /// Stop the turn machine and release the room.
    ///
    /// The machine gets `grace` to wind down before its task is aborted. The
    /// room is closed before returning, so nothing more reaches the caller.
    pub(crate) async fn shutdown(mut self, grace: Duration, transport: &dyn MediaTransport) {
        self.cancel.cancel();

        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            warn!(session_id = %self.id, "Turn machine did not stop in time, aborting");
            self.task.abort();
        }

        if let Err(e) = transport.close(&self.room).await {
            warn!(session_id = %self.id, error = %e, "Failed to close room");
        }
        debug!(session_id = %self.id, "Session shut down");
    }
}
