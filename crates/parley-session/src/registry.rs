//! Session Registry — the process-wide map of live sessions.
//!
//! Removal from the map happens exactly once, under the write lock, so the
//! reaper, the supervisor and callers of [`SessionRegistry::end`] can race
//! freely: whoever loses observes `NotFound`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use parley_core::config::Config;
use parley_core::error::{ParleyError, Result};
use parley_core::types::{HealthSnapshot, SessionId, SessionStatus, TurnState};
use parley_media::RoomHandle;

use crate::collaborators::Collaborators;
use crate::session::{Activity, Session};
use crate::turn::{TerminationReason, TurnEvent, TurnMachine, TurnPolicy, TurnSnapshot};

type Termination = (SessionId, TerminationReason);

/// Limits and timings applied to every session.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub max_sessions: usize,
    pub inactivity_timeout: Duration,
    pub reap_interval: Duration,
    pub end_grace: Duration,
    pub policy: TurnPolicy,
}

impl RegistrySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_sessions: config.max_sessions(),
            inactivity_timeout: Duration::from_secs(config.inactivity_timeout_secs()),
            reap_interval: Duration::from_secs(config.reap_interval_secs().max(1)),
            end_grace: Duration::from_millis(config.end_grace_ms()),
            policy: TurnPolicy::from_config(config),
        }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Per-session overrides supplied at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionCreated {
    pub session_id: SessionId,
    pub room: RoomHandle,
}

/// Point-in-time description of a session for the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub room_id: String,
    pub status: SessionStatus,
    pub state: TurnState,
    pub created_at: DateTime<Utc>,
    pub idle_secs: u64,
    pub turn: u64,
    pub completed_turns: u64,
    pub consecutive_failures: u32,
    pub voice_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl SessionInfo {
    fn from_session(session: &Session) -> Self {
        let snapshot = session.snapshot();
        Self {
            session_id: session.id.clone(),
            room_id: session.room.room_id.clone(),
            status: status_of(&snapshot),
            state: snapshot.state,
            created_at: session.created_at,
            idle_secs: session.activity().idle_for().as_secs(),
            turn: snapshot.turn,
            completed_turns: snapshot.completed_turns,
            consecutive_failures: snapshot.consecutive_failures,
            voice_id: session.voice_id.clone(),
            language: session.language.clone(),
        }
    }
}

fn status_of(snapshot: &TurnSnapshot) -> SessionStatus {
    if snapshot.state == TurnState::Terminated {
        SessionStatus::Inactive
    } else {
        SessionStatus::Active
    }
}

pub struct SessionRegistry {
    settings: RegistrySettings,
    collaborators: Collaborators,
    sessions: RwLock<HashMap<SessionId, Session>>,
    terminations: mpsc::UnboundedSender<Termination>,
    terminated: Mutex<Option<mpsc::UnboundedReceiver<Termination>>>,
    stop: CancellationToken,
}

impl SessionRegistry {
    pub fn new(settings: RegistrySettings, collaborators: Collaborators) -> Self {
        let (terminations, terminated) = mpsc::unbounded_channel();
        Self {
            settings,
            collaborators,
            sessions: RwLock::new(HashMap::new()),
            terminations,
            terminated: Mutex::new(Some(terminated)),
            stop: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Open a session: a room on the transport plus a turn machine in `Idle`.
    pub async fn create(&self, request: SessionRequest) -> Result<SessionCreated> {
        let ready = self.collaborators.require()?;
        let max = self.settings.max_sessions;
        if self.len().await >= max {
            return Err(ParleyError::CapacityExceeded { max });
        }

        let id = SessionId::new();
        let room = ready.transport.open_session(&id).await?;
        let frames = match ready.transport.on_audio(&room) {
            Ok(frames) => frames,
            Err(e) => {
                let _ = ready.transport.close(&room).await;
                return Err(e);
            }
        };

        let mut policy = self.settings.policy.clone();
        if let Some(voice) = request.voice_id.filter(|v| !v.trim().is_empty()) {
            policy.voice_id = voice;
        }
        if let Some(language) = request.language.filter(|l| !l.trim().is_empty()) {
            policy.language = Some(language);
        }
        let voice_id = policy.voice_id.clone();
        let language = policy.language.clone();

        let activity = Activity::new();
        let machine = TurnMachine::new(id.clone(), room.clone(), &ready, policy, activity.clone());
        let status = machine.status();
        let events = machine.events();

        let mut sessions = self.sessions.write().await;
        if sessions.len() >= max {
            drop(sessions);
            let _ = ready.transport.close(&room).await;
            return Err(ParleyError::CapacityExceeded { max });
        }

        let cancel = CancellationToken::new();
        let terminations = self.terminations.clone();
        let task_id = id.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(
            async move {
                let reason = machine.run(frames, task_cancel).await;
                if reason != TerminationReason::Ended {
                    let _ = terminations.send((task_id, reason));
                }
            }
            .instrument(info_span!("session", session_id = %id)),
        );

        sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                created_at: Utc::now(),
                room: room.clone(),
                voice_id,
                language,
                activity,
                status,
                events,
                cancel,
                task,
            },
        );
        info!(session_id = %id, room_id = %room.room_id, active = sessions.len(), "Session created");

        Ok(SessionCreated {
            session_id: id,
            room,
        })
    }

    /// Remove a session, stop its machine and close its room.
    pub async fn end(&self, id: &SessionId) -> Result<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| ParleyError::NotFound(id.to_string()))?;

        session
            .shutdown(self.settings.end_grace, self.collaborators.transport.as_ref())
            .await;
        info!(session_id = %id, "Session ended");
        Ok(())
    }

    pub async fn touch(&self, id: &SessionId) -> Result<()> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(id)
            .ok_or_else(|| ParleyError::NotFound(id.to_string()))?;
        session.activity().touch();
        Ok(())
    }

    /// `Active` while the session's machine is running; unknown ids are `Inactive`.
    pub async fn status(&self, id: &SessionId) -> SessionStatus {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|s| status_of(&s.snapshot()))
            .unwrap_or(SessionStatus::Inactive)
    }

    pub async fn describe(&self, id: &SessionId) -> Result<SessionInfo> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(SessionInfo::from_session)
            .ok_or_else(|| ParleyError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .read()
            .await
            .values()
            .map(SessionInfo::from_session)
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    pub async fn snapshot(&self, id: &SessionId) -> Result<TurnSnapshot> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(Session::snapshot)
            .ok_or_else(|| ParleyError::NotFound(id.to_string()))
    }

    pub async fn subscribe(&self, id: &SessionId) -> Result<broadcast::Receiver<TurnEvent>> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(Session::subscribe)
            .ok_or_else(|| ParleyError::NotFound(id.to_string()))
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// End every session idle for longer than the inactivity timeout.
    pub async fn reap_inactive(&self) -> Vec<SessionId> {
        let timeout = self.settings.inactivity_timeout;
        let expired: Vec<SessionId> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.activity().idle_for() > timeout)
            .map(|s| s.id.clone())
            .collect();

        let mut reaped = Vec::with_capacity(expired.len());
        for id in expired {
            match self.end(&id).await {
                Ok(()) => {
                    info!(session_id = %id, timeout_secs = timeout.as_secs(), "Reaped inactive session");
                    reaped.push(id);
                }
                Err(_) => debug!(session_id = %id, "Session ended before reaping"),
            }
        }
        reaped
    }

    /// Run the reaper on its interval and remove sessions whose machine
    /// terminated itself. Returns `None` if a supervisor is already running.
    pub fn spawn_supervisor(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut terminated = self.terminated.lock().ok()?.take()?;
        let registry = Arc::clone(self);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.settings.reap_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            info!(
                interval_secs = registry.settings.reap_interval.as_secs(),
                timeout_secs = registry.settings.inactivity_timeout.as_secs(),
                "Session supervisor started"
            );

            loop {
                tokio::select! {
                    _ = registry.stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let reaped = registry.reap_inactive().await;
                        if !reaped.is_empty() {
                            info!(count = reaped.len(), "Reaper sweep finished");
                        }
                    }
                    Some((id, reason)) = terminated.recv() => {
                        match registry.end(&id).await {
                            Ok(()) => info!(session_id = %id, ?reason, "Removed terminated session"),
                            Err(ParleyError::NotFound(_)) => debug!(session_id = %id, "Terminated session already removed"),
                            Err(e) => warn!(session_id = %id, error = %e, "Failed to remove terminated session"),
                        }
                    }
                }
            }

            debug!("Session supervisor stopped");
        }))
    }

    /// Stop the supervisor and end every session.
    pub async fn shutdown(&self) {
        self.stop.cancel();
        let ids = self.ids().await;
        let count = ids.len();
        for id in ids {
            let _ = self.end(&id).await;
        }
        info!(count, "Session registry drained");
    }

    pub async fn health_snapshot(&self) -> HealthSnapshot {
        self.collaborators.health(self.len().await)
    }
}
