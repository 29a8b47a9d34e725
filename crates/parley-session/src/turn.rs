//! Turn State Machine.
//!
//! One machine runs per session inside its own task. It owns at most one
//! in-flight stage future (a transcription, an AI exchange, a synthesis or a
//! playback) and polls it alongside inbound audio and the session's
//! cancellation token. Dropping the stage future is how a turn is
//! interrupted: the outstanding HTTP request is aborted with it and the
//! machine never waits for it to settle.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_backend::SessionBackend;
use parley_core::config::Config;
use parley_core::error::{ParleyError, Result};
use parley_core::types::{SessionId, TurnOutcome, TurnState};
use parley_media::{AudioBuffer, MediaTransport, RoomHandle, SpeechCapture, SpeechEvent};
use parley_media::{SpeechToText, TextToSpeech};

use crate::collaborators::ReadyCollaborators;
use crate::session::Activity;

const EVENT_CAPACITY: usize = 256;

/// Per-session turn-taking policy.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnPolicy {
    /// Transcripts with fewer non-whitespace characters never reach the AI backend.
    pub min_transcript_chars: usize,
    /// Consecutive failures that end the session; 0 never ends it.
    pub max_consecutive_failures: u32,
    pub ai_retries: u32,
    pub apology: String,
    pub greeting: Option<String>,
    /// Playback pacing; 0 sends the whole reply at once.
    pub playback_chunk_ms: u64,
    pub voice_id: String,
    pub language: Option<String>,
    pub vad_threshold: f64,
    pub vad_silence_frames: usize,
    pub max_utterance_ms: u64,
}

impl TurnPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_transcript_chars: config.min_transcript_chars(),
            max_consecutive_failures: config.max_consecutive_failures(),
            ai_retries: config.ai_retries(),
            apology: config.apology(),
            greeting: config.greeting(),
            playback_chunk_ms: config.playback_chunk_ms(),
            voice_id: config.default_voice(),
            language: config.default_language(),
            vad_threshold: config.vad_threshold(),
            vad_silence_frames: config.vad_silence_frames(),
            max_utterance_ms: config.max_utterance_ms(),
        }
    }

    /// Whether a transcript carries enough to forward.
    pub fn is_meaningful(&self, transcript: &str) -> bool {
        transcript.chars().filter(|c| !c.is_whitespace()).count() >= self.min_transcript_chars
    }
}

impl Default for TurnPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Observable state of a machine, published on every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TurnSnapshot {
    pub state: TurnState,
    /// Number of the current (or most recent) turn; 0 before the first.
    pub turn: u64,
    pub consecutive_failures: u32,
    pub completed_turns: u64,
    pub last_transcript: Option<String>,
    pub last_reply: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnSummary {
    pub turn: u64,
    pub transcript: Option<String>,
    pub reply: Option<String>,
    pub fallback: bool,
    pub outcome: TurnOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The session was ended from outside (end request, reaper, shutdown).
    Ended,
    /// Too many consecutive collaborator failures.
    FaultLimit,
    /// The transport stopped delivering audio.
    TransportClosed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TurnEvent {
    StateChanged { from: TurnState, to: TurnState },
    Replied { turn: u64, text: String, fallback: bool },
    Finished(TurnSummary),
    Terminated { reason: TerminationReason },
}

enum StageOutput {
    Transcript(Result<String>),
    Reply(Result<String>),
    Audio(Result<AudioBuffer>),
    Played(Result<()>),
}

type StageFuture = BoxFuture<'static, StageOutput>;

enum Step {
    Cancelled,
    Frame(Option<Vec<u8>>),
    Stage(StageOutput),
}

enum Flow {
    Continue,
    Stop(TerminationReason),
}

struct Turn {
    number: u64,
    transcript: Option<String>,
    reply: Option<String>,
    fallback: bool,
    /// Greeting or apology: a failure finishes the turn instead of apologising.
    scripted: bool,
}

pub struct TurnMachine {
    session_id: SessionId,
    room: RoomHandle,
    transport: Arc<dyn MediaTransport>,
    stt: Arc<dyn SpeechToText>,
    tts: Arc<dyn TextToSpeech>,
    backend: SessionBackend,
    policy: TurnPolicy,
    activity: Activity,
    capture: SpeechCapture,

    state: TurnState,
    turn: Option<Turn>,
    stage: Option<StageFuture>,
    turns_started: u64,
    completed_turns: u64,
    failures: u32,
    last_transcript: Option<String>,
    last_reply: Option<String>,

    status: watch::Sender<TurnSnapshot>,
    events: broadcast::Sender<TurnEvent>,
}

impl TurnMachine {
    pub fn new(
        session_id: SessionId,
        room: RoomHandle,
        collaborators: &ReadyCollaborators,
        policy: TurnPolicy,
        activity: Activity,
    ) -> Self {
        let (status, _) = watch::channel(TurnSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let capture = SpeechCapture::new(
            policy.vad_threshold,
            policy.vad_silence_frames,
            policy.max_utterance_ms,
        );

        Self {
            backend: SessionBackend::new(session_id.clone(), collaborators.ai.clone()),
            session_id,
            room,
            transport: collaborators.transport.clone(),
            stt: collaborators.stt.clone(),
            tts: collaborators.tts.clone(),
            policy,
            activity,
            capture,
            state: TurnState::Idle,
            turn: None,
            stage: None,
            turns_started: 0,
            completed_turns: 0,
            failures: 0,
            last_transcript: None,
            last_reply: None,
            status,
            events,
        }
    }

    pub fn status(&self) -> watch::Receiver<TurnSnapshot> {
        self.status.subscribe()
    }

    pub fn events(&self) -> broadcast::Sender<TurnEvent> {
        self.events.clone()
    }

    /// Drive the session until it is cancelled, its transport closes, or it
    /// hits the fault limit.
    pub async fn run(
        mut self,
        mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
        cancel: CancellationToken,
    ) -> TerminationReason {
        info!(session_id = %self.session_id, room_id = %self.room.room_id, "Turn machine started");

        if let Some(greeting) = self.policy.greeting.clone() {
            self.begin_turn(true);
            self.speak(greeting, false);
        }

        let reason = loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                frame = frames.recv() => Step::Frame(frame),
                output = poll_stage(&mut self.stage) => Step::Stage(output),
            };

            let flow = match step {
                Step::Cancelled => Flow::Stop(TerminationReason::Ended),
                Step::Frame(Some(bytes)) => {
                    self.on_frame(&bytes);
                    Flow::Continue
                }
                Step::Frame(None) => Flow::Stop(TerminationReason::TransportClosed),
                Step::Stage(output) => {
                    self.stage = None;
                    self.on_stage(output)
                }
            };

            if let Flow::Stop(reason) = flow {
                break reason;
            }
        };

        self.terminate(reason);
        reason
    }

    fn on_frame(&mut self, bytes: &[u8]) {
        for event in self.capture.push_bytes(bytes) {
            match event {
                SpeechEvent::Start => self.on_speech_start(),
                SpeechEvent::End(audio) => self.on_speech_end(audio),
            }
        }
    }

    fn on_speech_start(&mut self) {
        self.activity.touch();
        if self.state.accepts_barge_in() {
            info!(session_id = %self.session_id, state = %self.state, "Barge-in, superseding turn");
            self.stage = None;
            self.finish(TurnOutcome::Superseded);
        }
        self.begin_turn(false);
        self.transition(TurnState::Capturing);
    }

    fn on_speech_end(&mut self, audio: AudioBuffer) {
        self.activity.touch();
        if self.state != TurnState::Capturing {
            debug!(state = %self.state, "Utterance ended outside capture, ignoring");
            return;
        }

        debug!(duration_ms = audio.duration_ms(), "Utterance captured");
        self.transition(TurnState::Transcribing);

        let stt = self.stt.clone();
        let language = self.policy.language.clone();
        self.stage = Some(
            async move { StageOutput::Transcript(stt.transcribe(&audio, language.as_deref()).await) }
                .boxed(),
        );
    }

    fn on_stage(&mut self, output: StageOutput) -> Flow {
        match output {
            StageOutput::Transcript(Ok(text)) => self.on_transcript(text),
            StageOutput::Reply(Ok(text)) => {
                self.activity.touch();
                self.speak(text, false);
                Flow::Continue
            }
            StageOutput::Audio(Ok(audio)) => {
                self.play(audio);
                Flow::Continue
            }
            StageOutput::Played(Ok(())) => {
                self.settle(TurnOutcome::Completed);
                Flow::Continue
            }
            StageOutput::Audio(Err(e)) if self.is_scripted() => {
                warn!(session_id = %self.session_id, error = %e, "Could not synthesize scripted reply");
                self.settle(TurnOutcome::Failed);
                Flow::Continue
            }
            StageOutput::Played(Err(e)) => {
                warn!(session_id = %self.session_id, error = %e, "Playback failed");
                self.settle(TurnOutcome::Failed);
                Flow::Continue
            }
            StageOutput::Reply(Err(e)) => {
                self.activity.touch();
                self.on_failure(e)
            }
            StageOutput::Transcript(Err(e)) | StageOutput::Audio(Err(e)) => self.on_failure(e),
        }
    }

    fn on_transcript(&mut self, text: String) -> Flow {
        if let Some(turn) = self.turn.as_mut() {
            turn.transcript = Some(text.clone());
        }
        self.last_transcript = Some(text.clone());

        if !self.policy.is_meaningful(&text) {
            debug!(session_id = %self.session_id, transcript = %text, "Transcript too short, discarding");
            self.settle(TurnOutcome::Discarded);
            return Flow::Continue;
        }

        info!(session_id = %self.session_id, transcript = %text, "Caller said");
        self.activity.touch();
        self.transition(TurnState::AwaitingReply);

        let backend = self.backend.clone();
        let retries = self.policy.ai_retries;
        self.stage = Some(
            async move { StageOutput::Reply(ask_with_retries(&backend, &text, retries).await) }
                .boxed(),
        );
        Flow::Continue
    }

    /// A collaborator failed mid-turn: apologise, or give up on the session.
    fn on_failure(&mut self, error: ParleyError) -> Flow {
        self.failures += 1;
        warn!(
            session_id = %self.session_id,
            state = %self.state,
            kind = error.kind(),
            failures = self.failures,
            error = %error,
            "Collaborator failed"
        );

        self.publish();

        let limit = self.policy.max_consecutive_failures;
        if limit > 0 && self.failures >= limit {
            return Flow::Stop(TerminationReason::FaultLimit);
        }

        if let Some(turn) = self.turn.as_mut() {
            turn.scripted = true;
        }
        let apology = self.policy.apology.clone();
        self.speak(apology, true);
        Flow::Continue
    }

    fn speak(&mut self, text: String, fallback: bool) {
        let number = match self.turn.as_mut() {
            Some(turn) => {
                turn.reply = Some(text.clone());
                turn.fallback = fallback;
                turn.number
            }
            None => 0,
        };
        self.last_reply = Some(text.clone());
        self.emit(TurnEvent::Replied {
            turn: number,
            text: text.clone(),
            fallback,
        });
        self.transition(TurnState::Synthesizing);

        let tts = self.tts.clone();
        let voice = self.policy.voice_id.clone();
        self.stage =
            Some(async move { StageOutput::Audio(tts.synthesize(&text, &voice).await) }.boxed());
    }

    fn play(&mut self, audio: AudioBuffer) {
        debug!(duration_ms = audio.duration_ms(), "Playing reply");
        self.transition(TurnState::Speaking);

        let transport = self.transport.clone();
        let room = self.room.clone();
        let chunk_ms = self.policy.playback_chunk_ms;
        self.stage = Some(
            async move { StageOutput::Played(playback(transport, room, audio, chunk_ms).await) }
                .boxed(),
        );
    }

    fn begin_turn(&mut self, scripted: bool) {
        self.turns_started += 1;
        self.turn = Some(Turn {
            number: self.turns_started,
            transcript: None,
            reply: None,
            fallback: false,
            scripted,
        });
    }

    fn is_scripted(&self) -> bool {
        self.turn.as_ref().is_some_and(|t| t.scripted)
    }

    /// Close out the current turn without changing state.
    fn finish(&mut self, outcome: TurnOutcome) {
        let Some(turn) = self.turn.take() else {
            return;
        };

        if outcome == TurnOutcome::Completed {
            self.completed_turns += 1;
            if !turn.fallback {
                self.failures = 0;
            }
        }

        info!(session_id = %self.session_id, turn = turn.number, ?outcome, "Turn finished");
        self.publish();
        self.emit(TurnEvent::Finished(TurnSummary {
            turn: turn.number,
            transcript: turn.transcript,
            reply: turn.reply,
            fallback: turn.fallback,
            outcome,
        }));
    }

    /// Close out the current turn and go back to waiting for speech.
    fn settle(&mut self, outcome: TurnOutcome) {
        self.finish(outcome);
        self.transition(TurnState::Idle);
    }

    fn terminate(&mut self, reason: TerminationReason) {
        self.stage = None;
        self.turn = None;
        self.transition(TurnState::Terminated);
        self.emit(TurnEvent::Terminated { reason });
        info!(session_id = %self.session_id, ?reason, "Turn machine terminated");
    }

    fn transition(&mut self, to: TurnState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        debug!(session_id = %self.session_id, %from, %to, "State change");
        self.emit(TurnEvent::StateChanged { from, to });
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(TurnSnapshot {
            state: self.state,
            turn: self.turns_started,
            consecutive_failures: self.failures,
            completed_turns: self.completed_turns,
            last_transcript: self.last_transcript.clone(),
            last_reply: self.last_reply.clone(),
        });
    }

    fn emit(&self, event: TurnEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

async fn poll_stage(stage: &mut Option<StageFuture>) -> StageOutput {
    match stage {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn ask_with_retries(backend: &SessionBackend, text: &str, retries: u32) -> Result<String> {
    let mut attempt = 0;
    loop {
        match backend.ask(text).await {
            Ok(reply) => return Ok(reply),
            Err(e) if attempt < retries && e.is_collaborator_failure() => {
                attempt += 1;
                warn!(session_id = %backend.session_id(), attempt, error = %e, "AI backend failed, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Stream audio to the room, sleeping for each chunk's duration so a
/// barge-in can cut playback short.
async fn playback(
    transport: Arc<dyn MediaTransport>,
    room: RoomHandle,
    audio: AudioBuffer,
    chunk_ms: u64,
) -> Result<()> {
    for chunk in audio.chunks(chunk_ms) {
        let pace: Duration = chunk.duration();
        transport.send_audio(&room, chunk).await?;
        if chunk_ms > 0 {
            tokio::time::sleep(pace).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use parley_core::config::SessionConfig;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = TurnPolicy::default();
        assert_eq!(policy.min_transcript_chars, 3);
        assert_eq!(policy.max_consecutive_failures, 3);
        assert_eq!(policy.ai_retries, 0);
        assert_eq!(
            policy.apology,
            "I'm having some technical difficulties. Please try again."
        );
        assert!(policy.greeting.is_none());
        assert_eq!(policy.playback_chunk_ms, 200);
    }

    #[test]
    fn test_policy_from_session_config() {
        let config = Config {
            session: Some(SessionConfig {
                min_transcript_chars: Some(5),
                ai_retries: Some(1),
                greeting: Some("Hi! I'm your AI assistant. How can I help you today?".into()),
                ..SessionConfig::default()
            }),
            ..Config::default()
        };
        let policy = TurnPolicy::from_config(&config);
        assert_eq!(policy.min_transcript_chars, 5);
        assert_eq!(policy.ai_retries, 1);
        assert!(policy.greeting.unwrap().starts_with("Hi!"));
    }

    #[test]
    fn test_meaningful_ignores_whitespace() {
        let policy = TurnPolicy::default();
        assert!(!policy.is_meaningful(""));
        assert!(!policy.is_meaningful("  u h  "));
        assert!(policy.is_meaningful("yes"));
        assert!(policy.is_meaningful(" What's the weather? "));
    }

    #[test]
    fn test_event_serialization() {
        let event = TurnEvent::StateChanged {
            from: TurnState::Idle,
            to: TurnState::Capturing,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "state_changed", "from": "idle", "to": "capturing"})
        );

        let event = TurnEvent::Terminated {
            reason: TerminationReason::FaultLimit,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "terminated", "reason": "fault_limit"})
        );
    }
}
