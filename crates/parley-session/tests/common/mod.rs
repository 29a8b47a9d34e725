//! Scripted collaborators and audio helpers shared by the session tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use parley_backend::AiBackend;
use parley_core::error::{ParleyError, Result};
use parley_core::types::SessionId;
use parley_media::{AudioBuffer, SpeechToText, TextToSpeech};
use parley_session::TurnEvent;

pub const FRAME_SAMPLES: usize = 320;

/// `count` 20ms frames of constant amplitude, as little-endian bytes.
pub fn frames(amplitude: i16, count: usize) -> Vec<u8> {
    vec![amplitude; FRAME_SAMPLES * count]
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

/// Loud frames that open an utterance.
pub fn speech() -> Vec<u8> {
    frames(5_000, 10)
}

/// Enough silence to close an utterance with `silence_frames` configured.
pub fn silence(silence_frames: usize) -> Vec<u8> {
    frames(0, silence_frames + 1)
}

/// Wait (bounded) for the first event matching `pred`, returning it and
/// everything seen before it.
pub async fn wait_for(
    events: &mut broadcast::Receiver<TurnEvent>,
    pred: impl Fn(&TurnEvent) -> bool,
) -> (TurnEvent, Vec<TurnEvent>) {
    let mut seen = Vec::new();
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(event) => seen.push(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for turn event");
    (found, seen)
}

// --- Speech to text ---

pub struct MockStt {
    transcript: Mutex<String>,
    fail: bool,
    pub calls: AtomicUsize,
}

impl MockStt {
    pub fn saying(text: &str) -> Self {
        Self {
            transcript: Mutex::new(text.to_string()),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::saying("")
        }
    }

    pub fn set(&self, text: &str) {
        *self.transcript.lock().unwrap() = text.to_string();
    }
}

#[async_trait]
impl SpeechToText for MockStt {
    fn id(&self) -> &str {
        "mock-stt"
    }

    async fn transcribe(&self, audio: &AudioBuffer, _language: Option<&str>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(!audio.is_empty());
        if self.fail {
            return Err(ParleyError::Service("stt down".into()));
        }
        Ok(self.transcript.lock().unwrap().clone())
    }
}

// --- Text to speech ---

pub struct MockTts {
    samples: usize,
    fail: bool,
    pub texts: Mutex<Vec<String>>,
    pub voices: Mutex<Vec<String>>,
}

impl MockTts {
    /// Synthesizes `ms` milliseconds of 16kHz audio per call.
    pub fn with_duration_ms(ms: usize) -> Self {
        Self {
            samples: 16 * ms,
            fail: false,
            texts: Mutex::new(Vec::new()),
            voices: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::with_duration_ms(100)
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextToSpeech for MockTts {
    fn id(&self) -> &str {
        "mock-tts"
    }

    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<AudioBuffer> {
        assert!(!text.trim().is_empty(), "synthesizing an empty utterance");
        self.texts.lock().unwrap().push(text.to_string());
        self.voices.lock().unwrap().push(voice_id.to_string());
        if self.fail {
            return Err(ParleyError::Service("tts down".into()));
        }
        Ok(AudioBuffer::new(vec![1_000; self.samples], 16_000))
    }
}

// --- AI backend ---

#[derive(Debug, Clone)]
pub enum Behavior {
    Reply(String),
    Timeout,
    Unavailable,
    /// A body with no usable reply field.
    Malformed,
    /// Reply after a delay.
    Slow(Duration, String),
    /// Never answer.
    Hang,
}

/// Counts a call as in flight until dropped (completed or aborted).
struct InFlight<'a> {
    ai: &'a MockAi,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.ai.in_flight.fetch_sub(1, Ordering::SeqCst);
        if !self.finished {
            self.ai.aborted.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct MockAi {
    script: Mutex<VecDeque<Behavior>>,
    fallback: Behavior,
    pub requests: Mutex<Vec<(SessionId, String)>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub aborted: AtomicUsize,
}

impl MockAi {
    pub fn new(fallback: Behavior) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            aborted: AtomicUsize::new(0),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(Behavior::Reply(text.to_string()))
    }

    /// Behaviors used, in order, before falling back.
    pub fn then(self, behavior: Behavior) -> Self {
        self.script.lock().unwrap().push_back(behavior);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AiBackend for MockAi {
    fn id(&self) -> &str {
        "mock-ai"
    }

    async fn ask(&self, session_id: &SessionId, text: &str) -> Result<String> {
        self.requests
            .lock()
            .unwrap()
            .push((session_id.clone(), text.to_string()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let mut guard = InFlight {
            ai: self,
            finished: false,
        };

        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let result = match behavior {
            Behavior::Reply(text) => Ok(text),
            Behavior::Timeout => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(ParleyError::Timeout {
                    collaborator: "ai_backend",
                    after_ms: 20,
                })
            }
            Behavior::Unavailable => Err(ParleyError::BackendUnavailable("webhook returned 502".into())),
            Behavior::Malformed => Err(ParleyError::MalformedResponse(
                "no non-empty reply in fields [\"output\", \"text\", \"message\"]".into(),
            )),
            Behavior::Slow(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        };
        guard.finished = true;
        result
    }
}
