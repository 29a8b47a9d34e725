//! Speech capture — feeds inbound PCM through the VAD and emits utterances.

use tracing::debug;

use crate::audio::{AudioBuffer, SAMPLE_RATE};
use crate::vad::{VadTransition, VoiceActivityDetector};

/// Speech boundary detected on a session's inbound audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    /// The caller started speaking.
    Start,
    /// The caller stopped speaking; carries the complete utterance.
    End(AudioBuffer),
}

/// Buffers inbound audio, runs VAD on 20ms frames, and cuts utterances.
pub struct SpeechCapture {
    vad: VoiceActivityDetector,
    pending: Vec<i16>,
    carry: Option<u8>,
    utterance: Vec<i16>,
    /// Set once an utterance hit the length cap; the rest of that speech run
    /// is dropped until the VAD reports silence.
    truncated: bool,
    frame_size: usize, // samples per frame (e.g., 320 for 20ms at 16kHz)
    sample_rate: u32,
    max_utterance_samples: usize,
}

impl SpeechCapture {
    pub fn new(threshold: f64, silence_frames: usize, max_utterance_ms: u64) -> Self {
        let sample_rate = SAMPLE_RATE;
        Self {
            vad: VoiceActivityDetector::new(threshold, silence_frames),
            pending: Vec::new(),
            carry: None,
            utterance: Vec::new(),
            truncated: false,
            frame_size: (sample_rate as usize) / 50, // 20ms frames
            sample_rate,
            max_utterance_samples: (sample_rate as u64 * max_utterance_ms / 1000) as usize,
        }
    }

    /// Feed raw little-endian PCM bytes as they arrive from the transport.
    pub fn push_bytes(&mut self, raw: &[u8]) -> Vec<SpeechEvent> {
        let mut bytes = Vec::with_capacity(raw.len() + 1);
        if let Some(b) = self.carry.take() {
            bytes.push(b);
        }
        bytes.extend_from_slice(raw);
        if bytes.len() % 2 == 1 {
            self.carry = bytes.pop();
        }

        let audio = AudioBuffer::from_le_bytes(&bytes, self.sample_rate);
        self.push_samples(&audio.samples)
    }

    pub fn push_samples(&mut self, samples: &[i16]) -> Vec<SpeechEvent> {
        self.pending.extend_from_slice(samples);
        let mut events = Vec::new();

        while self.pending.len() >= self.frame_size {
            let frame: Vec<i16> = self.pending.drain(..self.frame_size).collect();
            match self.vad.process_frame(&frame) {
                Some(VadTransition::Started) => {
                    debug!("VAD detected speech start");
                    self.utterance.clear();
                    self.utterance.extend_from_slice(&frame);
                    events.push(SpeechEvent::Start);
                }
                Some(VadTransition::Ended) if self.truncated => {
                    debug!("Speech after length cap ended");
                    self.truncated = false;
                }
                Some(VadTransition::Ended) => {
                    self.utterance.extend_from_slice(&frame);
                    debug!(samples = self.utterance.len(), "VAD detected speech end");
                    events.push(SpeechEvent::End(self.take_utterance()));
                }
                None if self.vad.is_active() && !self.truncated => {
                    self.utterance.extend_from_slice(&frame);
                    if self.max_utterance_samples > 0
                        && self.utterance.len() >= self.max_utterance_samples
                    {
                        debug!("Utterance hit length cap, cutting");
                        self.truncated = true;
                        events.push(SpeechEvent::End(self.take_utterance()));
                    }
                }
                None => {}
            }
        }

        events
    }

    fn take_utterance(&mut self) -> AudioBuffer {
        AudioBuffer::new(std::mem::take(&mut self.utterance), self.sample_rate)
    }
}
