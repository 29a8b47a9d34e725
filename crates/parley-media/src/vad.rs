//! Energy-based Voice Activity Detection (VAD).

/// Speech boundary reported by [`VoiceActivityDetector::process_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadTransition {
    Started,
    Ended,
}

/// Voice Activity Detector using RMS energy threshold on 16-bit PCM.
#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    /// RMS threshold for speech detection.
    threshold: f64,
    /// Minimum consecutive silent frames before declaring speech end.
    min_silent_frames: usize,
    speech_active: bool,
    silent_count: usize,
}

impl VoiceActivityDetector {
    pub fn new(threshold: f64, min_silent_frames: usize) -> Self {
        Self {
            threshold,
            min_silent_frames: min_silent_frames.max(1),
            speech_active: false,
            silent_count: 0,
        }
    }

    /// Compute RMS energy of a PCM frame.
    pub fn rms(samples: &[i16]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    /// Process a single audio frame, reporting a speech boundary if one was crossed.
    pub fn process_frame(&mut self, pcm: &[i16]) -> Option<VadTransition> {
        let is_speech = Self::rms(pcm) > self.threshold;

        if is_speech {
            self.silent_count = 0;
            if !self.speech_active {
                self.speech_active = true;
                return Some(VadTransition::Started);
            }
        } else if self.speech_active {
            self.silent_count += 1;
            if self.silent_count >= self.min_silent_frames {
                self.speech_active = false;
                self.silent_count = 0;
                return Some(VadTransition::Ended);
            }
        }

        None
    }

    pub fn is_active(&self) -> bool {
        self.speech_active
    }
}
