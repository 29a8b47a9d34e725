//! Raw audio buffers exchanged between the transport and the speech gateways.

use std::time::Duration;

/// Sample rate used across the pipeline (16kHz mono, 16-bit PCM).
pub const SAMPLE_RATE: u32 = 16_000;

/// A bounded buffer of 16-bit mono PCM samples.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioBuffer {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decode little-endian 16-bit PCM bytes. A trailing odd byte is dropped.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect();
        Self::new(samples, sample_rate)
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms())
    }

    /// Split into consecutive buffers of at most `chunk_ms` each.
    /// `chunk_ms == 0` yields the whole buffer as a single chunk.
    pub fn chunks(&self, chunk_ms: u64) -> Vec<AudioBuffer> {
        let per_chunk = (self.sample_rate as u64 * chunk_ms / 1000) as usize;
        if per_chunk == 0 || per_chunk >= self.samples.len() {
            return vec![self.clone()];
        }
        self.samples
            .chunks(per_chunk)
            .map(|c| AudioBuffer::new(c.to_vec(), self.sample_rate))
            .collect()
    }

    /// Wrap the samples in a WAV container.
    pub fn to_wav(&self) -> Vec<u8> {
        pcm_to_wav(&self.samples, self.sample_rate, 1, 16)
    }
}

/// Wrap raw 16-bit PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let data_len = pcm.len() * 2; // 2 bytes per i16 sample
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;
    let file_size = 36 + data_len as u32;

    let mut wav = Vec::with_capacity(44 + data_len);

    // RIFF header
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt chunk
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data_len as u32).to_le_bytes());
    for &sample in pcm {
        wav.extend_from_slice(&sample.to_le_bytes());
    }

    wav
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_header_generation() {
        let audio = AudioBuffer::new(vec![0i16; 16000], SAMPLE_RATE); // 1 second
        let wav = audio.to_wav();

        // WAV header is 44 bytes
        assert_eq!(wav.len(), 44 + 16000 * 2);

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");

        // Sample rate (bytes 24-27)
        let sr = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        assert_eq!(sr, 16000);
    }

    #[test]
    fn test_decode_drops_trailing_byte() {
        let audio = AudioBuffer::from_le_bytes(&[0x10, 0x00, 0xff, 0xff, 0x07], SAMPLE_RATE);
        assert_eq!(audio.samples, vec![16, -1]);
        assert_eq!(audio.to_le_bytes(), vec![0x10, 0x00, 0xff, 0xff]);
    }

    #[test]
    fn test_duration() {
        let audio = AudioBuffer::new(vec![0; 320], SAMPLE_RATE);
        assert_eq!(audio.duration_ms(), 20);
        assert_eq!(AudioBuffer::default().duration_ms(), 0);
    }

    #[test]
    fn test_chunks() {
        let audio = AudioBuffer::new(vec![1; 16000], SAMPLE_RATE);
        let chunks = audio.chunks(200);
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| c.duration_ms() == 200));

        assert_eq!(audio.chunks(0).len(), 1);
        assert_eq!(audio.chunks(5000).len(), 1);
    }
}
