//! Media pipeline — audio buffers, speech capture, STT, TTS, and transport.

pub mod audio;
pub mod capture;
pub mod stt;
pub mod transport;
pub mod tts;
pub mod vad;

pub use audio::AudioBuffer;
pub use capture::{SpeechCapture, SpeechEvent};
pub use stt::SpeechToText;
pub use transport::{ChannelTransport, MediaTransport, RoomEdge, RoomHandle};
pub use tts::TextToSpeech;
