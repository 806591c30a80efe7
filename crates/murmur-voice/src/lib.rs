//! # Murmur Voice - Energy-Based Speech Segmentation
//!
//! This crate turns a live microphone into discrete utterances for a speech
//! server, and plays the server's spoken responses without ever hearing itself.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Voice Session                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │   Audio In   │→ │  RMS Energy  │→ │  Segmenter   │      │
//! │  │    (cpal)    │  │  Classifier  │  │ (pre-roll +  │      │
//! │  └──────────────┘  └──────────────┘  │  pause gap)  │      │
//! │         ↑                            └──────────────┘      │
//! │         │ pause / resume                     ↓ WAV         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │    Duplex    │← │    Router    │← │  WebSocket   │      │
//! │  │   Arbiter    │  │ (audio/text) │  │  Transport   │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │         ↓                  ↓                               │
//! │  ┌──────────────┐  ┌──────────────┐                        │
//! │  │  Audio Out   │  │   Display    │                        │
//! │  │   (rodio)    │  │    Sink      │                        │
//! │  └──────────────┘  └──────────────┘                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod arbiter;
pub mod audio;
pub mod config;
pub mod display;
pub mod energy;
pub mod error;
pub mod playback;
pub mod preroll;
pub mod router;
pub mod segmenter;
pub mod session;
pub mod transport;
pub mod wav;

pub use arbiter::{CaptureControl, DuplexArbiter, PlaybackOutcome};
pub use audio::{AudioConfig, CpalFrameSource, Frame, FrameSource};
pub use config::{LogLevel, SessionConfig};
pub use display::{transcript_prefix, DisplaySink};
pub use energy::{rms, EnergyClassifier, Verdict};
pub use error::{VoiceError, VoiceResult};
pub use playback::{Gain, Playback, RodioPlayback};
pub use preroll::PreRollBuffer;
pub use router::{decode_text, route, Route, TextPayload, DEFAULT_SOURCE};
pub use segmenter::{SegmentEvent, SegmentState, Segmenter, Utterance};
pub use session::{SessionEnd, SessionStats, VoiceSession};
pub use transport::{
    connect, websocket_url, InboundMessage, OutboundMessage, TransportEvent, TransportHandle,
};
pub use wav::{encode_wav, WavHeader, HEADER_LEN};
