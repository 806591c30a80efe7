//! Utterance segmentation over classified frames.
//!
//! Silent → Speaking → Ending → (pause confirmed) → Silent. Pause confirmation is
//! counted in whole frames, never wall-clock time, so the outcome depends only on
//! the frame sequence. The segmenter is a plain transition function: it returns
//! the event a frame produced and leaves delivery to the caller.

use crate::config::{LogLevel, SessionConfig};
use crate::energy::Verdict;
use crate::preroll::PreRollBuffer;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info};

/// Segmentation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// No speech; frames go to the pre-roll buffer.
    Silent,
    /// Speech in progress.
    Speaking,
    /// Speech stopped; counting silent frames toward the pause threshold.
    Ending,
}

impl SegmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentState::Silent => "silent",
            SegmentState::Speaking => "speaking",
            SegmentState::Ending => "ending",
        }
    }
}

/// A completed utterance: pre-roll, speech and trailing silence, concatenated.
#[derive(Debug, Clone)]
pub struct Utterance {
    /// PCM samples (f32, -1.0..1.0).
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Number of frames concatenated into `samples`.
    pub frames: usize,
    /// When the pause was confirmed.
    pub timestamp: DateTime<Utc>,
}

impl Utterance {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Events produced by a single frame.
#[derive(Debug, Clone)]
pub enum SegmentEvent {
    /// Silent → Speaking.
    SpeechStarted { timestamp: DateTime<Utc> },
    /// Ending → Speaking; the pause was not long enough.
    SpeechResumed,
    /// Pause confirmed; the utterance is complete.
    SpeechEnded(Utterance),
}

/// Frame-driven speech segmenter with pre-roll.
#[derive(Debug)]
pub struct Segmenter {
    state: SegmentState,
    silent_frames: usize,
    max_silent_frames: usize,
    pre_roll: PreRollBuffer,
    samples: Vec<f32>,
    frames: usize,
    sample_rate: u32,
    log_level: LogLevel,
}

impl Segmenter {
    /// Build from a configuration that has already passed `validate()`.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            state: SegmentState::Silent,
            silent_frames: 0,
            max_silent_frames: config.max_silent_frames(),
            pre_roll: PreRollBuffer::new(config.pre_roll_capacity()),
            samples: Vec::new(),
            frames: 0,
            sample_rate: config.sample_rate,
            log_level: config.log_level,
        }
    }

    /// Advance by one frame. Every call mutates state exactly once.
    pub fn process(&mut self, frame: &[f32], verdict: Verdict) -> Option<SegmentEvent> {
        if self.log_level.verbose() {
            debug!(
                energy = verdict.score,
                speech = verdict.is_speech,
                state = self.state.as_str(),
                "frame classified"
            );
        }

        match (self.state, verdict.is_speech) {
            (SegmentState::Silent, false) => {
                self.pre_roll.push(frame.to_vec());
                None
            }

            (SegmentState::Silent, true) => {
                let pre_roll = self.pre_roll.drain();
                if self.log_level.standard() {
                    info!(pre_roll_frames = pre_roll.len(), "🎤 Speech start detected");
                }
                self.samples.clear();
                self.frames = 0;
                for f in pre_roll {
                    self.append(&f);
                }
                self.append(frame);
                self.silent_frames = 0;
                self.state = SegmentState::Speaking;
                Some(SegmentEvent::SpeechStarted {
                    timestamp: Utc::now(),
                })
            }

            (SegmentState::Speaking, true) => {
                self.append(frame);
                self.silent_frames = 0;
                None
            }

            (SegmentState::Speaking, false) => {
                if self.log_level.standard() {
                    info!("Silence detected, waiting for pause");
                }
                self.append(frame);
                self.silent_frames = 1;
                self.state = SegmentState::Ending;
                self.confirm_pause()
            }

            (SegmentState::Ending, true) => {
                if self.log_level.standard() {
                    info!(silent_frames = self.silent_frames, "🎤 Speech resumed");
                }
                self.append(frame);
                self.silent_frames = 0;
                self.state = SegmentState::Speaking;
                Some(SegmentEvent::SpeechResumed)
            }

            (SegmentState::Ending, false) => {
                self.append(frame);
                self.silent_frames += 1;
                self.confirm_pause()
            }
        }
    }

    /// Emit the utterance once enough silent frames have accumulated.
    fn confirm_pause(&mut self) -> Option<SegmentEvent> {
        if self.silent_frames < self.max_silent_frames {
            return None;
        }
        if self.log_level.standard() {
            info!(
                silent_frames = self.silent_frames,
                frames = self.frames,
                samples = self.samples.len(),
                "✅ Pause confirmed, utterance complete"
            );
        }
        let utterance = Utterance {
            samples: std::mem::take(&mut self.samples),
            sample_rate: self.sample_rate,
            frames: self.frames,
            timestamp: Utc::now(),
        };
        self.frames = 0;
        self.silent_frames = 0;
        self.state = SegmentState::Silent;
        Some(SegmentEvent::SpeechEnded(utterance))
    }

    fn append(&mut self, frame: &[f32]) {
        self.samples.extend_from_slice(frame);
        self.frames += 1;
    }

    /// Drop any partial utterance and pre-roll; back to `Silent`.
    pub fn reset(&mut self) {
        self.state = SegmentState::Silent;
        self.silent_frames = 0;
        self.samples.clear();
        self.frames = 0;
        self.pre_roll.clear();
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    pub fn silent_frames(&self) -> usize {
        self.silent_frames
    }

    /// Frames held in the in-progress utterance (0 while silent).
    pub fn buffered_frames(&self) -> usize {
        self.frames
    }

    pub fn pre_roll_len(&self) -> usize {
        self.pre_roll.len()
    }

    pub fn max_silent_frames(&self) -> usize {
        self.max_silent_frames
    }
}
