//! **Duplex arbitration**: capture and playback never run at the same time.
//!
//! A response is played inside a pause/resume bracket. Resume lives in a guard's
//! `Drop`, so it runs on success, on playback failure, on panic, and when the
//! playing future is cancelled. On cancellation the `Playback` implementation is
//! responsible for silencing its output when its future is dropped.

use crate::playback::Playback;
use tracing::{info, warn};

/// Capture side of the arbitration: pausing must stop frame delivery and drop any
/// partial utterance; resuming must not replay frames captured before the pause.
pub trait CaptureControl {
    fn pause_capture(&mut self);
    fn resume_capture(&mut self);
}

/// Holds capture paused for its lifetime.
struct PauseGuard<'a, C: CaptureControl + ?Sized> {
    capture: &'a mut C,
}

impl<'a, C: CaptureControl + ?Sized> PauseGuard<'a, C> {
    fn engage(capture: &'a mut C) -> Self {
        capture.pause_capture();
        Self { capture }
    }
}

impl<C: CaptureControl + ?Sized> Drop for PauseGuard<'_, C> {
    fn drop(&mut self) {
        self.capture.resume_capture();
    }
}

/// How one arbitration cycle ended. Capture is resumed either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Failed(String),
}

/// Serializes response playback against capture.
#[derive(Debug, Default)]
pub struct DuplexArbiter {
    completed: u64,
    failed: u64,
}

impl DuplexArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause capture, play `audio` to completion, resume capture.
    ///
    /// Playback errors are logged and reported in the outcome, never propagated.
    pub async fn play_response<C, P>(
        &mut self,
        capture: &mut C,
        playback: &P,
        audio: &[u8],
    ) -> PlaybackOutcome
    where
        C: CaptureControl + ?Sized,
        P: Playback + ?Sized,
    {
        let guard = PauseGuard::engage(capture);
        info!(bytes = audio.len(), "🔇 Capture paused, playing response");

        let outcome = match playback.play(audio).await {
            Ok(()) => {
                self.completed += 1;
                PlaybackOutcome::Completed
            }
            Err(e) => {
                warn!("Error decoding or playing audio: {}", e);
                self.failed += 1;
                PlaybackOutcome::Failed(e.to_string())
            }
        };

        drop(guard);
        info!("🎤 Playback settled, capture resumed");
        outcome
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }
}
