//! Energy-based speech/silence classification.
//!
//! Each frame is scored by the root-mean-square of its samples and compared
//! against a fixed threshold. No smoothing, no adaptation: the segmenter's
//! pause counting is what absorbs short dips.

/// Root-mean-square of a frame. An empty frame scores 0.
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / frame.len() as f64).sqrt() as f32
}

/// Outcome of classifying one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    /// RMS energy of the frame (non-negative).
    pub score: f32,
    /// `score > threshold`.
    pub is_speech: bool,
}

/// Threshold classifier over per-frame RMS energy.
#[derive(Debug, Clone, Copy)]
pub struct EnergyClassifier {
    threshold: f32,
}

impl EnergyClassifier {
    /// Threshold validity is checked by `SessionConfig::validate`.
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn classify(&self, frame: &[f32]) -> Verdict {
        let score = rms(frame);
        Verdict {
            score,
            is_speech: score > self.threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}
