//! Example: Speech Segmentation Test
//!
//! Listens to your microphone and prints every utterance the segmenter closes,
//! without connecting to a server. Tune the threshold with MURMUR_THRESHOLD.

use murmur_voice::{
    encode_wav, AudioConfig, CpalFrameSource, EnergyClassifier, FrameSource, SegmentEvent,
    Segmenter, SessionConfig,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = SessionConfig::from_env()?;
    config.validate()?;

    info!("🎤 Murmur Segmentation Test");
    info!(
        "threshold {} | {:.0} ms frames | utterance ends after {} silent frame(s)",
        config.positive_speech_threshold,
        config.frame_duration_ms(),
        config.max_silent_frames()
    );
    info!("Press Ctrl+C to stop.");

    let classifier = EnergyClassifier::new(config.positive_speech_threshold);
    let mut segmenter = Segmenter::new(&config);
    let mut source = CpalFrameSource::new(AudioConfig::from(&config));
    let mut frames = source.start()?;

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let verdict = classifier.classify(&frame.samples);
                match segmenter.process(&frame.samples, verdict) {
                    Some(SegmentEvent::SpeechStarted { timestamp }) => {
                        info!("🎤 Speech started at {}", timestamp);
                    }
                    Some(SegmentEvent::SpeechEnded(utterance)) => {
                        let wav = encode_wav(&utterance.samples, utterance.sample_rate);
                        info!(
                            "✅ Utterance: {} frames, {:.2}s, {} WAV bytes",
                            utterance.frames,
                            utterance.duration().as_secs_f32(),
                            wav.len()
                        );
                    }
                    Some(SegmentEvent::SpeechResumed) | None => {}
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    source.stop();
    info!("👋 Goodbye!");
    Ok(())
}
