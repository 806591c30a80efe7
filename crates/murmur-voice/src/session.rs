//! Voice session: the single owner of every handle a conversation needs.
//!
//! This ties together the frame source, classifier, segmenter, playback, display
//! and transport channels. One cooperative loop drives everything: a frame is
//! fully processed (including its notifications) before the next one is read,
//! and no frame is read while a response is playing.

use crate::arbiter::{CaptureControl, DuplexArbiter, PlaybackOutcome};
use crate::audio::{Frame, FrameSource};
use crate::config::SessionConfig;
use crate::display::DisplaySink;
use crate::energy::EnergyClassifier;
use crate::error::{VoiceError, VoiceResult};
use crate::playback::Playback;
use crate::router::{route, Route};
use crate::segmenter::{SegmentEvent, SegmentState, Segmenter};
use crate::transport::{InboundMessage, OutboundMessage, TransportEvent};
use crate::wav::encode_wav;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const STATUS_LISTENING: &str = "Connected. Speak into your microphone.";
pub const STATUS_CONNECTION_LOST: &str = "Connection lost. Please try again.";
pub const STATUS_STOPPED: &str = "Recording stopped. Press Start to begin again.";

/// Why `run` returned.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
    /// The server closed the connection or it failed.
    TransportClosed { reason: Option<String> },
    /// The frame source stopped delivering.
    CaptureEnded,
}

/// Counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames: u64,
    pub utterances: u64,
    pub responses_played: u64,
    pub responses_failed: u64,
}

/// Frame source plus the segmentation state it feeds.
struct Capture<S: FrameSource> {
    source: S,
    segmenter: Segmenter,
    frames: Option<mpsc::UnboundedReceiver<Frame>>,
    paused: bool,
}

impl<S: FrameSource> Capture<S> {
    fn start(&mut self) -> VoiceResult<()> {
        let rx = self.source.start()?;
        self.frames = Some(rx);
        self.paused = false;
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Frame> {
        match self.frames.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    fn stop(&mut self) {
        self.source.stop();
        self.frames = None;
        self.segmenter.reset();
        self.paused = false;
    }
}

impl<S: FrameSource> CaptureControl for Capture<S> {
    fn pause_capture(&mut self) {
        self.source.pause();
        if self.segmenter.state() != SegmentState::Silent {
            info!(
                frames = self.segmenter.buffered_frames(),
                "Abandoning partial utterance for playback"
            );
        }
        self.segmenter.reset();
        self.paused = true;
    }

    fn resume_capture(&mut self) {
        if let Some(rx) = self.frames.as_mut() {
            let mut stale = 0usize;
            while rx.try_recv().is_ok() {
                stale += 1;
            }
            if stale > 0 {
                debug!(stale, "Discarded frames captured before pause");
            }
        }
        self.source.resume();
        self.paused = false;
    }
}

pub struct VoiceSession<S: FrameSource, P: Playback, D: DisplaySink> {
    config: SessionConfig,
    classifier: EnergyClassifier,
    capture: Capture<S>,
    playback: P,
    display: D,
    arbiter: DuplexArbiter,
    outbound: Option<mpsc::UnboundedSender<OutboundMessage>>,
    running: bool,
    stats: SessionStats,
}

impl<S: FrameSource, P: Playback, D: DisplaySink> VoiceSession<S, P, D> {
    /// Build a session. Configuration errors are reported here, before any device
    /// is touched.
    pub fn new(config: SessionConfig, source: S, playback: P, display: D) -> VoiceResult<Self> {
        config.validate()?;
        let classifier = EnergyClassifier::new(config.positive_speech_threshold);
        let segmenter = Segmenter::new(&config);
        Ok(Self {
            config,
            classifier,
            capture: Capture {
                source,
                segmenter,
                frames: None,
                paused: false,
            },
            playback,
            display,
            arbiter: DuplexArbiter::new(),
            outbound: None,
            running: false,
            stats: SessionStats::default(),
        })
    }

    /// Send the config message, then open the capture device.
    ///
    /// Calling `start` on a running session does nothing. A capture failure
    /// clears all state and is returned to the caller.
    pub fn start(&mut self, outbound: mpsc::UnboundedSender<OutboundMessage>) -> VoiceResult<()> {
        if self.running {
            debug!("start ignored: session already running");
            return Ok(());
        }

        if self.config.log_level.standard() {
            info!(
                threshold = self.config.positive_speech_threshold,
                frame_ms = self.config.frame_duration_ms(),
                max_silent_frames = self.config.max_silent_frames(),
                pre_roll_frames = self.config.pre_roll_capacity(),
                passthrough = self.config.audio_passthrough,
                "Starting voice session"
            );
        }

        let config_message = OutboundMessage::Config {
            username: self.config.username.clone(),
        };
        outbound
            .send(config_message)
            .map_err(|e| VoiceError::ChannelSend(e.to_string()))?;
        debug!(username = %self.config.username, "Sent config message");

        if let Err(e) = self.capture.start() {
            error!("Error starting capture: {}", e);
            self.capture.stop();
            self.display.status(&format!("Error: {}", e));
            return Err(e);
        }

        self.outbound = Some(outbound);
        self.running = true;
        self.display.speaking(false);
        self.display.status(STATUS_LISTENING);
        Ok(())
    }

    /// One capture tick: classify, segment, and ship a finished utterance.
    pub fn handle_frame(&mut self, frame: Frame) -> VoiceResult<()> {
        if !self.running || self.capture.paused {
            return Ok(());
        }
        self.stats.frames += 1;

        if self.config.audio_passthrough {
            self.playback.monitor(&frame.samples, self.config.sample_rate);
        }

        let verdict = self.classifier.classify(&frame.samples);
        match self.capture.segmenter.process(&frame.samples, verdict) {
            Some(SegmentEvent::SpeechStarted { .. }) => self.display.speaking(true),
            Some(SegmentEvent::SpeechResumed) | None => {}
            Some(SegmentEvent::SpeechEnded(utterance)) => {
                self.display.speaking(false);
                let wav = encode_wav(&utterance.samples, utterance.sample_rate);
                info!(
                    frames = utterance.frames,
                    duration_ms = utterance.duration().as_millis() as u64,
                    bytes = wav.len(),
                    "📤 Sending utterance"
                );
                self.send(OutboundMessage::Utterance(wav))?;
                self.stats.utterances += 1;
            }
        }
        Ok(())
    }

    /// Route one inbound message; audio runs a full pause → play → resume cycle.
    pub async fn handle_inbound(&mut self, message: InboundMessage) -> Option<PlaybackOutcome> {
        match route(message) {
            Route::Play(audio) => {
                if self.capture.segmenter.state() != SegmentState::Silent {
                    self.display.speaking(false);
                }
                let outcome = self
                    .arbiter
                    .play_response(&mut self.capture, &self.playback, &audio)
                    .await;
                match outcome {
                    PlaybackOutcome::Completed => self.stats.responses_played += 1,
                    PlaybackOutcome::Failed(_) => self.stats.responses_failed += 1,
                }
                Some(outcome)
            }
            Route::Display { text, source } => {
                self.display.transcript(&text, &source);
                None
            }
            Route::Ignore { reason } => {
                debug!(reason, "Inbound message not displayed");
                None
            }
        }
    }

    /// Drive the session until the transport closes or capture ends. The session
    /// is stopped before this returns.
    pub async fn run(
        &mut self,
        inbound: &mut mpsc::UnboundedReceiver<TransportEvent>,
    ) -> VoiceResult<SessionEnd> {
        loop {
            tokio::select! {
                frame = self.capture.next_frame() => match frame {
                    Some(frame) => {
                        if let Err(e) = self.handle_frame(frame) {
                            warn!("Outbound transport unavailable: {}", e);
                            self.display.status(STATUS_CONNECTION_LOST);
                            self.stop();
                            return Err(e);
                        }
                    }
                    None => {
                        warn!("Frame source ended");
                        self.stop();
                        return Ok(SessionEnd::CaptureEnded);
                    }
                },
                event = inbound.recv() => match event {
                    Some(TransportEvent::Message(message)) => {
                        self.handle_inbound(message).await;
                    }
                    Some(TransportEvent::Closed { reason }) => {
                        info!(reason = reason.as_deref().unwrap_or("-"), "Transport closed");
                        self.display.status(STATUS_CONNECTION_LOST);
                        self.stop();
                        return Ok(SessionEnd::TransportClosed { reason });
                    }
                    None => {
                        self.display.status(STATUS_CONNECTION_LOST);
                        self.stop();
                        return Ok(SessionEnd::TransportClosed { reason: None });
                    }
                },
            }
        }
    }

    /// Release the device, drop buffers and partial utterances. Safe to repeat.
    pub fn stop(&mut self) {
        let was_running = self.running;
        self.running = false;
        self.capture.stop();
        self.outbound = None;
        if was_running {
            self.display.speaking(false);
            self.display.status(STATUS_STOPPED);
            if self.config.log_level.standard() {
                info!(
                    frames = self.stats.frames,
                    utterances = self.stats.utterances,
                    "Voice session stopped"
                );
            }
        }
    }

    fn send(&self, message: OutboundMessage) -> VoiceResult<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| VoiceError::Transport("session has no outbound channel".to_string()))?;
        outbound
            .send(message)
            .map_err(|e| VoiceError::ChannelSend(e.to_string()))
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn state(&self) -> SegmentState {
        self.capture.segmenter.state()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn playback(&self) -> &P {
        &self.playback
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn source(&self) -> &S {
        &self.capture.source
    }
}

impl<S: FrameSource, P: Playback, D: DisplaySink> Drop for VoiceSession<S, P, D> {
    fn drop(&mut self) {
        self.capture.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use async_trait::async_trait;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct FakeSource {
        tx: Option<mpsc::UnboundedSender<Frame>>,
        fail: bool,
        stops: usize,
        pauses: usize,
    }

    impl FrameSource for FakeSource {
        fn start(&mut self) -> VoiceResult<mpsc::UnboundedReceiver<Frame>> {
            if self.fail {
                return Err(VoiceError::AudioDevice("Permission denied".into()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            self.tx = Some(tx);
            Ok(rx)
        }
        fn pause(&mut self) {
            self.pauses += 1;
        }
        fn resume(&mut self) {}
        fn stop(&mut self) {
            self.stops += 1;
            self.tx = None;
        }
        fn is_running(&self) -> bool {
            self.tx.is_some()
        }
    }

    struct NullPlayback;

    #[async_trait(?Send)]
    impl Playback for NullPlayback {
        async fn play(&self, _audio: &[u8]) -> VoiceResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Screen {
        statuses: RefCell<Vec<String>>,
        speaking: RefCell<Vec<bool>>,
    }

    impl DisplaySink for Rc<Screen> {
        fn transcript(&self, _text: &str, _source: &str) {}
        fn speaking(&self, speaking: bool) {
            self.speaking.borrow_mut().push(speaking);
        }
        fn status(&self, message: &str) {
            self.statuses.borrow_mut().push(message.to_string());
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            positive_speech_threshold: 0.02,
            pause_duration_ms: 256,
            log_level: LogLevel::None,
            audio_passthrough: false,
            ..Default::default()
        }
    }

    #[test]
    fn invalid_config_rejected_before_start() {
        let bad = SessionConfig {
            positive_speech_threshold: 0.0,
            ..config()
        };
        let result = VoiceSession::new(bad, FakeSource::default(), NullPlayback, Rc::new(Screen::default()));
        assert!(matches!(result, Err(VoiceError::Config(_))));
    }

    #[test]
    fn device_denied_is_fatal_and_reported() {
        let screen = Rc::new(Screen::default());
        let source = FakeSource {
            fail: true,
            ..Default::default()
        };
        let mut session = VoiceSession::new(config(), source, NullPlayback, screen.clone()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = session.start(tx).unwrap_err();
        assert!(matches!(err, VoiceError::AudioDevice(_)));
        assert!(!session.is_running());
        assert!(screen.statuses.borrow().last().unwrap().starts_with("Error:"));
    }

    #[test]
    fn config_message_goes_first_and_start_is_idempotent() {
        let mut session =
            VoiceSession::new(config(), FakeSource::default(), NullPlayback, Rc::new(Screen::default()))
                .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.start(tx.clone()).unwrap();
        session.start(tx).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            OutboundMessage::Config {
                username: "guest".to_string()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stop_twice_is_safe() {
        let screen = Rc::new(Screen::default());
        let mut session =
            VoiceSession::new(config(), FakeSource::default(), NullPlayback, screen.clone()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        session.start(tx).unwrap();
        session.stop();
        session.stop();
        assert!(!session.is_running());
        assert_eq!(session.state(), SegmentState::Silent);
        let stopped = screen
            .statuses
            .borrow()
            .iter()
            .filter(|s| s.as_str() == STATUS_STOPPED)
            .count();
        assert_eq!(stopped, 1);
        assert!(session.source().stops >= 2);
    }

    #[test]
    fn three_frame_scenario_emits_one_utterance() {
        let screen = Rc::new(Screen::default());
        let mut session =
            VoiceSession::new(config(), FakeSource::default(), NullPlayback, screen.clone()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.start(tx).unwrap();
        let _ = rx.try_recv();

        session.handle_frame(Frame::new(vec![0.0; 4096])).unwrap();
        session.handle_frame(Frame::new(vec![0.5; 4096])).unwrap();
        session.handle_frame(Frame::new(vec![0.0; 4096])).unwrap();

        let Ok(OutboundMessage::Utterance(wav)) = rx.try_recv() else {
            panic!("expected an utterance");
        };
        assert_eq!(wav.len(), 44 + 2 * 3 * 4096);
        assert_eq!(session.stats().utterances, 1);
        // off at start, on at onset, off at the end
        assert_eq!(*screen.speaking.borrow(), vec![false, true, false]);
    }

    #[tokio::test]
    async fn playback_abandons_partial_utterance() {
        let mut session =
            VoiceSession::new(config(), FakeSource::default(), NullPlayback, Rc::new(Screen::default()))
                .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.start(tx).unwrap();
        let _ = rx.try_recv();

        session.handle_frame(Frame::new(vec![0.5; 4096])).unwrap();
        assert_eq!(session.state(), SegmentState::Speaking);

        let outcome = session.handle_inbound(InboundMessage::Binary(vec![1, 2, 3])).await;
        assert_eq!(outcome, Some(PlaybackOutcome::Completed));
        assert_eq!(session.state(), SegmentState::Silent);
        assert_eq!(session.source().pauses, 1);

        // trailing silence after playback must not close the abandoned utterance
        session.handle_frame(Frame::new(vec![0.0; 4096])).unwrap();
        assert!(rx.try_recv().is_err());
    }
}
