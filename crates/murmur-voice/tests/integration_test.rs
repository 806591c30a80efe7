//! Integration tests for the voice session
//!
//! Most tests drive the session with in-memory collaborators. The hardware
//! tests at the bottom need a microphone and speakers and are ignored by default.

use async_trait::async_trait;
use murmur_voice::{
    encode_wav, AudioConfig, CpalFrameSource, DisplaySink, Frame, FrameSource, InboundMessage,
    LogLevel, OutboundMessage, Playback, PlaybackOutcome, RodioPlayback, SegmentState,
    SessionConfig, SessionEnd, TransportEvent, VoiceError, VoiceResult, VoiceSession, WavHeader,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc;

type Log = Rc<RefCell<Vec<String>>>;

/// Frame source whose sender the test holds.
struct ChannelSource {
    log: Log,
    sender: Rc<RefCell<Option<mpsc::UnboundedSender<Frame>>>>,
}

impl FrameSource for ChannelSource {
    fn start(&mut self) -> VoiceResult<mpsc::UnboundedReceiver<Frame>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.borrow_mut() = Some(tx);
        self.log.borrow_mut().push("capture:start".into());
        Ok(rx)
    }

    fn pause(&mut self) {
        self.log.borrow_mut().push("capture:pause".into());
    }

    fn resume(&mut self) {
        self.log.borrow_mut().push("capture:resume".into());
    }

    fn stop(&mut self) {
        self.log.borrow_mut().push("capture:stop".into());
    }

    fn is_running(&self) -> bool {
        self.sender.borrow().is_some()
    }
}

struct LoggedPlayback {
    log: Log,
    fail: bool,
}

#[async_trait(?Send)]
impl Playback for LoggedPlayback {
    async fn play(&self, audio: &[u8]) -> VoiceResult<()> {
        self.log.borrow_mut().push(format!("play:{}", audio.len()));
        if self.fail {
            return Err(VoiceError::Playback("Unable to decode audio".into()));
        }
        Ok(())
    }
}

struct LoggedDisplay {
    log: Log,
}

impl DisplaySink for LoggedDisplay {
    fn transcript(&self, text: &str, source: &str) {
        self.log.borrow_mut().push(format!("transcript:{}:{}", source, text));
    }

    fn speaking(&self, speaking: bool) {
        self.log.borrow_mut().push(format!("speaking:{}", speaking));
    }

    fn status(&self, message: &str) {
        self.log.borrow_mut().push(format!("status:{}", message));
    }
}

struct Harness {
    log: Log,
    frames: FrameTx,
    session: VoiceSession<ChannelSource, LoggedPlayback, LoggedDisplay>,
}

fn harness(fail_playback: bool) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    // 4096 samples at 16 kHz is 256 ms per frame: one silent frame ends speech
    // and the pre-roll holds one frame.
    let config = SessionConfig {
        positive_speech_threshold: 0.02,
        pause_duration_ms: 256,
        pre_speech_pad_ms: 200,
        sample_rate: 16_000,
        buffer_size: 4096,
        log_level: LogLevel::Verbose,
        audio_passthrough: false,
        username: "ada".to_string(),
        ..Default::default()
    };
    let log: Log = Rc::default();
    let frames = Rc::new(RefCell::new(None));
    let source = ChannelSource {
        log: log.clone(),
        sender: frames.clone(),
    };
    let playback = LoggedPlayback {
        log: log.clone(),
        fail: fail_playback,
    };
    let display = LoggedDisplay { log: log.clone() };
    let session = VoiceSession::new(config, source, playback, display).unwrap();
    Harness {
        log,
        frames,
        session,
    }
}

type FrameTx = Rc<RefCell<Option<mpsc::UnboundedSender<Frame>>>>;

fn push_frame(frames: &FrameTx, level: f32) {
    let sender = frames.borrow();
    sender
        .as_ref()
        .expect("capture not started")
        .send(Frame::new(vec![level; 4096]))
        .unwrap();
}

fn entries(log: &Log, prefix: &str) -> Vec<String> {
    log.borrow()
        .iter()
        .filter(|e| e.starts_with(prefix))
        .cloned()
        .collect()
}

#[tokio::test]
async fn test_full_conversation_turn() {
    let mut h = harness(false);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    h.session.start(out_tx).unwrap();
    assert_eq!(
        out_rx.recv().await,
        Some(OutboundMessage::Config {
            username: "ada".to_string()
        })
    );

    let frames = h.frames.clone();
    let driver = async {
        push_frame(&frames, 0.0);
        push_frame(&frames, 0.5);
        push_frame(&frames, 0.0);

        let Some(OutboundMessage::Utterance(wav)) = out_rx.recv().await else {
            panic!("expected one utterance");
        };
        let header = WavHeader::parse(&wav).unwrap();
        assert_eq!(header.sample_rate, 16_000);
        assert_eq!(header.data_len as usize, 3 * 4096 * 2);

        event_tx
            .send(TransportEvent::Message(InboundMessage::Text(
                r#"{"type":"transcript","data":"hello","source":"user"}"#.to_string(),
            )))
            .unwrap();
        event_tx
            .send(TransportEvent::Message(InboundMessage::Binary(
                encode_wav(&[0.1; 160], 16_000),
            )))
            .unwrap();
        event_tx
            .send(TransportEvent::Message(InboundMessage::Text("not json".to_string())))
            .unwrap();
        event_tx
            .send(TransportEvent::Closed {
                reason: Some("server shutdown".to_string()),
            })
            .unwrap();
    };

    let (end, ()) = tokio::join!(h.session.run(&mut event_rx), driver);

    assert_eq!(
        end.unwrap(),
        SessionEnd::TransportClosed {
            reason: Some("server shutdown".to_string())
        }
    );
    assert!(!h.session.is_running());
    assert_eq!(h.session.stats().utterances, 1);
    assert_eq!(h.session.stats().responses_played, 1);

    assert_eq!(
        entries(&h.log, "transcript:"),
        vec!["transcript:user:hello", "transcript:server:not json"]
    );
    assert_eq!(
        entries(&h.log, "capture:"),
        vec![
            "capture:start",
            "capture:pause",
            "capture:resume",
            "capture:stop"
        ]
    );
    let play_at = h.log.borrow().iter().position(|e| e.starts_with("play:")).unwrap();
    let pause_at = h.log.borrow().iter().position(|e| e == "capture:pause").unwrap();
    let resume_at = h.log.borrow().iter().position(|e| e == "capture:resume").unwrap();
    assert!(pause_at < play_at && play_at < resume_at);
    assert!(h
        .log
        .borrow()
        .contains(&"status:Connection lost. Please try again.".to_string()));
}

#[tokio::test]
async fn test_failed_playback_resumes_capture() {
    let mut h = harness(true);
    let (out_tx, _out_rx) = mpsc::unbounded_channel();
    h.session.start(out_tx).unwrap();

    let outcome = h
        .session
        .handle_inbound(InboundMessage::Binary(vec![0xde, 0xad]))
        .await;

    assert!(matches!(outcome, Some(PlaybackOutcome::Failed(_))));
    assert_eq!(h.session.stats().responses_failed, 1);
    assert_eq!(
        entries(&h.log, "capture:"),
        vec!["capture:start", "capture:pause", "capture:resume"]
    );

    // capture keeps working after the failure
    h.session.handle_frame(Frame::new(vec![0.5; 4096])).unwrap();
    assert_eq!(h.session.state(), SegmentState::Speaking);
}

#[tokio::test]
async fn test_capture_end_stops_session() {
    let mut h = harness(false);
    let (out_tx, _out_rx) = mpsc::unbounded_channel();
    let (_event_tx, mut event_rx) = mpsc::unbounded_channel();
    h.session.start(out_tx).unwrap();

    // Dropping the sender ends the frame stream.
    h.frames.borrow_mut().take();

    let end = h.session.run(&mut event_rx).await.unwrap();
    assert_eq!(end, SessionEnd::CaptureEnded);
    assert!(!h.session.is_running());
}

#[tokio::test]
async fn test_stop_is_idempotent_and_discards_partial_speech() {
    let mut h = harness(false);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    h.session.start(out_tx).unwrap();
    let _ = out_rx.recv().await;

    h.session.handle_frame(Frame::new(vec![0.5; 4096])).unwrap();
    h.session.stop();
    h.session.stop();

    // The partial utterance was dropped, not sent.
    assert!(out_rx.recv().await.is_none());
    assert_eq!(entries(&h.log, "status:Recording stopped").len(), 1);
    assert_eq!(entries(&h.log, "capture:stop").len(), 2);
}

#[tokio::test]
async fn test_restart_after_stop_sends_config_again() {
    let mut h = harness(false);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    h.session.start(out_tx).unwrap();
    h.session.stop();

    let (out_tx, mut second_rx) = mpsc::unbounded_channel();
    h.session.start(out_tx).unwrap();
    assert!(h.session.is_running());
    assert!(matches!(out_rx.recv().await, Some(OutboundMessage::Config { .. })));
    assert!(matches!(
        second_rx.recv().await,
        Some(OutboundMessage::Config { .. })
    ));
}

#[tokio::test]
#[ignore] // Requires audio hardware
async fn test_microphone_delivers_frames() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut source = CpalFrameSource::new(AudioConfig::default());
    let mut frames = source.start().expect("Failed to open microphone");

    let frame = tokio::time::timeout(Duration::from_secs(2), frames.recv())
        .await
        .expect("No frame within two seconds")
        .expect("Frame stream closed");
    assert_eq!(frame.samples.len(), AudioConfig::default().buffer_size);

    source.stop();
    source.stop();
    assert!(!source.is_running());
}

#[tokio::test]
#[ignore] // Requires audio output
async fn test_speaker_plays_tone() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let playback = RodioPlayback::new(false).expect("Failed to open output device");
    let tone: Vec<f32> = (0..8000)
        .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / 16_000.0).sin() * 0.2)
        .collect();
    playback
        .play(&encode_wav(&tone, 16_000))
        .await
        .expect("Playback failed");
}
