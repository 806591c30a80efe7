//! Audio capture using CPAL
//!
//! The capture side of the engine: a `FrameSource` delivers fixed-size frames on a
//! channel and can be paused while a response plays back.

use crate::config::SessionConfig;
use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Audio configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate in Hz (default: 16000)
    pub sample_rate: u32,

    /// Number of channels (default: 1 for mono)
    pub channels: u16,

    /// Samples per frame (default: 4096, 256ms at 16kHz)
    pub buffer_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            buffer_size: 4096,
        }
    }
}

impl From<&SessionConfig> for AudioConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: 1,
            buffer_size: config.buffer_size,
        }
    }
}

/// One capture tick worth of samples.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Audio samples (f32, normalized to -1.0 to 1.0)
    pub samples: Vec<f32>,

    /// Timestamp when the last sample of the frame was captured
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            timestamp: Instant::now(),
        }
    }
}

/// Producer of fixed-size frames.
///
/// `stop` must release the device and be safe to call repeatedly. While paused a
/// source must not deliver frames.
pub trait FrameSource {
    /// Open the device and begin delivering frames. Failure is fatal for the session.
    fn start(&mut self) -> VoiceResult<mpsc::UnboundedReceiver<Frame>>;

    fn pause(&mut self);

    fn resume(&mut self);

    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Cuts the device's variable-size callbacks into fixed-size frames.
///
/// A partial frame belongs to one capture generation. When the generation
/// changes (pause or resume) the partial frame is dropped, so audio from before
/// a pause never reaches a frame emitted after it.
#[derive(Debug)]
struct FrameAssembler {
    buffer: Vec<f32>,
    buffer_size: usize,
    generation: u64,
}

impl FrameAssembler {
    fn new(buffer_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
            generation: 0,
        }
    }

    /// Append `data` and return every frame it completed.
    fn accept(&mut self, data: &[f32], generation: u64) -> Vec<Vec<f32>> {
        if generation != self.generation {
            self.buffer.clear();
            self.generation = generation;
        }
        let mut frames = Vec::new();
        for &sample in data {
            self.buffer.push(sample);
            if self.buffer.len() >= self.buffer_size {
                frames.push(std::mem::replace(
                    &mut self.buffer,
                    Vec::with_capacity(self.buffer_size),
                ));
            }
        }
        frames
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Default-microphone frame source.
pub struct CpalFrameSource {
    config: AudioConfig,
    paused: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    stream: Option<Stream>,
}

impl CpalFrameSource {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            paused: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            stream: None,
        }
    }

    /// List available input devices
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;

        let mut device_names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                device_names.push(name);
            }
        }

        Ok(device_names)
    }
}

impl FrameSource for CpalFrameSource {
    fn start(&mut self) -> VoiceResult<mpsc::UnboundedReceiver<Frame>> {
        if self.stream.is_some() {
            return Err(VoiceError::AudioStream("capture already started".to_string()));
        }
        info!(
            sample_rate = self.config.sample_rate,
            buffer_size = self.config.buffer_size,
            "Starting microphone capture"
        );

        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string()))?;

        info!(
            "Using input device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let stream_config = StreamConfig {
            channels: self.config.channels,
            sample_rate: cpal::SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let mut assembler = FrameAssembler::new(self.config.buffer_size);
        let paused = Arc::clone(&self.paused);
        let generation = Arc::clone(&self.generation);
        paused.store(false, Ordering::SeqCst);
        generation.fetch_add(1, Ordering::SeqCst);

        let stream = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if paused.load(Ordering::SeqCst) {
                    return;
                }
                for samples in assembler.accept(data, generation.load(Ordering::SeqCst)) {
                    if frame_tx.send(Frame::new(samples)).is_err() {
                        // Receiver dropped: session is gone
                        return;
                    }
                }
            },
            move |err| {
                warn!("Audio stream error: {}", err);
            },
            None,
        )?;

        stream.play()?;
        self.stream = Some(stream);
        info!("✅ Microphone capture started");

        Ok(frame_rx)
    }

    fn pause(&mut self) {
        self.paused.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                warn!("Failed to pause capture stream: {}", e);
            }
        }
    }

    fn resume(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.play() {
                warn!("Failed to resume capture stream: {}", e);
            }
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.paused.store(true, Ordering::SeqCst);
            drop(stream);
            info!("🛑 Microphone capture stopped, device released");
        }
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalFrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}
