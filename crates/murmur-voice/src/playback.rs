//! **Playback**: plays server audio responses and the optional capture monitor.
//!
//! Each response gets its own `rodio::Sink` whose completion is awaited, which
//! is what lets the duplex arbiter keep the microphone closed for exactly as long
//! as the speaker is busy. If the `play` future is dropped early the sink is
//! stopped with it, so capture never resumes over a still-playing response.

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::io::Cursor;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Audio output collaborator.
///
/// `play` resolves once the audio has finished (or failed). Dropping the future
/// must stop the audio. Implementations may hold device handles that are not
/// `Send`, so futures are local.
#[async_trait(?Send)]
pub trait Playback {
    /// Decode and play an encoded buffer (WAV/MP3) to completion.
    async fn play(&self, audio: &[u8]) -> VoiceResult<()>;

    /// Echo a captured frame to the output device (audio passthrough).
    fn monitor(&self, _samples: &[f32], _sample_rate: u32) {}
}

/// Shared playback: lets a caller keep volume control while a session owns
/// the other handle.
#[async_trait(?Send)]
impl<P: Playback + ?Sized> Playback for Rc<P> {
    async fn play(&self, audio: &[u8]) -> VoiceResult<()> {
        (**self).play(audio).await
    }

    fn monitor(&self, samples: &[f32], sample_rate: u32) {
        (**self).monitor(samples, sample_rate)
    }
}

/// Raw gain control: a volume and a mute switch on top of it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gain {
    volume: f32,
    muted: bool,
}

impl Gain {
    pub fn new(volume: f32, muted: bool) -> Self {
        Self {
            volume: volume.clamp(0.0, 1.0),
            muted,
        }
    }

    /// Volume actually applied to the sink.
    pub fn effective(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        self.muted
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }
}

/// Something that can be silenced mid-playback.
trait Halt {
    fn halt(&self);
}

impl Halt for Sink {
    fn halt(&self) {
        self.stop();
    }
}

/// The response currently playing. Dropping the guard silences it and clears
/// the slot, so a cancelled `play` never leaves audio running under capture.
struct ActiveResponse<'a, H: Halt> {
    slot: &'a Mutex<Option<Arc<H>>>,
    output: Arc<H>,
}

impl<'a, H: Halt> ActiveResponse<'a, H> {
    fn register(slot: &'a Mutex<Option<Arc<H>>>, output: Arc<H>) -> Self {
        if let Ok(mut current) = slot.lock() {
            *current = Some(Arc::clone(&output));
        }
        Self { slot, output }
    }
}

impl<H: Halt> Drop for ActiveResponse<'_, H> {
    fn drop(&mut self) {
        self.output.halt();
        if let Ok(mut current) = self.slot.lock() {
            *current = None;
        }
    }
}

/// Default-speaker playback.
pub struct RodioPlayback {
    _stream: OutputStream,
    stream_handle: OutputStreamHandle,
    response: Mutex<Option<Arc<Sink>>>,
    monitor: Sink,
    gain: Mutex<Gain>,
}

impl RodioPlayback {
    /// Open the default output device. Response playback starts at full volume
    /// unless `start_muted` is set.
    pub fn new(start_muted: bool) -> VoiceResult<Self> {
        let (stream, stream_handle) =
            OutputStream::try_default().map_err(|e| VoiceError::Playback(e.to_string()))?;
        let monitor =
            Sink::try_new(&stream_handle).map_err(|e| VoiceError::Playback(e.to_string()))?;
        info!(muted = start_muted, "🔊 Playback: output device ready");
        Ok(Self {
            _stream: stream,
            stream_handle,
            response: Mutex::new(None),
            monitor,
            gain: Mutex::new(Gain::new(1.0, start_muted)),
        })
    }

    pub fn set_volume(&self, volume: f32) {
        self.update_gain(|g| g.set_volume(volume));
    }

    /// Flip mute and return the new muted state.
    pub fn toggle_mute(&self) -> bool {
        let muted = self.update_gain(|g| {
            g.toggle_mute();
        });
        info!(muted, "Playback: mute toggled");
        muted
    }

    pub fn is_muted(&self) -> bool {
        self.gain.lock().map(|g| g.is_muted()).unwrap_or(false)
    }

    fn effective_volume(&self) -> f32 {
        self.gain.lock().map(|g| g.effective()).unwrap_or(1.0)
    }

    fn update_gain(&self, f: impl FnOnce(&mut Gain)) -> bool {
        let (volume, muted) = match self.gain.lock() {
            Ok(mut gain) => {
                f(&mut gain);
                (gain.effective(), gain.is_muted())
            }
            Err(_) => return false,
        };
        if let Ok(current) = self.response.lock() {
            if let Some(sink) = current.as_ref() {
                sink.set_volume(volume);
            }
        }
        muted
    }
}

#[async_trait(?Send)]
impl Playback for RodioPlayback {
    async fn play(&self, audio: &[u8]) -> VoiceResult<()> {
        if audio.is_empty() {
            return Ok(());
        }
        let cursor = Cursor::new(audio.to_vec());
        let source = rodio::Decoder::new(cursor)
            .map_err(|e| VoiceError::Playback(format!("Decode failed: {}", e)))?;
        let sink = Sink::try_new(&self.stream_handle)
            .map_err(|e| VoiceError::Playback(e.to_string()))?;
        sink.set_volume(self.effective_volume());
        sink.append(source.convert_samples::<f32>());
        debug!(bytes = audio.len(), "Playback: response queued");

        let active = ActiveResponse::register(&self.response, Arc::new(sink));
        let sink = Arc::clone(&active.output);
        tokio::task::spawn_blocking(move || sink.sleep_until_end())
            .await
            .map_err(|e| VoiceError::Playback(format!("playback task failed: {}", e)))?;
        drop(active);
        Ok(())
    }

    fn monitor(&self, samples: &[f32], sample_rate: u32) {
        self.monitor
            .append(SamplesBuffer::new(1, sample_rate, samples.to_vec()));
    }
}
