//! Audio sink adapter: codec decode, ring-buffered playback, underrun
//! recovery
//!
//! Compressed audio frames are decoded to interleaved 16-bit PCM and fed
//! into a ring buffer consumed by a playback device running on its own
//! clock. If the device reports an unexpected stop while data is still
//! buffered and the session is active, exactly one automatic restart is
//! attempted before giving up.

use crate::pipeline::health::SessionHealth;
use crate::pipeline::types::AudioFrame;
use crate::sink::AudioOutput;
use crate::sink::ring_buffer::AudioRingBuffer;
use ac_ffmpeg::codec::Decoder;
use ac_ffmpeg::codec::audio::AudioDecoder;
use ac_ffmpeg::packet::PacketMut;
use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const I16_TO_F32: f32 = 1.0 / 32768.0;
const F32_TO_I16: f32 = 32767.0;

/// Decoder seam between the ingest stage and the codec implementation.
///
/// Decode failures must never escape the ingestion path: callers count
/// the error, drop the frame, and move on.
pub trait AudioDecode: Send {
    /// Decode one compressed frame into interleaved i16 samples.
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>>;
}

/// Opus decoder backed by ffmpeg, preferring libopus over the built-in
/// implementation.
pub struct OpusAudioDecoder {
    decoder: AudioDecoder,
}

// Safety: the decoder is owned and driven by the single ingest task.
unsafe impl Send for OpusAudioDecoder {}

impl OpusAudioDecoder {
    pub fn new() -> Result<Self> {
        let decoder = AudioDecoder::new("libopus").or_else(|e| {
            warn!(
                "libopus decoder not available ({}), trying built-in opus decoder",
                e
            );
            AudioDecoder::new("opus")
        })?;
        Ok(Self { decoder })
    }

    fn drain_frames(&mut self, out: &mut Vec<i16>) {
        while let Ok(Some(frame)) = self.decoder.take() {
            let planes = frame.planes();
            let sample_count = frame.samples();
            if sample_count == 0 {
                continue;
            }

            if planes.len() >= 2 {
                let left = planes[0].data();
                let right = planes[1].data();
                if !append_planar_stereo(out, left, right, sample_count) {
                    warn!(
                        "OpusAudioDecoder: planar frame truncated ({}+{} bytes, {} samples)",
                        left.len(),
                        right.len(),
                        sample_count
                    );
                }
                continue;
            }

            if let Some(data) = planes.first().map(|p| p.data())
                && !append_interleaved_stereo(out, data, sample_count)
            {
                warn!(
                    "OpusAudioDecoder: interleaved frame truncated ({} bytes, {} samples)",
                    data.len(),
                    sample_count
                );
            }
        }
    }
}

impl AudioDecode for OpusAudioDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>> {
        let mut samples = Vec::new();

        let packet = PacketMut::from(payload).freeze();
        match self.decoder.try_push(packet) {
            Ok(()) => {}
            Err(e) if e.is_again() => {
                self.drain_frames(&mut samples);
                let retry = PacketMut::from(payload).freeze();
                self.decoder
                    .try_push(retry)
                    .map_err(|e| anyhow!("audio decode retry failed: {}", e))?;
            }
            Err(e) => return Err(anyhow!("audio decode failed: {}", e)),
        }
        self.drain_frames(&mut samples);

        Ok(samples)
    }
}

fn append_planar_stereo(out: &mut Vec<i16>, left: &[u8], right: &[u8], sample_count: usize) -> bool {
    let min_bytes_f32 = sample_count * 4;
    if left.len() >= min_bytes_f32 && right.len() >= min_bytes_f32 {
        let left_f32: &[f32] =
            unsafe { std::slice::from_raw_parts(left.as_ptr() as *const f32, sample_count) };
        let right_f32: &[f32] =
            unsafe { std::slice::from_raw_parts(right.as_ptr() as *const f32, sample_count) };
        for i in 0..sample_count {
            out.push((left_f32[i].clamp(-1.0, 1.0) * F32_TO_I16) as i16);
            out.push((right_f32[i].clamp(-1.0, 1.0) * F32_TO_I16) as i16);
        }
        return true;
    }

    let min_bytes_i16 = sample_count * 2;
    if left.len() >= min_bytes_i16 && right.len() >= min_bytes_i16 {
        let left_i16: &[i16] =
            unsafe { std::slice::from_raw_parts(left.as_ptr() as *const i16, sample_count) };
        let right_i16: &[i16] =
            unsafe { std::slice::from_raw_parts(right.as_ptr() as *const i16, sample_count) };
        for i in 0..sample_count {
            out.push(left_i16[i]);
            out.push(right_i16[i]);
        }
        return true;
    }

    false
}

fn append_interleaved_stereo(out: &mut Vec<i16>, data: &[u8], sample_count: usize) -> bool {
    let total_samples = sample_count * 2;
    let min_bytes_f32 = total_samples * 4;
    if data.len() >= min_bytes_f32 {
        let samples: &[f32] =
            unsafe { std::slice::from_raw_parts(data.as_ptr() as *const f32, total_samples) };
        out.extend(samples.iter().map(|&s| (s.clamp(-1.0, 1.0) * F32_TO_I16) as i16));
        return true;
    }

    let min_bytes_i16 = total_samples * 2;
    if data.len() >= min_bytes_i16 {
        let samples: &[i16] =
            unsafe { std::slice::from_raw_parts(data.as_ptr() as *const i16, total_samples) };
        out.extend_from_slice(samples);
        return true;
    }

    false
}

/// One-shot restart policy for unexpected playback stops.
///
/// A stop with data still buffered gets exactly one restart attempt; a
/// successful restart re-arms the policy, a failed one latches it so a
/// second stop is reported but not retried (no restart storms).
#[derive(Debug, Default)]
pub(crate) struct UnderrunRecovery {
    attempted: bool,
    gave_up_logged: bool,
}

impl UnderrunRecovery {
    /// Decide whether a restart should be attempted for this stop event.
    pub(crate) fn should_attempt(&mut self, buffered_samples: usize) -> bool {
        if buffered_samples == 0 {
            // A drained buffer stopping is a normal underrun, not a
            // device failure
            return false;
        }
        if self.attempted {
            if !self.gave_up_logged {
                warn!("AudioSink: playback stopped again after failed restart, giving up");
                self.gave_up_logged = true;
            }
            return false;
        }
        self.attempted = true;
        true
    }

    /// A restart went through; re-arm for a future stop.
    pub(crate) fn restart_succeeded(&mut self) {
        self.attempted = false;
        self.gave_up_logged = false;
    }
}

/// Ring-buffered playback sink for decoded PCM.
pub struct AudioSink {
    ring: Arc<AudioRingBuffer>,
    device: cpal::Device,
    stream: Option<cpal::Stream>,
    playing: Arc<AtomicBool>,
    recovery: UnderrunRecovery,
    sample_rate: u32,
    channels: u16,
    health: Arc<SessionHealth>,
    overflow_logged: bool,
}

// Safety: the cpal stream handle is only driven from the scheduler
// thread once constructed; the device callback communicates exclusively
// through the ring buffer and atomics.
unsafe impl Send for AudioSink {}

impl AudioSink {
    /// Resolve the output device and allocate the ring buffer. A missing
    /// device is fatal to session startup.
    pub fn new(sample_rate: u32, channels: u16, health: Arc<SessionHealth>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no audio output device available"))?;

        // 500ms of headroom at the negotiated rate
        let capacity = sample_rate as usize * channels as usize / 2;

        Ok(Self {
            ring: Arc::new(AudioRingBuffer::new(capacity)),
            device,
            stream: None,
            playing: Arc::new(AtomicBool::new(false)),
            recovery: UnderrunRecovery::default(),
            sample_rate,
            channels,
            health,
            overflow_logged: false,
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let config = cpal::StreamConfig {
            channels: self.channels,
            sample_rate: self.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let ring = Arc::clone(&self.ring);
        let playing = Arc::clone(&self.playing);
        let stream = self
            .device
            .build_output_stream(
                &config,
                move |output: &mut [f32], _| {
                    ring.read(output);
                },
                move |err| {
                    // Unexpected device stop; the scheduler's maintain()
                    // pass applies the restart policy
                    error!("Audio output error: {}", err);
                    playing.store(false, Ordering::Release);
                },
                None,
            )
            .context("failed to build audio output stream")?;
        Ok(stream)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }
}

impl AudioOutput for AudioSink {
    fn start_playback(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = self.build_stream()?;
        stream.play().context("failed to start audio playback")?;
        self.playing.store(true, Ordering::Release);
        self.stream = Some(stream);
        info!(
            "AudioSink: playback started ({} Hz, {} channels)",
            self.sample_rate, self.channels
        );
        Ok(())
    }

    fn write_frame(&mut self, frame: &AudioFrame) -> Result<()> {
        let samples: Vec<f32> = frame.samples().iter().map(|&s| s as f32 * I16_TO_F32).collect();
        let written = self.ring.write(&samples);
        if written < samples.len() && !self.overflow_logged {
            // Sustained overflow repeats forever; report it once and let
            // the counter tell the rest
            warn!(
                "AudioSink: ring buffer overflow, dropping samples ({} dropped so far)",
                self.ring.samples_dropped()
            );
            self.overflow_logged = true;
        }
        Ok(())
    }

    fn buffered(&self) -> Duration {
        let per_second = self.sample_rate as u64 * self.channels as u64;
        Duration::from_micros(self.ring.available() as u64 * 1_000_000 / per_second)
    }

    fn maintain(&mut self) {
        let Some(stream) = &self.stream else {
            return; // playback not started yet
        };
        if self.playing.load(Ordering::Acquire) {
            return;
        }

        if self.recovery.should_attempt(self.ring.available()) {
            warn!(
                "AudioSink: playback stopped with {:?} buffered, attempting restart",
                self.buffered()
            );
            match stream.play() {
                Ok(()) => {
                    self.playing.store(true, Ordering::Release);
                    self.recovery.restart_succeeded();
                    info!("AudioSink: playback restarted");
                }
                Err(e) => {
                    error!("AudioSink: playback restart failed: {}", e);
                    self.health.record_sink_error();
                }
            }
        }
    }
}
