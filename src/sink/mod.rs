//! Sink adapters for the two media channels
//!
//! The scheduler releases frames against these seams: a child encode
//! process fed over a byte-stream pipe for video, and a ring-buffered
//! playback device for audio. Both are behind traits so the scheduling
//! logic is testable without spawning ffmpeg or opening a sound device.

pub mod audio;
pub mod ring_buffer;
pub mod video;

use crate::pipeline::types::AudioFrame;
use anyhow::Result;
use std::time::Duration;

/// Downstream consumer of reconstructed H.264 access units.
pub trait VideoOutput: Send {
    /// Write one access unit and flush it immediately; batching defeats
    /// the real-time contract.
    fn write_access_unit(&mut self, au: &[u8]) -> Result<()>;

    /// True once the first access unit has been written and flushed.
    /// Downstream readers should only attach after this, so they never
    /// observe an empty stream and give up.
    fn has_emitted(&self) -> bool;

    /// Graceful teardown: wait out the grace delay so the downstream
    /// process can drain what was already written, close the pipe, then
    /// wait for exit within the timeout, force-terminating on overrun.
    fn shutdown(&mut self, grace: Duration, wait_timeout: Duration);
}

/// Downstream consumer of decoded PCM audio.
pub trait AudioOutput: Send {
    /// Begin playback on the device. Called once, when the initial
    /// buffering window elapses.
    fn start_playback(&mut self) -> Result<()>;

    /// Queue one PCM frame for playback.
    fn write_frame(&mut self, frame: &AudioFrame) -> Result<()>;

    /// Duration of audio currently buffered ahead of the device.
    fn buffered(&self) -> Duration;

    /// Periodic upkeep: detect an unexpected device stop and apply the
    /// one-shot restart policy.
    fn maintain(&mut self);
}

pub use audio::{AudioDecode, AudioSink, OpusAudioDecoder};
pub use ring_buffer::AudioRingBuffer;
pub use video::{VideoSink, VideoSinkConfig};
