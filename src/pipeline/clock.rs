//! Clock reference for audio-video synchronization
//!
//! Establishes a single wall-clock origin per streaming session and maps
//! each channel's transport timestamp to playback-relative time.
//!
//! # Design
//!
//! The two channels' transport clocks are unrelated in absolute value
//! (different rates, different epochs) and are never compared directly.
//! Only channel-relative elapsed time — `(ts - first_ts) / clock_rate` —
//! is meaningful, and only against the shared wall-clock-derived playback
//! position. `session_start` is latched at the first frame of either
//! channel; each channel latches its own first timestamp independently.
//!
//! Timing-sensitive methods take an explicit `now: Instant` so that
//! callers pass `Instant::now()` while tests drive a virtual clock.

use crate::pipeline::types::VIDEO_CLOCK_HZ;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct ClockInner {
    session_start: Option<Instant>,
    first_video_ts: Option<u32>,
    first_audio_ts: Option<u32>,
    buffering_done: bool,
}

/// Shared clock reference for one streaming session.
///
/// Thread-safe: written by the ingest consumer, read by the scheduler
/// thread.
#[derive(Debug)]
pub struct SyncClock {
    inner: Mutex<ClockInner>,
    audio_clock_hz: u32,
}

/// Snapshot of the clock state, for starvation diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct ClockState {
    pub session_started: bool,
    pub video_latched: bool,
    pub audio_latched: bool,
    pub buffering_done: bool,
}

impl SyncClock {
    pub fn new(audio_clock_hz: u32) -> Self {
        Self {
            inner: Mutex::new(ClockInner::default()),
            audio_clock_hz,
        }
    }

    /// Record the arrival of a video frame: latches `session_start` on
    /// the very first frame of either channel and the video channel's
    /// first timestamp on its own first frame.
    pub fn observe_video(&self, ts: u32, now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        inner.session_start.get_or_insert(now);
        inner.first_video_ts.get_or_insert(ts);
    }

    /// Audio-channel counterpart of [`observe_video`](Self::observe_video).
    pub fn observe_audio(&self, ts: u32, now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        inner.session_start.get_or_insert(now);
        inner.first_audio_ts.get_or_insert(ts);
    }

    /// Try to complete the initial buffering window. Returns `true`
    /// exactly once, on the call that flips `buffering_done`; the audio
    /// sink is started at that instant.
    pub fn try_finish_buffering(&self, now: Instant, window: Duration) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.buffering_done {
            return false;
        }
        match inner.session_start {
            Some(start) if now.duration_since(start) >= window => {
                inner.buffering_done = true;
                true
            }
            _ => false,
        }
    }

    pub fn buffering_done(&self) -> bool {
        self.inner.lock().unwrap().buffering_done
    }

    /// Wall-clock playback position: elapsed session time minus the
    /// buffering window. `None` until the session started and buffering
    /// completed — no frame may be released before then.
    pub fn playback_position(&self, now: Instant, window: Duration) -> Option<Duration> {
        let inner = self.inner.lock().unwrap();
        if !inner.buffering_done {
            return None;
        }
        let start = inner.session_start?;
        Some(now.duration_since(start).saturating_sub(window))
    }

    /// Channel-relative media time of a video timestamp. `None` until the
    /// video channel latched its first timestamp.
    ///
    /// Deltas are modular (`wrapping_sub`), which stays correct across a
    /// single 32-bit wrap of the transport clock.
    pub fn video_media_time(&self, ts: u32) -> Option<Duration> {
        let first = self.inner.lock().unwrap().first_video_ts?;
        Some(ticks_to_duration(ts.wrapping_sub(first), VIDEO_CLOCK_HZ))
    }

    /// Channel-relative media time of an audio timestamp.
    pub fn audio_media_time(&self, ts: u32) -> Option<Duration> {
        let first = self.inner.lock().unwrap().first_audio_ts?;
        Some(ticks_to_duration(ts.wrapping_sub(first), self.audio_clock_hz))
    }

    pub fn state(&self) -> ClockState {
        let inner = self.inner.lock().unwrap();
        ClockState {
            session_started: inner.session_start.is_some(),
            video_latched: inner.first_video_ts.is_some(),
            audio_latched: inner.first_audio_ts.is_some(),
            buffering_done: inner.buffering_done,
        }
    }
}

fn ticks_to_duration(ticks: u32, rate_hz: u32) -> Duration {
    Duration::from_micros(ticks as u64 * 1_000_000 / rate_hz as u64)
}
