//! Health counters for a streaming session
//!
//! All in-flight-session errors are non-fatal and only degrade quality, so
//! they surface as cumulative counters rather than per-occurrence errors.
//! All fields use atomic operations for thread-safe access from the
//! ingest task, the scheduler thread, and sink callbacks.

use std::sync::atomic::{AtomicU64, Ordering};

/// Health metrics for one streaming session
#[derive(Debug, Default)]
pub struct SessionHealth {
    /// Video frames released to the video sink
    pub video_released: AtomicU64,

    /// Audio frames released to the audio sink
    pub audio_released: AtomicU64,

    /// Audio decode failures (frame dropped, never propagated)
    pub decode_failures: AtomicU64,

    /// Sink write/lifecycle failures (pipe write failed, restart failed)
    pub sink_errors: AtomicU64,

    /// Transport-reported errors observed at the ingestion boundary
    pub transport_errors: AtomicU64,

    /// Starvation warnings emitted by the scheduler
    pub starvation_warnings: AtomicU64,

    /// Total media bytes released downstream
    pub bytes_released: AtomicU64,
}

impl SessionHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_video_release(&self, size: usize) {
        self.video_released.fetch_add(1, Ordering::Relaxed);
        self.bytes_released.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_audio_release(&self, size: usize) {
        self.audio_released.fetch_add(1, Ordering::Relaxed);
        self.bytes_released.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_error(&self) {
        self.sink_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_starvation_warning(&self) {
        self.starvation_warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn video_released(&self) -> u64 {
        self.video_released.load(Ordering::Relaxed)
    }

    pub fn audio_released(&self) -> u64 {
        self.audio_released.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn sink_errors(&self) -> u64 {
        self.sink_errors.load(Ordering::Relaxed)
    }

    pub fn transport_errors(&self) -> u64 {
        self.transport_errors.load(Ordering::Relaxed)
    }

    pub fn starvation_warnings(&self) -> u64 {
        self.starvation_warnings.load(Ordering::Relaxed)
    }

    pub fn bytes_released(&self) -> u64 {
        self.bytes_released.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all counters
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            video_released: self.video_released(),
            audio_released: self.audio_released(),
            decode_failures: self.decode_failures(),
            sink_errors: self.sink_errors(),
            transport_errors: self.transport_errors(),
            starvation_warnings: self.starvation_warnings(),
            bytes_released: self.bytes_released(),
        }
    }
}

/// Snapshot of session health counters
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub video_released: u64,
    pub audio_released: u64,
    pub decode_failures: u64,
    pub sink_errors: u64,
    pub transport_errors: u64,
    pub starvation_warnings: u64,
    pub bytes_released: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} video / {} audio frames released ({} bytes), {} decode failures, {} sink errors, {} transport errors, {} starvation warnings",
            self.video_released,
            self.audio_released,
            self.bytes_released,
            self.decode_failures,
            self.sink_errors,
            self.transport_errors,
            self.starvation_warnings
        )
    }
}
