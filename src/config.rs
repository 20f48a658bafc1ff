//! Session configuration
//!
//! Every knob has a default tuned for interactive avatar streaming; a
//! config file only needs the fields it wants to override.

use crate::sink::VideoSinkConfig;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration of one streaming session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Initial buffering window before any frame is released, ms
    pub buffering_ms: u64,

    /// Release tolerance: a head frame due within this much of the
    /// playback position is released, ms
    pub tolerance_ms: u64,

    /// Re-inject cached SPS/PPS every this many video frames
    pub reinjection_interval: u32,

    /// Minimum combined queue depth required before buffering can
    /// complete (0 means the time window alone gates release)
    pub min_buffered_frames: usize,

    /// Scheduler tick interval, ms
    pub tick_ms: u64,

    /// Route audio through the timestamp scheduler. When false, decoded
    /// audio goes straight to the playback buffer and only video is
    /// scheduled.
    pub sync_audio: bool,

    /// Audio sample rate negotiated with the transport, Hz
    pub sample_rate: u32,

    /// Audio channel count
    pub channels: u16,

    /// Delay before closing the video pipe on stop, letting the child
    /// drain, ms
    pub stop_grace_ms: u64,

    /// How long to wait for the video child to exit before terminating
    /// it, ms
    pub stop_timeout_ms: u64,

    /// Queue depth above which the scheduler logs a starvation warning
    pub starvation_threshold: usize,

    /// Outward video transmit process
    pub video: VideoSinkConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffering_ms: 100,
            tolerance_ms: 200,
            reinjection_interval: 30,
            min_buffered_frames: 0,
            tick_ms: 10,
            sync_audio: true,
            sample_rate: 48_000,
            channels: 2,
            stop_grace_ms: 200,
            stop_timeout_ms: 3000,
            starvation_threshold: 300,
            video: VideoSinkConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Load a configuration file, overriding defaults with whatever
    /// fields it carries.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: SessionConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Reject values the clock and ring-buffer arithmetic cannot work
    /// with. Checked on load and again at session start, since configs
    /// can also be built in code.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            bail!("sample_rate must be greater than zero");
        }
        if self.channels == 0 {
            bail!("channels must be greater than zero");
        }
        if self.tick_ms == 0 {
            bail!("tick_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn buffering_window(&self) -> Duration {
        Duration::from_millis(self.buffering_ms)
    }

    pub fn tolerance(&self) -> Duration {
        Duration::from_millis(self.tolerance_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}
