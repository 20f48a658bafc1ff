//! Streaming session lifecycle
//!
//! Wires the ingestion boundary, the ingest stage, the scheduler thread
//! and both sinks together for one avatar stream, and owns their ordered
//! startup and teardown. Startup failures (no transmit process, no audio
//! device, no decoder) abort the session; everything after `Running` is
//! non-fatal and only degrades quality.

use crate::config::SessionConfig;
use crate::pipeline::clock::SyncClock;
use crate::pipeline::health::{HealthSummary, SessionHealth};
use crate::pipeline::ingest::IngestStage;
use crate::pipeline::queue::FrameQueue;
use crate::pipeline::scheduler::{SchedulerCore, SyncScheduler};
use crate::pipeline::stage::PipelineStage;
use crate::pipeline::state::SessionState;
use crate::pipeline::types::{AudioFrame, VideoFrame};
use crate::sink::{AudioOutput, AudioSink, OpusAudioDecoder, VideoSink};
use crate::transport::FrameIngress;
use crate::utils::SignalOfStop;
use anyhow::{Result, anyhow};
use log::{debug, error, info};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Extra headroom on top of the configured grace and wait when joining
/// the scheduler thread
const JOIN_SLACK: Duration = Duration::from_secs(1);

/// One live avatar streaming session.
///
/// Must be created inside a tokio runtime; the ingest stage runs as a
/// task on it while scheduling runs on a dedicated thread.
pub struct AvatarSession {
    state: Mutex<SessionState>,
    ingress: FrameIngress,
    scheduler: SyncScheduler,
    video_queue: Arc<FrameQueue<VideoFrame>>,
    audio_queue: Arc<FrameQueue<AudioFrame>>,
    health: Arc<SessionHealth>,
    sos: SignalOfStop,
    config: SessionConfig,
}

impl AvatarSession {
    /// Spawn the sinks, the ingest task and the scheduler thread, in that
    /// order. Any failure here tears down what was already started (the
    /// transmit child dies with its handle) and is returned to the caller.
    pub fn start(config: SessionConfig) -> Result<Self> {
        config.validate()?;

        let mut state = SessionState::Idle;
        advance(&mut state, SessionState::Initializing)?;
        info!(
            "Session: starting (buffering {}ms, tolerance {}ms, sync_audio={})",
            config.buffering_ms, config.tolerance_ms, config.sync_audio
        );

        let health = Arc::new(SessionHealth::new());
        let sos = SignalOfStop::new();
        let clock = Arc::new(SyncClock::new(config.sample_rate));
        let video_queue = Arc::new(FrameQueue::new());
        let audio_queue = Arc::new(FrameQueue::new());

        let video_sink = VideoSink::spawn(&config.video)?;
        let audio_sink: Arc<Mutex<dyn AudioOutput>> = Arc::new(Mutex::new(AudioSink::new(
            config.sample_rate,
            config.channels,
            health.clone(),
        )?));
        let decoder = OpusAudioDecoder::new()?;

        let (ingress, rx) = FrameIngress::channel();
        let mut ingest = IngestStage::new(
            rx,
            clock.clone(),
            config.reinjection_interval,
            Box::new(decoder),
            video_queue.clone(),
            audio_queue.clone(),
            audio_sink.clone(),
            config.sync_audio,
            health.clone(),
            sos.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = ingest.run().await {
                error!("{} failed: {}", ingest.name(), e);
            }
        });

        let core = SchedulerCore::new(
            clock,
            video_queue.clone(),
            audio_queue.clone(),
            Box::new(video_sink),
            audio_sink,
            health.clone(),
            config.buffering_window(),
            config.tolerance(),
            config.min_buffered_frames,
            config.starvation_threshold,
        );
        let scheduler = SyncScheduler::spawn(
            core,
            config.tick_interval(),
            config.stop_grace(),
            config.stop_timeout(),
            sos.clone(),
        )?;

        advance(&mut state, SessionState::Running {
            started_at: Instant::now(),
        })?;
        info!("Session: running");

        Ok(Self {
            state: Mutex::new(state),
            ingress,
            scheduler,
            video_queue,
            audio_queue,
            health,
            sos,
            config,
        })
    }

    /// Handle the transport registers its frame callbacks on.
    pub fn ingress(&self) -> FrameIngress {
        self.ingress.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn health(&self) -> HealthSummary {
        self.health.summary()
    }

    /// Stop the session: signal every stage, wait out the scheduler's
    /// sink teardown, drop whatever never got released. Idempotent.
    pub fn stop(&mut self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.is_stopped() {
                return;
            }
            if let Some(elapsed) = state.running_duration() {
                info!("Session: stopping after {:?}", elapsed);
            }
            *state = SessionState::Stopping;
        }

        self.sos.cancel();
        self.scheduler
            .stop(self.config.stop_grace() + self.config.stop_timeout() + JOIN_SLACK);

        let video_dropped = self.video_queue.clear();
        let audio_dropped = self.audio_queue.clear();
        if video_dropped + audio_dropped > 0 {
            info!(
                "Session: dropped {} video / {} audio frames pending at stop",
                video_dropped, audio_dropped
            );
        }

        *self.state.lock().unwrap() = SessionState::Stopped;
        info!("Session: stopped. {}", self.health.summary());
    }
}

fn advance(state: &mut SessionState, target: SessionState) -> Result<()> {
    if !state.can_transition_to(&target) {
        return Err(anyhow!("invalid session transition {} -> {}", state, target));
    }
    debug!("Session: {} -> {}", state, target);
    *state = target;
    Ok(())
}
