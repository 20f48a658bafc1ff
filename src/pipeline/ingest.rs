//! Ingest stage: single consumer of the transport event channel
//!
//! All per-frame processing that transport callbacks must not do happens
//! here, on one task: clock observation, H.264 stream reconstruction,
//! audio decode, and enqueueing for the scheduler. Per-frame failures
//! degrade quality but never stop the stage; it ends only when the stop
//! signal fires or every ingress handle has been dropped.

use crate::h264::StreamReconstructor;
use crate::pipeline::clock::SyncClock;
use crate::pipeline::health::SessionHealth;
use crate::pipeline::queue::FrameQueue;
use crate::pipeline::stage::PipelineStage;
use crate::pipeline::types::{AudioFrame, VideoFrame};
use crate::sink::{AudioDecode, AudioOutput};
use crate::transport::TransportEvent;
use crate::utils::SignalOfStop;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;

/// How often repeated decode failures are logged (the counter always runs)
const DECODE_FAILURE_LOG_INTERVAL: u64 = 100;

pub struct IngestStage {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
    clock: Arc<SyncClock>,
    reconstructor: StreamReconstructor,
    decoder: Box<dyn AudioDecode>,
    video_queue: Arc<FrameQueue<VideoFrame>>,
    audio_queue: Arc<FrameQueue<AudioFrame>>,
    audio_sink: Arc<Mutex<dyn AudioOutput>>,
    sync_audio: bool,
    health: Arc<SessionHealth>,
    sos: SignalOfStop,
    decode_failures: u64,
}

impl IngestStage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rx: mpsc::UnboundedReceiver<TransportEvent>,
        clock: Arc<SyncClock>,
        reinjection_interval: u32,
        decoder: Box<dyn AudioDecode>,
        video_queue: Arc<FrameQueue<VideoFrame>>,
        audio_queue: Arc<FrameQueue<AudioFrame>>,
        audio_sink: Arc<Mutex<dyn AudioOutput>>,
        sync_audio: bool,
        health: Arc<SessionHealth>,
        sos: SignalOfStop,
    ) -> Self {
        Self {
            rx,
            clock,
            reconstructor: StreamReconstructor::new(reinjection_interval),
            decoder,
            video_queue,
            audio_queue,
            audio_sink,
            sync_audio,
            health,
            sos,
            decode_failures: 0,
        }
    }

    fn handle_video(&mut self, payload: &[u8], timestamp: u32) {
        self.clock.observe_video(timestamp, Instant::now());
        let au = self.reconstructor.process(payload);
        self.video_queue.push(VideoFrame::new(timestamp, au));
    }

    fn handle_audio(&mut self, payload: &[u8], timestamp: u32) {
        self.clock.observe_audio(timestamp, Instant::now());

        let samples = match self.decoder.decode(payload) {
            Ok(samples) => samples,
            Err(e) => {
                // Drop the frame, keep the stream; playback papers over
                // the gap with silence
                self.health.record_decode_failure();
                self.decode_failures += 1;
                if self.decode_failures == 1
                    || self.decode_failures % DECODE_FAILURE_LOG_INTERVAL == 0
                {
                    warn!(
                        "IngestStage: audio decode failed ({} so far): {}",
                        self.decode_failures, e
                    );
                }
                return;
            }
        };
        if samples.is_empty() {
            // Decoder is still priming; nothing to queue yet
            debug!("IngestStage: decoder produced no samples for ts {}", timestamp);
            return;
        }

        let frame = AudioFrame::from_samples(timestamp, &samples);
        if self.sync_audio {
            self.audio_queue.push(frame);
        } else if let Err(e) = self.audio_sink.lock().unwrap().write_frame(&frame) {
            warn!("IngestStage: direct audio write failed: {}", e);
            self.health.record_sink_error();
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Video { payload, timestamp } => self.handle_video(&payload, timestamp),
            TransportEvent::Audio { payload, timestamp } => self.handle_audio(&payload, timestamp),
            TransportEvent::Error { message } => {
                warn!("IngestStage: transport error: {}", message);
                self.health.record_transport_error();
            }
        }
    }
}

#[async_trait]
impl PipelineStage for IngestStage {
    async fn run(&mut self) -> Result<()> {
        info!("IngestStage: started (sync_audio={})", self.sync_audio);
        let sos = self.sos.clone();
        loop {
            tokio::select! {
                _ = sos.wait_cancellation() => {
                    debug!("IngestStage: stop signal received");
                    break;
                }
                event = self.rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => {
                            debug!("IngestStage: transport channel closed");
                            break;
                        }
                    }
                }
            }
        }
        info!(
            "IngestStage: ended ({} video / {} audio frames pending)",
            self.video_queue.len(),
            self.audio_queue.len()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "IngestStage"
    }
}
