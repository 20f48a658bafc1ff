//! Synchronization scheduler
//!
//! A dedicated thread wakes every tick, computes the wall-clock playback
//! position from the shared clock reference, and releases every queued
//! frame whose media time falls within the tolerance window of that
//! position. Release is head-gated per channel, so frames leave in
//! arrival order and a late head holds everything behind it.
//!
//! The scheduling decisions live in [`SchedulerCore::tick`], which takes
//! an explicit `now` so tests can drive a virtual clock without a thread
//! or sleeps; [`SyncScheduler`] is the thread wrapper around it.

use crate::pipeline::clock::SyncClock;
use crate::pipeline::health::SessionHealth;
use crate::pipeline::queue::FrameQueue;
use crate::pipeline::types::{AudioFrame, VideoFrame};
use crate::sink::{AudioOutput, VideoOutput};
use crate::utils::SignalOfStop;
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Minimum spacing between starvation warnings
const STARVATION_WARN_INTERVAL: Duration = Duration::from_secs(5);

/// Spacing between periodic health summary logs
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// How often repeated sink write failures are logged
const SINK_ERROR_LOG_INTERVAL: u64 = 100;

/// Per-tick scheduling state and logic, separate from the thread that
/// drives it.
pub struct SchedulerCore {
    clock: Arc<SyncClock>,
    video_queue: Arc<FrameQueue<VideoFrame>>,
    audio_queue: Arc<FrameQueue<AudioFrame>>,
    video_sink: Box<dyn VideoOutput>,
    audio_sink: Arc<Mutex<dyn AudioOutput>>,
    health: Arc<SessionHealth>,
    buffering_window: Duration,
    tolerance: Duration,
    min_buffered_frames: usize,
    starvation_threshold: usize,
    last_starvation_warn: Option<Instant>,
    last_stats_log: Option<Instant>,
}

impl SchedulerCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<SyncClock>,
        video_queue: Arc<FrameQueue<VideoFrame>>,
        audio_queue: Arc<FrameQueue<AudioFrame>>,
        video_sink: Box<dyn VideoOutput>,
        audio_sink: Arc<Mutex<dyn AudioOutput>>,
        health: Arc<SessionHealth>,
        buffering_window: Duration,
        tolerance: Duration,
        min_buffered_frames: usize,
        starvation_threshold: usize,
    ) -> Self {
        Self {
            clock,
            video_queue,
            audio_queue,
            video_sink,
            audio_sink,
            health,
            buffering_window,
            tolerance,
            min_buffered_frames,
            starvation_threshold,
            last_starvation_warn: None,
            last_stats_log: None,
        }
    }

    /// One scheduling pass at wall-clock time `now`.
    pub fn tick(&mut self, now: Instant) {
        // Before the buffering gate: a queue growing while release never
        // starts is exactly the starvation case worth reporting
        self.check_starvation(now);

        if !self.clock.buffering_done() {
            let depth = self.video_queue.len() + self.audio_queue.len();
            if depth >= self.min_buffered_frames
                && self.clock.try_finish_buffering(now, self.buffering_window)
            {
                info!(
                    "Scheduler: buffering complete ({} frames queued), starting playback",
                    depth
                );
                if let Err(e) = self.audio_sink.lock().unwrap().start_playback() {
                    // Session keeps running video-only
                    error!("Scheduler: audio playback failed to start: {}", e);
                    self.health.record_sink_error();
                }
            } else {
                return;
            }
        }

        let Some(position) = self.clock.playback_position(now, self.buffering_window) else {
            return;
        };
        let deadline = position + self.tolerance;

        self.release_video(deadline);
        self.release_audio(deadline);

        self.audio_sink.lock().unwrap().maintain();
        self.log_stats(now);
    }

    fn release_video(&mut self, deadline: Duration) {
        while let Some(frame) = self.video_queue.pop_if(|f| {
            self.clock
                .video_media_time(f.timestamp)
                .is_some_and(|mt| mt <= deadline)
        }) {
            if !self.video_sink.has_emitted() {
                info!(
                    "Scheduler: releasing first video frame (ts {})",
                    frame.timestamp
                );
            }
            match self.video_sink.write_access_unit(&frame.payload) {
                Ok(()) => self.health.record_video_release(frame.size()),
                Err(e) => {
                    // Frame is lost; the stream continues with the next one
                    self.health.record_sink_error();
                    let errors = self.health.sink_errors();
                    if errors == 1 || errors % SINK_ERROR_LOG_INTERVAL == 0 {
                        warn!(
                            "Scheduler: video sink write failed ({} sink errors): {}",
                            errors, e
                        );
                    }
                }
            }
        }
    }

    fn release_audio(&mut self, deadline: Duration) {
        while let Some(frame) = self.audio_queue.pop_if(|f| {
            self.clock
                .audio_media_time(f.timestamp)
                .is_some_and(|mt| mt <= deadline)
        }) {
            let size = frame.pcm.len();
            match self.audio_sink.lock().unwrap().write_frame(&frame) {
                Ok(()) => self.health.record_audio_release(size),
                Err(e) => {
                    self.health.record_sink_error();
                    warn!("Scheduler: audio sink write failed: {}", e);
                }
            }
        }
    }

    fn check_starvation(&mut self, now: Instant) {
        let video_depth = self.video_queue.len();
        let audio_depth = self.audio_queue.len();
        if video_depth <= self.starvation_threshold && audio_depth <= self.starvation_threshold {
            return;
        }
        let due = self
            .last_starvation_warn
            .is_none_or(|last| now.duration_since(last) >= STARVATION_WARN_INTERVAL);
        if due {
            self.last_starvation_warn = Some(now);
            self.health.record_starvation_warning();
            warn!(
                "Scheduler: release starvation, queues growing (video {}, audio {}, clock {:?})",
                video_depth,
                audio_depth,
                self.clock.state()
            );
        }
    }

    fn log_stats(&mut self, now: Instant) {
        let last = self.last_stats_log.get_or_insert(now);
        if now.duration_since(*last) >= STATS_LOG_INTERVAL {
            self.last_stats_log = Some(now);
            info!("{}", self.health.summary());
        }
    }

    /// Tear down the video sink: drain grace, pipe close, bounded wait.
    /// Runs on the scheduler thread after its last tick.
    fn shutdown_video(&mut self, grace: Duration, wait_timeout: Duration) {
        self.video_sink.shutdown(grace, wait_timeout);
    }
}

/// Next tick deadline and how long to sleep to reach it. Pacing is
/// deadline-based so tick processing time does not stretch the period;
/// when a tick overran the deadline, realign to `now` instead of
/// bursting to catch up.
fn next_deadline(deadline: Instant, tick_interval: Duration, now: Instant) -> (Instant, Duration) {
    let next = deadline + tick_interval;
    if next > now {
        (next, next - now)
    } else {
        (now, Duration::ZERO)
    }
}

/// Thread wrapper driving [`SchedulerCore`] at a fixed tick interval.
pub struct SyncScheduler {
    handle: Option<thread::JoinHandle<()>>,
    done_rx: mpsc::Receiver<()>,
}

impl SyncScheduler {
    /// Spawn the scheduler thread. It ticks until the stop signal fires,
    /// then shuts down the video sink and reports completion.
    pub fn spawn(
        mut core: SchedulerCore,
        tick_interval: Duration,
        stop_grace: Duration,
        stop_timeout: Duration,
        sos: SignalOfStop,
    ) -> Result<Self> {
        let (done_tx, done_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("avacast-scheduler".into())
            .spawn(move || {
                debug!("Scheduler: thread started, tick {:?}", tick_interval);
                let mut deadline = Instant::now();
                while !sos.cancelled() {
                    core.tick(Instant::now());
                    let (next, pause) = next_deadline(deadline, tick_interval, Instant::now());
                    deadline = next;
                    if !pause.is_zero() {
                        thread::sleep(pause);
                    }
                }
                core.shutdown_video(stop_grace, stop_timeout);
                let _ = done_tx.send(());
            })
            .context("failed to spawn scheduler thread")?;

        Ok(Self {
            handle: Some(handle),
            done_rx,
        })
    }

    /// Wait for the scheduler thread to finish its teardown, detaching it
    /// if the limit passes. Call after cancelling the session's stop
    /// signal.
    pub fn stop(&mut self, limit: Duration) {
        match self.done_rx.recv_timeout(limit) {
            Ok(()) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                debug!("Scheduler: thread joined");
            }
            Err(_) => {
                warn!("Scheduler: thread did not finish within {:?}, detaching", limit);
                self.handle.take();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    const WINDOW: Duration = Duration::from_millis(100);

    #[derive(Default)]
    struct FakeVideoOutput {
        written: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_next: Arc<AtomicBool>,
        shutdowns: Arc<Mutex<u32>>,
    }

    impl VideoOutput for FakeVideoOutput {
        fn write_access_unit(&mut self, au: &[u8]) -> Result<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                anyhow::bail!("pipe closed");
            }
            self.written.lock().unwrap().push(au.to_vec());
            Ok(())
        }
        fn has_emitted(&self) -> bool {
            !self.written.lock().unwrap().is_empty()
        }
        fn shutdown(&mut self, _grace: Duration, _wait_timeout: Duration) {
            *self.shutdowns.lock().unwrap() += 1;
        }
    }

    #[derive(Default)]
    struct FakeAudioOutput {
        frames: Vec<AudioFrame>,
        starts: u32,
        maintains: u32,
    }

    impl AudioOutput for FakeAudioOutput {
        fn start_playback(&mut self) -> Result<()> {
            self.starts += 1;
            Ok(())
        }
        fn write_frame(&mut self, frame: &AudioFrame) -> Result<()> {
            self.frames.push(frame.clone());
            Ok(())
        }
        fn buffered(&self) -> Duration {
            Duration::ZERO
        }
        fn maintain(&mut self) {
            self.maintains += 1;
        }
    }

    struct Harness {
        core: SchedulerCore,
        clock: Arc<SyncClock>,
        video_queue: Arc<FrameQueue<VideoFrame>>,
        audio_queue: Arc<FrameQueue<AudioFrame>>,
        written: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_next: Arc<AtomicBool>,
        audio_sink: Arc<Mutex<FakeAudioOutput>>,
        health: Arc<SessionHealth>,
    }

    fn harness(tolerance: Duration, min_buffered_frames: usize) -> Harness {
        let clock = Arc::new(SyncClock::new(48_000));
        let video_queue = Arc::new(FrameQueue::new());
        let audio_queue = Arc::new(FrameQueue::new());
        let health = Arc::new(SessionHealth::new());
        let audio_sink = Arc::new(Mutex::new(FakeAudioOutput::default()));
        let video_sink = FakeVideoOutput::default();
        let written = video_sink.written.clone();
        let fail_next = video_sink.fail_next.clone();

        let core = SchedulerCore::new(
            clock.clone(),
            video_queue.clone(),
            audio_queue.clone(),
            Box::new(video_sink),
            audio_sink.clone(),
            health.clone(),
            WINDOW,
            tolerance,
            min_buffered_frames,
            300,
        );
        Harness {
            core,
            clock,
            video_queue,
            audio_queue,
            written,
            fail_next,
            audio_sink,
            health,
        }
    }

    fn push_video(h: &Harness, ts: u32) {
        h.video_queue.push(VideoFrame::new(ts, vec![ts as u8]));
    }

    #[test]
    fn test_nothing_released_during_buffering() {
        let mut h = harness(Duration::from_millis(200), 0);
        let t0 = Instant::now();

        h.clock.observe_video(0, t0);
        push_video(&h, 0);

        // Mid-window: the frame stays queued and playback is not started
        h.core.tick(t0 + Duration::from_millis(50));
        assert!(h.written.lock().unwrap().is_empty());
        assert_eq!(h.audio_sink.lock().unwrap().starts, 0);
    }

    #[test]
    fn test_release_follows_media_time() {
        // Zero tolerance so release instants are exact
        let mut h = harness(Duration::ZERO, 0);
        let t0 = Instant::now();

        h.clock.observe_video(0, t0);
        for ts in [0, 3000, 6000] {
            push_video(&h, ts);
        }

        // Window elapsed: position 0, only the first frame is due
        h.core.tick(t0 + WINDOW);
        assert_eq!(h.written.lock().unwrap().len(), 1);

        // 33.4ms later the second frame (33.3ms of media time) is due
        h.core.tick(t0 + WINDOW + Duration::from_micros(33_400));
        assert_eq!(h.written.lock().unwrap().len(), 2);

        // And never early: the third is 66.6ms in
        h.core.tick(t0 + WINDOW + Duration::from_millis(50));
        assert_eq!(h.written.lock().unwrap().len(), 2);

        h.core.tick(t0 + WINDOW + Duration::from_millis(67));
        assert_eq!(h.written.lock().unwrap().len(), 3);
        assert_eq!(h.health.video_released(), 3);
    }

    #[test]
    fn test_tolerance_widens_release() {
        let mut h = harness(Duration::from_millis(200), 0);
        let t0 = Instant::now();

        h.clock.observe_video(0, t0);
        for ts in [0, 3000, 6000] {
            push_video(&h, ts);
        }

        // All three fall within position + 200ms on the first tick after
        // the window
        h.core.tick(t0 + WINDOW);
        let written = h.written.lock().unwrap();
        assert_eq!(written.len(), 3);
        // Arrival order is preserved
        assert_eq!(written[0], vec![0u8]);
        assert_eq!(*written.last().unwrap(), vec![6000u32 as u8]);
    }

    #[test]
    fn test_late_head_blocks_channel() {
        let mut h = harness(Duration::ZERO, 0);
        let t0 = Instant::now();

        h.clock.observe_video(0, t0);
        // Head is 1s of media time out; the frame behind it is long due
        push_video(&h, 90_000);
        push_video(&h, 0);

        h.core.tick(t0 + WINDOW + Duration::from_millis(500));
        assert!(h.written.lock().unwrap().is_empty());
        assert_eq!(h.video_queue.len(), 2);
    }

    #[test]
    fn test_playback_starts_once_on_buffering_completion() {
        let mut h = harness(Duration::from_millis(200), 0);
        let t0 = Instant::now();
        h.clock.observe_audio(0, t0);

        h.core.tick(t0 + WINDOW);
        h.core.tick(t0 + WINDOW + Duration::from_millis(10));
        h.core.tick(t0 + WINDOW + Duration::from_millis(20));

        let sink = h.audio_sink.lock().unwrap();
        assert_eq!(sink.starts, 1);
        // maintain() runs on every post-buffering tick
        assert_eq!(sink.maintains, 3);
    }

    #[test]
    fn test_min_buffered_frames_gates_completion() {
        let mut h = harness(Duration::from_millis(200), 2);
        let t0 = Instant::now();
        h.clock.observe_video(0, t0);
        push_video(&h, 0);

        // Window long elapsed but only one frame queued
        h.core.tick(t0 + Duration::from_millis(300));
        assert!(!h.clock.buffering_done());
        assert!(h.written.lock().unwrap().is_empty());

        push_video(&h, 3000);
        h.core.tick(t0 + Duration::from_millis(310));
        assert!(h.clock.buffering_done());
        assert_eq!(h.written.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_audio_released_against_own_clock() {
        let mut h = harness(Duration::ZERO, 0);
        let t0 = Instant::now();

        // Unrelated epochs per channel
        h.clock.observe_audio(1_000_000, t0);
        h.audio_queue
            .push(AudioFrame::from_samples(1_000_000, &[1, -1]));
        h.audio_queue
            .push(AudioFrame::from_samples(1_004_800, &[2, -2])); // +100ms

        h.core.tick(t0 + WINDOW);
        assert_eq!(h.audio_sink.lock().unwrap().frames.len(), 1);

        h.core.tick(t0 + WINDOW + Duration::from_millis(100));
        assert_eq!(h.audio_sink.lock().unwrap().frames.len(), 2);
        assert_eq!(h.health.audio_released(), 2);
    }

    #[test]
    fn test_sink_write_failure_drops_frame_only() {
        let mut h = harness(Duration::from_millis(200), 0);
        let t0 = Instant::now();

        h.clock.observe_video(0, t0);
        push_video(&h, 0);
        push_video(&h, 3000);
        h.fail_next.store(true, Ordering::SeqCst);

        h.core.tick(t0 + WINDOW);

        // First write failed and its frame is gone; the second went through
        assert_eq!(h.written.lock().unwrap().len(), 1);
        assert_eq!(h.health.sink_errors(), 1);
        assert_eq!(h.health.video_released(), 1);
        assert!(h.video_queue.is_empty());
    }

    #[test]
    fn test_starvation_warning_rate_limited() {
        let mut h = harness(Duration::ZERO, 0);
        let t0 = Instant::now();
        h.clock.observe_video(0, t0);

        // Far-future head so nothing drains past the threshold
        for i in 0..400u32 {
            push_video(&h, 90_000_000 + i);
        }

        h.core.tick(t0 + WINDOW);
        h.core.tick(t0 + WINDOW + Duration::from_millis(10));
        assert_eq!(h.health.starvation_warnings(), 1);

        h.core.tick(t0 + WINDOW + Duration::from_secs(6));
        assert_eq!(h.health.starvation_warnings(), 2);
    }

    #[test]
    fn test_starvation_reported_while_buffering_holds() {
        // Depth gate that never opens: queues grow but release never starts
        let mut h = harness(Duration::ZERO, 500);
        let t0 = Instant::now();
        h.clock.observe_video(0, t0);

        for ts in 0..400u32 {
            push_video(&h, ts);
        }

        h.core.tick(t0 + Duration::from_secs(1));
        assert!(!h.clock.buffering_done());
        assert!(h.written.lock().unwrap().is_empty());
        // The growing queue is still reported
        assert_eq!(h.health.starvation_warnings(), 1);
    }

    #[test]
    fn test_tick_pacing_absorbs_processing_time() {
        let tick = Duration::from_millis(10);
        let t0 = Instant::now();

        // A 3ms tick leaves 7ms of sleep to the same deadline
        let (next, pause) = next_deadline(t0, tick, t0 + Duration::from_millis(3));
        assert_eq!(next, t0 + tick);
        assert_eq!(pause, Duration::from_millis(7));

        // An overrunning tick realigns without sleeping or bursting
        let late = t0 + Duration::from_millis(25);
        let (next, pause) = next_deadline(t0, tick, late);
        assert_eq!(next, late);
        assert_eq!(pause, Duration::ZERO);
        let (next, pause) = next_deadline(next, tick, late + Duration::from_millis(1));
        assert_eq!(next, late + tick);
        assert_eq!(pause, Duration::from_millis(9));
    }

    #[test]
    fn test_scheduler_thread_stops_and_shuts_down_sink() {
        let h = harness(Duration::ZERO, 0);
        let shutdowns = {
            // Rebuild with a trackable sink for the thread test
            let video_sink = FakeVideoOutput::default();
            let counter = video_sink.shutdowns.clone();
            let core = SchedulerCore::new(
                h.clock.clone(),
                h.video_queue.clone(),
                h.audio_queue.clone(),
                Box::new(video_sink),
                h.audio_sink.clone(),
                h.health.clone(),
                WINDOW,
                Duration::ZERO,
                0,
                300,
            );
            let sos = SignalOfStop::new();
            let mut scheduler = SyncScheduler::spawn(
                core,
                Duration::from_millis(1),
                Duration::ZERO,
                Duration::from_millis(100),
                sos.clone(),
            )
            .unwrap();

            sos.cancel();
            scheduler.stop(Duration::from_secs(2));
            counter
        };
        assert_eq!(*shutdowns.lock().unwrap(), 1);
    }
}
