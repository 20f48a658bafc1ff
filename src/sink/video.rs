//! Video sink adapter: child encode/transmit process fed over a pipe
//!
//! A long-lived ffmpeg child reads the reconstructed Annex B stream from
//! its standard input and re-emits it as RTP on a fixed local port. The
//! child and its pipe are a scoped resource: spawned on stream start,
//! flush-then-close-then-wait-then-kill on stream stop along every exit
//! path.

use crate::sink::VideoOutput;
use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::{Duration, Instant};

/// Configuration of the outward video transmit process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSinkConfig {
    /// Encoder/transmitter executable
    pub ffmpeg_path: String,
    /// Local RTP port the child transmits to
    pub rtp_port: u16,
    /// RTP payload type for the outward stream
    pub payload_type: u8,
    /// Nominal frame rate declared on the raw H.264 input
    pub frame_rate: u32,
}

impl Default for VideoSinkConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".into(),
            rtp_port: 5004,
            payload_type: 96,
            frame_rate: 30,
        }
    }
}

impl VideoSinkConfig {
    /// Argument list for the child process: raw Annex B H.264 on stdin,
    /// RTP out without re-encoding.
    pub fn build_args(&self) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-fflags".into(),
            "nobuffer".into(),
            "-f".into(),
            "h264".into(),
            "-framerate".into(),
            self.frame_rate.to_string(),
            "-i".into(),
            "-".into(),
            "-c:v".into(),
            "copy".into(),
            "-payload_type".into(),
            self.payload_type.to_string(),
            "-f".into(),
            "rtp".into(),
            format!("rtp://127.0.0.1:{}", self.rtp_port),
        ]
    }
}

/// Owns the child encode process and its input pipe for one session.
pub struct VideoSink {
    child: Child,
    stdin: Option<ChildStdin>,
    first_write: Option<Instant>,
    access_units_written: u64,
}

impl VideoSink {
    /// Spawn the child process. A spawn failure is fatal to session
    /// startup and is returned to the caller.
    pub fn spawn(config: &VideoSinkConfig) -> Result<Self> {
        let mut child = Command::new(&config.ffmpeg_path)
            .args(config.build_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to launch video transmit process '{}'", config.ffmpeg_path))?;

        let stdin = child
            .stdin
            .take()
            .context("video transmit process has no stdin handle")?;

        info!(
            "VideoSink: transmit process started (pid {}, rtp port {})",
            child.id(),
            config.rtp_port
        );

        Ok(Self {
            child,
            stdin: Some(stdin),
            first_write: None,
            access_units_written: 0,
        })
    }

    pub fn access_units_written(&self) -> u64 {
        self.access_units_written
    }
}

impl VideoOutput for VideoSink {
    fn write_access_unit(&mut self, au: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .context("video sink pipe already closed")?;

        stdin.write_all(au).context("video pipe write failed")?;
        // Flush per access unit; buffered writes defeat the real-time
        // contract
        stdin.flush().context("video pipe flush failed")?;

        self.access_units_written += 1;
        if self.first_write.is_none() {
            self.first_write = Some(Instant::now());
            info!("VideoSink: first access unit written, outward stream is live");
        }
        Ok(())
    }

    fn has_emitted(&self) -> bool {
        self.first_write.is_some()
    }

    fn shutdown(&mut self, grace: Duration, wait_timeout: Duration) {
        // Let the child drain what was already written; closing the pipe
        // immediately truncates the tail of the stream
        if self.stdin.is_some() && self.first_write.is_some() {
            std::thread::sleep(grace);
        }
        drop(self.stdin.take()); // EOF signals end of stream

        let deadline = Instant::now() + wait_timeout;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    info!(
                        "VideoSink: transmit process exited ({}, {} access units)",
                        status, self.access_units_written
                    );
                    return;
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        warn!("VideoSink: transmit process did not exit in time, terminating");
                        if let Err(e) = self.child.kill() {
                            error!("VideoSink: failed to terminate transmit process: {}", e);
                        }
                        let _ = self.child.wait();
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    error!("VideoSink: wait on transmit process failed: {}", e);
                    return;
                }
            }
        }
    }
}

impl Drop for VideoSink {
    fn drop(&mut self) {
        // Safety net for error paths that never reached shutdown()
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
