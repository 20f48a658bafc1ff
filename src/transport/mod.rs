//! Ingestion boundary of the real-time transport
//!
//! The transport layer (peer connection, ICE/DTLS/SRTP) lives outside
//! this crate; what it delivers is decoded once at this boundary into a
//! closed set of event shapes. Frame-arrival callbacks run on
//! transport-owned threads and must do only cheap, non-blocking work:
//! they push an owned event onto an unbounded channel and return. A
//! single consumer (the ingest stage) performs all further processing.

use bytes::Bytes;
use log::warn;
use tokio::sync::mpsc;

/// Everything the sync engine consumes from the transport, decoded once
/// at the boundary.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// An encoded video frame with its 90 kHz transport timestamp
    Video { payload: Bytes, timestamp: u32 },
    /// An encoded audio frame with its sample-rate transport timestamp
    Audio { payload: Bytes, timestamp: u32 },
    /// A transport-reported error (non-fatal, counted and logged)
    Error { message: String },
}

/// Fire-and-forget frame ingestion handle for transport callbacks.
///
/// Clone one per callback registration; the ingest stage ends once every
/// clone has been dropped.
#[derive(Debug, Clone)]
pub struct FrameIngress {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl FrameIngress {
    /// Create an ingress handle and the receiving end for the ingest stage.
    pub fn channel() -> (FrameIngress, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FrameIngress { tx }, rx)
    }

    /// Video frame-arrival callback. Safe to call from any thread.
    pub fn on_video_frame(&self, payload: Vec<u8>, timestamp: u32) {
        self.send(TransportEvent::Video {
            payload: Bytes::from(payload),
            timestamp,
        });
    }

    /// Audio frame-arrival callback. Safe to call from any thread.
    pub fn on_audio_frame(&self, payload: Vec<u8>, timestamp: u32) {
        self.send(TransportEvent::Audio {
            payload: Bytes::from(payload),
            timestamp,
        });
    }

    /// Transport error callback.
    pub fn on_error(&self, message: impl Into<String>) {
        self.send(TransportEvent::Error {
            message: message.into(),
        });
    }

    fn send(&self, event: TransportEvent) {
        if self.tx.send(event).is_err() {
            // Session already torn down; late transport callbacks are expected
            warn!("FrameIngress: event dropped, session no longer ingesting");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_callbacks_preserve_order_per_channel() {
        let (ingress, mut rx) = FrameIngress::channel();

        ingress.on_video_frame(vec![1], 0);
        ingress.on_video_frame(vec![2], 3000);
        ingress.on_audio_frame(vec![3], 480);
        drop(ingress);

        let mut video_ts = Vec::new();
        while let Some(ev) = rx.recv().await {
            if let TransportEvent::Video { timestamp, .. } = ev {
                video_ts.push(timestamp);
            }
        }
        assert_eq!(video_ts, vec![0, 3000]);
    }

    #[test]
    fn test_send_after_teardown_does_not_panic() {
        let (ingress, rx) = FrameIngress::channel();
        drop(rx);
        ingress.on_video_frame(vec![0], 0);
        ingress.on_error("late");
    }
}
