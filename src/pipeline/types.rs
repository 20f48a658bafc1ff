//! Core frame types for the streaming pipeline

use bytes::Bytes;

/// Transport clock rate of the video channel (RTP H.264)
pub const VIDEO_CLOCK_HZ: u32 = 90_000;

/// Reconstructed H.264 access unit, tagged with its transport timestamp
/// (90 kHz clock). Produced by the ingest stage, consumed exactly once by
/// the scheduler.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Transport timestamp in 90 kHz units
    pub timestamp: u32,
    /// Annex B access unit, parameter sets already injected where needed
    pub payload: Bytes,
}

/// Decoded PCM audio frame, tagged with its transport timestamp (one unit
/// per sample at the negotiated rate). Produced after codec decode,
/// consumed exactly once by the scheduler — or immediately by the audio
/// sink in the non-timestamp-synced mode.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Transport timestamp in sample-rate units
    pub timestamp: u32,
    /// 16-bit interleaved PCM, little endian
    pub pcm: Bytes,
    /// RMS level of this frame in dBFS
    pub level_db: f64,
}

impl VideoFrame {
    pub fn new(timestamp: u32, payload: Vec<u8>) -> Self {
        Self {
            timestamp,
            payload: Bytes::from(payload),
        }
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

impl AudioFrame {
    /// Build a frame from interleaved i16 samples, computing its RMS level.
    pub fn from_samples(timestamp: u32, samples: &[i16]) -> Self {
        let level_db = rms_dbfs(samples);
        let mut pcm = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            pcm.extend_from_slice(&s.to_le_bytes());
        }
        Self {
            timestamp,
            pcm: Bytes::from(pcm),
            level_db,
        }
    }

    /// Number of interleaved samples in this frame
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }

    /// Decode the PCM payload back into i16 samples.
    pub fn samples(&self) -> Vec<i16> {
        self.pcm
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }
}

/// RMS level of a block of samples, in dBFS. Silence floors at -100 dB.
pub fn rms_dbfs(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return -100.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / i16::MAX as f64;
            v * v
        })
        .sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    if rms <= 1e-5 {
        -100.0
    } else {
        20.0 * rms.log10()
    }
}
