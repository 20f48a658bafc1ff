//! Parameter-set cache and stream reconstruction
//!
//! Guarantees that any frame handed to the downstream decoder carries the
//! SPS/PPS it needs to initialize or resynchronize, without re-sending
//! them on every frame. Reconstruction is a best-effort enhancement: a
//! frame that cannot be improved is passed through unmodified, never
//! dropped.

use crate::h264::nal::{self, NAL_IDR, NAL_PPS, NAL_SPS};
use log::debug;

/// Most recently seen SPS/PPS, stored with their start codes.
///
/// Session-scoped: constructed fresh per streaming session, never shared
/// across sessions. Once populated the entries are only ever overwritten,
/// never cleared — they are the last known good parameter sets.
#[derive(Debug, Default)]
pub struct ParameterSetCache {
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl ParameterSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache the SPS, overwriting any previous copy.
    pub fn store_sps(&mut self, annex_b: &[u8]) {
        self.sps = Some(annex_b.to_vec());
    }

    /// Cache the PPS, overwriting any previous copy.
    pub fn store_pps(&mut self, annex_b: &[u8]) {
        self.pps = Some(annex_b.to_vec());
    }

    pub fn sps(&self) -> Option<&[u8]> {
        self.sps.as_deref()
    }

    pub fn pps(&self) -> Option<&[u8]> {
        self.pps.as_deref()
    }

    /// Both parameter sets are available for injection.
    pub fn is_populated(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }
}

/// Rebuilds a decodable Annex B stream out of transport-delivered frames.
///
/// Injection policy:
/// - always in front of an IDR slice (the point a decoder may join),
/// - every `reinjection_interval` frames, so a decoder that joined
///   without seeing an IDR can still resynchronize,
/// - never when the frame already carries its own SPS/PPS.
pub struct StreamReconstructor {
    cache: ParameterSetCache,
    reinjection_interval: u32,
    frames_since_injection: u32,
    injections: u64,
}

impl StreamReconstructor {
    pub fn new(reinjection_interval: u32) -> Self {
        Self {
            cache: ParameterSetCache::new(),
            reinjection_interval,
            frames_since_injection: 0,
            injections: 0,
        }
    }

    pub fn cache(&self) -> &ParameterSetCache {
        &self.cache
    }

    pub fn injections(&self) -> u64 {
        self.injections
    }

    /// Process one transport frame, returning the bytes to hand to the
    /// downstream decoder.
    ///
    /// Never blocks waiting for a future IDR: with an unpopulated cache
    /// the frame goes through unmodified.
    pub fn process(&mut self, frame: &[u8]) -> Vec<u8> {
        let units = nal::scan(frame);
        if units.is_empty() {
            // Nothing to reconstruct; pass the frame through untouched
            return frame.to_vec();
        }

        let mut has_idr = false;
        let mut has_own_parameter_sets = false;
        for unit in &units {
            match unit.nal_type {
                NAL_SPS => {
                    self.cache.store_sps(unit.annex_b(frame));
                    has_own_parameter_sets = true;
                }
                NAL_PPS => {
                    self.cache.store_pps(unit.annex_b(frame));
                    has_own_parameter_sets = true;
                }
                NAL_IDR => has_idr = true,
                _ => {}
            }
        }

        self.frames_since_injection += 1;

        if has_own_parameter_sets {
            // The decoder receives fresh parameter sets with this frame
            self.frames_since_injection = 0;
            return frame.to_vec();
        }

        let due_for_resync = self.frames_since_injection >= self.reinjection_interval;
        if (has_idr || due_for_resync) && self.cache.is_populated() {
            let sps = self.cache.sps().unwrap_or_default();
            let pps = self.cache.pps().unwrap_or_default();

            // NAL units carry their own start codes, so concatenation
            // alone produces a valid Annex B stream
            let mut out = Vec::with_capacity(sps.len() + pps.len() + frame.len());
            out.extend_from_slice(sps);
            out.extend_from_slice(pps);
            out.extend_from_slice(frame);

            self.frames_since_injection = 0;
            self.injections += 1;
            debug!(
                "StreamReconstructor: injected SPS+PPS (idr: {}, resync: {})",
                has_idr, due_for_resync
            );
            return out;
        }

        frame.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0, 0, 0, 1, 0x67, 0x64, 0x00];
    const PPS: &[u8] = &[0, 0, 0, 1, 0x68, 0xEE];
    const IDR: &[u8] = &[0, 0, 0, 1, 0x65, 0x88, 0x80];
    const SLICE: &[u8] = &[0, 0, 0, 1, 0x41, 0x9A];

    fn concat(parts: &[&[u8]]) -> Vec<u8> {
        parts.iter().flat_map(|p| p.to_vec()).collect()
    }

    #[test]
    fn test_passthrough_without_cached_parameter_sets() {
        let mut recon = StreamReconstructor::new(30);
        // IDR before any SPS/PPS was ever seen: must go through unmodified
        assert_eq!(recon.process(IDR), IDR.to_vec());
        assert_eq!(recon.injections(), 0);
    }

    #[test]
    fn test_no_start_code_passthrough() {
        let mut recon = StreamReconstructor::new(30);
        let garbage = vec![0x12, 0x34, 0x56];
        assert_eq!(recon.process(&garbage), garbage);
    }

    #[test]
    fn test_idr_injection_after_cache_populated() {
        let mut recon = StreamReconstructor::new(30);

        // Keyframe with its own parameter sets populates the cache and
        // passes through unchanged
        let keyframe = concat(&[SPS, PPS, IDR]);
        assert_eq!(recon.process(&keyframe), keyframe);
        assert!(recon.cache().is_populated());

        // A bare IDR later gets SPS ++ PPS ++ original
        let out = recon.process(IDR);
        assert_eq!(out, concat(&[SPS, PPS, IDR]));
        assert_eq!(recon.injections(), 1);
    }

    #[test]
    fn test_non_idr_passthrough_until_resync_interval() {
        let mut recon = StreamReconstructor::new(30);
        recon.process(&concat(&[SPS, PPS, IDR]));

        // Frames 1..=29 after the parameter sets: unchanged
        for _ in 1..30 {
            assert_eq!(recon.process(SLICE), SLICE.to_vec());
        }

        // Frame 30 triggers a periodic resync even though it is not IDR
        let out = recon.process(SLICE);
        assert_eq!(out, concat(&[SPS, PPS, SLICE]));
        assert_eq!(recon.injections(), 1);

        // And the counter restarts
        assert_eq!(recon.process(SLICE), SLICE.to_vec());
    }

    #[test]
    fn test_frame_with_own_parameter_sets_not_reinjected() {
        let mut recon = StreamReconstructor::new(30);
        recon.process(&concat(&[SPS, PPS, IDR]));

        // A later keyframe already carrying SPS/PPS must not get another copy
        let keyframe = concat(&[SPS, PPS, IDR]);
        assert_eq!(recon.process(&keyframe), keyframe);
        assert_eq!(recon.injections(), 0);
    }

    #[test]
    fn test_cache_overwrites_never_appends() {
        let mut cache = ParameterSetCache::new();
        cache.store_sps(SPS);
        cache.store_sps(SPS);
        assert_eq!(cache.sps(), Some(SPS));

        let new_sps: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1F];
        cache.store_sps(new_sps);
        assert_eq!(cache.sps(), Some(new_sps));
    }
}
