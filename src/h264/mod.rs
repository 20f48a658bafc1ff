//! H.264 elementary-stream handling for the avatar video channel
//!
//! The transport delivers Annex B fragments that may or may not carry the
//! parameter sets a decoder needs to (re)initialize. This module scans
//! incoming buffers into typed NAL units and rebuilds a stream a decoder
//! can always join.

pub mod nal;
pub mod reconstructor;

pub use nal::{NalUnit, scan};
pub use reconstructor::{ParameterSetCache, StreamReconstructor};
