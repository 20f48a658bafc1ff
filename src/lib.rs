//! Avatar audio/video synchronization engine
//!
//! Receives encoded media frames from a real-time transport, reconstructs
//! a decodable H.264 stream for a downstream transmit process, decodes
//! audio for local playback, and releases both channels in sync against a
//! shared wall-clock reference.

pub mod config;
pub mod h264;
pub mod pipeline;
pub mod sink;
pub mod transport;
pub mod utils;

pub use config::SessionConfig;
pub use pipeline::AvatarSession;
pub use transport::{FrameIngress, TransportEvent};
