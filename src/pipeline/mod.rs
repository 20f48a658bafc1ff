//! Streaming pipeline: ingestion, synchronization, release
//!
//! Frames enter through the transport boundary, get processed by the
//! ingest stage (stream reconstruction, audio decode), wait in per-channel
//! FIFO queues, and are released by the scheduler thread against a shared
//! clock reference. [`session::AvatarSession`] ties the pieces together.

pub mod clock;
pub mod health;
pub mod ingest;
pub mod queue;
pub mod scheduler;
pub mod session;
pub mod stage;
pub mod state;
pub mod types;

pub use clock::{ClockState, SyncClock};
pub use health::{HealthSummary, SessionHealth};
pub use ingest::IngestStage;
pub use queue::FrameQueue;
pub use scheduler::{SchedulerCore, SyncScheduler};
pub use session::AvatarSession;
pub use stage::PipelineStage;
pub use state::SessionState;
pub use types::{AudioFrame, VideoFrame, VIDEO_CLOCK_HZ};
