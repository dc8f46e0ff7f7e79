//! Reverie Core - Media Generation Orchestration Engine
//!
//! This crate provides the orchestration layer for a media generation
//! studio: a durable in-process job queue with a single sequential
//! worker, an accelerator memory manager that keeps at most one heavy
//! model resident, a content-addressable artifact cache, per-client
//! rate limiting, and a broadcast channel for live job updates.
//!
//! # Architecture
//!
//! Heavy inference runs out of process behind collaborator traits; the
//! core never touches model weights itself. The worker drains the job
//! FIFO one job at a time, staging whichever model the current stage
//! needs and publishing progress to subscribers.
//!
//! # Example
//!
//! ```ignore
//! use reverie_core::{EventBus, JobPayload, JobQueue, VideoJobParams};
//!
//! let events = EventBus::default();
//! let queue = JobQueue::new(events.clone(), 256);
//!
//! let id = queue.submit(JobPayload::Video(VideoJobParams {
//!     avatar_id: None,
//!     script: "Bienvenidos al estudio".to_string(),
//!     voice_id: "es-CO-SalomeNeural".to_string(),
//!     generate_subtitles: true,
//! })).await?;
//! ```

pub mod cache;
pub mod config;
pub mod engines;
pub mod error;
pub mod jobs;
pub mod notify;
pub mod ratelimit;
pub mod styles;
pub mod subtitles;
pub mod vram;

pub use cache::{CacheEntryMeta, CacheKeyParams, CacheStats, ContentCache};
pub use config::StudioConfig;
pub use engines::{AnimationStrategy, Engines, ImageRequest};
pub use error::{Error, Result};
pub use jobs::{
    dimensions_for_aspect_ratio, ImageJobParams, Job, JobKind, JobPayload, JobQueue, JobStatus,
    VideoJobParams, Worker,
};
pub use notify::{EventBus, JobUpdate};
pub use ratelimit::{Decision, RateLimiter, RatePolicy};
pub use styles::StyleCatalog;
pub use subtitles::{SubtitlePipeline, SubtitleSegment, SubtitleStyle};
pub use vram::{ModelLocation, VramManager};
