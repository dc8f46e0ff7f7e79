//! Asynchronous job processing: records, queue, and the worker loop.

pub mod job;
pub mod queue;
pub mod worker;

pub use job::{
    dimensions_for_aspect_ratio, ImageJobParams, Job, JobKind, JobPayload, JobStatus,
    VideoJobParams,
};
pub use queue::JobQueue;
pub use worker::Worker;
