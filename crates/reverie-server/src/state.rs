//! Application state: every service the handlers depend on, wired
//! explicitly at startup.

use std::sync::Arc;

use reverie_core::{
    ContentCache, Engines, EventBus, JobQueue, RateLimiter, StudioConfig, StyleCatalog,
    VramManager, Worker,
};

/// Shared application state. All fields are cheap to clone; the
/// expensive services live behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: StudioConfig,
    pub queue: Arc<JobQueue>,
    pub vram: Arc<VramManager>,
    pub cache: Arc<ContentCache>,
    pub engines: Arc<Engines>,
    pub styles: Arc<StyleCatalog>,
    pub limiter: Arc<RateLimiter>,
    pub events: EventBus,
}

impl AppState {
    pub fn new(config: StudioConfig) -> reverie_core::Result<Self> {
        let events = EventBus::default();
        Ok(Self {
            queue: Arc::new(JobQueue::new(events.clone(), config.max_finished_jobs)),
            vram: Arc::new(VramManager::new()),
            cache: Arc::new(ContentCache::new(config.cache_dir.clone())?),
            engines: Arc::new(Engines::from_config(&config)),
            styles: Arc::new(StyleCatalog::new()),
            limiter: Arc::new(RateLimiter::new()),
            events,
            config,
        })
    }

    /// Build the background worker over the same services the API
    /// handlers see.
    pub fn worker(&self) -> Worker {
        Worker::new(
            self.queue.clone(),
            self.vram.clone(),
            self.cache.clone(),
            self.engines.clone(),
            self.styles.clone(),
            self.events.clone(),
            self.config.clone(),
        )
    }
}
