//! Job queue and status table.
//!
//! The FIFO channel and the id-indexed table are two views of the same
//! logical job set: submission order is execution order, and the table
//! is the canonical record clients poll. The worker holds the only
//! mutation path after submission; terminal states are immutable.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::jobs::job::{Job, JobPayload, JobStatus};
use crate::notify::{EventBus, JobUpdate};

pub struct JobQueue {
    jobs: RwLock<HashMap<String, Job>>,
    tx: mpsc::UnboundedSender<String>,
    rx: StdMutex<Option<mpsc::UnboundedReceiver<String>>>,
    /// Finished job ids in completion order, for bounded retention.
    finished: StdMutex<VecDeque<String>>,
    events: EventBus,
    seq: AtomicU64,
    max_finished: usize,
}

impl JobQueue {
    pub fn new(events: EventBus, max_finished: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            jobs: RwLock::new(HashMap::new()),
            tx,
            rx: StdMutex::new(Some(rx)),
            finished: StdMutex::new(VecDeque::new()),
            events,
            seq: AtomicU64::new(0),
            max_finished,
        }
    }

    /// Take the consumer end of the FIFO. The single worker calls this
    /// exactly once at startup.
    pub fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.rx.lock().expect("receiver lock poisoned").take()
    }

    /// Create a job in `queued` state and push it onto the FIFO.
    /// Returns immediately; execution happens in the worker.
    pub async fn submit(&self, payload: JobPayload) -> Result<String> {
        let kind = payload.kind();
        let now = unix_now();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("{}_{}_{}", kind.id_prefix(), now, seq);

        let job = Job {
            id: id.clone(),
            kind,
            status: JobStatus::Queued,
            progress: 0,
            created_at: now,
            result_url: None,
            error: None,
            payload,
        };

        self.jobs.write().await.insert(id.clone(), job);
        self.tx
            .send(id.clone())
            .map_err(|_| Error::Shutdown)?;

        debug!(job_id = %id, kind = %kind, "job queued");
        Ok(id)
    }

    /// Current state of a job, if known.
    pub async fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.read().await.get(job_id).cloned()
    }

    pub async fn get_or_err(&self, job_id: &str) -> Result<Job> {
        self.get(job_id)
            .await
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))
    }

    /// Worker: mark a job as picked up.
    pub async fn mark_processing(&self, job_id: &str) {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(job_id) else {
            return;
        };
        if job.status.is_terminal() {
            warn!(job_id, "ignoring processing transition on terminal job");
            return;
        }
        job.status = JobStatus::Processing;
        job.progress = job.progress.max(5);
        let update = JobUpdate::new(job_id, JobStatus::Processing, job.progress);
        drop(jobs);
        self.events.publish(update);
    }

    /// Worker: report pipeline-stage progress. Progress within a job is
    /// monotonically non-decreasing; stale values are ignored.
    pub async fn set_progress(&self, job_id: &str, progress: u8, message: &str) {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(job_id) else {
            return;
        };
        if job.status.is_terminal() {
            return;
        }
        if progress > job.progress {
            job.progress = progress;
        }
        let update = JobUpdate::new(job_id, JobStatus::Processing, job.progress)
            .with_message(message);
        drop(jobs);
        self.events.publish(update);
    }

    /// Worker: terminal success transition.
    pub async fn complete(&self, job_id: &str, result_url: String) {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(job_id) else {
            return;
        };
        if job.status.is_terminal() {
            warn!(job_id, "ignoring completion of terminal job");
            return;
        }
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.result_url = Some(result_url.clone());
        drop(jobs);

        let mut update = JobUpdate::new(job_id, JobStatus::Completed, 100);
        update.url = Some(result_url);
        self.events.publish(update);
        self.retire(job_id).await;
    }

    /// Worker: terminal failure transition.
    pub async fn fail(&self, job_id: &str, error: String) {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(job_id) else {
            return;
        };
        if job.status.is_terminal() {
            warn!(job_id, "ignoring failure of terminal job");
            return;
        }
        job.status = JobStatus::Failed;
        job.error = Some(error.clone());
        let progress = job.progress;
        drop(jobs);

        let mut update = JobUpdate::new(job_id, JobStatus::Failed, progress);
        update.error = Some(error);
        self.events.publish(update);
        self.retire(job_id).await;
    }

    /// Record a finished job and prune the oldest finished entries
    /// beyond the retention bound. Queued and processing jobs are
    /// never pruned.
    async fn retire(&self, job_id: &str) {
        let overflow: Vec<String> = {
            let mut finished = self.finished.lock().expect("retention lock poisoned");
            finished.push_back(job_id.to_string());
            let excess = finished.len().saturating_sub(self.max_finished);
            (0..excess).filter_map(|_| finished.pop_front()).collect()
        };
        if overflow.is_empty() {
            return;
        }
        let mut jobs = self.jobs.write().await;
        for id in overflow {
            debug!(job_id = %id, "pruning finished job from status table");
            jobs.remove(&id);
        }
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
