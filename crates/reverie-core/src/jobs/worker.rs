//! The single background worker.
//!
//! Exactly one worker consumes the job FIFO for the lifetime of the
//! process. The accelerator cannot hold two heavy models at once, so
//! strict serialization is the correctness mechanism here: one job
//! fully finishes, success or failure, before the next begins. Any
//! error raised by a collaborator fails the current job and the loop
//! moves on.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};

use crate::cache::ContentCache;
use crate::config::StudioConfig;
use crate::engines::{AnimationStrategy, Engines, ImageRequest};
use crate::error::{Error, Result};
use crate::jobs::job::{
    dimensions_for_aspect_ratio, ImageJobParams, JobPayload, JobStatus, VideoJobParams,
};
use crate::jobs::queue::JobQueue;
use crate::notify::{EventBus, JobUpdate};
use crate::styles::StyleCatalog;
use crate::subtitles::SubtitlePipeline;
use crate::vram::VramManager;

pub struct Worker {
    queue: Arc<JobQueue>,
    vram: Arc<VramManager>,
    cache: Arc<ContentCache>,
    engines: Arc<Engines>,
    styles: Arc<StyleCatalog>,
    events: EventBus,
    config: StudioConfig,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<JobQueue>,
        vram: Arc<VramManager>,
        cache: Arc<ContentCache>,
        engines: Arc<Engines>,
        styles: Arc<StyleCatalog>,
        events: EventBus,
        config: StudioConfig,
    ) -> Self {
        Self {
            queue,
            vram,
            cache,
            engines,
            styles,
            events,
            config,
        }
    }

    /// Consume jobs until the queue shuts down. Blocks (awaits) when
    /// the queue is empty; never exits because of a failed job.
    pub async fn run(self) {
        let Some(mut rx) = self.queue.take_receiver() else {
            error!("worker receiver already taken, refusing to start a second worker");
            return;
        };
        info!("worker started");

        while let Some(job_id) = rx.recv().await {
            let Some(job) = self.queue.get(&job_id).await else {
                warn!(job_id, "queued job vanished from the status table");
                continue;
            };

            info!(job_id = %job.id, kind = %job.kind, "processing job");
            self.queue.mark_processing(&job_id).await;

            let outcome = match job.payload {
                JobPayload::Video(params) => self.run_video(&job_id, params).await,
                JobPayload::Image(params) => self.run_image(&job_id, params).await,
            };

            match outcome {
                Ok(url) => {
                    info!(job_id, url = %url, "job completed");
                    self.queue.complete(&job_id, url).await;
                }
                Err(e) => {
                    error!(job_id, error = %e, "job failed");
                    self.queue.fail(&job_id, e.to_string()).await;
                }
            }
        }
        info!("worker stopped, queue closed");
    }

    /// Video pipeline: speech synthesis, avatar animation, optional
    /// subtitles, then persist the artifact under the job directory.
    async fn run_video(&self, job_id: &str, params: VideoJobParams) -> Result<String> {
        let work_dir = self.config.jobs_dir().join(job_id);
        std::fs::create_dir_all(&work_dir)?;

        // 1. Speech synthesis.
        self.queue
            .set_progress(job_id, 15, &format!("Generating voice ({})", params.voice_id))
            .await;
        let audio_path = work_dir.join("audio.mp3");
        {
            let tts = self.engines.tts.clone();
            let script = params.script.clone();
            let voice = params.voice_id.clone();
            let out = audio_path.clone();
            run_blocking(move || tts.synthesize(&script, &voice, &out)).await?;
        }

        // 2. Animation. The strategy is fixed here, before any call,
        // so a mid-job animator outage fails the job instead of
        // silently switching output quality.
        self.queue.set_progress(job_id, 30, "Animating avatar").await;
        let avatar_path = self.resolve_avatar(params.avatar_id.as_deref());
        let strategy = AnimationStrategy::select(&self.engines.animator, &self.engines.ffmpeg);
        info!(job_id, strategy = strategy.describe(), "animation strategy selected");

        if matches!(strategy, AnimationStrategy::Portrait(_)) {
            self.activate_model("animator").await?;
        }
        let mut video_path = {
            let avatar = avatar_path.clone();
            let audio = audio_path.clone();
            let dir = work_dir.clone();
            run_blocking(move || strategy.animate(&avatar, &audio, &dir)).await?
        };

        // 3. Subtitles.
        if params.generate_subtitles {
            self.queue
                .set_progress(job_id, 80, "Synchronizing subtitles")
                .await;
            self.activate_model("whisper").await?;
            let pipeline = SubtitlePipeline::new(
                self.engines.transcriber.clone(),
                self.engines.ffmpeg.clone(),
            );
            let video = video_path.clone();
            let audio = audio_path.clone();
            video_path = run_blocking(move || pipeline.subtitle_video(&video, &audio)).await?;
        }

        // 4. Persist under a predictable name.
        let final_path = work_dir.join("final_result.mp4");
        if video_path != final_path {
            std::fs::copy(&video_path, &final_path)?;
        }

        Ok(format!(
            "{}/files/jobs/{}/final_result.mp4",
            self.config.base_url, job_id
        ))
    }

    /// Image pipeline: style expansion, model activation, synthesis
    /// with step progress, then write-through to the content cache.
    async fn run_image(&self, job_id: &str, params: ImageJobParams) -> Result<String> {
        let work_dir = self.config.jobs_dir().join(job_id);
        std::fs::create_dir_all(&work_dir)?;
        let artifact = work_dir.join("result.png");
        let url = format!(
            "{}/files/jobs/{}/result.png",
            self.config.base_url, job_id
        );

        // A racing submission may have produced this fingerprint while
        // we sat in the queue.
        let key = ContentCache::key_for(&params.cache_key_params());
        if let Some(blob) = self.cache.lookup(&key) {
            info!(job_id, key, "fingerprint already cached, skipping synthesis");
            std::fs::write(&artifact, &blob)?;
            return Ok(url);
        }

        self.queue
            .set_progress(job_id, 10, "Preparing diffusion pipeline")
            .await;
        let (final_prompt, final_negative) =
            self.styles
                .apply(&params.style, &params.prompt, &params.negative_prompt);
        let (width, height) = dimensions_for_aspect_ratio(&params.aspect_ratio);

        self.activate_model("sdxl").await?;

        let request = ImageRequest {
            prompt: final_prompt,
            negative_prompt: final_negative,
            steps: params.steps,
            guidance: params.guidance,
            width,
            height,
        };

        // Per-step progress goes straight to the notification channel;
        // the status table only records the coarse checkpoints.
        let image = {
            let engines = self.engines.clone();
            let events = self.events.clone();
            let id = job_id.to_string();
            run_blocking(move || {
                let mut on_progress = |step_percent: u8| {
                    let scaled = 10 + (u16::from(step_percent) * 80 / 100) as u8;
                    events.publish(
                        JobUpdate::new(&id, JobStatus::Processing, scaled)
                            .with_message("Generating image"),
                    );
                };
                engines.image.generate(&request, &mut on_progress)
            })
            .await?
        };

        self.queue.set_progress(job_id, 90, "Caching artifact").await;
        std::fs::write(&artifact, &image)?;
        self.cache.store(
            &key,
            &image,
            json!({
                "prompt": params.prompt,
                "style": params.style,
                "steps": params.steps,
                "guidance": params.guidance,
            }),
        )?;

        Ok(url)
    }

    /// Stage `name` as the active accelerator model, offloading
    /// whatever currently occupies device memory.
    async fn activate_model(&self, name: &str) -> Result<()> {
        let vram = self.vram.clone();
        let models = self.engines.models.clone();
        let name = name.to_string();
        run_blocking(move || vram.activate(&name, || models.model(&name)).map(|_| ())).await
    }

    fn resolve_avatar(&self, avatar_id: Option<&str>) -> PathBuf {
        let avatars = self.config.avatars_dir();
        if let Some(id) = avatar_id {
            let candidate = avatars.join(id);
            if candidate.exists() {
                return candidate;
            }
            warn!(avatar_id = id, "avatar not found, using default");
        }
        avatars.join("default.jpg")
    }
}

/// Run a slow, synchronous collaborator call off the async runtime.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Collaborator(format!("background task aborted: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::ffmpeg::Ffmpeg;
    use crate::engines::{
        FaceProcessor, ImageSynthesizer, ModelProvider, PortraitAnimator, SpeechSynthesizer,
        Transcriber, Upscaler,
    };
    use crate::subtitles::SubtitleSegment;
    use crate::vram::AcceleratorModel;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    struct StubTts {
        fail: bool,
    }

    impl SpeechSynthesizer for StubTts {
        fn synthesize(&self, _text: &str, _voice: &str, out_path: &Path) -> Result<()> {
            if self.fail {
                return Err(Error::Collaborator("TTS generation failed".to_string()));
            }
            std::fs::write(out_path, b"mp3").map_err(Error::from)
        }
    }

    struct StubAnimator {
        available: bool,
    }

    impl PortraitAnimator for StubAnimator {
        fn is_available(&self) -> bool {
            self.available
        }

        fn animate(&self, _image: &Path, _audio: &Path, work_dir: &Path) -> Result<PathBuf> {
            let out = work_dir.join("result.mp4");
            std::fs::write(&out, b"mp4")?;
            Ok(out)
        }
    }

    struct StubTranscriber;

    impl Transcriber for StubTranscriber {
        fn transcribe(&self, _audio_path: &Path) -> Result<Vec<SubtitleSegment>> {
            Ok(vec![SubtitleSegment {
                start: 0.0,
                end: 1.0,
                text: "hola".to_string(),
            }])
        }
    }

    struct StubImage {
        fail: bool,
    }

    impl ImageSynthesizer for StubImage {
        fn generate(
            &self,
            _request: &ImageRequest,
            on_progress: &mut dyn FnMut(u8),
        ) -> Result<Vec<u8>> {
            if self.fail {
                return Err(Error::Collaborator("diffusion crashed".to_string()));
            }
            on_progress(50);
            on_progress(100);
            Ok(b"png-bytes".to_vec())
        }
    }

    struct StubFaces;
    impl FaceProcessor for StubFaces {
        fn swap(&self, _s: &[u8], _t: &[u8]) -> Result<Vec<u8>> {
            Ok(b"swapped".to_vec())
        }
    }

    struct StubUpscaler;
    impl Upscaler for StubUpscaler {
        fn upscale(&self, _i: &[u8], _s: f32) -> Result<Vec<u8>> {
            Ok(b"upscaled".to_vec())
        }
    }

    struct StubModel {
        name: String,
    }

    impl AcceleratorModel for StubModel {
        fn name(&self) -> &str {
            &self.name
        }
        fn load_to_device(&self) -> Result<()> {
            Ok(())
        }
        fn offload(&self) -> Result<()> {
            Ok(())
        }
    }

    struct StubModels;
    impl ModelProvider for StubModels {
        fn model(&self, name: &str) -> Result<Arc<dyn AcceleratorModel>> {
            Ok(Arc::new(StubModel {
                name: name.to_string(),
            }))
        }
    }

    struct Fixture {
        queue: Arc<JobQueue>,
        vram: Arc<VramManager>,
        events: EventBus,
        config: StudioConfig,
    }

    fn fixture(tts_fail: bool, image_fail: bool) -> Fixture {
        let data_dir = std::env::temp_dir().join(format!("reverie-worker-{}", Uuid::new_v4()));
        let config = StudioConfig {
            data_dir: data_dir.clone(),
            cache_dir: data_dir.join("cache"),
            base_url: "http://localhost:5000".to_string(),
            ..StudioConfig::default()
        };

        let events = EventBus::default();
        let queue = Arc::new(JobQueue::new(events.clone(), 64));
        let vram = Arc::new(VramManager::new());
        let cache = Arc::new(ContentCache::new(config.cache_dir.clone()).unwrap());
        let engines = Arc::new(Engines {
            image: Arc::new(StubImage { fail: image_fail }),
            tts: Arc::new(StubTts { fail: tts_fail }),
            transcriber: Arc::new(StubTranscriber),
            animator: Arc::new(StubAnimator { available: true }),
            faces: Arc::new(StubFaces),
            upscaler: Arc::new(StubUpscaler),
            models: Arc::new(StubModels),
            ffmpeg: Ffmpeg::new(Duration::from_secs(5)),
        });

        let worker = Worker::new(
            queue.clone(),
            vram.clone(),
            cache,
            engines,
            Arc::new(StyleCatalog::new()),
            events.clone(),
            config.clone(),
        );
        tokio::spawn(worker.run());

        Fixture {
            queue,
            vram,
            events,
            config,
        }
    }

    async fn wait_terminal(queue: &JobQueue, job_id: &str) -> crate::jobs::job::Job {
        for _ in 0..200 {
            if let Some(job) = queue.get(job_id).await {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never reached a terminal state");
    }

    fn video_payload(subtitles: bool) -> JobPayload {
        JobPayload::Video(VideoJobParams {
            avatar_id: None,
            script: "hola mundo".to_string(),
            voice_id: "es-CO-SalomeNeural".to_string(),
            generate_subtitles: subtitles,
        })
    }

    #[tokio::test]
    async fn video_job_completes_with_increasing_progress() {
        let fx = fixture(false, false);
        let mut rx = fx.events.subscribe();

        let id = fx.queue.submit(video_payload(false)).await.unwrap();
        let job = wait_terminal(&fx.queue, &id).await;

        assert_eq!(job.status, JobStatus::Completed);
        let url = job.result_url.unwrap();
        assert!(url.ends_with(&format!("files/jobs/{id}/final_result.mp4")));
        assert!(fx
            .config
            .jobs_dir()
            .join(&id)
            .join("final_result.mp4")
            .exists());

        let mut last = 0;
        while let Ok(update) = rx.try_recv() {
            assert!(update.progress >= last, "progress went backwards");
            last = update.progress;
        }
        assert_eq!(last, 100);
    }

    #[tokio::test]
    async fn failed_job_records_error_and_worker_survives() {
        let fx = fixture(true, false);

        let failed_id = fx.queue.submit(video_payload(false)).await.unwrap();
        let failed = wait_terminal(&fx.queue, &failed_id).await;
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error.unwrap().contains("TTS"));

        // The worker keeps serving unrelated jobs afterwards.
        let image_id = fx
            .queue
            .submit(JobPayload::Image(ImageJobParams {
                prompt: "a fox".to_string(),
                negative_prompt: String::new(),
                style: "None".to_string(),
                steps: 4,
                guidance: 0.0,
                aspect_ratio: "1:1".to_string(),
            }))
            .await
            .unwrap();
        let image_job = wait_terminal(&fx.queue, &image_id).await;
        assert_eq!(image_job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn image_job_writes_through_to_cache() {
        let fx = fixture(false, false);

        let params = ImageJobParams {
            prompt: "a fox".to_string(),
            negative_prompt: String::new(),
            style: "None".to_string(),
            steps: 4,
            guidance: 0.0,
            aspect_ratio: "16:9".to_string(),
        };
        let key = ContentCache::key_for(&params.cache_key_params());

        let id = fx
            .queue
            .submit(JobPayload::Image(params))
            .await
            .unwrap();
        let job = wait_terminal(&fx.queue, &id).await;
        assert_eq!(job.status, JobStatus::Completed);

        let cache = ContentCache::new(fx.config.cache_dir.clone()).unwrap();
        assert_eq!(cache.lookup(&key).unwrap(), b"png-bytes".to_vec());
        assert_eq!(fx.vram.active_model().as_deref(), Some("sdxl"));
    }

    #[tokio::test]
    async fn subtitle_stage_switches_the_active_model() {
        let fx = fixture(false, false);

        // Subtitles run through ffmpeg burn-in, which is absent in the
        // test environment, so the job fails at that step; the model
        // switch to whisper happens first and must stick.
        let id = fx.queue.submit(video_payload(true)).await.unwrap();
        let job = wait_terminal(&fx.queue, &id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(fx.vram.active_model().as_deref(), Some("whisper"));
    }

    #[tokio::test]
    async fn jobs_execute_in_submission_order() {
        let fx = fixture(false, false);
        let done = Arc::new(AtomicBool::new(false));

        let first = fx.queue.submit(video_payload(false)).await.unwrap();
        let second = fx.queue.submit(video_payload(false)).await.unwrap();

        let first_job = wait_terminal(&fx.queue, &first).await;
        assert!(first_job.status.is_terminal());
        // By the time the second finishes, the first must already be
        // terminal: the worker is strictly sequential.
        let second_job = wait_terminal(&fx.queue, &second).await;
        assert!(second_job.status.is_terminal());
        done.store(true, Ordering::SeqCst);
    }
}
