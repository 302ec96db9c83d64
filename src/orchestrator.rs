use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{PipelineError, ProviderError, Result};
use crate::job::{GenerationJob, ScenePlan, VideoArtifact};
use crate::media::{ClipConcatenator, FfmpegFrameExtractor, FfmpegStitcher, LastFrameExtractor};
use crate::planner::ScenePromptPlanner;
use crate::providers::{GenerationOperation, ProviderGateway, VideoRequest};

/// Where a run is, or where it stopped. Scene indices are 0-based; `Display` shows them 1-based.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PipelineStage {
    Idea,
    Script,
    Planned,
    /// Creating the scratch directory for clips and the seed image
    Workspace,
    Generating(usize),
    FrameReady(usize),
    Combined(usize),
    Final,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Idea => write!(f, "idea"),
            PipelineStage::Script => write!(f, "script"),
            PipelineStage::Planned => write!(f, "scene plan"),
            PipelineStage::Workspace => write!(f, "scratch directory"),
            PipelineStage::Generating(i) => write!(f, "scene {} generation", i + 1),
            PipelineStage::FrameReady(i) => write!(f, "scene {} frame extraction", i + 1),
            PipelineStage::Combined(i) => write!(f, "scene {} concatenation", i + 1),
            PipelineStage::Final => write!(f, "publish"),
        }
    }
}

/// A halted run: the stage that failed and why
#[derive(thiserror::Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct RunFailure {
    pub stage: PipelineStage,
    pub source: PipelineError,
}

fn failed_at<E: Into<PipelineError>>(stage: PipelineStage) -> impl FnOnce(E) -> RunFailure {
    move |e| RunFailure {
        stage,
        source: e.into(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: PipelineStage,
    pub duration: Duration,
}

/// Summary of a completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub final_video: VideoArtifact,
    pub job: GenerationJob,
    pub started_at: DateTime<Utc>,
    pub total_time: Duration,
    pub stages_completed: Vec<StageTiming>,
    pub file_size: u64,
    pub md5: String,
}

/// Drives one idea through script, plan, chained scene generation and concatenation
pub struct SceneChainOrchestrator {
    config: Config,
    gateway: ProviderGateway,
    frames: Arc<dyn LastFrameExtractor>,
    stitcher: Arc<dyn ClipConcatenator>,
    planner: ScenePromptPlanner,
    poll_interval: Duration,
}

impl SceneChainOrchestrator {
    pub fn new(
        config: Config,
        gateway: ProviderGateway,
        frames: Arc<dyn LastFrameExtractor>,
        stitcher: Arc<dyn ClipConcatenator>,
    ) -> Self {
        let planner = ScenePromptPlanner::from_config(&config.pipeline);
        let poll_interval = Duration::from_secs(config.polling.interval_seconds);
        Self {
            config,
            gateway,
            frames,
            stitcher,
            planner,
            poll_interval,
        }
    }

    /// Real providers plus the ffmpeg-backed media tools
    pub fn from_config(config: Config) -> Result<Self> {
        let gateway = ProviderGateway::from_config(&config.providers, &config.video)?;
        let frames = Arc::new(FfmpegFrameExtractor::new(
            config.media.ffmpeg_path.clone(),
            config.media.ffprobe_path.clone(),
        ));
        let stitcher = Arc::new(FfmpegStitcher::new(&config.media));
        Ok(Self::new(config, gateway, frames, stitcher))
    }

    /// Override the delay between operation polls
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run the whole pipeline. Nothing is published unless every stage succeeds.
    pub async fn run(&self) -> std::result::Result<RunReport, RunFailure> {
        let started_at = Utc::now();
        let run_start = Instant::now();
        let scene_count = self.config.pipeline.scene_count;
        let mut job = GenerationJob::new(scene_count, self.config.pipeline.target_duration_seconds);
        let mut timings = Vec::new();

        info!("🚀 Starting scene chain run ({} scenes)", scene_count);

        // Idea
        let stage_start = Instant::now();
        job.idea = self
            .discover_idea()
            .await
            .map_err(failed_at(PipelineStage::Idea))?;
        info!("💡 Idea: {}", preview(&job.idea));
        timings.push(timing(PipelineStage::Idea, stage_start));

        // Script
        let stage_start = Instant::now();
        job.script = self
            .write_script(&job.idea, job.target_duration_seconds)
            .await
            .map_err(failed_at(PipelineStage::Script))?;
        info!("📜 Script ready ({} chars)", job.script.len());
        timings.push(timing(PipelineStage::Script, stage_start));

        // Planned
        let stage_start = Instant::now();
        job.scenes = self
            .plan_scenes(&job.idea, &job.script, scene_count)
            .await
            .map_err(failed_at(PipelineStage::Planned))?;
        info!("🗂️ Planned {} scenes", job.scenes.len());
        timings.push(timing(PipelineStage::Planned, stage_start));

        let scratch = self
            .prepare_scratch()
            .await
            .map_err(failed_at(PipelineStage::Workspace))?;
        let seed_path = scratch.join(&self.config.media.seed_image_name);

        let mut running: Option<VideoArtifact> = None;

        for i in 0..scene_count {
            // Generating(i)
            let stage = PipelineStage::Generating(i);
            let stage_start = Instant::now();
            let plan = if i == 0 {
                job.scenes[i].clone()
            } else {
                job.scenes[i].with_seed(&seed_path)
            };
            let clip_path = scratch.join(format!("scene{}.mp4", i));
            let clip = self
                .generate_scene(&plan, &clip_path)
                .await
                .map_err(failed_at(stage))?;
            job.scenes[i] = plan;
            timings.push(timing(stage, stage_start));

            // FrameReady(i), skipped for the last scene
            if i + 1 < scene_count {
                let stage = PipelineStage::FrameReady(i);
                let stage_start = Instant::now();
                self.frames
                    .extract_last_frame(&clip.path, &seed_path)
                    .await
                    .map_err(failed_at(stage))?;
                timings.push(timing(stage, stage_start));
            }

            // Combined(i)
            running = match running.take() {
                None => Some(clip),
                Some(previous) => {
                    let stage = PipelineStage::Combined(i);
                    let stage_start = Instant::now();
                    let combined = self
                        .fold(&scratch, i, &previous, &clip)
                        .await
                        .map_err(failed_at(stage))?;
                    timings.push(timing(stage, stage_start));
                    Some(combined)
                }
            };
        }

        // Final
        let stage_start = Instant::now();
        let last = running.ok_or_else(|| RunFailure {
            stage: PipelineStage::Final,
            source: PipelineError::Config("scene_count must be at least 1".to_string()),
        })?;
        let (file_size, md5) = digest(&last.path)
            .await
            .map_err(failed_at(PipelineStage::Final))?;
        let final_video = self
            .publish(&last, &scratch, &seed_path)
            .await
            .map_err(failed_at(PipelineStage::Final))?;
        timings.push(timing(PipelineStage::Final, stage_start));

        let total_time = run_start.elapsed();
        info!(
            "✅ Final video: {} ({:.1} MB) in {:.1}s",
            final_video.path.display(),
            file_size as f64 / 1_048_576.0,
            total_time.as_secs_f64()
        );

        Ok(RunReport {
            final_video,
            job,
            started_at,
            total_time,
            stages_completed: timings,
            file_size,
            md5,
        })
    }

    async fn discover_idea(&self) -> Result<String> {
        info!("🔍 Searching for a video idea...");
        let idea = self
            .gateway
            .search
            .search_and_generate(&self.config.pipeline.discovery_query)
            .await?;
        non_empty(idea, "idea")
    }

    async fn write_script(&self, idea: &str, target_duration_seconds: u32) -> Result<String> {
        info!("✍️ Writing a {}s script...", target_duration_seconds);
        let instruction = ScenePromptPlanner::script_instruction(idea, target_duration_seconds);
        let script = self.gateway.text.generate_text(&instruction, &[]).await?;
        non_empty(script, "script")
    }

    async fn plan_scenes(&self, idea: &str, script: &str, scene_count: usize) -> Result<Vec<ScenePlan>> {
        info!("🎬 Planning {} scene prompts...", scene_count);
        let instruction = self.planner.build_instruction(idea, script, scene_count);
        let raw = self.gateway.text.generate_text(&instruction, &[]).await?;
        let raw = non_empty(raw, "scene plan")?;
        Ok(self.planner.parse_plan(&raw, scene_count)?)
    }

    async fn prepare_scratch(&self) -> Result<PathBuf> {
        let scratch = if self.config.output.per_run_scratch {
            self.config
                .output
                .work_dir
                .join(format!("run-{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ")))
        } else {
            self.config.output.work_dir.clone()
        };
        tokio::fs::create_dir_all(&scratch).await?;
        debug!("📂 Scratch directory: {}", scratch.display());
        Ok(scratch)
    }

    async fn generate_scene(&self, plan: &ScenePlan, clip_path: &Path) -> Result<VideoArtifact> {
        info!(
            "🎥 Generating scene {} ({})",
            plan.index + 1,
            plan.mode.label()
        );

        let request = VideoRequest {
            prompt: plan.prompt_text.clone(),
            seed_image: plan.seed_image_path.clone(),
        };
        let operation = self.gateway.video.generate_video(&request).await?;
        let operation = self.wait_for(plan.index, operation).await?;

        if let Some(message) = &operation.error {
            return Err(ProviderError::new("generate_video", message.clone()).into());
        }
        if operation.result.is_none() {
            return Err(PipelineError::EmptyResponse {
                stage: PipelineStage::Generating(plan.index).to_string(),
            });
        }

        self.gateway
            .video
            .save_operation_result(&operation, clip_path)
            .await?;
        info!("💾 Scene {} saved to {}", plan.index + 1, clip_path.display());

        Ok(VideoArtifact {
            duration_seconds: Some(f64::from(self.config.pipeline.scene_seconds)),
            ..VideoArtifact::intermediate(clip_path.to_path_buf())
        })
    }

    /// Poll until done, bounded by attempts and wall clock
    async fn wait_for(&self, scene: usize, mut operation: GenerationOperation) -> Result<GenerationOperation> {
        let polling = &self.config.polling;
        let max_wait = (polling.max_wait_seconds > 0).then(|| Duration::from_secs(polling.max_wait_seconds));
        let started = Instant::now();
        let mut attempts = 0u32;

        while !operation.done {
            let out_of_time = max_wait.is_some_and(|limit| started.elapsed() >= limit);
            if attempts >= polling.max_attempts || out_of_time {
                return Err(PipelineError::GenerationTimeout {
                    scene,
                    attempts,
                    elapsed: started.elapsed(),
                });
            }

            tokio::time::sleep(self.poll_interval).await;
            attempts += 1;
            operation = self.gateway.video.poll_operation(&operation).await?;
            debug!("⏳ Scene {} poll {}: done={}", scene + 1, attempts, operation.done);
        }

        info!(
            "🎞️ Scene {} finished after {} polls ({:.0}s)",
            scene + 1,
            attempts,
            started.elapsed().as_secs_f64()
        );
        Ok(operation)
    }

    /// Concatenate then delete both consumed intermediates
    async fn fold(
        &self,
        scratch: &Path,
        i: usize,
        previous: &VideoArtifact,
        clip: &VideoArtifact,
    ) -> Result<VideoArtifact> {
        let output = scratch.join(format!("combined_{}.mp4", i));
        info!("🔗 Folding scene {} into {}", i + 1, output.display());

        let mut combined = self
            .stitcher
            .concatenate(&previous.path, &clip.path, &output)
            .await?;
        if combined.duration_seconds.is_none() {
            combined.duration_seconds = previous.duration_seconds.zip(clip.duration_seconds).map(|(a, b)| a + b);
        }

        for consumed in [previous, clip] {
            if consumed.is_intermediate && consumed.path != combined.path {
                remove_quietly(&consumed.path).await;
            }
        }

        Ok(combined)
    }

    /// Move the last combined artifact to the final path and clear the scratch space
    async fn publish(&self, last: &VideoArtifact, scratch: &Path, seed_path: &Path) -> Result<VideoArtifact> {
        let final_path = &self.config.output.final_path;
        if let Some(parent) = final_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        if let Err(e) = tokio::fs::rename(&last.path, final_path).await {
            // rename cannot cross filesystems
            debug!("rename failed ({}), copying instead", e);
            copy_into_place(&last.path, final_path).await?;
            remove_quietly(&last.path).await;
        }

        if tokio::fs::try_exists(seed_path).await.unwrap_or(false) {
            remove_quietly(seed_path).await;
        }
        if self.config.output.per_run_scratch {
            if let Err(e) = tokio::fs::remove_dir(scratch).await {
                debug!("Scratch directory {} kept: {}", scratch.display(), e);
            }
        }

        Ok(VideoArtifact {
            duration_seconds: last.duration_seconds,
            ..VideoArtifact::final_output(final_path.clone())
        })
    }
}

fn non_empty(text: String, stage: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::EmptyResponse {
            stage: stage.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn timing(stage: PipelineStage, since: Instant) -> StageTiming {
    StageTiming {
        stage,
        duration: since.elapsed(),
    }
}

/// Copy beside `destination` and rename over it, so a failed copy never lands there
async fn copy_into_place(source: &Path, destination: &Path) -> Result<()> {
    let dir = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let staging = tempfile::Builder::new().prefix(".publish-").tempfile_in(&dir)?;
    tokio::fs::copy(source, staging.path()).await?;
    staging.persist(destination).map_err(|e| e.error)?;
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > 80 {
        format!("{}...", line.chars().take(80).collect::<String>())
    } else {
        line.to_string()
    }
}

/// Size and md5 of a file, read in chunks
async fn digest(path: &Path) -> Result<(u64, String)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; 64 * 1024];
    let mut size = 0u64;

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
        size += read as u64;
    }

    Ok((size, format!("{:x}", context.compute())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stage_names() {
        assert_eq!(PipelineStage::Generating(1).to_string(), "scene 2 generation");
        assert_eq!(PipelineStage::Combined(2).to_string(), "scene 3 concatenation");
        assert_eq!(PipelineStage::Workspace.to_string(), "scratch directory");
        assert_eq!(PipelineStage::Final.to_string(), "publish");

        let failure = RunFailure {
            stage: PipelineStage::Planned,
            source: PipelineError::EmptyResponse {
                stage: "scene plan".to_string(),
            },
        };
        assert!(failure.to_string().starts_with("scene plan failed:"));
    }

    #[test]
    fn test_non_empty_trims() {
        assert_eq!(non_empty("  idea \n".to_string(), "idea").unwrap(), "idea");
        assert!(matches!(
            non_empty(" \n\t".to_string(), "idea"),
            Err(PipelineError::EmptyResponse { .. })
        ));
    }

    #[test]
    fn test_preview_truncates_first_line() {
        assert_eq!(preview("short\nsecond"), "short");
        let long = "x".repeat(100);
        assert_eq!(preview(&long).len(), 83);
    }

    #[tokio::test]
    async fn test_digest_matches_md5() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("clip.mp4");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let (size, md5) = digest(&path).await.unwrap();
        assert_eq!(size, 11);
        assert_eq!(md5, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_copy_into_place_replaces_destination() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("combined_2.mp4");
        let out_dir = temp.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();
        let destination = out_dir.join("final_video.mp4");
        tokio::fs::write(&source, b"clip0clip1clip2").await.unwrap();
        tokio::fs::write(&destination, b"previous run").await.unwrap();

        copy_into_place(&source, &destination).await.unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), b"clip0clip1clip2");
        assert_eq!(entries(&out_dir), vec!["final_video.mp4".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_copy_leaves_nothing_at_destination() {
        let temp = TempDir::new().unwrap();
        let out_dir = temp.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();
        let destination = out_dir.join("final_video.mp4");

        let err = copy_into_place(&temp.path().join("missing.mp4"), &destination)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Io(_)));
        assert!(!destination.exists());
        assert!(entries(&out_dir).is_empty());
    }
}
