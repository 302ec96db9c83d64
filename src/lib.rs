/// Scene Chain - chained AI video generation
///
/// Turns one discovered idea into a script, a plan of N scene prompts and N generated
/// clips, seeding every clip after the first with the last frame of the one before it,
/// then stitches the clips into a single video.

pub mod config;
pub mod error;
pub mod job;
pub mod media;
pub mod orchestrator;
pub mod planner;
pub mod providers;

// Re-export main types for easy access
pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{MediaError, PipelineError, PlanParseError, ProviderError, Result};
pub use crate::job::{FrameImage, GenerationJob, SceneMode, ScenePlan, VideoArtifact};
pub use crate::media::{ClipConcatenator, FfmpegFrameExtractor, FfmpegStitcher, LastFrameExtractor};
pub use crate::orchestrator::{PipelineStage, RunFailure, RunReport, SceneChainOrchestrator};
pub use crate::planner::ScenePromptPlanner;
pub use crate::providers::{ProviderGateway, ProviderKind};
