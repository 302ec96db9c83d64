use crate::error::{PipelineError, Result};
use crate::providers::{ProviderConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the scene chaining pipeline. Missing keys take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// What to generate
    pub pipeline: PipelineConfig,

    /// One provider binding per capability
    pub providers: ProvidersConfig,

    /// Video generation request options
    pub video: VideoOptions,

    /// Operation polling policy
    pub polling: PollingConfig,

    /// Local media tooling
    pub media: MediaConfig,

    /// Output and logging settings
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of scenes to chain (at least 1)
    pub scene_count: usize,

    /// Character description shared by every scene
    pub character_description: String,

    /// Visual style shared by every scene
    pub visual_style: String,

    /// Length of a single generated clip in seconds
    pub scene_seconds: u32,

    /// Spoken length requested for the script
    pub target_duration_seconds: u32,

    /// Query used to discover the video idea
    pub discovery_query: String,

    /// Main scene description; `{script}` is replaced with the script
    pub scene_direction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Script and scene plan generation
    pub text: ProviderConfig,

    /// Web-grounded idea discovery
    pub search: ProviderConfig,

    /// Clip generation
    pub video: ProviderConfig,

    /// Speech generation
    pub audio: ProviderConfig,

    /// Image and video analysis
    pub analysis: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoOptions {
    pub aspect_ratio: String,

    /// Person generation policy for text-only scenes
    pub person_generation_text: String,

    /// Person generation policy for image-seeded scenes
    pub person_generation_image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between operation polls
    pub interval_seconds: u64,

    /// Maximum polls per scene before giving up
    pub max_attempts: u32,

    /// Wall-clock bound per scene (0 = attempts only)
    pub max_wait_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,

    /// Output video codec for concatenation
    pub video_codec: String,

    /// Output audio codec for concatenation
    pub audio_codec: String,

    /// Encoder threads
    pub threads: usize,

    /// File name of the working seed image inside the scratch directory
    pub seed_image_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for scene clips and the working seed image
    pub work_dir: PathBuf,

    /// Where the finished video is published
    pub final_path: PathBuf,

    /// Give every run its own `run-<timestamp>` directory under `work_dir`
    pub per_run_scratch: bool,

    /// Log level
    pub log_level: String,

    /// Optional JSON run report
    pub report_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the first config file found, else the environment
    pub fn load() -> Result<Self> {
        Self::load_from(&[Path::new("scene-chain.toml"), Path::new("config/scene-chain.toml")])
    }

    /// First existing file wins. A file that exists but does not parse is an error.
    pub fn load_from(paths: &[&Path]) -> Result<Self> {
        for path in paths {
            if path.is_file() {
                let config = Self::from_file(path)?;
                tracing::info!("📄 Loaded configuration from: {}", path.display());
                return Ok(config);
            }
        }

        Self::from_env()
    }

    /// Load configuration from an explicit file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&config_str)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config.with_env_keys())
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default().with_env_keys();

        if let Ok(scenes) = std::env::var("SCENE_CHAIN_SCENES") {
            config.pipeline.scene_count = scenes
                .parse()
                .map_err(|_| PipelineError::Config(format!("invalid SCENE_CHAIN_SCENES: {}", scenes)))?;
        }

        if let Ok(work_dir) = std::env::var("SCENE_CHAIN_WORK_DIR") {
            config.output.work_dir = PathBuf::from(work_dir);
        }

        if let Ok(final_path) = std::env::var("SCENE_CHAIN_FINAL_PATH") {
            config.output.final_path = PathBuf::from(final_path);
        }

        if let Ok(log_level) = std::env::var("SCENE_CHAIN_LOG_LEVEL") {
            config.output.log_level = log_level;
        }

        Ok(config)
    }

    /// Fill missing API keys from the provider's conventional environment variable
    fn with_env_keys(mut self) -> Self {
        for provider in self.providers.all_mut() {
            if provider.api_key.is_none() {
                provider.api_key = std::env::var(provider.kind.api_key_var()).ok();
            }
        }
        self
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.scene_count == 0 {
            return Err(PipelineError::Config("scene_count must be at least 1".to_string()));
        }

        if self.polling.interval_seconds == 0 {
            return Err(PipelineError::Config("polling interval must be greater than 0".to_string()));
        }

        if self.polling.max_attempts == 0 {
            return Err(PipelineError::Config("max_attempts must be greater than 0".to_string()));
        }

        if self.media.seed_image_name.is_empty() {
            return Err(PipelineError::Config("seed_image_name must not be empty".to_string()));
        }

        for (capability, provider) in self.providers.named() {
            if provider.api_key.is_none() {
                return Err(PipelineError::Config(format!(
                    "{} provider {:?} needs an API key ({})",
                    capability,
                    provider.kind,
                    provider.kind.api_key_var()
                )));
            }
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Scene Chain Configuration:\n\
            - Scenes: {}\n\
            - Target Duration: {}s\n\
            - Text Model: {:?}/{}\n\
            - Search Model: {:?}/{}\n\
            - Video Model: {:?}/{}\n\
            - Poll Interval: {}s (max {} polls)\n\
            - Work Directory: {}\n\
            - Final Video: {}",
            self.pipeline.scene_count,
            self.pipeline.target_duration_seconds,
            self.providers.text.kind,
            self.providers.text.model,
            self.providers.search.kind,
            self.providers.search.model,
            self.providers.video.kind,
            self.providers.video.model,
            self.polling.interval_seconds,
            self.polling.max_attempts,
            self.output.work_dir.display(),
            self.output.final_path.display()
        )
    }
}

impl ProvidersConfig {
    fn named(&self) -> [(&'static str, &ProviderConfig); 5] {
        [
            ("text", &self.text),
            ("search", &self.search),
            ("video", &self.video),
            ("audio", &self.audio),
            ("analysis", &self.analysis),
        ]
    }

    fn all_mut(&mut self) -> [&mut ProviderConfig; 5] {
        [
            &mut self.text,
            &mut self.search,
            &mut self.video,
            &mut self.audio,
            &mut self.analysis,
        ]
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scene_count: 2,
            character_description: "Human-like gorilla".to_string(),
            visual_style: "Ultra realistic 3D animated style".to_string(),
            scene_seconds: 8,
            target_duration_seconds: 16,
            discovery_query: "Generate me one video idea with recent AI news".to_string(),
            scene_direction: "Character sitting behind a desk and saying that: {script}".to_string(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            text: ProviderConfig::new(ProviderKind::OpenAI, "gpt-4.1"),
            search: ProviderConfig::new(ProviderKind::Gemini, "gemini-2.5-flash"),
            video: ProviderConfig::new(ProviderKind::Gemini, "veo-3.0-generate-001"),
            audio: ProviderConfig::new(ProviderKind::Gemini, "gemini-2.5-flash-preview-tts"),
            analysis: ProviderConfig::new(ProviderKind::Gemini, "gemini-2.5-flash"),
        }
    }
}

impl Default for VideoOptions {
    fn default() -> Self {
        Self {
            aspect_ratio: "9:16".to_string(),
            person_generation_text: "allow_all".to_string(),
            person_generation_image: "allow_adult".to_string(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 10,
            max_attempts: 90,
            max_wait_seconds: 1800, // 30 minutes per scene
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            threads: num_cpus::get().min(8),
            seed_image_name: "seed.jpg".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./work"),
            final_path: PathBuf::from("final_video.mp4"),
            per_run_scratch: true,
            log_level: "info".to_string(),
            report_path: None,
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_scene_count(mut self, scene_count: usize) -> Self {
        self.config.pipeline.scene_count = scene_count;
        self
    }

    pub fn with_character(mut self, description: impl Into<String>) -> Self {
        self.config.pipeline.character_description = description.into();
        self
    }

    pub fn with_visual_style(mut self, style: impl Into<String>) -> Self {
        self.config.pipeline.visual_style = style.into();
        self
    }

    pub fn with_target_duration(mut self, seconds: u32) -> Self {
        self.config.pipeline.target_duration_seconds = seconds;
        self
    }

    pub fn with_work_dir(mut self, dir: PathBuf) -> Self {
        self.config.output.work_dir = dir;
        self
    }

    pub fn with_final_path(mut self, path: PathBuf) -> Self {
        self.config.output.final_path = path;
        self
    }

    pub fn with_per_run_scratch(mut self, enable: bool) -> Self {
        self.config.output.per_run_scratch = enable;
        self
    }

    pub fn with_polling(mut self, interval_seconds: u64, max_attempts: u32) -> Self {
        self.config.polling.interval_seconds = interval_seconds;
        self.config.polling.max_attempts = max_attempts;
        self
    }

    pub fn with_api_keys(mut self, openai: Option<String>, gemini: Option<String>) -> Self {
        for provider in self.config.providers.all_mut() {
            provider.api_key = match provider.kind {
                ProviderKind::OpenAI => openai.clone(),
                ProviderKind::Gemini => gemini.clone(),
            };
        }
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pipeline.scene_count, 2);
        assert_eq!(config.polling.interval_seconds, 10);
        assert_eq!(config.media.seed_image_name, "seed.jpg");
        assert_eq!(config.providers.video.model, "veo-3.0-generate-001");
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_scene_count(3)
            .with_target_duration(24)
            .with_polling(1, 5)
            .with_api_keys(Some("sk-test".to_string()), Some("gm-test".to_string()))
            .build();

        assert_eq!(config.pipeline.scene_count, 3);
        assert_eq!(config.pipeline.target_duration_seconds, 24);
        assert_eq!(config.polling.max_attempts, 5);
        assert_eq!(config.providers.text.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.providers.video.api_key.as_deref(), Some("gm-test"));
    }

    #[test]
    fn test_config_validation() {
        let config = ConfigBuilder::new()
            .with_api_keys(Some("sk".to_string()), Some("gm".to_string()))
            .build();
        assert!(config.validate().is_ok());

        let zero_scenes = ConfigBuilder::new()
            .with_scene_count(0)
            .with_api_keys(Some("sk".to_string()), Some("gm".to_string()))
            .build();
        assert!(matches!(zero_scenes.validate(), Err(PipelineError::Config(_))));

        let no_keys = ConfigBuilder::new().with_api_keys(None, None).build();
        assert!(no_keys.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_keeps_sections() {
        let config = ConfigBuilder::new().with_scene_count(4).build();
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("[pipeline]"));
        assert!(text.contains("[providers.video]"));

        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.pipeline.scene_count, 4);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let text = "[pipeline]\nscene_count = 5\n\n[providers.video]\nkind = \"Gemini\"\nmodel = \"veo-test\"\n";
        let config: Config = toml::from_str(text).unwrap();

        assert_eq!(config.pipeline.scene_count, 5);
        assert_eq!(config.pipeline.scene_seconds, 8);
        assert_eq!(config.providers.video.model, "veo-test");
        assert_eq!(config.providers.video.timeout_seconds, 120);
        assert_eq!(config.providers.text.model, "gpt-4.1");
        assert_eq!(config.polling.max_attempts, 90);
        assert_eq!(config.media.seed_image_name, "seed.jpg");
    }

    #[test]
    fn test_unparseable_config_file_is_an_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let broken = temp.path().join("scene-chain.toml");
        std::fs::write(&broken, "[pipeline\nscene_count = ").unwrap();
        let fallback = temp.path().join("config.toml");
        std::fs::write(&fallback, "[pipeline]\nscene_count = 3\n").unwrap();

        let err = Config::load_from(&[broken.as_path(), fallback.as_path()]).unwrap_err();
        assert!(matches!(err, PipelineError::Config(ref msg) if msg.contains("scene-chain.toml")));
    }

    #[test]
    fn test_first_existing_config_file_wins() {
        let temp = tempfile::TempDir::new().unwrap();
        let missing = temp.path().join("missing.toml");
        let present = temp.path().join("config.toml");
        std::fs::write(&present, "[pipeline]\nscene_count = 3\n").unwrap();

        let config = Config::load_from(&[missing.as_path(), present.as_path()]).unwrap();
        assert_eq!(config.pipeline.scene_count, 3);
    }
}
