pub mod gemini;
pub mod openai;

use crate::config::{ProvidersConfig, VideoOptions};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Most auxiliary messages a text request may carry after its instruction
pub const MAX_AUXILIARY_MESSAGES: usize = 3;

/// Provider types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAI,
    Gemini,
}

impl ProviderKind {
    /// Environment variable holding this provider's API key
    pub fn api_key_var(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "OPENAI_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
        }
    }
}

/// Binding of one capability to a provider model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    /// Base URL override, mostly for proxies
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    120
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, model: &str) -> Self {
        Self {
            kind,
            model: model.to_string(),
            endpoint: None,
            api_key: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Chat message for text generation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Builds the developer instruction followed by up to three user messages.
/// Empty auxiliary messages are skipped.
pub fn build_messages(instruction: &str, auxiliary: &[String]) -> ProviderResult<Vec<ChatMessage>> {
    if auxiliary.len() > MAX_AUXILIARY_MESSAGES {
        return Err(ProviderError::new(
            "generate_text",
            format!(
                "at most {} auxiliary messages are supported, got {}",
                MAX_AUXILIARY_MESSAGES,
                auxiliary.len()
            ),
        ));
    }

    let mut messages = vec![ChatMessage {
        role: "developer".to_string(),
        content: instruction.to_string(),
    }];
    messages.extend(auxiliary.iter().filter(|m| !m.is_empty()).map(|m| ChatMessage {
        role: "user".to_string(),
        content: m.clone(),
    }));
    Ok(messages)
}

/// Where a finished operation's video lives before it is saved
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedVideo {
    Remote(String),
    Inline(Vec<u8>),
}

/// Handle to an in-flight provider job
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOperation {
    pub name: String,
    pub done: bool,
    pub result: Option<GeneratedVideo>,
    /// Provider-reported failure of a finished job
    pub error: Option<String>,
}

impl GenerationOperation {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            result: None,
            error: None,
        }
    }
}

/// One clip generation request
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRequest {
    pub prompt: String,
    pub seed_image: Option<PathBuf>,
}

#[async_trait]
pub trait TextGeneration: Send + Sync {
    async fn generate_text(&self, instruction: &str, auxiliary: &[String]) -> ProviderResult<String>;
    fn provider_type(&self) -> ProviderKind;
}

#[async_trait]
pub trait SearchGeneration: Send + Sync {
    /// Text generation grounded in live web search
    async fn search_and_generate(&self, query: &str) -> ProviderResult<String>;
}

/// Long-running clip generation, split into start / poll / save so the caller owns timing
#[async_trait]
pub trait VideoGeneration: Send + Sync {
    async fn generate_video(&self, request: &VideoRequest) -> ProviderResult<GenerationOperation>;
    async fn poll_operation(&self, operation: &GenerationOperation) -> ProviderResult<GenerationOperation>;
    /// Fails unless `operation.done` is true and it carries a result
    async fn save_operation_result(&self, operation: &GenerationOperation, destination: &Path) -> ProviderResult<()>;
}

#[async_trait]
pub trait AudioGeneration: Send + Sync {
    /// Speak `text` and write a WAV file to `destination`
    async fn generate_speech(&self, text: &str, destination: &Path) -> ProviderResult<PathBuf>;
}

#[async_trait]
pub trait MediaAnalysis: Send + Sync {
    async fn analyze_media(&self, path: &Path, prompt: &str) -> ProviderResult<String>;
    async fn analyze_remote_video(&self, uri: &str, prompt: &str) -> ProviderResult<String>;
}

/// The capabilities the orchestrator needs, each bound to a concrete provider
#[derive(Clone)]
pub struct ProviderGateway {
    pub text: Arc<dyn TextGeneration>,
    pub search: Arc<dyn SearchGeneration>,
    pub video: Arc<dyn VideoGeneration>,
}

impl ProviderGateway {
    pub fn new(
        text: Arc<dyn TextGeneration>,
        search: Arc<dyn SearchGeneration>,
        video: Arc<dyn VideoGeneration>,
    ) -> Self {
        Self { text, search, video }
    }

    /// Create the gateway from configuration
    pub fn from_config(providers: &ProvidersConfig, video: &VideoOptions) -> ProviderResult<Self> {
        Ok(Self {
            text: create_text_provider(&providers.text)?,
            search: create_search_provider(&providers.search)?,
            video: create_video_provider(&providers.video, video)?,
        })
    }
}

pub fn create_text_provider(config: &ProviderConfig) -> ProviderResult<Arc<dyn TextGeneration>> {
    match config.kind {
        ProviderKind::OpenAI => Ok(Arc::new(openai::OpenAIProvider::new(config.clone())?)),
        ProviderKind::Gemini => Ok(Arc::new(gemini::GeminiProvider::new(config.clone())?)),
    }
}

pub fn create_search_provider(config: &ProviderConfig) -> ProviderResult<Arc<dyn SearchGeneration>> {
    match config.kind {
        ProviderKind::OpenAI => Ok(Arc::new(openai::OpenAIProvider::new(config.clone())?)),
        ProviderKind::Gemini => Ok(Arc::new(gemini::GeminiProvider::new(config.clone())?)),
    }
}

pub fn create_video_provider(
    config: &ProviderConfig,
    options: &VideoOptions,
) -> ProviderResult<Arc<dyn VideoGeneration>> {
    match config.kind {
        ProviderKind::Gemini => Ok(Arc::new(
            gemini::GeminiProvider::new(config.clone())?.with_video_options(options.clone()),
        )),
        other => Err(unsupported(other, "video generation")),
    }
}

pub fn create_audio_provider(config: &ProviderConfig, ffmpeg: &Path) -> ProviderResult<Arc<dyn AudioGeneration>> {
    match config.kind {
        ProviderKind::Gemini => Ok(Arc::new(
            gemini::GeminiProvider::new(config.clone())?.with_ffmpeg(ffmpeg.to_path_buf()),
        )),
        other => Err(unsupported(other, "speech generation")),
    }
}

pub fn create_analysis_provider(config: &ProviderConfig) -> ProviderResult<Arc<dyn MediaAnalysis>> {
    match config.kind {
        ProviderKind::Gemini => Ok(Arc::new(gemini::GeminiProvider::new(config.clone())?)),
        other => Err(unsupported(other, "media analysis")),
    }
}

fn unsupported(kind: ProviderKind, capability: &str) -> ProviderError {
    ProviderError::new("config", format!("{:?} does not offer {}", kind, capability))
}

/// MIME type for a media file, by extension
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "3gp" => "video/3gpp",
        "flv" => "video/x-flv",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "video/mp4",
    }
}

/// MIME type for a seed image; anything unrecognised is sent as JPEG
pub fn seed_image_mime(path: &Path) -> &'static str {
    match mime_type_for(path) {
        m @ ("image/png" | "image/webp") => m,
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_messages_roles() {
        let messages = build_messages("write a script", &["about gorillas".to_string()]).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "developer");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content, "about gorillas");
    }

    #[test]
    fn test_build_messages_rejects_too_many() {
        let aux = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
        let err = build_messages("x", &aux).unwrap_err();
        assert_eq!(err.capability, "generate_text");
    }

    #[test]
    fn test_build_messages_skips_empty() {
        let aux = vec![String::new(), "second".to_string()];
        let messages = build_messages("x", &aux).unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(mime_type_for(Path::new("clip.MOV")), "video/quicktime");
        assert_eq!(mime_type_for(Path::new("clip.unknown")), "video/mp4");
        assert_eq!(seed_image_mime(Path::new("seed.png")), "image/png");
        assert_eq!(seed_image_mime(Path::new("seed.webp")), "image/webp");
        assert_eq!(seed_image_mime(Path::new("seed.jpg")), "image/jpeg");
        assert_eq!(seed_image_mime(Path::new("seed")), "image/jpeg");
    }

    #[test]
    fn test_video_needs_gemini() {
        let config = ProviderConfig::new(ProviderKind::OpenAI, "gpt-4.1");
        let options = crate::config::Config::default().video;
        assert!(create_video_provider(&config, &options).is_err());
    }
}
