use super::{
    build_messages, mime_type_for, seed_image_mime, AudioGeneration, GeneratedVideo, GenerationOperation,
    MediaAnalysis, ProviderConfig, ProviderKind, ProviderResult, SearchGeneration, TextGeneration,
    VideoGeneration, VideoRequest,
};
use crate::config::{Config, VideoOptions};
use crate::error::ProviderError;
use crate::media;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Raw TTS output is 16-bit mono PCM at this rate
const TTS_SAMPLE_RATE: u32 = 24000;
const TTS_VOICE: &str = "Kore";

/// Gemini provider implementation (text, search, analysis, video, speech)
pub struct GeminiProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    video_options: VideoOptions,
    ffmpeg: PathBuf,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", alias = "inline_data", skip_serializing_if = "Option::is_none")]
    inline_data: Option<Blob>,
    #[serde(rename = "fileData", skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Blob {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileData {
    #[serde(rename = "fileUri")]
    file_uri: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }

    fn inline_data(&self) -> Option<&Blob> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .and_then(|content| content.parts.iter().find_map(|p| p.inline_data.as_ref()))
    }
}

#[derive(Debug, Serialize)]
struct PredictRequest {
    instances: Vec<VideoInstance>,
    parameters: VideoParameters,
}

#[derive(Debug, Serialize)]
struct VideoInstance {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<ImageInput>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageInput {
    bytes_base64_encoded: String,
    mime_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoParameters {
    aspect_ratio: String,
    person_generation: String,
}

#[derive(Debug, Deserialize)]
struct OperationResponse {
    name: String,
    #[serde(default)]
    done: bool,
    response: Option<OperationResult>,
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResult {
    generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoResponse {
    #[serde(default)]
    generated_samples: Vec<GeneratedSample>,
}

#[derive(Debug, Deserialize)]
struct GeneratedSample {
    video: Option<SampleVideo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SampleVideo {
    uri: Option<String>,
    bytes_base64_encoded: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    message: String,
}

impl OperationResponse {
    fn into_operation(self) -> ProviderResult<GenerationOperation> {
        let sample = self
            .response
            .and_then(|r| r.generate_video_response)
            .and_then(|r| r.generated_samples.into_iter().next())
            .and_then(|s| s.video);

        let result = match sample {
            Some(SampleVideo { uri: Some(uri), .. }) => Some(GeneratedVideo::Remote(uri)),
            Some(SampleVideo {
                bytes_base64_encoded: Some(data),
                ..
            }) => Some(GeneratedVideo::Inline(BASE64.decode(data).map_err(|e| {
                ProviderError::new("poll_operation", format!("invalid inline video: {}", e))
            })?)),
            _ => None,
        };

        Ok(GenerationOperation {
            name: self.name,
            done: self.done,
            result,
            error: self.error.map(|e| e.message),
        })
    }
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        if config.api_key.is_none() {
            return Err(ProviderError::new("config", "Gemini API key required"));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        let defaults = Config::default();
        Ok(Self {
            config,
            client,
            video_options: defaults.video,
            ffmpeg: defaults.media.ffmpeg_path,
        })
    }

    pub fn with_video_options(mut self, options: VideoOptions) -> Self {
        self.video_options = options;
        self
    }

    pub fn with_ffmpeg(mut self, ffmpeg: PathBuf) -> Self {
        self.ffmpeg = ffmpeg;
        self
    }

    fn base_url(&self) -> &str {
        self.config
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/')
    }

    fn api_key(&self, capability: &'static str) -> ProviderResult<&str> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::new(capability, "Gemini API key not configured"))
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        capability: &'static str,
        url: &str,
        body: &B,
    ) -> ProviderResult<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", self.api_key(capability)?)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::new(capability, e.to_string()))?;
        check_status(capability, response).await
    }

    async fn generate_content(
        &self,
        capability: &'static str,
        request: &GenerateContentRequest,
    ) -> ProviderResult<GenerateContentResponse> {
        let url = format!("{}/models/{}:generateContent", self.base_url(), self.config.model);
        debug!("Sending {} request to Gemini ({})", capability, self.config.model);

        self.post_json(capability, &url, request)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::new(capability, format!("malformed response: {}", e)))
    }

    async fn analyze(&self, media: Part, prompt: &str) -> ProviderResult<String> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![media, text_part(prompt)],
            }],
            system_instruction: None,
            tools: Vec::new(),
            generation_config: None,
        };
        Ok(self.generate_content("analyze_media", &request).await?.text())
    }
}

fn text_part(text: &str) -> Part {
    Part {
        text: Some(text.to_string()),
        ..Part::default()
    }
}

fn user_content(text: &str) -> Content {
    Content {
        role: Some("user".to_string()),
        parts: vec![text_part(text)],
    }
}

async fn check_status(capability: &'static str, response: reqwest::Response) -> ProviderResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Err(ProviderError::new(capability, format!("Gemini API error {}: {}", status, text)))
}

/// The first message becomes the system instruction when auxiliary messages follow it
fn text_request(instruction: &str, auxiliary: &[String]) -> ProviderResult<GenerateContentRequest> {
    let messages = build_messages(instruction, auxiliary)?;
    let (first, rest) = messages
        .split_first()
        .ok_or_else(|| ProviderError::new("generate_text", "no messages"))?;

    let request = if rest.is_empty() {
        GenerateContentRequest {
            contents: vec![user_content(&first.content)],
            system_instruction: None,
            tools: Vec::new(),
            generation_config: None,
        }
    } else {
        GenerateContentRequest {
            contents: rest.iter().map(|m| user_content(&m.content)).collect(),
            system_instruction: Some(Content {
                role: None,
                parts: vec![text_part(&first.content)],
            }),
            tools: Vec::new(),
            generation_config: None,
        }
    };
    Ok(request)
}

#[async_trait]
impl TextGeneration for GeminiProvider {
    async fn generate_text(&self, instruction: &str, auxiliary: &[String]) -> ProviderResult<String> {
        let request = text_request(instruction, auxiliary)?;
        Ok(self.generate_content("generate_text", &request).await?.text())
    }

    fn provider_type(&self) -> ProviderKind {
        ProviderKind::Gemini
    }
}

#[async_trait]
impl SearchGeneration for GeminiProvider {
    async fn search_and_generate(&self, query: &str) -> ProviderResult<String> {
        let request = GenerateContentRequest {
            contents: vec![user_content(query)],
            system_instruction: None,
            tools: vec![serde_json::json!({ "google_search": {} })],
            generation_config: None,
        };
        Ok(self.generate_content("search_and_generate", &request).await?.text())
    }
}

#[async_trait]
impl MediaAnalysis for GeminiProvider {
    async fn analyze_media(&self, path: &Path, prompt: &str) -> ProviderResult<String> {
        let bytes = tokio::fs::read(path).await?;
        info!("🔎 Analyzing {} ({} bytes)", path.display(), bytes.len());

        let media = Part {
            inline_data: Some(Blob {
                mime_type: mime_type_for(path).to_string(),
                data: BASE64.encode(bytes),
            }),
            ..Part::default()
        };
        self.analyze(media, prompt).await
    }

    async fn analyze_remote_video(&self, uri: &str, prompt: &str) -> ProviderResult<String> {
        let uri = url::Url::parse(uri)
            .map_err(|e| ProviderError::new("analyze_media", format!("invalid video URI {}: {}", uri, e)))?;
        if !matches!(uri.scheme(), "http" | "https" | "gs") {
            return Err(ProviderError::new(
                "analyze_media",
                format!("unsupported URI scheme: {}", uri.scheme()),
            ));
        }

        let media = Part {
            file_data: Some(FileData {
                file_uri: uri.to_string(),
            }),
            ..Part::default()
        };
        self.analyze(media, prompt).await
    }
}

#[async_trait]
impl VideoGeneration for GeminiProvider {
    async fn generate_video(&self, request: &VideoRequest) -> ProviderResult<GenerationOperation> {
        let (image, person_generation) = match &request.seed_image {
            Some(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    ProviderError::new("generate_video", format!("cannot read seed {}: {}", path.display(), e))
                })?;
                let image = ImageInput {
                    bytes_base64_encoded: BASE64.encode(bytes),
                    mime_type: seed_image_mime(path).to_string(),
                };
                (Some(image), &self.video_options.person_generation_image)
            }
            None => (None, &self.video_options.person_generation_text),
        };

        let body = PredictRequest {
            instances: vec![VideoInstance {
                prompt: request.prompt.clone(),
                image,
            }],
            parameters: VideoParameters {
                aspect_ratio: self.video_options.aspect_ratio.clone(),
                person_generation: person_generation.clone(),
            },
        };

        let url = format!("{}/models/{}:predictLongRunning", self.base_url(), self.config.model);
        let operation: OperationResponse = self
            .post_json("generate_video", &url, &body)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::new("generate_video", format!("malformed response: {}", e)))?;

        info!("🎬 Video operation started: {}", operation.name);
        operation.into_operation()
    }

    async fn poll_operation(&self, operation: &GenerationOperation) -> ProviderResult<GenerationOperation> {
        let url = format!("{}/{}", self.base_url(), operation.name);
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", self.api_key("poll_operation")?)
            .send()
            .await
            .map_err(|e| ProviderError::new("poll_operation", e.to_string()))?;

        let body: OperationResponse = check_status("poll_operation", response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::new("poll_operation", format!("malformed response: {}", e)))?;
        body.into_operation()
    }

    async fn save_operation_result(&self, operation: &GenerationOperation, destination: &Path) -> ProviderResult<()> {
        if !operation.done {
            return Err(ProviderError::new(
                "save_operation_result",
                format!("operation {} has not finished", operation.name),
            ));
        }

        let partial = destination.with_extension("part");
        let written = match &operation.result {
            Some(GeneratedVideo::Inline(bytes)) => {
                tokio::fs::write(&partial, bytes).await?;
                bytes.len() as u64
            }
            Some(GeneratedVideo::Remote(uri)) => self.download(uri, &partial).await?,
            None => {
                let reason = operation.error.as_deref().unwrap_or("no video in result");
                return Err(ProviderError::new(
                    "save_operation_result",
                    format!("operation {} failed: {}", operation.name, reason),
                ));
            }
        };

        tokio::fs::rename(&partial, destination).await?;
        info!("💾 Saved {} ({} bytes)", destination.display(), written);
        Ok(())
    }
}

impl GeminiProvider {
    /// Stream a generated file to disk; removes the partial file on failure
    async fn download(&self, uri: &str, partial: &Path) -> ProviderResult<u64> {
        let result = async {
            let response = self
                .client
                .get(uri)
                .header("x-goog-api-key", self.api_key("save_operation_result")?)
                .send()
                .await
                .map_err(|e| ProviderError::new("save_operation_result", e.to_string()))?;
            let response = check_status("save_operation_result", response).await?;

            let mut file = tokio::fs::File::create(partial).await?;
            let mut stream = response.bytes_stream();
            let mut written = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| ProviderError::new("save_operation_result", e.to_string()))?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok::<u64, ProviderError>(written)
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(partial).await;
        }
        result
    }
}

#[async_trait]
impl AudioGeneration for GeminiProvider {
    async fn generate_speech(&self, text: &str, destination: &Path) -> ProviderResult<PathBuf> {
        let request = GenerateContentRequest {
            contents: vec![user_content(text)],
            system_instruction: None,
            tools: Vec::new(),
            generation_config: Some(serde_json::json!({
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": TTS_VOICE }
                    }
                }
            })),
        };

        let response = self.generate_content("generate_speech", &request).await?;
        let blob = response
            .inline_data()
            .ok_or_else(|| ProviderError::new("generate_speech", "no audio in response"))?;
        let pcm = BASE64
            .decode(&blob.data)
            .map_err(|e| ProviderError::new("generate_speech", format!("invalid audio data: {}", e)))?;

        let raw = tempfile::Builder::new().suffix(".pcm").tempfile()?;
        tokio::fs::write(raw.path(), &pcm).await?;

        let rate = TTS_SAMPLE_RATE.to_string();
        let args: Vec<&OsStr> = vec![
            OsStr::new("-y"),
            OsStr::new("-f"),
            OsStr::new("s16le"),
            OsStr::new("-ar"),
            OsStr::new(&rate),
            OsStr::new("-ac"),
            OsStr::new("1"),
            OsStr::new("-i"),
            raw.path().as_os_str(),
            destination.as_os_str(),
        ];
        media::run_ffmpeg(&self.ffmpeg, &args)
            .await
            .map_err(|e| ProviderError::new("generate_speech", e))?;

        info!("🔊 Speech saved to {}", destination.display());
        Ok(destination.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_requires_api_key() {
        let config = ProviderConfig::new(ProviderKind::Gemini, "gemini-2.5-flash");
        assert!(GeminiProvider::new(config).is_err());
    }

    #[test]
    fn test_text_request_without_auxiliary() {
        let request = text_request("Write a script", &[]).unwrap();
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["text"], "Write a script");
        assert!(value.get("systemInstruction").is_none());
        assert!(value.get("tools").is_none());
    }

    #[test]
    fn test_text_request_with_auxiliary_uses_system_instruction() {
        let request = text_request("You write scripts", &["about robots".to_string()]).unwrap();
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "You write scripts");
        assert_eq!(value["contents"][0]["parts"][0]["text"], "about robots");
    }

    #[test]
    fn test_predict_request_shape() {
        let body = PredictRequest {
            instances: vec![VideoInstance {
                prompt: "continuation of the previous scene".to_string(),
                image: Some(ImageInput {
                    bytes_base64_encoded: "AAAA".to_string(),
                    mime_type: "image/jpeg".to_string(),
                }),
            }],
            parameters: VideoParameters {
                aspect_ratio: "9:16".to_string(),
                person_generation: "allow_adult".to_string(),
            },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["instances"][0]["image"]["bytesBase64Encoded"], "AAAA");
        assert_eq!(value["parameters"]["aspectRatio"], "9:16");
        assert_eq!(value["parameters"]["personGeneration"], "allow_adult");
    }

    #[test]
    fn test_pending_operation() {
        let body: OperationResponse =
            serde_json::from_value(json!({"name": "models/veo/operations/abc"})).unwrap();
        let op = body.into_operation().unwrap();
        assert!(!op.done);
        assert_eq!(op.result, None);
        assert_eq!(op.name, "models/veo/operations/abc");
    }

    #[test]
    fn test_finished_operation_with_uri() {
        let body: OperationResponse = serde_json::from_value(json!({
            "name": "models/veo/operations/abc",
            "done": true,
            "response": {
                "generateVideoResponse": {
                    "generatedSamples": [{"video": {"uri": "https://example.com/v.mp4"}}]
                }
            }
        }))
        .unwrap();
        let op = body.into_operation().unwrap();
        assert!(op.done);
        assert_eq!(op.result, Some(GeneratedVideo::Remote("https://example.com/v.mp4".to_string())));
    }

    #[test]
    fn test_finished_operation_with_error() {
        let body: OperationResponse = serde_json::from_value(json!({
            "name": "op",
            "done": true,
            "error": {"code": 3, "message": "prompt rejected"}
        }))
        .unwrap();
        let op = body.into_operation().unwrap();
        assert!(op.done);
        assert_eq!(op.error.as_deref(), Some("prompt rejected"));
    }

    #[test]
    fn test_response_text_joins_parts() {
        let body: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "A gorilla "}, {"text": "reads the news."}]}}]
        }))
        .unwrap();
        assert_eq!(body.text(), "A gorilla reads the news.");
    }

    #[tokio::test]
    async fn test_remote_analysis_rejects_bad_uri() {
        let mut config = ProviderConfig::new(ProviderKind::Gemini, "gemini-2.5-flash");
        config.api_key = Some("test".to_string());
        let provider = GeminiProvider::new(config).unwrap();

        let err = provider.analyze_remote_video("not a uri", "describe").await.unwrap_err();
        assert_eq!(err.capability, "analyze_media");

        let err = provider
            .analyze_remote_video("file:///etc/passwd", "describe")
            .await
            .unwrap_err();
        assert!(err.message.contains("scheme"));
    }

    #[tokio::test]
    async fn test_save_refuses_unfinished_operation() {
        let mut config = ProviderConfig::new(ProviderKind::Gemini, "veo-3.0-generate-001");
        config.api_key = Some("test".to_string());
        let provider = GeminiProvider::new(config).unwrap();

        let temp = tempfile::TempDir::new().unwrap();
        let destination = temp.path().join("scene0.mp4");
        let err = provider
            .save_operation_result(&GenerationOperation::pending("op"), &destination)
            .await
            .unwrap_err();
        assert_eq!(err.capability, "save_operation_result");
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_save_inline_result() {
        let mut config = ProviderConfig::new(ProviderKind::Gemini, "veo-3.0-generate-001");
        config.api_key = Some("test".to_string());
        let provider = GeminiProvider::new(config).unwrap();

        let temp = tempfile::TempDir::new().unwrap();
        let destination = temp.path().join("scene0.mp4");
        let op = GenerationOperation {
            name: "op".to_string(),
            done: true,
            result: Some(GeneratedVideo::Inline(b"video bytes".to_vec())),
            error: None,
        };
        provider.save_operation_result(&op, &destination).await.unwrap();
        assert_eq!(std::fs::read(&destination).unwrap(), b"video bytes");
        assert!(!destination.with_extension("part").exists());
    }
}
