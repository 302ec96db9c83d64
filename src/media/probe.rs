use crate::error::MediaError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Video information extracted from file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub duration: Duration,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub has_video: bool,
    pub has_audio: bool,
    /// Frame count from the container header, when it records one
    pub frame_count: Option<u64>,
    pub file_size: u64,
}

/// ffprobe wrapper
#[derive(Debug, Clone)]
pub struct VideoProber {
    ffprobe: PathBuf,
}

impl VideoProber {
    pub fn new(ffprobe: PathBuf) -> Self {
        Self { ffprobe }
    }

    /// Extract video information using ffprobe
    pub async fn probe(&self, video_path: &Path) -> Result<VideoInfo, MediaError> {
        let probe_err = |reason: String| MediaError::Probe {
            path: video_path.to_path_buf(),
            reason,
        };

        let file_size = tokio::fs::metadata(video_path)
            .await
            .map_err(|e| probe_err(e.to_string()))?
            .len();

        let output = tokio::process::Command::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(video_path)
            .output()
            .await
            .map_err(|e| probe_err(format!("failed to run {}: {}", self.ffprobe.display(), e)))?;

        if !output.status.success() {
            return Err(probe_err(super::stderr_tail(&output.stderr)));
        }

        let data: serde_json::Value =
            serde_json::from_slice(&output.stdout).map_err(|e| probe_err(e.to_string()))?;

        let empty = Vec::new();
        let streams = data["streams"].as_array().unwrap_or(&empty);
        let video_stream = streams.iter().find(|s| s["codec_type"] == "video");
        let has_audio = streams.iter().any(|s| s["codec_type"] == "audio");

        let duration_seconds: f64 = data["format"]["duration"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);

        let info = VideoInfo {
            path: video_path.to_path_buf(),
            duration: Duration::from_secs_f64(duration_seconds.max(0.0)),
            width: video_stream.and_then(|s| s["width"].as_u64()).unwrap_or(0) as u32,
            height: video_stream.and_then(|s| s["height"].as_u64()).unwrap_or(0) as u32,
            fps: video_stream
                .and_then(|s| s["avg_frame_rate"].as_str().and_then(parse_rate))
                .filter(|f| *f > 0.0)
                .or_else(|| video_stream.and_then(|s| s["r_frame_rate"].as_str().and_then(parse_rate)))
                .unwrap_or(0.0),
            has_video: video_stream.is_some(),
            has_audio,
            frame_count: video_stream.and_then(|s| s["nb_frames"].as_str().and_then(|n| n.parse().ok())),
            file_size,
        };

        debug!(
            "📹 Probed {} ({}x{}, {:.2}fps, {:.2}s, audio: {})",
            video_path.display(),
            info.width,
            info.height,
            info.fps,
            info.duration.as_secs_f64(),
            info.has_audio
        );

        Ok(info)
    }

    /// Count frames by decoding the first video stream
    pub async fn count_frames(&self, video_path: &Path) -> Result<u64, MediaError> {
        let output = tokio::process::Command::new(&self.ffprobe)
            .args([
                "-v", "error",
                "-select_streams", "v:0",
                "-count_frames",
                "-show_entries", "stream=nb_read_frames",
                "-of", "csv=p=0",
            ])
            .arg(video_path)
            .output()
            .await
            .map_err(|e| MediaError::Probe {
                path: video_path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(MediaError::Probe {
                path: video_path.to_path_buf(),
                reason: super::stderr_tail(&output.stderr),
            });
        }

        // No video stream prints nothing
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text
            .lines()
            .find_map(|l| l.trim().trim_end_matches(',').parse().ok())
            .unwrap_or(0))
    }
}

/// Parse ffprobe rates like "30000/1001" or "25"
fn parse_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                None
            } else {
                Some(num / den)
            }
        }
        None => rate.parse().ok(),
    }
}
