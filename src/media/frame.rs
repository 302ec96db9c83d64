use super::{run_ffmpeg, LastFrameExtractor, VideoProber};
use crate::error::MediaError;
use crate::job::FrameImage;
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Last-frame extractor using ffprobe for the frame count and ffmpeg for the decode
#[derive(Debug, Clone)]
pub struct FfmpegFrameExtractor {
    ffmpeg: PathBuf,
    prober: VideoProber,
}

impl FfmpegFrameExtractor {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        Self {
            ffmpeg,
            prober: VideoProber::new(ffprobe),
        }
    }

    /// Total frames in the first video stream. Header count first, decoded count otherwise.
    async fn frame_count(&self, video: &Path) -> Result<(u64, bool), MediaError> {
        let info = self.prober.probe(video).await.map_err(|e| MediaError::DecodeFailure {
            path: video.to_path_buf(),
            reason: e.to_string(),
        })?;

        if !info.has_video {
            return Ok((0, false));
        }

        match info.frame_count {
            Some(count) if count > 0 => Ok((count, true)),
            _ => Ok((self.counted_frames(video).await?, false)),
        }
    }

    async fn counted_frames(&self, video: &Path) -> Result<u64, MediaError> {
        self.prober
            .count_frames(video)
            .await
            .map_err(|e| MediaError::DecodeFailure {
                path: video.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Decode frame `index` into `target`. Returns false when ffmpeg wrote nothing.
    async fn decode_frame(&self, video: &Path, index: u64, target: &Path) -> Result<bool, MediaError> {
        let select = format!("select=eq(n\\,{})", index);
        let args: Vec<&OsStr> = vec![
            OsStr::new("-y"),
            OsStr::new("-i"),
            video.as_os_str(),
            OsStr::new("-map"),
            OsStr::new("0:v:0"),
            OsStr::new("-vf"),
            OsStr::new(&select),
            OsStr::new("-fps_mode"),
            OsStr::new("passthrough"),
            OsStr::new("-frames:v"),
            OsStr::new("1"),
            OsStr::new("-q:v"),
            OsStr::new("2"),
            OsStr::new("-map_metadata"),
            OsStr::new("-1"),
            OsStr::new("-fflags"),
            OsStr::new("+bitexact"),
            OsStr::new("-flags:v"),
            OsStr::new("+bitexact"),
            OsStr::new("-update"),
            OsStr::new("1"),
            target.as_os_str(),
        ];

        run_ffmpeg(&self.ffmpeg, &args)
            .await
            .map_err(|reason| MediaError::DecodeFailure {
                path: video.to_path_buf(),
                reason,
            })?;

        let written = tokio::fs::metadata(target).await.map(|m| m.len()).unwrap_or(0);
        Ok(written > 0)
    }
}

#[async_trait]
impl LastFrameExtractor for FfmpegFrameExtractor {
    async fn extract_last_frame(&self, video: &Path, destination: &Path) -> Result<FrameImage, MediaError> {
        let decode_err = |reason: String| MediaError::DecodeFailure {
            path: video.to_path_buf(),
            reason,
        };

        let empty_file = tokio::fs::metadata(video)
            .await
            .map_err(|e| decode_err(e.to_string()))?
            .len()
            == 0;
        if empty_file {
            return Err(MediaError::NoFrames {
                path: video.to_path_buf(),
            });
        }

        let (count, from_header) = self.frame_count(video).await?;
        if count == 0 {
            return Err(MediaError::NoFrames {
                path: video.to_path_buf(),
            });
        }

        let dir = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let suffix = destination
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| ".jpg".to_string());
        let staging = tempfile::Builder::new()
            .prefix(".frame-")
            .suffix(&suffix)
            .tempfile_in(&dir)
            .map_err(|e| decode_err(e.to_string()))?;

        debug!("🖼️ Seeking frame {} of {} in {}", count - 1, count, video.display());
        let mut decoded = self.decode_frame(video, count - 1, staging.path()).await?;

        // Header counts can overstate the decodable frames of a truncated file
        if !decoded && from_header {
            let counted = self.counted_frames(video).await?;
            if counted == 0 {
                return Err(MediaError::NoFrames {
                    path: video.to_path_buf(),
                });
            }
            if counted != count {
                debug!("Header reported {} frames, decoded {}", count, counted);
                decoded = self.decode_frame(video, counted - 1, staging.path()).await?;
            }
        }

        if !decoded {
            return Err(decode_err(format!("frame {} did not decode", count - 1)));
        }

        staging
            .persist(destination)
            .map_err(|e| decode_err(format!("cannot write {}: {}", destination.display(), e.error)))?;

        info!("📸 Last frame of {} saved to {}", video.display(), destination.display());

        Ok(FrameImage {
            path: destination.to_path_buf(),
            source_artifact: video.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ffmpeg_or_skip;
    use tempfile::TempDir;

    fn extractor() -> FfmpegFrameExtractor {
        FfmpegFrameExtractor::new(PathBuf::from("ffmpeg"), PathBuf::from("ffprobe"))
    }

    async fn synth_clip(path: &Path, source: &str, seconds: &str) {
        run_ffmpeg(
            Path::new("ffmpeg"),
            ["-y", "-f", "lavfi", "-i", source, "-t", seconds, "-pix_fmt", "yuv420p", path.to_str().unwrap()],
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_empty_file_has_no_frames() {
        let temp = TempDir::new().unwrap();
        let video = temp.path().join("empty.mp4");
        tokio::fs::write(&video, b"").await.unwrap();
        let destination = temp.path().join("seed.jpg");

        let err = extractor().extract_last_frame(&video, &destination).await.unwrap_err();
        assert!(matches!(err, MediaError::NoFrames { .. }));
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_decode_failure() {
        let temp = TempDir::new().unwrap();
        let err = extractor()
            .extract_last_frame(&temp.path().join("missing.mp4"), &temp.path().join("seed.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::DecodeFailure { .. }));
    }

    #[tokio::test]
    async fn test_audio_only_file_has_no_frames() {
        if !ffmpeg_or_skip("test_audio_only_file_has_no_frames").await {
            return;
        }
        let temp = TempDir::new().unwrap();
        let audio = temp.path().join("silence.m4a");
        run_ffmpeg(
            Path::new("ffmpeg"),
            ["-y", "-f", "lavfi", "-i", "anullsrc=r=44100:cl=mono", "-t", "1", audio.to_str().unwrap()],
        )
        .await
        .unwrap();

        let destination = temp.path().join("seed.jpg");
        let err = extractor().extract_last_frame(&audio, &destination).await.unwrap_err();
        assert!(matches!(err, MediaError::NoFrames { .. }));
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_extraction_is_idempotent_and_overwrites() {
        if !ffmpeg_or_skip("test_extraction_is_idempotent_and_overwrites").await {
            return;
        }
        let temp = TempDir::new().unwrap();
        let video = temp.path().join("clip.mp4");
        synth_clip(&video, "testsrc=size=160x120:rate=10", "1").await;

        let destination = temp.path().join("seed.jpg");
        tokio::fs::write(&destination, b"stale").await.unwrap();

        let frame = extractor().extract_last_frame(&video, &destination).await.unwrap();
        assert_eq!(frame.path, destination);
        assert_eq!(frame.source_artifact, video);
        let first = std::fs::read(&destination).unwrap();
        assert_ne!(first, b"stale");

        extractor().extract_last_frame(&video, &destination).await.unwrap();
        let second = std::fs::read(&destination).unwrap();
        assert_eq!(first, second);
    }
}
