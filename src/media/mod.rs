//! Local media operations backed by the ffmpeg command line tools

pub mod frame;
pub mod probe;
pub mod stitch;

pub use frame::FfmpegFrameExtractor;
pub use probe::{VideoInfo, VideoProber};
pub use stitch::FfmpegStitcher;

use crate::error::MediaError;
use crate::job::{FrameImage, VideoArtifact};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

/// Pulls the final frame of a clip into a still image
#[async_trait]
pub trait LastFrameExtractor: Send + Sync {
    /// Overwrites `destination`; leaves it untouched on failure
    async fn extract_last_frame(&self, video: &Path, destination: &Path) -> Result<FrameImage, MediaError>;
}

/// Joins two clips into one, first then second
#[async_trait]
pub trait ClipConcatenator: Send + Sync {
    /// Nothing is committed at `output` unless the whole encode succeeds
    async fn concatenate(&self, first: &Path, second: &Path, output: &Path) -> Result<VideoArtifact, MediaError>;
}

/// Run ffmpeg quietly, returning the tail of stderr on failure
pub async fn run_ffmpeg<I, S>(ffmpeg: &Path, args: I) -> Result<(), String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = tokio::process::Command::new(ffmpeg)
        .args(["-hide_banner", "-nostdin", "-loglevel", "error"])
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| format!("failed to run {}: {}", ffmpeg.display(), e))?;

    if !output.status.success() {
        return Err(format!(
            "{} exited with {}: {}",
            ffmpeg.display(),
            output.status,
            stderr_tail(&output.stderr)
        ));
    }

    Ok(())
}

/// Last few lines of a tool's stderr, for error messages
pub(crate) fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join(" | ")
}

/// Whether a tool can be executed at all
pub async fn tool_available(tool: &Path) -> bool {
    tokio::process::Command::new(tool)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Set to `1` to make tests that need ffmpeg fail instead of skipping
#[cfg(test)]
pub(crate) const REQUIRE_FFMPEG_ENV: &str = "SCENE_CHAIN_REQUIRE_FFMPEG";

/// Whether ffmpeg and ffprobe are on PATH; prints a skip notice when they are not
#[cfg(test)]
pub(crate) async fn ffmpeg_or_skip(test: &str) -> bool {
    if tool_available(Path::new("ffmpeg")).await && tool_available(Path::new("ffprobe")).await {
        return true;
    }
    if std::env::var(REQUIRE_FFMPEG_ENV).as_deref() == Ok("1") {
        panic!("{}: ffmpeg/ffprobe not found but {}=1", test, REQUIRE_FFMPEG_ENV);
    }
    eprintln!(
        "skipping {}: ffmpeg/ffprobe not found (set {}=1 to fail instead)",
        test, REQUIRE_FFMPEG_ENV
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr = b"a\nb\n\nc\nd\ne\nf\ng\n";
        assert_eq!(stderr_tail(stderr), "c | d | e | f | g");
    }

    #[tokio::test]
    async fn test_missing_tool_reports_failure() {
        let missing = Path::new("/nonexistent/ffmpeg-for-tests");
        assert!(!tool_available(missing).await);

        let err = run_ffmpeg(missing, ["-version"]).await.unwrap_err();
        assert!(err.contains("failed to run"));
    }
}
