use super::{run_ffmpeg, ClipConcatenator, VideoInfo, VideoProber};
use crate::config::MediaConfig;
use crate::error::MediaError;
use crate::job::VideoArtifact;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const FALLBACK_FPS: f64 = 30.0;
const AUDIO_RATE: u32 = 44100;

/// Re-encoding concatenator. Inputs are scaled and padded to a shared canvas and
/// frame rate, and clips without sound get a silent track, so differing clips join cleanly.
#[derive(Debug, Clone)]
pub struct FfmpegStitcher {
    ffmpeg: PathBuf,
    prober: VideoProber,
    video_codec: String,
    audio_codec: String,
    threads: usize,
}

/// Canvas every input is normalised onto
#[derive(Debug, Clone, PartialEq)]
struct Canvas {
    width: u32,
    height: u32,
    fps: f64,
    with_audio: bool,
}

impl Canvas {
    /// Largest dimensions (rounded up to even) and highest frame rate of the inputs
    fn covering(clips: &[&VideoInfo]) -> Self {
        let even = |v: u32| v + (v % 2);
        let fps = clips.iter().map(|c| c.fps).fold(0.0, f64::max);
        Self {
            width: even(clips.iter().map(|c| c.width).max().unwrap_or(0)),
            height: even(clips.iter().map(|c| c.height).max().unwrap_or(0)),
            fps: if fps > 0.0 { fps } else { FALLBACK_FPS },
            with_audio: clips.iter().any(|c| c.has_audio),
        }
    }
}

impl FfmpegStitcher {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            prober: VideoProber::new(config.ffprobe_path.clone()),
            video_codec: config.video_codec.clone(),
            audio_codec: config.audio_codec.clone(),
            threads: config.threads.max(1),
        }
    }

    async fn open(&self, path: &Path) -> Result<VideoInfo, MediaError> {
        let info = self.prober.probe(path).await.map_err(|e| MediaError::ConcatenationFailure {
            reason: format!("cannot open input: {}", e),
        })?;
        if !info.has_video {
            return Err(MediaError::ConcatenationFailure {
                reason: format!("{} has no video stream", path.display()),
            });
        }
        Ok(info)
    }

    fn command_args(&self, clips: &[&VideoInfo], canvas: &Canvas, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-y".into()];
        for clip in clips {
            args.push("-i".into());
            args.push(clip.path.clone().into());
        }

        // Silent stand-ins follow the real inputs, one per clip lacking audio
        let mut audio_sources = Vec::new();
        let mut next_input = clips.len();
        for (i, clip) in clips.iter().enumerate() {
            if !canvas.with_audio {
                break;
            }
            if clip.has_audio {
                audio_sources.push(i);
            } else {
                args.extend([
                    "-f".into(),
                    "lavfi".into(),
                    "-t".into(),
                    format!("{:.3}", clip.duration.as_secs_f64()).into(),
                    "-i".into(),
                    format!("anullsrc=r={}:cl=stereo", AUDIO_RATE).into(),
                ]);
                audio_sources.push(next_input);
                next_input += 1;
            }
        }

        args.push("-filter_complex".into());
        args.push(filter_graph(canvas, clips.len(), &audio_sources).into());
        args.extend(["-map".into(), "[vout]".into()]);
        if canvas.with_audio {
            args.extend(["-map".into(), "[aout]".into(), "-c:a".into(), self.audio_codec.clone().into()]);
        }
        args.extend([
            "-c:v".into(),
            self.video_codec.clone().into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-threads".into(),
            self.threads.to_string().into(),
            "-movflags".into(),
            "+faststart".into(),
        ]);
        args.push(output.as_os_str().to_os_string());
        args
    }
}

/// Filter graph normalising every input and concatenating them in order
fn filter_graph(canvas: &Canvas, inputs: usize, audio_sources: &[usize]) -> String {
    let (w, h) = (canvas.width, canvas.height);
    let mut chains = Vec::new();
    let mut labels = String::new();

    for i in 0..inputs {
        chains.push(format!(
            "[{i}:v:0]scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps:.3},format=yuv420p[v{i}]",
            fps = canvas.fps
        ));
        labels.push_str(&format!("[v{i}]"));

        if let Some(source) = audio_sources.get(i) {
            chains.push(format!(
                "[{source}:a:0]aresample={AUDIO_RATE},aformat=sample_fmts=fltp:channel_layouts=stereo[a{i}]"
            ));
            labels.push_str(&format!("[a{i}]"));
        }
    }

    if canvas.with_audio {
        chains.push(format!("{labels}concat=n={inputs}:v=1:a=1[vout][aout]"));
    } else {
        chains.push(format!("{labels}concat=n={inputs}:v=1:a=0[vout]"));
    }
    chains.join(";")
}

#[async_trait]
impl ClipConcatenator for FfmpegStitcher {
    async fn concatenate(&self, first: &Path, second: &Path, output: &Path) -> Result<VideoArtifact, MediaError> {
        let fail = |reason: String| MediaError::ConcatenationFailure { reason };

        let first_info = self.open(first).await?;
        let second_info = self.open(second).await?;
        let clips = [&first_info, &second_info];
        let canvas = Canvas::covering(&clips);

        debug!(
            "🧵 Canvas {}x{} @ {:.2}fps (audio: {})",
            canvas.width, canvas.height, canvas.fps, canvas.with_audio
        );

        let dir = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let suffix = output
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| ".mp4".to_string());

        // Encode beside the output and rename, so a failed encode never lands at `output`
        let staging = tempfile::Builder::new()
            .prefix(".stitch-")
            .suffix(&suffix)
            .tempfile_in(&dir)
            .map_err(|e| fail(format!("cannot stage output in {}: {}", dir.display(), e)))?;

        let args = self.command_args(&clips, &canvas, staging.path());
        run_ffmpeg(&self.ffmpeg, &args).await.map_err(fail)?;

        let size = tokio::fs::metadata(staging.path())
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if size == 0 {
            return Err(fail("encoder produced an empty file".to_string()));
        }

        staging
            .persist(output)
            .map_err(|e| fail(format!("cannot commit {}: {}", output.display(), e.error)))?;

        info!(
            "🎞️ Joined {} + {} into {}",
            first.display(),
            second.display(),
            output.display()
        );

        let mut artifact = VideoArtifact::intermediate(output.to_path_buf());
        artifact.duration_seconds = Some(first_info.duration.as_secs_f64() + second_info.duration.as_secs_f64());
        Ok(artifact)
    }
}
