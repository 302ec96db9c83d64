use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use scene_chain::media::{ClipConcatenator, FfmpegFrameExtractor, FfmpegStitcher, LastFrameExtractor};
use scene_chain::providers::{create_analysis_provider, create_audio_provider};
use scene_chain::Config;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "media-tools")]
#[command(about = "Standalone access to the scene chain media steps")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (default: scene-chain.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Save the last frame of a clip as an image
    LastFrame {
        video: PathBuf,
        #[arg(short, long, default_value = "seed.jpg")]
        output: PathBuf,
    },
    /// Join clips in order into one video
    Stitch {
        /// Two or more clips, first to last
        #[arg(required = true, num_args = 2..)]
        clips: Vec<PathBuf>,
        #[arg(short, long, default_value = "stitched.mp4")]
        output: PathBuf,
    },
    /// Speak text into a WAV file
    Speak {
        text: String,
        #[arg(short, long, default_value = "speech.wav")]
        output: PathBuf,
    },
    /// Describe a local image/video or a remote video URI
    Analyze {
        /// Local path or http(s) URI
        source: String,
        #[arg(short, long, default_value = "Describe this video in detail.")]
        prompt: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("scene_chain=info,media_tools=info,warn")
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::LastFrame { video, output } => {
            let extractor = FfmpegFrameExtractor::new(
                config.media.ffmpeg_path.clone(),
                config.media.ffprobe_path.clone(),
            );
            let frame = extractor.extract_last_frame(&video, &output).await?;
            println!("{}", frame.path.display());
        }
        Commands::Stitch { clips, output } => {
            if clips.len() < 2 {
                bail!("need at least two clips to stitch");
            }
            let stitcher = FfmpegStitcher::new(&config.media);
            let scratch = tempfile::TempDir::new()?;

            // Fold left to right; inputs are never deleted
            let mut running = clips[0].clone();
            let last = clips.len() - 1;
            for (i, clip) in clips.iter().enumerate().skip(1) {
                let target = if i == last {
                    output.clone()
                } else {
                    scratch.path().join(format!("combined_{}.mp4", i))
                };
                let artifact = stitcher.concatenate(&running, clip, &target).await?;
                info!("🔗 {}/{} joined", i, last);
                running = artifact.path;
            }
            println!("{}", running.display());
        }
        Commands::Speak { text, output } => {
            let provider = create_audio_provider(&config.providers.audio, &config.media.ffmpeg_path)?;
            let path = provider.generate_speech(&text, &output).await?;
            println!("{}", path.display());
        }
        Commands::Analyze { source, prompt } => {
            let provider = create_analysis_provider(&config.providers.analysis)?;
            let local = PathBuf::from(&source);
            let answer = if local.exists() {
                provider.analyze_media(&local, &prompt).await?
            } else {
                provider.analyze_remote_video(&source, &prompt).await?
            };
            println!("{}", answer);
        }
    }

    Ok(())
}
