use anyhow::{Context, Result};
use clap::{Arg, Command};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use scene_chain::{Config, SceneChainOrchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("Scene Chain")
        .version(env!("CARGO_PKG_VERSION"))
        .author("TigreRoll")
        .about("Generate a multi-scene AI video from one discovered idea")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file (default: scene-chain.toml if present)")
        )
        .arg(
            Arg::new("scenes")
                .short('n')
                .long("scenes")
                .value_name("NUM")
                .help("Number of scenes to chain")
                .value_parser(clap::value_parser!(usize))
        )
        .arg(
            Arg::new("work-dir")
                .short('w')
                .long("work-dir")
                .value_name("DIR")
                .help("Directory for intermediate clips")
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Where to publish the final video")
        )
        .arg(
            Arg::new("report")
                .short('r')
                .long("report")
                .value_name("FILE")
                .help("Write a JSON run report")
        )
        .arg(
            Arg::new("write-config")
                .long("write-config")
                .value_name("FILE")
                .help("Write the effective configuration and exit")
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue)
        )
        .get_matches();

    // Load configuration
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(&PathBuf::from(path))
            .with_context(|| format!("Failed to load config {}", path))?,
        None => Config::load()?,
    };

    if let Some(scenes) = matches.get_one::<usize>("scenes") {
        config.pipeline.scene_count = *scenes;
    }
    if let Some(dir) = matches.get_one::<String>("work-dir") {
        config.output.work_dir = PathBuf::from(dir);
    }
    if let Some(output) = matches.get_one::<String>("output") {
        config.output.final_path = PathBuf::from(output);
    }
    if let Some(report) = matches.get_one::<String>("report") {
        config.output.report_path = Some(PathBuf::from(report));
    }

    // Initialize logging
    let level = if matches.get_flag("verbose") {
        "debug"
    } else {
        config.output.log_level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("scene_chain={},warn", level))),
        )
        .init();

    if let Some(path) = matches.get_one::<String>("write-config") {
        config.save(path)?;
        return Ok(());
    }

    config.validate()?;

    info!("🚀 Scene Chain starting...");
    for line in config.summary().lines() {
        info!("{}", line);
    }

    let report_path = config.output.report_path.clone();
    let orchestrator = SceneChainOrchestrator::from_config(config)?;

    let report = match orchestrator.run().await {
        Ok(report) => report,
        Err(failure) => {
            error!("❌ Run stopped during {}: {}", failure.stage, failure.source);
            return Err(failure.into());
        }
    };

    info!("🎉 Final video: {}", report.final_video.path.display());
    info!("🔐 md5: {}", report.md5);

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!("📊 Report written to {}", path.display());
    }

    Ok(())
}
