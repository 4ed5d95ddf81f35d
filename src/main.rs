use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use cricklens::config::CrickLensConfig;
use cricklens::conversation::ConversationState;
use cricklens::image_ops::{ImageOperation, ImageProcessor};
use cricklens::model::RemoteChatModel;
use cricklens::tools::{image_failure_text, image_success_text, video_error_text, ToolExecutor};
use cricklens::{CancellationToken, ToolOrchestrator, VideoAnalyzer};

#[derive(Parser)]
#[command(name = "cricklens")]
#[command(about = "Pose-driven injury-risk analysis for cricket batting videos")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "cricklens.toml")]
    config: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a batting video and print the report
    Analyze {
        video: PathBuf,
        /// Print the full summary as JSON instead of the text report
        #[arg(long)]
        json: bool,
    },
    /// Run one conversation turn with the tool-calling model
    Chat {
        #[arg(short, long)]
        message: String,
        /// Uploaded video the conversation refers to
        #[arg(long)]
        video: Option<PathBuf>,
    },
    /// Apply image operations, e.g. '[{"operation": "grayscale"}]'
    Image {
        image: PathBuf,
        #[arg(long)]
        operations: String,
        #[arg(long, default_value = "")]
        thought: String,
    },
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("cricklens={}", log_level)));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let config = CrickLensConfig::load(&args.config)
        .await
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    info!("Configuration loaded from {}", args.config.display());

    let cancel = CancellationToken::new();
    let signal_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping after the current step");
            signal_flag.cancel();
        }
    });

    match args.command {
        Command::Analyze { video, json } => run_analyze(&config, cancel, video, json).await,
        Command::Chat { message, video } => run_chat(&config, cancel, message, video).await,
        Command::Image {
            image,
            operations,
            thought,
        } => run_image(&config, image, &operations, &thought).await,
        Command::ShowConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run_analyze(config: &CrickLensConfig, cancel: CancellationToken, video: PathBuf, json: bool) -> Result<()> {
    let analyzer = VideoAnalyzer::from_config(config)?.with_cancellation(cancel);

    match analyzer.analyze_path(&video).await {
        Ok(summary) if json => println!("{}", serde_json::to_string_pretty(summary.as_ref())?),
        Ok(summary) => println!("{}", summary.render_report()),
        Err(e) => {
            error!("Video analysis failed: {}", e);
            println!("{}", video_error_text(&e));
        }
    }
    Ok(())
}

async fn run_chat(
    config: &CrickLensConfig,
    cancel: CancellationToken,
    message: String,
    video: Option<PathBuf>,
) -> Result<()> {
    let model = RemoteChatModel::new(config.model.clone())?;
    let analyzer = VideoAnalyzer::from_config(config)?.with_cancellation(cancel.clone());
    let cache = analyzer.cache().clone();
    let tools = ToolExecutor::new(analyzer);

    let orchestrator =
        ToolOrchestrator::new(Arc::new(model), Arc::new(tools), &config.orchestrator).with_cancellation(cancel.clone());

    let mut state = ConversationState::with_user_message(message, video);
    let outcome = orchestrator.run_turn(&mut state).await;

    println!("{}", outcome.reply);
    if let Some(summary) = state.analysis.clone().or_else(|| cache.latest()) {
        println!();
        println!("{}", serde_json::to_string_pretty(summary.as_ref())?);
    }
    if !state.output_image_paths.is_empty() {
        println!();
        for path in &state.output_image_paths {
            println!("Processed image: {}", path.display());
        }
    }
    info!(
        "Turn ended with {:?} ({} model calls, {} tokens, {} tool calls, {} failed)",
        outcome.stop_reason, outcome.turns, outcome.tokens_generated, outcome.tool_calls, outcome.failed_tool_calls
    );
    Ok(())
}

async fn run_image(config: &CrickLensConfig, image: PathBuf, operations: &str, thought: &str) -> Result<()> {
    let operations: Vec<ImageOperation> =
        serde_json::from_str(operations).map_err(|e| anyhow!("Invalid --operations JSON: {}", e))?;
    let processor = ImageProcessor::new(&config.pipeline.output_dir);

    match processor.process(&image, &operations).await {
        Ok(processed) => println!("{}", image_success_text(thought, &processed.render())),
        Err(e) => println!("{}", image_failure_text(thought, &e)),
    }
    Ok(())
}
