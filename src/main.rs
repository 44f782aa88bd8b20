use clap::Parser;
use linebot::hardware::{
    spawn_keyboard_reader, FrameSource, ImageSequenceSource, LoggingActuator, ReplayRecognizer,
    SimulatedTrack,
};
use linebot::pipeline::RecognizerBackend;
use linebot::{AppError, Configuration, CoordinatorBuilder};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "linebot")]
#[command(about = "Line-following drive controller with sign recognition")]
struct Cli {
    /// Configuration file (JSON, TOML or YAML); LINEBOT__* variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of recorded camera frames; the simulated track is used otherwise
    #[arg(long)]
    frames: Option<PathBuf>,

    /// Loop the recorded frames instead of stopping at the end
    #[arg(long)]
    loop_frames: bool,

    /// Recorded detections to replay as the recognizer backend
    #[arg(long)]
    detections: Option<PathBuf>,

    /// Read manual override keys from stdin
    #[arg(long)]
    keyboard: bool,

    /// Seed for the simulated track's sensor noise
    #[arg(long, default_value = "7")]
    seed: u64,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_logging();
    let cli = Cli::parse();
    let configuration = Configuration::load(cli.config.as_deref())?;

    let frame_source: Box<dyn FrameSource> = match &cli.frames {
        Some(dir) => Box::new(ImageSequenceSource::open(dir)?.looping(cli.loop_frames)),
        None => Box::new(SimulatedTrack::new(&configuration.camera, cli.seed)),
    };

    let recognizer: Option<Arc<dyn RecognizerBackend>> = match &cli.detections {
        Some(path) => match ReplayRecognizer::from_path(path) {
            Ok(replay) => Some(Arc::new(replay) as Arc<dyn RecognizerBackend>),
            Err(e) => {
                warn!("Could not load recognizer from {}: {}", path.display(), e);
                None
            }
        },
        None => None,
    };

    let cancel = CancellationToken::new();
    let mut builder = CoordinatorBuilder::new(configuration.clone())
        .frame_source(frame_source)
        .actuator(Box::new(LoggingActuator::new(configuration.speed.clone())))
        .cancel_token(cancel.clone());
    if let Some(recognizer) = recognizer {
        builder = builder.recognizer(recognizer);
    }
    if cli.keyboard {
        builder = builder.manual_input(spawn_keyboard_reader(cancel.clone()));
    }
    let coordinator = builder.build()?;

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            interrupt.cancel();
        }
    });

    coordinator.wait().await?;
    Ok(())
}
