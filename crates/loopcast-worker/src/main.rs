//! loopcast command line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loopcast_media::{FfmpegBackend, MediaBackend, ProcessRegistry};
use loopcast_models::{RenderRequest, RenderState, StreamRequest, StreamState};
use loopcast_worker::{
    AudioPump, AudioSource, DecodedFileSource, EngineConfig, EngineEvent, EventChannel,
    RenderController, StreamSession,
};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit status of a cancelled render.
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(name = "loopcast")]
#[command(about = "Looping video timeline composer and live streamer", version)]
struct Cli {
    /// Scratch directory for job arenas
    #[arg(long, env = "LOOPCAST_WORK_DIR", global = true)]
    work_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a timeline to a file
    Render {
        /// Render request (JSON)
        #[arg(long)]
        request: PathBuf,
        /// Override the request's output path
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Push a looping stream to a live endpoint
    Stream {
        /// Stream request (JSON)
        #[arg(long)]
        request: PathBuf,
        /// Media file whose soundtrack is fed through the live audio pipe
        #[arg(long)]
        audio: Option<PathBuf>,
    },
    /// Print probe information for a media file
    Probe { file: PathBuf },
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("loopcast=info,loopcast_worker=info,loopcast_timeline=info,loopcast_media=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = EngineConfig::from_env();
    if let Some(work_dir) = cli.work_dir.clone() {
        config = config.with_work_dir(work_dir);
    }

    let registry = Arc::new(ProcessRegistry::new());
    let backend: Arc<dyn MediaBackend> =
        Arc::new(FfmpegBackend::new(registry.clone()).with_timeout(config.ffmpeg_timeout_secs()));

    let code = match run(cli.command, backend, config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };

    let terminated = registry.terminate_all();
    if terminated > 0 {
        warn!(terminated, "Terminated leftover backend processes");
    }
    std::process::exit(code);
}

async fn run(command: Commands, backend: Arc<dyn MediaBackend>, config: EngineConfig) -> Result<i32> {
    match command {
        Commands::Render { request, output } => render(&request, output, backend, config).await,
        Commands::Stream { request, audio } => stream(&request, audio, backend, config).await,
        Commands::Probe { file } => {
            let info = backend
                .probe(&file)
                .await
                .with_context(|| format!("probing {}", file.display()))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(0)
        }
    }
}

async fn read_request<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn render(
    path: &Path,
    output: Option<PathBuf>,
    backend: Arc<dyn MediaBackend>,
    config: EngineConfig,
) -> Result<i32> {
    let mut request: RenderRequest = read_request(path).await?;
    if let Some(output) = output {
        request.output = output;
    }

    let (events, rx) = EventChannel::new();
    let printer = tokio::spawn(print_events(rx));
    let controller = RenderController::new(backend, config).with_events(events);
    let handle = controller.start(request).await;

    let outcome = tokio::select! {
        outcome = handle.wait() => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, cancelling render");
            controller.cancel().await;
            handle.wait().await
        }
    };
    drop(controller);
    printer.await.ok();

    match outcome.state {
        RenderState::Completed => {
            if let Some(report) = &outcome.report {
                println!("{}", serde_json::to_string_pretty(report)?);
            }
            Ok(0)
        }
        RenderState::Cancelled => Ok(EXIT_CANCELLED),
        _ => {
            error!("Render failed: {}", outcome.error.as_deref().unwrap_or("unknown error"));
            Ok(1)
        }
    }
}

async fn stream(
    path: &Path,
    audio: Option<PathBuf>,
    backend: Arc<dyn MediaBackend>,
    config: EngineConfig,
) -> Result<i32> {
    let request: StreamRequest = read_request(path).await?;
    let format = request.audio;

    let (events, rx) = EventChannel::new();
    let printer = tokio::spawn(print_events(rx));
    let mut session = StreamSession::start(request, backend.clone(), config.clone(), events)?;

    let pump = match (audio, format, session.take_audio_writer()) {
        (Some(file), Some(format), Some(writer)) => {
            tokio::fs::create_dir_all(&config.work_dir).await?;
            let scratch = config.work_dir.join(format!("{}-live-audio.f32", session.id()));
            let mut source = DecodedFileSource::new(file, scratch, backend);
            source.prepare(format).await?;
            Some(AudioPump::spawn(Box::new(source), writer, format)?)
        }
        (Some(_), None, _) => {
            warn!("--audio given but the stream request has no live audio format, ignoring");
            None
        }
        _ => None,
    };

    let interrupted = tokio::select! {
        _ = session.wait() => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    let state = if interrupted {
        info!("Received shutdown signal, stopping stream");
        session.stop().await
    } else {
        let error = session.error();
        let state = session.stop().await;
        if let Some(error) = error {
            error!("Stream failed: {}", error);
        }
        state
    };

    if let Some(pump) = pump {
        if let Some(mut source) = pump.stop().await {
            source.release().await;
        }
    }
    printer.await.ok();

    Ok(if state == StreamState::Failed { 1 } else { 0 })
}

async fn print_events(mut rx: UnboundedReceiver<EngineEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            EngineEvent::Stage { label, .. } => info!(stage = %label, "Render stage"),
            EngineEvent::Progress { fraction, .. } => {
                info!(progress = format!("{:.0}%", fraction * 100.0), "Render progress")
            }
            EngineEvent::Finished { outcome } => {
                info!(state = %outcome.state, "Render finished");
            }
            EngineEvent::Stream { state, .. } => info!(state = %state, "Stream state"),
            EngineEvent::Health { health, .. } => info!(
                frame = health.frame,
                fps = health.fps,
                drop_frames = health.drop_frames,
                restarts = health.restarts,
                unstable = health.unstable,
                audio_connected = health.audio_connected,
                "Stream health"
            ),
        }
    }
}
