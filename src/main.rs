use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use glass_stream::client::{
    fetch_snapshot, ClientEvent, LogRenderer, StreamClient, StreamEndpoint,
};
use glass_stream::config::{AppConfig, ConfigStore, SourceKind};
use glass_stream::stream::StreamServer;
use glass_stream::video::{create_source, FrameSink, FrameSource, LatestFrameBuffer};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// glass-stream command line arguments
#[derive(Parser, Debug)]
#[command(name = "glass-stream")]
#[command(version, about = "Live MJPEG streaming over HTTP", long_about = None)]
struct CliArgs {
    #[command(subcommand)]
    command: Command,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a frame source and serve it over HTTP
    Serve(ServeArgs),
    /// Connect to a stream and render it
    View(ViewArgs),
    /// Save a single frame from a server
    Snapshot(SnapshotArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceArg {
    TestPattern,
    Directory,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// JSON configuration file (created with defaults if missing)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Frame source (overrides config)
    #[arg(long, value_name = "SOURCE")]
    source: Option<SourceArg>,

    /// Directory of JPEG files for the directory source
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Frames per second
    #[arg(long, value_name = "N")]
    fps: Option<u32>,

    /// JPEG quality of the test pattern (1-100)
    #[arg(long, value_name = "Q", value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: Option<u8>,
}

#[derive(Args, Debug)]
struct ViewArgs {
    /// Stream URL, e.g. http://192.168.1.20:8080/stream
    url: String,

    /// JSON configuration file for client defaults
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Largest accepted frame in bytes
    #[arg(long, value_name = "BYTES")]
    max_frame_size: Option<usize>,

    /// Delay before reconnecting after a failure
    #[arg(long, value_name = "MS")]
    reconnect_delay_ms: Option<u64>,

    /// Keep the latest decoded frame in this PPM file
    #[arg(long, value_name = "FILE")]
    save: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SnapshotArgs {
    /// Server URL, e.g. http://192.168.1.20:8080
    url: String,

    /// Output JPEG file
    #[arg(short = 'o', long, value_name = "FILE")]
    output: PathBuf,

    /// Give up after this many seconds
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    match args.command {
        Command::Serve(args) => serve(args).await,
        Command::View(args) => view(args).await,
        Command::Snapshot(args) => snapshot(args).await,
    }
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => {
            let store = ConfigStore::new(path)
                .await
                .with_context(|| format!("loading {}", path.display()))?;
            tracing::info!("Configuration: {}", store.path().display());
            Ok((*store.get()).clone())
        }
        None => Ok(AppConfig::default()),
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    tracing::info!("Starting glass-stream v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(args.config.as_deref()).await?;

    // Apply CLI argument overrides to config (only if explicitly specified)
    if let Some(addr) = args.address {
        config.server.bind_address = addr;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(source) = args.source {
        config.source.kind = match source {
            SourceArg::TestPattern => SourceKind::TestPattern,
            SourceArg::Directory => SourceKind::Directory,
        };
    }
    if let Some(dir) = args.dir {
        config.source.directory = Some(dir.to_string_lossy().to_string());
        if args.source.is_none() {
            config.source.kind = SourceKind::Directory;
        }
    }
    if let Some(fps) = args.fps {
        config.source.fps = fps;
    }
    if let Some(quality) = args.quality {
        config.source.quality = quality;
    }

    let buffer = Arc::new(LatestFrameBuffer::new());
    let sink = FrameSink::new(buffer.clone());
    let source = create_source(&config.source)?;

    let server = StreamServer::new(config.server.clone(), buffer);
    let addr = server.start().await?;

    if let Err(e) = source.start(sink.clone()).await {
        server.stop();
        return Err(e).context("starting frame source");
    }
    tracing::info!("Frame source: {}", source.name());
    tracing::info!("Stream URL: http://{}/stream", addr);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut ticks = 0u64;

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                }
                tracing::info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                ticks += 1;
                let stats = server.stats();
                let capture_fps = sink.capture_fps();
                if ticks % 10 == 0 {
                    tracing::info!(
                        "http://{}/stream | {}x{} q{} | {} fps | {} clients | frame #{}",
                        addr, config.source.width, config.source.height, config.source.quality,
                        capture_fps, stats.clients, stats.version
                    );
                } else {
                    tracing::debug!(
                        "{} fps | {} clients | frame #{}",
                        capture_fps, stats.clients, stats.version
                    );
                }
            }
        }
    }

    if let Err(e) = source.stop().await {
        tracing::warn!("Failed to stop frame source: {}", e);
    }
    server.stop();
    tracing::info!("glass-stream stopped");
    Ok(())
}

async fn view(args: ViewArgs) -> anyhow::Result<()> {
    let endpoint = StreamEndpoint::parse(&args.url)?;
    let mut config = load_config(args.config.as_deref()).await?.client;
    if let Some(max) = args.max_frame_size {
        config.max_frame_size = max;
    }
    if let Some(delay) = args.reconnect_delay_ms {
        config.reconnect_delay_ms = delay;
    }

    let client = StreamClient::new(endpoint, config);
    let mut events = client.subscribe();
    client.start(LogRenderer::new(args.save))?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            event = events.recv() => match event {
                Ok(ClientEvent::StateChanged(state)) => {
                    tracing::info!("{}: {}", client.endpoint(), state);
                }
                Ok(ClientEvent::Fps(fps)) => {
                    tracing::info!("{}: {} fps", client.endpoint(), fps);
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::debug!("Missed {} viewer events", n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    client.stop().await;
    let stats = client.stats();
    tracing::info!(
        "Viewer done: {} frames rendered, {} decode failures, {} connection attempts, {} protocol errors",
        stats.frames_rendered,
        stats.decode_failures,
        stats.connection_attempts,
        stats.protocol_errors
    );
    Ok(())
}

async fn snapshot(args: SnapshotArgs) -> anyhow::Result<()> {
    let endpoint = StreamEndpoint::parse(&args.url)?;
    let jpeg = fetch_snapshot(&endpoint, Duration::from_secs(args.timeout)).await?;
    tokio::fs::write(&args.output, &jpeg)
        .await
        .with_context(|| format!("writing {}", args.output.display()))?;
    tracing::info!("Saved {} bytes to {}", jpeg.len(), args.output.display());
    Ok(())
}

/// Initialize logging with the given level and verbosity
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "glass_stream=error",
        LogLevel::Warn => "glass_stream=warn",
        LogLevel::Info => "glass_stream=info",
        LogLevel::Verbose => "glass_stream=debug",
        LogLevel::Debug => "glass_stream=debug,tokio=debug",
        LogLevel::Trace => "glass_stream=trace,tokio=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
