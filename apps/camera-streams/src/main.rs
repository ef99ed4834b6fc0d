use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use camera_streams::{
    api::{self, AppState},
    camera::{CameraDirectory, StaticCameraDirectory},
    config::{parse_bind_address, Config, ConfigManager, ConfigOverrides},
    manager::StreamSessionManager,
    service::{ServiceManager, SignalHandler},
    status::StatusPublisher,
    supervisor::FfmpegTranscoder,
};

const DEFAULT_CONFIG_PATH: &str = "/etc/camera-streams/config.toml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file [default: /etc/camera-streams/config.toml]
    #[arg(short, long, env = "CAMERA_STREAMS_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Bind address for REST API, e.g. 0.0.0.0:5000
    #[arg(long)]
    bind: Option<String>,

    /// Root directory for live HLS output
    #[arg(long, env = "HLS_PATH")]
    hls_path: Option<PathBuf>,

    /// Directory for recordings
    #[arg(long, env = "RECORDING_PATH")]
    recording_path: Option<PathBuf>,

    /// URL prefix under which HLS playlists are published
    #[arg(long, env = "HLS_BASE_URL")]
    hls_base_url: Option<String>,

    /// ffmpeg executable
    #[arg(long = "ffmpeg", env = "FFMPEG_PATH")]
    ffmpeg_path: Option<PathBuf>,

    /// Target HLS segment length in seconds
    #[arg(long, env = "FFMPEG_HLS_TIME")]
    hls_time: Option<u32>,

    /// Number of segments kept in the live playlist
    #[arg(long, env = "FFMPEG_HLS_LIST_SIZE")]
    hls_list_size: Option<u32>,

    /// Run as systemd service
    #[arg(long)]
    service: bool,
}

impl Args {
    fn overrides(&self) -> camera_streams::Result<ConfigOverrides> {
        Ok(ConfigOverrides {
            hls_path: self.hls_path.clone(),
            recording_path: self.recording_path.clone(),
            hls_base_url: self.hls_base_url.clone(),
            ffmpeg_path: self.ffmpeg_path.clone(),
            hls_time_seconds: self.hls_time,
            hls_list_size: self.hls_list_size,
            bind: self.bind.as_deref().map(parse_bind_address).transpose()?,
        })
    }
}

fn init_logging(args: &Args, config: &Config) {
    // RUST_LOG wins, then --debug, then the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if args.debug { "debug" } else { config.app.log_level.as_str() })
    });

    if config.app.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else if args.service {
        // systemd adds its own timestamps
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .without_time()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config_path, required) = match &args.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };
    let mut config_manager = ConfigManager::new(config_path, required)
        .await
        .context("Failed to load configuration")?;
    config_manager
        .apply_overrides(args.overrides()?)
        .context("Invalid configuration")?;
    let config_path = config_manager.path().to_path_buf();
    let config = Arc::new(config_manager.into_inner());

    init_logging(&args, &config);

    info!("Starting Camera Streams v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {:?}", config_path);
    info!("API bind address: {}:{}", config.api.host, config.api.port);

    let manager = Arc::new(StreamSessionManager::new(
        &config,
        Arc::new(FfmpegTranscoder::new()),
        StatusPublisher::new(),
        Handle::current(),
    ));
    manager
        .directories()
        .ensure_roots()
        .await
        .context("Failed to prepare storage directories")?;
    info!("Stream session manager initialized");

    let cameras: Arc<dyn CameraDirectory> = Arc::new(StaticCameraDirectory::new(&config.cameras));
    info!("{} cameras configured", cameras.list().await.len());

    let signal_handler = SignalHandler::new().context("Failed to install signal handlers")?;

    // actix-web runs on its own system thread; sessions stay on this runtime
    let state = AppState::new(manager.clone(), cameras, config.clone());
    let (handle_tx, handle_rx) = tokio::sync::oneshot::channel();
    let api_thread = std::thread::spawn(move || {
        let system = actix_rt::System::new();
        system.block_on(async move {
            let server = match api::build_server(state) {
                Ok(server) => server,
                Err(e) => {
                    let _ = handle_tx.send(Err(e));
                    return;
                }
            };
            let _ = handle_tx.send(Ok(server.handle()));
            if let Err(e) = server.await {
                error!("API server error: {}", e);
            }
        });
    });

    let api_handle = handle_rx
        .await
        .context("API server thread exited during startup")?
        .context("Failed to start API server")?;

    let service = ServiceManager::new(manager, signal_handler).with_api(api_handle);
    service.run().await;

    if api_thread.join().is_err() {
        error!("API server thread panicked");
    }
    info!("Camera Streams stopped");
    Ok(())
}
