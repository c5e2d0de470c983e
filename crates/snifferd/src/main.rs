use anyhow::{Context, Result};
use clap::Parser;
use snifferconf::SnifferConfig;
use snifferd::{
    telemetry, web, CaptureConfig, CaptureService, CaptureSettings, SimulatedSniffer, TaskArchive,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Capture orchestration daemon
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of ./snifferd.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory for the finished-task archive
    #[arg(short, long)]
    state_dir: Option<PathBuf>,

    /// Directory the device saves traces into
    #[arg(long)]
    capture_dir: Option<PathBuf>,

    /// Seconds between splits; 0 disables splitting
    #[arg(long)]
    split_interval: Option<i64>,

    /// Worker poll period in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

impl Cli {
    fn apply(&self, config: &mut SnifferConfig) {
        if let Some(port) = self.port {
            config.infra.bind.http_port = port;
        }
        if let Some(dir) = &self.state_dir {
            config.infra.paths.state_dir = dir.clone();
        }
        if let Some(dir) = &self.capture_dir {
            config.infra.paths.capture_dir = dir.clone();
        }
        if let Some(secs) = self.split_interval {
            config.infra.capture.split_interval_secs = secs;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.infra.capture.poll_interval_ms = ms;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        SnifferConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);

    if cli.show_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    telemetry::init(
        &config.infra.telemetry.log_level,
        config.infra.telemetry.otlp_endpoint(),
    )
    .context("Failed to initialize telemetry")?;

    let paths = &config.infra.paths;
    std::fs::create_dir_all(&paths.state_dir).context("Failed to create state directory")?;
    std::fs::create_dir_all(&paths.capture_dir).context("Failed to create capture directory")?;
    info!(
        state_dir = %paths.state_dir.display(),
        capture_dir = %paths.capture_dir.display(),
        "Using directories"
    );

    let device_config = &config.bootstrap.device;
    let device = SimulatedSniffer::new(device_config.model.clone())
        .with_config(CaptureConfig::from(device_config));

    let settings = CaptureSettings::from_config(&config);
    let archive = TaskArchive::new(config.infra.archive_path(), settings.locator());
    let service = Arc::new(
        CaptureService::builder(device)
            .settings(settings)
            .archive(archive)
            .spawn()
            .context("Failed to start capture service")?,
    );

    let shutdown_token = CancellationToken::new();

    let addr = format!("0.0.0.0:{}", config.infra.bind.http_port);
    let bind_addr: std::net::SocketAddr = addr.parse().context("Failed to parse bind address")?;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    let app = web::router(web::WebState {
        service: Arc::clone(&service),
    });

    let shutdown_token_srv = shutdown_token.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_token_srv.cancelled().await;
        info!("Server shutdown signal received");
    });
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Server shutdown with error: {:?}", e);
        }
    });

    info!(
        http.addr = %addr,
        device.model = %service.get_controller_model(),
        "snifferd ready"
    );

    // Spawn background task for periodic statistics logging
    let stats_service = Arc::clone(&service);
    let stats_ct = shutdown_token.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let stats = stats_service.stats();
                    info!(
                        tasks.running = stats.running,
                        tasks.pending = stats.pending,
                        tasks.finished = stats.finished,
                        segments = stats.segments,
                        capturing = stats.capturing,
                        "Capture statistics"
                    );
                }
                _ = stats_ct.cancelled() => {
                    break;
                }
            }
        }
    });

    // Handle both SIGINT (Ctrl+C) and SIGTERM (systemd, etc.)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = sigterm() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    shutdown_token.cancel();

    if let Err(e) = server_handle.await {
        error!("Server task failed: {}", e);
    }

    // Worker join and archive write block; keep them off the runtime.
    let report = tokio::task::spawn_blocking(move || service.shutdown())
        .await
        .context("Shutdown task failed")?
        .context("Capture service was already shut down")?;

    if let Some(error) = &report.archive_error {
        error!(error = %error, "Finished tasks were not archived");
    }
    info!(
        stopped = report.stopped.len(),
        lost_pending = report.lost_pending.len(),
        finished = report.finished,
        archived = ?report.archived,
        "Shutdown complete"
    );

    Ok(())
}

async fn sigterm() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
