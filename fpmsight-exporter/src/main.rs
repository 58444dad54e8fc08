//! Prometheus exporter for php-fpm.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use fpmsight_exporter::logging::init_tracing;
use fpmsight_exporter::{ExporterConfig, HttpServer, MetricCollector, TransportKind};

/// Prometheus exporter for php-fpm.
#[derive(Parser, Debug)]
#[command(name = "fpmsight-exporter")]
#[command(about = "Export php-fpm pool status as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Transport used to reach php-fpm: tcp or unix.
    #[arg(long)]
    scheme: Option<TransportKind>,

    /// php-fpm address, `host:port` or socket path.
    #[arg(long)]
    address: Option<String>,

    /// Status page path (`pm.status_path`).
    #[arg(long)]
    path: Option<String>,

    /// Dial and request timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Metric name prefix.
    #[arg(long)]
    namespace: Option<String>,

    /// HTTP listen address.
    #[arg(long)]
    listen: Option<String>,

    /// HTTP path serving the metrics.
    #[arg(long)]
    metrics_path: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Write daily rotated log files to this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Args {
    /// Apply command line overrides on top of the loaded configuration.
    fn apply(self, config: &mut ExporterConfig) {
        if let Some(scheme) = self.scheme {
            config.target.scheme = scheme;
        }
        if let Some(address) = self.address {
            config.target.address = address;
        }
        if let Some(path) = self.path {
            config.target.path = path;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.target.timeout_ms = timeout_ms;
        }
        if let Some(namespace) = self.namespace {
            config.prometheus.namespace = namespace;
        }
        if let Some(listen) = self.listen {
            config.prometheus.listen = listen;
        }
        if let Some(metrics_path) = self.metrics_path {
            config.prometheus.path = metrics_path;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(directory) = self.log_dir {
            config.logging.directory = Some(directory);
        }
    }
}

/// Resolve when Ctrl+C or SIGTERM is received.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, shutting down...");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(config_path) => ExporterConfig::load_from_file(config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?,
        None => ExporterConfig::default(),
    };

    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    // Initialize logging, the guard flushes file output on exit
    let _log_guard = init_tracing(&config.logging)?;

    let target = config.target.to_target()?;
    info!(target = %target, "Starting php-fpm exporter");

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let collector = Arc::new(MetricCollector::new(&config.prometheus.namespace, target));

    let listen_addr: SocketAddr = config
        .prometheus
        .listen
        .parse()
        .with_context(|| format!("Invalid listen address: {}", config.prometheus.listen))?;

    let http_server = HttpServer::new(
        collector.clone(),
        listen_addr,
        config.prometheus.path.clone(),
    );

    // Start HTTP server
    let mut http_task = tokio::spawn(async move { http_server.run(shutdown_rx).await });

    // Wait for shutdown signal or an early server exit
    tokio::select! {
        result = shutdown_signal() => {
            result?;
        }
        result = &mut http_task => {
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!("HTTP server error: {}", e);
                    Err(e)
                }
                Err(e) => Err(anyhow::anyhow!("HTTP server task failed: {}", e)),
            };
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for the server to drain
    match tokio::time::timeout(Duration::from_secs(5), http_task).await {
        Ok(Ok(Err(e))) => error!("HTTP server error: {}", e),
        Ok(Err(e)) => error!("HTTP server task failed: {}", e),
        Err(_) => error!("HTTP server did not stop within 5s"),
        Ok(Ok(Ok(()))) => {}
    }

    let stats = collector.stats();
    info!(
        scrapes = stats.scrapes,
        failures = stats.failures,
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}
