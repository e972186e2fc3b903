use clap::Parser;
use splitmux::config::Config;
use splitmux::mux::{Destination, MuxManager, StreamSettings, TcpDialerFactory};
use splitmux::{MuxError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "splitmux")]
#[command(about = "Drive logical streams through the split HTTP mux pool", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Generate example configuration file
    #[arg(long, value_name = "FILE")]
    generate_config: Option<PathBuf>,

    /// Log level (overrides config)
    #[arg(long)]
    log_level: Option<String>,

    /// Destination as host:port
    #[arg(short, long, default_value = "127.0.0.1:443")]
    destination: String,

    /// Number of concurrent logical streams to open
    #[arg(long, default_value_t = 8)]
    streams: usize,

    /// How long each stream keeps its dialer client (milliseconds)
    #[arg(long, default_value_t = 0)]
    hold_ms: u64,

    /// TCP connect timeout (milliseconds)
    #[arg(long, default_value_t = 5000)]
    connect_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(config_path) = args.generate_config {
        println!("Generating example configuration file: {:?}", config_path);
        Config::create_example(&config_path)?;
        println!("Example configuration file created successfully!");
        println!("Edit the file and run: splitmux --config {:?}", config_path);
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level, &config.logging.format)?;

    info!("splitmux v{} starting", env!("CARGO_PKG_VERSION"));
    match &args.config {
        Some(path) => info!("Loaded configuration from: {:?}", path),
        None => info!("No configuration file specified, using defaults"),
    }

    let destination = parse_destination(&args.destination)?;
    let settings = StreamSettings::new(config.transport.clone());
    let factory = TcpDialerFactory::new(Duration::from_millis(args.connect_timeout_ms));
    let manager = Arc::new(MuxManager::new(config.transport.multiplexing.clone(), factory));

    let shutdown = CancellationToken::new();
    let sweep_interval = config.transport.multiplexing.eviction_age().max(Duration::from_secs(1));
    let sweeper = manager.spawn_expiry_sweeper(sweep_interval, shutdown.clone());

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling pending dials...");
            ctrl_c.cancel();
        }
    });

    info!(
        %destination,
        streams = args.streams,
        mode = %config.transport.multiplexing.mode,
        "Opening logical streams"
    );

    let mut tasks = Vec::with_capacity(args.streams);
    for stream in 0..args.streams {
        let manager = Arc::clone(&manager);
        let cancel = shutdown.clone();
        let destination = destination.clone();
        let settings = settings.clone();
        let hold = Duration::from_millis(args.hold_ms);

        tasks.push(tokio::spawn(async move {
            let handle = manager.dial(&cancel, &destination, &settings).await?;
            info!(
                stream,
                client = ?handle.id(),
                peer = %handle.peer_addr(),
                "Stream attached"
            );
            tokio::time::sleep(hold).await;
            manager.release(&handle).await;
            Ok::<_, MuxError>(())
        }));
    }

    let mut failures = 0usize;
    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Stream failed: {}", e);
                failures += 1;
            }
            Err(e) => {
                error!("Stream task panicked: {}", e);
                failures += 1;
            }
        }
    }

    let stats = manager.stats().await;
    let report = serde_json::to_string_pretty(&stats).map_err(std::io::Error::other)?;
    println!("{}", report);

    shutdown.cancel();
    sweeper.await.ok();

    info!(failures, "Done");
    Ok(())
}

fn parse_destination(value: &str) -> Result<Destination> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| MuxError::Config(format!("Destination must be host:port, got {}", value)))?;

    let port = port
        .parse::<u16>()
        .map_err(|e| MuxError::Config(format!("Invalid destination port {}: {}", port, e)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    Ok(Destination::tcp(host, port))
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(level)
        .map_err(|e| MuxError::Config(format!("Invalid log level: {}", e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    Ok(())
}
