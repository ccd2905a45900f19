use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Duration;

use rover_gateway::cleanup::KillallCleaner;
use rover_gateway::dashboard;
use rover_gateway::gateway::{Gateway, GatewayOptions, SourceKind, DEFAULT_BROADCAST_HZ};
use rover_gateway::sensors::LoggingLink;

#[derive(Parser, Debug)]
#[command(name = "rover_gateway")]
#[command(about = "Onboard telemetry fusion and distribution gateway", long_about = None)]
struct Args {
    /// HTTP/WebSocket listen address
    #[arg(long, default_value = "0.0.0.0:3000")]
    listen: String,

    /// Directory holding the persisted JSON config files
    #[arg(long, default_value = "/data")]
    config_dir: PathBuf,

    /// Directory for telemetry log sessions (defaults to <config-dir>/logs)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Real-time debug output (orientation every 50th packet)
    #[arg(long)]
    debug: bool,

    /// Generate simulated hardware packets instead of reading the rover
    #[arg(long, conflicts_with = "packet_stream")]
    simulate: bool,

    /// Read newline-delimited JSON packets from this file, FIFO or serial bridge
    #[arg(long, value_name = "PATH")]
    packet_stream: Option<PathBuf>,

    /// WebSocket broadcast rate
    #[arg(long, default_value_t = DEFAULT_BROADCAST_HZ, value_parser = clap::value_parser!(u32).range(1..=1000))]
    broadcast_hz: u32,

    /// Process to terminate whenever it is found running (repeatable)
    #[arg(long = "kill-process", value_name = "NAME")]
    kill_processes: Vec<String>,
}

fn broadcast_interval(hz: u32) -> Duration {
    Duration::from_micros(1_000_000 / u64::from(hz.max(1)))
}

fn init_logging(debug: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if debug {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.format_timestamp_millis().init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let source = match (&args.packet_stream, args.simulate) {
        (Some(path), _) => SourceKind::JsonLines(path.clone()),
        (None, true) => SourceKind::Simulated,
        (None, false) => SourceKind::None,
    };
    let mut options = GatewayOptions {
        log_dir: args
            .log_dir
            .clone()
            .unwrap_or_else(|| args.config_dir.join("logs")),
        config_dir: args.config_dir.clone(),
        source,
        broadcast_interval: broadcast_interval(args.broadcast_hz),
        debug: args.debug,
        ..Default::default()
    };
    if !args.kill_processes.is_empty() {
        options.process_cleaner = Arc::new(KillallCleaner::new(args.kill_processes.clone()));
    }

    log::info!("Rover gateway {} starting", env!("CARGO_PKG_VERSION"));
    log::info!("  Config dir: {}", options.config_dir.display());
    log::info!("  Source: {:?}", options.source);
    log::info!("  Broadcast: {} Hz", args.broadcast_hz);

    // Serial writer is attached externally; until then commands are only logged
    let gateway = Arc::new(
        Gateway::new(options, Arc::new(LoggingLink)).context("failed to build gateway")?,
    );
    gateway.spawn_background();

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("cannot bind {}", args.listen))?;
    log::info!("Listening on http://{}", args.listen);

    axum::serve(listener, dashboard::router(gateway))
        .await
        .context("HTTP server failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_rate_bounds() {
        assert!(Args::try_parse_from(["rover_gateway", "--broadcast-hz", "5000"]).is_err());
        assert!(Args::try_parse_from(["rover_gateway", "--broadcast-hz", "0"]).is_err());

        let args = Args::try_parse_from(["rover_gateway", "--broadcast-hz", "1000"]).unwrap();
        assert_eq!(broadcast_interval(args.broadcast_hz), Duration::from_millis(1));
        assert_eq!(broadcast_interval(DEFAULT_BROADCAST_HZ), Duration::from_millis(50));
    }
}
