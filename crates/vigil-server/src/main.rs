//! vigil standalone server

mod config;
mod ingest;
mod pipeline;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use mio::net::{TcpListener, UdpSocket};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_core::time::SystemClock;
use vigil_core::{EventLoop, LoopPool, ReactorConfig, ShutdownToken};

use crate::config::ServerConfig;
use crate::ingest::{Ingest, IngestStats};

/// vigil - event stream monitoring server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("vigil={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting vigil server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => {
            info!("Config file: {}", path.display());
            ServerConfig::load(path)?
        }
        None => ServerConfig::default(),
    };

    let token = ShutdownToken::new();
    let mut signals = Signals::new([SIGINT, SIGTERM]).context("failed to install signal handlers")?;
    let signal_handle = signals.handle();
    let signal_token = token.clone();
    let signal_thread = thread::Builder::new()
        .name("vigil-signals".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                info!(signal, "shutdown requested");
                signal_token.cancel();
            }
        })
        .context("failed to spawn signal thread")?;

    let stats = Arc::new(IngestStats::default());
    let root = Arc::new(pipeline::build(
        &config.pipeline,
        SystemClock,
        pipeline::log_notify(),
    ));
    let ingest = Ingest::new(root, Arc::clone(&stats));

    let reactor = ReactorConfig {
        threads: config.threads,
        ..ReactorConfig::default()
    };
    let pool = LoopPool::spawn(&reactor, &token, |_| {}).context("failed to start worker loops")?;
    if let Some(first) = pool.handle(0) {
        first
            .add_periodic_task(config.stats_interval_secs, move || stats.log())
            .context("failed to schedule stats task")?;
    }

    // The acceptor loop takes the id after the workers.
    let mut acceptor = EventLoop::with_shutdown(config.threads, &reactor, &token)
        .context("failed to create acceptor loop")?;
    let listener = TcpListener::bind(config.tcp_addr)
        .with_context(|| format!("failed to bind tcp {}", config.tcp_addr))?;
    let socket = UdpSocket::bind(config.udp_addr)
        .with_context(|| format!("failed to bind udp {}", config.udp_addr))?;

    ingest::listen_tcp(&mut acceptor, listener, pool.handles().to_vec(), ingest.clone())?;
    ingest::listen_udp(&mut acceptor, socket, ingest)?;
    info!(tcp = %config.tcp_addr, udp = %config.udp_addr, workers = pool.len(), "listening");

    let served = acceptor.run();
    token.cancel();
    let joined = pool.join();

    signal_handle.close();
    if signal_thread.join().is_err() {
        warn!("signal thread panicked");
    }

    served.context("acceptor loop failed")?;
    joined.context("worker loop failed")?;
    info!("vigil stopped");
    Ok(())
}
