//! sockslink - Dual-role SOCKS5 proxy
//!
//! This is the main entry point for the sockslink binary.

use anyhow::Result;
use clap::Parser;
use sockslink::config::load_config;
use sockslink::net::{Dialer, DirectDialer};
use sockslink::socks::Socks5;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// sockslink - SOCKS5 proxy with optional upstream chaining
#[derive(Parser, Debug)]
#[command(name = "sockslink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level, args.json_log)?;

    let config = load_config(&args.config)?;

    info!("sockslink v{}", sockslink::VERSION);
    info!("configuration loaded from {:?}", args.config);
    info!("listening on {}", config.proxy.listen);

    let direct: Arc<dyn Dialer> = Arc::new(DirectDialer);

    // The server-side dialer either goes straight out or chains
    // through the configured upstream proxy.
    let s_dialer: Arc<dyn Dialer> = match &config.proxy.upstream {
        Some(upstream) => {
            info!("chaining through upstream SOCKS5 at {}", upstream.addr);
            Arc::new(Socks5::new(
                &upstream.addr,
                upstream.username.clone(),
                upstream.password.clone(),
                direct.clone(),
                direct.clone(),
            ))
        }
        None => direct.clone(),
    };

    let proxy = Arc::new(Socks5::new(
        &config.proxy.listen,
        None,
        None,
        direct,
        s_dialer,
    ));

    tokio::select! {
        _ = proxy.listen_and_serve() => {}
        _ = shutdown_signal() => {
            info!("shutdown signal received, exiting");
        }
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (on unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to setup SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Install the global tracing subscriber at the requested verbosity.
///
/// Unrecognized levels fall back to `info`.
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level: Level = level.parse().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    Ok(())
}
