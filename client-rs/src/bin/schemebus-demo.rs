//! Schemebus demo - one hub and two peers on an in-process host

use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;
use schemebus::{HubConfig, IpcHub, LocalHost, DEFAULT_SCHEME};
use schemebus_client::{ClientConfig, ConnectionState, IpcClient};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "schemebus-demo")]
#[command(about = "Run a schemebus hub with two peers exchanging events")]
#[command(version)]
struct Args {
    /// Scheme the hub answers on
    #[arg(long, default_value = DEFAULT_SCHEME, env = "SCHEMEBUS_SCHEME")]
    scheme: String,

    /// Milliseconds between demo rounds
    #[arg(long, default_value_t = 1000, env = "SCHEMEBUS_INTERVAL_MS")]
    interval_ms: u64,

    /// Number of rounds to run (0 runs until interrupted)
    #[arg(long, default_value_t = 5)]
    rounds: u64,

    /// Log level
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let host = LocalHost::new();
    let hub = IpcHub::new(&host, HubConfig::new().scheme(args.scheme.clone()))
        .context("Failed to set up hub")?;
    host.set_ready();

    hub.handle("host-info", |_| async {
        Ok(json!({
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "pid": std::process::id(),
        }))
    });
    hub.on("status", |event| {
        info!(source = ?event.source, values = ?event.values, "Hub got status");
    });

    let first = IpcClient::new(
        host.session(),
        ClientConfig::new().scheme(args.scheme.clone()).name("first"),
    );
    let second = IpcClient::new(
        host.session(),
        ClientConfig::new()
            .scheme(args.scheme.clone())
            .name("second")
            .stream_from_main(),
    );

    second.on("metrics", |event| {
        info!(values = ?event.values, "second got metrics");
    });
    second.on("random-numbers", |event| {
        info!(source = ?event.source, values = ?event.values, "second got random numbers");
    });

    second
        .state_receiver()
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .context("Client state channel closed")?;

    first
        .send("status", vec![json!("first is up")])
        .await
        .context("Failed to send status")?;

    info!(scheme = %args.scheme, interval_ms = args.interval_ms, "Schemebus demo starting");

    tokio::select! {
        result = run_rounds(&hub, &first, &args) => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping demo");
        }
    }

    first.disconnect().await;
    second.disconnect().await;
    hub.disconnect_all();

    info!("Schemebus demo stopped");
    Ok(())
}

async fn run_rounds(hub: &IpcHub, first: &IpcClient, args: &Args) -> Result<()> {
    let started = Instant::now();
    let mut interval = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut round = 0u64;

    while args.rounds == 0 || round < args.rounds {
        interval.tick().await;
        round += 1;

        let delivered = hub.send(
            "metrics",
            vec![json!({
                "round": round,
                "uptime_ms": started.elapsed().as_millis() as u64,
                "subscribers": hub.subscriber_count(),
            })],
        )?;

        let numbers: Vec<Value> = {
            let mut rng = rand::rng();
            (0..3).map(|_| json!(rng.random_range(0..100))).collect()
        };
        first
            .send_to("random-numbers", Some("second"), numbers)
            .await
            .context("Failed to send random numbers")?;

        match first.invoke::<Value>("host-info", vec![]).await {
            Ok(info) => info!(round = round, delivered = delivered, host = %info, "Round complete"),
            Err(e) => warn!(round = round, error = %e, "host-info failed"),
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
