mod agent;
mod collectors;
mod config;
mod delta;
mod http;
mod incident;
mod metrics;
mod remote;
mod state;
mod thresholds;

use agent::Agent;
use axum::serve;
use clap::Parser;
use collectors::counters::{select_interface, SystemSampler};
use collectors::host::describe_host;
use config::Config;
use metrics::Metrics;
use remote::MonitorClient;
use reqwest::Client;
use state::State;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thresholds::Thresholds;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hostwatchd")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Print host facts as JSON and exit.
    #[arg(long)]
    describe_host: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let http_client = Client::builder()
        .user_agent(concat!("hostwatchd/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new());

    if cli.describe_host {
        let facts = match describe_host(&http_client).await {
            Ok(facts) => facts,
            Err(err) => {
                error!(error = %err, "failed to collect host facts");
                std::process::exit(1);
            }
        };
        match serde_json::to_string_pretty(&facts) {
            Ok(text) => println!("{text}"),
            Err(err) => {
                error!(error = %err, "failed to encode host facts");
                std::process::exit(1);
            }
        }
        return;
    }

    let cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let iface = match select_interface(cfg.network.interface.as_deref()) {
        Ok(iface) => iface,
        Err(err) => {
            error!(error = %err, "cannot start without a network interface");
            std::process::exit(1);
        }
    };

    let sampler_iface = iface.clone();
    let sampler = match tokio::task::spawn_blocking(move || SystemSampler::new(sampler_iface)).await {
        Ok(sampler) => sampler,
        Err(err) => {
            error!(error = %err, "failed to start counter sampler");
            std::process::exit(1);
        }
    };

    let remote = match MonitorClient::new(&cfg.monitor) {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "failed to build monitor client");
            std::process::exit(1);
        }
    };

    info!(
        listen = %cfg.listen,
        interval_secs = cfg.interval_secs,
        iface = %iface,
        monitor = %cfg.monitor.server_url,
        client_id = %cfg.monitor.client_id,
        "starting hostwatchd"
    );

    let shared_state = Arc::new(RwLock::new(State::new(now_unix(), iface)));
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let cfg = cfg.clone();
        let metrics = metrics.clone();
        let http_state = shared_state.clone();
        let http_client = http_client.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, http_state, http_client);
            let addr: SocketAddr = match cfg.listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %cfg.listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to bind status server");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "status server error");
            }
        })
    };

    let tick_task = {
        let cfg = cfg.clone();
        let metrics = metrics.clone();
        let shared_state = shared_state.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut agent = Agent::new(
                sampler,
                remote,
                Thresholds::from(&cfg.thresholds),
            );
            if cfg.monitor.rehydrate_on_start {
                agent.rehydrate().await;
            }
            shared_state.write().await.sync_incidents(agent.incidents());

            // The next tick is only awaited once the previous one has fully
            // finished, and late ticks are dropped rather than bunched.
            let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("shutdown signal received, stopping tick loop");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = agent.tick(now_unix()).await;
                        metrics.record_tick(&report);
                        let snapshot = {
                            let mut guard = shared_state.write().await;
                            guard.record_tick(&report, agent.incidents());
                            guard.clone()
                        };
                        metrics.update_from_state(&snapshot);
                    }
                }
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("Ctrl+C received, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = tick_task.await;
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
