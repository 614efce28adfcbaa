use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use uplinkd_core::{Engine, UplinkConfig};
use uplinkd_netops::RealHostOps;
use uplinkd_web::{build_router, run_server, WebState};

const EXIT_OK: i32 = 0;
const EXIT_FATAL: i32 = 1;
const EXIT_CONFIG: i32 = 2;
const EXIT_WEB_BIND: i32 = 3;

/// Multi-radio WiFi connectivity daemon.
#[derive(Parser)]
#[command(name = "uplinkd", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

fn main() {
    std::process::exit(run());
}

#[tokio::main(flavor = "current_thread")]
async fn run() -> i32 {
    let cli = Cli::parse();

    let config = match UplinkConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("uplinkd: {e}");
            return EXIT_CONFIG;
        }
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    if let Err(e) = uplinkd_logging::init(&level) {
        eprintln!("uplinkd: {e}");
        return EXIT_FATAL;
    }

    let web_config = config.web.clone();
    let engine = Arc::new(Engine::new(config, Arc::new(RealHostOps::new())));
    engine.start();

    let (web_shutdown_tx, web_shutdown_rx) = tokio::sync::oneshot::channel();
    let mut web_task = None;
    if web_config.enabled {
        let addr = format!("{}:{}", web_config.host, web_config.port);
        let listener = match std::net::TcpListener::bind(&addr) {
            Ok(listener) => listener,
            Err(e) => {
                error!("cannot bind web surface on {}: {}", addr, e);
                stop_engine(Arc::clone(&engine)).await;
                return EXIT_WEB_BIND;
            }
        };

        let state = WebState {
            catalog: engine.catalog(),
            status: engine.status(),
            gateway: engine.gateway(),
            selector: engine.selector(),
        };
        let app = build_router(state);
        web_task = Some(tokio::spawn(async move {
            if let Err(e) = run_server(listener, app, web_shutdown_rx).await {
                error!("web server stopped with error: {e:#}");
            }
        }));
    }

    wait_for_shutdown_signal().await;
    info!("shutdown requested");

    let _ = web_shutdown_tx.send(());
    if let Some(task) = web_task {
        let _ = task.await;
    }
    stop_engine(engine).await;

    info!("uplinkd stopped");
    EXIT_OK
}

/// Worker joins are blocking; keep them off the async runtime.
async fn stop_engine(engine: Arc<Engine>) {
    let result = tokio::task::spawn_blocking(move || engine.shutdown()).await;
    if let Err(e) = result {
        warn!("engine shutdown task failed: {}", e);
    }
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(signal) => signal,
        Err(e) => {
            warn!("failed to register SIGTERM handler: {}", e);
            return;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(signal) => signal,
        Err(e) => {
            warn!("failed to register SIGINT handler: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {},
        _ = sigint.recv() => {},
    }
}
