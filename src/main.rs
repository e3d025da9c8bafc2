//! Redirect engine server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────▶ http::server ──▶ routing::Redirector ──▶ rules::RuleCache ──▶ RuleSet (exact + patterns)
//!                 │                   │                       ▲
//!                 │                   ├─ conditions (selected rule only)
//!                 │                   └─ rules::HitTracker ─▶ HitFlusher ─▶ RuleStore
//!                 ▼                                           │
//!     ◀────── 301/302/303/307/308 | 410 | 404 ─▶ NotFoundLog   │ invalidate
//!                                                             │
//!     Admin API ──▶ RuleManager (writes) ─────────────────────┤
//!               ──▶ analysis (chains, duplicates, tester, export)
//!               ──▶ aging::AgingEngine ◀── AgingScheduler ────┘
//!
//!     config file ──▶ ConfigWatcher ──▶ AppState::apply_config
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use redirect_engine::admin::setup_admin_router;
use redirect_engine::aging::AgingScheduler;
use redirect_engine::config::{load_config, ConfigWatcher, EngineConfig};
use redirect_engine::http::{AppState, HttpServer};
use redirect_engine::lifecycle::{wait_for_signal, Shutdown};
use redirect_engine::notfound::NotFoundSweeper;
use redirect_engine::observability::{logging, metrics};
use redirect_engine::rules::{HitFlusher, JsonRuleStore, RuleStore};

#[derive(Parser)]
#[command(name = "redirect-engine", version, about = "Redirect and rewrite rule server")]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "REDIRECT_ENGINE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "redirect-engine starting");

    let store: Arc<dyn RuleStore> = match &config.store.path {
        Some(path) => Arc::new(JsonRuleStore::open(path)?),
        None => {
            tracing::warn!("No store.path configured, rules live in memory only");
            Arc::new(JsonRuleStore::in_memory())
        }
    };

    tracing::info!(
        bind_address = %config.server.bind_address,
        cache_ttl_secs = config.cache.ttl_secs,
        excluded_paths = config.matching.excluded_paths.len(),
        aging_enabled = config.aging.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let state = AppState::new(config.clone(), store.clone());
    let shutdown = Shutdown::new();
    let mut tasks = Vec::new();

    if let Some(tracker) = state.hits.clone() {
        let flusher = HitFlusher::new(
            tracker,
            store.clone(),
            Duration::from_secs(config.matching.hit_flush_interval_secs),
        );
        tasks.push(tokio::spawn(flusher.run(shutdown.subscribe())));
    }

    let scheduler = AgingScheduler::new(
        state.aging.clone(),
        Duration::from_secs(config.aging.interval_secs),
    );
    tasks.push(tokio::spawn(scheduler.run(shutdown.subscribe())));

    let sweeper = NotFoundSweeper::new(
        state.not_found.clone(),
        Duration::from_secs(config.not_found.sweep_interval_secs),
    );
    tasks.push(tokio::spawn(sweeper.run(shutdown.subscribe())));

    // The watcher stops when dropped; keep it for the life of the process.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let reload_state = state.clone();
            let mut reload_shutdown = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(new_config) = updates.recv() => reload_state.apply_config(new_config),
                        _ = reload_shutdown.recv() => break,
                    }
                }
            }));
            match watcher.run() {
                Ok(w) => Some(w),
                Err(e) => {
                    tracing::error!(error = %e, "Config watcher failed to start, hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
        let admin_app = setup_admin_router(state.clone());
        let mut admin_shutdown = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let served = axum::serve(admin_listener, admin_app)
                .with_graceful_shutdown(async move {
                    let _ = admin_shutdown.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API server failed");
            }
        }));
    }

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    let server = HttpServer::new(state);
    let server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    wait_for_signal().await;
    tracing::info!("Shutting down");
    shutdown.trigger();

    server_task.await??;
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Background task ended abnormally");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
