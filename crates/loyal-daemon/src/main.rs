//! loyal-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, resolves config,
//! connects storage, starts the reconciliation worker, wires middleware and
//! serves HTTP until Ctrl-C.  All route handlers live in `routes.rs`; all
//! shared state types live in `state.rs`.

use std::sync::Arc;

use anyhow::Context;
use axum::http::Method;
use loyal_accrual::HttpAccrualClient;
use loyal_config::ServiceConfig;
use loyal_daemon::{routes, state};
use loyal_db::PgLedgerStore;
use loyal_ledger::LedgerStore;
use loyal_runtime::{ReconciliationWorker, RetryPolicy, WorkerConfig};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cfg = ServiceConfig::from_env_and_args()?;
    info!(
        run_address = %cfg.run_address,
        database = %cfg.redacted_database_uri(),
        accrual = %cfg.accrual_address,
        config_hash = %cfg.config_hash(),
        "configuration resolved"
    );

    let pool = loyal_db::connect(&cfg.database_uri, cfg.db_max_connections).await?;
    loyal_db::migrate(&pool).await?;
    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool));

    let authority = HttpAccrualClient::new_with_timeout(
        cfg.accrual_address.clone(),
        cfg.worker.query_timeout,
    )
    .context("build accrual client failed")?;

    let worker = ReconciliationWorker::new(
        Arc::clone(&store),
        Arc::new(authority),
        worker_config(&cfg),
    )
    .spawn();

    let shared = Arc::new(state::AppState::new(
        store,
        worker.queue(),
        Some(worker.stats_reader()),
    ));

    let app = routes::build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors());

    let listener = tokio::net::TcpListener::bind(&cfg.run_address)
        .await
        .with_context(|| format!("bind {} failed", cfg.run_address))?;
    info!("loyal-daemon listening on http://{}", cfg.run_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    info!("http server stopped; draining reconciliation worker");
    worker.shutdown().await?;
    info!("loyal-daemon stopped");

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn worker_config(cfg: &ServiceConfig) -> WorkerConfig {
    let w = &cfg.worker;
    WorkerConfig {
        concurrency: w.concurrency,
        resync_interval: w.resync_interval,
        policy: RetryPolicy {
            max_attempts: w.max_attempts,
            retry_delay: w.retry_delay,
            rate_limit_cooldown: w.rate_limit_cooldown,
            honor_retry_after: w.honor_retry_after,
            max_rate_limit_cooldown: w.max_rate_limit_cooldown,
        },
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler failed; shutting down");
    }
}

/// CORS for the user API: any origin, the verbs the routes use.
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
