use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::{Parser, Subcommand};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use sc_context::ContextStore;
use sc_domain::config::{Config, ConfigSeverity, CorsConfig};
use sc_engine::ExecutionEngine;
use sc_gateway::api;
use sc_gateway::session_lock::SessionLockMap;
use sc_gateway::state::AppState;
use sc_scenario::ScenarioRepository;

#[derive(Parser)]
#[command(name = "statecanvas", about = "Dialog state-flow engine service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway server (default).
    Serve,
    /// Print the version and exit.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Arc::new(Config::from_env());
            run_server(config).await
        }
        Some(Command::Version) => {
            println!("statecanvas {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sc_gateway=debug")),
        )
        .json()
        .init();
}

/// Start the gateway server with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("StateCanvas starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Scenario repository ──────────────────────────────────────────
    let repository = Arc::new(ScenarioRepository::new());
    match &config.scenario.dir {
        Some(dir) => tracing::info!(dir = %dir.display(), "scenario directory configured"),
        None => tracing::info!("no scenario directory — scenarios must be uploaded"),
    }

    // ── Context store ────────────────────────────────────────────────
    let store: Arc<dyn ContextStore> =
        sc_context::from_config(&config.context).context("initializing context store")?;

    // ── Execution engine ─────────────────────────────────────────────
    let engine = Arc::new(ExecutionEngine::new(
        store.clone(),
        Duration::from_millis(config.engine.turn_deadline_ms),
    ));
    tracing::info!(
        turn_deadline_ms = config.engine.turn_deadline_ms,
        "execution engine ready"
    );

    // ── Session locks (per-session concurrency) ──────────────────────
    let session_locks = Arc::new(SessionLockMap::new());

    let state = AppState {
        config: config.clone(),
        repository,
        engine,
        store,
        session_locks: session_locks.clone(),
    };

    // ── Periodic session-lock pruning ────────────────────────────────
    {
        let session_locks = session_locks.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                session_locks.prune_idle();
            }
        });
    }

    // ── CORS layer (config-aware) ────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);

    // ── Router ───────────────────────────────────────────────────────
    let app = api::router()
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_concurrent_requests,
        ))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "StateCanvas listening");

    axum::serve(listener, app)
        .await
        .context("axum server error")?;

    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may carry a trailing `*` wildcard for the port segment
/// (e.g. `http://localhost:*`). A literal `"*"` allows all origins
/// (not recommended for production).
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            // The port remainder must be digits only, so a prefix match
            // cannot be abused (e.g. "http://localhost:3000.evil.com").
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}
