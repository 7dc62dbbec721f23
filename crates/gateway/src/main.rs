use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sha2::{Digest, Sha256};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tracing_subscriber::EnvFilter;

use ens_bus::{MessageBus, ResourceBroker, WebhookDispatcher};
use ens_domain::config::{Config, ConfigSeverity};
use ens_domain::memory::InMemoryStore;
use ens_gateway::cli::{Cli, Command, ConfigCommand};
use ens_gateway::sanitize::Sanitizer;
use ens_gateway::state::AppState;
use ens_gateway::api;
use ens_lifecycle::LifecycleManager;
use ens_policy::build_policy_stack;
use ens_proxy::ProviderRegistry;

/// Client request body cap: exactly 10 MiB.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Full-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Grace window for in-flight requests on shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, path) = ens_gateway::cli::load_config(&cli.config)?;
            tracing::info!(config = %path.display(), "configuration loaded");
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, path) = ens_gateway::cli::load_config(&cli.config)?;
            if !ens_gateway::cli::validate(&config, &path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _path) = ens_gateway::cli::load_config(&cli.config)?;
            ens_gateway::cli::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("ensemble {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("ENSEMBLE_LOG")
                .unwrap_or_else(|_| EnvFilter::new("info,ens_gateway=debug")),
        )
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("ensemble starting");

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

    // ── Message bus ──────────────────────────────────────────────────
    let bus = Arc::new(MessageBus::new(
        config.bus.history_capacity,
        config.bus.max_topics,
    ));
    tracing::info!(
        history = config.bus.history_capacity,
        max_topics = config.bus.max_topics,
        "message bus ready"
    );

    // ── Lifecycle manager ────────────────────────────────────────────
    let lifecycle = Arc::new(LifecycleManager::with_bus(
        config.lifecycle.clone(),
        Some(bus.clone()),
    ));
    tracing::info!(
        stale_ms = config.lifecycle.stale_threshold_ms,
        dead_ms = config.lifecycle.dead_threshold_ms,
        orphan_policy = ?config.lifecycle.orphan_policy,
        "lifecycle manager ready"
    );

    // ── Policy engine + guardian ─────────────────────────────────────
    let config_root = Config::default_path()
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stack = build_policy_stack(config.policy.preset, &config.policy.overrides, &config_root);
    let guardian = Arc::new(ens_policy::GuardianScanner::with_limits(
        "sentinel",
        config.policy.overrides.confidence_threshold.unwrap_or(0.5),
        config.policy.overrides.max_findings.unwrap_or(200),
    ));

    // ── Resource broker ──────────────────────────────────────────────
    let broker = Arc::new(ResourceBroker::new());
    tracing::info!("resource broker ready");

    // ── Provider registry ────────────────────────────────────────────
    let registry = Arc::new(ProviderRegistry::from_config(
        &config.providers,
        &config.aliases,
    ));
    if registry.is_empty() {
        tracing::warn!("no providers initialized — requests will fail to route");
    } else {
        tracing::info!(providers = registry.len(), "provider registry ready");
    }

    // ── Webhook dispatcher ───────────────────────────────────────────
    let webhooks = Arc::new(WebhookDispatcher::new(config.webhooks.clone()));
    webhooks
        .attach(&bus)
        .context("attaching webhook dispatcher to the bus")?;
    tracing::info!(endpoints = config.webhooks.len(), "webhook dispatcher ready");

    // ── Memory façade (in-memory in dev; the real service plugs in
    //    behind the same trait) ────────────────────────────────────────
    let memory: Arc<dyn ens_domain::memory::MemoryStore> = Arc::new(InMemoryStore::new());

    // ── API key (read once, hash for constant-time comparison) ───────
    let api_key_hash = match &config.auth.api_key {
        Some(key) if !key.is_empty() => {
            tracing::info!("API key auth enabled");
            Some(Sha256::digest(key.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!("API key auth DISABLED — set auth.api_key to enable");
            None
        }
    };

    let state = AppState {
        config: config.clone(),
        registry,
        bus: bus.clone(),
        lifecycle: lifecycle.clone(),
        broker,
        webhooks: webhooks.clone(),
        policy: Arc::new(stack.engine),
        rate_window: stack.rate_window.clone(),
        guardian,
        memory,
        api_key_hash,
        sanitizer: Arc::new(Sanitizer::new()),
    };

    // ── Periodic: lifecycle sweep ────────────────────────────────────
    {
        let lifecycle = lifecycle.clone();
        let interval_ms = config.lifecycle.heartbeat_interval_ms.max(1_000);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                interval.tick().await;
                match lifecycle.heal_tree() {
                    Ok(_report) => {}
                    Err(e) if e.is_disposed() => break,
                    Err(e) => tracing::warn!(error = %e, "lifecycle sweep failed"),
                }
            }
        });
    }

    // ── Periodic: webhook retry timer ────────────────────────────────
    {
        let webhooks = webhooks.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            loop {
                interval.tick().await;
                webhooks.tick().await;
            }
        });
    }

    // ── Periodic: rate-window pruning ────────────────────────────────
    {
        let window = stack.rate_window;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                window.prune(chrono::Utc::now().timestamp_millis() as u64);
            }
        });
    }

    // ── Router ───────────────────────────────────────────────────────
    let cors_layer = if config.cors {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };
    let app = api::router(state.clone())
        .layer(cors_layer)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(tower::limit::ConcurrencyLimitLayer::new(256))
        .with_state(state);

    // ── Bind + graceful shutdown ─────────────────────────────────────
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "ensemble listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested, draining in-flight requests");
        let _ = shutdown_tx.send(());
        // Stop accepting immediately; force-close stragglers after the
        // drain window.
        tokio::time::sleep(SHUTDOWN_DRAIN).await;
        tracing::warn!("drain window elapsed, forcing shutdown");
        std::process::exit(0);
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await
        .context("axum server error")?;

    lifecycle.dispose();
    bus.destroy();
    tracing::info!("ensemble stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
