//! Premium Sentinel - Main Entry Point
//!
//! Boots the HTTP surface and the watchman scheduler against a shared
//! SQLite store. Mock mode runs the whole system with deterministic
//! fixture data and no outbound vendor calls.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use premium_sentinel::alert::AlertLedger;
use premium_sentinel::analysis::Analyzer;
use premium_sentinel::api::{self, AppState};
use premium_sentinel::config::Config;
use premium_sentinel::provider::{build_macro_provider, build_market_provider};
use premium_sentinel::rate_limit::RateLimiter;
use premium_sentinel::store::Store;
use premium_sentinel::synthesis::StubSynthesizer;
use premium_sentinel::watchman::Watchman;
use tokio::sync::Mutex;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Premium Sentinel CLI
#[derive(Parser)]
#[command(name = "premium-sentinel")]
#[command(version, about = "Premium-selling advisory engine with a supervised watchman")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and the watchman scheduler (default)
    Serve {
        /// Bind address override for the HTTP API
        #[arg(long)]
        bind: Option<String>,

        /// Force mock providers regardless of configured credentials
        #[arg(long)]
        mock: bool,

        /// SQLite database path override
        #[arg(long)]
        db: Option<String>,
    },

    /// Run the analysis pipeline once for a ticker and print the report
    Analyze {
        /// Ticker symbol to analyze
        ticker: String,

        /// Force mock providers regardless of configured credentials
        #[arg(long)]
        mock: bool,
    },

    /// Show pending recommendations and open positions from the store
    Status {
        /// SQLite database path override
        #[arg(long)]
        db: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    match cli.command {
        Some(Commands::Analyze { ticker, mock }) => run_analyze(&ticker, mock).await,
        Some(Commands::Status { db }) => show_status(db.as_deref()),
        Some(Commands::Serve { bind, mock, db }) => serve(bind, mock, db).await,
        None => serve(None, false, None).await,
    }
}

async fn serve(bind: Option<String>, mock: bool, db: Option<String>) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(bind) = bind {
        config.server.bind_addr = bind;
    }
    if let Some(db) = db {
        config.server.db_path = db;
    }
    if mock {
        config.providers.mock_mode = true;
    }
    config.validate()?;

    info!("🛡️  Premium Sentinel v{}", env!("CARGO_PKG_VERSION"));
    if config.providers.mock_mode {
        info!("📝 Mock providers active, no vendor calls will be made");
    } else {
        warn!("📡 Live market data mode, vendor rate limits apply");
    }

    let store = Arc::new(Mutex::new(
        Store::open(&config.server.db_path)
            .with_context(|| format!("failed to open store at {}", config.server.db_path))?,
    ));

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.providers.fetch_timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let provider = build_market_provider(&config.providers, http.clone());
    let macro_calendar = build_macro_provider(&config.providers);
    let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
    let alerts = Arc::new(AlertLedger::new(
        store.clone(),
        http.clone(),
        config.alerts.clone(),
    ));

    let analyzer = Analyzer::new(
        provider.clone(),
        macro_calendar,
        limiter.clone(),
        store.clone(),
        Arc::new(StubSynthesizer),
        &config,
    );

    let watchman = Watchman::new(
        store.clone(),
        provider.clone(),
        limiter.clone(),
        alerts.clone(),
        config.risk.clone(),
        config.watchman.clone(),
    );
    let watchman_task = tokio::spawn(async move { watchman.run_forever().await });

    let state = Arc::new(AppState {
        analyzer,
        store,
        alerts,
        provider,
        limiter,
        risk: config.risk.clone(),
        universe: config.universe.clone(),
        mock_mode: config.providers.mock_mode,
    });
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    info!("🌐 Listening on {}", config.server.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    watchman_task.abort();
    info!("👋 Premium Sentinel shutdown complete");
    Ok(())
}

/// One-shot pipeline run, report printed as JSON. Uses an in-memory
/// store so a CLI experiment never pollutes the recommendation queue.
async fn run_analyze(ticker: &str, mock: bool) -> Result<()> {
    let mut config = Config::load()?;
    if mock {
        config.providers.mock_mode = true;
    }
    config.validate()?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.providers.fetch_timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let analyzer = Analyzer::new(
        build_market_provider(&config.providers, http.clone()),
        build_macro_provider(&config.providers),
        Arc::new(RateLimiter::new(&config.rate_limit)),
        Arc::new(Mutex::new(Store::open_in_memory()?)),
        Arc::new(StubSynthesizer),
        &config,
    );

    let report = analyzer.analyze(ticker, Utc::now()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn show_status(db: Option<&str>) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(db) = db {
        config.server.db_path = db.to_string();
    }
    let store = Store::open(&config.server.db_path)
        .with_context(|| format!("failed to open store at {}", config.server.db_path))?;

    let pending = store.list_recommendations(Some(
        premium_sentinel::store::models::RecommendationStatus::Pending,
    ))?;
    println!("Pending recommendations: {}", pending.len());
    for rec in &pending {
        println!(
            "  {} {} {} strike {} exp {} credit {}",
            rec.id, rec.ticker, rec.strategy, rec.strike, rec.expiry, rec.credit_est
        );
    }

    let positions = store.list_open_positions()?;
    println!("Open positions: {}", positions.len());
    let today = Utc::now().date_naive();
    for pos in &positions {
        println!(
            "  {} {} {} strike {} dte {} stage {}",
            pos.id,
            pos.ticker,
            pos.entry_data.strategy,
            pos.entry_data.short_strike,
            pos.dte(today),
            pos.lifecycle_stage
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("premium_sentinel=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}
