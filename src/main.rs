use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dealzo::admin::auth::{AuthService, SessionEvent};
use dealzo::admin::publish::PublishRules;
use dealzo::api::health::HealthState;
use dealzo::api::latency::LatencyStats;
use dealzo::api::routes::{router, ApiState};
use dealzo::config::{Config, SESSION_SWEEP_SECS};
use dealzo::db::DealStore;
use dealzo::error::Result;
use dealzo::feed::FeedSynchronizer;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let store = DealStore::open(&cfg.db_path).await?;
    let existing = store.list_all().await?.len();
    info!("Database ready at {} ({existing} deals)", cfg.db_path);

    // --- Live feed ---
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());
    let feed = Arc::new(FeedSynchronizer::spawn(
        store.clone(),
        Arc::clone(&health),
        Arc::clone(&latency),
    ));

    // --- Admin auth ---
    let auth = AuthService::new(store.pool().clone(), cfg.allow_signup);
    if !cfg.allow_signup {
        warn!("ALLOW_SIGNUP=false: new admin accounts cannot be created");
    }
    let mut session_events = auth.subscribe();
    tokio::spawn(async move {
        loop {
            match session_events.recv().await {
                Ok(SessionEvent::SignedIn(id)) => {
                    info!(event = "SIGNED_IN", user_id = id.user_id, email = %id.email, "Admin session opened");
                }
                Ok(SessionEvent::SignedOut(id)) => {
                    info!(event = "SIGNED_OUT", user_id = id.user_id, email = %id.email, "Admin session closed");
                }
                Err(RecvError::Lagged(n)) => warn!("Session audit lagged, {n} events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Session sweeper (background, every SESSION_SWEEP_SECS)
    let sweep_auth = Arc::clone(&auth);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(SESSION_SWEEP_SECS));
        loop {
            ticker.tick().await;
            let swept = sweep_auth.sweep_expired();
            if swept > 0 {
                info!(swept, "Expired admin sessions removed");
            }
        }
    });

    let rules = PublishRules::from_config(&cfg);
    info!(
        "Publishing: platforms=[{}] image hosts={} default expiry={}h",
        rules.platforms.join(", "),
        rules.images.hosts().len(),
        rules.default_expiry_hours,
    );

    // HTTP API server
    let api_state = ApiState {
        store: store.clone(),
        feed: Arc::clone(&feed),
        auth,
        rules: Arc::new(rules),
        health,
        latency,
        purge_chunk_size: cfg.purge_chunk_size,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    feed.shutdown().await;
    store.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
