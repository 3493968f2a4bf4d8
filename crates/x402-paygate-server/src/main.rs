use std::sync::Arc;
use std::time::Duration;

use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::Logger, web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use x402::{FacilitatorClient, InMemorySettlementStore, SettlementStore, SqliteSettlementStore};

use x402_paygate_server::{
    config::{GatewayConfig, IN_MEMORY_DB},
    confirmation::MeteredSource,
    cors::build_cors,
    metrics::register_metrics,
    routes,
    state::AppState,
};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match GatewayConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();
    let rate_limit_rpm = config.rate_limit_rpm;
    let poll_interval = Duration::from_millis(config.confirmation_poll_ms);
    let retention = config.effective_retention_seconds();

    tracing::info!("Starting x402-paygate on port {}", port);
    tracing::info!("Receiver wallet: {:#x}", config.receiver_wallet);
    tracing::info!("Network: {} (chain {})", config.network, config.chain_id);
    tracing::info!("Accepted schemes: {}", config.accepted_schemes.join(", "));
    tracing::info!("Facilitator URL: {}", config.facilitator_url);
    tracing::info!(
        "HMAC auth: {}",
        if config.hmac_secret.is_some() {
            "enabled"
        } else {
            "disabled (dev mode)"
        }
    );

    let store: Arc<dyn SettlementStore> = if config.settlement_db_path == IN_MEMORY_DB {
        tracing::warn!(
            "Using in-memory settlement store; replay protection resets on restart"
        );
        Arc::new(InMemorySettlementStore::new())
    } else {
        match SqliteSettlementStore::open(&config.settlement_db_path) {
            Ok(s) => {
                tracing::info!("Settlement store at: {}", config.settlement_db_path);
                Arc::new(s)
            }
            Err(e) => {
                tracing::error!("Failed to open settlement store: {}", e);
                std::process::exit(1);
            }
        }
    };

    let facilitator =
        match FacilitatorClient::new(&config.facilitator_url, config.hmac_secret.clone()) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("Failed to create facilitator client: {}", e);
                std::process::exit(1);
            }
        };

    register_metrics();

    let state = match AppState::new(config, store) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = state
        .tracker()
        .start_confirmation_worker(Arc::new(MeteredSource::new(facilitator)), poll_interval)
    {
        tracing::error!("Failed to start confirmation worker: {}", e);
        std::process::exit(1);
    }
    // Also catches settlements left Pending by a previous run.
    state.tracker().start_expiry_sweeper(SWEEP_INTERVAL, retention);

    let state_data = web::Data::new(state);

    let governor_conf = match GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm)
        .finish()
    {
        Some(c) => c,
        None => {
            tracing::error!("Invalid rate limit: RATE_LIMIT_RPM={}", rate_limit_rpm);
            std::process::exit(1);
        }
    };

    HttpServer::new(move || {
        App::new()
            .app_data(state_data.clone())
            .app_data(web::JsonConfig::default().limit(65_536))
            .wrap(Logger::default())
            .wrap(build_cors(&allowed_origins))
            .wrap(Governor::new(&governor_conf))
            .configure(routes::health::configure)
            .configure(routes::intel::configure)
            .configure(routes::settlements::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
