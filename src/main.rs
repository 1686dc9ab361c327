//! dex-indexer entry point.
//!
//! Connects to PostgreSQL, starts the live pair sync and the history
//! scheduler, and serves the status endpoints.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use dex_indexer::api;
use dex_indexer::app_state::AppState;
use dex_indexer::clients::{
    AeChainClient, ChainClient, HttpPriceOracle, MdwClient, Middleware, NoPriceOracle, PriceOracle,
};
use dex_indexer::config::IndexerConfig;
use dex_indexer::persistence::{PersistenceGateway, PostgresGateway};
use dex_indexer::realtime::RealtimeClient;
use dex_indexer::service::{
    ErrorLedger, HistoryImporter, HistoryValidator, ImporterSettings, PairSyncService,
    PairSyncSettings, RunGuard, TaskScheduler,
};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = IndexerConfig::from_env()?;
    init_tracing(config.log_json);
    tracing::info!(
        addr = %config.listen_addr,
        factory = %config.factory_address,
        "starting dex-indexer"
    );

    // Persistence
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .min_connections(config.database_min_connections)
        .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
        .connect(&config.database_url)
        .await
        .context("connecting to PostgreSQL")?;
    let postgres = PostgresGateway::new(pool);
    postgres.migrate().await.context("running migrations")?;
    let gateway: Arc<dyn PersistenceGateway> = Arc::new(postgres);

    // Upstream clients
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("building HTTP client")?;
    let mdw = Arc::new(MdwClient::new(
        http.clone(),
        config.middleware_url.clone(),
        config.middleware_page_limit,
        config.cache_capacity,
    ));
    let chain: Arc<dyn ChainClient> = Arc::new(AeChainClient::new(
        http.clone(),
        config.node_url.clone(),
        Arc::clone(&mdw),
        config.factory_address.clone(),
        config.cache_capacity,
    ));
    let middleware: Arc<dyn Middleware> = mdw;
    let prices: Arc<dyn PriceOracle> = match &config.price_oracle_url {
        Some(url) => Arc::new(HttpPriceOracle::new(http, url.clone(), config.cache_capacity)),
        None => Arc::new(NoPriceOracle),
    };
    let realtime = Arc::new(RealtimeClient::new(
        config.middleware_ws_url.clone(),
        config.ping_interval,
        config.pong_timeout,
    ));

    // Services
    let ledger = ErrorLedger::new(Arc::clone(&gateway), config.error_suppression_hours);
    let pair_sync = Arc::new(PairSyncService::new(
        Arc::clone(&chain),
        Arc::clone(&gateway),
        PairSyncSettings {
            factory_address: config.factory_address.clone(),
            filter_invalid_pairs: config.filter_invalid_pairs,
            disconnect_policy: config.disconnect_policy,
            reconnect_delay: config.reconnect_delay,
        },
    ));
    let importer = Arc::new(HistoryImporter::new(
        Arc::clone(&chain),
        Arc::clone(&middleware),
        Arc::clone(&gateway),
        prices,
        ledger.clone(),
        ImporterSettings {
            sliding_window_blocks: config.sliding_window_blocks,
            default_ae_usd_price: config.default_ae_usd_price,
        },
    ));
    let validator = Arc::new(HistoryValidator::new(
        chain,
        middleware,
        Arc::clone(&gateway),
        ledger,
        config.validation_window_blocks,
    ));
    let run_guard = Arc::new(RunGuard::new());
    let scheduler = Arc::new(TaskScheduler::new(
        importer,
        validator,
        Arc::clone(&run_guard),
        config
            .history_import_enabled
            .then(|| Duration::from_secs(config.import_interval_secs)),
        config
            .history_validation_enabled
            .then(|| Duration::from_secs(config.validation_interval_secs)),
    ));

    // Background tasks
    let live_sync = {
        let pair_sync = Arc::clone(&pair_sync);
        let realtime = Arc::clone(&realtime);
        tokio::spawn(async move { pair_sync.start_sync(realtime).await })
    };
    tokio::spawn(Arc::clone(&scheduler).run());

    // Status server
    let app_state = AppState {
        gateway,
        run_guard,
        realtime: realtime.watch_state(),
    };
    let app = Router::new()
        .merge(api::build_router())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "status server listening");

    let mut server = tokio::spawn(async move { axum::serve(listener, app).await });
    tokio::select! {
        served = &mut server => served.context("status server task panicked")??,
        synced = live_sync => {
            synced.context("live sync task panicked")??;
            tracing::warn!("live sync stopped, serving status only");
            server.await.context("status server task panicked")??;
        }
    }

    Ok(())
}
