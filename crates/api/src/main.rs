use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use truemid_api::{routes, AppState};
use truemid_bus::MessageBus;
use truemid_core::config::{BusKind, Config};
use truemid_db::PgSymbolRegistry;
use truemid_exchanges_common::SymbolDirectory;
use truemid_pipeline::{factory, ProcessingCore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "truemid=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("Configuration error: {err:#}");
            std::process::exit(2);
        }
    };

    let seed_only = std::env::args().nth(1).as_deref() == Some("seed-markets");
    let result = if seed_only {
        seed_markets(&config).await
    } else {
        serve(config).await
    };

    if let Err(err) = result {
        error!("Fatal: {err:#}");
        std::process::exit(1);
    }
}

/// Load every configured exchange's market listing into the registry and
/// exit.
async fn seed_markets(config: &Config) -> Result<()> {
    let pool = truemid_db::connect(&config.database_url, truemid_db::pool::DEFAULT_POOL_SIZE)
        .await
        .context("connecting to database")?;
    truemid_db::MIGRATOR.run(&pool).await.context("running migrations")?;
    let registry = PgSymbolRegistry::new(pool);

    for exchange in &config.exchanges {
        let adapter = match factory::create_adapter(exchange) {
            Ok(adapter) => adapter,
            Err(err) => {
                warn!("{err:#}");
                continue;
            }
        };
        match adapter.list_markets().await {
            Ok(markets) => {
                registry.upsert_markets(exchange, &markets).await?;
                info!("Seeded {} markets for {exchange}", markets.len());
            }
            Err(err) => warn!("Unable to load markets for {exchange}: {err}"),
        }
    }
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting truemid on {}", config.bind_addr);
    info!("Exchanges: {:?}, symbols: {:?}", config.exchanges, config.symbols);

    if config.enable_metrics {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("starting metrics exporter")?;
        metrics::describe_counter!("db_inserts_total", "Rows written to the stream tables");
        info!("Metrics exporter on {addr}");
    }

    let pool = truemid_db::connect(&config.database_url, truemid_db::pool::DEFAULT_POOL_SIZE)
        .await
        .context("connecting to database")?;
    truemid_db::MIGRATOR.run(&pool).await.context("running migrations")?;
    let registry = PgSymbolRegistry::new(pool.clone());
    let directory: Arc<dyn SymbolDirectory> = Arc::new(registry.clone());

    let bus = match config.bus {
        BusKind::Memory => Arc::new(MessageBus::in_process()),
        BusKind::Redis => Arc::new(
            MessageBus::redis(&config.redis_url)
                .await
                .context("connecting to redis bus")?,
        ),
    };

    let core = ProcessingCore::new(Arc::clone(&bus), config.launch_workers);

    for exchange in &config.exchanges {
        let adapter = match factory::create_adapter(exchange) {
            Ok(adapter) => adapter,
            Err(err) => {
                warn!("{err:#}");
                continue;
            }
        };
        for symbol in &config.symbols {
            core.watch_trades(
                Arc::clone(&adapter),
                Arc::clone(&directory),
                symbol,
                config.retry_forever,
            )?;
            core.watch_spreads(
                Arc::clone(&adapter),
                Arc::clone(&directory),
                symbol,
                config.retry_forever,
            )?;
        }
    }
    core.consume_streams_to_db(&config.database_url).await?;

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/symbols", get(routes::list_symbols))
        .route("/true-mid-price/:symbol", get(routes::true_mid_price))
        .layer(CorsLayer::permissive())
        .with_state(AppState::new(registry, pool));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!("HTTP server failed: {err}");
        }
    });

    let shutdown = core.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            shutdown.cancel();
        }
    });

    core.run().await
}
