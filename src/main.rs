//! BTC loan monitor — wires the price + alert core to the dashboard/API
//! boundary and runs them to completion under a graceful shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use loan_monitor::alerts::AlertEngine;
use loan_monitor::api::{self, ApiState};
use loan_monitor::bus::EventBus;
use loan_monitor::config::CoreConfig;
use loan_monitor::notify::{HttpNotifier, NullNotifier, Notifier};
use loan_monitor::oracle::OracleService;
use loan_monitor::store::json::JsonLoanStore;
use loan_monitor::store::LoanStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = CoreConfig::load();
    init_tracing(&config.log_level);

    info!(bind_addr = %config.bind_addr, state_path = %config.state_path, "starting loan monitor");

    let store: Arc<dyn LoanStore> = Arc::new(
        JsonLoanStore::open(&config.state_path)
            .with_context(|| format!("opening state file {}", config.state_path))?,
    );

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(HttpNotifier::new(url.clone())),
        None => Arc::new(NullNotifier),
    };

    let bus = EventBus::new();

    let oracle = Arc::new(OracleService::new(
        bus.clone(),
        config.aggregator_config(),
        config.price_poll_interval_ms,
    ));
    oracle.start();

    // Keep the last aggregated price in the store so dashboard reads have
    // something to show even between ticks.
    {
        let store = store.clone();
        let mut rx = bus.subscribe_price_update();
        tokio::spawn(async move {
            while let Ok(update) = rx.recv().await {
                store.set_last_price(update);
            }
        });
    }

    let alert_engine = Arc::new(AlertEngine::new(store.clone(), notifier, bus.clone()));
    alert_engine.spawn();

    let app = api::router(ApiState { store, bus });
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "dashboard/api listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("serving http")?;

    oracle.stop();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("loan_monitor={log_level},tower_http={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
