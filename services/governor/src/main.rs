use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use quota_hub_governor::api;
use quota_hub_governor::config::GovernorConfig;
use quota_hub_governor::storage::QuotaDatabase;
use quota_hub_governor::usage::InMemoryCounterStore;

const COUNTER_PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    let config = GovernorConfig::from_env()?;
    init_tracing(&config.log_level)?;

    let host = config.server_host.clone();
    let port = config.server_port;

    info!(
        host = %host,
        port,
        data_dir = %config.data_dir.display(),
        "starting quota governor"
    );

    let plans = Arc::new(config.load_plans()?);
    info!(plans = ?plans.plan_names(), "plan catalog loaded");

    let database = Arc::new(QuotaDatabase::new(config.data_dir.clone())?);
    let counters = InMemoryCounterStore::new();

    let reset_check = Duration::from_secs(config.credit_reset_check_secs);
    let auto_reset = config.enable_credit_auto_reset;
    let state = Arc::new(quota_hub_governor::build_state(
        database,
        Arc::new(counters.clone()),
        plans,
        config,
    ));

    let _reset_task = auto_reset.then(|| state.allocations.start_credit_reset_task(reset_check));
    let _purge_task = spawn_counter_purge(counters);

    let router = api::create_router(Arc::clone(&state));
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "quota governor listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("quota governor shutting down");
    Ok(())
}

fn init_tracing(default_level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))?;
    Ok(())
}

fn spawn_counter_purge(counters: InMemoryCounterStore) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(COUNTER_PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            let purged = counters.purge_expired();
            if purged > 0 {
                info!(purged, remaining = counters.len(), "purged expired usage counters");
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
