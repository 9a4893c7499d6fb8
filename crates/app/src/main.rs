mod auth;
mod dashboard;
mod events;
mod identity;
mod problem;
mod render;
mod router;
mod session;
mod telemetry;
mod upstream;
mod webhook;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tracing::{info, warn};
use webhook_dash_storage::{EventLog, KvRestEventLog, MemoryEventLog};
use webhook_dash_util::{load_env_file, AppConfig};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let http = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(config.upstream_timeout)
        .user_agent(concat!("webhook-dash/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let log: Arc<dyn EventLog> = match &config.kv {
        Some(kv) => Arc::new(KvRestEventLog::new(
            kv.url.clone(),
            kv.token.clone(),
            config.event_log_key.clone(),
            http.clone(),
        )),
        None => {
            warn!(stage = "app", "KV_REST_API_URL not set; events are kept in memory only");
            Arc::new(MemoryEventLog::new())
        }
    };

    if config.oidc.require().is_err() {
        warn!(stage = "app", "OIDC settings incomplete; dashboard login is unavailable");
    }

    let state = router::AppState::new(metrics, &config, log.clone(), http);

    let addr: SocketAddr = config.bind_addr;
    info!(
        stage = "app",
        %addr,
        env = %config.environment.as_str(),
        backend = log.backend(),
        public_url = %config.public_base_url,
        "starting HTTP server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
