use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    middleware::map_response,
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use reqwest::Client;
use tower_cookies::CookieManagerLayer;
use webhook_dash_storage::EventLog;
use webhook_dash_util::AppConfig;

use crate::events::EventStore;
use crate::identity::IdentityProvider;
use crate::render::DashboardSettings;
use crate::session::SessionManager;
use crate::{auth, dashboard, telemetry, webhook};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    events: EventStore,
    sessions: SessionManager,
    identity: IdentityProvider,
    webhook_secret: Option<Arc<[u8]>>,
    dashboard: Arc<DashboardSettings>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        config: &AppConfig,
        log: Arc<dyn EventLog>,
        http: Client,
    ) -> Self {
        let identity = IdentityProvider::new(
            config.oidc.clone(),
            &config.callback_url(),
            &config.post_logout_url(),
            http,
            config.upstream_timeout,
        );
        let webhook_secret = config
            .webhook_secret
            .as_deref()
            .map(|secret| Arc::from(secret.as_bytes()));

        Self {
            metrics,
            events: EventStore::new(log, config.upstream_timeout),
            sessions: SessionManager::new(!config.environment.is_development()),
            identity,
            webhook_secret,
            dashboard: Arc::new(DashboardSettings {
                timezone: config.display_timezone,
                refresh_interval: config.refresh_interval,
                base_path: config.base_path().to_string(),
            }),
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn events(&self) -> &EventStore {
        &self.events
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn identity(&self) -> &IdentityProvider {
        &self.identity
    }

    pub fn webhook_secret(&self) -> Option<&[u8]> {
        self.webhook_secret.as_deref()
    }

    pub fn dashboard(&self) -> &DashboardSettings {
        &self.dashboard
    }

    /// Dashboard location under the public base URL.
    pub fn home_path(&self) -> &str {
        &self.dashboard.base_path
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard::index))
        .route("/events", get(dashboard::events_fragment))
        .route("/login", get(auth::login))
        .route("/callback", get(auth::callback))
        .route("/logout", get(auth::logout))
        .route(
            "/webhook",
            any(webhook::handle).layer(map_response(webhook::security_headers)),
        )
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(CookieManagerLayer::new())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> Response {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
        .into_response()
}
