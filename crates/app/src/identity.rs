use std::{sync::Arc, time::Duration};

use axum::http::StatusCode;
use reqwest::Client;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{info, warn};
use url::Url;
use webhook_dash_oidc::{OidcClient, OidcError, ProviderMetadata};
use webhook_dash_util::{ConfigError, OidcSettings};

use crate::problem::ProblemResponse;
use crate::upstream::{read_with_retry, Upstream};

/// Lazily discovered OpenID Connect provider.
///
/// Settings are validated and the discovery document fetched on first use,
/// so an instance without OIDC configuration still ingests webhooks. A
/// failed discovery is not cached and is attempted again on the next request.
#[derive(Clone)]
pub struct IdentityProvider {
    inner: Arc<Inner>,
}

struct Inner {
    settings: OidcSettings,
    redirect_uri: String,
    post_logout_redirect_uri: String,
    http: Client,
    deadline: Duration,
    client: OnceCell<OidcClient>,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("identity provider discovery failed: {0}")]
    Discovery(Upstream<OidcError>),
}

impl From<IdentityError> for ProblemResponse {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Config(err) => ProblemResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                err.to_string(),
            ),
            IdentityError::Discovery(err) => ProblemResponse::new(
                StatusCode::BAD_GATEWAY,
                "identity_provider_unavailable",
                err.to_string(),
            ),
        }
    }
}

impl IdentityProvider {
    pub fn new(
        settings: OidcSettings,
        redirect_uri: &Url,
        post_logout_redirect_uri: &Url,
        http: Client,
        deadline: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                redirect_uri: redirect_uri.to_string(),
                post_logout_redirect_uri: post_logout_redirect_uri.to_string(),
                http,
                deadline,
                client: OnceCell::new(),
            }),
        }
    }

    pub fn redirect_uri(&self) -> &str {
        &self.inner.redirect_uri
    }

    pub fn post_logout_redirect_uri(&self) -> &str {
        &self.inner.post_logout_redirect_uri
    }

    /// Deadline applied to each call made against the provider.
    pub fn deadline(&self) -> Duration {
        self.inner.deadline
    }

    pub async fn client(&self) -> Result<&OidcClient, IdentityError> {
        self.inner
            .client
            .get_or_try_init(|| async {
                let credentials = self.inner.settings.require()?;
                let metadata = read_with_retry(
                    "oidc_discovery",
                    self.inner.deadline,
                    OidcError::is_transient,
                    || ProviderMetadata::fetch(&self.inner.http, &credentials.issuer),
                )
                .await
                .map_err(IdentityError::Discovery)?;

                if !metadata.supports_s256() {
                    warn!(stage = "auth", issuer = %metadata.issuer, "provider does not advertise S256 PKCE support");
                }
                info!(stage = "auth", issuer = %metadata.issuer, "identity provider discovered");

                Ok(OidcClient::new(
                    metadata,
                    credentials.client_id,
                    credentials.client_secret,
                    self.inner.http.clone(),
                ))
            })
            .await
    }
}
