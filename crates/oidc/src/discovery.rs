use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::client::{parse_json, OidcError};

const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

/// Subset of the provider metadata document this application relies on.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    #[serde(default)]
    pub userinfo_endpoint: Option<Url>,
    #[serde(default)]
    pub end_session_endpoint: Option<Url>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

impl ProviderMetadata {
    /// Fetches `/.well-known/openid-configuration` below the issuer URL.
    pub async fn fetch(http: &Client, issuer: &Url) -> Result<Self, OidcError> {
        let url = discovery_url(issuer)?;
        let response = http.get(url).send().await?;
        parse_json(response).await
    }

    /// Whether the provider advertises S256 PKCE. Providers that omit the
    /// field are assumed to support it.
    pub fn supports_s256(&self) -> bool {
        self.code_challenge_methods_supported.is_empty()
            || self
                .code_challenge_methods_supported
                .iter()
                .any(|method| method == "S256")
    }
}

/// Builds the discovery document URL, keeping any issuer path segment.
pub fn discovery_url(issuer: &Url) -> Result<Url, url::ParseError> {
    let mut base = issuer.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(DISCOVERY_PATH)
}
