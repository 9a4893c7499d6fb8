use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use url::Url;

use crate::discovery::ProviderMetadata;

/// Client for the authorization-code flow against an OpenID Connect provider.
#[derive(Clone)]
pub struct OidcClient {
    http: Client,
    metadata: ProviderMetadata,
    client_id: String,
    client_secret: String,
}

impl OidcClient {
    /// Creates a client from already resolved provider metadata.
    pub fn new(
        metadata: ProviderMetadata,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        http: Client,
    ) -> Self {
        Self {
            http,
            metadata,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Resolves the provider metadata from the issuer and builds a client.
    pub async fn discover(
        issuer: &Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        http: Client,
    ) -> Result<Self, OidcError> {
        let metadata = ProviderMetadata::fetch(&http, issuer).await?;
        Ok(Self::new(metadata, client_id, client_secret, http))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Builds the authorization URL with PKCE parameters.
    pub fn authorize_url(&self, params: &AuthorizeUrlParams<'_>) -> Url {
        let mut url = self.metadata.authorization_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.client_id);
            query.append_pair("redirect_uri", params.redirect_uri);
            query.append_pair("response_type", "code");
            query.append_pair("scope", &params.scopes.join(" "));
            query.append_pair("code_challenge", params.code_challenge);
            query.append_pair("code_challenge_method", "S256");
            if let Some(state) = params.state {
                query.append_pair("state", state);
            }
        }

        url
    }

    /// Exchanges an authorization code and its PKCE verifier for tokens.
    ///
    /// Authorization codes are single-use, so callers must not retry this.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, OidcError> {
        let response = self
            .http
            .post(self.metadata.token_endpoint.clone())
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
                ("code_verifier", code_verifier),
            ])
            .send()
            .await?;

        parse_json(response).await
    }

    /// Fetches the claims for the access token from the userinfo endpoint.
    pub async fn userinfo(&self, access_token: &str) -> Result<UserInfo, OidcError> {
        let url = self
            .metadata
            .userinfo_endpoint
            .clone()
            .ok_or(OidcError::MissingEndpoint("userinfo_endpoint"))?;
        let response = self.http.get(url).bearer_auth(access_token).send().await?;

        parse_json(response).await
    }

    /// Builds the RP-initiated logout URL.
    pub fn end_session_url(
        &self,
        id_token_hint: &str,
        post_logout_redirect_uri: &str,
    ) -> Result<Url, OidcError> {
        let mut url = self
            .metadata
            .end_session_endpoint
            .clone()
            .ok_or(OidcError::MissingEndpoint("end_session_endpoint"))?;
        url.query_pairs_mut()
            .append_pair("id_token_hint", id_token_hint)
            .append_pair("post_logout_redirect_uri", post_logout_redirect_uri)
            .append_pair("client_id", &self.client_id);

        Ok(url)
    }
}

/// Parameters required to generate an authorization URL.
pub struct AuthorizeUrlParams<'a> {
    pub redirect_uri: &'a str,
    pub code_challenge: &'a str,
    pub scopes: &'a [&'a str],
    pub state: Option<&'a str>,
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Standard claims returned by the userinfo endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl UserInfo {
    /// Most human-friendly identifier available.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.preferred_username.as_deref())
            .or(self.email.as_deref())
            .unwrap_or(&self.sub)
    }
}

/// Errors that can occur during OIDC interactions.
#[derive(Debug, Error)]
pub enum OidcError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("provider metadata does not advertise {0}")]
    MissingEndpoint(&'static str),
}

impl OidcError {
    /// Whether repeating an idempotent call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Self::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

pub(crate) async fn parse_json<T>(response: Response) -> Result<T, OidcError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(OidcError::Status { status, body });
    }

    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::borrow::Cow;

    fn metadata(base: &str) -> ProviderMetadata {
        ProviderMetadata {
            issuer: base.to_string(),
            authorization_endpoint: Url::parse(&format!("{base}/auth")).expect("url"),
            token_endpoint: Url::parse(&format!("{base}/token")).expect("url"),
            userinfo_endpoint: Some(Url::parse(&format!("{base}/me")).expect("url")),
            end_session_endpoint: Some(Url::parse(&format!("{base}/logout")).expect("url")),
            code_challenge_methods_supported: vec!["S256".to_string()],
        }
    }

    fn client(base: &str) -> OidcClient {
        OidcClient::new(
            metadata(base),
            "client",
            "secret",
            Client::builder().build().expect("client"),
        )
    }

    #[test]
    fn authorize_url_contains_expected_parameters() {
        let client = client("https://acme.onelogin.com/oidc/2");
        let url = client.authorize_url(&AuthorizeUrlParams {
            redirect_uri: "https://example.com/callback",
            code_challenge: "challenge",
            scopes: &["openid", "profile", "email"],
            state: None,
        });

        assert!(url
            .as_str()
            .starts_with("https://acme.onelogin.com/oidc/2/auth?"));
        let query: Vec<(Cow<'_, str>, Cow<'_, str>)> = url.query_pairs().collect();
        assert!(query.contains(&(Cow::Borrowed("client_id"), Cow::Borrowed("client"))));
        assert!(query.contains(&(Cow::Borrowed("response_type"), Cow::Borrowed("code"))));
        assert!(query.contains(&(Cow::Borrowed("code_challenge"), Cow::Borrowed("challenge"))));
        assert!(query.contains(&(
            Cow::Borrowed("code_challenge_method"),
            Cow::Borrowed("S256")
        )));
        assert!(query.contains(&(
            Cow::Borrowed("scope"),
            Cow::Borrowed("openid profile email")
        )));
        assert!(!query.iter().any(|(k, _)| k == "state"));
    }

    #[tokio::test]
    async fn exchange_code_returns_tokens() {
        let server = MockServer::start_async().await;
        let client = client(&server.url(""));

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/token")
                    .body_contains("grant_type=authorization_code")
                    .body_contains("code=test-code")
                    .body_contains("code_verifier=verifier");
                then.status(200).json_body(json!({
                    "access_token": "access",
                    "id_token": "id.token.value",
                    "expires_in": 3600,
                    "token_type": "Bearer"
                }));
            })
            .await;

        let response = client
            .exchange_code("test-code", "verifier", "https://example.com/callback")
            .await
            .expect("exchange");
        mock.assert_async().await;
        assert_eq!(response.access_token, "access");
        assert_eq!(response.id_token.as_deref(), Some("id.token.value"));
        assert_eq!(response.refresh_token, None);
    }

    #[tokio::test]
    async fn rejected_code_returns_status_error() {
        let server = MockServer::start_async().await;
        let client = client(&server.url(""));

        server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(400).body(r#"{"error":"invalid_grant"}"#);
            })
            .await;

        let err = client
            .exchange_code("used-code", "verifier", "https://example.com/callback")
            .await
            .expect_err("should error");
        match &err {
            OidcError::Status { status, body } => {
                assert_eq!(*status, StatusCode::BAD_REQUEST);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn userinfo_sends_bearer_token() {
        let server = MockServer::start_async().await;
        let client = client(&server.url(""));

        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/me")
                    .header("Authorization", "Bearer access");
                then.status(200).json_body(json!({
                    "sub": "user-1",
                    "email": "ada@example.com"
                }));
            })
            .await;

        let info = client.userinfo("access").await.expect("userinfo");
        mock.assert_async().await;
        assert_eq!(info.sub, "user-1");
        assert_eq!(info.display_name(), "ada@example.com");
    }

    #[test]
    fn end_session_url_carries_hint_and_redirect() {
        let client = client("https://acme.onelogin.com/oidc/2");
        let url = client
            .end_session_url("id-token", "https://example.com/")
            .expect("url");

        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(url.path(), "/oidc/2/logout");
        assert!(query.contains(&("id_token_hint".to_string(), "id-token".to_string())));
        assert!(query.contains(&(
            "post_logout_redirect_uri".to_string(),
            "https://example.com/".to_string()
        )));
    }

    #[test]
    fn end_session_url_requires_endpoint() {
        let mut metadata = metadata("https://login.example.com");
        metadata.end_session_endpoint = None;
        let client = OidcClient::new(metadata, "client", "secret", Client::new());

        let err = client
            .end_session_url("id-token", "https://example.com/")
            .expect_err("should error");
        assert!(matches!(err, OidcError::MissingEndpoint("end_session_endpoint")));
    }
}
