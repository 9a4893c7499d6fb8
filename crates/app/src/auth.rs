use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use metrics::counter;
use rand::{rngs::OsRng, RngCore};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tower_cookies::Cookies;
use tracing::{debug, error, info, warn};
use url::Url;
use webhook_dash_oidc::{AuthorizeUrlParams, OidcError, UserInfo};

use crate::identity::IdentityError;
use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::session::SessionManager;
use crate::upstream::{read_with_retry, with_deadline};

const OIDC_SCOPES: &[&str] = &["openid", "profile", "email"];
const CODE_VERIFIER_LEN: usize = 64;

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// A viewer whose access token the provider accepted.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub claims: UserInfo,
}

impl Viewer {
    pub fn display_name(&self) -> &str {
        self.claims.display_name()
    }
}

pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
) -> Result<Response, ProblemResponse> {
    let identity = state.identity();
    let client = identity.client().await.map_err(|err| {
        error!(stage = "auth", error = %err, "cannot start login");
        ProblemResponse::from(err)
    })?;

    let code_verifier = generate_code_verifier();
    let code_challenge = compute_code_challenge(&code_verifier);
    let authorize_url = client.authorize_url(&AuthorizeUrlParams {
        redirect_uri: identity.redirect_uri(),
        code_challenge: &code_challenge,
        scopes: OIDC_SCOPES,
        state: None,
    });

    cookies.add(state.sessions().verifier_cookie(code_verifier));
    counter!("auth_login_total").increment(1);
    debug!(stage = "auth", "issued PKCE challenge");

    Ok(redirect_found(authorize_url.as_str()))
}

pub async fn callback(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ProblemResponse> {
    let Some(code_verifier) = SessionManager::read_verifier(&cookies) else {
        counter!("auth_callback_total", "result" => "missing_verifier").increment(1);
        warn!(stage = "auth", "callback without code verifier cookie");
        return Err(ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "missing_code_verifier",
            "no login is in progress for this browser; start again from the login page",
        ));
    };

    // The verifier is single-use whatever the outcome.
    cookies.add(state.sessions().expire_verifier());

    if let Some(error_code) = query.error.as_deref() {
        counter!("auth_callback_total", "result" => "provider_error").increment(1);
        warn!(
            stage = "auth",
            error = error_code,
            description = query.error_description.as_deref(),
            "provider returned an authorization error"
        );
        let detail = match query.error_description.as_deref() {
            Some(description) => format!("{error_code}: {description}"),
            None => error_code.to_string(),
        };
        return Err(ProblemResponse::new(
            StatusCode::UNAUTHORIZED,
            "provider_error",
            detail,
        ));
    }

    let code = match query.code.as_deref() {
        Some(code) if !code.is_empty() => code,
        _ => {
            counter!("auth_callback_total", "result" => "missing_code").increment(1);
            warn!(stage = "auth", "callback missing authorization code");
            return Err(ProblemResponse::new(
                StatusCode::BAD_REQUEST,
                "missing_code",
                "authorization code is required",
            ));
        }
    };

    let identity = state.identity();
    let client = identity.client().await.map_err(|err| {
        counter!("auth_callback_total", "result" => "unavailable").increment(1);
        error!(stage = "auth", error = %err, "cannot complete login");
        ProblemResponse::from(err)
    })?;

    let tokens = with_deadline(
        "oidc_token_exchange",
        identity.deadline(),
        client.exchange_code(code, &code_verifier, identity.redirect_uri()),
    )
    .await
    .map_err(|err| {
        counter!("auth_callback_total", "result" => "exchange_failed").increment(1);
        warn!(stage = "auth", error = %err, "failed to exchange authorization code");
        ProblemResponse::new(
            StatusCode::UNAUTHORIZED,
            "authentication_failed",
            format!("token exchange failed: {err}"),
        )
    })?;

    for cookie in state
        .sessions()
        .set_session(&tokens.access_token, tokens.id_token.as_deref())
    {
        cookies.add(cookie);
    }
    counter!("auth_callback_total", "result" => "success").increment(1);
    info!(stage = "auth", has_id_token = tokens.id_token.is_some(), "login completed");

    Ok(redirect_found(state.home_path()))
}

pub async fn logout(State(state): State<AppState>, cookies: Cookies) -> Response {
    let access_token = SessionManager::read_session(&cookies);
    let id_token = access_token
        .as_deref()
        .and_then(|token| state.sessions().take_id_token(token));

    for cookie in state.sessions().clear_session(access_token.as_deref()) {
        cookies.add(cookie);
    }

    let end_session = match id_token {
        Some(id_token) => end_session_url(&state, &id_token).await,
        None => None,
    };

    match end_session {
        Some(url) => {
            counter!("auth_logout_total", "mode" => "provider").increment(1);
            info!(stage = "auth", "logout redirected to provider");
            redirect_found(url.as_str())
        }
        None => {
            counter!("auth_logout_total", "mode" => "local").increment(1);
            info!(stage = "auth", "local logout");
            redirect_found(state.home_path())
        }
    }
}

async fn end_session_url(state: &AppState, id_token: &str) -> Option<Url> {
    let identity = state.identity();
    let client = match identity.client().await {
        Ok(client) => client,
        Err(err) => {
            warn!(stage = "auth", error = %err, "provider unavailable for logout");
            return None;
        }
    };

    client
        .end_session_url(id_token, identity.post_logout_redirect_uri())
        .map_err(|err| debug!(stage = "auth", error = %err, "no provider logout"))
        .ok()
}

/// Resolves the viewer behind the session cookie.
///
/// `Ok(None)` covers every way of not being signed in, including a token the
/// provider rejects or a provider that cannot be reached. Only missing OIDC
/// configuration is an error.
pub async fn current_viewer(
    state: &AppState,
    cookies: &Cookies,
) -> Result<Option<Viewer>, ProblemResponse> {
    let Some(access_token) = SessionManager::read_session(cookies) else {
        return Ok(None);
    };

    let identity = state.identity();
    let client = match identity.client().await {
        Ok(client) => client,
        Err(err @ IdentityError::Config(_)) => {
            error!(stage = "auth", error = %err, "session present but OIDC is not configured");
            return Err(ProblemResponse::from(err));
        }
        Err(err) => {
            warn!(stage = "auth", error = %err, "treating session as anonymous");
            return Ok(None);
        }
    };

    let claims = read_with_retry(
        "oidc_userinfo",
        identity.deadline(),
        OidcError::is_transient,
        || client.userinfo(&access_token),
    )
    .await;

    match claims {
        Ok(claims) => Ok(Some(Viewer { claims })),
        Err(err) => {
            info!(stage = "auth", error = %err, "session token not accepted");
            Ok(None)
        }
    }
}

fn redirect_found(location: &str) -> Response {
    let mut response = Redirect::temporary(location).into_response();
    *response.status_mut() = StatusCode::FOUND;
    response
}

fn generate_code_verifier() -> String {
    let mut bytes = [0u8; CODE_VERIFIER_LEN];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn compute_code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}
