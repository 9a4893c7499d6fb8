use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
};
use tower_cookies::Cookies;

use crate::auth::current_viewer;
use crate::problem::ProblemResponse;
use crate::render::{dashboard_page, event_list, landing_page};
use crate::router::AppState;

pub async fn index(
    State(state): State<AppState>,
    cookies: Cookies,
) -> Result<Response, ProblemResponse> {
    let body = match current_viewer(&state, &cookies).await? {
        Some(viewer) => {
            let events = state.events().recent().await;
            dashboard_page(viewer.display_name(), &events, state.dashboard())
        }
        None => landing_page(state.home_path()),
    };

    Ok(no_store(body))
}

/// Event-list fragment swapped in by the dashboard's polling script.
pub async fn events_fragment(
    State(state): State<AppState>,
    cookies: Cookies,
) -> Result<Response, ProblemResponse> {
    if current_viewer(&state, &cookies).await?.is_none() {
        return Err(ProblemResponse::new(
            StatusCode::UNAUTHORIZED,
            "unauthenticated",
            "sign in to view webhook events",
        ));
    }

    let events = state.events().recent().await;
    Ok(no_store(event_list(&events, state.dashboard().timezone)))
}

fn no_store(body: String) -> Response {
    ([(header::CACHE_CONTROL, "no-store")], Html(body)).into_response()
}
