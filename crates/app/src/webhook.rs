use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use metrics::{counter, histogram};
use serde_json::json;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use webhook_dash_core::{capture_headers, payload_from_body, IngestAck, StoredEvent};

use crate::router::AppState;

const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// Ingest endpoint. Registered for every method so non-POST requests get
/// the JSON 405 envelope instead of axum's empty default.
pub async fn handle(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let start = Instant::now();
    let (result, response) = ingest(&state, &method, &headers, body).await;

    counter!("webhook_ingest_total", "result" => result).increment(1);
    histogram!("webhook_ingest_latency_seconds", "result" => result)
        .record(start.elapsed().as_secs_f64());

    response
}

/// Route layer for `/webhook`, so responses produced before the handler
/// runs carry the same headers.
pub async fn security_headers(mut response: Response) -> Response {
    apply_security_headers(response.headers_mut());
    response
}

async fn ingest(
    state: &AppState,
    method: &Method,
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> (&'static str, Response) {
    if *method != Method::POST {
        let mut response = (
            StatusCode::METHOD_NOT_ALLOWED,
            Json(json!({ "error": "Method not allowed" })),
        )
            .into_response();
        response
            .headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static("POST"));
        return ("method_not_allowed", response);
    }

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(stage = "ingest", reason = %rejection.body_text(), "rejected webhook body");
            let response = (
                rejection.status(),
                Json(json!({ "error": rejection.body_text() })),
            )
                .into_response();
            return ("body_rejected", response);
        }
    };

    if let Some(secret) = state.webhook_secret() {
        let provided = headers
            .get(HEADER_SIGNATURE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if let Err(reason) = verify_signature(secret, &body, provided) {
            warn!(stage = "ingest", reason = %reason, "rejected webhook signature");
            let response = (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Invalid signature" })),
            )
                .into_response();
            return ("invalid_signature", response);
        }
    }

    let event = StoredEvent::new(
        payload_from_body(&body),
        state.now(),
        capture_headers(
            headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_bytes())),
        ),
    );

    match state.events().append(&event).await {
        Ok(()) => {
            info!(
                stage = "ingest",
                timestamp = %event.timestamp_iso(),
                bytes = body.len(),
                content_type = event.header("content-type"),
                "webhook received"
            );
            ("stored", (StatusCode::OK, Json(IngestAck::received())).into_response())
        }
        Err(err) => {
            let response = (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Internal server error",
                    "details": err.to_string(),
                })),
            )
                .into_response();
            ("store_failed", response)
        }
    }
}

fn apply_security_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'"),
    );
}

fn verify_signature(secret: &[u8], body: &[u8], provided: &str) -> Result<(), String> {
    let hex_part = provided
        .strip_prefix("sha256=")
        .ok_or_else(|| "signature must start with 'sha256='".to_string())?;
    let provided_bytes =
        hex::decode(hex_part).map_err(|_| "signature is not valid hex".to_string())?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|_| "failed to initialize signature verifier".to_string())?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    let expected_bytes: &[u8] = expected.as_ref();

    if expected_bytes.ct_eq(provided_bytes.as_slice()).into() {
        Ok(())
    } else {
        Err("signature mismatch".to_string())
    }
}
