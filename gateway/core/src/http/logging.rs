//! Request logging middleware
//!
//! Each request runs inside a `request` span carrying a fresh request id,
//! which is also returned to the client in `X-Request-Id`.

use std::time::Instant;

use axum::extract::Request;
use axum::http::{header, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

use super::client_key;

/// Response header carrying the request id
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Log the start and finish of every request
pub async fn log_requests(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("request", %request_id);

    async move {
        let start = Instant::now();
        let host = request
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        tracing::info!(
            subsys = "http",
            path = %request.uri().path(),
            method = %request.method(),
            ip = %client_key(request.headers(), request.extensions()),
            host = %host,
            "Starting request"
        );

        let mut response = next.run(request).await;

        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            subsys = "http",
            status = response.status().as_u16(),
            duration_ms,
            "Finished request"
        );

        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}
