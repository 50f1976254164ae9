//! Problem Documents and Terminal Error Mapping
//!
//! Every request produces exactly one response artifact. When a request
//! fails, [`map_terminal`] decides its shape from the stream phase:
//!
//! ```text
//!   ActionError ──► map_terminal(phase)
//!                     │
//!                     ├── BeforePreamble ──► Problem document (status + JSON)
//!                     │
//!                     └── Streaming ───────► one in-stream error message
//! ```
//!
//! Client-visible text is always one of a few fixed messages. The real cause
//! of an internal failure is logged and never rendered.

use std::collections::BTreeMap;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::error::ActionError;

/// In-stream message for "no matching row" failures
pub const OBJECT_NOT_FOUND: &str = "Object not found";

/// In-stream message for every failure without a public description
pub const UNEXPECTED_STREAM_ERROR: &str = "Unexpected stream error";

/// In-stream message for an exhausted rate limit
pub const RATE_LIMIT_EXCEEDED: &str = "rate limit exceeded";

/// Content type of rendered problem documents
pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// Standalone error document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    /// Machine-readable problem kind
    #[serde(rename = "type")]
    pub kind: String,
    /// Short human-readable summary
    pub title: String,
    /// HTTP status code
    pub status: u16,
    /// Longer explanation, safe for clients
    pub detail: String,
    /// Problem-specific extra fields
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, String>,
}

impl Problem {
    fn new(kind: &str, title: &str, status: StatusCode, detail: &str) -> Self {
        Self {
            kind: kind.to_string(),
            title: title.to_string(),
            status: status.as_u16(),
            detail: detail.to_string(),
            extras: BTreeMap::new(),
        }
    }

    /// 404: the requested resource does not exist
    #[must_use]
    pub fn not_found() -> Self {
        Self::new(
            "not_found",
            "Resource Missing",
            StatusCode::NOT_FOUND,
            "The resource at the url requested was not found. This usually \
             occurs for one of two reasons: The url requested is not valid, or \
             no data in our database could be found with the parameters provided.",
        )
    }

    /// 400: a request parameter was missing or malformed
    #[must_use]
    pub fn bad_request(field: &str, reason: &str) -> Self {
        Self::new(
            "bad_request",
            "Bad Request",
            StatusCode::BAD_REQUEST,
            "The request you sent was invalid in some way.",
        )
        .with_extra("invalid_field", field)
        .with_extra("reason", reason)
    }

    /// 406: no representation the client accepts can be produced
    #[must_use]
    pub fn not_acceptable() -> Self {
        Self::new(
            "not_acceptable",
            "An acceptable response content-type could not be provided for this request",
            StatusCode::NOT_ACCEPTABLE,
            "The Accept header sent with this request does not name a response \
             format this endpoint supports.",
        )
    }

    /// 429: the client's request budget is exhausted
    #[must_use]
    pub fn rate_limit_exceeded() -> Self {
        Self::new(
            "rate_limit_exceeded",
            "Rate Limit Exceeded",
            StatusCode::TOO_MANY_REQUESTS,
            "The rate limit for the requesting IP address is over its allowed \
             limit. Please wait and try again later.",
        )
    }

    /// 500: an internal failure; the cause is never disclosed
    #[must_use]
    pub fn server_error() -> Self {
        Self::new(
            "server_error",
            "Internal Server Error",
            StatusCode::INTERNAL_SERVER_ERROR,
            "An error occurred while processing this request. This is usually \
             due to a bug within the server software.",
        )
    }

    /// Attach an extra field
    #[must_use]
    pub fn with_extra(mut self, key: &str, value: &str) -> Self {
        self.extras.insert(key.to_string(), value.to_string());
        self
    }

    /// HTTP status as a typed code
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match serde_json::to_vec(&self) {
            Ok(body) => (status, [(header::CONTENT_TYPE, PROBLEM_CONTENT_TYPE)], body).into_response(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to render problem document");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// Whether the stream preamble has been committed to the client
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamPhase {
    /// Nothing written yet; a standalone document is still possible
    BeforePreamble,
    /// Headers and preamble are out; only in-stream frames remain
    Streaming,
}

/// The single response artifact a terminal error becomes
#[derive(Clone, Debug, PartialEq)]
pub enum TerminalResponse {
    /// Standalone problem document
    Document(Problem),
    /// Message for one in-stream error frame
    StreamFrame(&'static str),
}

/// Map a terminal error to its response artifact for the given phase
#[must_use]
pub fn map_terminal(err: &ActionError, phase: StreamPhase) -> TerminalResponse {
    match phase {
        StreamPhase::BeforePreamble => TerminalResponse::Document(document_for(err)),
        StreamPhase::Streaming => TerminalResponse::StreamFrame(stream_message(err)),
    }
}

/// Problem document for a request that failed before anything was written
#[must_use]
pub fn document_for(err: &ActionError) -> Problem {
    match err {
        ActionError::InvalidParam { field, reason } => Problem::bad_request(field, reason),
        ActionError::RateLimited => Problem::rate_limit_exceeded(),
        err if err.is_not_found() => Problem::not_found(),
        err => {
            tracing::error!(error = %err, "Request failed");
            Problem::server_error()
        }
    }
}

fn stream_message(err: &ActionError) -> &'static str {
    match err {
        ActionError::RateLimited => RATE_LIMIT_EXCEEDED,
        err if err.is_not_found() => OBJECT_NOT_FOUND,
        err => {
            tracing::error!(error = %err, "Stream failed");
            UNEXPECTED_STREAM_ERROR
        }
    }
}
