//! HTTP Surface
//!
//! axum router exposing the endpoint actions. Every handler follows the same
//! path:
//!
//! ```text
//!   request ──► ActionRequest (params, Accept, rate key, scope)
//!          ──► build action ──► Dispatcher::execute ──► Outcome ──► response
//! ```

pub mod logging;

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{header, Extensions, HeaderMap, StatusCode};
use axum::response::sse::{self, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Router};
use futures::StreamExt;

use crate::action::{Action, ActionBase};
use crate::actions::{AccountShowAction, DataShowAction, OffersByAccountAction, RootAction};
use crate::dispatch::{Dispatcher, Outcome, RequestScope};
use crate::ledger::LedgerStore;
use crate::negotiate::{negotiate, Representation, MIME_HAL, MIME_RAW};
use crate::params::Params;
use crate::problem::Problem;

/// Rate-limit key used when the client address is unknown
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// Ledger data
    pub store: Arc<dyn LedgerStore>,
    /// Action dispatcher
    pub dispatcher: Dispatcher,
}

impl AppState {
    /// Create handler state
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }
}

/// Build the gateway router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/accounts/:account_id", get(account_show))
        .route("/accounts/:account_id/offers", get(offers_by_account))
        .route("/accounts/:account_id/data/:key", get(data_show))
        .layer(middleware::from_fn(logging::log_requests))
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

async fn root(State(state): State<AppState>, request: ActionRequest) -> Outcome {
    let (base, pending) = request.split();
    let action = RootAction::new(base, Arc::clone(&state.store));
    pending.dispatch(&state, Box::new(action)).await
}

async fn account_show(State(state): State<AppState>, request: ActionRequest) -> Outcome {
    let (base, pending) = request.split();
    let action = AccountShowAction::new(base, Arc::clone(&state.store));
    pending.dispatch(&state, Box::new(action)).await
}

async fn offers_by_account(State(state): State<AppState>, request: ActionRequest) -> Outcome {
    let (base, pending) = request.split();
    let action = OffersByAccountAction::new(base, Arc::clone(&state.store));
    pending.dispatch(&state, Box::new(action)).await
}

async fn data_show(State(state): State<AppState>, request: ActionRequest) -> Outcome {
    let (base, pending) = request.split();
    let action = DataShowAction::new(base, Arc::clone(&state.store));
    pending.dispatch(&state, Box::new(action)).await
}

// =============================================================================
// Extraction
// =============================================================================

/// Everything a handler needs to build and dispatch an action
pub struct ActionRequest {
    /// Initial action state
    pub base: ActionBase,
    /// Negotiated representation
    pub representation: Representation,
    /// Rate-limit key and cancellation scope
    pub scope: RequestScope,
}

/// Dispatch half of an [`ActionRequest`], left after `base` moved into the action
struct Pending {
    representation: Representation,
    scope: RequestScope,
}

impl Pending {
    async fn dispatch(self, state: &AppState, action: Box<dyn Action>) -> Outcome {
        state
            .dispatcher
            .execute(action, self.representation, self.scope)
            .await
    }
}

impl ActionRequest {
    fn split(self) -> (ActionBase, Pending) {
        (
            self.base,
            Pending {
                representation: self.representation,
                scope: self.scope,
            },
        )
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for ActionRequest
where
    S: Send + Sync,
{
    type Rejection = Problem;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // Routes without segments have no path parameters at all.
        let path = Path::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map(|Path(path)| path)
            .unwrap_or_default();
        let Query(query) = Query::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|e| Problem::bad_request("query", &e.body_text()))?;

        let accept = parts
            .headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok());

        Ok(Self {
            base: ActionBase::new(Params::new(path, query), parts.uri.path()),
            representation: negotiate(accept),
            scope: RequestScope::new(client_key(&parts.headers, &parts.extensions)),
        })
    }
}

/// Client identity for rate limiting
///
/// First `X-Forwarded-For` entry, else the peer address, else
/// [`UNKNOWN_CLIENT`].
pub fn client_key(headers: &HeaderMap, extensions: &Extensions) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| UNKNOWN_CLIENT.to_string(), |ConnectInfo(addr)| addr.ip().to_string())
}

// =============================================================================
// Responses
// =============================================================================

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        match self {
            Self::Document(document) => {
                ([(header::CONTENT_TYPE, MIME_HAL)], document.to_string()).into_response()
            }
            Self::Raw(bytes) => ([(header::CONTENT_TYPE, MIME_RAW)], bytes).into_response(),
            Self::NoContent => StatusCode::NO_CONTENT.into_response(),
            Self::Problem(problem) => problem.into_response(),
            Self::Stream(body) => {
                let events = body.map(|frame| Ok::<_, Infallible>(sse::Event::from(frame)));
                Sse::new(events)
                    .keep_alive(KeepAlive::default())
                    .into_response()
            }
        }
    }
}
