//! Capability Dispatch
//!
//! Routes an action to the capability its negotiated representation needs
//! and turns the result into exactly one [`Outcome`].
//!
//! ```text
//!   Representation ─► capability lookup ─► missing? ─► 406 (nothing else runs)
//!                                            │
//!                                            ▼
//!       Document / Raw: rate check ─► produce ─► output or problem
//!       EventStream:    spawn StreamEngine::run ─► first frame?
//!                                                   ├─ yes ─► Outcome::Stream
//!                                                   └─ no  ─► problem document
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::action::{Action, Output};
use crate::negotiate::Representation;
use crate::problem::{document_for, Problem};
use crate::rate_limit::RateLimiter;
use crate::streaming::{SseBody, SseStream, StreamEngine};

/// Cost of one document or raw request
const REQUEST_COST: u32 = 1;

/// The single response artifact of a request
#[derive(Debug)]
pub enum Outcome {
    /// Structured document
    Document(serde_json::Value),
    /// Raw bytes
    Raw(Bytes),
    /// The action succeeded without rendering anything
    NoContent,
    /// Standalone problem document
    Problem(Problem),
    /// Committed event stream
    Stream(SseBody),
}

/// Request-scoped inputs the dispatcher needs besides the action
#[derive(Debug, Clone)]
pub struct RequestScope {
    /// Key the client's rate limit budget is tracked under
    pub rate_limit_key: String,
    /// Cancelled when the request ends or the client disconnects
    pub cancel: CancellationToken,
}

impl RequestScope {
    /// Scope with a fresh cancellation token
    pub fn new(rate_limit_key: impl Into<String>) -> Self {
        Self {
            rate_limit_key: rate_limit_key.into(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Executes actions under their negotiated representation
#[derive(Clone)]
pub struct Dispatcher {
    engine: StreamEngine,
    limiter: Option<Arc<dyn RateLimiter>>,
}

impl Dispatcher {
    /// Dispatcher handing event streams to `engine`
    #[must_use]
    pub fn new(engine: StreamEngine) -> Self {
        Self {
            engine,
            limiter: None,
        }
    }

    /// Charge requests and stream iterations against `limiter`
    #[must_use]
    pub fn with_rate_limiter(self, limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            engine: self.engine.with_rate_limiter(Arc::clone(&limiter)),
            limiter: Some(limiter),
        }
    }

    /// The streaming engine
    #[must_use]
    pub fn engine(&self) -> &StreamEngine {
        &self.engine
    }

    /// Run `action` and produce its response artifact
    pub async fn execute(
        &self,
        mut action: Box<dyn Action>,
        representation: Representation,
        scope: RequestScope,
    ) -> Outcome {
        match representation {
            Representation::Document => {
                if action.document().is_none() {
                    return not_acceptable(action.as_ref(), representation);
                }
                if let Err(problem) = self.rate_check(&scope.rate_limit_key).await {
                    return Outcome::Problem(problem);
                }
                if let Some(producer) = action.document() {
                    producer.produce_document();
                }
                complete(action.as_mut())
            }
            Representation::Raw => {
                if action.raw().is_none() {
                    return not_acceptable(action.as_ref(), representation);
                }
                if let Err(problem) = self.rate_check(&scope.rate_limit_key).await {
                    return Outcome::Problem(problem);
                }
                if let Some(producer) = action.raw() {
                    producer.produce_raw();
                }
                complete(action.as_mut())
            }
            Representation::EventStream => {
                if action.event_stream().is_none() {
                    return not_acceptable(action.as_ref(), representation);
                }
                self.stream(action, scope).await
            }
            Representation::Unsupported => not_acceptable(action.as_ref(), representation),
        }
    }

    async fn stream(&self, mut action: Box<dyn Action>, scope: RequestScope) -> Outcome {
        let (mut stream, mut frames) = SseStream::channel(self.engine.config().retry());
        // Dropping the response (or this future) cancels the session.
        let request_guard = scope.cancel.clone().drop_guard();

        let engine = self.engine.clone();
        let span = tracing::debug_span!("stream", action = action.name());
        let session = tokio::spawn(
            async move {
                engine
                    .run(action.as_mut(), &mut stream, &scope.rate_limit_key, &scope.cancel)
                    .await
            }
            .instrument(span),
        );

        if let Some(first) = frames.recv().await {
            return Outcome::Stream(SseBody::new(first, frames, request_guard));
        }

        match session.await {
            Ok(Ok(())) => Outcome::NoContent,
            Ok(Err(problem)) => Outcome::Problem(problem),
            Err(e) => {
                tracing::error!(error = %e, "Stream session task failed");
                Outcome::Problem(Problem::server_error())
            }
        }
    }

    async fn rate_check(&self, key: &str) -> Result<(), Problem> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        match limiter.rate_limit(key, REQUEST_COST).await {
            Ok(status) if status.limited => {
                tracing::info!(key, "Request rate limited");
                Err(Problem::rate_limit_exceeded())
            }
            Ok(_) => Ok(()),
            Err(e) => Err(document_for(&e.into())),
        }
    }
}

fn not_acceptable(action: &dyn Action, representation: Representation) -> Outcome {
    tracing::debug!(action = action.name(), ?representation, "Not acceptable");
    Outcome::Problem(Problem::not_acceptable())
}

fn complete(action: &mut dyn Action) -> Outcome {
    let base = action.base_mut();
    if let Some(err) = base.take_err() {
        return Outcome::Problem(document_for(&err));
    }
    match base.take_output() {
        Some(Output::Document(document)) => Outcome::Document(document),
        Some(Output::Raw(bytes)) => Outcome::Raw(bytes),
        None => Outcome::NoContent,
    }
}
