//! Streaming Engine
//!
//! Drives one event-stream session from its first evaluation to its single
//! terminal frame.
//!
//! # State Machine
//!
//! ```text
//!  INIT ──► SUBSCRIBE (topic non-empty)
//!             │
//!             ▼
//!  ┌──► RATE_CHECK ──limited/backend error──► in-stream error ──┐
//!  │        │                                                   │
//!  │        ▼                                                   │
//!  │     PRODUCE (push: write events / snapshot: digest, dedup) │
//!  │        │                                                   │
//!  │        ▼                                                   │
//!  │     ERROR_CHECK ──nothing sent──► Problem document ────────┤
//!  │        │        ──already open──► one error frame ─────────┤
//!  │        ▼                                                   │
//!  │     PREAMBLE_ONCE                                          │
//!  │        │                                                   │
//!  │        ▼                                                   │
//!  │     DONE_CHECK ──done──────────────────────────────────────┤
//!  │        │                                                   │
//!  │        ▼                                                   │
//!  └──── WAIT { topic signal | request cancel | shutdown } ─────┤
//!                                                               ▼
//!                                   TERMINATED: unsubscribe once, done() once
//! ```
//!
//! WAIT is the only suspension point besides the limiter call. The engine
//! never polls: with no topic it waits purely on the two cancellation tokens.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use super::event::Event;
use super::sse::EventStream;
use crate::action::{Action, StreamCapability};
use crate::bus::{ChangeBus, Subscription, Topic};
use crate::config::StreamConfig;
use crate::error::ActionError;
use crate::problem::{map_terminal, Problem, StreamPhase, TerminalResponse};
use crate::rate_limit::RateLimiter;

/// Rate-limit cost of one loop iteration
const ITERATION_COST: u32 = 1;

/// Shared driver for event-stream sessions
#[derive(Clone)]
pub struct StreamEngine {
    bus: Arc<dyn ChangeBus>,
    limiter: Option<Arc<dyn RateLimiter>>,
    shutdown: CancellationToken,
    config: StreamConfig,
}

impl StreamEngine {
    /// Create an engine subscribing to `bus` and stopping on `shutdown`
    #[must_use]
    pub fn new(bus: Arc<dyn ChangeBus>, shutdown: CancellationToken, config: StreamConfig) -> Self {
        Self {
            bus,
            limiter: None,
            shutdown,
            config,
        }
    }

    /// Charge every loop iteration against `limiter`
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Session settings
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Process-scope cancellation token
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Run one session to completion
    ///
    /// Returns `Err` only when the session failed before anything was
    /// written; the caller then renders the problem document instead of a
    /// stream. Every other outcome has already been written to `stream`.
    pub async fn run(
        &self,
        action: &mut dyn Action,
        stream: &mut dyn EventStream,
        key: &str,
        request: &CancellationToken,
    ) -> Result<(), Problem> {
        let Some(topic) = action.event_stream().map(|capability| capability.topic()) else {
            return Err(Problem::not_acceptable());
        };

        tracing::debug!(action = action.name(), topic = %topic, "Stream session starting");

        let mut subscription = SubscriptionGuard::acquire(Arc::clone(&self.bus), topic);
        let mut session = Session::default();
        let result = self
            .drive(action, stream, key, request, &mut subscription, &mut session)
            .await;

        drop(subscription);
        stream.done();

        tracing::debug!(
            action = action.name(),
            sent = stream.sent_count(),
            "Stream session finished"
        );
        result
    }

    async fn drive(
        &self,
        action: &mut dyn Action,
        stream: &mut dyn EventStream,
        key: &str,
        request: &CancellationToken,
        subscription: &mut SubscriptionGuard,
        session: &mut Session,
    ) -> Result<(), Problem> {
        loop {
            if let Err(err) = self.rate_check(key).await {
                fail_in_stream(stream, &err);
                return Ok(());
            }

            match action.event_stream() {
                Some(StreamCapability::Push(producer)) => producer.push_events(stream),
                Some(StreamCapability::Snapshot(producer)) => {
                    if let Some(event) = producer.load_event() {
                        if let Err(err) = self.emit_snapshot(session, stream, event) {
                            fail_in_stream(stream, &err);
                            return Ok(());
                        }
                    }
                }
                None => return Err(Problem::not_acceptable()),
            }

            if let Some(err) = action.base_mut().take_err() {
                match map_terminal(&err, phase_of(stream)) {
                    TerminalResponse::Document(problem) => return Err(problem),
                    TerminalResponse::StreamFrame(message) => {
                        stream.err(message);
                        return Ok(());
                    }
                }
            }

            stream.init();

            if stream.is_done() {
                return Ok(());
            }

            match self.wait(request, subscription).await {
                Wake::Changed => {}
                Wake::RequestCancelled => {
                    tracing::debug!(action = action.name(), "Stream cancelled by client");
                    return Ok(());
                }
                Wake::Shutdown => {
                    tracing::debug!(action = action.name(), "Stream cancelled by shutdown");
                    return Ok(());
                }
            }
        }
    }

    async fn rate_check(&self, key: &str) -> Result<(), ActionError> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        let status = limiter.rate_limit(key, ITERATION_COST).await?;
        if status.limited {
            tracing::info!(key, "Stream rate limited");
            return Err(ActionError::RateLimited);
        }
        Ok(())
    }

    fn emit_snapshot(
        &self,
        session: &mut Session,
        stream: &mut dyn EventStream,
        event: Event,
    ) -> Result<(), ActionError> {
        let payload = serde_json::to_vec(&event)?;
        let digest: [u8; 32] = Sha256::digest(&payload).into();

        if session.last_digest == Some(digest) {
            tracing::trace!(digest = %hex::encode(digest), "Snapshot unchanged, skipping");
            return Ok(());
        }

        session.last_digest = Some(digest);
        stream.set_limit(self.config.snapshot_frame_limit);
        stream.send(event);
        Ok(())
    }

    async fn wait(&self, request: &CancellationToken, subscription: &mut SubscriptionGuard) -> Wake {
        loop {
            let listening = subscription.is_listening();
            let signal = tokio::select! {
                biased;
                () = request.cancelled() => return Wake::RequestCancelled,
                () = self.shutdown.cancelled() => return Wake::Shutdown,
                changed = subscription.changed(), if listening => changed,
            };

            if signal {
                return Wake::Changed;
            }
            // Bus dropped our channel; keep waiting on cancellation alone.
            tracing::warn!(topic = %subscription.topic, "Change bus closed subscription");
            subscription.mark_closed();
        }
    }
}

/// Why WAIT returned
enum Wake {
    Changed,
    RequestCancelled,
    Shutdown,
}

/// Per-session dedup state
#[derive(Default)]
struct Session {
    last_digest: Option<[u8; 32]>,
}

/// Bus registration released exactly once, on drop
struct SubscriptionGuard {
    bus: Arc<dyn ChangeBus>,
    topic: Topic,
    subscription: Option<Subscription>,
    open: bool,
}

impl SubscriptionGuard {
    fn acquire(bus: Arc<dyn ChangeBus>, topic: Topic) -> Self {
        let subscription = (!topic.is_none()).then(|| bus.subscribe(&topic));
        let open = subscription.is_some();
        Self {
            bus,
            topic,
            subscription,
            open,
        }
    }

    fn is_listening(&self) -> bool {
        self.open
    }

    fn mark_closed(&mut self) {
        self.open = false;
    }

    async fn changed(&mut self) -> bool {
        match self.subscription.as_mut() {
            Some(subscription) => subscription.changed().await,
            None => std::future::pending().await,
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.bus.unsubscribe(subscription, &self.topic);
        }
    }
}

/// Preamble and headers are committed once anything has gone out
///
/// An initialized stream with no data events is already `Streaming`: once the
/// preamble is on the wire a standalone document can no longer be written.
fn phase_of(stream: &dyn EventStream) -> StreamPhase {
    if stream.sent_count() == 0 && !stream.is_initialized() {
        StreamPhase::BeforePreamble
    } else {
        StreamPhase::Streaming
    }
}

fn fail_in_stream(stream: &mut dyn EventStream, err: &ActionError) {
    let message = match map_terminal(err, StreamPhase::Streaming) {
        TerminalResponse::StreamFrame(message) => message,
        TerminalResponse::Document(problem) => {
            tracing::error!(kind = %problem.kind, "Unexpected document for in-stream failure");
            crate::problem::UNEXPECTED_STREAM_ERROR
        }
    };
    stream.err(message);
}
