//! Gateway Core - Action Dispatch and Streaming for the Ledger Gateway
//!
//! This crate turns HTTP requests for ledger data into responses. Each
//! endpoint is an *action*: a small state machine that runs a fixed pipeline
//! of steps and declares which representations it can produce. The same
//! action serves a one-shot document, raw bytes, or a long-lived
//! server-sent-events stream.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          HTTP (axum)                              │
//! │   router ──► ActionRequest (params, Accept, rate key) ──► action  │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                          Dispatcher                               │
//! │   negotiate ──► capability check ──► rate check ──► produce       │
//! │                                 │                                 │
//! │            document / raw       │        event-stream             │
//! │                 │               │             │                   │
//! │                 ▼               │             ▼                   │
//! │           Outcome::Document     │       StreamEngine              │
//! │                                 │   subscribe ─► loop {           │
//! │                                 │     rate check, produce,        │
//! │                                 │     dedup, wait(change|cancel)  │
//! │                                 │   } ─► unsubscribe, close       │
//! └─────────────────────────────────┴─────────────────────────────────┘
//!                                 │
//!                 ┌───────────────┴────────────────┐
//!                 ▼                                ▼
//!           LedgerStore                        ChangeBus
//!        (account, offers, ...)          (topic change wake-ups)
//! ```
//!
//! # Key Types
//!
//! - [`Action`]: per-request endpoint state with capability accessors
//! - [`Dispatcher`]: picks the production path for a negotiated representation
//! - [`StreamEngine`]: drives streaming sessions until done or cancelled
//! - [`Problem`]: `application/problem+json` error documents
//! - [`LedgerStore`]: read contract for ledger state
//! - [`ChangeBus`]: topic subscriptions that wake streaming sessions
//!
//! # Module Overview
//!
//! - [`action`]: action base state and capability traits
//! - [`actions`]: the endpoint actions
//! - [`bus`]: change notification bus
//! - [`config`]: gateway configuration (file + environment)
//! - [`dispatch`]: representation dispatch
//! - [`error`]: action error type
//! - [`http`]: axum router, extractors, and request logging
//! - [`ledger`]: ledger records and stores
//! - [`negotiate`]: `Accept` header negotiation
//! - [`params`]: request parameter access and paging
//! - [`pipeline`]: step runner
//! - [`problem`]: error to response mapping
//! - [`rate_limit`]: per-client token buckets
//! - [`resource`]: response documents
//! - [`streaming`]: SSE transport and streaming engine

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod actions;
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod ledger;
pub mod negotiate;
pub mod params;
pub mod pipeline;
pub mod problem;
pub mod rate_limit;
pub mod resource;
pub mod streaming;

// Re-exports for convenience
pub use action::{
    Action, ActionBase, Output, ProducesDocument, ProducesPushEvents, ProducesRaw,
    ProducesSnapshotOnChange, StreamCapability,
};
pub use bus::{ChangeBus, Subscription, SubscriptionId, Topic, TopicBus};
pub use config::{ConfigError, GatewayConfig, StreamConfig};
pub use dispatch::{Dispatcher, Outcome, RequestScope};
pub use error::ActionError;
pub use http::{router, AppState};
pub use ledger::{LedgerFixture, LedgerStore, MemoryLedger, StoreError};
pub use negotiate::{negotiate, Representation};
pub use params::{Order, PageQuery, Params};
pub use problem::{map_terminal, Problem, StreamPhase, TerminalResponse};
pub use rate_limit::{KeyedRateLimiter, LimiterError, RateLimitConfig, RateLimitStatus, RateLimiter};
pub use streaming::{Event, EventStream, Frame, SseBody, SseStream, StreamEngine};
