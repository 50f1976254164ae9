//! Event-Stream Responses
//!
//! Long-lived Server-Sent-Events sessions over ledger state. Each session is
//! one tokio task running [`StreamEngine::run`]; frames travel through an
//! unbounded channel into the HTTP response body.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────────────── session task ──────────────────────┐
//!  │                                                          │
//!  │  StreamEngine ──► Action (push / snapshot producer)      │
//!  │      │   ▲                                               │
//!  │      │   └── Subscription ◄── TopicBus.publish(topic)    │
//!  │      ▼                                                   │
//!  │  SseStream ── Frame ──► mpsc::UnboundedSender            │
//!  └──────────────────────────────┬───────────────────────────┘
//!                                 ▼
//!                  SseBody (axum Sse response) ──► client
//! ```
//!
//! # Features
//!
//! - **Exactly-once framing**: one preamble, one terminal frame per session
//! - **Snapshot dedup**: SHA-256 over the serialized event; unchanged values
//!   are never re-sent
//! - **Two cancellation sources**: the request scope (response body dropped)
//!   and the process scope (server shutdown)

mod engine;
mod event;
mod sse;

pub use engine::StreamEngine;
pub use event::{Event, Frame, GOODBYE, HELLO};
pub use sse::{EventStream, SseBody, SseStream};
