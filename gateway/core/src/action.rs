//! Action Model
//!
//! An action is one endpoint's per-request unit of work. It owns an
//! [`ActionBase`] (parameters, output sink, terminal error slot, setup flag)
//! and declares which response capabilities it supports by overriding the
//! accessor methods on [`Action`].
//!
//! # Capabilities
//!
//! ```text
//!   Representation      Required capability
//!   ──────────────      ───────────────────────────────────────────────
//!   document        ──► ProducesDocument
//!   raw             ──► ProducesRaw
//!   event-stream    ──► ProducesPushEvents  |  ProducesSnapshotOnChange
//! ```
//!
//! The dispatcher asks once (`document()`, `raw()`, `event_stream()`); an
//! action that returns `None` simply lacks that capability.

use bytes::Bytes;
use serde::Serialize;

use crate::bus::Topic;
use crate::error::ActionError;
use crate::params::Params;
use crate::streaming::{Event, EventStream};

/// Rendered result of a document or raw invocation
#[derive(Clone, Debug, PartialEq)]
pub enum Output {
    /// Structured document
    Document(serde_json::Value),
    /// Raw bytes
    Raw(Bytes),
}

/// Per-request state shared by every action
#[derive(Debug, Default)]
pub struct ActionBase {
    /// Merged path and query parameters
    pub params: Params,
    /// Request URL as seen by the client, used for links
    pub full_url: String,
    output: Option<Output>,
    err: Option<ActionError>,
    is_setup: bool,
}

impl ActionBase {
    /// Create state for a request
    pub fn new(params: Params, full_url: impl Into<String>) -> Self {
        Self {
            params,
            full_url: full_url.into(),
            ..Self::default()
        }
    }

    /// Record a terminal error; the first one recorded wins
    pub fn fail(&mut self, err: ActionError) {
        if self.err.is_some() {
            tracing::debug!(error = %err, "Ignoring error after first failure");
            return;
        }
        self.err = Some(err);
    }

    /// Whether a terminal error has been recorded
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.err.is_some()
    }

    /// The recorded error, if any
    #[must_use]
    pub fn error(&self) -> Option<&ActionError> {
        self.err.as_ref()
    }

    /// Remove and return the recorded error
    pub fn take_err(&mut self) -> Option<ActionError> {
        self.err.take()
    }

    /// Serialize `resource` into the output sink
    pub fn render_document<T: Serialize>(&mut self, resource: &T) -> Result<(), ActionError> {
        self.output = Some(Output::Document(serde_json::to_value(resource)?));
        Ok(())
    }

    /// Put raw bytes into the output sink
    pub fn render_raw(&mut self, bytes: impl Into<Bytes>) {
        self.output = Some(Output::Raw(bytes.into()));
    }

    /// Remove and return the rendered output
    pub fn take_output(&mut self) -> Option<Output> {
        self.output.take()
    }

    pub(crate) fn is_setup(&self) -> bool {
        self.is_setup
    }

    pub(crate) fn mark_setup(&mut self) {
        self.is_setup = true;
    }
}

/// Structured-document capability
pub trait ProducesDocument: Send {
    /// Run the document pipeline, rendering into the output sink
    fn produce_document(&mut self);
}

/// Raw-bytes capability
pub trait ProducesRaw: Send {
    /// Run the raw pipeline, rendering into the output sink
    fn produce_raw(&mut self);
}

/// Event-stream capability where the action writes events itself
pub trait ProducesPushEvents: Send {
    /// Topic whose changes trigger re-evaluation; may be empty
    fn topic(&self) -> Topic;

    /// Emit zero or more events, in order, onto the live stream
    fn push_events(&mut self, stream: &mut dyn EventStream);
}

/// Event-stream capability where the engine diffs the action's current value
pub trait ProducesSnapshotOnChange: Send {
    /// Topic whose changes trigger re-evaluation; may be empty
    fn topic(&self) -> Topic;

    /// Load the current value, or `None` after recording an error
    fn load_event(&mut self) -> Option<Event>;
}

/// The event-stream capability an action exposes
pub enum StreamCapability<'a> {
    /// Push producer
    Push(&'a mut dyn ProducesPushEvents),
    /// Snapshot producer
    Snapshot(&'a mut dyn ProducesSnapshotOnChange),
}

impl StreamCapability<'_> {
    /// Topic of the underlying producer
    #[must_use]
    pub fn topic(&self) -> Topic {
        match self {
            Self::Push(producer) => producer.topic(),
            Self::Snapshot(producer) => producer.topic(),
        }
    }
}

/// One endpoint's per-request handler
pub trait Action: Send {
    /// Shared request state
    fn base(&self) -> &ActionBase;

    /// Shared request state, mutably
    fn base_mut(&mut self) -> &mut ActionBase;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Structured-document capability, when supported
    fn document(&mut self) -> Option<&mut dyn ProducesDocument> {
        None
    }

    /// Raw-bytes capability, when supported
    fn raw(&mut self) -> Option<&mut dyn ProducesRaw> {
        None
    }

    /// Event-stream capability, when supported
    fn event_stream(&mut self) -> Option<StreamCapability<'_>> {
        None
    }
}
