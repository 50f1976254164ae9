//! Stream Transport
//!
//! [`EventStream`] is the contract the streaming engine and push producers
//! write through. [`SseStream`] implements it over an unbounded channel whose
//! receiving half becomes the HTTP response body ([`SseBody`]).
//!
//! Session counters (frames sent, limit, preamble and done flags) live here
//! and are touched only by the task that owns the session, so they are plain
//! fields rather than atomics.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

use super::event::{Event, Frame};

/// Stream transport contract
pub trait EventStream: Send {
    /// Send the preamble; only the first call has an effect
    fn init(&mut self);

    /// Emit one data event, sending the preamble first if needed
    fn send(&mut self, event: Event);

    /// Emit a terminal error frame and mark the stream done
    fn err(&mut self, message: &str);

    /// Data events emitted so far
    fn sent_count(&self) -> usize;

    /// Whether the preamble has gone out
    fn is_initialized(&self) -> bool;

    /// Whether the stream is complete
    fn is_done(&self) -> bool;

    /// Complete the stream; only the first call has an effect
    fn done(&mut self);

    /// Complete automatically after `limit` data events (0 = unlimited)
    fn set_limit(&mut self, limit: usize);
}

/// Server-Sent-Events stream writing frames into a channel
#[derive(Debug)]
pub struct SseStream {
    tx: mpsc::UnboundedSender<Frame>,
    retry: Duration,
    sent: usize,
    limit: Option<usize>,
    initialized: bool,
    done: bool,
}

impl SseStream {
    /// Create a stream and the receiver its frames arrive on
    #[must_use]
    pub fn channel(retry: Duration) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = Self {
            tx,
            retry,
            sent: 0,
            limit: None,
            initialized: false,
            done: false,
        };
        (stream, rx)
    }

    fn write(&mut self, frame: Frame) -> bool {
        if self.tx.send(frame).is_err() {
            // Client went away; nothing more can be delivered.
            tracing::debug!("Stream receiver dropped, marking stream done");
            self.done = true;
            return false;
        }
        true
    }
}

impl EventStream for SseStream {
    fn init(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        let retry = self.retry;
        self.write(Frame::Open { retry });
    }

    fn send(&mut self, event: Event) {
        if self.done {
            tracing::debug!("Dropping event sent after stream completion");
            return;
        }
        self.init();
        if !self.write(Frame::Data(event)) {
            return;
        }
        self.sent += 1;
        if self.limit.is_some_and(|limit| self.sent >= limit) {
            self.done();
        }
    }

    fn err(&mut self, message: &str) {
        if self.done {
            tracing::debug!(message, "Dropping error sent after stream completion");
            return;
        }
        self.init();
        self.write(Frame::Error(message.to_string()));
        self.done = true;
    }

    fn sent_count(&self) -> usize {
        self.sent
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn done(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        // A stream that never opened has nothing to close.
        if self.initialized {
            self.write(Frame::Close);
        }
    }

    fn set_limit(&mut self, limit: usize) {
        self.limit = (limit > 0).then_some(limit);
    }
}

/// Response body of a committed stream
///
/// Yields the already-received preamble, then every later frame. Dropping
/// the body (client disconnect, server teardown) cancels the request-scope
/// token held by its guard.
#[derive(Debug)]
pub struct SseBody {
    first: Option<Frame>,
    frames: mpsc::UnboundedReceiver<Frame>,
    _request_scope: DropGuard,
}

impl SseBody {
    /// Wrap the receiving half of a stream whose first frame was consumed
    #[must_use]
    pub fn new(first: Frame, frames: mpsc::UnboundedReceiver<Frame>, guard: DropGuard) -> Self {
        Self {
            first: Some(first),
            frames,
            _request_scope: guard,
        }
    }
}

impl Stream for SseBody {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(frame) = self.first.take() {
            return Poll::Ready(Some(frame));
        }
        self.frames.poll_recv(cx)
    }
}
