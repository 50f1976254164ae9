//! End-to-end behaviour of streaming sessions: dedup, termination,
//! subscription lifetime, and cancellation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gateway_core::bus::{ChangeBus, Subscription, Topic, TopicBus};
use gateway_core::config::StreamConfig;
use gateway_core::problem::{OBJECT_NOT_FOUND, RATE_LIMIT_EXCEEDED, UNEXPECTED_STREAM_ERROR};
use gateway_core::rate_limit::{KeyedRateLimiter, RateLimitConfig};
use gateway_core::{
    Action, ActionBase, ActionError, Dispatcher, Event, EventStream, Frame, Outcome,
    ProducesPushEvents, ProducesSnapshotOnChange, Representation, RequestScope, SseStream,
    StoreError, StreamCapability, StreamEngine,
};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const RETRY: Duration = Duration::from_millis(1000);
const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Helpers
// =============================================================================

/// Bus wrapper counting registrations and reporting each release
struct CountingBus {
    inner: TopicBus,
    subscribed: AtomicUsize,
    unsubscribed: AtomicUsize,
    released: mpsc::UnboundedSender<Topic>,
}

impl CountingBus {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Topic>) {
        let (released, rx) = mpsc::unbounded_channel();
        let bus = Arc::new(Self {
            inner: TopicBus::new(),
            subscribed: AtomicUsize::new(0),
            unsubscribed: AtomicUsize::new(0),
            released,
        });
        (bus, rx)
    }

    fn publish(&self, topic: &Topic) -> usize {
        self.inner.publish(topic)
    }

    fn counts(&self) -> (usize, usize) {
        (
            self.subscribed.load(Ordering::SeqCst),
            self.unsubscribed.load(Ordering::SeqCst),
        )
    }
}

impl ChangeBus for CountingBus {
    fn subscribe(&self, topic: &Topic) -> Subscription {
        self.subscribed.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribe(topic)
    }

    fn unsubscribe(&self, subscription: Subscription, topic: &Topic) {
        self.unsubscribed.fetch_add(1, Ordering::SeqCst);
        self.inner.unsubscribe(subscription, topic);
        let _ = self.released.send(topic.clone());
    }
}

/// Snapshot action replaying a script of load results
///
/// Once the script runs out the last value repeats. Each load is reported on
/// `loads` so tests can step the session.
struct Scripted {
    base: ActionBase,
    topic: Topic,
    script: VecDeque<Result<Value, ActionError>>,
    last: Value,
    loads: mpsc::UnboundedSender<usize>,
    count: usize,
}

impl Scripted {
    fn new(
        topic: Topic,
        script: Vec<Result<Value, ActionError>>,
    ) -> (Self, mpsc::UnboundedReceiver<usize>) {
        let (loads, rx) = mpsc::unbounded_channel();
        let action = Self {
            base: ActionBase::default(),
            topic,
            script: script.into(),
            last: Value::Null,
            loads,
            count: 0,
        };
        (action, rx)
    }
}

impl Action for Scripted {
    fn base(&self) -> &ActionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ActionBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn event_stream(&mut self) -> Option<StreamCapability<'_>> {
        Some(StreamCapability::Snapshot(self))
    }
}

impl ProducesSnapshotOnChange for Scripted {
    fn topic(&self) -> Topic {
        self.topic.clone()
    }

    fn load_event(&mut self) -> Option<Event> {
        self.count += 1;
        let _ = self.loads.send(self.count);
        match self.script.pop_front() {
            Some(Ok(value)) => {
                self.last = value;
                Some(Event::new(self.last.clone()))
            }
            Some(Err(err)) => {
                self.base.fail(err);
                None
            }
            None => Some(Event::new(self.last.clone())),
        }
    }
}

/// Push action emitting one event per evaluation
struct Ticker {
    base: ActionBase,
    topic: Topic,
    ticks: u64,
}

impl Action for Ticker {
    fn base(&self) -> &ActionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ActionBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "ticker"
    }

    fn event_stream(&mut self) -> Option<StreamCapability<'_>> {
        Some(StreamCapability::Push(self))
    }
}

impl ProducesPushEvents for Ticker {
    fn topic(&self) -> Topic {
        self.topic.clone()
    }

    fn push_events(&mut self, stream: &mut dyn EventStream) {
        self.ticks += 1;
        stream.send(Event::with_id(self.ticks.to_string(), json!(self.ticks)));
    }
}

/// Push action that never has anything to send
///
/// Each evaluation is reported on `evaluations`.
struct Silent {
    base: ActionBase,
    topic: Topic,
    evaluations: mpsc::UnboundedSender<usize>,
    count: usize,
}

impl Silent {
    fn new(topic: Topic) -> (Self, mpsc::UnboundedReceiver<usize>) {
        let (evaluations, rx) = mpsc::unbounded_channel();
        let action = Self {
            base: ActionBase::default(),
            topic,
            evaluations,
            count: 0,
        };
        (action, rx)
    }
}

impl Action for Silent {
    fn base(&self) -> &ActionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ActionBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "silent"
    }

    fn event_stream(&mut self) -> Option<StreamCapability<'_>> {
        Some(StreamCapability::Push(self))
    }
}

impl ProducesPushEvents for Silent {
    fn topic(&self) -> Topic {
        self.topic.clone()
    }

    fn push_events(&mut self, _stream: &mut dyn EventStream) {
        self.count += 1;
        let _ = self.evaluations.send(self.count);
    }
}

fn engine(bus: Arc<CountingBus>, shutdown: CancellationToken) -> StreamEngine {
    StreamEngine::new(bus, shutdown, StreamConfig::default())
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

async fn next_load(loads: &mut mpsc::UnboundedReceiver<usize>) -> usize {
    tokio::time::timeout(WAIT, loads.recv())
        .await
        .expect("load timed out")
        .expect("action dropped")
}

fn open() -> Frame {
    Frame::Open { retry: RETRY }
}

fn data(value: Value) -> Frame {
    Frame::Data(Event::new(value))
}

// =============================================================================
// Snapshot sessions
// =============================================================================

#[tokio::test]
async fn test_unchanged_snapshots_are_emitted_once() {
    let (bus, _released) = CountingBus::new();
    let topic = Topic::new("account:GABC");
    let (mut action, mut loads) = Scripted::new(
        topic.clone(),
        vec![Ok(json!("H1")), Ok(json!("H1")), Ok(json!("H2"))],
    );
    let (mut stream, mut frames) = SseStream::channel(RETRY);
    let request = CancellationToken::new();

    let engine = engine(Arc::clone(&bus), CancellationToken::new());
    let cancel = request.clone();
    let session = tokio::spawn(async move {
        engine.run(&mut action, &mut stream, "client", &cancel).await
    });

    assert_eq!(next_load(&mut loads).await, 1);
    assert_eq!(bus.publish(&topic), 1);
    assert_eq!(next_load(&mut loads).await, 2);
    assert_eq!(bus.publish(&topic), 1);
    assert_eq!(next_load(&mut loads).await, 3);

    request.cancel();
    assert!(session.await.unwrap().is_ok());

    assert_eq!(
        drain(&mut frames),
        vec![open(), data(json!("H1")), data(json!("H2")), Frame::Close]
    );
    assert_eq!(bus.counts(), (1, 1));
}

#[tokio::test]
async fn test_failure_before_preamble_is_a_document() {
    let (bus, _released) = CountingBus::new();
    let (mut action, _loads) = Scripted::new(
        Topic::new("account:GABC"),
        vec![Err(StoreError::NoRows.into())],
    );
    let (mut stream, mut frames) = SseStream::channel(RETRY);

    let result = engine(Arc::clone(&bus), CancellationToken::new())
        .run(&mut action, &mut stream, "client", &CancellationToken::new())
        .await;

    let problem = result.unwrap_err();
    assert_eq!(problem.status, 404);
    assert!(drain(&mut frames).is_empty(), "nothing may be written");
    assert_eq!(bus.counts(), (1, 1));
}

#[tokio::test]
async fn test_failure_after_preamble_is_a_stream_frame() {
    let (bus, _released) = CountingBus::new();
    let topic = Topic::new("account:GABC");
    let (mut action, mut loads) = Scripted::new(
        topic.clone(),
        vec![
            Ok(json!({"v": 1})),
            Err(StoreError::NoRows.into()),
        ],
    );
    let (mut stream, mut frames) = SseStream::channel(RETRY);

    let engine = engine(Arc::clone(&bus), CancellationToken::new());
    let session = tokio::spawn(async move {
        engine
            .run(&mut action, &mut stream, "client", &CancellationToken::new())
            .await
    });

    next_load(&mut loads).await;
    bus.publish(&topic);
    assert!(session.await.unwrap().is_ok());

    assert_eq!(
        drain(&mut frames),
        vec![
            open(),
            data(json!({"v": 1})),
            Frame::Error(OBJECT_NOT_FOUND.into()),
        ]
    );
}

#[tokio::test]
async fn test_backend_failure_mid_stream_is_generic() {
    let (bus, _released) = CountingBus::new();
    let topic = Topic::new("account:GABC");
    let (mut action, mut loads) = Scripted::new(
        topic.clone(),
        vec![
            Ok(json!(1)),
            Err(StoreError::Backend("disk on fire".into()).into()),
        ],
    );
    let (mut stream, mut frames) = SseStream::channel(RETRY);

    let engine = engine(Arc::clone(&bus), CancellationToken::new());
    let session = tokio::spawn(async move {
        engine
            .run(&mut action, &mut stream, "client", &CancellationToken::new())
            .await
    });

    next_load(&mut loads).await;
    bus.publish(&topic);
    session.await.unwrap().unwrap();

    let frames = drain(&mut frames);
    assert_eq!(frames.last(), Some(&Frame::Error(UNEXPECTED_STREAM_ERROR.into())));
    assert!(!frames.iter().any(|f| matches!(f, Frame::Error(m) if m.contains("disk"))));
}

#[tokio::test]
async fn test_snapshot_frame_limit_closes_stream() {
    let (bus, _released) = CountingBus::new();
    let topic = Topic::new("account:GABC");
    let (mut action, mut loads) = Scripted::new(
        topic.clone(),
        vec![Ok(json!(1)), Ok(json!(2)), Ok(json!(3))],
    );
    let (mut stream, mut frames) = SseStream::channel(RETRY);

    let engine = StreamEngine::new(
        Arc::clone(&bus) as Arc<dyn ChangeBus>,
        CancellationToken::new(),
        StreamConfig::default().with_snapshot_frame_limit(2),
    );
    let session = tokio::spawn(async move {
        engine
            .run(&mut action, &mut stream, "client", &CancellationToken::new())
            .await
    });

    next_load(&mut loads).await;
    bus.publish(&topic);
    session.await.unwrap().unwrap();

    assert_eq!(
        drain(&mut frames),
        vec![open(), data(json!(1)), data(json!(2)), Frame::Close]
    );
    assert_eq!(bus.counts(), (1, 1));
}

// =============================================================================
// Rate limiting
// =============================================================================

#[tokio::test]
async fn test_session_is_limited_between_iterations() {
    let (bus, _released) = CountingBus::new();
    let topic = Topic::new("account:GABC");
    let limiter = KeyedRateLimiter::new(RateLimitConfig::new().with_per_hour(1).with_burst(2));
    let mut action = Ticker {
        base: ActionBase::default(),
        topic: topic.clone(),
        ticks: 0,
    };
    let (mut stream, mut frames) = SseStream::channel(RETRY);

    let engine = engine(Arc::clone(&bus), CancellationToken::new())
        .with_rate_limiter(Arc::new(limiter));
    let session = tokio::spawn(async move {
        let result = engine
            .run(&mut action, &mut stream, "client", &CancellationToken::new())
            .await;
        (result, action.ticks)
    });

    // Two iterations fit the burst; the third check is refused.
    let first = tokio::time::timeout(WAIT, frames.recv()).await.unwrap();
    assert_eq!(first, Some(open()));
    let tick = tokio::time::timeout(WAIT, frames.recv()).await.unwrap();
    assert!(matches!(tick, Some(Frame::Data(_))));
    bus.publish(&topic);
    let tick = tokio::time::timeout(WAIT, frames.recv()).await.unwrap();
    assert!(matches!(tick, Some(Frame::Data(_))));
    bus.publish(&topic);

    let (result, ticks) = session.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(ticks, 2);
    assert_eq!(
        drain(&mut frames),
        vec![Frame::Error(RATE_LIMIT_EXCEEDED.into())]
    );
}

// =============================================================================
// Push sessions
// =============================================================================

#[tokio::test]
async fn test_preamble_sent_once_without_data() {
    let (bus, _released) = CountingBus::new();
    let topic = Topic::new("account:GQUIET");
    let (mut action, mut evaluations) = Silent::new(topic.clone());
    let (mut stream, mut frames) = SseStream::channel(RETRY);
    let request = CancellationToken::new();

    let engine = engine(Arc::clone(&bus), CancellationToken::new());
    let cancel = request.clone();
    let session = tokio::spawn(async move {
        engine.run(&mut action, &mut stream, "client", &cancel).await
    });

    assert_eq!(next_load(&mut evaluations).await, 1);
    for expected in 2..=4 {
        assert_eq!(bus.publish(&topic), 1);
        assert_eq!(next_load(&mut evaluations).await, expected);
    }

    request.cancel();
    assert!(session.await.unwrap().is_ok());

    assert_eq!(drain(&mut frames), vec![open(), Frame::Close]);
    assert_eq!(bus.counts(), (1, 1));
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_shutdown_ends_every_session() {
    let (bus, _released) = CountingBus::new();
    let shutdown = CancellationToken::new();
    let engine = engine(Arc::clone(&bus), shutdown.clone());

    let mut sessions = Vec::new();
    let mut receivers = Vec::new();
    for address in ["GA", "GB"] {
        let (mut action, mut loads) =
            Scripted::new(Topic::account(address), vec![Ok(json!(address))]);
        let (mut stream, frames) = SseStream::channel(RETRY);
        let engine = engine.clone();
        sessions.push(tokio::spawn(async move {
            engine
                .run(&mut action, &mut stream, address, &CancellationToken::new())
                .await
        }));
        next_load(&mut loads).await;
        receivers.push(frames);
    }

    shutdown.cancel();
    for session in sessions {
        assert!(session.await.unwrap().is_ok());
    }
    for mut frames in receivers {
        assert_eq!(drain(&mut frames).last(), Some(&Frame::Close));
    }
    assert_eq!(bus.counts(), (2, 2));
}

#[tokio::test]
async fn test_dropping_response_releases_subscription_once() {
    let (bus, mut released) = CountingBus::new();
    let topic = Topic::new("account:GABC");
    let (action, mut loads) = Scripted::new(topic.clone(), vec![Ok(json!("H1"))]);
    let dispatcher = Dispatcher::new(engine(Arc::clone(&bus), CancellationToken::new()));

    let outcome = dispatcher
        .execute(
            Box::new(action),
            Representation::EventStream,
            RequestScope::new("client"),
        )
        .await;
    let Outcome::Stream(mut body) = outcome else {
        panic!("expected a committed stream");
    };
    assert_eq!(body.next().await, Some(open()));
    next_load(&mut loads).await;

    drop(body);

    let topic_released = tokio::time::timeout(WAIT, released.recv())
        .await
        .expect("subscription was not released");
    assert_eq!(topic_released, Some(topic.clone()));
    assert_eq!(bus.counts(), (1, 1));
    assert_eq!(bus.publish(&topic), 0);
}

#[tokio::test]
async fn test_stream_failure_before_preamble_is_problem_outcome() {
    let (bus, _released) = CountingBus::new();
    let (action, _loads) = Scripted::new(
        Topic::new("account:GABC"),
        vec![Err(ActionError::invalid_param("cursor", "not a number"))],
    );
    let dispatcher = Dispatcher::new(engine(Arc::clone(&bus), CancellationToken::new()));

    let outcome = dispatcher
        .execute(
            Box::new(action),
            Representation::EventStream,
            RequestScope::new("client"),
        )
        .await;

    let Outcome::Problem(problem) = outcome else {
        panic!("expected a problem document");
    };
    assert_eq!(problem.status, 400);
    assert_eq!(bus.counts(), (1, 1));
}
