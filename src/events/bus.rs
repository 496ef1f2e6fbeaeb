//! Per-run event bus

use super::sink::{BufferedSink, EventSink, SinkError};
use super::types::{EventType, TradingEvent};
use crate::clock::Clock;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Handle returned by [`EventBus::subscribe`]
pub type SubscriberId = u64;

type Handler = Arc<dyn Fn(&TradingEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriberId,
    filter: Option<EventType>,
    handler: Handler,
}

struct BusInner {
    run_id: String,
    clock: Clock,
    seq: AtomicU64,
    next_subscriber: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

/// Typed publish/subscribe for one run.
///
/// Clones share the run id, sequence counter and subscribers. Handlers run
/// synchronously in emission order and may emit further events.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus with a random run id
    pub fn new(clock: Clock) -> Self {
        Self::with_run_id(uuid::Uuid::new_v4().to_string(), clock)
    }

    /// Create a bus with a fixed run id
    pub fn with_run_id(run_id: impl Into<String>, clock: Clock) -> Self {
        Self {
            inner: Arc::new(BusInner {
                run_id: run_id.into(),
                clock,
                seq: AtomicU64::new(0),
                next_subscriber: AtomicU64::new(1),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    /// Append an event and deliver it to matching subscribers
    pub fn emit(&self, event_type: EventType, payload: Value) -> TradingEvent {
        let event = TradingEvent {
            run_id: self.inner.run_id.clone(),
            seq: self.inner.seq.fetch_add(1, Ordering::SeqCst) + 1,
            event_type,
            timestamp: self.inner.clock.now(),
            payload,
        };
        tracing::debug!(seq = event.seq, event_type = %event_type, "Event emitted");

        // handlers run outside the lock so they can emit
        let handlers: Vec<Handler> = self
            .subscribers()
            .iter()
            .filter(|s| s.filter.map_or(true, |f| f == event_type))
            .map(|s| s.handler.clone())
            .collect();
        for handler in handlers {
            handler(&event);
        }
        event
    }

    /// Receive events of one type
    pub fn subscribe(
        &self,
        event_type: EventType,
        handler: impl Fn(&TradingEvent) + Send + Sync + 'static,
    ) -> SubscriberId {
        self.add_subscriber(Some(event_type), Arc::new(handler))
    }

    /// Receive every event
    pub fn subscribe_all(&self, handler: impl Fn(&TradingEvent) + Send + Sync + 'static) -> SubscriberId {
        self.add_subscriber(None, Arc::new(handler))
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Persist every event through a buffered sink
    pub fn attach_sink<S: EventSink + 'static>(&self, sink: BufferedSink<S>) -> SinkHandle<S> {
        let shared = Arc::new(Mutex::new(sink));
        let writer = shared.clone();
        let id = self.subscribe_all(move |event| {
            let mut sink = writer.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = sink.record(event.clone()) {
                tracing::error!(error = %e, "Failed to persist event");
            }
        });
        SinkHandle { id, sink: shared }
    }

    fn add_subscriber(&self, filter: Option<EventType>, handler: Handler) -> SubscriberId {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.subscribers().push(Subscriber { id, filter, handler });
        id
    }

    /// Subscriber list, recovered if a panic poisoned the lock
    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("run_id", &self.inner.run_id)
            .field("seq", &self.inner.seq.load(Ordering::SeqCst))
            .finish()
    }
}

/// Handle to a sink attached with [`EventBus::attach_sink`]
pub struct SinkHandle<S: EventSink> {
    id: SubscriberId,
    sink: Arc<Mutex<BufferedSink<S>>>,
}

impl<S: EventSink> SinkHandle<S> {
    pub fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    /// Write out buffered events now
    pub fn flush(&self) -> Result<(), SinkError> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
    }
}
