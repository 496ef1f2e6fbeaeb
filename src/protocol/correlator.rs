//! Request/response correlation and subscription bookkeeping

use super::auth::{AuthChain, AuthError};
use super::types::{
    ProtocolError, PushEvent, Reconnected, SessionState, Subscription, SubscriptionKey,
};
use crate::telemetry::{increment, CounterMetric};
use crate::transport::{Frame, TransportConfig, TransportEvent, WsClient};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};

type Reply = oneshot::Sender<Result<Value, ProtocolError>>;

/// Mutable session bookkeeping shared by callers and the dispatcher
#[derive(Default)]
struct Shared {
    connected: bool,
    authenticated: bool,
    pending: HashMap<String, Reply>,
    subscriptions: BTreeMap<SubscriptionKey, Subscription>,
    /// Push names that have ever been subscribed to
    subscription_driven: HashSet<String>,
    handlers: HashMap<String, Vec<mpsc::UnboundedSender<PushEvent>>>,
}

impl Shared {
    /// Whether a push of this name should reach local handlers
    fn delivers(&self, name: &str) -> bool {
        !self.subscription_driven.contains(name)
            || self.subscriptions.values().any(|s| s.name == name)
    }

    fn fail_pending(&mut self, error: ProtocolError) -> usize {
        let count = self.pending.len();
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(error.clone()));
        }
        count
    }
}

struct Inner {
    outbound: mpsc::Sender<String>,
    request_timeout: Duration,
    next_id: AtomicU64,
    shared: Mutex<Shared>,
    auth: AuthChain,
    session: watch::Sender<SessionState>,
    reconnects: broadcast::Sender<Reconnected>,
}

/// Turns the raw frame stream into calls and typed subscriptions.
///
/// Cloning is cheap; all clones share one session. The dispatcher task
/// stops once every clone is dropped, which in turn closes the transport.
#[derive(Clone)]
pub struct ProtocolClient {
    inner: Arc<Inner>,
}

impl ProtocolClient {
    /// Connect, authenticate, and return once the session is ready
    pub async fn connect(
        config: TransportConfig,
        request_timeout: Duration,
        auth: AuthChain,
    ) -> Result<Self, ProtocolError> {
        let (events, outbound) = WsClient::new(config).connect();
        let client = Self::from_transport(events, outbound, request_timeout, auth);
        client.wait_ready().await?;
        Ok(client)
    }

    /// Build a client over an existing transport event stream and outbound sink
    pub fn from_transport(
        events: mpsc::Receiver<TransportEvent>,
        outbound: mpsc::Sender<String>,
        request_timeout: Duration,
        auth: AuthChain,
    ) -> Self {
        let (session, _) = watch::channel(SessionState::Connecting);
        let (reconnects, _) = broadcast::channel(16);
        let inner = Arc::new(Inner {
            outbound,
            request_timeout,
            next_id: AtomicU64::new(1),
            shared: Mutex::new(Shared::default()),
            auth,
            session,
            reconnects,
        });

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            run_dispatcher(weak, events).await;
        });

        Self { inner }
    }

    /// Wait until the session is authenticated, failing on fatal auth
    /// errors or transport shutdown
    pub async fn wait_ready(&self) -> Result<(), ProtocolError> {
        let mut rx = self.inner.session.subscribe();
        let state = rx
            .wait_for(|s| !matches!(s, SessionState::Connecting))
            .await
            .map_err(|_| ProtocolError::Closed)?
            .clone();
        match state {
            SessionState::Ready { .. } => Ok(()),
            SessionState::Failed(reason) => Err(ProtocolError::Auth(reason)),
            SessionState::Closed | SessionState::Connecting => Err(ProtocolError::Closed),
        }
    }

    /// Watch the session state
    pub fn session(&self) -> watch::Receiver<SessionState> {
        self.inner.session.subscribe()
    }

    /// Notifications published after every successful reconnect
    pub fn reconnects(&self) -> broadcast::Receiver<Reconnected> {
        self.inner.reconnects.subscribe()
    }

    /// Send a request and wait for the correlated reply
    pub async fn send(&self, name: &str, version: &str, body: Value) -> Result<Value, ProtocolError> {
        if !self.inner.shared.lock().await.authenticated {
            return Err(ProtocolError::NotAuthenticated);
        }

        let request_id = self.inner.next_request_id();
        tracing::debug!(request_id = %request_id, name, "Sending request");
        let frame = Frame::request(&request_id, name, version, body);
        self.inner.call(request_id, frame).await
    }

    /// Subscribe to a push stream. Subscribing an active key is a no-op.
    pub async fn subscribe(
        &self,
        name: &str,
        version: &str,
        params: Value,
    ) -> Result<SubscriptionKey, ProtocolError> {
        let subscription = Subscription::new(name, version, params);
        let key = subscription.key();

        let ready = {
            let mut shared = self.inner.shared.lock().await;
            if shared.subscriptions.contains_key(&key) {
                tracing::debug!(key = %key, "Subscription already active");
                return Ok(key);
            }
            shared.subscription_driven.insert(subscription.name.clone());
            shared
                .subscriptions
                .insert(key.clone(), subscription.clone());
            shared.connected && shared.authenticated
        };

        // otherwise the running or next handshake issues it
        if ready {
            self.inner.issue_subscription(&subscription).await?;
        }
        tracing::info!(key = %key, "Subscribed");
        Ok(key)
    }

    /// Cancel a subscription. Returns false when the key was not active.
    pub async fn unsubscribe(&self, key: &str) -> bool {
        let (subscription, ready) = {
            let mut shared = self.inner.shared.lock().await;
            let Some(subscription) = shared.subscriptions.remove(key) else {
                return false;
            };
            (subscription, shared.connected && shared.authenticated)
        };

        if ready {
            let request_id = self.inner.next_request_id();
            let frame = Frame::unsubscribe(
                &request_id,
                &subscription.name,
                &subscription.version,
                subscription.params.clone(),
            );
            if self.inner.outbound.send(frame.encode()).await.is_err() {
                tracing::debug!(key, "Transport gone while unsubscribing");
            }
        }
        tracing::info!(key, "Unsubscribed");
        true
    }

    /// Register a handler for pushes carrying `name`
    pub async fn events(&self, name: &str) -> mpsc::UnboundedReceiver<PushEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shared = self.inner.shared.lock().await;
        shared.handlers.entry(name.to_string()).or_default().push(tx);
        rx
    }

    /// Keys of every active subscription
    pub async fn active_subscriptions(&self) -> Vec<SubscriptionKey> {
        let shared = self.inner.shared.lock().await;
        shared.subscriptions.keys().cloned().collect()
    }

    /// Number of requests awaiting a reply
    pub async fn pending_count(&self) -> usize {
        self.inner.shared.lock().await.pending.len()
    }
}

impl Inner {
    fn next_request_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Register a pending reply, send the frame, and wait with a timeout
    /// that runs independently of the connection
    async fn call(&self, request_id: String, frame: Frame) -> Result<Value, ProtocolError> {
        let (tx, rx) = oneshot::channel();
        self.shared.lock().await.pending.insert(request_id.clone(), tx);

        if self.outbound.send(frame.encode()).await.is_err() {
            self.shared.lock().await.pending.remove(&request_id);
            return Err(ProtocolError::Closed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProtocolError::ConnectionLost),
            Err(_) => {
                self.shared.lock().await.pending.remove(&request_id);
                increment(CounterMetric::RequestTimeouts);
                tracing::warn!(request_id = %request_id, "Request timed out");
                Err(ProtocolError::Timeout(self.request_timeout))
            }
        }
    }

    async fn issue_subscription(&self, subscription: &Subscription) -> Result<(), ProtocolError> {
        let request_id = self.next_request_id();
        let frame = Frame::subscribe(
            &request_id,
            &subscription.name,
            &subscription.version,
            subscription.params.clone(),
        );
        self.outbound
            .send(frame.encode())
            .await
            .map_err(|_| ProtocolError::Closed)
    }

    /// Present tokens from each authenticator in turn until one is accepted
    async fn authenticate(&self) -> Result<(), AuthError> {
        let mut failures = Vec::new();

        for authenticator in self.auth.authenticators() {
            let token = match authenticator.token().await {
                Ok(token) => token,
                Err(e) => {
                    tracing::warn!(method = authenticator.name(), error = %e, "Token exchange failed");
                    failures.push(format!("{}: {}", authenticator.name(), e));
                    continue;
                }
            };

            let request_id = self.next_request_id();
            let frame = Frame::authenticate(&request_id, token.as_str());
            match self.call(request_id, frame).await {
                Ok(_) => {
                    tracing::info!(method = authenticator.name(), "Session authenticated");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(method = authenticator.name(), error = %e, "Session token refused");
                    failures.push(format!("{}: {}", authenticator.name(), e));
                }
            }
        }

        Err(AuthError::Exhausted(failures))
    }

    /// Authenticate, re-issue every active subscription, then open the
    /// session for callers
    async fn handshake(&self, generation: u64) {
        if let Err(e) = self.authenticate().await {
            // a later transport drop resets this; only exhaustion is reported
            let still_current = self.shared.lock().await.connected;
            if still_current {
                tracing::error!(error = %e, "Authentication exhausted, session unusable");
                self.session.send_replace(SessionState::Failed(e.to_string()));
            }
            return;
        }

        // Subscriptions registered while earlier ones are being issued are
        // picked up by the next pass; the session opens under the same lock
        // that finds nothing left to issue.
        let mut issued: HashSet<SubscriptionKey> = HashSet::new();
        loop {
            let missing: Vec<Subscription> = {
                let mut shared = self.shared.lock().await;
                if !shared.connected {
                    return;
                }
                let missing: Vec<Subscription> = shared
                    .subscriptions
                    .iter()
                    .filter(|(key, _)| !issued.contains(*key))
                    .map(|(_, subscription)| subscription.clone())
                    .collect();
                if missing.is_empty() {
                    shared.authenticated = true;
                    break;
                }
                missing
            };
            for subscription in &missing {
                if self.issue_subscription(subscription).await.is_err() {
                    return;
                }
                issued.insert(subscription.key());
            }
        }
        self.session.send_replace(SessionState::Ready { generation });

        if generation > 1 {
            increment(CounterMetric::Reconnects);
            tracing::info!(
                generation,
                resubscribed = issued.len(),
                "Session restored after reconnect"
            );
            let _ = self.reconnects.send(Reconnected {
                generation,
                resubscribed: issued.len(),
            });
        }
    }

    /// Route one inbound frame: correlated replies first, pushes otherwise
    async fn dispatch(&self, text: &str) {
        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    preview = %text.chars().take(100).collect::<String>(),
                    "Dropping malformed frame"
                );
                return;
            }
        };

        let mut shared = self.shared.lock().await;

        if let Some(reply) = frame
            .request_id
            .as_ref()
            .and_then(|id| shared.pending.remove(id))
        {
            let result = if frame.is_error() {
                Err(ProtocolError::Rejected {
                    status: frame.status,
                    message: frame.error_message(),
                })
            } else {
                Ok(frame.msg)
            };
            let _ = reply.send(result);
            return;
        }

        if !shared.delivers(&frame.name) {
            tracing::trace!(name = %frame.name, "Push for cancelled subscription dropped");
            return;
        }

        if let Some(handlers) = shared.handlers.get_mut(&frame.name) {
            let event = PushEvent {
                name: frame.name,
                msg: frame.msg,
            };
            handlers.retain(|tx| tx.send(event.clone()).is_ok());
        } else {
            tracing::trace!(name = %frame.name, "Unhandled push");
        }
    }

    async fn connection_lost(&self, closed: bool) {
        let failed = {
            let mut shared = self.shared.lock().await;
            shared.connected = false;
            shared.authenticated = false;
            shared.fail_pending(ProtocolError::ConnectionLost)
        };
        if failed > 0 {
            tracing::warn!(failed, "Failed in-flight requests after connection loss");
        }
        let next = if closed {
            SessionState::Closed
        } else {
            SessionState::Connecting
        };
        self.session.send_replace(next);
    }
}

/// Single consumer of transport events
async fn run_dispatcher(inner: Weak<Inner>, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            tracing::debug!("Protocol client dropped, stopping dispatcher");
            break;
        };

        match event {
            TransportEvent::Connected { generation } => {
                inner.shared.lock().await.connected = true;
                tracing::info!(generation, "Transport connected, authenticating");
                tokio::spawn(async move {
                    inner.handshake(generation).await;
                });
            }
            TransportEvent::Text(text) => inner.dispatch(&text).await,
            TransportEvent::Reconnecting { attempt } => {
                tracing::warn!(attempt, "Transport reconnecting");
                inner.connection_lost(false).await;
            }
            TransportEvent::Disconnected => {
                tracing::warn!("Transport disconnected");
                inner.connection_lost(true).await;
                break;
            }
        }
    }
}
