//! WebSocket client with automatic reconnection

use super::types::{TransportConfig, TransportError, TransportEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// How a single connection ended
enum StreamEnd {
    /// Our side went away: consumer or sender dropped
    LocalShutdown,
}

/// One logical venue connection with automatic reconnection and ping/pong handling
pub struct WsClient {
    config: TransportConfig,
}

impl WsClient {
    /// Create a new WebSocket client with the given configuration
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Create a new client with just a URL using default config
    pub fn with_url(url: impl Into<String>) -> Self {
        Self::new(TransportConfig::new(url))
    }

    /// Get the configured URL
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Connect and return the event receiver and the outbound frame sender.
    ///
    /// A background task owns the socket. It reconnects with exponential
    /// backoff after any failure or remote close, and reports every
    /// connection transition as a [`TransportEvent`]. Frames queued while
    /// the connection is down are dropped on reconnect.
    pub fn connect(&self) -> (mpsc::Receiver<TransportEvent>, mpsc::Sender<String>) {
        let (event_tx, event_rx) = mpsc::channel(1024);
        let (send_tx, send_rx) = mpsc::channel(256);
        let config = self.config.clone();

        tokio::spawn(async move {
            if let Err(e) = Self::run_connection_loop(config, event_tx, send_rx).await {
                tracing::error!(error = %e, "Transport connection loop failed");
            }
        });

        (event_rx, send_tx)
    }

    /// Run the connection loop with automatic reconnection
    async fn run_connection_loop(
        config: TransportConfig,
        tx: mpsc::Sender<TransportEvent>,
        mut send_rx: mpsc::Receiver<String>,
    ) -> Result<(), TransportError> {
        let mut reconnect_attempts = 0;
        let mut reconnect_delay = config.initial_reconnect_delay;
        let mut generation = 0u64;

        loop {
            let connected_before = generation;
            match Self::connect_and_stream(&config, &tx, &mut send_rx, &mut generation).await {
                Ok(StreamEnd::LocalShutdown) => {
                    tracing::info!("Transport closed locally");
                    let _ = tx.send(TransportEvent::Disconnected).await;
                    break;
                }
                Err(e) => {
                    if generation > connected_before {
                        // the dropped connection was healthy, start a fresh backoff
                        reconnect_attempts = 0;
                        reconnect_delay = config.initial_reconnect_delay;
                    }
                    reconnect_attempts += 1;
                    tracing::warn!(
                        error = %e,
                        attempt = reconnect_attempts,
                        "Transport connection error, reconnecting..."
                    );

                    // Check max reconnects (0 = infinite)
                    if config.max_reconnect_attempts > 0
                        && reconnect_attempts >= config.max_reconnect_attempts
                    {
                        tracing::error!("Max reconnection attempts reached");
                        let _ = tx.send(TransportEvent::Disconnected).await;
                        return Err(TransportError::MaxReconnectsExceeded);
                    }

                    if tx.is_closed() {
                        tracing::info!("Receiver dropped, stopping reconnection");
                        break;
                    }

                    let _ = tx
                        .send(TransportEvent::Reconnecting {
                            attempt: reconnect_attempts,
                        })
                        .await;

                    sleep(reconnect_delay).await;
                    reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);

                    let mut dropped = 0usize;
                    while send_rx.try_recv().is_ok() {
                        dropped += 1;
                    }
                    if dropped > 0 {
                        tracing::debug!(dropped, "Discarded frames queued during outage");
                    }
                }
            }
        }

        Ok(())
    }

    /// Connect to the venue and stream frames until the connection ends
    async fn connect_and_stream(
        config: &TransportConfig,
        tx: &mpsc::Sender<TransportEvent>,
        send_rx: &mut mpsc::Receiver<String>,
        generation: &mut u64,
    ) -> Result<StreamEnd, TransportError> {
        tracing::info!(url = %config.url, "Connecting to venue stream");

        let (ws_stream, _response) = connect_async(config.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        *generation += 1;
        tracing::info!(generation = *generation, "Venue stream connected");

        if tx
            .send(TransportEvent::Connected {
                generation: *generation,
            })
            .await
            .is_err()
        {
            return Ok(StreamEnd::LocalShutdown);
        }

        let mut ping_interval = tokio::time::interval(config.ping_interval);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // first tick completes immediately
        ping_interval.tick().await;
        let mut waiting_for_pong = false;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if tx.send(TransportEvent::Text(text)).await.is_err() {
                                tracing::debug!("Receiver dropped, closing connection");
                                return Ok(StreamEnd::LocalShutdown);
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            match String::from_utf8(data) {
                                Ok(text) => {
                                    if tx.send(TransportEvent::Text(text)).await.is_err() {
                                        return Ok(StreamEnd::LocalShutdown);
                                    }
                                }
                                Err(_) => tracing::debug!("Ignoring non-UTF-8 binary frame"),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await
                                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            waiting_for_pong = false;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Received close frame");
                            return Err(TransportError::ConnectionFailed("Closed by venue".into()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(TransportError::ConnectionFailed(e.to_string()));
                        }
                        None => {
                            return Err(TransportError::ConnectionFailed("Stream ended unexpectedly".into()));
                        }
                    }
                }

                outbound = send_rx.recv() => {
                    match outbound {
                        Some(text) => {
                            tracing::trace!(len = text.len(), "Sending frame");
                            write.send(Message::Text(text)).await
                                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(StreamEnd::LocalShutdown);
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    if waiting_for_pong {
                        return Err(TransportError::PongTimeout);
                    }
                    write.send(Message::Ping(vec![])).await
                        .map_err(|e| TransportError::SendFailed(e.to_string()))?;
                    waiting_for_pong = true;
                }
            }
        }
    }
}
