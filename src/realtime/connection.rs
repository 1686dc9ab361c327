//! Websocket connection state machine.
//!
//! [`RealtimeClient::run`] drives one connection from `Connecting` to
//! `Closed`: it forwards decoded transactions to the consumer, sends the
//! subscriptions the consumer requests, and keeps the socket alive with
//! ping/pong. Reconnecting is the caller's job.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::messages::{
    Channel, IncomingMessage, OutgoingCommand, Subscription, TransactionEvent, parse_message,
};
use super::subscription::SubscriptionSet;

/// Lifecycle of the realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting,
    /// Socket open and subscribed.
    Open,
    /// Close frame being sent.
    Closing,
    /// No socket.
    Closed,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The handshake failed.
    Handshake(String),
    /// The server closed the socket or the stream ended.
    Remote(Option<String>),
    /// A read or write failed.
    Transport(String),
    /// The server sent something we do not understand.
    Protocol(String),
    /// No pong arrived within the liveness timeout.
    PongTimeout,
    /// The event consumer went away.
    ConsumerGone,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handshake(e) => write!(f, "handshake failed: {e}"),
            Self::Remote(Some(reason)) => write!(f, "closed by server: {reason}"),
            Self::Remote(None) => write!(f, "closed by server"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Protocol(e) => write!(f, "protocol violation: {e}"),
            Self::PongTimeout => write!(f, "pong timeout"),
            Self::ConsumerGone => write!(f, "event consumer dropped"),
        }
    }
}

/// Lifecycle notifications delivered to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEvent {
    /// The socket is open; subscriptions may be sent.
    Connected,
    /// A transaction arrived on a subscribed channel.
    Transaction(Channel, TransactionEvent),
    /// The socket is closed.
    Disconnected(CloseReason),
}

/// Websocket client for the middleware's realtime channel.
#[derive(Debug)]
pub struct RealtimeClient {
    url: String,
    ping_interval: Duration,
    pong_timeout: Duration,
    state: watch::Sender<ConnectionState>,
}

impl RealtimeClient {
    /// Creates a client for `url` in state `Closed`.
    #[must_use]
    pub fn new(url: impl Into<String>, ping_interval: Duration, pong_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            url: url.into(),
            ping_interval,
            pong_timeout,
            state,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver observing state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = ?previous, to = ?next, "realtime connection state");
        }
    }

    /// Runs one connection until it closes and returns why.
    ///
    /// Emits `Connected` once open and `Disconnected` once closed, with
    /// every decoded transaction in between. Subscriptions received on
    /// `commands` are sent once per connection.
    pub async fn run(
        &self,
        events: mpsc::Sender<RealtimeEvent>,
        mut commands: mpsc::Receiver<Subscription>,
    ) -> CloseReason {
        self.transition(ConnectionState::Connecting);
        let socket = match connect_async(self.url.as_str()).await {
            Ok((socket, _response)) => socket,
            Err(e) => {
                self.transition(ConnectionState::Closed);
                let reason = CloseReason::Handshake(e.to_string());
                let _ = events.send(RealtimeEvent::Disconnected(reason.clone())).await;
                return reason;
            }
        };
        self.transition(ConnectionState::Open);
        tracing::info!(url = %self.url, "realtime connection open");

        let (mut ws_tx, mut ws_rx) = socket.split();
        let mut subs = SubscriptionSet::new();
        let mut ping = tokio::time::interval(self.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping.tick().await;
        let mut pong_deadline: Option<Instant> = None;

        let reason = if events.send(RealtimeEvent::Connected).await.is_err() {
            CloseReason::ConsumerGone
        } else {
            loop {
                let deadline = pong_deadline.unwrap_or_else(Instant::now);
                tokio::select! {
                    msg = ws_rx.next() => match msg {
                        Some(Ok(Message::Text(text))) => match parse_message(text.as_str()) {
                            Ok(IncomingMessage::Transaction(channel, tx)) => {
                                if events
                                    .send(RealtimeEvent::Transaction(channel, tx))
                                    .await
                                    .is_err()
                                {
                                    break CloseReason::ConsumerGone;
                                }
                            }
                            Ok(IncomingMessage::Ack(ack)) => {
                                tracing::debug!(
                                    transactions = ack.transactions,
                                    targets = ack.targets.len(),
                                    "subscriptions acknowledged"
                                );
                                subs.acknowledge(ack);
                            }
                            Ok(IncomingMessage::AlreadySubscribed) => {}
                            Err(e) => break CloseReason::Protocol(e.to_string()),
                        },
                        Some(Ok(Message::Pong(_))) => pong_deadline = None,
                        Some(Ok(Message::Close(frame))) => {
                            break CloseReason::Remote(frame.map(|f| f.reason.as_str().to_string()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break CloseReason::Transport(e.to_string()),
                        None => break CloseReason::Remote(None),
                    },
                    Some(subscription) = commands.recv() => {
                        if !subs.request(&subscription) {
                            continue;
                        }
                        let command = OutgoingCommand::subscribe(&subscription);
                        let json = match serde_json::to_string(&command) {
                            Ok(json) => json,
                            Err(e) => break CloseReason::Protocol(e.to_string()),
                        };
                        if let Err(e) = ws_tx.send(Message::text(json)).await {
                            break CloseReason::Transport(e.to_string());
                        }
                    }
                    _ = ping.tick() => {
                        if pong_deadline.is_none() {
                            if let Err(e) = ws_tx.send(Message::Ping(Vec::new().into())).await {
                                break CloseReason::Transport(e.to_string());
                            }
                            pong_deadline = Some(Instant::now() + self.pong_timeout);
                        }
                    }
                    () = tokio::time::sleep_until(deadline), if pong_deadline.is_some() => {
                        break CloseReason::PongTimeout;
                    }
                }
            }
        };

        self.transition(ConnectionState::Closing);
        let _ = ws_tx.send(Message::Close(None)).await;
        let _ = ws_tx.close().await;
        self.transition(ConnectionState::Closed);
        tracing::info!(url = %self.url, reason = %reason, pending = subs.pending(), "realtime connection closed");
        let _ = events.send(RealtimeEvent::Disconnected(reason.clone())).await;
        reason
    }
}
