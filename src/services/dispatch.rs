//! Courier dispatch: fan-out of order events to live courier connections
//!
//! A single [`DispatchWorker`] task owns the connection registry. Request
//! handlers never touch it directly; they talk to the worker through
//! [`CourierDispatchBroadcaster`]:
//!
//! - registration and deregistration go over an unbounded control channel
//! - events go over a small bounded channel with `try_send`
//!
//! Delivery is at-most-once. An event that finds the buffer full is dropped
//! and the caller is never blocked. A connection whose write fails or times
//! out is removed on the spot; the others still get the event.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{stream::SplitSink, SinkExt};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::auth::Role;
use crate::models::order::OrderView;

pub type SendError = Box<dyn std::error::Error + Send + Sync>;

/// Push frame sent to courier clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CourierEvent {
    /// Sent once when the connection is registered
    Subscribed { connection_id: u64 },
    OrderCreated { order: OrderView },
    OrderUpdated { order: OrderView },
}

impl CourierEvent {
    fn label(&self) -> &'static str {
        match self {
            CourierEvent::Subscribed { .. } => "subscribed",
            CourierEvent::OrderCreated { .. } => "order_created",
            CourierEvent::OrderUpdated { .. } => "order_updated",
        }
    }
}

/// Write half of a courier client
#[async_trait]
pub trait CourierConnection: Send {
    async fn send_text(&mut self, text: String) -> Result<(), SendError>;
}

/// Sink half of an axum websocket
pub struct WsCourierConnection {
    sink: SplitSink<WebSocket, Message>,
}

impl WsCourierConnection {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl CourierConnection for WsCourierConnection {
    async fn send_text(&mut self, text: String) -> Result<(), SendError> {
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

enum Control {
    Register {
        id: ConnectionId,
        role: Role,
        connection: Box<dyn CourierConnection>,
    },
    Deregister(ConnectionId),
}

/// Handle used by request paths. Cheap to clone.
#[derive(Clone)]
pub struct CourierDispatchBroadcaster {
    control_tx: mpsc::UnboundedSender<Control>,
    events_tx: mpsc::Sender<CourierEvent>,
    next_id: Arc<AtomicU64>,
    connections: Arc<AtomicUsize>,
}

impl CourierDispatchBroadcaster {
    /// Create the handle and the worker that must be spawned to serve it
    pub fn new(queue_capacity: usize, write_timeout: Duration) -> (Self, DispatchWorker) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(queue_capacity.max(1));
        let connections = Arc::new(AtomicUsize::new(0));

        let broadcaster = Self {
            control_tx,
            events_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            connections: connections.clone(),
        };
        let worker = DispatchWorker {
            control_rx,
            events_rx,
            registry: Vec::new(),
            write_timeout,
            connections,
        };

        (broadcaster, worker)
    }

    /// Hand a connection to the worker. Returns the id to deregister with.
    pub fn register(&self, role: Role, connection: Box<dyn CourierConnection>) -> ConnectionId {
        let id = self.next_connection_id();
        self.register_as(id, role, connection);
        id
    }

    /// Reserve an id before the connection is handed over
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn register_as(
        &self,
        id: ConnectionId,
        role: Role,
        connection: Box<dyn CourierConnection>,
    ) {
        if self
            .control_tx
            .send(Control::Register {
                id,
                role,
                connection,
            })
            .is_err()
        {
            warn!(connection = %id, "Dispatch worker is gone, connection not registered");
        }
    }

    /// Remove a connection whose client went away. Unknown ids are ignored.
    pub fn deregister(&self, id: ConnectionId) {
        let _ = self.control_tx.send(Control::Deregister(id));
    }

    /// Non-blocking hand-off to the worker
    ///
    /// Returns `false` when the event was dropped because the buffer is full
    /// or the worker has stopped.
    pub fn enqueue(&self, event: CourierEvent) -> bool {
        let label = event.label();
        match self.events_tx.try_send(event) {
            Ok(()) => {
                trace!(event = label, "Courier event queued");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(event = label, "Dispatch worker busy, courier event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(event = label, "Dispatch worker stopped, courier event dropped");
                false
            }
        }
    }

    /// Connections currently held by the worker
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }
}

struct Registered {
    id: ConnectionId,
    role: Role,
    connection: Box<dyn CourierConnection>,
}

/// Owner of the connection registry. Run with `tokio::spawn(worker.run())`.
pub struct DispatchWorker {
    control_rx: mpsc::UnboundedReceiver<Control>,
    events_rx: mpsc::Receiver<CourierEvent>,
    registry: Vec<Registered>,
    write_timeout: Duration,
    connections: Arc<AtomicUsize>,
}

impl DispatchWorker {
    pub async fn run(mut self) {
        info!("Courier dispatch worker started");

        loop {
            tokio::select! {
                biased;

                Some(command) = self.control_rx.recv() => self.apply(command),
                Some(event) = self.events_rx.recv() => {
                    // Registrations made before this event was queued must see it
                    while let Ok(command) = self.control_rx.try_recv() {
                        self.apply(command);
                    }
                    self.dispatch(event).await;
                }
                else => break,
            }
        }

        info!(
            remaining = self.registry.len(),
            "Courier dispatch worker stopped"
        );
    }

    fn apply(&mut self, command: Control) {
        match command {
            Control::Register {
                id,
                role,
                connection,
            } => {
                self.registry.push(Registered {
                    id,
                    role,
                    connection,
                });
                info!(connection = %id, %role, total = self.registry.len(), "Connection registered");
            }
            Control::Deregister(id) => {
                let before = self.registry.len();
                self.registry.retain(|c| c.id != id);
                if self.registry.len() < before {
                    info!(connection = %id, total = self.registry.len(), "Connection deregistered");
                }
            }
        }
        self.connections.store(self.registry.len(), Ordering::Release);
    }

    async fn dispatch(&mut self, event: CourierEvent) {
        if self.registry.is_empty() {
            trace!(event = event.label(), "No courier connections, nothing to send");
            return;
        }

        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(event = event.label(), error = %e, "Failed to serialize courier event");
                return;
            }
        };

        let mut failed = Vec::new();
        for entry in self.registry.iter_mut() {
            let write = entry.connection.send_text(payload.clone());
            match tokio::time::timeout(self.write_timeout, write).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(connection = %entry.id, role = %entry.role, error = %e, "Courier write failed, dropping connection");
                    failed.push(entry.id);
                }
                Err(_) => {
                    warn!(connection = %entry.id, role = %entry.role, "Courier write timed out, dropping connection");
                    failed.push(entry.id);
                }
            }
        }

        if !failed.is_empty() {
            self.registry.retain(|c| !failed.contains(&c.id));
            self.connections.store(self.registry.len(), Ordering::Release);
        }

        debug!(
            event = event.label(),
            delivered = self.registry.len(),
            dropped = failed.len(),
            "Courier event dispatched"
        );
    }
}
