use std::collections::{HashMap, HashSet};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use loadbeat_common::{EventEnvelope, HubCommand, HubEvent};

/// Default capacity of each observer's outbound buffer.
pub const DEFAULT_OBSERVER_BUFFER: usize = 64;

/// Capacity of the hub's command channel.
const HUB_COMMAND_BUFFER: usize = 256;

/// Requests processed by the hub task. All observer-map mutation goes
/// through this channel; the map itself is never exposed.
enum HubRequest {
    Register {
        observer_id: Uuid,
        sender: mpsc::Sender<EventEnvelope>,
    },
    Unregister {
        observer_id: Uuid,
    },
    Broadcast {
        simulation_id: Option<Uuid>,
        envelope: EventEnvelope,
    },
    Command {
        observer_id: Uuid,
        command: HubCommand,
    },
    Status {
        reply: oneshot::Sender<HubStatus>,
    },
}

#[derive(Debug, Clone)]
pub struct HubStatus {
    pub connected_observers: usize,
    pub server_status: String,
}

struct Observer {
    sender: mpsc::Sender<EventEnvelope>,
    /// Simulations this observer wants updates for; empty means all.
    subscriptions: HashSet<Uuid>,
}

/// Fan-out point for live events.
///
/// One hub task owns the observer map for the whole process. Delivery to a
/// slow observer never blocks the others: each observer has a bounded
/// outbound buffer, and a full buffer drops the message for that observer
/// only. The hub holds no simulation state; it is a transport multiplexer.
pub struct BroadcastHub {
    command_rx: mpsc::Receiver<HubRequest>,
    observers: HashMap<Uuid, Observer>,
}

impl BroadcastHub {
    /// Spawn the hub task, returning a clonable handle to it.
    pub fn spawn() -> (HubHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(HUB_COMMAND_BUFFER);
        let hub = Self {
            command_rx,
            observers: HashMap::new(),
        };
        let task = tokio::spawn(hub.run());
        (HubHandle { command_tx }, task)
    }

    async fn run(mut self) {
        info!("Broadcast hub started");
        while let Some(request) = self.command_rx.recv().await {
            match request {
                HubRequest::Register {
                    observer_id,
                    sender,
                } => self.register(observer_id, sender),
                HubRequest::Unregister { observer_id } => self.unregister(observer_id),
                HubRequest::Broadcast {
                    simulation_id,
                    envelope,
                } => self.broadcast(simulation_id, &envelope),
                HubRequest::Command {
                    observer_id,
                    command,
                } => self.handle_command(observer_id, command),
                HubRequest::Status { reply } => {
                    let _ = reply.send(self.status());
                }
            }
        }
        info!("Broadcast hub stopped");
    }

    fn register(&mut self, observer_id: Uuid, sender: mpsc::Sender<EventEnvelope>) {
        let greeting = EventEnvelope::new(HubEvent::ConnectionEstablished { observer_id });
        if sender.try_send(greeting).is_err() {
            warn!(observer_id = %observer_id, "Observer unreachable at registration");
            return;
        }
        self.observers.insert(
            observer_id,
            Observer {
                sender,
                subscriptions: HashSet::new(),
            },
        );
        gauge!("hub_connected_observers", self.observers.len() as f64);
        info!(observer_id = %observer_id, observers = self.observers.len(), "Observer registered");
    }

    fn unregister(&mut self, observer_id: Uuid) {
        if self.observers.remove(&observer_id).is_some() {
            gauge!("hub_connected_observers", self.observers.len() as f64);
            info!(observer_id = %observer_id, observers = self.observers.len(), "Observer unregistered");
        }
    }

    fn broadcast(&mut self, simulation_id: Option<Uuid>, envelope: &EventEnvelope) {
        let mut disconnected = Vec::new();

        for (observer_id, observer) in &self.observers {
            let interested = match simulation_id {
                Some(id) => observer.subscriptions.is_empty() || observer.subscriptions.contains(&id),
                None => true,
            };
            if !interested {
                continue;
            }

            match observer.sender.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Drop-newest for this observer only; others are unaffected.
                    counter!("hub_messages_dropped", 1);
                    warn!(observer_id = %observer_id, "Observer buffer full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    disconnected.push(*observer_id);
                }
            }
        }

        for observer_id in disconnected {
            debug!(observer_id = %observer_id, "Observer channel closed during broadcast");
            self.unregister(observer_id);
        }
    }

    fn handle_command(&mut self, observer_id: Uuid, command: HubCommand) {
        match command {
            HubCommand::Ping => {
                self.reply_to(observer_id, HubEvent::Pong);
            }
            HubCommand::GetStatus => {
                let status = self.status();
                self.reply_to(
                    observer_id,
                    HubEvent::StatusUpdate {
                        connected_observers: status.connected_observers,
                        server_status: status.server_status,
                    },
                );
            }
            HubCommand::SubscribeSimulation { simulation_id } => {
                if let Some(observer) = self.observers.get_mut(&observer_id) {
                    observer.subscriptions.insert(simulation_id);
                    debug!(observer_id = %observer_id, simulation_id = %simulation_id, "Observer subscribed");
                }
            }
            HubCommand::UnsubscribeSimulation { simulation_id } => {
                if let Some(observer) = self.observers.get_mut(&observer_id) {
                    observer.subscriptions.remove(&simulation_id);
                    debug!(observer_id = %observer_id, simulation_id = %simulation_id, "Observer unsubscribed");
                }
            }
        }
    }

    fn reply_to(&mut self, observer_id: Uuid, event: HubEvent) {
        let Some(observer) = self.observers.get(&observer_id) else {
            return;
        };
        match observer.sender.try_send(EventEnvelope::new(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!("hub_messages_dropped", 1);
                warn!(observer_id = %observer_id, "Observer buffer full, dropping reply");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.unregister(observer_id);
            }
        }
    }

    fn status(&self) -> HubStatus {
        HubStatus {
            connected_observers: self.observers.len(),
            server_status: "ok".to_string(),
        }
    }
}

/// Clonable handle for talking to the hub task.
#[derive(Clone)]
pub struct HubHandle {
    command_tx: mpsc::Sender<HubRequest>,
}

impl HubHandle {
    pub async fn register(&self, observer_id: Uuid, sender: mpsc::Sender<EventEnvelope>) {
        self.send(HubRequest::Register {
            observer_id,
            sender,
        })
        .await;
    }

    pub async fn unregister(&self, observer_id: Uuid) {
        self.send(HubRequest::Unregister { observer_id }).await;
    }

    /// Fan an event out to every interested observer. `simulation_id`
    /// scopes delivery to observers subscribed to that run (observers with
    /// no subscriptions receive everything).
    pub async fn publish(&self, simulation_id: Option<Uuid>, event: HubEvent) {
        self.send(HubRequest::Broadcast {
            simulation_id,
            envelope: EventEnvelope::new(event),
        })
        .await;
    }

    pub async fn command(&self, observer_id: Uuid, command: HubCommand) {
        self.send(HubRequest::Command {
            observer_id,
            command,
        })
        .await;
    }

    pub async fn status(&self) -> Option<HubStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(HubRequest::Status { reply: reply_tx }).await;
        reply_rx.await.ok()
    }

    async fn send(&self, request: HubRequest) {
        if self.command_tx.send(request).await.is_err() {
            debug!("Broadcast hub is gone, dropping request");
        }
    }
}

/// Bridge one WebSocket connection to the hub as an observer.
///
/// The read and write halves run as independent tasks so a stalled peer
/// cannot wedge inbound command handling. Either half ending tears the
/// session down and unregisters the observer exactly once.
pub async fn serve_observer(socket: WebSocket, hub: HubHandle, buffer: usize) {
    let observer_id = Uuid::new_v4();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<EventEnvelope>(buffer);
    hub.register(observer_id, outbound_tx).await;

    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&envelope) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize outbound event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let command_hub = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = ws_rx.next().await {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<HubCommand>(&text) {
                    Ok(command) => command_hub.command(observer_id, command).await,
                    Err(e) => {
                        debug!(observer_id = %observer_id, error = %e, "Unparseable hub command");
                    }
                },
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.unregister(observer_id).await;
    debug!(observer_id = %observer_id, "Observer session closed");
}
