// Loadbeat Common - Wire types shared between the engine and observer clients
//
// Everything that crosses the WebSocket boundary lives here so that external
// observer tooling can depend on one small crate instead of the whole engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response-time distribution over the retained latency samples of one run.
///
/// All values are milliseconds. A run with no completed requests yet reports
/// the zero value for every field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimeStats {
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub std_dev_ms: f64,
}

/// Periodic live-metrics snapshot pushed to observers while a run is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationUpdate {
    pub simulation_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Requests actually completed per second over the last reporting window.
    pub achieved_rps: f64,
    /// Requests per second the rate model asked for at this point of the ramp.
    pub target_rps: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub response_time_stats: ResponseTimeStats,
}

/// Outbound event payloads, one closed variant per message kind.
///
/// The wire encoding stays a generic `{type, data, timestamp}` envelope (see
/// [`EventEnvelope`]) while the boundary itself is statically checkable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HubEvent {
    ConnectionEstablished {
        observer_id: Uuid,
    },
    SimulationStarted {
        simulation_id: Uuid,
        target_url: String,
        max_rps: f64,
        duration_seconds: u64,
    },
    SimulationUpdate(SimulationUpdate),
    SimulationCompleted {
        simulation_id: Uuid,
        status: String,
        total_requests: u64,
        successful_requests: u64,
        failed_requests: u64,
    },
    Pong,
    StatusUpdate {
        connected_observers: usize,
        server_status: String,
    },
    Error {
        message: String,
    },
}

/// Generic event envelope as it appears on the wire: `{type, data, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub event: HubEvent,
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    /// Wrap an event with the current wall-clock timestamp.
    pub fn new(event: HubEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }
}

/// Inbound commands an observer may send over the WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubCommand {
    Ping,
    SubscribeSimulation { simulation_id: Uuid },
    UnsubscribeSimulation { simulation_id: Uuid },
    GetStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_type_data_and_timestamp() {
        let envelope = EventEnvelope::new(HubEvent::StatusUpdate {
            connected_observers: 3,
            server_status: "ok".to_string(),
        });
        let value = serde_json::to_value(&envelope).expect("envelope serializes");

        assert_eq!(value["type"], "status_update");
        assert_eq!(value["data"]["connected_observers"], 3);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn unit_variant_serializes_without_data() {
        let envelope = EventEnvelope::new(HubEvent::Pong);
        let value = serde_json::to_value(&envelope).expect("envelope serializes");

        assert_eq!(value["type"], "pong");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn envelope_round_trips() {
        let update = SimulationUpdate {
            simulation_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            achieved_rps: 42.5,
            target_rps: 50.0,
            total_requests: 100,
            successful_requests: 98,
            failed_requests: 2,
            response_time_stats: ResponseTimeStats::default(),
        };
        let envelope = EventEnvelope::new(HubEvent::SimulationUpdate(update.clone()));

        let json = serde_json::to_string(&envelope).expect("serializes");
        let decoded: EventEnvelope = serde_json::from_str(&json).expect("deserializes");

        match decoded.event {
            HubEvent::SimulationUpdate(got) => {
                assert_eq!(got.simulation_id, update.simulation_id);
                assert_eq!(got.total_requests, 100);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn commands_parse_from_client_json() {
        let ping: HubCommand = serde_json::from_str(r#"{"type":"ping"}"#).expect("parses");
        assert_eq!(ping, HubCommand::Ping);

        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"subscribe_simulation","simulation_id":"{id}"}}"#);
        let subscribe: HubCommand = serde_json::from_str(&raw).expect("parses");
        assert_eq!(subscribe, HubCommand::SubscribeSimulation { simulation_id: id });
    }
}
