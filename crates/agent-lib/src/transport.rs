//! Message-shaped boundary to out-of-scope collaborators
//!
//! The actual transport (registration, routing, broadcast) lives outside
//! this crate; the core only produces and consumes these narrow message
//! types over channels. Status emission is fire-and-forget and must never
//! block the control loop.

use crate::models::{OutsideConditions, StatusUpdate};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// Signals arriving from external collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundSignal {
    /// Periodic weather reading from the environmental feed
    Conditions(OutsideConditions),
    /// Operator override for the cooling setpoint
    SetTargetTemperature { value: f64 },
    /// Operator override for the workload level
    SetWorkload { value: f64 },
}

/// Messages emitted toward external collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Flat observability snapshot after a tick or action
    Status(StatusUpdate),
    /// Request for fresh outside conditions
    ConditionsRequest { city: String },
}

/// Non-blocking publisher for outbound messages
///
/// A lagging or absent consumer costs dropped updates, never a stalled
/// control loop.
#[derive(Clone)]
pub struct StatusPublisher {
    tx: mpsc::Sender<OutboundMessage>,
}

impl StatusPublisher {
    /// Create a publisher and the receiving end for the transport adapter
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    pub fn publish_status(&self, status: StatusUpdate) {
        self.send(OutboundMessage::Status(status));
    }

    pub fn request_conditions(&self, city: &str) {
        self.send(OutboundMessage::ConditionsRequest {
            city: city.to_string(),
        });
    }

    fn send(&self, message: OutboundMessage) {
        if let Err(e) = self.tx.try_send(message) {
            warn!(error = %e, "Dropping outbound message, consumer lagging");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> StatusUpdate {
        StatusUpdate {
            timestamp: 0,
            energy_kw: 20.0,
            workload: 0.5,
            ambient_temp_c: 25.0,
            humidity_pct: 50.0,
            target_temp_c: 22.0,
            fan_speed_pct: 30.0,
            airflow_m3h: 300.0,
            pue: 1.5,
            failure_risk: 0.0,
            rack_temperatures_c: vec![22.0; 10],
            thermal_storage_kwh: 300.0,
            outside_temperature_c: 15.0,
            outside_humidity_pct: 50.0,
            action: None,
        }
    }

    #[tokio::test]
    async fn test_publish_delivers() {
        let (publisher, mut rx) = StatusPublisher::channel(8);
        publisher.publish_status(status());

        match rx.recv().await.unwrap() {
            OutboundMessage::Status(s) => assert_eq!(s.energy_kw, 20.0),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_channel_never_blocks() {
        let (publisher, _rx) = StatusPublisher::channel(1);
        // Second and later sends are dropped, not awaited
        for _ in 0..100 {
            publisher.publish_status(status());
        }
    }

    #[test]
    fn test_inbound_signal_wire_format() {
        let json = r#"{"type":"set_target_temperature","value":23.5}"#;
        let signal: InboundSignal = serde_json::from_str(json).unwrap();
        match signal {
            InboundSignal::SetTargetTemperature { value } => assert_eq!(value, 23.5),
            other => panic!("unexpected signal: {:?}", other),
        }
    }

    #[test]
    fn test_conditions_round_trip() {
        let signal = InboundSignal::Conditions(OutsideConditions {
            temperature_c: 3.0,
            humidity_pct: 80.0,
        });
        let json = serde_json::to_string(&signal).unwrap();
        let back: InboundSignal = serde_json::from_str(&json).unwrap();
        match back {
            InboundSignal::Conditions(c) => assert_eq!(c.temperature_c, 3.0),
            other => panic!("unexpected signal: {:?}", other),
        }
    }
}
