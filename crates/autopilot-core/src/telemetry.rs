//! Fire-and-forget observability events.
//!
//! The orchestrator emits a [`TelemetryEvent`] at every notable step. Sinks
//! must not block and must not fail: a sink that cannot deliver an event
//! drops it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BidDecision,
    EntrySubmitted,
    BidPlaced,
    DeliverableSigned,
    BidSubmitted,
    BidWithdrawn,
    SubmissionAttempt,
    SubmissionSucceeded,
    SubmissionFailed,
    SettlementReconciled,
    TickError,
    TickCompleted,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::BidDecision => "bid_decision",
            EventType::EntrySubmitted => "entry_submitted",
            EventType::BidPlaced => "bid_placed",
            EventType::DeliverableSigned => "deliverable_signed",
            EventType::BidSubmitted => "bid_submitted",
            EventType::BidWithdrawn => "bid_withdrawn",
            EventType::SubmissionAttempt => "submission_attempt",
            EventType::SubmissionSucceeded => "submission_succeeded",
            EventType::SubmissionFailed => "submission_failed",
            EventType::SettlementReconciled => "settlement_reconciled",
            EventType::TickError => "tick_error",
            EventType::TickCompleted => "tick_completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: Value,
}

impl TelemetryEvent {
    pub fn now(event_type: EventType, payload: Value) -> Self {
        Self {
            at: Utc::now(),
            event_type,
            payload,
        }
    }
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        tracing::info!(
            event = event.event_type.as_str(),
            at = %event.at,
            payload = %event.payload,
            "autopilot event"
        );
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn emit(&self, _event: TelemetryEvent) {}
}

/// Fans events out to any number of subscribers. Sending with no live
/// receivers, or to a lagging receiver, never blocks the orchestrator.
#[derive(Debug, Clone)]
pub struct BroadcastTelemetry {
    tx: broadcast::Sender<TelemetryEvent>,
}

impl BroadcastTelemetry {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.tx.subscribe()
    }
}

impl TelemetrySink for BroadcastTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_serializes_type_field() {
        let ev = TelemetryEvent::now(EventType::TickError, json!({"stage": "settlement"}));
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "tick_error");
        assert_eq!(v["payload"]["stage"], "settlement");
    }

    #[tokio::test]
    async fn broadcast_delivers_to_subscribers() {
        let sink = BroadcastTelemetry::new(8);
        let mut rx = sink.subscribe();
        sink.emit(TelemetryEvent::now(EventType::BidSubmitted, json!({"jobId": "j1"})));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.event_type, EventType::BidSubmitted);
    }

    #[test]
    fn broadcast_without_receivers_does_not_panic() {
        let sink = BroadcastTelemetry::new(1);
        sink.emit(TelemetryEvent::now(EventType::TickCompleted, json!({})));
        sink.emit(TelemetryEvent::now(EventType::TickCompleted, json!({})));
    }

    #[test]
    fn as_str_matches_serde_name() {
        for ty in [EventType::BidDecision, EventType::SubmissionAttempt, EventType::SettlementReconciled] {
            let v = serde_json::to_value(ty).unwrap();
            assert_eq!(v, ty.as_str());
        }
    }
}
