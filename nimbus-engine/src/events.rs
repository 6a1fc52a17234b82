//! Typed lifecycle and progress events
//!
//! Every dependency state transition is published exactly once on a
//! broadcast bus; per-dependency readiness gates live in the registry as
//! watch channels.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One dependency state transition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "transition")]
pub enum DependencyTransition {
    Loading,
    Retry { attempt: u32 },
    Ready { version: Option<String> },
    Error { message: String },
    Timeout,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyEvent {
    pub id: Uuid,
    pub dependency: String,
    #[serde(flatten)]
    pub transition: DependencyTransition,
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Coarse initialization progress
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub stage: String,
    pub percent: u8,
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    Dependency(DependencyEvent),
    Progress(ProgressEvent),
}

/// Broadcast bus for engine events.
///
/// Emission never blocks; events published with no subscribers are simply
/// dropped.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn emit_dependency(
        &self,
        dependency: &str,
        transition: DependencyTransition,
        elapsed: Duration,
    ) {
        self.emit(EngineEvent::Dependency(DependencyEvent {
            id: Uuid::new_v4(),
            dependency: dependency.to_string(),
            transition,
            elapsed_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        }));
    }

    pub fn emit_progress(&self, stage: &str, percent: u8) {
        self.emit(EngineEvent::Progress(ProgressEvent {
            stage: stage.to_string(),
            percent: percent.min(100),
        }));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_are_delivered_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit_dependency("sql-engine", DependencyTransition::Loading, Duration::ZERO);
        bus.emit_dependency(
            "sql-engine",
            DependencyTransition::Ready {
                version: Some("1.2.0".into()),
            },
            Duration::from_millis(10),
        );

        match rx.recv().await.unwrap() {
            EngineEvent::Dependency(event) => {
                assert_eq!(event.dependency, "sql-engine");
                assert_eq!(event.transition, DependencyTransition::Loading);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            EngineEvent::Dependency(event) => {
                assert!(matches!(
                    event.transition,
                    DependencyTransition::Ready { .. }
                ));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_harmless() {
        let bus = EventBus::new();
        bus.emit_progress("startup", 150);
    }
}
