//! In-process event bus
//!
//! Job progress, stored results and proxy health changes are broadcast to any
//! number of subscribers without blocking the emitter. If nobody listens the
//! event is dropped; a lagging subscriber misses the oldest events.
//!
//! Analysis consumers hook in through [`EventBus::on_result_stored`], which
//! fires once a result with data has been stored. The pipeline never waits
//! on them.
//!
//! ```no_run
//! use libosint::events::EventBus;
//!
//! # async fn example() {
//! let bus = EventBus::new(100);
//! bus.on_result_stored(|summary| {
//!     println!("{} items for {}", summary.item_count, summary.target);
//! });
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::job::JobState;
use crate::proxy::ProxyHealth;
use crate::types::{FetchResult, Target};

pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    /// `capacity` is the per-subscriber buffer before lagging receivers drop events
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // Err only means there are no receivers right now
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Run `callback` for every stored result, on a background task
    ///
    /// The listener ends when the bus is dropped or the handle is aborted.
    pub fn on_result_stored<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(ResultSummary) + Send + 'static,
    {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(Event::ResultStored(summary)) => callback(summary),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "analysis listener lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Events emitted by the pipeline, scheduler and proxy pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    JobStarted {
        job_id: Uuid,
        target: Target,
    },

    JobFinished {
        job_id: Uuid,
        target: Target,
        state: JobState,
        attempts: u32,
        item_count: usize,
    },

    /// A result with data was stored; the analysis trigger
    ResultStored(ResultSummary),

    TaskRunCompleted {
        task: String,
        run_id: Uuid,
        manual: bool,
        succeeded: usize,
        failed: usize,
    },

    ProxyHealthChanged {
        endpoint: String,
        health: ProxyHealth,
    },
}

/// What an analysis consumer learns about a stored result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub target: Target,
    pub item_count: usize,
    pub success: bool,
    pub error: Option<ErrorKind>,
    pub fetched_at: DateTime<Utc>,
}

impl From<&FetchResult> for ResultSummary {
    fn from(result: &FetchResult) -> Self {
        Self {
            target: result.target.clone(),
            item_count: result.item_count(),
            success: result.success,
            error: result.error,
            fetched_at: result.fetched_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Platform;
    use std::sync::Arc;
    use std::time::Duration;

    fn target() -> Target {
        Target::new(Platform::Instagram, "alice").unwrap()
    }

    #[tokio::test]
    async fn test_event_emission_and_subscription() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        let job_id = Uuid::new_v4();
        bus.emit(Event::JobStarted {
            job_id,
            target: target(),
        });

        match receiver.recv().await.unwrap() {
            Event::JobStarted { job_id: id, target: t } => {
                assert_eq!(id, job_id);
                assert_eq!(t, target());
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let bus = EventBus::new(10);
        bus.emit(Event::ProxyHealthChanged {
            endpoint: "tor://127.0.0.1:9050".to_string(),
            health: ProxyHealth::Unreachable,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_event_serialization() {
        let event = Event::ResultStored(ResultSummary::from(&FetchResult::failed(
            target(),
            ErrorKind::AuthRequired,
            "login wall",
        )));

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"result_stored\""));
        assert!(json.contains("auth_required"));
        assert!(json.contains("instagram"));

        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, Event::ResultStored(s) if !s.success));
    }

    #[tokio::test]
    async fn test_on_result_stored_filters_other_events() {
        let bus = EventBus::new(10);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = bus.on_result_stored(move |summary| sink.lock().push(summary));

        bus.emit(Event::JobStarted {
            job_id: Uuid::new_v4(),
            target: target(),
        });
        let result = FetchResult::ok(target(), vec![serde_json::json!({"id": 1})]);
        bus.emit(Event::ResultStored(ResultSummary::from(&result)));

        for _ in 0..50 {
            if !seen.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].item_count, 1);
        listener.abort();
    }
}
