//! In-process event bus
//!
//! Publish/subscribe fanout used to push job output, job status and
//! project-level updates to external session layers (typically a WebSocket
//! bridge). Delivery is best-effort: publishing never blocks, and a
//! subscriber that falls behind loses messages rather than slowing the
//! core down.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Per-topic channel capacity before lagging subscribers start dropping.
const CHANNEL_CAPACITY: usize = 256;

/// Subscription topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Job(Uuid),
    Project(Uuid),
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Job(id) => write!(f, "job:{id}"),
            Self::Project(id) => write!(f, "project:{id}"),
        }
    }
}

/// Event payloads emitted on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// One line of live tool output
    JobOutput {
        job_id: Uuid,
        output: String,
        #[serde(rename = "type")]
        output_type: String,
    },
    /// Job lifecycle transition; `status` additionally carries `parsed`
    /// when a parse task finishes.
    JobStatus {
        job_id: Uuid,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    /// Project-scoped update (workflow status, node status, notifications,
    /// approval requests, report generation).
    ProjectUpdate { event_type: String, data: Value },
}

/// Best-effort publish/subscribe fanout over per-topic broadcast channels.
#[derive(Default)]
pub struct EventBus {
    channels: RwLock<HashMap<String, broadcast::Sender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a topic. The channel is created on first subscription.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        let key = topic.to_string();
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event to a topic. Never blocks; events on topics with no
    /// subscribers are dropped, as are events a lagging subscriber cannot
    /// keep up with.
    pub fn publish(&self, topic: Topic, event: Event) {
        let key = topic.to_string();
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = channels.get(&key) {
            // A send error just means every receiver is gone.
            let _ = sender.send(event);
        }
    }

    /// Convenience: publish a `job_status` event on the job's topic.
    pub fn publish_job_status(&self, job_id: Uuid, status: &str, details: Option<Value>) {
        self.publish(
            Topic::Job(job_id),
            Event::JobStatus {
                job_id,
                status: status.to_string(),
                details,
            },
        );
    }

    /// Convenience: publish a `job_output` event on the job's topic.
    pub fn publish_job_output(&self, job_id: Uuid, output: &str, output_type: &str) {
        self.publish(
            Topic::Job(job_id),
            Event::JobOutput {
                job_id,
                output: output.to_string(),
                output_type: output_type.to_string(),
            },
        );
    }

    /// Convenience: publish a `project_update` event on the project topic.
    pub fn publish_project_update(&self, project_id: Uuid, event_type: &str, data: Value) {
        self.publish(
            Topic::Project(project_id),
            Event::ProjectUpdate {
                event_type: event_type.to_string(),
                data,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribe_then_publish_delivers() {
        let bus = EventBus::new();
        let job_id = Uuid::now_v7();
        let mut rx = bus.subscribe(Topic::Job(job_id));

        bus.publish_job_output(job_id, "hello", "stdout");

        match rx.recv().await.unwrap() {
            Event::JobOutput { output, output_type, .. } => {
                assert_eq!(output, "hello");
                assert_eq!(output_type, "stdout");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_a_noop() {
        let bus = EventBus::new();
        // Must not block or panic.
        bus.publish_job_status(Uuid::now_v7(), "running", None);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = EventBus::new();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let mut rx_a = bus.subscribe(Topic::Job(a));
        let _rx_b = bus.subscribe(Topic::Job(b));

        bus.publish_job_status(b, "running", None);
        bus.publish_job_status(a, "queued", None);

        match rx_a.recv().await.unwrap() {
            Event::JobStatus { job_id, status, .. } => {
                assert_eq!(job_id, a);
                assert_eq!(status, "queued");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_project_update_shape() {
        let bus = EventBus::new();
        let project = Uuid::now_v7();
        let mut rx = bus.subscribe(Topic::Project(project));

        bus.publish_project_update(project, "workflow_status", json!({"status": "running"}));

        match rx.recv().await.unwrap() {
            Event::ProjectUpdate { event_type, data } => {
                assert_eq!(event_type, "workflow_status");
                assert_eq!(data["status"], "running");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
