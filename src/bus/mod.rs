//! Topic-based pub/sub with queue-group semantics.
//!
//! Per topic the bus delivers at-least-once; within a queue group exactly
//! one subscriber receives each message. [`NatsBus`] is the production
//! transport; [`memory::MemoryBus`] implements the identical contract
//! in-process for tests.

pub mod memory;
pub mod nats;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

pub use nats::NatsBus;

/// Topic carrying ExecutionRequests from the scheduler. A `job.logs` topic
/// is reserved alongside these for a future log sink.
pub const TOPIC_JOB_REQUESTS: &str = "job.requests";
/// Topic carrying JobEvents from executors.
pub const TOPIC_JOB_EVENTS: &str = "job.events";

pub const QUEUE_GROUP_CONTROLLER: &str = "praetor-controller";
pub const QUEUE_GROUP_EXECUTOR: &str = "executor-group";
pub const QUEUE_GROUP_CONSUMER: &str = "consumer-group";

/// Buffer size for subscription channels, matching the bus-side buffering
/// the executors and consumers were designed against.
pub const CHANNEL_CAPACITY: usize = 100;

#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Publish a raw payload to a topic.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()>;

    /// Subscribe to a topic as a member of a queue group. The returned
    /// channel closes when the underlying subscription ends.
    async fn subscribe(
        &self,
        topic: &str,
        queue_group: &str,
    ) -> anyhow::Result<mpsc::Receiver<Vec<u8>>>;
}

/// Publish a message as JSON.
pub async fn publish_json<T: Serialize>(
    bus: &dyn MessageBus,
    topic: &str,
    message: &T,
) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(message)?;
    bus.publish(topic, payload).await
}

/// Subscribe to a topic, decoding each payload as JSON. Payloads that fail
/// to decode are logged and skipped; the subscription continues.
pub async fn subscribe_json<T>(
    bus: &dyn MessageBus,
    topic: &str,
    queue_group: &str,
) -> anyhow::Result<mpsc::Receiver<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    let mut raw = bus.subscribe(topic, queue_group).await?;
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let topic = topic.to_string();

    tokio::spawn(async move {
        while let Some(payload) = raw.recv().await {
            let message: T = match serde_json::from_slice(&payload) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(topic = %topic, "Dropping undecodable message: {e}");
                    continue;
                }
            };
            if tx.send(message).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}
