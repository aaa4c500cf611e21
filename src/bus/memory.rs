//! In-process bus with queue-group semantics, for tests.
//!
//! Not suitable for production: no persistence, single-process only.
//! Delivery round-robins across the live members of each queue group;
//! topics with no subscribers drop messages, matching the wire transport.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{MessageBus, CHANNEL_CAPACITY};

#[derive(Default)]
struct QueueGroup {
    members: Vec<mpsc::Sender<Vec<u8>>>,
    next: usize,
}

#[derive(Default)]
pub struct MemoryBus {
    topics: Mutex<HashMap<String, HashMap<String, QueueGroup>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueGroup {
    /// Deliver to one live member, round-robin. Members whose receiver has
    /// been dropped are pruned as they are encountered.
    async fn deliver(&mut self, payload: &[u8]) {
        while !self.members.is_empty() {
            let idx = self.next % self.members.len();
            match self.members[idx].send(payload.to_vec()).await {
                Ok(()) => {
                    self.next = (idx + 1) % self.members.len();
                    return;
                }
                Err(_) => {
                    self.members.remove(idx);
                }
            }
        }
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        let mut topics = self.topics.lock().await;
        if let Some(groups) = topics.get_mut(topic) {
            for group in groups.values_mut() {
                group.deliver(&payload).await;
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        queue_group: &str,
    ) -> anyhow::Result<mpsc::Receiver<Vec<u8>>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut topics = self.topics.lock().await;
        topics
            .entry(topic.to_string())
            .or_default()
            .entry(queue_group.to_string())
            .or_default()
            .members
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::bus::{publish_json, subscribe_json, TOPIC_JOB_REQUESTS};
    use crate::messages::{ExecutionRequest, JobManifest};

    #[tokio::test]
    async fn one_delivery_per_queue_group() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe("t", "g1").await.unwrap();
        let mut b = bus.subscribe("t", "g1").await.unwrap();

        bus.publish("t", b"one".to_vec()).await.unwrap();
        bus.publish("t", b"two".to_vec()).await.unwrap();

        // Round-robin: each member sees exactly one of the two messages.
        assert_eq!(a.recv().await.unwrap(), b"one");
        assert_eq!(b.recv().await.unwrap(), b"two");
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn every_group_gets_a_copy() {
        let bus = MemoryBus::new();
        let mut controller = bus.subscribe("t", "praetor-controller").await.unwrap();
        let mut executor = bus.subscribe("t", "executor-group").await.unwrap();

        bus.publish("t", b"req".to_vec()).await.unwrap();

        assert_eq!(controller.recv().await.unwrap(), b"req");
        assert_eq!(executor.recv().await.unwrap(), b"req");
    }

    #[tokio::test]
    async fn dead_members_are_skipped() {
        let bus = MemoryBus::new();
        let first = bus.subscribe("t", "g").await.unwrap();
        let mut second = bus.subscribe("t", "g").await.unwrap();
        drop(first);

        bus.publish("t", b"m1".to_vec()).await.unwrap();
        bus.publish("t", b"m2".to_vec()).await.unwrap();

        assert_eq!(second.recv().await.unwrap(), b"m1");
        assert_eq!(second.recv().await.unwrap(), b"m2");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let bus = MemoryBus::new();
        bus.publish("nobody-home", b"gone".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn typed_round_trip() {
        let bus = MemoryBus::new();
        let mut rx: mpsc::Receiver<ExecutionRequest> =
            subscribe_json(&bus, TOPIC_JOB_REQUESTS, "executor-group")
                .await
                .unwrap();

        let req = ExecutionRequest {
            execution_run_id: Uuid::new_v4(),
            unified_job_id: 5,
            job_manifest: JobManifest {
                playbook_content: "- hosts: all\n  tasks: []".to_string(),
                ..Default::default()
            },
            created_at: Utc::now(),
        };
        publish_json(&bus, TOPIC_JOB_REQUESTS, &req).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.execution_run_id, req.execution_run_id);
        assert_eq!(received.unified_job_id, 5);
    }

    #[tokio::test]
    async fn undecodable_payloads_are_skipped() {
        let bus = MemoryBus::new();
        let mut rx: mpsc::Receiver<ExecutionRequest> =
            subscribe_json(&bus, TOPIC_JOB_REQUESTS, "executor-group")
                .await
                .unwrap();

        bus.publish(TOPIC_JOB_REQUESTS, b"not json".to_vec())
            .await
            .unwrap();
        let req = ExecutionRequest {
            execution_run_id: Uuid::new_v4(),
            unified_job_id: 1,
            job_manifest: JobManifest::default(),
            created_at: Utc::now(),
        };
        publish_json(&bus, TOPIC_JOB_REQUESTS, &req).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().unified_job_id, 1);
    }
}
