//! NATS-backed bus transport.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::{MessageBus, CHANNEL_CAPACITY};

pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    /// Connect to the NATS endpoint.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| anyhow::anyhow!("nats connect failed: {e}"))?;
        tracing::info!(url = %url, "Connected to NATS");
        Ok(Self { client })
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        self.client
            .publish(topic.to_string(), payload.into())
            .await
            .map_err(|e| anyhow::anyhow!("nats publish failed: {e}"))?;
        // Publishes are buffered client-side; flush so a commit-then-publish
        // sequence leaves the message on the server.
        self.client
            .flush()
            .await
            .map_err(|e| anyhow::anyhow!("nats flush failed: {e}"))?;
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        queue_group: &str,
    ) -> anyhow::Result<mpsc::Receiver<Vec<u8>>> {
        let mut subscriber = self
            .client
            .queue_subscribe(topic.to_string(), queue_group.to_string())
            .await
            .map_err(|e| anyhow::anyhow!("nats subscribe failed: {e}"))?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                if tx.send(message.payload.to_vec()).await.is_err() {
                    // Receiver gone; dropping the subscriber unsubscribes.
                    break;
                }
            }
        });

        Ok(rx)
    }
}
