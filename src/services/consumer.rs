//! Consumer — subscribes to the event topic and projects each event into
//! the store. The consumer queue group guarantees exactly one projection
//! per event across a replica set; the per-run seq uniqueness makes the
//! projection idempotent when the bus redelivers.

use std::sync::Arc;

use crate::bus::{subscribe_json, MessageBus, QUEUE_GROUP_CONSUMER, TOPIC_JOB_EVENTS};
use crate::db::DbPool;
use crate::messages::JobEvent;
use crate::services::projection;

pub async fn run_consumer(pool: DbPool, bus: Arc<dyn MessageBus>) -> anyhow::Result<()> {
    let mut events =
        subscribe_json::<JobEvent>(bus.as_ref(), TOPIC_JOB_EVENTS, QUEUE_GROUP_CONSUMER).await?;

    tracing::info!("Consumer started, waiting for events");

    while let Some(event) = events.recv().await {
        if let Err(e) = projection::write_event(&pool, &event).await {
            tracing::error!(
                run_id = %event.execution_run_id,
                seq = event.seq,
                "Error projecting event: {e:#}"
            );
            continue;
        }
        crate::metrics::event_projected(&event.event_type);
        tracing::info!(
            event_type = %event.event_type,
            seq = event.seq,
            job_id = event.unified_job_id,
            "Projected event"
        );
    }

    Ok(())
}
