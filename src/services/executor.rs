//! Executor agent — picks up execution requests and drives playbook runs.
//!
//! Daemon mode subscribes to the request topic on the executor queue group
//! and processes requests through a bounded worker pool. One-shot mode
//! (inside an orchestrated workload) reads a single injected manifest,
//! processes it, and exits.

use std::sync::Arc;

use anyhow::Context;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use tokio::sync::{mpsc, Mutex};

use crate::bus::{
    publish_json, subscribe_json, MessageBus, CHANNEL_CAPACITY, QUEUE_GROUP_EXECUTOR,
    TOPIC_JOB_EVENTS, TOPIC_JOB_REQUESTS,
};
use crate::db::DbPool;
use crate::messages::{ExecutionRequest, JobEvent};
use crate::schema::unified_jobs;
use crate::services::runner::PlaybookRunner;

/// Reads the pending-cancel flag for a job. Available to executors that
/// are configured with store access; one-shot workloads usually are not.
pub struct CancelProbe {
    pool: DbPool,
}

impl CancelProbe {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn cancel_requested(&self, job_id: i64) -> anyhow::Result<bool> {
        let mut conn = self.pool.get().await?;
        let flag = unified_jobs::table
            .find(job_id)
            .select(unified_jobs::cancel_requested)
            .first(&mut conn)
            .await?;
        Ok(flag)
    }
}

pub struct Agent {
    bus: Arc<dyn MessageBus>,
    runner: PlaybookRunner,
    workers: usize,
    cancel_probe: Option<CancelProbe>,
}

impl Agent {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        runner: PlaybookRunner,
        workers: usize,
        cancel_probe: Option<CancelProbe>,
    ) -> Self {
        Self {
            bus,
            runner,
            workers,
            cancel_probe,
        }
    }

    /// Daemon mode: consume requests from the bus until shutdown.
    pub async fn run_daemon(self: Arc<Self>) -> anyhow::Result<()> {
        let requests = subscribe_json::<ExecutionRequest>(
            self.bus.as_ref(),
            TOPIC_JOB_REQUESTS,
            QUEUE_GROUP_EXECUTOR,
        )
        .await?;
        let requests = Arc::new(Mutex::new(requests));

        tracing::info!(workers = self.workers, "Executor agent started, waiting for jobs");

        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let agent = self.clone();
            let requests = requests.clone();
            handles.push(tokio::spawn(async move {
                tracing::info!(worker_id, "Worker started");
                loop {
                    let request = { requests.lock().await.recv().await };
                    match request {
                        Some(request) => {
                            tracing::info!(
                                worker_id,
                                run_id = %request.execution_run_id,
                                job_id = request.unified_job_id,
                                "Worker picked up run"
                            );
                            agent.process_request(request).await;
                        }
                        None => break,
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    /// One-shot mode: load the injected manifest, process it once.
    pub async fn run_oneshot(&self, manifest_path: &str) -> anyhow::Result<()> {
        let data = tokio::fs::read(manifest_path)
            .await
            .with_context(|| format!("read manifest at {manifest_path}"))?;
        let request: ExecutionRequest =
            serde_json::from_slice(&data).context("unmarshal manifest")?;

        tracing::info!(
            run_id = %request.execution_run_id,
            job_id = request.unified_job_id,
            "Loaded execution request from manifest"
        );

        self.process_request(request).await;
        tracing::info!("One-shot execution finished");
        Ok(())
    }

    /// Run one request: fan events from the runner into a publisher task
    /// that drains after the run finishes. Runner errors are absorbed here;
    /// the run's outcome has already been emitted as a JOB_FAILED event.
    async fn process_request(&self, request: ExecutionRequest) {
        let (events_tx, events_rx) = mpsc::channel::<JobEvent>(CHANNEL_CAPACITY);
        let publisher = tokio::spawn(publish_events(self.bus.clone(), events_rx));

        if let Err(e) = self
            .runner
            .run(&request, events_tx, self.cancel_probe.as_ref())
            .await
        {
            tracing::error!(
                run_id = %request.execution_run_id,
                "Playbook run failed: {e:#}"
            );
        }

        // All event senders are dropped once the runner returns, so the
        // publisher drains the channel and exits.
        let _ = publisher.await;
    }
}

async fn publish_events(bus: Arc<dyn MessageBus>, mut events: mpsc::Receiver<JobEvent>) {
    while let Some(event) = events.recv().await {
        match publish_json(bus.as_ref(), TOPIC_JOB_EVENTS, &event).await {
            Ok(()) => crate::metrics::event_published(&event.event_type),
            Err(e) => {
                tracing::error!(
                    run_id = %event.execution_run_id,
                    seq = event.seq,
                    "Failed to publish event: {e:#}"
                );
            }
        }
    }
}
