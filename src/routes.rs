//! Event-ingestion HTTP surface — out-of-band event upload for one-shot
//! executors that cannot reach the bus.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use uuid::Uuid;

use crate::db::DbPool;
use crate::messages::JobEvent;
use crate::models::event::NewJobEvent;
use crate::schema::{execution_runs, job_events};

#[derive(Clone)]
pub struct IngestionState {
    pub pool: DbPool,
}

/// Build the ingestion router.
pub fn ingestion_router(state: IngestionState) -> Router {
    Router::new()
        .route("/api/v1/runs/{run_id}/events", post(ingest_handler))
        .with_state(state)
}

async fn ingest_handler(
    State(state): State<IngestionState>,
    Path(run_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    let run_id = Uuid::parse_str(&run_id).map_err(|_| StatusCode::BAD_REQUEST)?;
    let events: Vec<JobEvent> =
        serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;

    match ingest_events(&state.pool, run_id, &events).await {
        Ok(accepted) => {
            crate::metrics::events_ingested(accepted);
            tracing::info!(run_id = %run_id, count = accepted, "Ingested events");
            Ok(StatusCode::ACCEPTED)
        }
        Err(e) => {
            tracing::error!(run_id = %run_id, "Failed to ingest events: {e:#}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Persist a batch of events for a run in one transaction. The run id in
/// the path wins over whatever the payload carries; duplicate (run, seq)
/// pairs are ignored. Touches the run's heartbeat to show activity.
pub async fn ingest_events(
    pool: &DbPool,
    run_id: Uuid,
    events: &[JobEvent],
) -> anyhow::Result<usize> {
    if events.is_empty() {
        return Ok(0);
    }

    let mut conn = pool.get().await?;

    conn.transaction::<_, anyhow::Error, _>(|conn| {
        async move {
            let mut accepted = 0;
            for event in events {
                let row = NewJobEvent {
                    unified_job_id: event.unified_job_id,
                    execution_run_id: run_id,
                    seq: event.seq,
                    event_type: event.event_type.clone(),
                    host_id: None,
                    task_name: event.task_name.clone(),
                    play_name: event.play_name.clone(),
                    event_data: event.event_data.clone(),
                    stdout_snippet: event.stdout_snippet.clone(),
                    created_at: event.timestamp,
                };

                accepted += diesel::insert_into(job_events::table)
                    .values(&row)
                    .on_conflict((job_events::execution_run_id, job_events::seq))
                    .do_nothing()
                    .execute(conn)
                    .await?;
            }

            diesel::update(execution_runs::table.find(run_id))
                .set(execution_runs::last_heartbeat_at.eq(chrono::Utc::now()))
                .execute(conn)
                .await?;

            Ok(accepted)
        }
        .scope_boxed()
    })
    .await
}
