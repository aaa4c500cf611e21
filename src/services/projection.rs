//! Event projection — applies a JobEvent to the authoritative run state.
//!
//! Each event is projected in one transaction: the immutable job_events
//! insert (conflict-ignoring on the per-run seq), the conditional state
//! transition, and the seq watermark advance. Transitions are guarded so
//! redelivered or reordered events can never move a run backward.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use crate::db::DbPool;
use crate::messages::JobEvent;
use crate::models::event::NewJobEvent;
use crate::schema::{execution_runs, job_events, unified_jobs};

/// State change implied by an event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started,
    Succeeded,
    Failed,
}

impl Transition {
    pub fn run_state(self) -> &'static str {
        match self {
            Transition::Started => "running",
            Transition::Succeeded => "successful",
            Transition::Failed => "failed",
        }
    }

    pub fn job_status(self) -> &'static str {
        self.run_state()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Transition::Succeeded | Transition::Failed)
    }
}

/// Which transition, if any, an event type causes. Task-level events leave
/// run state untouched.
pub fn transition_for(event_type: &str) -> Option<Transition> {
    match event_type {
        "JOB_STARTED" => Some(Transition::Started),
        "JOB_COMPLETED" => Some(Transition::Succeeded),
        "JOB_FAILED" => Some(Transition::Failed),
        _ => None,
    }
}

/// Project one event into the store.
pub async fn write_event(pool: &DbPool, event: &JobEvent) -> anyhow::Result<()> {
    let mut conn = pool.get().await?;

    conn.transaction::<_, anyhow::Error, _>(|conn| {
        async move {
            let row = NewJobEvent {
                unified_job_id: event.unified_job_id,
                execution_run_id: event.execution_run_id,
                seq: event.seq,
                event_type: event.event_type.clone(),
                host_id: None,
                task_name: event.task_name.clone(),
                play_name: event.play_name.clone(),
                event_data: event.event_data.clone(),
                stdout_snippet: event.stdout_snippet.clone(),
                created_at: event.timestamp,
            };

            let inserted = diesel::insert_into(job_events::table)
                .values(&row)
                .on_conflict((job_events::execution_run_id, job_events::seq))
                .do_nothing()
                .execute(conn)
                .await?;
            if inserted == 0 {
                tracing::debug!(
                    run_id = %event.execution_run_id,
                    seq = event.seq,
                    "Event already persisted; redelivery"
                );
            }

            if let Some(transition) = transition_for(&event.event_type) {
                apply_transition(
                    conn,
                    event.execution_run_id,
                    event.unified_job_id,
                    transition,
                    event.timestamp,
                )
                .await?;
            }

            advance_watermarks(conn, event.execution_run_id, event.seq).await?;

            Ok(())
        }
        .scope_boxed()
    })
    .await
}

/// Apply a guarded state transition to the run and its job. The guards
/// enforce pending → running → terminal; an update that matches zero rows
/// means the transition already happened.
async fn apply_transition(
    conn: &mut AsyncPgConnection,
    run_id: Uuid,
    job_id: i64,
    transition: Transition,
    at: DateTime<Utc>,
) -> anyhow::Result<()> {
    if transition.is_terminal() {
        diesel::update(
            execution_runs::table
                .find(run_id)
                .filter(execution_runs::state.eq_any(["pending", "running"])),
        )
        .set((
            execution_runs::state.eq(transition.run_state()),
            execution_runs::finished_at.eq(at),
        ))
        .execute(conn)
        .await?;

        let changed = diesel::update(
            unified_jobs::table
                .find(job_id)
                .filter(unified_jobs::status.eq_any(["pending", "queued", "running"])),
        )
        .set((
            unified_jobs::status.eq(transition.job_status()),
            unified_jobs::finished_at.eq(at),
        ))
        .execute(conn)
        .await?;
        if changed > 0 {
            crate::metrics::job_status_changed(transition.job_status());
        }
    } else {
        diesel::update(
            execution_runs::table
                .find(run_id)
                .filter(execution_runs::state.eq("pending")),
        )
        .set((
            execution_runs::state.eq(transition.run_state()),
            execution_runs::started_at.eq(at),
        ))
        .execute(conn)
        .await?;

        let changed = diesel::update(
            unified_jobs::table
                .find(job_id)
                .filter(unified_jobs::status.eq_any(["pending", "queued"])),
        )
        .set((
            unified_jobs::status.eq(transition.job_status()),
            unified_jobs::started_at.eq(at),
        ))
        .execute(conn)
        .await?;
        if changed > 0 {
            crate::metrics::job_status_changed(transition.job_status());
        }
    }

    Ok(())
}

/// Advance the run's seq watermarks; they never move backward, so
/// out-of-order delivery cannot violate monotonicity.
async fn advance_watermarks(
    conn: &mut AsyncPgConnection,
    run_id: Uuid,
    seq: i64,
) -> anyhow::Result<()> {
    diesel::update(
        execution_runs::table
            .find(run_id)
            .filter(execution_runs::last_event_seq.lt(seq)),
    )
    .set(execution_runs::last_event_seq.eq(seq))
    .execute(conn)
    .await?;

    diesel::update(
        execution_runs::table
            .find(run_id)
            .filter(execution_runs::persisted_event_seq.lt(seq)),
    )
    .set(execution_runs::persisted_event_seq.eq(seq))
    .execute(conn)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_events_map_to_transitions() {
        assert_eq!(transition_for("JOB_STARTED"), Some(Transition::Started));
        assert_eq!(transition_for("JOB_COMPLETED"), Some(Transition::Succeeded));
        assert_eq!(transition_for("JOB_FAILED"), Some(Transition::Failed));
    }

    #[test]
    fn task_events_do_not_transition() {
        assert_eq!(transition_for("TASK_OK"), None);
        assert_eq!(transition_for("TASK_FAILED"), None);
        assert_eq!(transition_for("JOB_LOG"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!Transition::Started.is_terminal());
        assert!(Transition::Succeeded.is_terminal());
        assert!(Transition::Failed.is_terminal());
        assert_eq!(Transition::Succeeded.run_state(), "successful");
        assert_eq!(Transition::Failed.job_status(), "failed");
    }
}
