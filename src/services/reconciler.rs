//! Reconciler — periodic sweep that trues up run state against the
//! workload substrate. Catches terminal pods whose events never arrived
//! and runs whose pod vanished.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use uuid::Uuid;

use crate::config::Config;
use crate::db::DbPool;
use crate::models::run::ExecutionRun;
use crate::schema::execution_runs;

const SWEEP_LIMIT: i64 = 20;

/// Run the reconciler loop forever. Spawned alongside the controller.
pub async fn run_reconciler(pool: DbPool, client: kube::Client, config: Config) {
    tracing::info!(
        interval_secs = config.reconcile_interval_secs,
        "Reconciler started"
    );

    loop {
        if let Err(e) = sweep(&pool, &client, &config).await {
            tracing::error!("Reconciler sweep error: {e:#}");
        }
        tokio::time::sleep(std::time::Duration::from_secs(
            config.reconcile_interval_secs,
        ))
        .await;
    }
}

async fn sweep(pool: &DbPool, client: &kube::Client, config: &Config) -> anyhow::Result<()> {
    let mut conn = pool.get().await?;

    let runs: Vec<ExecutionRun> = execution_runs::table
        .filter(execution_runs::state.eq_any(["pending", "running"]))
        .order(execution_runs::created_at.asc())
        .limit(SWEEP_LIMIT)
        .select(ExecutionRun::as_select())
        .load(&mut conn)
        .await?;

    let pods: Api<Pod> = Api::namespaced(client.clone(), &config.namespace);

    for run in runs {
        if let Err(e) = reconcile_run(&mut conn, &pods, &run).await {
            tracing::error!(run_id = %run.id, "Failed to reconcile run: {e:#}");
        }
    }

    Ok(())
}

/// Map a run's pod phase back onto run state.
async fn reconcile_run(
    conn: &mut AsyncPgConnection,
    pods: &Api<Pod>,
    run: &ExecutionRun,
) -> anyhow::Result<()> {
    let pod_name = format!("execution-{}", run.id);
    let pod = pods
        .get_opt(&pod_name)
        .await
        .map_err(|e| anyhow::anyhow!("get pod {pod_name}: {e}"))?;

    let phase = pod
        .as_ref()
        .and_then(|p| p.status.as_ref())
        .and_then(|s| s.phase.as_deref())
        .unwrap_or_default()
        .to_string();

    match (run.state.as_str(), pod.is_some(), phase.as_str()) {
        (_, true, "Succeeded") => {
            tracing::info!(pod = %pod_name, "Workload succeeded");
            update_run_state(conn, run.id, "successful").await
        }
        (_, true, "Failed") => {
            tracing::warn!(pod = %pod_name, "Workload failed");
            update_run_state(conn, run.id, "failed").await
        }
        ("pending", true, "Running") => update_run_state(conn, run.id, "running").await,
        ("running", false, _) => {
            // Pod gone while the run believed it was executing: lost.
            tracing::warn!(pod = %pod_name, run_id = %run.id, "Workload missing for running execution");
            update_run_state(conn, run.id, "failed").await
        }
        _ => Ok(()),
    }
}

async fn update_run_state(
    conn: &mut AsyncPgConnection,
    run_id: Uuid,
    new_state: &str,
) -> anyhow::Result<()> {
    let now = chrono::Utc::now();

    match new_state {
        "successful" | "failed" => {
            diesel::update(
                execution_runs::table
                    .find(run_id)
                    .filter(execution_runs::state.eq_any(["pending", "running"])),
            )
            .set((
                execution_runs::state.eq(new_state),
                execution_runs::finished_at.eq(now),
            ))
            .execute(conn)
            .await?;
        }
        _ => {
            diesel::update(
                execution_runs::table
                    .find(run_id)
                    .filter(execution_runs::state.eq("pending")),
            )
            .set((
                execution_runs::state.eq(new_state),
                execution_runs::started_at.eq(now),
            ))
            .execute(conn)
            .await?;
        }
    }

    crate::metrics::run_reconciled(new_state);
    Ok(())
}
